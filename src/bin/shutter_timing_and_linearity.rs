//! Shutter timing offset and CCD linearity
//!
//! Solves for the shutter timing offset and the fiber and ND filter
//! transmissions from the measurements below the flux threshold, then fits
//! the non-linear response of the CCD over the whole data set.

use anyhow::Context;
use structopt::StructOpt;
use teststand::{linearity, AsciiTable, Linearity, LinearityConfig, ShutterTiming};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "shutter_timing_and_linearity",
    about = "Shutter timing offset and CCD non-linearity"
)]
struct Opt {
    /// ASCII table with the expreq, flux, nd and fiber columns
    table: String,
    /// Flux threshold of the linear regime
    #[structopt(long, default_value = "10000")]
    threshold: f64,
    /// Maximum number of iterations
    #[structopt(long, default_value = "50")]
    max_iter: usize,
    /// Estimate the transmissions with their own timing offset at each iteration
    #[structopt(long)]
    free_time: bool,
    /// Do not correct the amplifier non-linearity before the timing fit
    #[structopt(long)]
    no_correction: bool,
    /// Save the measured and model fluxes to a CSV file
    #[structopt(long)]
    csv: Option<String>,
    /// Plot the exposure time and linearity fits
    #[cfg(feature = "plot")]
    #[structopt(short, long)]
    plot: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let table = AsciiTable::from_path(&opt.table)
        .with_context(|| format!("failed to load {}", opt.table))?;
    let data = linearity::measurements(&table)?;

    let mut config = LinearityConfig::default()
        .threshold(opt.threshold)
        .max_iterations(opt.max_iter)
        .force_same_time(!opt.free_time);
    if opt.no_correction {
        config = config.corrected_fibers_from(None);
    }

    let timing = ShutterTiming::solve(&data, &config)?;
    for (k, delta_t) in timing.history.iter().enumerate() {
        println!("iter #{} delta exptime = {:.6}", k, delta_t);
    }
    timing.summary();
    println!("delta exptime = {:.6}", timing.delta_t);

    let linearity = Linearity::solve(&data, &timing, &config)?;
    linearity.summary();

    if let Some(filename) = opt.csv {
        linearity
            .to_csv(&filename)
            .with_context(|| format!("failed to write {}", filename))?;
    }

    #[cfg(feature = "plot")]
    if opt.plot {
        timing
            .plot("shutter_timing.png")
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        linearity
            .plot("linearity.png")
            .map_err(|e| anyhow::anyhow!("{}", e))?;
    }

    Ok(())
}
