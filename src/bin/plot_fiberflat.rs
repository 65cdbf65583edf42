//! Fiber flat systematics
//!
//! Averages the fiber flat ratio over bundles of fibers and blocks of
//! wavelengths and prints the RMS of the residual of each bundle.

use anyhow::Context;
use structopt::StructOpt;
use teststand::fiberflat::{FiberFlat, FIBER_BUNDLE, WAVE_REBIN};

#[derive(Debug, StructOpt)]
#[structopt(name = "plot_fiberflat", about = "Fiber flat systematic errors")]
struct Opt {
    /// Fiber flat FITS file
    #[structopt(short, long)]
    fiberflat: String,
    /// Wavelength rebinning factor
    #[structopt(long, default_value = "100")]
    rebin: usize,
    /// Number of fibers per bundle
    #[structopt(long, default_value = "50")]
    bundle: usize,
    /// Save the plot to this file
    #[cfg(feature = "plot")]
    #[structopt(short, long)]
    output: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();
    if opt.rebin != WAVE_REBIN || opt.bundle != FIBER_BUNDLE {
        log::info!("rebinning by {} wavelengths and {} fibers", opt.rebin, opt.bundle);
    }

    let flat = FiberFlat::from_path(&opt.fiberflat)
        .with_context(|| format!("failed to read {}", opt.fiberflat))?;
    let systematics = flat.systematics(opt.rebin, opt.bundle)?;
    for s in &systematics {
        println!(
            "fibers {:3}-{:3}: syst. error RMS = {:.5}",
            s.fibers.start,
            s.fibers.end - 1,
            s.rms()
        );
    }

    #[cfg(feature = "plot")]
    if let Some(filename) = opt.output {
        teststand::fiberflat::plot(&systematics, &filename).map_err(|e| anyhow::anyhow!("{}", e))?;
    }

    Ok(())
}
