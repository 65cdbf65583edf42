//! Extracted spectra
//!
//! Prints a summary of the selected spectra of one or several frames and
//! plots them all together.

use anyhow::Context;
use structopt::StructOpt;
use teststand::{
    fibers,
    frame::{Frame, PlotOptions, Spectrum},
    Fibers,
};

#[derive(Debug, StructOpt)]
#[structopt(name = "plot_frame", about = "Spectra of extracted frames")]
struct Opt {
    /// Frame FITS files
    #[structopt(short, long, required = true)]
    frame: Vec<String>,
    /// Fiber selection, e.g. `0:10,20` (default: all)
    #[structopt(long)]
    fibers: Option<Fibers>,
    /// Show the errors
    #[structopt(long)]
    err: bool,
    /// Logarithmic flux scale
    #[structopt(long)]
    log: bool,
    /// Show the legend
    #[structopt(short, long)]
    legend: bool,
    /// Save the plot to this file
    #[structopt(short, long)]
    output: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let mut spectra: Vec<(String, Vec<Spectrum>)> = vec![];
    for path in &opt.frame {
        let frame = Frame::from_path(path).with_context(|| format!("failed to read {}", path))?;
        let selection = fibers::select(opt.fibers.as_ref(), frame.nspec());
        spectra.push((path.clone(), frame.spectra(&selection, opt.err)?));
    }

    for (path, frame_spectra) in &spectra {
        for s in frame_spectra {
            match s.mean_snr() {
                Some(snr) => println!(
                    "{} fiber #{}: median flux = {:.3} mean S/N = {:.2}",
                    path,
                    s.fiber,
                    s.median_flux(),
                    snr
                ),
                None => println!(
                    "{} fiber #{}: median flux = {:.3}",
                    path,
                    s.fiber,
                    s.median_flux()
                ),
            }
        }
    }

    let options = PlotOptions {
        error_bars: opt.err,
        log_scale: opt.log,
        legend: opt.legend,
    };
    if let Some(filename) = opt.output {
        #[cfg(feature = "plot")]
        teststand::frame::plot(&spectra, &options, &filename)
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        #[cfg(not(feature = "plot"))]
        log::warn!(
            "{} not written ({:?}), build with the `plot` feature",
            filename,
            options
        );
    }

    Ok(())
}
