//! PSF boot file summary
//!
//! Prints the wavelength range, the trace coefficient shapes and the
//! dispersion `dλ/dy` along each fiber trace.

use anyhow::Context;
use structopt::StructOpt;
use teststand::{PsfBoot, PsfModel};

#[derive(Debug, StructOpt)]
#[structopt(name = "plot_psf_boot", about = "PSF boot file traces and dispersion")]
struct Opt {
    /// PSF boot FITS file
    #[structopt(short, long)]
    psf: String,
    /// Number of wavelengths sampled along the traces
    #[structopt(long, default_value = "100")]
    nwave: usize,
    /// Save the traces plot to this file
    #[cfg(feature = "plot")]
    #[structopt(long)]
    fig: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let psf = PsfBoot::from_path(&opt.psf).with_context(|| format!("failed to read {}", opt.psf))?;
    println!("camera={} arm={}", psf.camera, psf.arm);
    println!("wavemin,wavemax = {},{}", psf.wavemin, psf.wavemax);
    println!("xcoef shape = {:?}", psf.xcoef.shape());
    println!("ycoef shape = {:?}", psf.ycoef.shape());
    println!("nspec = {}", psf.nspec());

    let (fibers, total) = psf.dispersion_summary(opt.nwave)?;
    for (fiber, d) in fibers.iter().enumerate() {
        println!(
            "fiber #{} min mean max dw/dy = {:.3} {:.3} {:.3}",
            fiber, d.min, d.mean, d.max
        );
    }
    println!(
        "all fibers min mean max dw/dy = {:.3} {:.3} {:.3}",
        total.min, total.mean, total.max
    );

    #[cfg(feature = "plot")]
    if let Some(filename) = opt.fig {
        psf.plot(&filename).map_err(|e| anyhow::anyhow!("{}", e))?;
    }

    Ok(())
}
