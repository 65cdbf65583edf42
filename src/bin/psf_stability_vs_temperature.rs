//! PSF stability vs temperature
//!
//! Compares the PSF stamps of the same fibers at a given wavelength across
//! a sequence of PSF files and matches each PSF with the mean temperatures
//! of its exposures.

use anyhow::Context;
use indicatif::{ProgressBar, ProgressIterator, ProgressStyle};
use structopt::StructOpt;
use teststand::{
    psf::PsfModel,
    read_psf,
    stability::{self, Stability, TemperatureLog},
    Fibers,
};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "psf_stability_vs_temperature",
    about = "PSF stamp moments vs spectrograph temperatures"
)]
struct Opt {
    /// PSF files named `...-<first expnum>-<last expnum>.fits`
    #[structopt(long, required = true)]
    psf: Vec<String>,
    /// Temperature log ASCII table
    #[structopt(long)]
    temp: String,
    /// Output ASCII file
    #[structopt(short, long)]
    output: Option<String>,
    /// Wavelength [A]
    #[structopt(long)]
    wave: f64,
    /// Fiber selection, e.g. `0:10,20`
    #[structopt(long)]
    fibers: Fibers,
    /// Exposure time of the PSF exposures in the temperature log [s]
    #[structopt(long, default_value = "6")]
    exptime: f64,
    /// Plot the stamp moments vs temperature
    #[cfg(feature = "plot")]
    #[structopt(long)]
    plot: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let log = TemperatureLog::from_path(&opt.temp)
        .with_context(|| format!("failed to load {}", opt.temp))?
        .exptime(opt.exptime);

    let pb = ProgressBar::new(opt.psf.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message("reading PSFs");
    let mut psfs = vec![];
    let mut conditions = vec![];
    for path in opt.psf.iter().progress_with(pb) {
        let psf = read_psf(path).with_context(|| format!("failed to read {}", path))?;
        let (first, last) = stability::exposure_range(path)?;
        conditions.push(
            log.conditions(first, last)
                .with_context(|| format!("no temperature for {}", path))?,
        );
        psfs.push(psf);
    }

    let models: Vec<&(dyn PsfModel + Send + Sync)> = psfs.iter().map(|psf| &**psf).collect();
    let moments = stability::mean_moments(&models, &opt.fibers, opt.wave)?;

    let selection = opt
        .fibers
        .iter()
        .map(|fiber| fiber.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let results = Stability {
        wavelength: opt.wave,
        fibers: selection,
        conditions,
        moments,
    };
    for (path, m) in opt.psf.iter().zip(&results.moments) {
        println!(
            "{}: emission={:+.6} continuum={:+.6} dx={:+.4} dy={:+.4} sx={:.4} sy={:.4}",
            path,
            m.delta_ratio_emission_line,
            m.delta_ratio_continuum,
            m.delta_x,
            m.delta_y,
            m.sigma_x,
            m.sigma_y
        );
    }
    if let Some(output) = &opt.output {
        results
            .to_ascii(output)
            .with_context(|| format!("failed to write {}", output))?;
        println!("wrote {}", output);
    }

    #[cfg(feature = "plot")]
    if let Some(filename) = opt.plot {
        results.plot(&filename).map_err(|e| anyhow::anyhow!("{}", e))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_optional() {
        let args = [
            "psf_stability_vs_temperature",
            "--psf",
            "psf-b1-00000010-00000012.fits",
            "--temp",
            "temp.txt",
            "--wave",
            "6562.8",
            "--fibers",
            "0:5",
        ];
        let opt = Opt::from_iter(args);
        assert!(opt.output.is_none());
        let opt = Opt::from_iter(args.into_iter().chain(["-o", "stability.txt"]));
        assert_eq!(opt.output.as_deref(), Some("stability.txt"));
    }
}
