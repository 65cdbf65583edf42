//! Fiber flat systematics
//!
//! The fiber flat ratio is averaged over bundles of fibers and rebinned in
//! wavelength to reveal the systematic errors of the flat field correction.

use crate::fits::{Fits, FitsError};
use nalgebra::DMatrix;
use std::{ops::Range, path::Path};

#[derive(thiserror::Error, Debug)]
pub enum FiberFlatError {
    #[error("failed to read the fiber flat file")]
    Fits(#[from] FitsError),
    #[error("fiber flat ({0}x{1}), ivar ({2}x{3}) and wavelength ({4}) sizes do not match")]
    Shape(usize, usize, usize, usize, usize),
    #[error("rebinning factors must be positive")]
    Rebin,
}
type Result<T> = std::result::Result<T, FiberFlatError>;

/// Wavelength rebinning factor
pub const WAVE_REBIN: usize = 100;
/// Number of fibers averaged together
pub const FIBER_BUNDLE: usize = 50;

#[derive(Debug, Clone)]
pub struct FiberFlat {
    /// Wavelengths [Å]
    pub wave: Vec<f64>,
    /// Flat field ratio (nfiber x nwave)
    pub ratio: DMatrix<f64>,
    /// Inverse variance of the ratio (nfiber x nwave)
    pub ivar: DMatrix<f64>,
}

/// Systematic error curve of a bundle of fibers
#[derive(Debug, Clone)]
pub struct BundleSystematics {
    pub fibers: Range<usize>,
    pub wave: Vec<f64>,
    /// Mean ratio minus 1
    pub residual: Vec<f64>,
    pub error: Vec<f64>,
}
impl BundleSystematics {
    /// Root mean square of the residual
    pub fn rms(&self) -> f64 {
        (self.residual.iter().map(|r| r * r).sum::<f64>() / self.residual.len() as f64).sqrt()
    }
}

/// Block mean of `x` by `n`, samples beyond the last full block are dropped
fn rebin_mean(x: &[f64], n: usize) -> Vec<f64> {
    x.chunks_exact(n)
        .map(|c| c.iter().sum::<f64>() / n as f64)
        .collect()
}
/// Block sum of `x` by `n`
fn rebin_sum(x: &[f64], n: usize) -> Vec<f64> {
    x.chunks_exact(n).map(|c| c.iter().sum::<f64>()).collect()
}

impl FiberFlat {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut fits = Fits::open(path)?;
        let ratio = fits.read_matrix(0)?;
        let ivar = fits.read_matrix(1)?;
        let wave = fits.read_vector("WAVELENGTH")?;
        Self::new(wave, ratio, ivar)
    }
    pub fn new(wave: Vec<f64>, ratio: DMatrix<f64>, ivar: DMatrix<f64>) -> Result<Self> {
        if ratio.shape() != ivar.shape() || ratio.ncols() != wave.len() {
            return Err(FiberFlatError::Shape(
                ratio.nrows(),
                ratio.ncols(),
                ivar.nrows(),
                ivar.ncols(),
                wave.len(),
            ));
        }
        log::info!(
            "fiber flat: {} fibers, {} wavelengths",
            ratio.nrows(),
            wave.len()
        );
        Ok(Self { wave, ratio, ivar })
    }
    pub fn nfiber(&self) -> usize {
        self.ratio.nrows()
    }
    /// Systematics of bundles of `fiber_bundle` fibers rebinned by `wave_rebin` wavelengths
    ///
    /// The last bundle may hold fewer fibers.
    pub fn systematics(
        &self,
        wave_rebin: usize,
        fiber_bundle: usize,
    ) -> Result<Vec<BundleSystematics>> {
        if wave_rebin == 0 || fiber_bundle == 0 {
            return Err(FiberFlatError::Rebin);
        }
        let wave = rebin_mean(&self.wave, wave_rebin);
        Ok((0..self.nfiber())
            .step_by(fiber_bundle)
            .map(|first| {
                let fibers = first..(first + fiber_bundle).min(self.nfiber());
                let n = fibers.len();
                let rows = self.ratio.rows(first, n);
                let mean_ratio: Vec<f64> = rows
                    .row_sum()
                    .iter()
                    .map(|r| r / n as f64)
                    .collect();
                let sum_ivar: Vec<f64> = self.ivar.rows(first, n).row_sum().iter().cloned().collect();
                BundleSystematics {
                    fibers,
                    wave: wave.clone(),
                    residual: rebin_mean(&mean_ratio, wave_rebin)
                        .into_iter()
                        .map(|r| r - 1.)
                        .collect(),
                    error: rebin_sum(&sum_ivar, wave_rebin)
                        .into_iter()
                        .map(|ivar| 1. / ivar.sqrt())
                        .collect(),
                }
            })
            .collect())
    }
}

#[cfg(feature = "plot")]
pub fn plot(
    systematics: &[BundleSystematics],
    filename: &str,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    use crate::plot::{minmax, padded};
    use plotters::prelude::*;

    let fig = BitMapBackend::new(filename, (1000, 600)).into_drawing_area();
    fig.fill(&WHITE)?;
    let xrange = padded(minmax(systematics.iter().flat_map(|s| s.wave.iter().cloned())));
    let yrange = padded(minmax(systematics.iter().flat_map(|s| {
        s.residual
            .iter()
            .zip(&s.error)
            .flat_map(|(r, e)| [r - e, r + e])
    })));
    let mut chart = ChartBuilder::on(&fig)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .margin(10)
        .build_cartesian_2d(xrange, yrange)?;
    chart
        .configure_mesh()
        .x_desc("wavelength (A)")
        .y_desc("fiber flat syst. error")
        .draw()?;
    let n = systematics.len().max(1) as f64;
    for (k, s) in systematics.iter().enumerate() {
        let c = colorous::RAINBOW.eval_continuous(k as f64 / n);
        let rgb = RGBColor(c.r, c.g, c.b);
        let band: Vec<(f64, f64)> = s
            .wave
            .iter()
            .zip(s.residual.iter().zip(&s.error))
            .map(|(w, (r, e))| (*w, r + e))
            .chain(
                s.wave
                    .iter()
                    .zip(s.residual.iter().zip(&s.error))
                    .rev()
                    .map(|(w, (r, e))| (*w, r - e)),
            )
            .collect();
        chart.draw_series(std::iter::once(Polygon::new(band, rgb.mix(0.2).filled())))?;
        chart
            .draw_series(LineSeries::new(
                s.wave.iter().cloned().zip(s.residual.iter().cloned()),
                rgb.stroke_width(2),
            ))?
            .label(format!("fibers {}-{}", s.fibers.start, s.fibers.end - 1))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], rgb));
    }
    chart
        .configure_series_labels()
        .border_style(&BLACK)
        .background_style(&WHITE.mix(0.8))
        .draw()?;
    fig.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(nfiber: usize, nwave: usize) -> FiberFlat {
        let wave: Vec<f64> = (0..nwave).map(|i| 3600. + i as f64).collect();
        let ratio = DMatrix::from_fn(nfiber, nwave, |i, _| 1. + 0.01 * i as f64);
        let ivar = DMatrix::from_element(nfiber, nwave, 4.);
        FiberFlat::new(wave, ratio, ivar).unwrap()
    }

    #[test]
    fn bundles() {
        let ff = flat(5, 25);
        let syst = ff.systematics(10, 2).unwrap();
        assert_eq!(syst.len(), 3);
        assert_eq!(syst[2].fibers, 4..5);
        // tail wavelengths dropped
        assert_eq!(syst[0].wave, vec![3604.5, 3614.5]);
        assert!((syst[0].residual[0] - 0.005).abs() < 1e-12);
        assert!((syst[2].residual[1] - 0.04).abs() < 1e-12);
        // 1/sqrt(2 fibers x 10 wavelengths x 4)
        assert!((syst[0].error[0] - 1. / 80f64.sqrt()).abs() < 1e-12);
        assert!((syst[2].rms() - 0.04).abs() < 1e-12);
    }

    #[test]
    fn shape_mismatch() {
        let r = FiberFlat::new(vec![1., 2.], DMatrix::zeros(2, 3), DMatrix::zeros(2, 3));
        assert!(matches!(r, Err(FiberFlatError::Shape(..))));
        assert!(flat(2, 2).systematics(0, 1).is_err());
    }
}
