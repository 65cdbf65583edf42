//! Extracted spectra frames

use crate::{
    fibers::Fibers,
    fits::{Fits, FitsError},
};
use nalgebra::DMatrix;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("failed to read the frame file")]
    Fits(#[from] FitsError),
    #[error("flux ({0}x{1}) and wavelength ({2}) sizes do not match")]
    Shape(usize, usize, usize),
    #[error("fiber #{fiber} is out of range (nspec={nspec})")]
    Fiber { fiber: usize, nspec: usize },
}
type Result<T> = std::result::Result<T, FrameError>;

/// Spectrum of a single fiber
#[derive(Debug, Clone)]
pub struct Spectrum {
    pub fiber: usize,
    pub wave: Vec<f64>,
    pub flux: Vec<f64>,
    /// `1/sqrt(ivar)`, `None` where `ivar` is not positive
    pub error: Option<Vec<Option<f64>>>,
}
impl Spectrum {
    pub fn median_flux(&self) -> f64 {
        let mut flux: Vec<f64> = self.flux.iter().cloned().filter(|f| f.is_finite()).collect();
        if flux.is_empty() {
            return f64::NAN;
        }
        flux.sort_by(|a, b| a.total_cmp(b));
        let n = flux.len();
        if n % 2 == 1 {
            flux[n / 2]
        } else {
            0.5 * (flux[n / 2 - 1] + flux[n / 2])
        }
    }
    /// Mean signal to noise ratio over the samples with a valid error
    pub fn mean_snr(&self) -> Option<f64> {
        let snr: Vec<f64> = self
            .error
            .as_ref()?
            .iter()
            .zip(&self.flux)
            .filter_map(|(e, f)| e.map(|e| f / e))
            .collect();
        if snr.is_empty() {
            None
        } else {
            Some(snr.iter().sum::<f64>() / snr.len() as f64)
        }
    }
}

/// Frame of extracted spectra
#[derive(Debug, Clone)]
pub struct Frame {
    /// Wavelengths [Å]
    pub wave: Vec<f64>,
    /// Flux (nspec x nwave)
    pub flux: DMatrix<f64>,
    /// Inverse variance (nspec x nwave)
    pub ivar: Option<DMatrix<f64>>,
}
impl Frame {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut fits = Fits::open(path)?;
        let flux = fits.read_matrix(0)?;
        let ivar = if fits.has_hdu("IVAR") {
            Some(fits.read_matrix("IVAR")?)
        } else {
            log::warn!("no IVAR extension in {:?}", fits.path());
            None
        };
        let wave = fits.read_vector("WAVELENGTH")?;
        Self::new(wave, flux, ivar)
    }
    pub fn new(wave: Vec<f64>, flux: DMatrix<f64>, ivar: Option<DMatrix<f64>>) -> Result<Self> {
        if flux.ncols() != wave.len()
            || ivar.as_ref().map_or(false, |ivar| ivar.shape() != flux.shape())
        {
            return Err(FrameError::Shape(flux.nrows(), flux.ncols(), wave.len()));
        }
        Ok(Self { wave, flux, ivar })
    }
    pub fn nspec(&self) -> usize {
        self.flux.nrows()
    }
    pub fn spectrum(&self, fiber: usize, with_error: bool) -> Result<Spectrum> {
        if fiber >= self.nspec() {
            return Err(FrameError::Fiber {
                fiber,
                nspec: self.nspec(),
            });
        }
        let error = match (&self.ivar, with_error) {
            (Some(ivar), true) => Some(
                ivar.row(fiber)
                    .iter()
                    .map(|&v| if v > 0. { Some(1. / v.sqrt()) } else { None })
                    .collect(),
            ),
            _ => None,
        };
        Ok(Spectrum {
            fiber,
            wave: self.wave.clone(),
            flux: self.flux.row(fiber).iter().cloned().collect(),
            error,
        })
    }
    pub fn spectra(&self, fibers: &Fibers, with_error: bool) -> Result<Vec<Spectrum>> {
        fibers
            .iter()
            .map(|fiber| self.spectrum(fiber, with_error))
            .collect()
    }
}

/// Frame plot options
#[derive(Debug, Clone, Default)]
pub struct PlotOptions {
    pub error_bars: bool,
    pub log_scale: bool,
    pub legend: bool,
}

#[cfg(feature = "plot")]
pub fn plot(
    spectra: &[(String, Vec<Spectrum>)],
    options: &PlotOptions,
    filename: &str,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    use crate::plot::{color, minmax, padded};
    use plotters::prelude::*;

    let all = || spectra.iter().flat_map(|(_, s)| s.iter());
    let xrange = padded(minmax(all().flat_map(|s| s.wave.iter().cloned())));
    let (fmin, fmax) = minmax(
        all()
            .flat_map(|s| s.flux.iter().cloned())
            .filter(|f| !options.log_scale || *f > 0.),
    );

    let fig = BitMapBackend::new(filename, (1000, 600)).into_drawing_area();
    fig.fill(&WHITE)?;
    let mut builder = ChartBuilder::on(&fig);
    builder
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .margin(10);

    macro_rules! draw {
        ($chart:expr) => {{
            let mut chart = $chart;
            chart
                .configure_mesh()
                .x_desc("Wavelength [A]")
                .y_desc("Flux")
                .draw()?;
            let mut k = 0;
            for (label, spectra) in spectra {
                for s in spectra {
                    let rgb = color(k);
                    k += 1;
                    chart
                        .draw_series(LineSeries::new(
                            s.wave
                                .iter()
                                .cloned()
                                .zip(s.flux.iter().cloned())
                                .filter(|(_, f)| !options.log_scale || *f > 0.),
                            &rgb,
                        ))?
                        .label(format!("{} #{}", label, s.fiber))
                        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], rgb));
                    if let (true, Some(error)) = (options.error_bars, &s.error) {
                        chart.draw_series(
                            s.wave
                                .iter()
                                .zip(&s.flux)
                                .zip(error)
                                .filter_map(|((w, f), e)| e.map(|e| (*w, *f, e)))
                                .filter(|(_, f, e)| !options.log_scale || f - e > 0.)
                                .map(|(w, f, e)| {
                                    PathElement::new(vec![(w, f - e), (w, f + e)], rgb.mix(0.5))
                                }),
                        )?;
                    }
                }
            }
            if options.legend {
                chart
                    .configure_series_labels()
                    .border_style(&BLACK)
                    .background_style(&WHITE.mix(0.8))
                    .position(SeriesLabelPosition::UpperLeft)
                    .draw()?;
            }
        }};
    }

    if options.log_scale {
        let (fmin, fmax) = if fmin.is_finite() { (fmin, fmax) } else { (1., 10.) };
        draw!(builder.build_cartesian_2d(xrange, (fmin..fmax * 1.1).log_scale())?);
    } else {
        draw!(builder.build_cartesian_2d(xrange, padded((fmin, fmax)))?);
    }
    fig.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        let wave = vec![5000., 5001., 5002., 5003.];
        let flux = DMatrix::from_row_slice(2, 4, &[1., 2., 3., 4., 10., 20., 30., 40.]);
        let ivar = DMatrix::from_row_slice(2, 4, &[4., 4., 0., 4., 1., 1., 1., 1.]);
        Frame::new(wave, flux, Some(ivar)).unwrap()
    }

    #[test]
    fn extract_spectrum() {
        let frame = frame();
        let s = frame.spectrum(1, false).unwrap();
        assert_eq!(s.flux, vec![10., 20., 30., 40.]);
        assert!(s.error.is_none());
        assert_eq!(s.median_flux(), 25.);
        assert!(frame.spectrum(2, true).is_err());
    }

    #[test]
    fn spectrum_errors() {
        let s = frame().spectrum(0, true).unwrap();
        assert_eq!(
            s.error.clone().unwrap(),
            vec![Some(0.5), Some(0.5), None, Some(0.5)]
        );
        // (2 + 4 + 8)/3
        assert!((s.mean_snr().unwrap() - 14. / 3.).abs() < 1e-12);
    }

    #[test]
    fn selection() {
        let frame = frame();
        let fibers: Fibers = "1,0".parse().unwrap();
        let spectra = frame.spectra(&fibers, true).unwrap();
        assert_eq!(spectra[0].fiber, 1);
        assert_eq!(spectra[1].fiber, 0);
    }

    #[test]
    fn shape_mismatch() {
        assert!(Frame::new(vec![1.], DMatrix::zeros(1, 2), None).is_err());
    }
}
