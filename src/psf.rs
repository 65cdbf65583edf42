//! Point spread function models
//!
//! The PSF boot file holds, for each fiber, the Legendre polynomial coefficients
//! of the CCD `x` and `y` trace coordinates as a function of the reduced
//! wavelength (see [PsfBoot::reduced_wavelength]), and the sigma of a circular
//! Gaussian PSF.
//! The Gauss-Hermite PSF (see [GaussHermite]) refines the Gaussian core with
//! Hermite polynomials.

use crate::{
    fits::{Fits, FitsError},
    polyfit::{self, gradient},
};
use nalgebra::DMatrix;
use std::{path::Path, str::FromStr};
use strum_macros::{Display, EnumString};

mod gauss_hermite;
pub use gauss_hermite::{hermite, GaussHermite, LegendreCoefficients};

#[derive(thiserror::Error, Debug)]
pub enum PsfError {
    #[error("failed to read the PSF file")]
    Fits(#[from] FitsError),
    #[error("camera arm must be b, r or z, and read {0:?} in psf header")]
    Arm(String),
    #[error("PSF type {0:?} is not supported")]
    UnsupportedType(String),
    #[error("x and y coefficients do not match: {0:?} vs {1:?}")]
    Coefficients((usize, usize), (usize, usize)),
    #[error("fiber #{fiber} is out of range (nspec={nspec})")]
    Fiber { fiber: usize, nspec: usize },
    #[error("wavelength range [{0},{1}] is empty")]
    WavelengthRange(f64, f64),
    #[error("PSF parameter {0:?} is missing")]
    MissingParameter(String),
    #[error("{repeat} coefficients per parameter is not a multiple of {ncoef}")]
    CoefficientSize { repeat: usize, ncoef: usize },
    #[error("PSF parameter {name:?} has {found} spectra, expected {expected}")]
    Spectra {
        name: String,
        found: usize,
        expected: usize,
    },
}
type Result<T> = std::result::Result<T, PsfError>;

/// Spectrograph arms
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum Arm {
    #[strum(serialize = "b")]
    Blue,
    #[strum(serialize = "r")]
    Red,
    #[strum(serialize = "z")]
    Nir,
}
impl Arm {
    /// The arm from a camera name like `b1` or `R3`
    pub fn from_camera(camera: &str) -> Result<Self> {
        let camera = camera.trim();
        camera
            .get(..1)
            .and_then(|arm| Arm::from_str(arm).ok())
            .ok_or_else(|| PsfError::Arm(camera.get(..1).unwrap_or_default().to_string()))
    }
}

/// Legendre series `Σ c_n P_n(u)`
pub fn legval(u: f64, coefficients: &[f64]) -> f64 {
    let (mut p0, mut p1) = (1f64, u);
    coefficients
        .iter()
        .enumerate()
        .map(|(n, c)| match n {
            0 => c * p0,
            1 => c * p1,
            n => {
                let p2 = ((2 * n - 1) as f64 * u * p1 - (n - 1) as f64 * p0) / n as f64;
                p0 = p1;
                p1 = p2;
                c * p2
            }
        })
        .sum()
}

/// PSF postage stamp
#[derive(Debug, Clone, PartialEq)]
pub struct Stamp {
    /// CCD row of the first stamp row
    pub row: i64,
    /// CCD column of the first stamp column
    pub column: i64,
    pub pixels: DMatrix<f64>,
}

/// PSF model interface
pub trait PsfModel {
    /// Number of spectra
    fn nspec(&self) -> usize;
    /// The PSF image of a fiber at a given wavelength
    fn xypix(&self, fiber: usize, wavelength: f64) -> Result<Stamp>;
}

/// Dispersion `dλ/dy` statistics of a fiber trace [Å/pixel]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dispersion {
    pub min: f64,
    pub mean: f64,
    pub max: f64,
}

/// PSF boot calibration
#[derive(Debug, Clone)]
pub struct PsfBoot {
    pub camera: String,
    pub arm: Arm,
    pub wavemin: f64,
    pub wavemax: f64,
    /// `x` trace Legendre coefficients (nspec x ncoef)
    pub xcoef: DMatrix<f64>,
    /// `y` trace Legendre coefficients (nspec x ncoef)
    pub ycoef: DMatrix<f64>,
    /// Gaussian PSF sigma per fiber [pixel]
    pub sigma: Vec<f64>,
}
impl PsfBoot {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut fits = Fits::open(path)?;
        let camera: String = fits.primary_key("CAMERA")?;
        let arm = Arm::from_camera(&camera)?;
        let wavemin: f64 = fits.primary_key("WAVEMIN")?;
        let wavemax: f64 = fits.primary_key("WAVEMAX")?;
        let xcoef = fits.read_matrix(0)?;
        let ycoef = fits.read_matrix(1)?;
        let sigma = fits.read_vector(2)?;
        Self::new(camera.trim().to_string(), arm, (wavemin, wavemax), xcoef, ycoef, sigma)
    }
    pub fn new(
        camera: String,
        arm: Arm,
        (wavemin, wavemax): (f64, f64),
        xcoef: DMatrix<f64>,
        ycoef: DMatrix<f64>,
        sigma: Vec<f64>,
    ) -> Result<Self> {
        if xcoef.shape() != ycoef.shape() {
            return Err(PsfError::Coefficients(xcoef.shape(), ycoef.shape()));
        }
        if wavemax <= wavemin {
            return Err(PsfError::WavelengthRange(wavemin, wavemax));
        }
        log::info!(
            "PSF boot: camera {}, {} spectra, {} coefficients, wavelength range [{},{}]",
            camera,
            xcoef.nrows(),
            xcoef.ncols(),
            wavemin,
            wavemax
        );
        Ok(Self {
            camera,
            arm,
            wavemin,
            wavemax,
            xcoef,
            ycoef,
            sigma,
        })
    }
    /// Maps `[wavemin,wavemax]` to `[-1,1]`
    pub fn reduced_wavelength(&self, wave: f64) -> f64 {
        2. * (wave - self.wavemin) / (self.wavemax - self.wavemin) - 1.
    }
    /// `n` wavelengths evenly spaced over the PSF wavelength range
    pub fn wavelengths(&self, n: usize) -> Vec<f64> {
        match n {
            0 => vec![],
            1 => vec![self.wavemin],
            n => {
                let step = (self.wavemax - self.wavemin) / (n - 1) as f64;
                (0..n).map(|i| self.wavemin + step * i as f64).collect()
            }
        }
    }
    fn check(&self, fiber: usize) -> Result<()> {
        if fiber < self.nspec() {
            Ok(())
        } else {
            Err(PsfError::Fiber {
                fiber,
                nspec: self.nspec(),
            })
        }
    }
    fn coefficients(matrix: &DMatrix<f64>, fiber: usize) -> Vec<f64> {
        matrix.row(fiber).iter().cloned().collect()
    }
    /// CCD `(x,y)` coordinates of a fiber trace at a wavelength
    pub fn xy(&self, fiber: usize, wave: f64) -> Result<(f64, f64)> {
        self.check(fiber)?;
        let u = self.reduced_wavelength(wave);
        Ok((
            legval(u, &Self::coefficients(&self.xcoef, fiber)),
            legval(u, &Self::coefficients(&self.ycoef, fiber)),
        ))
    }
    /// CCD coordinates of a fiber trace at the given wavelengths
    pub fn trace(&self, fiber: usize, waves: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
        let xy = waves
            .iter()
            .map(|&w| self.xy(fiber, w))
            .collect::<Result<Vec<_>>>()?;
        Ok(xy.into_iter().unzip())
    }
    /// Statistics of `dλ/dy` along a fiber trace sampled at `n` wavelengths
    pub fn dispersion(&self, fiber: usize, n: usize) -> Result<Dispersion> {
        let waves = self.wavelengths(n);
        let (_, y) = self.trace(fiber, &waves)?;
        let dwdy: Vec<f64> = gradient(&waves)
            .into_iter()
            .zip(gradient(&y))
            .map(|(dw, dy)| dw / dy)
            .collect();
        Ok(Dispersion {
            min: dwdy.iter().cloned().fold(f64::INFINITY, f64::min),
            mean: polyfit::mean(&dwdy),
            max: dwdy.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        })
    }
    /// Dispersion of all fibers and the overall minimum, mean of means and maximum
    pub fn dispersion_summary(&self, n: usize) -> Result<(Vec<Dispersion>, Dispersion)> {
        let fibers = (0..self.nspec())
            .map(|fiber| self.dispersion(fiber, n))
            .collect::<Result<Vec<_>>>()?;
        let total = Dispersion {
            min: fibers.iter().map(|d| d.min).fold(f64::INFINITY, f64::min),
            mean: fibers.iter().map(|d| d.mean).sum::<f64>() / fibers.len() as f64,
            max: fibers.iter().map(|d| d.max).fold(f64::NEG_INFINITY, f64::max),
        };
        Ok((fibers, total))
    }
    /// Gaussian sigma of a fiber, the last value is used if there are fewer sigmas than fibers
    pub fn sigma(&self, fiber: usize) -> f64 {
        self.sigma
            .get(fiber)
            .or_else(|| self.sigma.last())
            .copied()
            .unwrap_or(1f64)
    }
}
impl PsfModel for PsfBoot {
    fn nspec(&self) -> usize {
        self.xcoef.nrows()
    }
    /// Circular Gaussian sampled at the pixel centers within 4 sigma, normalized to 1
    fn xypix(&self, fiber: usize, wavelength: f64) -> Result<Stamp> {
        let (x, y) = self.xy(fiber, wavelength)?;
        let sigma = self.sigma(fiber);
        let half_width = (4. * sigma).ceil().max(3.) as i64;
        let (xc, yc) = (x.round() as i64, y.round() as i64);
        let (column, row) = (xc - half_width, yc - half_width);
        let size = (2 * half_width + 1) as usize;
        let mut pixels = DMatrix::from_fn(size, size, |i, j| {
            let dx = (column + j as i64) as f64 - x;
            let dy = (row + i as i64) as f64 - y;
            (-(dx * dx + dy * dy) / (2. * sigma * sigma)).exp()
        });
        let total = pixels.sum();
        if total > 0. {
            pixels /= total;
        }
        Ok(Stamp {
            row,
            column,
            pixels,
        })
    }
}

/// Loads a PSF model according to the `PSFTYPE` header keyword
pub fn read_psf<P: AsRef<Path>>(path: P) -> Result<Box<dyn PsfModel + Send + Sync>> {
    let path = path.as_ref();
    let psftype: Option<String> = Fits::open(path)?.primary_key("PSFTYPE").ok();
    match psftype.as_deref().map(str::trim) {
        None | Some("BOOTCALIB") => Ok(Box::new(PsfBoot::from_path(path)?)),
        Some("GAUSS-HERMITE") => Ok(Box::new(GaussHermite::from_path(path)?)),
        Some(other) => Err(PsfError::UnsupportedType(other.to_string())),
    }
}

#[cfg(feature = "plot")]
impl PsfBoot {
    /// Plots the fiber traces, the wavelength solutions and the PSF sigmas
    pub fn plot(&self, filename: &str) -> std::result::Result<(), Box<dyn std::error::Error>> {
        use crate::plot::{color, minmax, padded};
        use plotters::prelude::*;

        let waves = self.wavelengths(100);
        let traces = (0..self.nspec())
            .map(|fiber| self.trace(fiber, &waves))
            .collect::<Result<Vec<_>>>()?;

        let fig = BitMapBackend::new(filename, (1200, 800)).into_drawing_area();
        fig.fill(&WHITE)?;
        let (top, bottom) = fig.split_vertically(500);
        let panels = top.split_evenly((1, 2));

        let xrange = padded(minmax(traces.iter().flat_map(|(x, _)| x.iter().cloned())));
        let yrange = padded(minmax(traces.iter().flat_map(|(_, y)| y.iter().cloned())));
        let mut chart = ChartBuilder::on(&panels[0])
            .set_label_area_size(LabelAreaPosition::Left, 50)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .margin(10)
            .build_cartesian_2d(xrange, yrange.clone())?;
        chart.configure_mesh().x_desc("X CCD").y_desc("Y CCD").draw()?;
        for (k, (x, y)) in traces.iter().enumerate() {
            chart.draw_series(LineSeries::new(
                x.iter().cloned().zip(y.iter().cloned()),
                &color(k),
            ))?;
        }

        let mut chart = ChartBuilder::on(&panels[1])
            .set_label_area_size(LabelAreaPosition::Left, 60)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .margin(10)
            .build_cartesian_2d(yrange, self.wavemin..self.wavemax)?;
        chart
            .configure_mesh()
            .x_desc("Y CCD")
            .y_desc("Wavelength [A]")
            .draw()?;
        for (k, (_, y)) in traces.iter().enumerate() {
            chart.draw_series(LineSeries::new(
                y.iter().cloned().zip(waves.iter().cloned()),
                &color(k),
            ))?;
        }

        let mut chart = ChartBuilder::on(&bottom)
            .set_label_area_size(LabelAreaPosition::Left, 50)
            .set_label_area_size(LabelAreaPosition::Bottom, 40)
            .margin(10)
            .build_cartesian_2d(
                padded((0., self.sigma.len() as f64)),
                padded(minmax(self.sigma.iter().cloned())),
            )?;
        chart
            .configure_mesh()
            .x_desc("spec #")
            .y_desc("PSF sigma")
            .draw()?;
        chart.draw_series(LineSeries::new(
            self.sigma.iter().enumerate().map(|(i, s)| (i as f64, *s)),
            &color(0),
        ))?;
        fig.present()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot() -> PsfBoot {
        // x = 10 + 2 fiber + u, y = 2000 + 1000 u
        let xcoef = DMatrix::from_fn(3, 2, |i, j| if j == 0 { 10. + 2. * i as f64 } else { 1. });
        let ycoef = DMatrix::from_fn(3, 2, |_, j| if j == 0 { 2000. } else { 1000. });
        PsfBoot::new(
            "b1".to_string(),
            Arm::Blue,
            (3600., 5600.),
            xcoef,
            ycoef,
            vec![1., 1.2, 1.4],
        )
        .unwrap()
    }

    #[test]
    fn camera_arm() {
        assert_eq!(Arm::from_camera("b1").unwrap(), Arm::Blue);
        assert_eq!(Arm::from_camera(" R3").unwrap(), Arm::Red);
        assert_eq!(Arm::from_camera("z0").unwrap(), Arm::Nir);
        assert!(matches!(Arm::from_camera("x1"), Err(PsfError::Arm(_))));
        assert!(Arm::from_camera("").is_err());
    }

    #[test]
    fn legendre() {
        // P2(u) = (3u^2-1)/2, P3(u) = (5u^3-3u)/2
        let u = 0.3f64;
        let expected = 1. + 2. * u + 3. * (3. * u * u - 1.) / 2. + 4. * (5. * u.powi(3) - 3. * u) / 2.;
        assert!((legval(u, &[1., 2., 3., 4.]) - expected).abs() < 1e-12);
        assert_eq!(legval(u, &[]), 0.);
    }

    #[test]
    fn reduced_wavelength() {
        let psf = boot();
        assert_eq!(psf.reduced_wavelength(3600.), -1.);
        assert_eq!(psf.reduced_wavelength(5600.), 1.);
        assert_eq!(psf.reduced_wavelength(4600.), 0.);
    }

    #[test]
    fn trace_and_dispersion() {
        let psf = boot();
        let (x, y) = psf.xy(1, 4600.).unwrap();
        assert_eq!((x, y), (12., 2000.));
        // dλ/dy = 2000 Å / 2000 pixels
        let d = psf.dispersion(0, 100).unwrap();
        assert!((d.min - 1.).abs() < 1e-9);
        assert!((d.max - 1.).abs() < 1e-9);
        let (fibers, total) = psf.dispersion_summary(100).unwrap();
        assert_eq!(fibers.len(), 3);
        assert!((total.mean - 1.).abs() < 1e-9);
        assert!(psf.xy(3, 4600.).is_err());
    }

    #[test]
    fn gaussian_stamp() {
        let psf = boot();
        let stamp = psf.xypix(0, 4600.).unwrap();
        assert!((stamp.pixels.sum() - 1.).abs() < 1e-12);
        assert_eq!(stamp.pixels.nrows(), 9);
        assert_eq!((stamp.row, stamp.column), (1996, 6));
        // peak at the trace position
        let (imax, _) = stamp.pixels.iter().enumerate().fold((0, 0f64), |(k, m), (i, v)| {
            if *v > m {
                (i, *v)
            } else {
                (k, m)
            }
        });
        // column-major storage: center element of a 9x9 stamp
        assert_eq!(imax, 40);
    }

    #[test]
    fn coefficient_shapes() {
        assert!(matches!(
            PsfBoot::new(
                "b1".into(),
                Arm::Blue,
                (3600., 5600.),
                DMatrix::zeros(2, 3),
                DMatrix::zeros(3, 3),
                vec![]
            ),
            Err(PsfError::Coefficients(..))
        ));
    }
}
