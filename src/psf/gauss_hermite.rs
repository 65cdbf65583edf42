//! Gauss-Hermite PSF
//!
//! The PSF core is a sum of products of pixel integrated Gauss-Hermite functions
//! along the CCD columns and rows:
//! `psf(x,y) = sum_ij GH-i-j He_i(x/sx) He_j(y/sy) exp(-(x/sx)^2/2 - (y/sy)^2/2)`.
//! Each parameter (trace coordinates, Gaussian sigmas `GHSIGX` and `GHSIGY`,
//! Hermite coefficients `GH-i-j`) is a Legendre series of the wavelength per fiber.
//! Only the core is evaluated: the PSF tails and the second Gauss-Hermite core are ignored.

use super::{legval, PsfError, PsfModel, Result, Stamp};
use crate::fits::Fits;
use nalgebra::DMatrix;
use scilib::math::basic::erf;
use std::{
    collections::BTreeMap,
    f64::consts::{PI, SQRT_2},
    path::Path,
};

/// Legendre series coefficients of a PSF parameter, one row per fiber
#[derive(Debug, Clone)]
pub struct LegendreCoefficients {
    pub wavemin: f64,
    pub wavemax: f64,
    pub coefficients: DMatrix<f64>,
}
impl LegendreCoefficients {
    pub fn new(wavemin: f64, wavemax: f64, coefficients: DMatrix<f64>) -> Self {
        Self {
            wavemin,
            wavemax,
            coefficients,
        }
    }
    /// Constant parameter for `nspec` fibers
    pub fn constant(nspec: usize, value: f64) -> Self {
        Self::new(0., 1., DMatrix::from_element(nspec, 1, value))
    }
    pub fn nspec(&self) -> usize {
        self.coefficients.nrows()
    }
    pub fn eval(&self, fiber: usize, wavelength: f64) -> f64 {
        let u = 2. * (wavelength - self.wavemin) / (self.wavemax - self.wavemin) - 1.;
        let coefficients: Vec<f64> = self.coefficients.row(fiber).iter().cloned().collect();
        legval(u, &coefficients)
    }
}

/// Probabilists' Hermite polynomial `He_n(u)`
pub fn hermite(n: usize, u: f64) -> f64 {
    let (mut h0, mut h1) = (1f64, u);
    match n {
        0 => h0,
        _ => {
            for k in 1..n {
                let h2 = u * h1 - k as f64 * h0;
                h0 = h1;
                h1 = h2;
            }
            h1
        }
    }
}

/// Integrals of `He_m(u) exp(-u^2/2)/sqrt(2pi)` between consecutive edges
fn pixel_integrated(edges: &[f64], m: usize) -> Vec<f64> {
    let primitive = |u: f64| match m {
        0 => 0.5 * erf(u / SQRT_2),
        m => -hermite(m - 1, u) * (-0.5 * u * u).exp() / (2. * PI).sqrt(),
    };
    edges
        .windows(2)
        .map(|e| primitive(e[1]) - primitive(e[0]))
        .collect()
}

/// Gauss-Hermite PSF model
#[derive(Debug, Clone)]
pub struct GaussHermite {
    pub x: LegendreCoefficients,
    pub y: LegendreCoefficients,
    /// `GHSIGX`, `GHSIGY` and the `GH-i-j` coefficients
    pub params: BTreeMap<String, LegendreCoefficients>,
    /// Hermite degrees along x and y
    pub degree: (usize, usize),
    /// Stamp half size along x and y [pixel]
    pub half_size: (usize, usize),
}
impl GaussHermite {
    pub fn new(
        x: LegendreCoefficients,
        y: LegendreCoefficients,
        params: BTreeMap<String, LegendreCoefficients>,
        degree: (usize, usize),
        half_size: (usize, usize),
    ) -> Result<Self> {
        if x.coefficients.shape() != y.coefficients.shape() {
            return Err(PsfError::Coefficients(
                x.coefficients.shape(),
                y.coefficients.shape(),
            ));
        }
        for key in ["GHSIGX", "GHSIGY"] {
            if !params.contains_key(key) {
                return Err(PsfError::MissingParameter(key.to_string()));
            }
        }
        if let Some((name, p)) = params.iter().find(|(_, p)| p.nspec() != x.nspec()) {
            return Err(PsfError::Spectra {
                name: name.clone(),
                found: p.nspec(),
                expected: x.nspec(),
            });
        }
        Ok(Self {
            x,
            y,
            params,
            degree,
            half_size,
        })
    }
    /// Loads the PSF from the `PSF` table, with the traces either in the
    /// `XTRACE` and `YTRACE` images or in the `X` and `Y` table rows
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut fits = Fits::open(path)?;
        let key = |fits: &mut Fits, key: &str| -> Result<usize> {
            let value: i64 = fits.read_key("PSF", key)?;
            Ok(value.max(0) as usize)
        };
        let degree = (key(&mut fits, "GHDEGX")?, key(&mut fits, "GHDEGY")?);
        let half_size = (key(&mut fits, "HSIZEX")?, key(&mut fits, "HSIZEY")?);
        let ncoef = key(&mut fits, "LEGDEG")? + 1;

        let names: Vec<String> = fits.read_column("PSF", "PARAM")?;
        let wavemin: Vec<f64> = fits.read_column("PSF", "WAVEMIN")?;
        let wavemax: Vec<f64> = fits.read_column("PSF", "WAVEMAX")?;
        let (repeat, coefficients) = fits.read_array_column("PSF", "COEFF")?;
        if repeat == 0 || repeat % ncoef != 0 {
            return Err(PsfError::CoefficientSize { repeat, ncoef });
        }
        let nspec = repeat / ncoef;
        let mut params: BTreeMap<String, LegendreCoefficients> = names
            .iter()
            .zip(wavemin.iter().zip(&wavemax))
            .zip(coefficients.chunks(repeat))
            .map(|((name, (wmin, wmax)), c)| {
                (
                    name.trim().to_string(),
                    LegendreCoefficients::new(*wmin, *wmax, DMatrix::from_row_slice(nspec, ncoef, c)),
                )
            })
            .collect();
        log::info!(
            "Gauss-Hermite PSF: {} parameters, {} spectra, degree {:?}",
            params.len(),
            nspec,
            degree
        );

        let (x, y) = if fits.has_hdu("XTRACE") {
            (trace(&mut fits, "XTRACE")?, trace(&mut fits, "YTRACE")?)
        } else {
            let mut take = |name: &str| {
                params
                    .remove(name)
                    .ok_or_else(|| PsfError::MissingParameter(name.to_string()))
            };
            (take("X")?, take("Y")?)
        };
        Self::new(x, y, params, degree, half_size)
    }
    fn param(&self, name: &str, fiber: usize, wavelength: f64) -> Option<f64> {
        self.params.get(name).map(|p| p.eval(fiber, wavelength))
    }
}

fn trace(fits: &mut Fits, extname: &str) -> Result<LegendreCoefficients> {
    Ok(LegendreCoefficients::new(
        fits.read_key(extname, "WAVEMIN")?,
        fits.read_key(extname, "WAVEMAX")?,
        fits.read_matrix(extname)?,
    ))
}

impl PsfModel for GaussHermite {
    fn nspec(&self) -> usize {
        self.x.nspec()
    }
    /// Stamp of `2 HSIZEY + 1` rows and `2 HSIZEX + 1` columns centered on the trace pixel
    fn xypix(&self, fiber: usize, wavelength: f64) -> Result<Stamp> {
        if fiber >= self.nspec() {
            return Err(PsfError::Fiber {
                fiber,
                nspec: self.nspec(),
            });
        }
        let sigma = |name: &str| {
            self.param(name, fiber, wavelength)
                .ok_or_else(|| PsfError::MissingParameter(name.to_string()))
        };
        let (sigx, sigy) = (sigma("GHSIGX")?, sigma("GHSIGY")?);
        let (xc, yc) = (
            self.x.eval(fiber, wavelength),
            self.y.eval(fiber, wavelength),
        );
        let (hx, hy) = self.half_size;
        let column = xc.round() as i64 - hx as i64;
        let row = yc.round() as i64 - hy as i64;
        let (nx, ny) = (2 * hx + 1, 2 * hy + 1);

        // pixel edges in units of sigma
        let edges = |first: i64, n: usize, center: f64, sigma: f64| -> Vec<f64> {
            (0..=n)
                .map(|k| ((first + k as i64) as f64 - 0.5 - center) / sigma)
                .collect::<Vec<f64>>()
        };
        let (xedges, yedges) = (edges(column, nx, xc, sigx), edges(row, ny, yc, sigy));
        let (degx, degy) = self.degree;
        let xfunc: Vec<Vec<f64>> = (0..=degx).map(|i| pixel_integrated(&xedges, i)).collect();
        let yfunc: Vec<Vec<f64>> = (0..=degy).map(|j| pixel_integrated(&yedges, j)).collect();

        let mut pixels = DMatrix::<f64>::zeros(ny, nx);
        for (i, xf) in xfunc.iter().enumerate() {
            for (j, yf) in yfunc.iter().enumerate() {
                let c = match self.param(&format!("GH-{}-{}", i, j), fiber, wavelength) {
                    Some(c) => c,
                    None if i == 0 && j == 0 => 1.,
                    None => continue,
                };
                for (r, y) in yf.iter().enumerate() {
                    for (k, x) in xf.iter().enumerate() {
                        pixels[(r, k)] += c * y * x;
                    }
                }
            }
        }
        Ok(Stamp {
            row,
            column,
            pixels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn psf(params: &[(&str, f64)], degree: (usize, usize)) -> GaussHermite {
        // x = 20 + 10 fiber + 0.5 u, y = 2000 + 1000 u over [5000,6000]
        let x = LegendreCoefficients::new(
            5000.,
            6000.,
            DMatrix::from_fn(2, 2, |i, j| if j == 0 { 20. + 10. * i as f64 } else { 0.5 }),
        );
        let y = LegendreCoefficients::new(
            5000.,
            6000.,
            DMatrix::from_fn(2, 2, |_, j| if j == 0 { 2000. } else { 1000. }),
        );
        let params = params
            .iter()
            .map(|(name, value)| (name.to_string(), LegendreCoefficients::constant(2, *value)))
            .collect();
        GaussHermite::new(x, y, params, degree, (6, 6)).unwrap()
    }

    fn moments(stamp: &Stamp) -> (f64, f64, f64, f64, f64) {
        let (mut sum, mut sx, mut sy, mut sxx, mut syy) = (0., 0., 0., 0., 0.);
        for r in 0..stamp.pixels.nrows() {
            for c in 0..stamp.pixels.ncols() {
                let v = stamp.pixels[(r, c)];
                let (x, y) = ((stamp.column + c as i64) as f64, (stamp.row + r as i64) as f64);
                sum += v;
                sx += v * x;
                sy += v * y;
                sxx += v * x * x;
                syy += v * y * y;
            }
        }
        let (x, y) = (sx / sum, sy / sum);
        (sum, x, y, sxx / sum - x * x, syy / sum - y * y)
    }

    #[test]
    fn hermite_polynomials() {
        let u = 0.7f64;
        assert_eq!(hermite(0, u), 1.);
        assert_eq!(hermite(1, u), u);
        assert!((hermite(2, u) - (u * u - 1.)).abs() < 1e-12);
        assert!((hermite(3, u) - (u.powi(3) - 3. * u)).abs() < 1e-12);
        assert!((hermite(4, u) - (u.powi(4) - 6. * u * u + 3.)).abs() < 1e-12);
    }

    #[test]
    fn pixel_integrals() {
        let edges: Vec<f64> = (0..=20).map(|k| k as f64 - 10.).collect();
        let gaussian: f64 = pixel_integrated(&edges, 0).iter().sum();
        assert!((gaussian - 1.).abs() < 1e-12);
        // higher orders integrate to 0
        let first: f64 = pixel_integrated(&edges, 1).iter().sum();
        assert!(first.abs() < 1e-12);
    }

    #[test]
    fn gaussian_core() {
        let psf = psf(&[("GHSIGX", 1.2), ("GHSIGY", 1.)], (0, 0));
        assert_eq!(psf.nspec(), 2);
        let stamp = psf.xypix(1, 5500.).unwrap();
        assert_eq!(stamp.pixels.shape(), (13, 13));
        assert_eq!((stamp.row, stamp.column), (1994, 24));
        let (sum, x, y, vx, vy) = moments(&stamp);
        assert!((sum - 1.).abs() < 1e-6);
        assert!((x - 30.).abs() < 1e-6);
        assert!((y - 2000.).abs() < 1e-6);
        // pixel integration adds 1/12 to the variance
        assert!((vx - (1.44 + 1. / 12.)).abs() < 1e-3);
        assert!((vy - (1. + 1. / 12.)).abs() < 1e-3);
    }

    #[test]
    fn off_pixel_trace() {
        let psf = psf(&[("GHSIGX", 1.), ("GHSIGY", 1.)], (0, 0));
        // x = 20 + 0.5 at the red end
        let stamp = psf.xypix(0, 6000.).unwrap();
        let (_, x, y, _, _) = moments(&stamp);
        assert!((x - 20.5).abs() < 1e-6);
        assert!((y - 3000.).abs() < 1e-6);
    }

    #[test]
    fn hermite_asymmetry() {
        let psf = psf(
            &[("GHSIGX", 1.), ("GHSIGY", 1.), ("GH-0-0", 1.), ("GH-1-0", 0.2)],
            (1, 1),
        );
        let (sum, x, y, _, _) = moments(&psf.xypix(0, 5500.).unwrap());
        // odd terms do not change the flux
        assert!((sum - 1.).abs() < 1e-6);
        assert!((x - 20.2).abs() < 1e-6);
        assert!((y - 2000.).abs() < 1e-6);
    }

    #[test]
    fn invalid_model() {
        let psf = psf(&[("GHSIGX", 1.), ("GHSIGY", 1.)], (0, 0));
        assert!(matches!(
            psf.xypix(2, 5500.),
            Err(PsfError::Fiber { fiber: 2, nspec: 2 })
        ));
        let missing = GaussHermite::new(
            psf.x.clone(),
            psf.y.clone(),
            BTreeMap::new(),
            (0, 0),
            (3, 3),
        );
        assert!(matches!(missing, Err(PsfError::MissingParameter(_))));
    }
}
