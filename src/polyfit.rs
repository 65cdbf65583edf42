//! Polynomial least squares fitting
//!
//! Two solvers are provided:
//!  - [polyfit]: SVD solution of the weighted Vandermonde system, the weights
//!    multiply the residuals,
//!  - [weighted_polyfit]: normal equations with weights applied to the squared
//!    residuals, optionally pinning the constant term to zero, returning the
//!    coefficient uncertainties from the inverse of the normal matrix.
//!
//! Polynomial coefficients are always ordered from the highest degree to the
//! constant term.

use nalgebra::{DMatrix, DVector};
use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum PolyfitError {
    #[error("not enough data to fit a polynomial of degree {degree}: {points} points, {weights} positive weights")]
    NotEnoughData {
        degree: usize,
        points: usize,
        weights: usize,
    },
    #[error("sample size mismatch: {0} vs {1}")]
    SizeMismatch(usize, usize),
    #[error("cannot fit the polynomial, the normal matrix is singular")]
    Singular,
    #[error("least squares solver failed: {0}")]
    Solver(&'static str),
}
type Result<T> = std::result::Result<T, PolyfitError>;

/// Offset added to the constant term diagonal element to force a null intercept
pub const ZERO_OFFSET_PENALTY: f64 = 1e8;

/// Polynomial with coefficients ordered from the highest degree down to the constant
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial(Vec<f64>);
impl Polynomial {
    pub fn new(coefficients: Vec<f64>) -> Self {
        Self(coefficients)
    }
    /// Polynomial degree
    pub fn degree(&self) -> usize {
        self.0.len().saturating_sub(1)
    }
    /// Coefficients, highest degree first
    pub fn coefficients(&self) -> &[f64] {
        &self.0
    }
    /// Coefficient of `x^power`
    pub fn coefficient(&self, power: usize) -> Option<f64> {
        self.0.iter().rev().nth(power).copied()
    }
    /// Mutable reference to the constant term
    pub fn constant_mut(&mut self) -> Option<&mut f64> {
        self.0.last_mut()
    }
    /// Evaluates the polynomial at `x`
    pub fn eval(&self, x: f64) -> f64 {
        self.0.iter().fold(0f64, |a, &c| a * x + c)
    }
    /// Root of a degree 1 polynomial
    pub fn linear_root(&self) -> Option<f64> {
        match self.0.as_slice() {
            [a, b] if *a != 0f64 => Some(-b / a),
            _ => None,
        }
    }
}
impl fmt::Display for Polynomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.degree();
        let terms: Vec<String> = self
            .0
            .iter()
            .enumerate()
            .map(|(i, c)| match n - i {
                0 => format!("{:e}", c),
                1 => format!("{:e}x", c),
                p => format!("{:e}x^{}", c, p),
            })
            .collect();
        write!(f, "{}", terms.join(" + "))
    }
}

/// Least squares polynomial fit of degree `deg`
///
/// If given, the weights multiply the residuals `y - p(x)` so they should be
/// the inverse of the measurement uncertainties.
pub fn polyfit(x: &[f64], y: &[f64], w: Option<&[f64]>, deg: usize) -> Result<Polynomial> {
    if x.len() != y.len() {
        return Err(PolyfitError::SizeMismatch(x.len(), y.len()));
    }
    if let Some(w) = w {
        if w.len() != x.len() {
            return Err(PolyfitError::SizeMismatch(x.len(), w.len()));
        }
    }
    let n = deg + 1;
    if x.len() < n {
        return Err(PolyfitError::NotEnoughData {
            degree: deg,
            points: x.len(),
            weights: w.map_or(x.len(), |w| w.iter().filter(|&&w| w > 0f64).count()),
        });
    }
    let weight = |i: usize| w.map_or(1f64, |w| w[i]);
    // columns in decreasing powers so the solution is already in poly1d order
    let lhs = DMatrix::from_fn(x.len(), n, |i, j| weight(i) * x[i].powi((deg - j) as i32));
    let rhs = DVector::from_iterator(y.len(), y.iter().enumerate().map(|(i, y)| weight(i) * y));
    let svd = lhs.svd(true, true);
    let p = svd
        .solve(&rhs, f64::EPSILON * x.len() as f64)
        .map_err(PolyfitError::Solver)?;
    Ok(Polynomial::new(p.iter().cloned().collect()))
}

/// Weighted polynomial fit from the normal equations
#[derive(Debug, Clone)]
pub struct WeightedFit {
    pub polynomial: Polynomial,
    /// Coefficient uncertainties, highest degree first
    pub errors: Vec<f64>,
}

/// Solves the normal equations `A p = B` with `A[i][j] = Σ w x^(i+j)` and `B[i] = Σ w x^i y`
///
/// When `force_zero_offset` is set, [ZERO_OFFSET_PENALTY] is added to `A[0][0]`
/// driving the constant term towards 0.
pub fn weighted_polyfit(
    x: &[f64],
    y: &[f64],
    w: &[f64],
    deg: usize,
    force_zero_offset: bool,
) -> Result<WeightedFit> {
    if x.len() != y.len() {
        return Err(PolyfitError::SizeMismatch(x.len(), y.len()));
    }
    if x.len() != w.len() {
        return Err(PolyfitError::SizeMismatch(x.len(), w.len()));
    }
    let n = deg + 1;
    let n_positive = w.iter().filter(|&&w| w > 0f64).count();
    if x.len() < n || n_positive < n {
        log::error!("not enough data to fit a polynomial of degree {}", deg);
        return Err(PolyfitError::NotEnoughData {
            degree: deg,
            points: x.len(),
            weights: n_positive,
        });
    }

    let swxn: Vec<f64> = (0..2 * n)
        .map(|i| {
            x.iter()
                .zip(w)
                .map(|(x, w)| w * x.powi(i as i32))
                .sum()
        })
        .collect();
    let mut a = DMatrix::from_fn(n, n, |i, j| swxn[i + j]);
    let b = DVector::from_fn(n, |i, _| {
        x.iter()
            .zip(y)
            .zip(w)
            .map(|((x, y), w)| w * x.powi(i as i32) * y)
            .sum()
    });
    if force_zero_offset {
        a[(0, 0)] += ZERO_OFFSET_PENALTY;
    }

    let ai = a.try_inverse().ok_or(PolyfitError::Singular)?;
    let p = &ai * b;
    let errors: Vec<f64> = ai.diagonal().iter().rev().map(|v| v.sqrt()).collect();
    Ok(WeightedFit {
        polynomial: Polynomial::new(p.iter().rev().cloned().collect()),
        errors,
    })
}

/// Unit spacing numerical gradient
///
/// Central differences for interior samples, first differences at both ends.
pub fn gradient(f: &[f64]) -> Vec<f64> {
    let n = f.len();
    match n {
        0 => vec![],
        1 => vec![0f64],
        _ => (0..n)
            .map(|i| match i {
                0 => f[1] - f[0],
                i if i == n - 1 => f[n - 1] - f[n - 2],
                i => 0.5 * (f[i + 1] - f[i - 1]),
            })
            .collect(),
    }
}

/// Piecewise linear interpolation of `(xp,fp)` at `x`, `xp` must be increasing
///
/// Returns `left` below the first sample and `right` beyond the last one.
pub fn interp(x: f64, xp: &[f64], fp: &[f64], left: f64, right: f64) -> f64 {
    match (xp.first(), xp.last()) {
        (Some(&first), Some(&last)) => {
            if x < first {
                left
            } else if x > last {
                right
            } else {
                let k = xp.partition_point(|&v| v <= x);
                if k == 0 {
                    fp[0]
                } else if k >= xp.len() {
                    fp[xp.len() - 1]
                } else {
                    let (x0, x1) = (xp[k - 1], xp[k]);
                    let (f0, f1) = (fp[k - 1], fp[k]);
                    f0 + (f1 - f0) * (x - x0) / (x1 - x0)
                }
            }
        }
        _ => left,
    }
}

/// Arithmetic mean, NaN for an empty sample
pub fn mean(x: &[f64]) -> f64 {
    x.iter().sum::<f64>() / x.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horner() {
        let p = Polynomial::new(vec![2., -3., 1.]);
        assert_eq!(p.eval(0.), 1.);
        assert_eq!(p.eval(2.), 3.);
        assert_eq!(p.degree(), 2);
        assert_eq!(p.coefficient(2), Some(2.));
        assert_eq!(p.coefficient(0), Some(1.));
        assert_eq!(Polynomial::new(vec![2., -4.]).linear_root(), Some(2.));
    }

    #[test]
    fn polyfit_line() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|x| 3. * x - 2.).collect();
        let p = polyfit(&x, &y, None, 1).unwrap();
        assert!((p.coefficients()[0] - 3.).abs() < 1e-10);
        assert!((p.coefficients()[1] + 2.).abs() < 1e-10);
    }

    #[test]
    fn polyfit_weights_ignore_outlier() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let mut y: Vec<f64> = x.iter().map(|x| 0.5 * x + 1.).collect();
        y[5] += 100.;
        let mut w = vec![1f64; 10];
        w[5] = 0.;
        let p = polyfit(&x, &y, Some(&w), 1).unwrap();
        assert!((p.eval(5.) - 3.5).abs() < 1e-9);
    }

    #[test]
    fn polyfit_not_enough_data() {
        assert!(matches!(
            polyfit(&[1., 2.], &[1., 2.], None, 2),
            Err(PolyfitError::NotEnoughData { .. })
        ));
    }

    #[test]
    fn normal_equations_quadratic() {
        let x: Vec<f64> = (1..20).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|x| 0.1 * x * x + 2. * x + 3.).collect();
        let w = vec![1f64; x.len()];
        let fit = weighted_polyfit(&x, &y, &w, 2, false).unwrap();
        let c = fit.polynomial.coefficients();
        assert!((c[0] - 0.1).abs() < 1e-8);
        assert!((c[1] - 2.).abs() < 1e-8);
        assert!((c[2] - 3.).abs() < 1e-8);
        assert_eq!(fit.errors.len(), 3);
    }

    #[test]
    fn normal_equations_zero_offset() {
        let x: Vec<f64> = (1..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|x| 2. * x + 5.).collect();
        let w = vec![1f64; x.len()];
        let fit = weighted_polyfit(&x, &y, &w, 1, true).unwrap();
        assert!(fit.polynomial.eval(0.).abs() < 1e-3);
    }

    #[test]
    fn normal_equations_needs_positive_weights() {
        let x = [1., 2., 3.];
        let w = [1., 0., 0.];
        assert!(weighted_polyfit(&x, &x, &w, 1, false).is_err());
    }

    #[test]
    fn numerical_gradient() {
        let f = [0., 1., 4., 9.];
        assert_eq!(gradient(&f), vec![1., 2., 4., 5.]);
    }

    #[test]
    fn linear_interpolation() {
        let xp = [1., 2., 4.];
        let fp = [10., 20., 40.];
        assert_eq!(interp(0.5, &xp, &fp, 0., 0.), 0.);
        assert_eq!(interp(5., &xp, &fp, 0., -1.), -1.);
        assert_eq!(interp(3., &xp, &fp, 0., 0.), 30.);
        assert_eq!(interp(4., &xp, &fp, 0., 0.), 40.);
        assert_eq!(interp(1., &xp, &fp, 0., 0.), 10.);
    }
}
