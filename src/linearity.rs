/*!
# Shutter timing and CCD linearity

Flux measurements of an LED seen through several fibers and neutral density (ND)
filters at different requested exposure times (EXPREQ) are used to solve for:
 - the shutter timing offset `Δt`: the true open time is `EXPREQ - Δt`,
 - the relative fiber transmissions (mean of 1),
 - the ND filter transmissions (relative to the reference ND).

The three are degenerate with each other, so they are solved for iteratively
([ShutterTiming::solve]) using only the faint measurements below the
non-linearity threshold.
The solution is then used to build a linear flux model for the whole data set
and to fit the CCD non-linearity as 2 quadratic segments joined at the
threshold ([Linearity::solve]).
*/

use crate::{
    polyfit::{self, weighted_polyfit, PolyfitError, Polynomial, WeightedFit},
    table::{AsciiTable, TableError},
};
use itertools::{izip, Itertools};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};

#[derive(thiserror::Error, Debug)]
pub enum LinearityError {
    #[error("failed to read the measurements table")]
    Table(#[from] TableError),
    #[error("polynomial fit failed")]
    Polyfit(#[from] PolyfitError),
    #[error("invalid {column} value {value} (expected a non-negative integer)")]
    NotAnInteger { column: &'static str, value: f64 },
    #[error("no measurement below the flux threshold {0}")]
    NoData(f64),
    #[error("no nominal transmission for ND #{0}")]
    UnknownNd(u32),
    #[error("reference ND #{0} is missing from the data")]
    MissingReferenceNd(u32),
    #[error("the flux vs exposure time fit has a null slope")]
    NullSlope,
    #[error("failed to write CSV file")]
    Csv(#[from] csv::Error),
}
type Result<T> = std::result::Result<T, LinearityError>;

/// A single flux measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    /// Requested exposure time [s]
    pub expreq: f64,
    pub flux: f64,
    /// Neutral density filter number
    pub nd: u32,
    pub fiber: u32,
}

fn as_index(column: &'static str, value: f64) -> Result<u32> {
    if value >= 0f64 && value.fract() == 0f64 && value <= u32::MAX as f64 {
        Ok(value as u32)
    } else {
        Err(LinearityError::NotAnInteger { column, value })
    }
}

/// Loads the measurements from a table with the `expreq`, `flux`, `nd` and `fiber` columns
pub fn measurements(table: &AsciiTable) -> Result<Vec<Measurement>> {
    izip!(
        table.column("expreq")?,
        table.column("flux")?,
        table.column("nd")?,
        table.column("fiber")?
    )
    .map(|(&expreq, &flux, &nd, &fiber)| {
        Ok(Measurement {
            expreq,
            flux,
            nd: as_index("nd", nd)?,
            fiber: as_index("fiber", fiber)?,
        })
    })
    .collect()
}

/// CCD amplifier non-linearity
///
/// The measured flux is multiplied by
///  - `1 + nl1 f` below the threshold,
///  - `1 + nl2 (f - threshold) + nl1 threshold` at and above.
///
/// A flux exactly at the threshold takes the upper branch so the correction is
/// continuous, where strict comparisons on both sides would leave it at 1.
#[derive(Debug, Clone, Copy)]
pub struct NonLinearity {
    pub threshold: f64,
    pub nl1: f64,
    pub nl2: f64,
}
impl Default for NonLinearity {
    fn default() -> Self {
        Self {
            threshold: 1e4,
            nl1: -3.9e-6,
            nl2: 1.8e-6,
        }
    }
}
impl NonLinearity {
    pub fn correction(&self, flux: f64) -> f64 {
        if flux < self.threshold {
            1f64 + self.nl1 * flux
        } else {
            1f64 + self.nl2 * (flux - self.threshold) + self.nl1 * self.threshold
        }
    }
}

/// Shutter timing and linearity analysis parameters
#[derive(Debug, Clone)]
pub struct LinearityConfig {
    /// Flux above which measurements are excluded from the timing fit
    pub threshold: f64,
    pub non_linearity: NonLinearity,
    /// Fibers at or above this number are read by the amplifier affected by [NonLinearity]
    pub corrected_fibers_from: Option<u32>,
    /// Nominal ND filter transmissions
    pub nd_transmission: BTreeMap<u32, f64>,
    pub reference_nd: u32,
    /// Relative flux uncertainty
    pub flux_error: f64,
    pub max_iterations: usize,
    /// Convergence criteria on `Δt` [s]
    pub tolerance: f64,
    /// Use the common `Δt` for the transmission estimates after the first iteration
    pub force_same_time: bool,
}
impl Default for LinearityConfig {
    fn default() -> Self {
        Self {
            threshold: 1e4,
            non_linearity: NonLinearity::default(),
            corrected_fibers_from: Some(10),
            nd_transmission: [(1, 1.), (2, 10f64.powf(-0.5)), (3, 0.1), (4, 0.01)]
                .into_iter()
                .collect(),
            reference_nd: 1,
            flux_error: 0.01,
            max_iterations: 50,
            tolerance: 1e-6,
            force_same_time: true,
        }
    }
}
impl LinearityConfig {
    pub fn threshold(self, threshold: f64) -> Self {
        Self { threshold, ..self }
    }
    pub fn non_linearity(self, non_linearity: NonLinearity) -> Self {
        Self {
            non_linearity,
            ..self
        }
    }
    pub fn corrected_fibers_from(self, fiber: Option<u32>) -> Self {
        Self {
            corrected_fibers_from: fiber,
            ..self
        }
    }
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }
    pub fn force_same_time(self, force_same_time: bool) -> Self {
        Self {
            force_same_time,
            ..self
        }
    }
    fn is_corrected(&self, fiber: u32) -> bool {
        self.corrected_fibers_from.map_or(false, |f| fiber >= f)
    }
}

/// Shutter timing offset, fiber and ND transmissions
#[derive(Debug, Clone)]
pub struct ShutterTiming {
    /// Timing offset [s]
    pub delta_t: f64,
    /// `Δt` at each iteration
    pub history: Vec<f64>,
    pub converged: bool,
    pub nd_transmission: BTreeMap<u32, f64>,
    pub fiber_transmission: BTreeMap<u32, f64>,
    /// Flux vs EXPREQ fit of the corrected measurements
    pub exposure_fit: Polynomial,
    /// Measurements used in the fit, corrected from the transmissions
    pub points: Vec<Measurement>,
}

enum Group {
    Fiber,
    Nd,
}
impl Group {
    fn key(&self, m: &Measurement) -> u32 {
        match self {
            Group::Fiber => m.fiber,
            Group::Nd => m.nd,
        }
    }
}

/// Transmission of each group, either from a linear fit evaluated at the
/// group mean exposure time or from the best scaling of `EXPREQ - Δt`
fn group_transmission(
    points: &[Measurement],
    weights: &[f64],
    group: &Group,
    keys: &[u32],
    delta_t: Option<f64>,
) -> Result<BTreeMap<u32, f64>> {
    let mut transmission = BTreeMap::new();
    for &key in keys {
        let (x, y, w): (Vec<f64>, Vec<f64>, Vec<f64>) = points
            .iter()
            .zip(weights)
            .filter(|(m, _)| group.key(m) == key)
            .map(|(m, w)| (m.expreq, m.flux, *w))
            .multiunzip();
        if x.is_empty() {
            continue;
        }
        let value = match delta_t {
            None => polyfit::polyfit(&x, &y, Some(w.as_slice()), 1)?.eval(polyfit::mean(&x)),
            Some(delta_t) => {
                let (num, den) = izip!(&x, &y, &w).fold((0f64, 0f64), |(n, d), (x, y, w)| {
                    let t = x - delta_t;
                    (n + w * y * t, d + w * t * t)
                });
                num / den
            }
        };
        transmission.insert(key, value);
    }
    Ok(transmission)
}

/// Divides the fluxes by the group transmission correction and scales the weights accordingly
fn apply_correction(
    points: &mut [Measurement],
    weights: &mut [f64],
    group: &Group,
    correction: &BTreeMap<u32, f64>,
) {
    for (m, w) in points.iter_mut().zip(weights.iter_mut()) {
        if let Some(c) = correction.get(&group.key(m)) {
            m.flux /= c;
            *w *= c * c;
        }
    }
}

impl ShutterTiming {
    /// Iterative solution for the timing offset and the fiber and ND transmissions
    pub fn solve(data: &[Measurement], config: &LinearityConfig) -> Result<Self> {
        let mut points: Vec<Measurement> = data
            .iter()
            .cloned()
            .map(|mut m| {
                if config.is_corrected(m.fiber) {
                    m.flux *= config.non_linearity.correction(m.flux);
                }
                m
            })
            .filter(|m| m.flux < config.threshold)
            .collect();
        if points.is_empty() {
            return Err(LinearityError::NoData(config.threshold));
        }
        log::info!(
            "{} measurements out of {} below the flux threshold {}",
            points.len(),
            data.len(),
            config.threshold
        );

        let nds: Vec<u32> = points.iter().map(|m| m.nd).unique().sorted().collect();
        let fibers: Vec<u32> = points.iter().map(|m| m.fiber).unique().sorted().collect();
        log::info!("NDs={:?}", nds);
        log::info!("fibers={:?}", fibers);

        let mut nd_transmission = BTreeMap::new();
        for &nd in &nds {
            let trans = *config
                .nd_transmission
                .get(&nd)
                .ok_or(LinearityError::UnknownNd(nd))?;
            nd_transmission.insert(nd, trans);
        }
        let mut unit_weights = vec![1f64; points.len()];
        apply_correction(&mut points, &mut unit_weights, &Group::Nd, &nd_transmission);
        let mut weights: Vec<f64> = points
            .iter()
            .map(|m| (config.flux_error * m.flux).powi(-2))
            .collect();

        let mut fiber_transmission: BTreeMap<u32, f64> =
            fibers.iter().map(|&fiber| (fiber, 1f64)).collect();
        let mut delta_t = 0f64;
        let mut history = vec![];
        let mut converged = false;
        let mut exposure_fit = Polynomial::new(vec![1., 0.]);

        for iteration in 0..config.max_iterations {
            let common_delta_t = if iteration > 0 && config.force_same_time {
                Some(delta_t)
            } else {
                None
            };

            if fibers.len() > 1 {
                let mut correction =
                    group_transmission(&points, &weights, &Group::Fiber, &fibers, common_delta_t)?;
                let mean_transmission =
                    correction.values().sum::<f64>() / correction.len() as f64;
                correction.values_mut().for_each(|c| *c /= mean_transmission);
                apply_correction(&mut points, &mut weights, &Group::Fiber, &correction);
                for (fiber, c) in &correction {
                    fiber_transmission.entry(*fiber).and_modify(|t| *t *= c);
                }
            }

            if nds.len() > 1 {
                let mut correction =
                    group_transmission(&points, &weights, &Group::Nd, &nds, common_delta_t)?;
                let reference = *correction
                    .get(&config.reference_nd)
                    .ok_or(LinearityError::MissingReferenceNd(config.reference_nd))?;
                correction.values_mut().for_each(|c| *c /= reference);
                for (nd, c) in &correction {
                    nd_transmission.entry(*nd).and_modify(|t| *t *= c);
                }
                apply_correction(&mut points, &mut weights, &Group::Nd, &correction);
            }

            let (expreq, flux): (Vec<f64>, Vec<f64>) =
                points.iter().map(|m| (m.expreq, m.flux)).unzip();
            exposure_fit = polyfit::polyfit(&expreq, &flux, None, 1)?;
            let new_delta_t = exposure_fit.linear_root().ok_or(LinearityError::NullSlope)?;
            log::info!("iter #{} delta exptime = {:.6}", iteration, new_delta_t);
            history.push(new_delta_t);
            let step = (new_delta_t - delta_t).abs();
            delta_t = new_delta_t;
            if step < config.tolerance {
                converged = true;
                break;
            }
        }
        if !converged {
            log::warn!(
                "delta exptime did not converge after {} iterations",
                config.max_iterations
            );
        }

        Ok(Self {
            delta_t,
            history,
            converged,
            nd_transmission,
            fiber_transmission,
            exposure_fit,
            points,
        })
    }
    /// Transmission product of a measurement fiber and ND filter
    pub fn transmission(&self, m: &Measurement) -> f64 {
        self.fiber_transmission.get(&m.fiber).copied().unwrap_or(1f64)
            * self.nd_transmission.get(&m.nd).copied().unwrap_or(1f64)
    }
    pub fn summary(&self) {
        for (nd, trans) in &self.nd_transmission {
            println!("ND#{} trans= {:5.4}", nd, trans);
        }
        for (fiber, trans) in &self.fiber_transmission {
            println!("Fiber #{} trans= {:5.4}", fiber, trans);
        }
    }
}

/// Non-linear flux response made of 2 quadratics joined at the threshold
#[derive(Debug, Clone)]
pub struct SegmentedQuadratic {
    pub threshold: f64,
    /// Below the threshold, with a null constant term
    pub low: WeightedFit,
    /// Above the threshold, `None` if there is not enough bright data
    pub high: Option<WeightedFit>,
}
impl SegmentedQuadratic {
    /// Fits `y(x)`, the segments are selected with `is_low`
    fn fit(x: &[f64], y: &[f64], is_low: &[bool], threshold: f64) -> Result<Self> {
        let select = |low: bool| -> (Vec<f64>, Vec<f64>) {
            izip!(x, y, is_low)
                .filter(|(_, _, l)| **l == low)
                .map(|(x, y, _)| (*x, *y))
                .unzip()
        };
        let (x_low, y_low) = select(true);
        let low = weighted_polyfit(&x_low, &y_low, &vec![1f64; x_low.len()], 2, true)?;
        let (x_high, y_high) = select(false);
        let high = match weighted_polyfit(&x_high, &y_high, &vec![1f64; x_high.len()], 2, false) {
            Ok(mut high) => {
                let offset = low.polynomial.eval(threshold) - high.polynomial.eval(threshold);
                if let Some(c) = high.polynomial.constant_mut() {
                    *c += offset;
                }
                Some(high)
            }
            Err(PolyfitError::NotEnoughData { points, .. }) => {
                log::warn!(
                    "only {} measurements above the threshold, skipping the upper segment",
                    points
                );
                None
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            threshold,
            low,
            high,
        })
    }
    /// Evaluates the segment on the side of the threshold where `x` lies
    ///
    /// The fit splits the data on the measured flux, so for the model to flux
    /// curve the switch at `x == threshold` only approximates that split.
    pub fn eval(&self, x: f64) -> f64 {
        match &self.high {
            Some(high) if x >= self.threshold => high.polynomial.eval(x),
            _ => self.low.polynomial.eval(x),
        }
    }
    /// Quadratic coefficients of the lower and upper segments
    pub fn non_linear_coefficients(&self) -> (f64, Option<f64>) {
        (
            self.low.polynomial.coefficients()[0],
            self.high
                .as_ref()
                .map(|high| high.polynomial.coefficients()[0]),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LinearityPoint {
    pub expreq: f64,
    pub nd: u32,
    pub fiber: u32,
    /// Measured flux
    pub flux: f64,
    /// Linear flux model
    pub model: f64,
}

/// CCD linearity
#[derive(Debug, Clone)]
pub struct Linearity {
    /// LED illumination scaling of `EXPREQ - Δt`
    pub led_slope: f64,
    /// All measurements sorted by model flux
    pub points: Vec<LinearityPoint>,
    /// Measured flux vs model flux
    pub model_to_flux: SegmentedQuadratic,
    /// Model flux vs measured flux
    pub flux_to_model: SegmentedQuadratic,
}
impl Linearity {
    /// Fits the non-linear response of the whole data set with the linear model of [ShutterTiming]
    pub fn solve(
        data: &[Measurement],
        timing: &ShutterTiming,
        config: &LinearityConfig,
    ) -> Result<Self> {
        let threshold = config.threshold;
        let mut points: Vec<LinearityPoint> = data
            .iter()
            .map(|m| LinearityPoint {
                expreq: m.expreq,
                nd: m.nd,
                fiber: m.fiber,
                flux: m.flux,
                model: (m.expreq - timing.delta_t) * timing.transmission(m),
            })
            .collect();

        let (model, corrected_flux): (Vec<f64>, Vec<f64>) = points
            .iter()
            .filter(|p| p.flux < threshold)
            .map(|p| {
                (
                    p.model,
                    p.flux * config.non_linearity.correction(p.flux),
                )
            })
            .unzip();
        let led = weighted_polyfit(
            &model,
            &corrected_flux,
            &vec![1f64; model.len()],
            1,
            true,
        )?;
        let led_slope = led.polynomial.coefficients()[0];
        log::info!("LED illumination slope: {:e}", led_slope);
        points.iter_mut().for_each(|p| p.model *= led_slope);
        points.sort_by(|a, b| a.model.total_cmp(&b.model));

        let (model, flux): (Vec<f64>, Vec<f64>) = points.iter().map(|p| (p.model, p.flux)).unzip();
        let is_low: Vec<bool> = flux.iter().map(|f| *f < threshold).collect();
        let model_to_flux = SegmentedQuadratic::fit(&model, &flux, &is_low, threshold)?;
        let flux_to_model = SegmentedQuadratic::fit(&flux, &model, &is_low, threshold)?;

        Ok(Self {
            led_slope,
            points,
            model_to_flux,
            flux_to_model,
        })
    }
    pub fn summary(&self) {
        let print = |label: &str, fit: &SegmentedQuadratic| {
            let (low, high) = fit.non_linear_coefficients();
            println!("non_linear_coef1{}= {:e}", label, low);
            match high {
                Some(high) => println!("non_linear_coef2{}= {:e}", label, high),
                None => println!("non_linear_coef2{}= n/a", label),
            }
        };
        print("", &self.model_to_flux);
        print(" (flux->model)", &self.flux_to_model);
    }
    /// Writes the measured and model fluxes to a CSV file
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;
        for point in &self.points {
            wtr.serialize(point)?;
        }
        wtr.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

#[cfg(feature = "plot")]
mod plot {
    use super::{Linearity, ShutterTiming};
    use crate::plot::{color, minmax, padded};
    use itertools::Itertools;
    use plotters::prelude::*;
    use std::error::Error;

    impl ShutterTiming {
        /// Plots the flux vs EXPREQ fit and the relative residuals per ND filter
        pub fn plot(&self, filename: &str) -> Result<(), Box<dyn Error>> {
            let fig = BitMapBackend::new(filename, (768, 768)).into_drawing_area();
            fig.fill(&WHITE)?;
            let (upper, lower) = fig.split_vertically(384);

            let (_, tmax) = minmax(self.points.iter().map(|m| m.expreq));
            let xrange = self.delta_t - 0.5..tmax + 0.5;
            let (_, fmax) = minmax(self.points.iter().map(|m| m.flux));
            let mut chart = ChartBuilder::on(&upper)
                .set_label_area_size(LabelAreaPosition::Left, 60)
                .set_label_area_size(LabelAreaPosition::Bottom, 40)
                .margin(10)
                .build_cartesian_2d(xrange.clone(), 0f64..fmax * 1.05)?;
            chart.configure_mesh().y_desc("FLUX").draw()?;
            chart.draw_series(
                self.points
                    .iter()
                    .map(|m| Circle::new((m.expreq, m.flux), 3, color(0).filled())),
            )?;
            chart.draw_series(LineSeries::new(
                [self.delta_t, tmax]
                    .into_iter()
                    .map(|t| (t, self.exposure_fit.eval(t))),
                &BLACK,
            ))?;

            let residuals: Vec<(u32, f64, f64)> = self
                .points
                .iter()
                .map(|m| {
                    let offset = 0.05 * (m.nd as f64 - 3.);
                    (m.nd, m.expreq + offset, m.flux / self.exposure_fit.eval(m.expreq) - 1.)
                })
                .collect();
            let mut chart = ChartBuilder::on(&lower)
                .set_label_area_size(LabelAreaPosition::Left, 60)
                .set_label_area_size(LabelAreaPosition::Bottom, 40)
                .margin(10)
                .build_cartesian_2d(
                    xrange,
                    padded(minmax(residuals.iter().map(|(_, _, r)| *r))),
                )?;
            chart
                .configure_mesh()
                .x_desc("EXPREQ (sec)")
                .y_desc("FLUX/FIT-1")
                .draw()?;
            for (k, nd) in residuals.iter().map(|(nd, _, _)| *nd).unique().sorted().enumerate() {
                let rgb = color(k);
                chart
                    .draw_series(
                        residuals
                            .iter()
                            .filter(|(n, _, _)| *n == nd)
                            .map(|(_, t, r)| Circle::new((*t, *r), 3, rgb.filled())),
                    )?
                    .label(format!("ND #{}", nd))
                    .legend(move |(x, y)| Circle::new((x, y), 3, rgb.filled()));
            }
            chart
                .configure_series_labels()
                .border_style(&BLACK)
                .background_style(&WHITE.mix(0.8))
                .position(SeriesLabelPosition::UpperRight)
                .draw()?;
            fig.present()?;
            Ok(())
        }
    }

    impl Linearity {
        /// Plots `FLUX/MODEL-1` vs the model flux per ND filter with the non-linear fit
        pub fn plot(&self, filename: &str) -> Result<(), Box<dyn Error>> {
            let fig = BitMapBackend::new(filename, (768, 512)).into_drawing_area();
            fig.fill(&WHITE)?;
            let scale = 1e-3;
            let ratio = |p: &super::LinearityPoint| p.flux / p.model - 1.;
            let xrange = padded(minmax(self.points.iter().map(|p| p.model * scale)));
            let yrange = padded(minmax(self.points.iter().map(ratio)));
            let mut chart = ChartBuilder::on(&fig)
                .set_label_area_size(LabelAreaPosition::Left, 60)
                .set_label_area_size(LabelAreaPosition::Bottom, 40)
                .margin(10)
                .build_cartesian_2d(xrange, yrange)?;
            chart
                .configure_mesh()
                .x_desc("LINEAR FLUX MODEL x 10^-3")
                .y_desc("FLUX/MODEL -1")
                .draw()?;
            for (k, nd) in self.points.iter().map(|p| p.nd).unique().sorted().enumerate() {
                let rgb = color(k);
                chart
                    .draw_series(
                        self.points
                            .iter()
                            .filter(|p| p.nd == nd)
                            .map(|p| Circle::new((p.model * scale, ratio(p)), 3, rgb.filled())),
                    )?
                    .label(format!("ND #{}", nd))
                    .legend(move |(x, y)| Circle::new((x, y), 3, rgb.filled()));
            }
            chart.draw_series(LineSeries::new(
                self.points
                    .iter()
                    .filter(|p| p.model > 0.)
                    .map(|p| (p.model * scale, self.model_to_flux.eval(p.model) / p.model - 1.)),
                &RED,
            ))?;
            chart
                .configure_series_labels()
                .border_style(&BLACK)
                .background_style(&WHITE.mix(0.8))
                .position(SeriesLabelPosition::UpperRight)
                .draw()?;
            fig.present()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::io::BufReader;

    const DELTA_T: f64 = 0.12;

    /// Synthetic data set: 2 fibers, 3 NDs, perfectly linear CCD
    fn synthetic(noise: f64) -> Vec<Measurement> {
        let mut rng = StdRng::seed_from_u64(7);
        let fiber_trans = [(3u32, 1.1), (4, 0.9)];
        let nd_trans = [(1u32, 1.0), (2, 0.3), (3, 0.11)];
        let mut data = vec![];
        for &(fiber, ft) in &fiber_trans {
            for &(nd, nt) in &nd_trans {
                for expreq in [1., 2., 4., 6., 8., 10.] {
                    let flux = 800. * (expreq - DELTA_T) * ft * nt;
                    let flux = flux * (1. + noise * rng.gen_range(-1f64..1f64));
                    data.push(Measurement {
                        expreq,
                        flux,
                        nd,
                        fiber,
                    });
                }
            }
        }
        data
    }

    fn config() -> LinearityConfig {
        LinearityConfig::default().corrected_fibers_from(None)
    }

    #[test]
    fn correction_is_continuous() {
        let nl = NonLinearity::default();
        let below = nl.correction(nl.threshold - 1e-6);
        let above = nl.correction(nl.threshold);
        assert!((below - above).abs() < 1e-9);
        assert_eq!(nl.correction(0.), 1.);
    }

    #[test]
    fn timing_offset() {
        let data = synthetic(0.);
        let timing = ShutterTiming::solve(&data, &config()).unwrap();
        assert!(timing.converged);
        assert!((timing.delta_t - DELTA_T).abs() < 1e-6, "{}", timing.delta_t);
        let f3 = timing.fiber_transmission[&3];
        let f4 = timing.fiber_transmission[&4];
        assert!((f3 / f4 - 1.1 / 0.9).abs() < 1e-6);
        assert!(((f3 + f4) / 2. - 1.).abs() < 1e-6);
        assert!((timing.nd_transmission[&1] - 1.).abs() < 1e-9);
        assert!((timing.nd_transmission[&2] - 0.3).abs() < 1e-6);
        assert!((timing.nd_transmission[&3] - 0.11).abs() < 1e-6);
    }

    #[test]
    fn timing_offset_with_noise() {
        let data = synthetic(1e-3);
        let timing = ShutterTiming::solve(&data, &config()).unwrap();
        assert!((timing.delta_t - DELTA_T).abs() < 1e-2, "{}", timing.delta_t);
    }

    #[test]
    fn bright_data_excluded() {
        let mut data = synthetic(0.);
        data.push(Measurement {
            expreq: 1.,
            flux: 5e4,
            nd: 1,
            fiber: 3,
        });
        let timing = ShutterTiming::solve(&data, &config()).unwrap();
        assert_eq!(timing.points.len(), data.len() - 1);
        assert!((timing.delta_t - DELTA_T).abs() < 1e-6);
    }

    #[test]
    fn amplifier_correction() {
        let nl = NonLinearity::default();
        // flux read through the amplifier non-linearity
        let distort = |flux: f64| (-1. + (1. + 4. * nl.nl1 * flux).sqrt()) / (2. * nl.nl1);
        let mut data: Vec<Measurement> = synthetic(0.)
            .into_iter()
            .map(|m| Measurement {
                fiber: m.fiber + 10,
                flux: distort(m.flux),
                ..m
            })
            .collect();
        // above the threshold as read, below once corrected
        let raw = nl.threshold + 50.;
        let flux = raw * nl.correction(raw);
        assert!(flux < nl.threshold);
        data.push(Measurement {
            expreq: flux / 880. + DELTA_T,
            flux: raw,
            nd: 1,
            fiber: 13,
        });

        let timing = ShutterTiming::solve(&data, &LinearityConfig::default()).unwrap();
        assert_eq!(timing.points.len(), data.len());
        assert!((timing.delta_t - DELTA_T).abs() < 1e-6, "{}", timing.delta_t);

        let uncorrected = ShutterTiming::solve(&data, &config()).unwrap();
        assert_eq!(uncorrected.points.len(), data.len() - 1);
        assert!((uncorrected.delta_t - DELTA_T).abs() > 1e-3);
    }

    #[test]
    fn upper_segment() {
        let mut data = synthetic(0.);
        for &(fiber, ft) in &[(3u32, 1.1), (4, 0.9)] {
            for expreq in [15., 20., 25., 30.] {
                let flux = 800. * (expreq - DELTA_T) * ft;
                data.push(Measurement {
                    expreq,
                    flux: flux * (1. - 1e-6 * (flux - 1e4)),
                    nd: 1,
                    fiber,
                });
            }
        }
        let config = config();
        let timing = ShutterTiming::solve(&data, &config).unwrap();
        assert_eq!(timing.points.len(), data.len() - 8);
        let linearity = Linearity::solve(&data, &timing, &config).unwrap();
        for fit in [&linearity.model_to_flux, &linearity.flux_to_model] {
            let high = fit.high.as_ref().unwrap();
            let th = fit.threshold;
            let (low, high) = (fit.low.polynomial.eval(th), high.polynomial.eval(th));
            assert!((low - high).abs() < 1e-6 * th, "{} vs {}", low, high);
            assert!((fit.eval(th) - fit.eval(th - 1e-9)).abs() < 1e-3);
            assert!(fit.non_linear_coefficients().1.unwrap().is_finite());
        }
    }

    #[test]
    fn write_csv() {
        let data = synthetic(0.);
        let config = config();
        let timing = ShutterTiming::solve(&data, &config).unwrap();
        let linearity = Linearity::solve(&data, &timing, &config).unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("linearity.csv");
        linearity.to_csv(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("expreq,nd,fiber,flux,model"));
        assert_eq!(lines.count(), data.len());
    }

    #[test]
    fn unknown_nd() {
        let mut data = synthetic(0.);
        data[0].nd = 7;
        assert!(matches!(
            ShutterTiming::solve(&data, &config()),
            Err(LinearityError::UnknownNd(7))
        ));
    }

    #[test]
    fn no_data() {
        let data = vec![Measurement {
            expreq: 1.,
            flux: 2e4,
            nd: 1,
            fiber: 0,
        }];
        assert!(matches!(
            ShutterTiming::solve(&data, &config()),
            Err(LinearityError::NoData(_))
        ));
    }

    #[test]
    fn linear_ccd() {
        let data = synthetic(0.);
        let config = config();
        let timing = ShutterTiming::solve(&data, &config).unwrap();
        let linearity = Linearity::solve(&data, &timing, &config).unwrap();
        // no measurement above threshold
        assert!(linearity.model_to_flux.high.is_none());
        // points sorted by model flux
        assert!(linearity
            .points
            .windows(2)
            .all(|w| w[0].model <= w[1].model));
        // the measured flux is recovered by the model up to the applied non-linearity correction
        let (low, _) = linearity.model_to_flux.non_linear_coefficients();
        assert!(low.abs() < 1e-5, "{}", low);
    }

    #[test]
    fn from_table() {
        let contents = "# expreq exptime flux nd fiber\n1 1.1 100 1 3\n2 2.1 200 2 4\n";
        let table = AsciiTable::from_reader(BufReader::new(contents.as_bytes())).unwrap();
        let data = measurements(&table).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[1].nd, 2);
        assert_eq!(data[1].fiber, 4);
        let contents = "# expreq flux nd fiber\n1 100 1.5 3\n";
        let table = AsciiTable::from_reader(BufReader::new(contents.as_bytes())).unwrap();
        assert!(matches!(
            measurements(&table),
            Err(LinearityError::NotAnInteger { column: "nd", .. })
        ));
    }
}
