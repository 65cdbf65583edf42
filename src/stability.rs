/*!
# PSF stability vs temperature

The PSF of a fiber at a given wavelength is compared across PSF models fitted
on exposures taken at different temperatures.
The postage stamps are aligned on a common grid and each of them is compared
to the mean stamp through:
 - the flux ratio of an emission line `Σ(I M)/Σ(I²) - 1`,
 - the flux ratio of a continuum, using the cross-dispersion profiles,
 - the centroid offsets,
 - the Gaussian-weighted widths.

The `x` axis is the CCD column (cross-dispersion) and the `y` axis the CCD row
(wavelength).
*/

use crate::{
    fibers::Fibers,
    polyfit,
    psf::{PsfError, PsfModel, Stamp},
    table::{AsciiTable, TableError},
};
use nalgebra::DMatrix;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use std::{fs::File, io::Write, path::Path};

#[derive(thiserror::Error, Debug)]
pub enum StabilityError {
    #[error("PSF error")]
    Psf(#[from] PsfError),
    #[error("failed to read the temperature file")]
    Table(#[from] TableError),
    #[error("no PSF to compare")]
    Empty,
    #[error("cannot find the exposure range in {0:?}, expected `...-<first>-<last>.fits`")]
    FileName(String),
    #[error("didn't find info in temperature file for {0}-{1}")]
    NoTemperature(u64, u64),
    #[error("failed to write the output file")]
    Io(#[from] std::io::Error),
    #[error("failed to write the output table")]
    Csv(#[from] csv::Error),
}
type Result<T> = std::result::Result<T, StabilityError>;

/// Temperature sensors recorded in the temperature log
pub const TEMPERATURE_KEYS: [&str; 5] = ["BLUTEMP", "REDTEMP", "NIRTEMP", "PLCTEMP1", "PLCTEMP2"];
/// Extra margin in pixels around the aligned stamps
pub const MARGIN: usize = 3;

/// Comparison of one stamp with the mean stamp
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StampMoments {
    pub delta_ratio_emission_line: f64,
    pub delta_ratio_continuum: f64,
    pub delta_x: f64,
    pub delta_y: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
}
impl StampMoments {
    fn as_array(&self) -> [f64; 6] {
        [
            self.delta_ratio_emission_line,
            self.delta_ratio_continuum,
            self.delta_x,
            self.delta_y,
            self.sigma_x,
            self.sigma_y,
        ]
    }
    fn from_array(a: [f64; 6]) -> Self {
        Self {
            delta_ratio_emission_line: a[0],
            delta_ratio_continuum: a[1],
            delta_x: a[2],
            delta_y: a[3],
            sigma_x: a[4],
            sigma_y: a[5],
        }
    }
    /// Element-wise mean of the moments of several fibers
    pub fn mean(moments: &[Self]) -> Self {
        let n = moments.len() as f64;
        let sum = moments.iter().fold([0f64; 6], |mut s, m| {
            s.iter_mut().zip(m.as_array()).for_each(|(s, v)| *s += v);
            s
        });
        Self::from_array(sum.map(|s| s / n))
    }
}

/// Places the stamps on a common grid according to their CCD origin
pub fn align(stamps: &[Stamp]) -> Result<Vec<DMatrix<f64>>> {
    let first = stamps.first().ok_or(StabilityError::Empty)?;
    let row0 = stamps.iter().map(|s| s.row).min().unwrap_or(first.row);
    let column0 = stamps.iter().map(|s| s.column).min().unwrap_or(first.column);
    let offset = |s: &Stamp| ((s.row - row0) as usize, (s.column - column0) as usize);
    let nrows = stamps
        .iter()
        .map(|s| offset(s).0 + s.pixels.nrows())
        .max()
        .unwrap_or(0)
        .max(first.pixels.nrows() + MARGIN);
    let ncols = stamps
        .iter()
        .map(|s| offset(s).1 + s.pixels.ncols())
        .max()
        .unwrap_or(0)
        .max(first.pixels.ncols() + MARGIN);
    Ok(stamps
        .iter()
        .map(|s| {
            let (i0, j0) = offset(s);
            let mut image = DMatrix::<f64>::zeros(nrows, ncols);
            image
                .view_mut((i0, j0), s.pixels.shape())
                .copy_from(&s.pixels);
            image
        })
        .collect())
}

/// Flux weighted centroid `(x,y)`
fn centroid(image: &DMatrix<f64>) -> (f64, f64) {
    let (mut sx, mut sy, mut s) = (0f64, 0f64, 0f64);
    for j in 0..image.ncols() {
        for i in 0..image.nrows() {
            let v = image[(i, j)];
            sx += j as f64 * v;
            sy += i as f64 * v;
            s += v;
        }
    }
    (sx / s, sy / s)
}

/// Gaussian weighted widths `(σx,σy)` about `(xc,yc)`
fn weighted_sigma(image: &DMatrix<f64>, (xc, yc): (f64, f64)) -> (f64, f64) {
    let (mut sxx, mut syy, mut s) = (0f64, 0f64, 0f64);
    for j in 0..image.ncols() {
        for i in 0..image.nrows() {
            let dx = j as f64 - xc;
            let dy = i as f64 - yc;
            let w = image[(i, j)] * (-(dx * dx + dy * dy) / 2.).exp();
            sxx += dx * dx * w;
            syy += dy * dy * w;
            s += w;
        }
    }
    (
        2f64.sqrt() * (sxx / s).sqrt(),
        2f64.sqrt() * (syy / s).sqrt(),
    )
}

/// Compares each aligned image to the mean image
pub fn moments(images: &[DMatrix<f64>]) -> Result<Vec<StampMoments>> {
    let first = images.first().ok_or(StabilityError::Empty)?;
    let mean_image = images
        .iter()
        .skip(1)
        .fold(first.clone(), |m, i| m + i)
        / images.len() as f64;
    let (mx, my) = centroid(&mean_image);
    // cross-dispersion profile
    let mean_profile = mean_image.row_sum();

    Ok(images
        .iter()
        .map(|image| {
            let profile = image.row_sum();
            let (xj, yj) = centroid(image);
            let (sigma_x, sigma_y) = weighted_sigma(image, (xj, yj));
            StampMoments {
                delta_ratio_emission_line: image.dot(&mean_image) / image.norm_squared() - 1.,
                delta_ratio_continuum: profile.dot(&mean_profile) / profile.norm_squared() - 1.,
                delta_x: xj - mx,
                delta_y: yj - my,
                sigma_x,
                sigma_y,
            }
        })
        .collect())
}

/// Stamp moments of one fiber at one wavelength for each PSF
pub fn fiber_moments<M: PsfModel + ?Sized>(
    psfs: &[&M],
    fiber: usize,
    wavelength: f64,
) -> Result<Vec<StampMoments>> {
    let stamps = psfs
        .iter()
        .map(|psf| psf.xypix(fiber, wavelength))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    moments(&align(&stamps)?)
}

/// Stamp moments averaged over several fibers
pub fn mean_moments<M: PsfModel + Sync + ?Sized>(
    psfs: &[&M],
    fibers: &Fibers,
    wavelength: f64,
) -> Result<Vec<StampMoments>> {
    let per_fiber = fibers
        .as_slice()
        .par_iter()
        .map(|&fiber| fiber_moments(psfs, fiber, wavelength))
        .collect::<Result<Vec<_>>>()?;
    let n = psfs.len();
    Ok((0..n)
        .map(|j| {
            let moments: Vec<StampMoments> = per_fiber.iter().map(|m| m[j]).collect();
            StampMoments::mean(&moments)
        })
        .collect())
}

static EXPOSURE_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"-(\d+)-(\d+)(?:\.fits)?(?:\.gz)?$").expect("valid exposure range pattern")
});

/// First and last exposure numbers from a file name like `psf-b1-xxx-00001234-00001240.fits`
pub fn exposure_range<P: AsRef<Path>>(path: P) -> Result<(u64, u64)> {
    let name = path
        .as_ref()
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let capts = EXPOSURE_RANGE
        .captures(name)
        .ok_or_else(|| StabilityError::FileName(name.to_string()))?;
    let parse = |k: usize| {
        capts
            .get(k)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .ok_or_else(|| StabilityError::FileName(name.to_string()))
    };
    Ok((parse(1)?, parse(2)?))
}

/// Conditions of a PSF exposure sequence
#[derive(Debug, Clone, PartialEq)]
pub struct Conditions {
    pub day: f64,
    pub first_expnum: u64,
    pub last_expnum: u64,
    /// Mean temperatures in the order of [TEMPERATURE_KEYS]
    pub temperatures: Vec<f64>,
}

/// Temperature log with the DAY, EXPNUM, EXPREQ and [TEMPERATURE_KEYS] columns
pub struct TemperatureLog {
    table: AsciiTable,
    exptime: f64,
}
impl TemperatureLog {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(AsciiTable::from_path(path)?)
    }
    pub fn new(table: AsciiTable) -> Result<Self> {
        for key in ["DAY", "EXPNUM", "EXPREQ"].into_iter().chain(TEMPERATURE_KEYS) {
            table.column(key)?;
        }
        Ok(Self { table, exptime: 6. })
    }
    /// Sets the expected exposure time
    pub fn exptime(self, exptime: f64) -> Self {
        Self { exptime, ..self }
    }
    /// Mean conditions of the exposures with the expected exposure time in `[first,last]`
    pub fn conditions(&self, first: u64, last: u64) -> Result<Conditions> {
        let expnum = self.table.column("EXPNUM")?;
        let expreq = self.table.column("EXPREQ")?;
        let rows: Vec<usize> = (0..expnum.len())
            .filter(|&i| {
                expnum[i] >= first as f64 && expnum[i] <= last as f64 && expreq[i] == self.exptime
            })
            .collect();
        if rows.is_empty() {
            return Err(StabilityError::NoTemperature(first, last));
        }
        let mean = |key: &str| -> Result<f64> {
            let column = self.table.column(key)?;
            Ok(polyfit::mean(
                &rows.iter().map(|&i| column[i]).collect::<Vec<f64>>(),
            ))
        };
        Ok(Conditions {
            day: mean("DAY")?,
            first_expnum: first,
            last_expnum: last,
            temperatures: TEMPERATURE_KEYS
                .iter()
                .map(|key| mean(key))
                .collect::<Result<Vec<f64>>>()?,
        })
    }
}

/// PSF stability analysis results, one entry per PSF
#[derive(Debug, Clone)]
pub struct Stability {
    pub wavelength: f64,
    pub fibers: String,
    pub conditions: Vec<Conditions>,
    pub moments: Vec<StampMoments>,
}
impl Stability {
    /// Writes the results to a space separated ASCII file
    pub fn to_ascii<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path.as_ref())?;
        writeln!(
            file,
            "# wave={} fibers={}",
            self.wavelength as i64, self.fibers
        )?;
        writeln!(
            file,
            "# day first_expnum last_expnum {} delta_ratio_emission_line delta_ratio_continuum delta_x delta_y sigma_x sigma_y",
            TEMPERATURE_KEYS.join(" ")
        )?;
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .from_writer(file);
        for (c, m) in self.conditions.iter().zip(&self.moments) {
            let record: Vec<String> = [
                (c.day as i64).to_string(),
                c.first_expnum.to_string(),
                c.last_expnum.to_string(),
            ]
            .into_iter()
            .chain(c.temperatures.iter().map(|t| t.to_string()))
            .chain(m.as_array().iter().map(|v| format!("{:.6}", v)))
            .collect();
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
    /// Temperature of a given sensor for each PSF
    pub fn temperature(&self, key: &str) -> Option<Vec<f64>> {
        let k = TEMPERATURE_KEYS.iter().position(|t| *t == key)?;
        self.conditions
            .iter()
            .map(|c| c.temperatures.get(k).copied())
            .collect()
    }
}

#[cfg(feature = "plot")]
impl Stability {
    /// Plots the stamp moments vs the PLCTEMP1 temperature
    pub fn plot(&self, filename: &str) -> std::result::Result<(), Box<dyn std::error::Error>> {
        use crate::plot::{color, minmax, padded};
        use plotters::prelude::*;

        let temperature = self.temperature("PLCTEMP1").unwrap_or_default();
        let xrange = padded(minmax(temperature.iter().cloned()));
        let labels = [
            "emission line flux ratio",
            "continuum flux ratio",
            "delta x (pixels)",
            "delta y (pixels)",
            "sigma x (pixels)",
            "sigma y (pixels)",
        ];
        let fig = BitMapBackend::new(filename, (1000, 1000)).into_drawing_area();
        fig.fill(&WHITE)?;
        for (k, (panel, label)) in fig.split_evenly((3, 2)).iter().zip(labels).enumerate() {
            let values: Vec<f64> = self.moments.iter().map(|m| m.as_array()[k]).collect();
            let mut chart = ChartBuilder::on(panel)
                .set_label_area_size(LabelAreaPosition::Left, 60)
                .set_label_area_size(LabelAreaPosition::Bottom, 40)
                .margin(10)
                .build_cartesian_2d(xrange.clone(), padded(minmax(values.iter().cloned())))?;
            chart
                .configure_mesh()
                .x_desc("PLCTEMP1")
                .y_desc(label)
                .draw()?;
            chart.draw_series(
                temperature
                    .iter()
                    .zip(&values)
                    .map(|(t, v)| Circle::new((*t, *v), 4, color(0).filled())),
            )?;
        }
        fig.present()?;
        Ok(())
    }
}
