//! Arc lamp spectrum
//!
//! Converts a list of arc lamp emission lines into the electron counts
//! expected on the detector, accounting for the spectrograph throughput,
//! and writes them to a FITS binary table.

use crate::{
    fits::{Fits, FitsError},
    polyfit::interp,
};
use fitsio::{
    tables::{ColumnDataType, ColumnDescription},
    FitsFile,
};
use std::{
    fs::File,
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum ArcError {
    #[error("failed to read the line list")]
    Io(#[from] std::io::Error),
    #[error("failed to read the throughput file")]
    Fits(#[from] FitsError),
    #[error("failed to write {0:?}")]
    Write(PathBuf, #[source] fitsio::errors::Error),
    #[error("no line with a positive throughput")]
    NoLine,
}
type Result<T> = std::result::Result<T, ArcError>;

/// Peak intensity of the brightest line [electron]
pub const PEAK_ELECTRONS: f64 = 100000.;
/// Spectrograph channels
pub const CHANNELS: [&str; 3] = ["b", "r", "z"];

/// Arc lamp emission line
#[derive(Debug, Clone, PartialEq)]
pub struct ArcLine {
    /// Vacuum wavelength [Å]
    pub wave: f64,
    pub ion: String,
    pub intensity: f64,
}

/// Parses lines of `wavelength ion intensity`
///
/// Comments (`#`) and blank lines are skipped, malformed lines are ignored with a warning.
pub fn read_line_list<R: Read>(reader: BufReader<R>) -> Result<Vec<ArcLine>> {
    let mut lines = vec![];
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            [wave, ion, intensity] => match (wave.parse::<f64>(), intensity.parse::<f64>()) {
                (Ok(wave), Ok(intensity)) => lines.push(ArcLine {
                    wave,
                    ion: ion.to_string(),
                    intensity,
                }),
                _ => log::warn!("IGNORE LINE {:?}", line),
            },
            _ => log::warn!("IGNORE LINE {:?}", line),
        }
    }
    Ok(lines)
}
pub fn line_list_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<ArcLine>> {
    log::info!("reading {:?}", path.as_ref());
    read_line_list(BufReader::new(File::open(path)?))
}

/// Spectrograph channel throughput curve
#[derive(Debug, Clone)]
pub struct Throughput {
    /// Increasing wavelengths [Å]
    pub wavelength: Vec<f64>,
    pub throughput: Vec<f64>,
}
impl Throughput {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut fits = Fits::open(path)?;
        Ok(Self {
            wavelength: fits.read_column("THROUGHPUT", "wavelength")?,
            throughput: fits.read_column("THROUGHPUT", "throughput")?,
        })
    }
    /// Loads the `thru-{b,r,z}.fits` files of a DESIMODEL installation
    pub fn channels<P: AsRef<Path>>(desimodel: P) -> Result<Vec<Self>> {
        let path = desimodel.as_ref().join("data").join("throughput");
        CHANNELS
            .iter()
            .map(|channel| Self::from_path(path.join(format!("thru-{}.fits", channel))))
            .collect()
    }
    /// Throughput at a given wavelength, 0 outside of the curve
    pub fn at(&self, wave: f64) -> f64 {
        interp(wave, &self.wavelength, &self.throughput, 0., 0.)
    }
}

/// Mean throughput of the channels covering each line
fn mean_throughput(wave: f64, channels: &[Throughput]) -> f64 {
    let covered: Vec<f64> = channels
        .iter()
        .map(|c| c.at(wave))
        .filter(|t| *t > 0.)
        .collect();
    if covered.is_empty() {
        0.
    } else {
        covered.iter().sum::<f64>() / covered.len() as f64
    }
}

/// Scales the line intensities by the throughput, drops invisible lines and
/// normalizes the brightest line to [PEAK_ELECTRONS]
pub fn electrons(lines: Vec<ArcLine>, channels: &[Throughput]) -> Result<Vec<ArcLine>> {
    let lines: Vec<ArcLine> = lines
        .into_iter()
        .map(|line| ArcLine {
            intensity: line.intensity * mean_throughput(line.wave, channels),
            ..line
        })
        .filter(|line| line.intensity > 0.)
        .collect();
    let peak = lines
        .iter()
        .map(|line| line.intensity)
        .fold(f64::NEG_INFINITY, f64::max);
    if lines.is_empty() {
        return Err(ArcError::NoLine);
    }
    Ok(lines
        .into_iter()
        .map(|line| ArcLine {
            intensity: line.intensity * PEAK_ELECTRONS / peak,
            ..line
        })
        .collect())
}

/// Writes the lines to a WAVE, ELECTRONS, ION binary table, overwriting any existing file
/// Width of the ION column, longer names are truncated
pub const ION_WIDTH: usize = 8;

pub fn write_fits<P: AsRef<Path>>(path: P, lines: &[ArcLine]) -> Result<()> {
    let path = path.as_ref();
    let write = || -> std::result::Result<(), fitsio::errors::Error> {
        let mut fits = FitsFile::create(path).overwrite().open()?;
        let columns = [
            ColumnDescription::new("WAVE")
                .with_type(ColumnDataType::Double)
                .create()?,
            ColumnDescription::new("ELECTRONS")
                .with_type(ColumnDataType::Double)
                .create()?,
            ColumnDescription::new("ION")
                .with_type(ColumnDataType::String)
                .that_repeats(ION_WIDTH)
                .create()?,
        ];
        let hdu = fits.create_table("ARCLINES", &columns)?;
        let wave: Vec<f64> = lines.iter().map(|l| l.wave).collect();
        let electrons: Vec<f64> = lines.iter().map(|l| l.intensity).collect();
        let ion: Vec<String> = lines
            .iter()
            .map(|l| l.ion.chars().take(ION_WIDTH).collect())
            .collect();
        hdu.write_col(&mut fits, "WAVE", &wave)?;
        hdu.write_col(&mut fits, "ELECTRONS", &electrons)?;
        hdu.write_col(&mut fits, "ION", &ion)?;
        Ok(())
    };
    write().map_err(|e| ArcError::Write(path.to_path_buf(), e))?;
    log::info!("wrote {} lines in {:?}", lines.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_line_list() {
        let contents = "# wave ion intensity\n\n4047.7 HgI 200\n4358.3 HgI\n5462.3 HgI 1000\nbad HgI 3\n";
        let lines = read_line_list(BufReader::new(contents.as_bytes())).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[1],
            ArcLine {
                wave: 5462.3,
                ion: "HgI".to_string(),
                intensity: 1000.
            }
        );
    }

    fn channels() -> Vec<Throughput> {
        vec![
            Throughput {
                wavelength: vec![3600., 5800.],
                throughput: vec![0.2, 0.2],
            },
            Throughput {
                wavelength: vec![5700., 7600.],
                throughput: vec![0.4, 0.4],
            },
        ]
    }

    #[test]
    fn throughput_average() {
        let c = channels();
        assert_eq!(mean_throughput(4000., &c), 0.2);
        assert!((mean_throughput(5750., &c) - 0.3).abs() < 1e-12);
        assert_eq!(mean_throughput(9000., &c), 0.);
    }

    #[test]
    fn scaled_electrons() {
        let line = |wave: f64, intensity: f64| ArcLine {
            wave,
            ion: "NeI".to_string(),
            intensity,
        };
        let lines = vec![line(4000., 100.), line(7000., 100.), line(9500., 1e6)];
        let lines = electrons(lines, &channels()).unwrap();
        assert_eq!(lines.len(), 2);
        assert!((lines[1].intensity - PEAK_ELECTRONS).abs() < 1e-9);
        assert!((lines[0].intensity - PEAK_ELECTRONS / 2.).abs() < 1e-9);
        assert!(matches!(
            electrons(vec![line(9500., 1.)], &channels()),
            Err(ArcError::NoLine)
        ));
    }

    #[test]
    fn fits_table() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("arc.fits");
        let line = |wave: f64, ion: &str, intensity: f64| ArcLine {
            wave,
            ion: ion.to_string(),
            intensity,
        };
        write_fits(&path, &[line(4047.7, "HgI", 1.), line(8115.3, "ArI", 2.)]).unwrap();
        let lines = [
            line(5462.3, "HgI", 1e4),
            line(6402.2, "NeIFORBIDDEN", 12.5),
        ];
        // the file is overwritten
        write_fits(&path, &lines).unwrap();
        let mut fits = Fits::open(&path).unwrap();
        let wave: Vec<f64> = fits.read_column("ARCLINES", "WAVE").unwrap();
        let electrons: Vec<f64> = fits.read_column("ARCLINES", "ELECTRONS").unwrap();
        let ion: Vec<String> = fits.read_column("ARCLINES", "ION").unwrap();
        assert_eq!(wave, vec![5462.3, 6402.2]);
        assert_eq!(electrons, vec![1e4, 12.5]);
        assert_eq!(ion, vec!["HgI".to_string(), "NeIFORBI".to_string()]);
    }
}
