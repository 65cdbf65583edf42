//! FITS file helpers
//!
//! Thin layer over [fitsio] returning images as row-major [DMatrix]
//! (rows along the FITS `NAXIS2` axis, columns along `NAXIS1`).

use fitsio::{
    hdu::{FitsHdu, HduInfo},
    FitsFile,
};
use nalgebra::DMatrix;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum FitsError {
    #[error("FITS I/O error")]
    FitsIo(#[from] fitsio::errors::Error),
    #[error("failed to open {0:?}")]
    Open(PathBuf, #[source] fitsio::errors::Error),
    #[error("HDU not found: {0}")]
    HduNotFound(String),
    #[error("HDU {0} is not an image")]
    NotAnImage(String),
    #[error("HDU {0} is not a table")]
    NotATable(String),
    #[error("column {0:?} not found in HDU {1}")]
    ColumnNotFound(String, String),
    #[error("HDU {hdu} has {ndim} dimensions, expected {expected}")]
    Dimensions {
        hdu: String,
        ndim: usize,
        expected: usize,
    },
}
type Result<T> = std::result::Result<T, FitsError>;

/// An HDU given either by its index or by its extension name
#[derive(Debug, Clone, Copy)]
pub enum Hdu<'a> {
    Index(usize),
    Name(&'a str),
}
impl std::fmt::Display for Hdu<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hdu::Index(i) => write!(f, "#{}", i),
            Hdu::Name(name) => write!(f, "{}", name),
        }
    }
}
impl From<usize> for Hdu<'_> {
    fn from(value: usize) -> Self {
        Hdu::Index(value)
    }
}
impl<'a> From<&'a str> for Hdu<'a> {
    fn from(value: &'a str) -> Self {
        Hdu::Name(value)
    }
}

/// Read-only FITS file
pub struct Fits {
    path: PathBuf,
    file: FitsFile,
}
impl Fits {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        log::info!("reading {:?}", path);
        let file = FitsFile::open(&path).map_err(|e| FitsError::Open(path.clone(), e))?;
        Ok(Self { path, file })
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    fn hdu<'a>(&mut self, hdu: impl Into<Hdu<'a>>) -> Result<FitsHdu> {
        let hdu = hdu.into();
        match hdu {
            Hdu::Index(i) => self.file.hdu(i),
            Hdu::Name(name) => self.file.hdu(name),
        }
        .map_err(|_| FitsError::HduNotFound(hdu.to_string()))
    }
    /// Checks if an HDU exists
    pub fn has_hdu<'a>(&mut self, hdu: impl Into<Hdu<'a>>) -> bool {
        self.hdu(hdu).is_ok()
    }
    /// Reads a header keyword of the primary HDU
    pub fn primary_key<T: fitsio::headers::ReadsKey>(&mut self, key: &str) -> Result<T> {
        let hdu = self.file.primary_hdu()?;
        Ok(hdu.read_key(&mut self.file, key)?)
    }
    /// Reads a header keyword of any HDU
    pub fn read_key<'a, T: fitsio::headers::ReadsKey>(
        &mut self,
        hdu: impl Into<Hdu<'a>>,
        key: &str,
    ) -> Result<T> {
        let fits_hdu = self.hdu(hdu)?;
        Ok(fits_hdu.read_key(&mut self.file, key)?)
    }
    /// Image shape, slowest varying axis first
    pub fn image_shape<'a>(&mut self, hdu: impl Into<Hdu<'a>>) -> Result<Vec<usize>> {
        let hdu = hdu.into();
        match &self.hdu(hdu)?.info {
            HduInfo::ImageInfo { shape, .. } => Ok(shape.clone()),
            _ => Err(FitsError::NotAnImage(hdu.to_string())),
        }
    }
    /// Reads an image of any dimension as a flat vector
    pub fn read_vector<'a>(&mut self, hdu: impl Into<Hdu<'a>>) -> Result<Vec<f64>> {
        let hdu = hdu.into();
        let fits_hdu = self.hdu(hdu)?;
        if !matches!(fits_hdu.info, HduInfo::ImageInfo { .. }) {
            return Err(FitsError::NotAnImage(hdu.to_string()));
        }
        Ok(fits_hdu.read_image(&mut self.file)?)
    }
    /// Reads a 2D image
    pub fn read_matrix<'a>(&mut self, hdu: impl Into<Hdu<'a>>) -> Result<DMatrix<f64>> {
        let hdu = hdu.into();
        let shape = self.image_shape(hdu)?;
        let (nrows, ncols) = match shape.as_slice() {
            [nrows, ncols] => (*nrows, *ncols),
            [n] => (1, *n),
            _ => {
                return Err(FitsError::Dimensions {
                    hdu: hdu.to_string(),
                    ndim: shape.len(),
                    expected: 2,
                })
            }
        };
        let data = self.read_vector(hdu)?;
        Ok(DMatrix::from_row_slice(nrows, ncols, &data))
    }
    /// Reads a table column
    pub fn read_column<'a, T: fitsio::tables::ReadsCol>(
        &mut self,
        hdu: impl Into<Hdu<'a>>,
        column: &str,
    ) -> Result<Vec<T>> {
        let fits_hdu = self.hdu(hdu)?;
        Ok(fits_hdu.read_col(&mut self.file, column)?)
    }
    /// Reads a fixed size array column of doubles
    ///
    /// Returns the number of values per row and the values of all the rows, one row after the other.
    pub fn read_array_column<'a>(
        &mut self,
        hdu: impl Into<Hdu<'a>>,
        column: &str,
    ) -> Result<(usize, Vec<f64>)> {
        let hdu = hdu.into();
        let (colnum, repeat, nrows) = match &self.hdu(hdu)?.info {
            HduInfo::TableInfo {
                column_descriptions,
                num_rows,
            } => column_descriptions
                .iter()
                .position(|c| c.name == column)
                .map(|k| (k + 1, column_descriptions[k].data_type.repeat, *num_rows))
                .ok_or_else(|| FitsError::ColumnNotFound(column.to_string(), hdu.to_string()))?,
            _ => return Err(FitsError::NotATable(hdu.to_string())),
        };
        let mut values = vec![0f64; repeat * nrows];
        if values.is_empty() {
            return Ok((repeat, values));
        }
        // `read_col` only reads the first element of each row
        let mut status = 0;
        unsafe {
            fitsio::sys::ffgcvd(
                self.file.as_raw(),
                colnum as i32,
                1,
                1,
                values.len() as i64,
                0.,
                values.as_mut_ptr(),
                &mut 0,
                &mut status,
            );
        }
        fitsio::errors::check_status(status)?;
        Ok((repeat, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitsio::images::{ImageDescription, ImageType};
    use tempfile::TempDir;

    #[test]
    fn matrix_row_major() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("image.fits");
        {
            let mut file = FitsFile::create(&path).open().unwrap();
            let description = ImageDescription {
                data_type: ImageType::Double,
                dimensions: &[2, 3],
            };
            let hdu = file.create_image("FLUX", &description).unwrap();
            let data = vec![1f64, 2., 3., 4., 5., 6.];
            hdu.write_image(&mut file, data.as_slice()).unwrap();
        }
        let mut fits = Fits::open(&path).unwrap();
        assert_eq!(fits.image_shape("FLUX").unwrap(), vec![2, 3]);
        let m = fits.read_matrix("FLUX").unwrap();
        assert_eq!(m.shape(), (2, 3));
        assert_eq!(m[(0, 2)], 3.);
        assert_eq!(m[(1, 0)], 4.);
        assert!(matches!(
            fits.read_matrix("IVAR"),
            Err(FitsError::HduNotFound(_))
        ));
        assert!(matches!(
            fits.read_array_column("FLUX", "COEFF"),
            Err(FitsError::NotATable(_))
        ));
    }
}
