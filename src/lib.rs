//! Spectrograph test stand calibration analysis
//!
//! Library behind the calibration tools in `src/bin`:
//!  - [linearity]: shutter timing offset, fiber and ND transmissions and CCD non-linearity
//!  - [psf] and [stability]: PSF boot files and PSF drift with temperature
//!  - [fiberflat]: fiber flat systematics
//!  - [frame]: extracted spectra
//!  - [arc]: arc lamp spectra in electrons
//!
//! Plots are rendered with the `plot` feature.

pub mod arc;
pub mod error;
pub mod fiberflat;
pub mod fibers;
pub mod fits;
pub mod frame;
pub mod linearity;
#[cfg(feature = "plot")]
pub mod plot;
pub mod polyfit;
pub mod psf;
pub mod stability;
pub mod table;

pub use error::{Error, Result};
pub use fibers::Fibers;
pub use linearity::{Linearity, LinearityConfig, ShutterTiming};
pub use psf::{read_psf, PsfBoot, PsfModel};
pub use table::AsciiTable;
