use crate::{
    arc::ArcError, fiberflat::FiberFlatError, fibers::FibersError, fits::FitsError,
    frame::FrameError, linearity::LinearityError, polyfit::PolyfitError, psf::PsfError,
    stability::StabilityError, table::TableError,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error in the `polyfit` module")]
    Polyfit(#[from] PolyfitError),
    #[error("Error in the `table` module")]
    Table(#[from] TableError),
    #[error("Error in the `fibers` module")]
    Fibers(#[from] FibersError),
    #[error("Error in the `fits` module")]
    Fits(#[from] FitsError),
    #[error("Error in the `linearity` module")]
    Linearity(#[from] LinearityError),
    #[error("Error in the `psf` module")]
    Psf(#[from] PsfError),
    #[error("Error in the `stability` module")]
    Stability(#[from] StabilityError),
    #[error("Error in the `fiberflat` module")]
    FiberFlat(#[from] FiberFlatError),
    #[error("Error in the `frame` module")]
    Frame(#[from] FrameError),
    #[error("Error in the `arc` module")]
    Arc(#[from] ArcError),
}
pub type Result<T> = std::result::Result<T, Error>;
