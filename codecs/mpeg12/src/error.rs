use thiserror::Error;

/// Hard decoder errors.
///
/// These travel by `Result` and unwind to the header dispatch loop.
/// Recoverable bitstream damage (bad VLC code, overflowing coefficient
/// index, slices out of order) does *not* use this type: it sets the sticky
/// error flag on the picture context and resynchronises at the next start
/// code, preserving everything already reconstructed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The input queue's kill flag was raised; not a stream problem.
    #[error("decoder shutdown requested")]
    Shutdown,

    /// The input queue is closed and fully drained.
    #[error("end of elementary stream")]
    EndOfStream,

    /// A syntactically valid stream asked for something above
    /// Main Profile @ Main Level.
    #[error("unsupported stream: {0}")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
