use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("picture allocation failed")]
    PictureAllocationFailed,

    #[error("unsupported chroma format for this output")]
    UnsupportedChromaFormat,
}
