//! Pure-rust MPEG-1 / MPEG-2 video decoder (ISO/IEC 11172-2, 13818-2).
//!
//! The crate is organised as a pipeline: a chunked [`bitreader`] feeds the
//! start-code driven [`parser`], which expands macroblocks into records that
//! the [`decoder`] reconstructs (inverse DCT + motion compensation) into
//! pictures borrowed from a [`lumiere_video::VideoOutput`]. The [`synchro`]
//! module decides, picture by picture, whether the machine can afford to
//! decode in real time, and reorders presentation dates around B pictures.

#[macro_use]
extern crate bitflags;

#[macro_use]
extern crate lazy_static;

pub mod bitreader;
pub mod decoder;
mod error;
pub mod parser;
pub mod synchro;
mod types;

pub use bitreader::{ChunkQueue, EsChunk};
pub use decoder::{DecoderConfig, SystemTimeSource, TimeSource};
pub use error::{Error, Result};
pub use parser::VideoParser;
pub use synchro::SynchroMode;
pub use types::CodingType;
