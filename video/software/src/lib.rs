//! CPU-only video decoding backend.
//!
//! Wires the in-tree MPEG-1/2 decoder to the [`lumiere_video`] output
//! contract: one decoder thread per stream, fed by the demultiplexer
//! through a chunk queue, delivering finished frames in presentation
//! order.

mod backend;

pub use backend::{FrameCollector, Mpeg12Stream, StreamOptions};
