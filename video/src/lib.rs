//! Renderer-facing contract of the lumiere video decoders.
//!
//! The decoder core never talks to a window system. It borrows picture
//! buffers from a [`VideoOutput`], reconstructs into them, stamps them with
//! a presentation date and hands them back in presentation order. Everything
//! a renderer needs to know about a finished frame travels in
//! [`DisplayPicture`].

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI64, AtomicIsize, Ordering};
use std::sync::Arc;

mod error;

pub use error::Error;

/// Chroma subsampling of a picture.
///
/// Only 4:2:0 is reconstructed by the software decoder (Main Profile @ Main
/// Level); the other two variants exist so that sequence headers announcing
/// them can be recognised and refused cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaFormat {
    Chroma420,
    Chroma422,
    Chroma444,
}

impl ChromaFormat {
    /// Number of coded chroma blocks per macroblock (both components).
    pub fn chroma_blocks(self) -> usize {
        match self {
            ChromaFormat::Chroma420 => 2,
            ChromaFormat::Chroma422 => 4,
            ChromaFormat::Chroma444 => 8,
        }
    }

    /// Width of a chroma plane for a given luma width.
    pub fn chroma_width(self, luma_width: usize) -> usize {
        match self {
            ChromaFormat::Chroma420 | ChromaFormat::Chroma422 => luma_width / 2,
            ChromaFormat::Chroma444 => luma_width,
        }
    }

    /// Height of a chroma plane for a given luma height.
    pub fn chroma_height(self, luma_height: usize) -> usize {
        match self {
            ChromaFormat::Chroma420 => luma_height / 2,
            ChromaFormat::Chroma422 | ChromaFormat::Chroma444 => luma_height,
        }
    }
}

/// The three planes of a YCbCr picture, row-major, no padding.
pub struct Planes {
    pub y: Box<[u8]>,
    pub u: Box<[u8]>,
    pub v: Box<[u8]>,
}

/// Names one plane of a picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneId {
    Y,
    U,
    V,
}

/// Raw view of one plane, for reconstruction kernels that may legitimately
/// read and write the same picture (opposite fields of a field pair).
/// All accesses through the pointer fall under the contract of
/// [`PictureBuffer::planes_mut`].
#[derive(Clone, Copy)]
pub struct RawPlane {
    pub ptr: *mut u8,
    pub len: usize,
}

unsafe impl Send for RawPlane {}

/// A picture buffer shared between the decoder and the renderer.
///
/// The planes are interior-mutable: while a picture is being reconstructed,
/// decoder workers write disjoint macroblock regions into it, possibly from
/// several threads, while motion compensation reads from *other* pictures
/// (and, for second-field predictions, from the already-written field of
/// this one). The `deccount` protocol guarantees a picture is never
/// published, and never used as a prediction source for a later picture,
/// before every one of its macroblocks has been written.
pub struct PictureBuffer {
    width: usize,
    height: usize,
    chroma: ChromaFormat,
    planes: UnsafeCell<Planes>,

    /// Display metadata, filled in by the decoder before any macroblock is
    /// decoded.
    pub aspect_ratio: AtomicIsize,
    pub matrix_coefficients: AtomicIsize,

    /// Presentation date in microseconds, attached through
    /// [`VideoOutput::date_picture`]; zero until dated.
    pub date: AtomicI64,

    /// Number of macroblocks still to be reconstructed, plus one.
    ///
    /// The decoder initialises this to `mb_count + 1` and decrements it once
    /// per finished macroblock; the value 1 therefore means "complete".
    /// Keeping the sentinel avoids a race between the last worker and the
    /// parser destroying an errored picture, the same trick the deccount of
    /// the reference implementation plays.
    pub deccount: AtomicIsize,
}

// Soundness: all plane writes go through `planes_mut`, whose contract
// forbids overlapping concurrent access; see the type-level comment.
unsafe impl Sync for PictureBuffer {}
unsafe impl Send for PictureBuffer {}

impl PictureBuffer {
    pub fn new(chroma: ChromaFormat, width: usize, height: usize) -> Self {
        let c_size = chroma.chroma_width(width) * chroma.chroma_height(height);
        Self {
            width,
            height,
            chroma,
            planes: UnsafeCell::new(Planes {
                y: vec![0; width * height].into_boxed_slice(),
                u: vec![0; c_size].into_boxed_slice(),
                v: vec![0; c_size].into_boxed_slice(),
            }),
            aspect_ratio: AtomicIsize::new(0),
            matrix_coefficients: AtomicIsize::new(1),
            date: AtomicI64::new(0),
            deccount: AtomicIsize::new(0),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn chroma_format(&self) -> ChromaFormat {
        self.chroma
    }

    pub fn chroma_width(&self) -> usize {
        self.chroma.chroma_width(self.width)
    }

    /// Read access to the planes.
    ///
    /// Reading while another thread writes an unrelated region is fine for
    /// the decoder's purposes; torn pixels can only be observed on pictures
    /// that violate the deccount protocol.
    pub fn planes(&self) -> &Planes {
        unsafe { &*self.planes.get() }
    }

    /// Write access to the planes.
    ///
    /// # Safety
    ///
    /// Callers must guarantee that no two threads write overlapping plane
    /// regions concurrently, and that no thread writes a picture that is a
    /// motion-compensation source of a concurrently executing macroblock
    /// (other than the opposite field of a field picture, which the bit
    /// stream orders before the current field).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn planes_mut(&self) -> &mut Planes {
        &mut *self.planes.get()
    }

    /// Marks one macroblock as reconstructed. Returns `true` when the
    /// picture is complete.
    pub fn finish_macroblock(&self) -> bool {
        self.deccount.fetch_sub(1, Ordering::AcqRel) == 2
    }

    /// Pointer-level access to one plane; obtaining the view is safe, every
    /// dereference falls under the [`Self::planes_mut`] contract.
    pub fn raw_plane(&self, id: PlaneId) -> RawPlane {
        let planes = unsafe { &mut *self.planes.get() };
        let slice: &mut [u8] = match id {
            PlaneId::Y => &mut planes.y,
            PlaneId::U => &mut planes.u,
            PlaneId::V => &mut planes.v,
        };
        RawPlane {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
        }
    }
}

/// Shared handle to a picture buffer.
///
/// Cloning the handle is the reference-counting `link` of the original
/// design; dropping it is `unlink`.
pub type PictureHandle = Arc<PictureBuffer>;

/// A finished frame, emitted in presentation order.
#[derive(Clone)]
pub struct DisplayPicture {
    pub picture: PictureHandle,
    /// Presentation date in microseconds on the decoder's clock.
    pub date: i64,
    /// Display duration in half-periods of the frame rate (2, 3 or 4),
    /// driven by repeat_first_field / top_field_first.
    pub repeat_period: u8,
}

/// What the decoder requires from the video renderer.
///
/// Implementations are driven from the decoder thread; `allocate_picture`
/// may refuse (return `None`) when the display queue is saturated, in which
/// case the decoder retries after a short sleep.
pub trait VideoOutput: Send {
    /// Borrow an empty picture buffer of the given geometry.
    fn allocate_picture(
        &mut self,
        chroma: ChromaFormat,
        width: usize,
        height: usize,
    ) -> Option<PictureHandle>;

    /// Attach a presentation date to a picture whose display time has
    /// become known. Called at most once per picture, possibly well before
    /// `display_picture`.
    fn date_picture(&mut self, picture: &PictureHandle, date: i64);

    /// Enqueue a completely reconstructed picture for display.
    fn display_picture(&mut self, picture: &PictureHandle, repeat_period: u8);

    /// Give back a picture that will never be displayed (decoding error or
    /// shutdown); the renderer may recycle the buffer immediately.
    fn destroy_picture(&mut self, picture: PictureHandle);

    /// Mean rendering cost in microseconds, fed into the frame-dropping
    /// budget. Renderers that do not measure may return 0.
    fn render_time(&self) -> i64 {
        0
    }
}
