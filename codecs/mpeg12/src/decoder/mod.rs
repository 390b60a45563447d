//! Macroblock reconstruction.
//!
//! The parser side fills a [`MacroblockRecord`] per macroblock: decoded
//! coefficients with their inverse-DCT selector, and up to four motion
//! predictions. [`execute_macroblock`] then reconstructs the pixels, either
//! inline on the parser thread or on a pool worker. Dispatch is by closed
//! enums throughout; there are no function pointers to chase.

use std::sync::Arc;
use std::time::Instant;

use lumiere_video::{PictureHandle, PlaneId};

use crate::synchro::SynchroMode;
use crate::types::MacroblockType;

pub mod idct;
pub mod motion;
pub mod output;
pub mod pool;

/// Blocks per macroblock at 4:2:0.
pub const BLOCK_COUNT: usize = 6;
/// Most predictions any macroblock can carry (16x8 or dual-prime
/// bidirectional cases).
pub const MAX_MOTIONS: usize = 4;

/// Which inverse DCT a block takes, chosen while its coefficients are
/// decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdctSelect {
    /// At most one non-zero coefficient, at the given natural-order
    /// position.
    Sparse(u8),
    Full,
}

impl Default for IdctSelect {
    fn default() -> Self {
        IdctSelect::Sparse(0)
    }
}

/// One 8x8 block of a macroblock record.
pub struct BlockRecord {
    /// Inverse-quantised coefficients, natural order.
    pub coeffs: [i16; 64],
    pub select: IdctSelect,
    pub plane: PlaneId,
    /// Destination of the block's top-left sample within the plane.
    pub offset: usize,
    /// Distance between successive destination lines; doubled when the
    /// macroblock uses field DCT.
    pub stride: usize,
}

impl Default for BlockRecord {
    fn default() -> Self {
        Self {
            coeffs: [0; 64],
            select: IdctSelect::default(),
            plane: PlaneId::Y,
            offset: 0,
            stride: 0,
        }
    }
}

/// Which picture a prediction reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredSource {
    Forward,
    Backward,
    /// The opposite, already reconstructed field of the picture being
    /// decoded (second field of a P frame, dual prime).
    Current,
}

/// One motion prediction, fully resolved at parse time.
#[derive(Debug, Clone, Copy)]
pub struct MotionDescriptor {
    pub source: PredSource,
    /// Field parity of the source lines.
    pub src_field: bool,
    /// Field parity of the destination lines.
    pub dst_field: bool,
    /// Luma vector, half-pel units (frame coordinates for frame-based
    /// modes, as stored by the vector decoder).
    pub mv_x: i32,
    pub mv_y: i32,
    /// Line jump while predicting, luma and chroma (doubled for
    /// field-in-frame modes).
    pub pred_l_stride: usize,
    pub pred_c_stride: usize,
    /// Luma height of the predicted block (16 or 8).
    pub height: usize,
    /// First predicted luma line within the macroblock (0 or 8).
    pub v_offset: usize,
    /// Average into the destination instead of overwriting it (second of a
    /// bidirectional or dual-prime pair).
    pub average: bool,
}

impl Default for MotionDescriptor {
    fn default() -> Self {
        Self {
            source: PredSource::Forward,
            src_field: false,
            dst_field: false,
            mv_x: 0,
            mv_y: 0,
            pred_l_stride: 0,
            pred_c_stride: 0,
            height: 16,
            v_offset: 0,
            average: false,
        }
    }
}

/// Everything needed to reconstruct one macroblock, produced by the parser
/// and consumed by a decoder (inline or pooled). Records are pooled and
/// reused, so all storage is inline.
#[derive(Default)]
pub struct MacroblockRecord {
    pub picture: Option<PictureHandle>,
    pub forward: Option<PictureHandle>,
    pub backward: Option<PictureHandle>,

    pub mb_type: MacroblockType,
    pub coded_block_pattern: u32,
    /// Display half-periods of the owning picture, for publication.
    pub repeat_period: u8,

    /// Upper-left pel of the macroblock.
    pub l_x: usize,
    pub c_x: usize,
    /// Macroblock line in motion coordinates (top field line for bottom
    /// field pictures).
    pub motion_l_y: usize,
    pub motion_c_y: usize,
    /// Destination line jumps (doubled for field pictures).
    pub l_stride: usize,
    pub c_stride: usize,

    /// True when this macroblock belongs to a bottom-field picture.
    pub motion_field: bool,
    /// Second field of a P frame: predictions of the opposite parity come
    /// from the current picture.
    pub p_second: bool,

    pub motions: [MotionDescriptor; MAX_MOTIONS],
    pub motion_count: usize,

    pub blocks: [BlockRecord; BLOCK_COUNT],
}

impl MacroblockRecord {
    pub fn is_intra(&self) -> bool {
        self.mb_type.contains(MacroblockType::INTRA)
    }

    /// Drops the picture handles so a pooled record does not pin buffers
    /// between pictures.
    pub fn release_pictures(&mut self) {
        self.picture = None;
        self.forward = None;
        self.backward = None;
    }
}

/// Reconstructs one macroblock into its picture: motion compensation, then
/// inverse DCT of every coded block, added over the prediction or copied for
/// intra macroblocks.
pub fn execute_macroblock(record: &MacroblockRecord, grayscale: bool) {
    if !record.is_intra() {
        for descriptor in &record.motions[..record.motion_count] {
            motion::compensate(record, descriptor, grayscale);
        }
    }

    let mut mask = 1u32 << (BLOCK_COUNT - 1);
    for (index, block) in record.blocks.iter().enumerate() {
        if record.coded_block_pattern & mask != 0 {
            let chroma = index >= 4;
            if !(grayscale && chroma) {
                reconstruct_block(record, block);
            }
        }
        mask >>= 1;
    }
}

fn reconstruct_block(record: &MacroblockRecord, block: &BlockRecord) {
    let mut data = block.coeffs;
    match block.select {
        IdctSelect::Sparse(pos) => idct::sparse(&mut data, pos as usize),
        IdctSelect::Full => idct::full(&mut data),
    }

    let picture = record
        .picture
        .as_ref()
        .expect("record without a destination picture");
    let plane = picture.raw_plane(block.plane);
    if record.is_intra() {
        output::copy_block(&data, plane, block.offset, block.stride);
    } else {
        output::add_block(&data, plane, block.offset, block.stride);
    }
}

/// Clock used by the synchroniser. Injectable so that load-dependent
/// behaviour is testable.
pub trait TimeSource: Send + Sync {
    /// Microseconds on a monotonic scale shared with chunk timestamps.
    fn now(&self) -> i64;
}

/// Monotonic clock anchored at creation.
pub struct SystemTimeSource {
    origin: Instant,
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> i64 {
        self.origin.elapsed().as_micros() as i64
    }
}

/// Decoder configuration, resolved once at construction.
pub struct DecoderConfig {
    /// Decoder worker threads; 0 decodes inline on the parser thread.
    pub workers: usize,
    /// Skip chroma reconstruction entirely.
    pub grayscale: bool,
    /// Picture-selection policy.
    pub synchro: SynchroMode,
    /// Clock for the frame-dropping decisions.
    pub time: Arc<dyn TimeSource>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            grayscale: false,
            synchro: SynchroMode::Auto,
            time: Arc::new(SystemTimeSource::default()),
        }
    }
}
