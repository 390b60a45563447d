//! Shared fixture tooling: a bit-level writer and builders for small,
//! well-formed MPEG-1/2 elementary streams.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use lumiere_codec_mpeg12::TimeSource;
use lumiere_video::{ChromaFormat, PictureBuffer, PictureHandle, VideoOutput};

/// MSB-first bit writer.
pub struct BitWriter {
    bytes: Vec<u8>,
    acc: u32,
    bits: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            acc: 0,
            bits: 0,
        }
    }

    pub fn put(&mut self, value: u32, bits: u32) {
        assert!(bits >= 1 && bits <= 24 && value < (1u32 << bits));
        self.acc = (self.acc << bits) | value;
        self.bits += bits;
        while self.bits >= 8 {
            self.bits -= 8;
            self.bytes.push((self.acc >> self.bits) as u8);
        }
    }

    /// Zero-pad to the next byte boundary.
    pub fn align(&mut self) {
        if self.bits != 0 {
            self.put(0, 8 - self.bits);
        }
    }

    /// Byte-aligned start code `000001xx`.
    pub fn start_code(&mut self, code: u8) {
        self.align();
        self.bytes.extend_from_slice(&[0x00, 0x00, 0x01, code]);
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.align();
        self.bytes
    }
}

/// Picture period of frame_rate_code 3 (25 fps): 40 ms.
pub const PAL_PERIOD: i64 = 40_000;

/// 16x16 sequence header; `mpeg2` appends the sequence_extension.
pub fn sequence_header(w: &mut BitWriter, mpeg2: bool) {
    sequence_header_sized(w, mpeg2, 16, 16);
}

/// Sequence header with explicit pel dimensions.
pub fn sequence_header_sized(w: &mut BitWriter, mpeg2: bool, width: u32, height: u32) {
    w.start_code(0xB3);
    w.put(width, 12); // horizontal_size
    w.put(height, 12); // vertical_size
    w.put(1, 4); // aspect_ratio: square samples
    w.put(3, 4); // frame_rate_code: 25 fps
    w.put(0x3FFFF, 18); // bit_rate
    w.put(1, 1); // marker
    w.put(0, 10); // vbv_buffer_size
    w.put(0, 1); // constrained_parameters
    w.put(0, 1); // load_intra_quantiser_matrix
    w.put(0, 1); // load_non_intra_quantiser_matrix
    if mpeg2 {
        w.start_code(0xB5);
        w.put(1, 4); // sequence_extension id
        w.put(0x48, 8); // profile_and_level: main at main
        w.put(1, 1); // progressive_sequence
        w.put(1, 2); // chroma_format 4:2:0
        w.put(0, 2); // horizontal_size_extension
        w.put(0, 2); // vertical_size_extension
        w.put(0, 12); // bit_rate_extension
        w.put(1, 1); // marker
        w.put(0, 8); // vbv_buffer_size_extension
        w.put(0, 1); // low_delay
        w.put(0, 2); // frame_rate_extension_n
        w.put(0, 5); // frame_rate_extension_d
    }
}

pub const I: u32 = 1;
pub const P: u32 = 2;
pub const B: u32 = 3;

/// Picture header; for MPEG-1, P and B pictures get f_code 1 with full-pel
/// vectors off. `mpeg2` appends a frame-structure picture_coding_extension.
pub fn picture_header(w: &mut BitWriter, coding_type: u32, temporal: u32, mpeg2: bool) {
    w.start_code(0x00);
    w.put(temporal, 10);
    w.put(coding_type, 3);
    w.put(0xFFFF, 16); // vbv_delay
    if coding_type == P || coding_type == B {
        w.put(0, 1); // full_pel_forward_vector
        w.put(1, 3); // forward_f_code
    }
    if coding_type == B {
        w.put(0, 1); // full_pel_backward_vector
        w.put(1, 3); // backward_f_code
    }
    w.put(0, 1); // extra_bit_picture
    if mpeg2 {
        w.start_code(0xB5);
        w.put(8, 4); // picture_coding_extension id
        for _ in 0..4 {
            w.put(1, 4); // f_code
        }
        w.put(0, 2); // intra_dc_precision
        w.put(3, 2); // picture_structure: frame
        w.put(0, 1); // top_field_first
        w.put(1, 1); // frame_pred_frame_dct
        w.put(0, 1); // concealment_motion_vectors
        w.put(0, 1); // q_scale_type
        w.put(0, 1); // intra_vlc_format
        w.put(0, 1); // alternate_scan
        w.put(0, 1); // repeat_first_field
        w.put(1, 1); // chroma_420_type
        w.put(1, 1); // progressive_frame
        w.put(0, 1); // composite_display_flag
    }
}

fn slice_start(w: &mut BitWriter) {
    w.start_code(0x01);
    w.put(2, 5); // quantiser_scale_code
    w.put(0, 1); // no extra slice information
    w.put(1, 1); // macroblock_address_increment: 1
}

/// One intra block whose coefficients are DC predictor + 0: dct_dc_size
/// zero and end of block.
fn dc_only_block(w: &mut BitWriter, chroma: bool) {
    if chroma {
        w.put(0b00, 2); // dct_dc_size_chrominance 0
    } else {
        w.put(0b100, 3); // dct_dc_size_luminance 0
    }
    w.put(0b10, 2); // end of block (B.14)
}

/// A slice holding the single intra macroblock of a 16x16 I picture.
pub fn intra_slice(w: &mut BitWriter) {
    slice_start(w);
    w.put(1, 1); // macroblock_type: intra
    for block in 0..6 {
        dc_only_block(w, block >= 4);
    }
}

/// Like [`intra_slice`], but the first luminance block carries a DC
/// differential of +1, lifting the whole luma plane one level.
pub fn intra_slice_brighter(w: &mut BitWriter) {
    slice_start(w);
    w.put(1, 1); // macroblock_type: intra
    for block in 0..6 {
        if block == 0 {
            w.put(0b00, 2); // dct_dc_size_luminance 1
            w.put(1, 1); // differential +1
            w.put(0b10, 2); // end of block
        } else {
            dc_only_block(w, block >= 4);
        }
    }
}

/// A slice holding one forward-predicted macroblock with a zero vector and
/// no coded blocks (16x16 P picture identical to its reference).
pub fn still_p_slice(w: &mut BitWriter) {
    slice_start(w);
    w.put(0b001, 3); // macroblock_type: motion forward, not coded
    w.put(1, 1); // horizontal motion_code 0
    w.put(1, 1); // vertical motion_code 0
}

/// A slice holding one bidirectionally-predicted macroblock with zero
/// vectors and no coded blocks.
pub fn still_b_slice(w: &mut BitWriter) {
    slice_start(w);
    w.put(0b10, 2); // macroblock_type: forward + backward, not coded
    w.put(1, 1); // forward horizontal motion_code 0
    w.put(1, 1); // forward vertical motion_code 0
    w.put(1, 1); // backward horizontal motion_code 0
    w.put(1, 1); // backward vertical motion_code 0
}

pub fn sequence_end(w: &mut BitWriter) {
    w.start_code(0xB7);
}

/// In-memory renderer; the integration twin of the software backend's
/// collector.
#[derive(Default)]
pub struct TestOutput {
    displayed: Vec<(PictureHandle, u8)>,
    destroyed: usize,
}

impl TestOutput {
    pub fn new_shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }
}

impl VideoOutput for TestOutput {
    fn allocate_picture(
        &mut self,
        chroma: ChromaFormat,
        width: usize,
        height: usize,
    ) -> Option<PictureHandle> {
        Some(Arc::new(PictureBuffer::new(chroma, width, height)))
    }

    fn date_picture(&mut self, picture: &PictureHandle, date: i64) {
        picture.date.store(date, Ordering::Release);
    }

    fn display_picture(&mut self, picture: &PictureHandle, repeat_period: u8) {
        self.displayed.push((picture.clone(), repeat_period));
    }

    fn destroy_picture(&mut self, _picture: PictureHandle) {
        self.destroyed += 1;
    }
}

/// Frames in presentation order as `(date, picture, repeat)`.
pub fn presented(output: &Arc<Mutex<TestOutput>>) -> Vec<(i64, PictureHandle, u8)> {
    let output = output.lock().unwrap();
    let mut frames: Vec<_> = output
        .displayed
        .iter()
        .map(|(p, r)| (p.date.load(Ordering::Acquire), p.clone(), *r))
        .collect();
    frames.sort_by_key(|f| f.0);
    frames
}

pub fn destroyed_count(output: &Arc<Mutex<TestOutput>>) -> usize {
    output.lock().unwrap().destroyed
}

/// Clock advancing a fixed step at every reading; models a machine where
/// everything is slow.
pub struct SteppingClock {
    now: AtomicI64,
    step: i64,
}

impl SteppingClock {
    pub fn new(step: i64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(0),
            step,
        })
    }
}

impl TimeSource for SteppingClock {
    fn now(&self) -> i64 {
        self.now.fetch_add(self.step, Ordering::Relaxed)
    }
}

/// Checks that a whole luma plane holds one value.
pub fn assert_flat_luma(picture: &PictureHandle, value: u8) {
    let planes = picture.planes();
    assert!(
        planes.y.iter().all(|&v| v == value),
        "luma plane is not flat {} (first {:?})",
        value,
        &planes.y[..8]
    );
}
