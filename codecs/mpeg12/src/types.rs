//! Parsing contexts and bitstream constants.
//!
//! Three contexts mirror the lifetime of the syntactic units they describe:
//! [`Sequence`] lives from one sequence header to the next, [`Picture`] from
//! a picture header to the completion of its frame, and
//! [`MacroblockContext`] carries the predictors that are reset at every
//! slice.

use lumiere_video::{ChromaFormat, PictureHandle};

/* Start codes (ISO/IEC 13818-2 6.2.1). */
pub const PICTURE_START_CODE: u32 = 0x100;
pub const SLICE_START_CODE_MIN: u32 = 0x101;
pub const SLICE_START_CODE_MAX: u32 = 0x1AF;
pub const USER_DATA_START_CODE: u32 = 0x1B2;
pub const SEQUENCE_HEADER_CODE: u32 = 0x1B3;
pub const EXTENSION_START_CODE: u32 = 0x1B5;
pub const SEQUENCE_END_CODE: u32 = 0x1B7;
pub const GROUP_START_CODE: u32 = 0x1B8;

/* Extension start code identifiers. */
pub const SEQUENCE_EXTENSION_ID: u32 = 1;
pub const SEQUENCE_DISPLAY_EXTENSION_ID: u32 = 2;
pub const QUANT_MATRIX_EXTENSION_ID: u32 = 3;
pub const COPYRIGHT_EXTENSION_ID: u32 = 4;
pub const SEQUENCE_SCALABLE_EXTENSION_ID: u32 = 5;
pub const PICTURE_DISPLAY_EXTENSION_ID: u32 = 7;
pub const PICTURE_CODING_EXTENSION_ID: u32 = 8;
pub const PICTURE_SPATIAL_SCALABLE_EXTENSION_ID: u32 = 9;
pub const PICTURE_TEMPORAL_SCALABLE_EXTENSION_ID: u32 = 10;

/// Picture coding type, as coded in the picture header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingType {
    I = 1,
    P = 2,
    B = 3,
    /// DC-only intra pictures, MPEG-1 only.
    D = 4,
}

impl CodingType {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(CodingType::I),
            2 => Some(CodingType::P),
            3 => Some(CodingType::B),
            4 => Some(CodingType::D),
            _ => None,
        }
    }

    /// Index into the synchro's per-type tables.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Picture structure (13818-2 6.3.10); MPEG-1 pictures are always frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureStructure {
    TopField = 1,
    BottomField = 2,
    Frame = 3,
}

impl PictureStructure {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(PictureStructure::TopField),
            2 => Some(PictureStructure::BottomField),
            3 => Some(PictureStructure::Frame),
            _ => None,
        }
    }

    pub fn is_frame(self) -> bool {
        self == PictureStructure::Frame
    }

    /// The two field structures complete each other; a frame completes
    /// itself.
    pub fn completes(self, other: PictureStructure) -> bool {
        (self as u32 | other as u32) == PictureStructure::Frame as u32
    }
}

/// Scalability announced by a sequence_scalable_extension. Anything but
/// `None` changes the slice syntax and is refused at MP@ML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalableMode {
    #[default]
    None,
    DataPartitioning,
    Spatial,
    Snr,
    Temporal,
}

bitflags! {
    /// Decoded macroblock_type (tables B.2-B.4).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MacroblockType: u8 {
        const INTRA           = 0x01;
        const PATTERN         = 0x02;
        const MOTION_BACKWARD = 0x04;
        const MOTION_FORWARD  = 0x08;
        const QUANT           = 0x10;
    }
}

/* motion_type codes (6.3.17.1); the same two-bit field means different
 * things in frame and in field pictures. */
pub const MOTION_FIELD: u8 = 1;
pub const MOTION_FRAME: u8 = 2;
pub const MOTION_16X8: u8 = 2;
pub const MOTION_DMV: u8 = 3;

/// Scan pattern selector: index into [`SCAN`].
pub const SCAN_ZIGZAG: usize = 0;
pub const SCAN_ALT: usize = 1;

/// Zig-zag and alternate scan patterns (13818-2 figures 7-2, 7-3).
#[rustfmt::skip]
pub static SCAN: [[u8; 64]; 2] = [
    [
        0,  1,  8,  16, 9,  2,  3,  10, 17, 24, 32, 25, 18, 11, 4,  5,
        12, 19, 26, 33, 40, 48, 41, 34, 27, 20, 13, 6,  7,  14, 21, 28,
        35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51,
        58, 59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
    ],
    [
        0,  8,  16, 24, 1,  9,  2,  10, 17, 25, 32, 40, 48, 56, 57, 49,
        41, 33, 26, 18, 3,  11, 4,  12, 19, 27, 34, 42, 50, 58, 35, 43,
        51, 59, 20, 28, 5,  13, 6,  14, 21, 29, 36, 44, 52, 60, 37, 45,
        53, 61, 22, 30, 7,  15, 23, 31, 38, 46, 54, 62, 39, 47, 55, 63,
    ],
];

/// Default intra quantiser matrix (11172-2 2.4.3.3), natural order.
#[rustfmt::skip]
pub static DEFAULT_INTRA_QUANT: [u8; 64] = [
    8,  16, 19, 22, 26, 27, 29, 34,
    16, 16, 22, 24, 27, 29, 34, 37,
    19, 22, 26, 27, 29, 34, 34, 38,
    22, 22, 26, 27, 29, 34, 37, 40,
    22, 26, 27, 29, 32, 35, 40, 48,
    26, 27, 29, 32, 35, 40, 48, 58,
    26, 27, 29, 34, 38, 46, 56, 69,
    27, 29, 35, 38, 46, 56, 69, 83,
];

pub static DEFAULT_NONINTRA_QUANT: [u8; 64] = [16; 64];

/// quantiser_scale_code mapping (13818-2 7.4.2.2), indexed by
/// `[(!mpeg2 << 1) | q_scale_type][code]`.
#[rustfmt::skip]
pub static QUANTIZER_SCALE: [[u8; 32]; 3] = [
    /* MPEG-2, linear */
    [
        0,  2,  4,  6,  8,  10, 12, 14, 16, 18, 20, 22, 24, 26, 28, 30,
        32, 34, 36, 38, 40, 42, 44, 46, 48, 50, 52, 54, 56, 58, 60, 62,
    ],
    /* MPEG-2, non-linear */
    [
        0,  1,  2,  3,  4,  5,  6,  7,  8,  10, 12, 14, 16, 18, 20,  22,
        24, 28, 32, 36, 40, 44, 48, 52, 56, 64, 72, 80, 88, 96, 104, 112,
    ],
    /* MPEG-1 */
    [
        0,  1,  2,  3,  4,  5,  6,  7,  8,  9,  10, 11, 12, 13, 14, 15,
        16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31,
    ],
];

/// Frame rates in 1/1001 of a frame per second, by frame_rate_code.
/// Reserved codes map to 0 (the sequence is then undisplayable but the
/// parser keeps going).
pub static FRAME_RATE: [i64; 16] = [
    0,
    24 * 1000,
    24 * 1001,
    25 * 1001,
    30 * 1000,
    30 * 1001,
    50 * 1001,
    60 * 1000,
    60 * 1001,
    0,
    0,
    0,
    0,
    0,
    0,
    0,
];

/// Identifies one of the sequence's four quantiser matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixId {
    Intra,
    NonIntra,
}

/// A quantiser matrix slot: downloaded from the stream, the standard
/// default, or an alias of the corresponding luminance matrix (the rule for
/// chrominance slots that the stream leaves unspecified).
///
/// Mutation is only possible through `Owned`; a borrowed or aliased slot is
/// replaced wholesale when the stream downloads a matrix.
#[derive(Debug, Clone)]
pub enum QuantMatrix {
    Borrowed(&'static [u8; 64]),
    Owned(Box<[u8; 64]>),
    Alias(MatrixId),
}

impl QuantMatrix {
    fn direct(&self) -> Option<&[u8; 64]> {
        match self {
            QuantMatrix::Borrowed(m) => Some(m),
            QuantMatrix::Owned(m) => Some(m),
            QuantMatrix::Alias(_) => None,
        }
    }
}

/// Sequence context: everything that survives from one sequence header to
/// the next.
pub struct Sequence {
    pub width: usize,
    pub height: usize,
    pub size: usize,
    pub mb_width: usize,
    pub mb_height: usize,
    pub mb_size: usize,

    pub aspect_ratio: u32,
    pub matrix_coefficients: u32,
    /// In 1/1001 frames per second (e.g. 30000 for NTSC).
    pub frame_rate: i64,
    /// Becomes true the moment a sequence_extension is seen.
    pub mpeg2: bool,
    pub progressive: bool,
    pub scalable_mode: ScalableMode,

    pub chroma_format: ChromaFormat,
    pub chroma_nb_blocks: usize,
    pub chroma_width: usize,
    pub chroma_mb_width: usize,
    pub chroma_mb_height: usize,

    intra_quant: QuantMatrix,
    nonintra_quant: QuantMatrix,
    chroma_intra_quant: QuantMatrix,
    chroma_nonintra_quant: QuantMatrix,

    /// Reference pictures, rotated at every non-B picture header.
    pub forward: Option<PictureHandle>,
    pub backward: Option<PictureHandle>,

    /* PES hand-off, written by the bit reader's chunk boundaries. A zero
     * timestamp means "absent", as in the transport layer. */
    pub next_pts: i64,
    pub next_dts: i64,
    pub current_rate: i32,
    pub expect_discontinuity: bool,

    /* Copyright extension. */
    pub copyright_flag: bool,
    pub copyright_id: u8,
    pub original: bool,
    pub copyright_number: u64,
}

impl Default for Sequence {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            size: 0,
            mb_width: 0,
            mb_height: 0,
            mb_size: 0,
            aspect_ratio: 0,
            matrix_coefficients: 1,
            frame_rate: 0,
            mpeg2: false,
            progressive: true,
            scalable_mode: ScalableMode::None,
            chroma_format: ChromaFormat::Chroma420,
            chroma_nb_blocks: 2,
            chroma_width: 0,
            chroma_mb_width: 8,
            chroma_mb_height: 8,
            intra_quant: QuantMatrix::Borrowed(&DEFAULT_INTRA_QUANT),
            nonintra_quant: QuantMatrix::Borrowed(&DEFAULT_NONINTRA_QUANT),
            chroma_intra_quant: QuantMatrix::Alias(MatrixId::Intra),
            chroma_nonintra_quant: QuantMatrix::Alias(MatrixId::NonIntra),
            forward: None,
            backward: None,
            next_pts: 0,
            next_dts: 0,
            current_rate: 0,
            expect_discontinuity: false,
            copyright_flag: false,
            copyright_id: 0,
            original: false,
            copyright_number: 0,
        }
    }
}

impl Sequence {
    pub fn set_matrix(&mut self, id: MatrixId, chroma: bool, m: QuantMatrix) {
        match (id, chroma) {
            (MatrixId::Intra, false) => self.intra_quant = m,
            (MatrixId::NonIntra, false) => self.nonintra_quant = m,
            (MatrixId::Intra, true) => self.chroma_intra_quant = m,
            (MatrixId::NonIntra, true) => self.chroma_nonintra_quant = m,
        }
    }

    /// Resolves a matrix slot, following at most one chroma-to-luma alias.
    pub fn matrix(&self, id: MatrixId, chroma: bool) -> &[u8; 64] {
        let slot = match (id, chroma) {
            (MatrixId::Intra, false) => &self.intra_quant,
            (MatrixId::NonIntra, false) => &self.nonintra_quant,
            (MatrixId::Intra, true) => &self.chroma_intra_quant,
            (MatrixId::NonIntra, true) => &self.chroma_nonintra_quant,
        };
        match slot.direct() {
            Some(m) => m,
            /* Aliases only ever point chroma at luminance. */
            None => self.matrix(id, false),
        }
    }

    /// Recomputes the derived geometry after a (possibly extended) sequence
    /// header. Dimensions are rounded up to whole macroblocks; interlaced
    /// sequences need an even number of macroblock rows.
    pub fn update_geometry(&mut self) {
        self.mb_width = (self.width + 15) / 16;
        self.mb_height = if self.progressive {
            (self.height + 15) / 16
        } else {
            2 * ((self.height + 31) / 32)
        };
        self.mb_size = self.mb_width * self.mb_height;
        self.width = self.mb_width * 16;
        self.height = self.mb_height * 16;
        self.size = self.width * self.height;

        match self.chroma_format {
            ChromaFormat::Chroma420 => {
                self.chroma_nb_blocks = 2;
                self.chroma_width = self.width >> 1;
                self.chroma_mb_width = 8;
                self.chroma_mb_height = 8;
            }
            ChromaFormat::Chroma422 => {
                self.chroma_nb_blocks = 4;
                self.chroma_width = self.width >> 1;
                self.chroma_mb_width = 8;
                self.chroma_mb_height = 16;
            }
            ChromaFormat::Chroma444 => {
                self.chroma_nb_blocks = 8;
                self.chroma_width = self.width;
                self.chroma_mb_width = 16;
                self.chroma_mb_height = 16;
            }
        }
    }
}

/// Picture context: everything between a picture header and the completion
/// of the frame it belongs to.
pub struct Picture {
    /* MPEG-1 compatibility. */
    pub full_pel_vector: [bool; 2],
    pub forward_f_code: u32,
    pub backward_f_code: u32,

    /* picture_coding_extension (13818-2 6.3.10). */
    pub f_code: [[u32; 2]; 2],
    pub intra_dc_precision: u32,
    pub frame_pred_frame_dct: bool,
    pub q_scale_type: bool,
    pub intra_vlc_format: bool,
    pub alternate_scan: bool,
    pub progressive_frame: bool,
    pub top_field_first: bool,
    pub concealment_mv: bool,
    pub repeat_first_field: bool,

    pub coding_type: CodingType,
    pub structure: PictureStructure,
    pub frame_structure: bool,
    /// Display half-periods of the frame, for publication.
    pub repeat: u8,

    /// Output buffer under reconstruction.
    pub picture: Option<PictureHandle>,
    /// Fields of `picture` parsed so far (0, a field code, or frame).
    pub current_structure: u32,
    /// Sticky recoverable-error flag; set by any syntax error, cleared at
    /// each slice header. While set, the current slice is abandoned.
    pub error: bool,

    /// Coefficients to jump between lines; doubled for field pictures.
    pub l_stride: usize,
    pub c_stride: usize,
}

impl Default for Picture {
    fn default() -> Self {
        Self {
            full_pel_vector: [false; 2],
            forward_f_code: 1,
            backward_f_code: 1,
            f_code: [[1; 2]; 2],
            intra_dc_precision: 0,
            frame_pred_frame_dct: true,
            q_scale_type: false,
            intra_vlc_format: false,
            alternate_scan: false,
            progressive_frame: true,
            top_field_first: false,
            concealment_mv: false,
            repeat_first_field: false,
            coding_type: CodingType::I,
            structure: PictureStructure::Frame,
            frame_structure: true,
            repeat: 2,
            picture: None,
            current_structure: 0,
            error: false,
            l_stride: 0,
            c_stride: 0,
        }
    }
}

/// Macroblock-level context: predictors and position, reset per slice.
#[derive(Default)]
pub struct MacroblockContext {
    pub quantizer_scale: u8,
    /// DC predictors per colour component (13818-2 7.2.1).
    pub dc_dct_pred: [i32; 3],
    /// Motion vector predictors, `[r][s][xy]` (7.6.3).
    pub pmv: [[[i32; 2]; 2]; 2],
    /// Motion direction of the last non-skipped macroblock, replayed by
    /// skipped macroblocks in B pictures (7.6.6).
    pub motion_dir: MacroblockType,

    pub motion_type: u8,
    pub mv_count: u8,
    pub mv_format: u8,
    pub dmv: bool,
    pub dct_type: bool,

    /// Upper-left pel of the current macroblock, luma and chroma.
    pub l_x: usize,
    pub l_y: usize,
    pub c_x: usize,
    pub c_y: usize,
}

impl MacroblockContext {
    pub fn reset_dc_predictors(&mut self, intra_dc_precision: u32) {
        let v = 1 << (7 + intra_dc_precision);
        self.dc_dct_pred = [v; 3];
    }

    pub fn reset_motion_predictors(&mut self) {
        self.pmv = [[[0; 2]; 2]; 2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_tables_are_permutations() {
        for scan in &SCAN {
            let mut seen = [false; 64];
            for &pos in scan.iter() {
                assert!(!seen[pos as usize]);
                seen[pos as usize] = true;
            }
        }
    }

    #[test]
    fn scan_round_trip() {
        for scan in &SCAN {
            let mut inverse = [0u8; 64];
            for (i, &pos) in scan.iter().enumerate() {
                inverse[pos as usize] = i as u8;
            }
            for i in 0..64 {
                assert_eq!(scan[inverse[i] as usize] as usize, i);
            }
        }
    }

    #[test]
    fn field_structures_complete_a_frame() {
        assert!(PictureStructure::TopField.completes(PictureStructure::BottomField));
        assert!(PictureStructure::BottomField.completes(PictureStructure::TopField));
        assert!(!PictureStructure::TopField.completes(PictureStructure::TopField));
    }

    #[test]
    fn chroma_matrices_alias_luma_until_downloaded() {
        let mut seq = Sequence::default();
        assert_eq!(seq.matrix(MatrixId::Intra, true)[0], DEFAULT_INTRA_QUANT[0]);

        let mut m = [0u8; 64];
        m[0] = 99;
        seq.set_matrix(MatrixId::Intra, false, QuantMatrix::Owned(Box::new(m)));
        assert_eq!(seq.matrix(MatrixId::Intra, true)[0], 99);

        seq.set_matrix(MatrixId::Intra, true, QuantMatrix::Owned(Box::new([7; 64])));
        assert_eq!(seq.matrix(MatrixId::Intra, true)[0], 7);
        assert_eq!(seq.matrix(MatrixId::Intra, false)[0], 99);
    }

    #[test]
    fn interlaced_geometry_rounds_to_macroblock_pairs() {
        let mut seq = Sequence {
            width: 720,
            height: 576,
            progressive: false,
            ..Default::default()
        };
        seq.update_geometry();
        assert_eq!(seq.mb_width, 45);
        assert_eq!(seq.mb_height, 36);
        assert_eq!(seq.chroma_width, 360);
    }
}
