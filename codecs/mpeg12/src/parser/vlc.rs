//! Variable-length code tables (ISO/IEC 13818-2 annex B).
//!
//! Everything here is show-then-remove driven: the caller shows a fixed
//! window of bits, indexes a table, and removes the real code length found
//! in the entry. Short tables are written out; the large ones (macroblock
//! address increment, the two 16 384-entry DCT coefficient tables, the
//! coded_block_pattern table) are expanded once at startup from their
//! canonical code lists.

use crate::types::MacroblockType;

/// Decoded entry of a plain (value, length) lookup table. A length of zero
/// marks an invalid code.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lookup {
    pub value: i32,
    pub length: u32,
}

impl Lookup {
    const ERROR: Lookup = Lookup {
        value: -1,
        length: 0,
    };

    const fn new(value: i32, length: u32) -> Self {
        Self { value, length }
    }

    pub fn is_error(self) -> bool {
        self.length == 0
    }
}

/// Entry of a DCT coefficient table: (run, level, code length) with the two
/// sentinel runs below.
#[derive(Debug, Clone, Copy, Default)]
pub struct DctLookup {
    pub run: u8,
    pub level: u8,
    pub length: u8,
}

pub const DCT_EOB: u8 = 64;
pub const DCT_ESCAPE: u8 = 65;

const fn dct(run: u8, level: u8, length: u8) -> DctLookup {
    DctLookup { run, level, length }
}

/// macroblock_address_increment escape (B.1): adds 33 and restarts.
pub const MB_ADDRINC_ESCAPE: i32 = 34;
/// MPEG-1 macroblock_stuffing (B.1): consumed and ignored.
pub const MB_ADDRINC_STUFFING: i32 = 35;

lazy_static! {
    /// Table B.1, indexed by an 11-bit window.
    pub static ref MB_ADDR_INC: Box<[Lookup; 2048]> = build_mb_addr_inc();
}

fn fill_mb_addr_inc(
    table: &mut [Lookup; 2048],
    start: usize,
    end: usize,
    step: usize,
    value: &mut i32,
    length: u32,
) {
    let mut pos = start;
    while pos < end {
        for offset in 0..step {
            table[pos + offset] = Lookup::new(*value, length);
        }
        *value -= 1;
        pos += step;
    }
}

fn build_mb_addr_inc() -> Box<[Lookup; 2048]> {
    let mut table = Box::new([Lookup::ERROR; 2048]);

    table[8] = Lookup::new(MB_ADDRINC_ESCAPE, 11);
    table[15] = Lookup::new(MB_ADDRINC_STUFFING, 11);

    let mut value = 33;
    fill_mb_addr_inc(&mut table, 24, 36, 1, &mut value, 11);
    fill_mb_addr_inc(&mut table, 36, 48, 2, &mut value, 10);
    fill_mb_addr_inc(&mut table, 48, 96, 8, &mut value, 8);
    fill_mb_addr_inc(&mut table, 96, 128, 16, &mut value, 7);
    fill_mb_addr_inc(&mut table, 128, 256, 64, &mut value, 5);
    fill_mb_addr_inc(&mut table, 256, 512, 128, &mut value, 4);
    fill_mb_addr_inc(&mut table, 512, 1024, 256, &mut value, 3);
    fill_mb_addr_inc(&mut table, 1024, 2048, 1024, &mut value, 1);

    table
}

/// Decoded macroblock_type entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct MbTypeLookup {
    pub mb_type: MacroblockType,
    pub length: u32,
}

const fn mbt(mb_type: MacroblockType, length: u32) -> MbTypeLookup {
    MbTypeLookup { mb_type, length }
}

/// Table B.2: macroblock_type in I pictures, indexed by 2 bits.
pub static I_MB_TYPE: [MbTypeLookup; 4] = [
    mbt(MacroblockType::empty(), 0),
    mbt(
        MacroblockType::QUANT.union(MacroblockType::INTRA),
        2,
    ),
    mbt(MacroblockType::INTRA, 1),
    mbt(MacroblockType::INTRA, 1),
];

lazy_static! {
    /// Table B.3: macroblock_type in P pictures, indexed by 6 bits.
    pub static ref P_MB_TYPE: [MbTypeLookup; 64] = build_p_mb_type();
    /// Table B.4: macroblock_type in B pictures, indexed by 6 bits.
    pub static ref B_MB_TYPE: [MbTypeLookup; 64] = build_b_mb_type();
}

fn fill_mb_type(
    table: &mut [MbTypeLookup; 64],
    start: usize,
    end: usize,
    mb_type: MacroblockType,
    length: u32,
) {
    for entry in &mut table[start..end] {
        *entry = mbt(mb_type, length);
    }
}

fn build_p_mb_type() -> [MbTypeLookup; 64] {
    use MacroblockType as M;
    let mut t = [mbt(M::empty(), 0); 64];
    fill_mb_type(&mut t, 32, 64, M::MOTION_FORWARD | M::PATTERN, 1);
    fill_mb_type(&mut t, 16, 32, M::PATTERN, 2);
    fill_mb_type(&mut t, 8, 16, M::MOTION_FORWARD, 3);
    fill_mb_type(&mut t, 6, 8, M::INTRA, 5);
    fill_mb_type(&mut t, 4, 6, M::QUANT | M::MOTION_FORWARD | M::PATTERN, 5);
    fill_mb_type(&mut t, 2, 4, M::QUANT | M::PATTERN, 5);
    t[1] = mbt(M::QUANT | M::INTRA, 6);
    t
}

fn build_b_mb_type() -> [MbTypeLookup; 64] {
    use MacroblockType as M;
    let mut t = [mbt(M::empty(), 0); 64];
    fill_mb_type(
        &mut t,
        48,
        64,
        M::MOTION_FORWARD | M::MOTION_BACKWARD | M::PATTERN,
        2,
    );
    fill_mb_type(&mut t, 32, 48, M::MOTION_FORWARD | M::MOTION_BACKWARD, 2);
    fill_mb_type(&mut t, 24, 32, M::MOTION_BACKWARD | M::PATTERN, 3);
    fill_mb_type(&mut t, 16, 24, M::MOTION_BACKWARD, 3);
    fill_mb_type(&mut t, 12, 16, M::MOTION_FORWARD | M::PATTERN, 4);
    fill_mb_type(&mut t, 8, 12, M::MOTION_FORWARD, 4);
    fill_mb_type(&mut t, 6, 8, M::INTRA, 5);
    fill_mb_type(
        &mut t,
        4,
        6,
        M::QUANT | M::MOTION_FORWARD | M::MOTION_BACKWARD | M::PATTERN,
        5,
    );
    t[3] = mbt(M::QUANT | M::MOTION_FORWARD | M::PATTERN, 6);
    t[2] = mbt(M::QUANT | M::MOTION_BACKWARD | M::PATTERN, 6);
    t[1] = mbt(M::QUANT | M::INTRA, 6);
    t
}

/// Canonical table B.9: (coded_block_pattern, code, code length).
#[rustfmt::skip]
static CBP_CODES: [(u16, u16, u32); 64] = [
    (60, 0b111, 3),
    (32, 0b1010, 4), (16, 0b1011, 4), (8, 0b1100, 4), (4, 0b1101, 4),
    (62, 0b01000, 5), (2, 0b01001, 5), (61, 0b01010, 5), (1, 0b01011, 5),
    (56, 0b01100, 5), (52, 0b01101, 5), (44, 0b01110, 5), (28, 0b01111, 5),
    (40, 0b10000, 5), (20, 0b10001, 5), (48, 0b10010, 5), (12, 0b10011, 5),
    (63, 0b001100, 6), (3, 0b001101, 6), (36, 0b001110, 6), (24, 0b001111, 6),
    (34, 0b0010000, 7), (18, 0b0010001, 7), (10, 0b0010010, 7), (6, 0b0010011, 7),
    (33, 0b0010100, 7), (17, 0b0010101, 7), (9, 0b0010110, 7), (5, 0b0010111, 7),
    (58, 0b00000100, 8), (54, 0b00000101, 8), (46, 0b00000110, 8), (30, 0b00000111, 8),
    (57, 0b00001000, 8), (53, 0b00001001, 8), (45, 0b00001010, 8), (29, 0b00001011, 8),
    (38, 0b00001100, 8), (26, 0b00001101, 8), (37, 0b00001110, 8), (25, 0b00001111, 8),
    (43, 0b00010000, 8), (23, 0b00010001, 8), (51, 0b00010010, 8), (15, 0b00010011, 8),
    (42, 0b00010100, 8), (22, 0b00010101, 8), (50, 0b00010110, 8), (14, 0b00010111, 8),
    (41, 0b00011000, 8), (21, 0b00011001, 8), (49, 0b00011010, 8), (13, 0b00011011, 8),
    (35, 0b00011100, 8), (19, 0b00011101, 8), (11, 0b00011110, 8), (7, 0b00011111, 8),
    (0, 0b000000001, 9), (39, 0b000000010, 9), (27, 0b000000011, 9),
    (59, 0b000000100, 9), (55, 0b000000101, 9), (47, 0b000000110, 9),
    (31, 0b000000111, 9),
];

lazy_static! {
    /// Table B.9, indexed by a 9-bit window.
    pub static ref CODED_PATTERN: Box<[Lookup; 512]> = {
        let mut table = Box::new([Lookup::ERROR; 512]);
        for &(cbp, code, length) in CBP_CODES.iter() {
            let span = 1usize << (9 - length);
            let base = (code as usize) << (9 - length);
            for entry in &mut table[base..base + span] {
                *entry = Lookup::new(cbp as i32, length);
            }
        }
        table
    };
}

/* Tables B.12/B.13, dct_dc_size, split in two to keep the windows small:
 * a 5-bit window for the short codes, and a 9- (luma) or 10-bit (chroma)
 * window for codes starting 11111. Outer index: 0 = luminance,
 * 1 = chrominance. */

#[rustfmt::skip]
pub static DCT_DC_SIZE_SHORT: [[Lookup; 32]; 2] = [
    [
        Lookup::new(1, 2), Lookup::new(1, 2), Lookup::new(1, 2), Lookup::new(1, 2),
        Lookup::new(1, 2), Lookup::new(1, 2), Lookup::new(1, 2), Lookup::new(1, 2),
        Lookup::new(2, 2), Lookup::new(2, 2), Lookup::new(2, 2), Lookup::new(2, 2),
        Lookup::new(2, 2), Lookup::new(2, 2), Lookup::new(2, 2), Lookup::new(2, 2),
        Lookup::new(0, 3), Lookup::new(0, 3), Lookup::new(0, 3), Lookup::new(0, 3),
        Lookup::new(3, 3), Lookup::new(3, 3), Lookup::new(3, 3), Lookup::new(3, 3),
        Lookup::new(4, 3), Lookup::new(4, 3), Lookup::new(4, 3), Lookup::new(4, 3),
        Lookup::new(5, 4), Lookup::new(5, 4), Lookup::new(6, 5), Lookup::ERROR,
    ],
    [
        Lookup::new(0, 2), Lookup::new(0, 2), Lookup::new(0, 2), Lookup::new(0, 2),
        Lookup::new(0, 2), Lookup::new(0, 2), Lookup::new(0, 2), Lookup::new(0, 2),
        Lookup::new(1, 2), Lookup::new(1, 2), Lookup::new(1, 2), Lookup::new(1, 2),
        Lookup::new(1, 2), Lookup::new(1, 2), Lookup::new(1, 2), Lookup::new(1, 2),
        Lookup::new(2, 2), Lookup::new(2, 2), Lookup::new(2, 2), Lookup::new(2, 2),
        Lookup::new(2, 2), Lookup::new(2, 2), Lookup::new(2, 2), Lookup::new(2, 2),
        Lookup::new(3, 3), Lookup::new(3, 3), Lookup::new(3, 3), Lookup::new(3, 3),
        Lookup::new(4, 4), Lookup::new(4, 4), Lookup::new(5, 5), Lookup::ERROR,
    ],
];

#[rustfmt::skip]
pub static DCT_DC_SIZE_LONG: [[Lookup; 32]; 2] = [
    [
        Lookup::new(7, 6), Lookup::new(7, 6), Lookup::new(7, 6), Lookup::new(7, 6),
        Lookup::new(7, 6), Lookup::new(7, 6), Lookup::new(7, 6), Lookup::new(7, 6),
        Lookup::new(8, 7), Lookup::new(8, 7), Lookup::new(8, 7), Lookup::new(8, 7),
        Lookup::new(9, 8), Lookup::new(9, 8), Lookup::new(10, 9), Lookup::new(11, 9),
        Lookup::ERROR, Lookup::ERROR, Lookup::ERROR, Lookup::ERROR,
        Lookup::ERROR, Lookup::ERROR, Lookup::ERROR, Lookup::ERROR,
        Lookup::ERROR, Lookup::ERROR, Lookup::ERROR, Lookup::ERROR,
        Lookup::ERROR, Lookup::ERROR, Lookup::ERROR, Lookup::ERROR,
    ],
    [
        Lookup::new(6, 6), Lookup::new(6, 6), Lookup::new(6, 6), Lookup::new(6, 6),
        Lookup::new(6, 6), Lookup::new(6, 6), Lookup::new(6, 6), Lookup::new(6, 6),
        Lookup::new(6, 6), Lookup::new(6, 6), Lookup::new(6, 6), Lookup::new(6, 6),
        Lookup::new(6, 6), Lookup::new(6, 6), Lookup::new(6, 6), Lookup::new(6, 6),
        Lookup::new(7, 7), Lookup::new(7, 7), Lookup::new(7, 7), Lookup::new(7, 7),
        Lookup::new(7, 7), Lookup::new(7, 7), Lookup::new(7, 7), Lookup::new(7, 7),
        Lookup::new(8, 8), Lookup::new(8, 8), Lookup::new(8, 8), Lookup::new(8, 8),
        Lookup::new(9, 9), Lookup::new(9, 9), Lookup::new(10, 10), Lookup::new(11, 10),
    ],
];

/* DCT coefficient tables B.14 and B.15, as the union of one "high" table
 * indexed by the top 4 (or 8) bits for codes shorter than 6 bits, and one
 * built table indexed by a 16-bit window for the rest. */

/// Table B.14 high codes, first coefficient variant: `1s` means level 1.
pub static DCT_TAB_DC: [DctLookup; 12] = [
    dct(0, 2, 4), dct(2, 1, 4), dct(1, 1, 3), dct(1, 1, 3),
    dct(0, 1, 1), dct(0, 1, 1), dct(0, 1, 1), dct(0, 1, 1),
    dct(0, 1, 1), dct(0, 1, 1), dct(0, 1, 1), dct(0, 1, 1),
];

/// Table B.14 high codes, subsequent coefficients: `10` is end of block.
pub static DCT_TAB_AC: [DctLookup; 12] = [
    dct(0, 2, 4), dct(2, 1, 4), dct(1, 1, 3), dct(1, 1, 3),
    dct(DCT_EOB, 0, 2), dct(DCT_EOB, 0, 2), dct(DCT_EOB, 0, 2), dct(DCT_EOB, 0, 2),
    dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2),
];

/// Table B.14, codes 000001xx .. 00111xxx (6-8 bits), top-8-bit index 4..63.
#[rustfmt::skip]
static DCT_TAB0: [DctLookup; 60] = [
    dct(DCT_ESCAPE, 0, 6), dct(DCT_ESCAPE, 0, 6), dct(DCT_ESCAPE, 0, 6), dct(DCT_ESCAPE, 0, 6),
    dct(2, 2, 7), dct(2, 2, 7), dct(9, 1, 7), dct(9, 1, 7),
    dct(0, 4, 7), dct(0, 4, 7), dct(8, 1, 7), dct(8, 1, 7),
    dct(7, 1, 6), dct(7, 1, 6), dct(7, 1, 6), dct(7, 1, 6),
    dct(6, 1, 6), dct(6, 1, 6), dct(6, 1, 6), dct(6, 1, 6),
    dct(1, 2, 6), dct(1, 2, 6), dct(1, 2, 6), dct(1, 2, 6),
    dct(5, 1, 6), dct(5, 1, 6), dct(5, 1, 6), dct(5, 1, 6),
    dct(13, 1, 8), dct(0, 6, 8), dct(12, 1, 8), dct(11, 1, 8),
    dct(3, 2, 8), dct(1, 3, 8), dct(0, 5, 8), dct(10, 1, 8),
    dct(0, 3, 5), dct(0, 3, 5), dct(0, 3, 5), dct(0, 3, 5),
    dct(0, 3, 5), dct(0, 3, 5), dct(0, 3, 5), dct(0, 3, 5),
    dct(4, 1, 5), dct(4, 1, 5), dct(4, 1, 5), dct(4, 1, 5),
    dct(4, 1, 5), dct(4, 1, 5), dct(4, 1, 5), dct(4, 1, 5),
    dct(3, 1, 5), dct(3, 1, 5), dct(3, 1, 5), dct(3, 1, 5),
    dct(3, 1, 5), dct(3, 1, 5), dct(3, 1, 5), dct(3, 1, 5),
];

/// Table B.15, codes 000001xx .. 11111111 (2-8 bits), top-8-bit index 4..255.
#[rustfmt::skip]
pub static DCT_TAB0A: [DctLookup; 252] = [
    dct(DCT_ESCAPE, 0, 6), dct(DCT_ESCAPE, 0, 6), dct(DCT_ESCAPE, 0, 6), dct(DCT_ESCAPE, 0, 6),
    dct(7, 1, 7), dct(7, 1, 7), dct(8, 1, 7), dct(8, 1, 7),
    dct(6, 1, 7), dct(6, 1, 7), dct(2, 2, 7), dct(2, 2, 7),
    dct(0, 7, 6), dct(0, 7, 6), dct(0, 7, 6), dct(0, 7, 6),
    dct(0, 6, 6), dct(0, 6, 6), dct(0, 6, 6), dct(0, 6, 6),
    dct(4, 1, 6), dct(4, 1, 6), dct(4, 1, 6), dct(4, 1, 6),
    dct(5, 1, 6), dct(5, 1, 6), dct(5, 1, 6), dct(5, 1, 6),
    dct(1, 5, 8), dct(11, 1, 8), dct(0, 11, 8), dct(0, 10, 8),
    dct(13, 1, 8), dct(12, 1, 8), dct(3, 2, 8), dct(1, 4, 8),
    dct(2, 1, 5), dct(2, 1, 5), dct(2, 1, 5), dct(2, 1, 5),
    dct(2, 1, 5), dct(2, 1, 5), dct(2, 1, 5), dct(2, 1, 5),
    dct(1, 2, 5), dct(1, 2, 5), dct(1, 2, 5), dct(1, 2, 5),
    dct(1, 2, 5), dct(1, 2, 5), dct(1, 2, 5), dct(1, 2, 5),
    dct(3, 1, 5), dct(3, 1, 5), dct(3, 1, 5), dct(3, 1, 5),
    dct(3, 1, 5), dct(3, 1, 5), dct(3, 1, 5), dct(3, 1, 5),
    dct(1, 1, 3), dct(1, 1, 3), dct(1, 1, 3), dct(1, 1, 3),
    dct(1, 1, 3), dct(1, 1, 3), dct(1, 1, 3), dct(1, 1, 3),
    dct(1, 1, 3), dct(1, 1, 3), dct(1, 1, 3), dct(1, 1, 3),
    dct(1, 1, 3), dct(1, 1, 3), dct(1, 1, 3), dct(1, 1, 3),
    dct(1, 1, 3), dct(1, 1, 3), dct(1, 1, 3), dct(1, 1, 3),
    dct(1, 1, 3), dct(1, 1, 3), dct(1, 1, 3), dct(1, 1, 3),
    dct(1, 1, 3), dct(1, 1, 3), dct(1, 1, 3), dct(1, 1, 3),
    dct(1, 1, 3), dct(1, 1, 3), dct(1, 1, 3), dct(1, 1, 3),
    dct(DCT_EOB, 0, 4), dct(DCT_EOB, 0, 4), dct(DCT_EOB, 0, 4), dct(DCT_EOB, 0, 4),
    dct(DCT_EOB, 0, 4), dct(DCT_EOB, 0, 4), dct(DCT_EOB, 0, 4), dct(DCT_EOB, 0, 4),
    dct(DCT_EOB, 0, 4), dct(DCT_EOB, 0, 4), dct(DCT_EOB, 0, 4), dct(DCT_EOB, 0, 4),
    dct(DCT_EOB, 0, 4), dct(DCT_EOB, 0, 4), dct(DCT_EOB, 0, 4), dct(DCT_EOB, 0, 4),
    dct(0, 3, 4), dct(0, 3, 4), dct(0, 3, 4), dct(0, 3, 4),
    dct(0, 3, 4), dct(0, 3, 4), dct(0, 3, 4), dct(0, 3, 4),
    dct(0, 3, 4), dct(0, 3, 4), dct(0, 3, 4), dct(0, 3, 4),
    dct(0, 3, 4), dct(0, 3, 4), dct(0, 3, 4), dct(0, 3, 4),
    dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2),
    dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2),
    dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2),
    dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2),
    dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2),
    dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2),
    dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2),
    dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2),
    dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2),
    dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2),
    dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2),
    dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2),
    dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2),
    dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2),
    dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2),
    dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2), dct(0, 1, 2),
    dct(0, 2, 3), dct(0, 2, 3), dct(0, 2, 3), dct(0, 2, 3),
    dct(0, 2, 3), dct(0, 2, 3), dct(0, 2, 3), dct(0, 2, 3),
    dct(0, 2, 3), dct(0, 2, 3), dct(0, 2, 3), dct(0, 2, 3),
    dct(0, 2, 3), dct(0, 2, 3), dct(0, 2, 3), dct(0, 2, 3),
    dct(0, 2, 3), dct(0, 2, 3), dct(0, 2, 3), dct(0, 2, 3),
    dct(0, 2, 3), dct(0, 2, 3), dct(0, 2, 3), dct(0, 2, 3),
    dct(0, 2, 3), dct(0, 2, 3), dct(0, 2, 3), dct(0, 2, 3),
    dct(0, 2, 3), dct(0, 2, 3), dct(0, 2, 3), dct(0, 2, 3),
    dct(0, 4, 5), dct(0, 4, 5), dct(0, 4, 5), dct(0, 4, 5),
    dct(0, 4, 5), dct(0, 4, 5), dct(0, 4, 5), dct(0, 4, 5),
    dct(0, 5, 5), dct(0, 5, 5), dct(0, 5, 5), dct(0, 5, 5),
    dct(0, 5, 5), dct(0, 5, 5), dct(0, 5, 5), dct(0, 5, 5),
    dct(9, 1, 7), dct(9, 1, 7), dct(1, 3, 7), dct(1, 3, 7),
    dct(10, 1, 7), dct(10, 1, 7), dct(0, 8, 7), dct(0, 8, 7),
    dct(0, 9, 7), dct(0, 9, 7), dct(0, 12, 8), dct(0, 13, 8),
    dct(2, 3, 8), dct(4, 2, 8), dct(0, 14, 8), dct(0, 15, 8),
];

/// Table B.14, codes 0000001000 .. 0000001111 (10 bits).
static DCT_TAB1: [DctLookup; 8] = [
    dct(16, 1, 10), dct(5, 2, 10), dct(0, 7, 10), dct(2, 3, 10),
    dct(1, 4, 10), dct(15, 1, 10), dct(14, 1, 10), dct(4, 2, 10),
];

/// Table B.15, codes 000000100x .. 000000111x (9-10 bits).
static DCT_TAB1A: [DctLookup; 8] = [
    dct(5, 2, 9), dct(5, 2, 9), dct(14, 1, 9), dct(14, 1, 9),
    dct(2, 4, 10), dct(16, 1, 10), dct(15, 1, 9), dct(15, 1, 9),
];

/// Tables B.14/B.15, codes 000000010000 .. 000000011111 (12 bits).
static DCT_TAB2: [DctLookup; 16] = [
    dct(0, 11, 12), dct(8, 2, 12), dct(4, 3, 12), dct(0, 10, 12),
    dct(2, 4, 12), dct(7, 2, 12), dct(21, 1, 12), dct(20, 1, 12),
    dct(0, 9, 12), dct(19, 1, 12), dct(18, 1, 12), dct(1, 5, 12),
    dct(3, 3, 12), dct(0, 8, 12), dct(6, 2, 12), dct(17, 1, 12),
];

/// Tables B.14/B.15, 13-bit codes.
static DCT_TAB3: [DctLookup; 16] = [
    dct(10, 2, 13), dct(9, 2, 13), dct(5, 3, 13), dct(3, 4, 13),
    dct(2, 5, 13), dct(1, 7, 13), dct(1, 6, 13), dct(0, 15, 13),
    dct(0, 14, 13), dct(0, 13, 13), dct(0, 12, 13), dct(26, 1, 13),
    dct(25, 1, 13), dct(24, 1, 13), dct(23, 1, 13), dct(22, 1, 13),
];

/// Tables B.14/B.15, 14-bit codes.
static DCT_TAB4: [DctLookup; 16] = [
    dct(0, 31, 14), dct(0, 30, 14), dct(0, 29, 14), dct(0, 28, 14),
    dct(0, 27, 14), dct(0, 26, 14), dct(0, 25, 14), dct(0, 24, 14),
    dct(0, 23, 14), dct(0, 22, 14), dct(0, 21, 14), dct(0, 20, 14),
    dct(0, 19, 14), dct(0, 18, 14), dct(0, 17, 14), dct(0, 16, 14),
];

/// Tables B.14/B.15, 15-bit codes.
static DCT_TAB5: [DctLookup; 16] = [
    dct(0, 40, 15), dct(0, 39, 15), dct(0, 38, 15), dct(0, 37, 15),
    dct(0, 36, 15), dct(0, 35, 15), dct(0, 34, 15), dct(0, 33, 15),
    dct(0, 32, 15), dct(1, 14, 15), dct(1, 13, 15), dct(1, 12, 15),
    dct(1, 11, 15), dct(1, 10, 15), dct(1, 9, 15), dct(1, 8, 15),
];

/// Tables B.14/B.15, 16-bit codes.
static DCT_TAB6: [DctLookup; 16] = [
    dct(1, 18, 16), dct(1, 17, 16), dct(1, 16, 16), dct(1, 15, 16),
    dct(6, 3, 16), dct(16, 2, 16), dct(15, 2, 16), dct(14, 2, 16),
    dct(13, 2, 16), dct(12, 2, 16), dct(11, 2, 16), dct(31, 1, 16),
    dct(30, 1, 16), dct(29, 1, 16), dct(28, 1, 16), dct(27, 1, 16),
];

fn fill_dct_table(dest: &mut [DctLookup], src: &[DctLookup], step: usize, offset: usize) {
    for (i, &entry) in src.iter().enumerate() {
        let base = (i + offset) * step;
        for slot in &mut dest[base..base + step] {
            *slot = entry;
        }
    }
}

fn build_dct_coef(
    tab0: &[DctLookup],
    tab1: &[DctLookup],
) -> Box<[DctLookup; 16384]> {
    let mut table: Box<[DctLookup; 16384]> =
        vec![DctLookup::default(); 16384].into_boxed_slice().try_into().unwrap();
    fill_dct_table(&mut table[..], tab0, 256, 4);
    fill_dct_table(&mut table[..], tab1, 64, 8);
    fill_dct_table(&mut table[..], &DCT_TAB2, 16, 16);
    fill_dct_table(&mut table[..], &DCT_TAB3, 8, 16);
    fill_dct_table(&mut table[..], &DCT_TAB4, 4, 16);
    fill_dct_table(&mut table[..], &DCT_TAB5, 2, 16);
    fill_dct_table(&mut table[..], &DCT_TAB6, 1, 16);
    table
}

lazy_static! {
    /// Low codes of table B.14, indexed by the 16-bit window when it is
    /// below 16384.
    pub static ref DCT_COEF_B14: Box<[DctLookup; 16384]> =
        build_dct_coef(&DCT_TAB0, &DCT_TAB1);
    /// Low codes of table B.15, same indexing. Only the first 60 entries of
    /// the high table fall below the 16384 boundary; the rest are reached
    /// through the short-code path.
    pub static ref DCT_COEF_B15: Box<[DctLookup; 16384]> =
        build_dct_coef(&DCT_TAB0A[..60], &DCT_TAB1A);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mb_addr_inc_spot_values() {
        // '1' -> 1, '011' -> 2, '010' -> 3, '0011' -> 4, '0000 0111' -> 8.
        assert_eq!(MB_ADDR_INC[0b1_000_000_0000].value, 1);
        assert_eq!(MB_ADDR_INC[0b1_000_000_0000].length, 1);
        assert_eq!(MB_ADDR_INC[0b011_00_000_000].value, 2);
        assert_eq!(MB_ADDR_INC[0b010_00_000_000].value, 3);
        assert_eq!(MB_ADDR_INC[0b0011_0000_000].value, 4);
        assert_eq!(MB_ADDR_INC[0b0000_1110_000].value, 8);
        assert_eq!(MB_ADDR_INC[0b0000_1110_000].length, 7);
        assert_eq!(MB_ADDR_INC[0b0000_0111_000].value, 14);
        assert_eq!(MB_ADDR_INC[0b0000_0111_000].length, 8);
        // Longest codes: '0000 0011 000' -> 33.
        assert_eq!(MB_ADDR_INC[0b0000_0011_000].value, 33);
        assert_eq!(MB_ADDR_INC[0b0000_0011_000].length, 11);
        assert_eq!(MB_ADDR_INC[8].value, MB_ADDRINC_ESCAPE);
        assert_eq!(MB_ADDR_INC[15].value, MB_ADDRINC_STUFFING);
        assert!(MB_ADDR_INC[0].is_error());
    }

    #[test]
    fn p_mb_type_spot_values() {
        use MacroblockType as M;
        // '1' -> MC coded (B.3).
        assert_eq!(P_MB_TYPE[0b100000].mb_type, M::MOTION_FORWARD | M::PATTERN);
        assert_eq!(P_MB_TYPE[0b100000].length, 1);
        // '001' -> MC not coded.
        assert_eq!(P_MB_TYPE[0b001000].mb_type, M::MOTION_FORWARD);
        assert_eq!(P_MB_TYPE[0b001000].length, 3);
        // '0001 1' -> intra.
        assert_eq!(P_MB_TYPE[0b000110].mb_type, M::INTRA);
        assert_eq!(P_MB_TYPE[0b000001].mb_type, M::QUANT | M::INTRA);
        assert_eq!(P_MB_TYPE[0].length, 0);
    }

    #[test]
    fn b_mb_type_spot_values() {
        use MacroblockType as M;
        assert_eq!(
            B_MB_TYPE[0b110000].mb_type,
            M::MOTION_FORWARD | M::MOTION_BACKWARD | M::PATTERN
        );
        assert_eq!(B_MB_TYPE[0b100000].mb_type, M::MOTION_FORWARD | M::MOTION_BACKWARD);
        assert_eq!(B_MB_TYPE[0b010000].mb_type, M::MOTION_BACKWARD);
        assert_eq!(B_MB_TYPE[0b011000].mb_type, M::MOTION_BACKWARD | M::PATTERN);
        assert_eq!(B_MB_TYPE[0b000110].mb_type, M::INTRA);
    }

    #[test]
    fn coded_pattern_covers_all_values_once() {
        let mut seen = [false; 64];
        for &(cbp, _, _) in CBP_CODES.iter() {
            assert!(!seen[cbp as usize], "cbp {} duplicated", cbp);
            seen[cbp as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
        // '111' -> 60, '000000001' -> 0, '01011' -> 1 (B.9).
        assert_eq!(CODED_PATTERN[0b111_000_000].value, 60);
        assert_eq!(CODED_PATTERN[0b111_000_000].length, 3);
        assert_eq!(CODED_PATTERN[0b000_000_001].value, 0);
        assert_eq!(CODED_PATTERN[0b000_000_001].length, 9);
        assert_eq!(CODED_PATTERN[0b010_110_000].value, 1);
        assert!(CODED_PATTERN[0].is_error());
    }

    #[test]
    fn dct_coef_tables_have_no_gaps_above_16() {
        // Indices below 16 (first four bits zero, fifth nibble < 1) are
        // genuinely invalid codes; everything else must decode.
        for table in [&*DCT_COEF_B14, &*DCT_COEF_B15] {
            for (i, entry) in table.iter().enumerate() {
                if i >= 16 {
                    assert_ne!(entry.length, 0, "index {:#06x} unset", i);
                }
            }
        }
    }

    #[test]
    fn dct_coef_spot_values() {
        // B.14: '0100' (run 0, level 2) and '011' (run 1, level 1) sit in
        // the high table, indexed by the top 4 bits minus 4.
        assert_eq!(DCT_TAB_AC[0b0100 - 4].run, 0);
        assert_eq!(DCT_TAB_AC[0b0100 - 4].level, 2);
        assert_eq!(DCT_TAB_AC[0b0110 - 4].run, 1);
        assert_eq!(DCT_TAB_AC[0b0110 - 4].level, 1);
        // B.14: '0010 0001 s' is run 0 level 6 (length 8).
        let e = DCT_COEF_B14[0b0010_0001_0000_0000];
        assert_eq!((e.run, e.level, e.length), (0, 6, 8));
        // B.14: escape prefix '0000 01'.
        let e = DCT_COEF_B14[0b0000_0100_0000_0000];
        assert_eq!(e.run, DCT_ESCAPE);
        assert_eq!(e.length, 6);
        // B.15: '0110' is EOB; codes starting 01.. go through the high
        // table, indexed by the top 8 bits minus 4.
        assert_eq!(DCT_TAB0A[0b0110_0000 - 4].run, DCT_EOB);
        assert_eq!(DCT_TAB0A[0b0110_0000 - 4].length, 4);
        // Shared 16-bit tail: '0000 0000 0001 0000' -> run 1 level 18.
        let e = DCT_COEF_B14[0b0000_0000_0001_0000];
        assert_eq!((e.run, e.level, e.length), (1, 18, 16));
        let e = DCT_COEF_B15[0b0000_0000_0001_0000];
        assert_eq!((e.run, e.level, e.length), (1, 18, 16));
    }
}
