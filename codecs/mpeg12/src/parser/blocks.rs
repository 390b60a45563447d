//! DCT coefficient decoding: run/level expansion, inverse quantisation,
//! saturation, MPEG-2 mismatch control, and the sparse-versus-full IDCT
//! choice. Four pathways — {MPEG-1, MPEG-2} x {intra, non-intra} — plus the
//! intra DC differentials, all writing natural-order coefficients straight
//! into the macroblock record.
//!
//! These are free functions over the split-out parser state so the caller
//! can hold the record and the reader at the same time.

use super::vlc::{self, DCT_EOB, DCT_ESCAPE};
use crate::bitreader::BitReader;
use crate::decoder::{BlockRecord, IdctSelect};
use crate::error::Result;
use crate::types::{MacroblockContext, Picture, Sequence, MatrixId, SCAN};

fn saturate(value: i32) -> i32 {
    value.clamp(-2048, 2047)
}

/// dct_dc_size (tables B.12/B.13) plus the differential, folded into the
/// per-component predictor.
fn dc_coefficient(reader: &mut BitReader, chroma: bool) -> Result<Option<i32>> {
    let chroma_index = chroma as usize;
    let code = reader.show(5)? as usize;
    let entry = if code < 31 {
        vlc::DCT_DC_SIZE_SHORT[chroma_index][code]
    } else {
        let window = reader.show(9 + chroma as u32)? as usize;
        vlc::DCT_DC_SIZE_LONG[chroma_index][window - 0x1F0 * (chroma_index + 1)]
    };
    if entry.is_error() {
        return Ok(None);
    }
    reader.remove(entry.length)?;

    let size = entry.value as u32;
    let diff = if size == 0 {
        0
    } else {
        let raw = reader.get::<i32>(size)?;
        if raw & (1 << (size - 1)) == 0 {
            raw - ((1 << size) - 1)
        } else {
            raw
        }
    };

    Ok(Some(diff))
}

/// Settles the block's IDCT choice at end of block.
fn select_idct(block: &mut BlockRecord, nonzero: u32, last_pos: usize) {
    block.select = if nonzero <= 1 {
        IdctSelect::Sparse(last_pos as u8)
    } else {
        IdctSelect::Full
    };
}

/// MPEG-1 escape level: 8 bits, with a second byte for the two extreme
/// values.
fn mpeg1_escape_level(reader: &mut BitReader) -> Result<i32> {
    let mut level = reader.get::<i32>(8)?;
    if level == 0 {
        level = reader.get::<i32>(8)?;
    } else if level == 128 {
        level = reader.get::<i32>(8)? - 256;
    } else if level > 128 {
        level -= 256;
    }
    Ok(level)
}

pub(super) fn decode_mpeg1_nonintra(
    reader: &mut BitReader,
    mb: &MacroblockContext,
    picture: &mut Picture,
    sequence: &Sequence,
    block: &mut BlockRecord,
    chroma: bool,
) -> Result<()> {
    let quant = sequence.matrix(MatrixId::NonIntra, chroma);
    let scan = &SCAN[picture.alternate_scan as usize];
    let q_scale = i32::from(mb.quantizer_scale);

    let mut nonzero = 0u32;
    let mut last_pos = 0usize;
    let mut index: i32 = 0;

    loop {
        let code = reader.show(16)?;
        let entry = if code >= 16384 {
            if index == 0 {
                vlc::DCT_TAB_DC[(code >> 12) as usize - 4]
            } else {
                vlc::DCT_TAB_AC[(code >> 12) as usize - 4]
            }
        } else {
            vlc::DCT_COEF_B14[code as usize]
        };
        if entry.length == 0 {
            tracing::warn!("invalid DCT coefficient code (non-intra)");
            picture.error = true;
            return Ok(());
        }
        reader.remove(entry.length as u32)?;

        let (run, mut level, sign);
        match entry.run {
            DCT_ESCAPE => {
                run = reader.get::<i32>(6)?;
                level = mpeg1_escape_level(reader)?;
                sign = level < 0;
                level = level.abs();
            }
            DCT_EOB => {
                select_idct(block, nonzero, last_pos);
                return Ok(());
            }
            _ => {
                run = i32::from(entry.run);
                level = i32::from(entry.level);
                sign = reader.get_flag()?;
            }
        }

        index += run;
        if index >= 64 {
            tracing::warn!("DCT coefficient index out of bounds (non-intra)");
            picture.error = true;
            return Ok(());
        }

        let pos = scan[index as usize] as usize;
        let mut value = (((level << 1) + 1) * q_scale * i32::from(quant[pos])) >> 4;
        /* Oddification: if ((value & 1) == 0) value -= 1. */
        value = (value - 1) | 1;
        value = if sign { -value } else { value };
        block.coeffs[pos] = saturate(value) as i16;

        nonzero += 1;
        last_pos = pos;
        index += 1;
    }
}

pub(super) fn decode_mpeg1_intra(
    reader: &mut BitReader,
    mb: &mut MacroblockContext,
    picture: &mut Picture,
    sequence: &Sequence,
    block: &mut BlockRecord,
    chroma: bool,
    component: usize,
    d_picture: bool,
) -> Result<()> {
    let quant = sequence.matrix(MatrixId::Intra, chroma);
    let scan = &SCAN[picture.alternate_scan as usize];
    let q_scale = i32::from(mb.quantizer_scale);

    let Some(diff) = dc_coefficient(reader, chroma)? else {
        tracing::warn!("invalid dct_dc_size code");
        picture.error = true;
        return Ok(());
    };
    mb.dc_dct_pred[component] += diff;
    block.coeffs[0] = (mb.dc_dct_pred[component] << 3) as i16;

    let mut nonzero = (mb.dc_dct_pred[component] != 0) as u32;
    let mut last_pos = 0usize;

    if d_picture {
        /* end_of_macroblock, always set; D pictures carry no AC
         * coefficients (11172-2 2.4.2.7). */
        reader.remove(1)?;
        select_idct(block, nonzero, last_pos);
        return Ok(());
    }

    let mut index: i32 = 0;
    loop {
        let code = reader.show(16)?;
        let entry = if code >= 16384 {
            vlc::DCT_TAB_AC[(code >> 12) as usize - 4]
        } else {
            vlc::DCT_COEF_B14[code as usize]
        };
        if entry.length == 0 {
            tracing::warn!("invalid DCT coefficient code (intra)");
            picture.error = true;
            return Ok(());
        }
        reader.remove(entry.length as u32)?;

        let (run, mut level, sign);
        match entry.run {
            DCT_ESCAPE => {
                run = reader.get::<i32>(6)?;
                level = mpeg1_escape_level(reader)?;
                sign = level < 0;
                level = level.abs();
            }
            DCT_EOB => {
                select_idct(block, nonzero, last_pos);
                return Ok(());
            }
            _ => {
                run = i32::from(entry.run);
                level = i32::from(entry.level);
                sign = reader.get_flag()?;
            }
        }

        index += run + 1;
        if index >= 64 {
            tracing::warn!("DCT coefficient index out of bounds (intra)");
            picture.error = true;
            return Ok(());
        }

        let pos = scan[index as usize] as usize;
        let mut value = (level * q_scale * i32::from(quant[pos])) >> 3;
        value = (value - 1) | 1;
        value = if sign { -value } else { value };
        block.coeffs[pos] = saturate(value) as i16;

        nonzero += 1;
        last_pos = pos;
    }
}

pub(super) fn decode_mpeg2_nonintra(
    reader: &mut BitReader,
    mb: &MacroblockContext,
    picture: &mut Picture,
    sequence: &Sequence,
    block: &mut BlockRecord,
    chroma: bool,
) -> Result<()> {
    let quant = sequence.matrix(MatrixId::NonIntra, chroma);
    let scan = &SCAN[picture.alternate_scan as usize];
    let q_scale = i32::from(mb.quantizer_scale);

    let mut mismatch: i32 = 1;
    let mut nonzero = 0u32;
    let mut last_pos = 0usize;
    let mut index: i32 = 0;

    loop {
        let code = reader.show(16)?;
        let entry = if code >= 16384 {
            if index == 0 {
                vlc::DCT_TAB_DC[(code >> 12) as usize - 4]
            } else {
                vlc::DCT_TAB_AC[(code >> 12) as usize - 4]
            }
        } else {
            vlc::DCT_COEF_B14[code as usize]
        };
        if entry.length == 0 {
            tracing::warn!("invalid DCT coefficient code (non-intra)");
            picture.error = true;
            return Ok(());
        }
        reader.remove(entry.length as u32)?;

        let (run, level, sign);
        match entry.run {
            DCT_ESCAPE => {
                run = reader.get::<i32>(6)?;
                let raw = reader.get::<i32>(12)?;
                sign = raw > 2047;
                level = if sign { 4096 - raw } else { raw };
            }
            DCT_EOB => {
                /* Mismatch control (7.4.4). */
                block.coeffs[63] ^= (mismatch & 1) as i16;
                select_idct(block, nonzero, last_pos);
                return Ok(());
            }
            _ => {
                run = i32::from(entry.run);
                level = i32::from(entry.level);
                sign = reader.get_flag()?;
            }
        }

        index += run;
        if index >= 64 {
            tracing::warn!("DCT coefficient index out of bounds (non-intra)");
            picture.error = true;
            return Ok(());
        }

        let pos = scan[index as usize] as usize;
        let mut value = (((level << 1) + 1) * q_scale * i32::from(quant[pos])) >> 5;
        value = if sign { -value } else { value };
        value = saturate(value);
        block.coeffs[pos] = value as i16;
        mismatch ^= value;

        nonzero += 1;
        last_pos = pos;
        index += 1;
    }
}

#[allow(clippy::too_many_arguments)]
pub(super) fn decode_mpeg2_intra(
    reader: &mut BitReader,
    mb: &mut MacroblockContext,
    picture: &mut Picture,
    sequence: &Sequence,
    block: &mut BlockRecord,
    chroma: bool,
    component: usize,
) -> Result<()> {
    let quant = sequence.matrix(MatrixId::Intra, chroma);
    let scan = &SCAN[picture.alternate_scan as usize];
    let q_scale = i32::from(mb.quantizer_scale);
    let b15 = picture.intra_vlc_format;

    let Some(diff) = dc_coefficient(reader, chroma)? else {
        tracing::warn!("invalid dct_dc_size code");
        picture.error = true;
        return Ok(());
    };
    mb.dc_dct_pred[component] += diff;
    let dc = mb.dc_dct_pred[component] << (3 - picture.intra_dc_precision);
    block.coeffs[0] = dc as i16;

    let mut mismatch: i32 = 1 ^ dc;
    let mut nonzero = (mb.dc_dct_pred[component] != 0) as u32;
    let mut last_pos = 0usize;
    let mut index: i32 = 0;

    loop {
        let code = reader.show(16)?;
        let entry = if code >= 16384 {
            if b15 {
                vlc::DCT_TAB0A[(code >> 8) as usize - 4]
            } else {
                vlc::DCT_TAB_AC[(code >> 12) as usize - 4]
            }
        } else if b15 {
            vlc::DCT_COEF_B15[code as usize]
        } else {
            vlc::DCT_COEF_B14[code as usize]
        };
        if entry.length == 0 {
            tracing::warn!("invalid DCT coefficient code (intra)");
            picture.error = true;
            return Ok(());
        }
        reader.remove(entry.length as u32)?;

        let (run, level, sign);
        match entry.run {
            DCT_ESCAPE => {
                run = reader.get::<i32>(6)?;
                let raw = reader.get::<i32>(12)?;
                sign = raw > 2047;
                level = if sign { 4096 - raw } else { raw };
            }
            DCT_EOB => {
                block.coeffs[63] ^= (mismatch & 1) as i16;
                select_idct(block, nonzero, last_pos);
                return Ok(());
            }
            _ => {
                run = i32::from(entry.run);
                level = i32::from(entry.level);
                sign = reader.get_flag()?;
            }
        }

        index += run + 1;
        if index >= 64 {
            tracing::warn!("DCT coefficient index out of bounds (intra)");
            picture.error = true;
            return Ok(());
        }

        let pos = scan[index as usize] as usize;
        let mut value = (level * q_scale * i32::from(quant[pos])) >> 4;
        value = if sign { -value } else { value };
        value = saturate(value);
        block.coeffs[pos] = value as i16;
        mismatch ^= value;

        nonzero += 1;
        last_pos = pos;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitreader::{ChunkQueue, EsChunk};
    use crate::decoder::idct;
    fn reader_over(bytes: &[u8]) -> BitReader {
        let queue = ChunkQueue::new(2);
        queue.push(EsChunk::from_data(bytes.to_vec())).unwrap();
        queue.close();
        BitReader::new(queue)
    }

    fn intra_context() -> (MacroblockContext, Picture, Sequence) {
        let mb = MacroblockContext {
            quantizer_scale: 16,
            ..Default::default()
        };
        let mut sequence = Sequence::default();
        sequence.mpeg2 = true;
        (mb, Picture::default(), sequence)
    }

    /// A synthetic intra block with a single non-DC coefficient at
    /// position 62: mismatch control must force coefficient 63 to one, the
    /// sparse transform must be selected, and it must agree with the full
    /// transform within one level per sample.
    #[test]
    fn mismatch_control_forces_coefficient_63() {
        /* dct_dc_size 0 ('100'), escape ('000001'), run 61 ('111101'),
         * level 2 ('000000000010'), end of block ('10'). */
        let mut reader = reader_over(&[0x80, 0xFA, 0x00, 0x50, 0x00, 0x00]);
        let (mut mb, mut picture, sequence) = intra_context();
        let mut block = BlockRecord::default();

        decode_mpeg2_intra(&mut reader, &mut mb, &mut picture, &sequence, &mut block, false, 0)
            .unwrap();
        assert!(!picture.error);

        // level * q_scale * matrix[62] / 16 = 2 * 16 * 69 / 16.
        assert_eq!(block.coeffs[62], 138);
        assert_eq!(block.coeffs[63], 1);
        assert_eq!(block.select, IdctSelect::Sparse(62));

        let mut sparse_out = block.coeffs;
        sparse_out[63] = 0; // the sparse path only sees position 62
        idct::sparse(&mut sparse_out, 62);
        let mut full_out = block.coeffs;
        idct::full(&mut full_out);
        for i in 0..64 {
            let diff = (i32::from(sparse_out[i]) - i32::from(full_out[i])).abs();
            assert!(diff <= 1, "sample {}: sparse {} full {}", i, sparse_out[i], full_out[i]);
        }
    }

    /// The XOR of all coefficients of an inverse-quantised MPEG-2 block has
    /// an odd parity after mismatch control, DC included.
    #[test]
    fn mismatch_parity_is_odd() {
        for bytes in [
            vec![0x80u8, 0xFA, 0x00, 0x50, 0x00, 0x00], // one AC coefficient
            vec![0x90, 0x00, 0x00], // DC-only block ('100' + EOB '10')
        ] {
            let mut reader = reader_over(&bytes);
            let (mut mb, mut picture, sequence) = intra_context();
            mb.dc_dct_pred = [5, 0, 0];
            let mut block = BlockRecord::default();
            decode_mpeg2_intra(
                &mut reader,
                &mut mb,
                &mut picture,
                &sequence,
                &mut block,
                false,
                0,
            )
            .unwrap();
            let parity = block
                .coeffs
                .iter()
                .fold(0i32, |acc, &v| acc ^ i32::from(v));
            assert_eq!(parity & 1, 1);
        }
    }

    #[test]
    fn oversized_run_aborts_the_slice() {
        /* dct_dc_size 0, escape with run 62 after a first coefficient
         * would overflow; here: escape run 63 level 2 lands at index 64. */
        let mut w_bits: Vec<u8> = Vec::new();
        // '100' + '000001' + '111111' + '000000000010' + '10' + pad
        // = 10000000 11111110 00000000 01010000
        w_bits.extend_from_slice(&[0x80, 0xFE, 0x00, 0x50]);
        let mut reader = reader_over(&w_bits);
        let (mut mb, mut picture, sequence) = intra_context();
        let mut block = BlockRecord::default();
        decode_mpeg2_intra(&mut reader, &mut mb, &mut picture, &sequence, &mut block, false, 0)
            .unwrap();
        assert!(picture.error);
    }

    #[test]
    fn dc_differential_tracks_the_predictor() {
        /* Luminance dct_dc_size 1 ('00'), differential '1' (+1), EOB. */
        let mut reader = reader_over(&[0b00_1_10_000, 0x00, 0x00]);
        let (mut mb, mut picture, sequence) = intra_context();
        mb.dc_dct_pred = [128, 128, 128];
        let mut block = BlockRecord::default();
        decode_mpeg2_intra(&mut reader, &mut mb, &mut picture, &sequence, &mut block, false, 0)
            .unwrap();
        assert_eq!(mb.dc_dct_pred[0], 129);
        // intra_dc_precision 0: scaled left by three.
        assert_eq!(block.coeffs[0], 129 << 3);
        assert_eq!(block.select, IdctSelect::Sparse(0));
    }

    #[test]
    fn mpeg1_oddification_produces_odd_levels() {
        /* Non-intra MPEG-1 block: first coefficient '1s' with s=0 is run 0
         * level 1, then EOB '10'. */
        let mut reader = reader_over(&[0b10_10_0000, 0x00, 0x00]);
        let (mut mb, mut picture, mut sequence) = intra_context();
        sequence.mpeg2 = false;
        mb.quantizer_scale = 10;
        let mut block = BlockRecord::default();
        decode_mpeg1_nonintra(&mut reader, &mb, &mut picture, &sequence, &mut block, false)
            .unwrap();
        assert!(!picture.error);
        // ((1*2 + 1) * 10 * 16) >> 4 = 30, oddified to 29.
        assert_eq!(block.coeffs[0], 29);
        assert_eq!(block.coeffs[0] & 1, 1);
    }
}
