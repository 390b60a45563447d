//! Slice and macroblock layer parsing.
//!
//! A slice is a run of macroblocks with its own quantiser scale and reset
//! predictors. Each macroblock is parsed into a pooled record (modes,
//! vectors, coefficients) and handed to the reconstruction side; address
//! gaps synthesise skipped macroblocks according to the picture type. All
//! error handling is the sticky-flag kind: poison the picture, abandon the
//! slice, resynchronise.

use lumiere_video::{ChromaFormat, PlaneId};

use super::{blocks, vlc, VideoParser};
use crate::decoder::motion::{build_descriptors, MotionMode, MotionParams};
use crate::decoder::MacroblockRecord;
use crate::error::Result;
use crate::types::{
    CodingType, MacroblockContext, MacroblockType, Picture, PictureStructure, Sequence,
    MOTION_DMV, MOTION_FIELD, MOTION_FRAME, QUANTIZER_SCALE, SLICE_START_CODE_MAX,
    SLICE_START_CODE_MIN,
};

/// Horizontal offset of each block within the macroblock.
static BLOCK_X: [usize; 6] = [0, 8, 0, 8, 0, 0];
/// Vertical offset in destination lines, by DCT type (frame, field).
static BLOCK_Y: [[usize; 6]; 2] = [[0, 0, 8, 8, 0, 0], [0, 0, 1, 1, 0, 0]];

/// Vectors and vector format per motion_type, indexed by `[is_frame]`.
static MV_COUNT: [[u8; 4]; 2] = [[0, 1, 2, 1], [0, 2, 1, 1]];
static MV_FORMAT: [[u8; 4]; 2] = [[0, 1, 1, 1], [0, 1, 2, 1]];

/// Seeds a record with the macroblock's position and picture handles.
fn init_record(
    sequence: &Sequence,
    picture: &Picture,
    mb: &MacroblockContext,
    record: &mut MacroblockRecord,
    coding_type: CodingType,
    structure: PictureStructure,
    second_field: bool,
) {
    record.picture = picture.picture.clone();
    record.backward = if coding_type == CodingType::B {
        sequence.backward.clone()
    } else {
        None
    };
    record.forward = if coding_type == CodingType::P || coding_type == CodingType::B {
        sequence.forward.clone()
    } else {
        None
    };

    record.l_x = mb.l_x;
    record.c_x = mb.c_x;
    record.motion_l_y = mb.l_y;
    record.motion_c_y = mb.c_y;
    record.motion_field = structure == PictureStructure::BottomField;
    if record.motion_field {
        record.motion_l_y -= 1;
        record.motion_c_y -= 1;
    }
    record.l_stride = picture.l_stride;
    record.c_stride = picture.c_stride;
    record.p_second = second_field && coding_type == CodingType::P;
    record.repeat_period = picture.repeat;
    record.motion_count = 0;
    record.coded_block_pattern = 0;
}

impl VideoParser {
    /// quantiser_scale_code, mapped per standard and scale type.
    pub(crate) fn load_quantizer_scale(&mut self) -> Result<()> {
        let row = ((!self.sequence.mpeg2 as usize) << 1) | self.picture.q_scale_type as usize;
        let code = self.reader.get::<usize>(5)?;
        self.mb.quantizer_scale = QUANTIZER_SCALE[row][code];
        Ok(())
    }

    /// All slices of the current picture (6.2.3.7).
    pub(crate) fn picture_data(
        &mut self,
        coding_type: CodingType,
        structure: PictureStructure,
        second_field: bool,
    ) -> Result<()> {
        let mb_count = self.sequence.mb_size >> (!structure.is_frame() as usize);
        let mut mb_address = 0usize;

        self.reader.next_start_code()?;
        loop {
            let intra_picture = coding_type == CodingType::I || coding_type == CodingType::D;
            if (intra_picture && self.picture.error) || mb_address >= mb_count {
                break;
            }
            let code = self.reader.show(32)?;
            if !(SLICE_START_CODE_MIN..=SLICE_START_CODE_MAX).contains(&code) {
                tracing::warn!("premature end of picture");
                self.picture.error = true;
                break;
            }
            self.reader.remove(32)?;
            self.slice(
                &mut mb_address,
                code & 255,
                coding_type,
                structure,
                second_field,
            )?;
        }

        /* Error recovery: when most of the picture made it, paint the
         * missing tail from the references instead of dropping the frame. */
        if (coding_type == CodingType::P || coding_type == CodingType::B)
            && self.picture.error
            && mb_address > mb_count / 2
        {
            self.picture.error = false;
            while mb_address < mb_count && !self.picture.error {
                self.skipped_macroblock(coding_type, structure, second_field)?;
                mb_address += 1;
            }
        }
        Ok(())
    }

    /// One slice: header, then macroblocks until the stream stops looking
    /// like macroblocks.
    fn slice(
        &mut self,
        mb_address: &mut usize,
        vertical_code: u32,
        coding_type: CodingType,
        structure: PictureStructure,
        second_field: bool,
    ) -> Result<()> {
        let mut mb_previous = *mb_address;

        self.picture.error = false;

        self.load_quantizer_scale()?;
        if self.reader.get_flag()? {
            /* intra_slice, slice_id */
            self.reader.remove(8)?;
            while self.reader.get_flag()? {
                /* extra_information_slice */
                self.reader.remove(8)?;
            }
        }

        *mb_address = (vertical_code as usize - 1) * self.sequence.mb_width;
        if *mb_address < mb_previous {
            tracing::warn!("slices do not follow, dropping the rest of the picture");
            self.picture.error = true;
            return Ok(());
        }

        self.mb.reset_dc_predictors(self.picture.intra_dc_precision);
        self.mb.reset_motion_predictors();

        loop {
            self.parse_macroblock(mb_address, mb_previous, coding_type, structure, second_field)?;
            mb_previous = *mb_address;
            if self.picture.error {
                return Ok(());
            }
            if self.reader.show(23)? == 0 {
                break;
            }
        }
        self.reader.next_start_code()
    }

    /// macroblock_address_increment, escapes and stuffing included.
    fn macroblock_address_increment(&mut self) -> Result<i32> {
        let mut increment = 0;
        loop {
            let index = self.reader.show(11)? as usize;
            let entry = vlc::MB_ADDR_INC[index];
            if entry.value == vlc::MB_ADDRINC_ESCAPE {
                self.reader.remove(entry.length)?;
                increment += 33;
            } else if entry.value == vlc::MB_ADDRINC_STUFFING {
                self.reader.remove(entry.length)?;
            } else {
                if entry.is_error() {
                    return Ok(-1);
                }
                self.reader.remove(entry.length)?;
                return Ok(increment + entry.value);
            }
        }
    }

    /// coded_block_pattern, with the extension bits of the bigger chroma
    /// formats consumed for wire compatibility.
    fn coded_pattern(&mut self) -> Result<u32> {
        let code = self.reader.show(9)? as usize;
        let entry = vlc::CODED_PATTERN[code];
        if entry.is_error() {
            tracing::warn!("invalid coded_block_pattern");
            self.picture.error = true;
            return Ok(0);
        }
        self.reader.remove(entry.length)?;
        let base = entry.value as u32;
        Ok(match self.sequence.chroma_format {
            ChromaFormat::Chroma420 => base,
            ChromaFormat::Chroma422 => base | (self.reader.get::<u32>(2)? << 6),
            ChromaFormat::Chroma444 => base | (self.reader.get::<u32>(6)? << 6),
        })
    }

    /// macroblock_modes: type VLC, motion type, DCT type.
    fn macroblock_modes(
        &mut self,
        coding_type: CodingType,
        structure: PictureStructure,
    ) -> Result<MacroblockType> {
        let mb_type = match coding_type {
            CodingType::I => {
                let entry = vlc::I_MB_TYPE[self.reader.show(2)? as usize];
                self.reader.remove(entry.length)?;
                entry.mb_type
            }
            CodingType::P => {
                let entry = vlc::P_MB_TYPE[self.reader.show(6)? as usize];
                self.reader.remove(entry.length)?;
                entry.mb_type
            }
            CodingType::B => {
                let entry = vlc::B_MB_TYPE[self.reader.show(6)? as usize];
                self.reader.remove(entry.length)?;
                entry.mb_type
            }
            CodingType::D => {
                /* macroblock_type is always '1' in D pictures. */
                if self.reader.get_flag()? {
                    MacroblockType::INTRA
                } else {
                    MacroblockType::empty()
                }
            }
        };
        if mb_type.is_empty() {
            tracing::warn!("invalid macroblock_type");
            self.picture.error = true;
            return Ok(mb_type);
        }

        if coding_type == CodingType::B {
            /* Remembered for skipped macroblocks (7.6.6). */
            self.mb.motion_dir =
                mb_type & (MacroblockType::MOTION_FORWARD | MacroblockType::MOTION_BACKWARD);
        }

        if (coding_type == CodingType::P || coding_type == CodingType::B)
            && mb_type.intersects(MacroblockType::MOTION_FORWARD | MacroblockType::MOTION_BACKWARD)
        {
            let frame = structure.is_frame();
            if !(frame && self.picture.frame_pred_frame_dct) {
                self.mb.motion_type = self.reader.get(2)?;
            } else {
                self.mb.motion_type = MOTION_FRAME;
            }
            self.mb.mv_count = MV_COUNT[frame as usize][self.mb.motion_type as usize];
            self.mb.mv_format = MV_FORMAT[frame as usize][self.mb.motion_type as usize];
            self.mb.dmv = self.mb.motion_type == MOTION_DMV;
        }

        self.mb.dct_type = false;
        if structure.is_frame()
            && !self.picture.frame_pred_frame_dct
            && mb_type.intersects(MacroblockType::PATTERN | MacroblockType::INTRA)
        {
            self.mb.dct_type = self.reader.get_flag()?;
        }
        Ok(mb_type)
    }

    /// Advances the macroblock coordinates by one macroblock, wrapping at
    /// the right edge (field pictures advance two macroblock rows at a
    /// time).
    fn update_context(&mut self, structure: PictureStructure) {
        let factor = 2 - structure.is_frame() as usize;

        self.mb.l_x += 16;
        self.mb.l_y += (self.mb.l_x / self.sequence.width) * factor * 16;
        self.mb.l_x %= self.sequence.width;

        self.mb.c_x += self.sequence.chroma_mb_width;
        self.mb.c_y +=
            (self.mb.c_x / self.sequence.chroma_width) * factor * self.sequence.chroma_mb_height;
        self.mb.c_x %= self.sequence.chroma_width;
    }

    /// The motion mode a macroblock reconstructs with, from the coded
    /// motion_type and the picture structure.
    fn motion_mode(&self, structure: PictureStructure) -> Option<MotionMode> {
        Some(match (structure.is_frame(), self.mb.motion_type) {
            (true, MOTION_FIELD) => MotionMode::FrameField,
            (true, MOTION_FRAME) => MotionMode::FrameFrame,
            (true, MOTION_DMV) => MotionMode::FrameDmv,
            (false, MOTION_FIELD) => MotionMode::FieldField,
            (false, 2) => MotionMode::Field16x8,
            (false, MOTION_DMV) => MotionMode::FieldDmv,
            _ => return None,
        })
    }

    /// Synthesises one skipped macroblock (7.6.6): forward copy with a zero
    /// vector in P pictures, replay of the last macroblock's motion in B
    /// pictures.
    fn skipped_macroblock(
        &mut self,
        coding_type: CodingType,
        structure: PictureStructure,
        second_field: bool,
    ) -> Result<()> {
        if coding_type == CodingType::I || coding_type == CodingType::D {
            tracing::warn!("skipped macroblock in an intra picture");
            self.picture.error = true;
            return Ok(());
        }

        let mut slot = self.pool.new_record()?;
        {
            let record = self.pool.record_mut(&mut slot);
            init_record(
                &self.sequence,
                &self.picture,
                &self.mb,
                record,
                coding_type,
                structure,
                second_field,
            );

            let mut params = MotionParams {
                mb_type: MacroblockType::MOTION_FORWARD,
                mvs: [[[0; 2]; 2]; 2],
                dmv: [[0; 2]; 2],
                field_select: [[structure == PictureStructure::BottomField; 2]; 2],
                motion_field: record.motion_field,
                p_second: record.p_second,
                l_stride: record.l_stride,
                c_stride: record.c_stride,
            };
            if coding_type == CodingType::B {
                params.mb_type = self.mb.motion_dir;
                params.mvs = self.mb.pmv;
            }

            let mode = if structure.is_frame() {
                MotionMode::FrameFrame
            } else {
                MotionMode::FieldField
            };
            let (motions, motion_count) = build_descriptors(mode, &params);
            record.mb_type = params.mb_type;
            record.motions = motions;
            record.motion_count = motion_count;
        }

        self.update_context(structure);
        self.pool.dispatch(slot);
        Ok(())
    }

    /// One coded macroblock, address gap included.
    fn parse_macroblock(
        &mut self,
        mb_address: &mut usize,
        mb_previous: usize,
        coding_type: CodingType,
        structure: PictureStructure,
        second_field: bool,
    ) -> Result<()> {
        let increment = self.macroblock_address_increment()?;
        if increment < 0 {
            tracing::warn!("bad macroblock address increment");
            self.picture.error = true;
            return Ok(());
        }
        *mb_address += increment as usize;

        if *mb_address > mb_previous + 1 {
            /* Skipped macroblocks in the gap (7.6.6). */
            self.mb.reset_dc_predictors(self.picture.intra_dc_precision);
            if coding_type == CodingType::P {
                self.mb.reset_motion_predictors();
            }
            for _ in (mb_previous + 1)..*mb_address {
                self.skipped_macroblock(coding_type, structure, second_field)?;
                if self.picture.error {
                    return Ok(());
                }
            }
        }

        let mut slot = self.pool.new_record()?;
        {
            let record = self.pool.record_mut(&mut slot);
            init_record(
                &self.sequence,
                &self.picture,
                &self.mb,
                record,
                coding_type,
                structure,
                second_field,
            );
        }

        let mut mb_type = self.macroblock_modes(coding_type, structure)?;
        if self.picture.error {
            *mb_address = mb_address.saturating_sub(1);
            self.pool.free(slot);
            return Ok(());
        }

        if mb_type.contains(MacroblockType::QUANT) {
            self.load_quantizer_scale()?;
        }

        let mut params = MotionParams {
            mb_type,
            mvs: [[[0; 2]; 2]; 2],
            dmv: [[0; 2]; 2],
            field_select: [[false; 2]; 2],
            motion_field: structure == PictureStructure::BottomField,
            p_second: second_field && coding_type == CodingType::P,
            l_stride: self.picture.l_stride,
            c_stride: self.picture.c_stride,
        };

        if (coding_type == CodingType::P || coding_type == CodingType::B)
            && mb_type.contains(MacroblockType::MOTION_FORWARD)
        {
            if self.sequence.mpeg2 {
                self.decode_mv_mpeg2(&mut params, 0, structure)?;
            } else {
                self.decode_mv_mpeg1(&mut params, 0, structure)?;
            }
        }
        if coding_type == CodingType::B && mb_type.contains(MacroblockType::MOTION_BACKWARD) {
            if self.sequence.mpeg2 {
                self.decode_mv_mpeg2(&mut params, 1, structure)?;
            } else {
                self.decode_mv_mpeg1(&mut params, 1, structure)?;
            }
        }
        if self.picture.error {
            *mb_address = mb_address.saturating_sub(1);
            self.pool.free(slot);
            return Ok(());
        }

        if coding_type == CodingType::P
            && !mb_type.intersects(MacroblockType::MOTION_FORWARD | MacroblockType::INTRA)
        {
            /* No-MC macroblock in a P picture (7.6.3.5): a forward copy
             * with a zero vector. */
            mb_type |= MacroblockType::MOTION_FORWARD;
            self.mb.reset_motion_predictors();
            params.mb_type = mb_type;
            params.mvs = [[[0; 2]; 2]; 2];
            self.mb.motion_type = if structure.is_frame() {
                MOTION_FRAME
            } else {
                MOTION_FIELD
            };
            params.field_select[0][0] = structure == PictureStructure::BottomField;
        }

        let intra = mb_type.contains(MacroblockType::INTRA);
        let coded_block_pattern;

        if coding_type != CodingType::I && coding_type != CodingType::D && !intra {
            self.mb.reset_dc_predictors(self.picture.intra_dc_precision);

            let Some(mode) = self.motion_mode(structure) else {
                tracing::warn!("invalid motion_type");
                self.picture.error = true;
                *mb_address = mb_address.saturating_sub(1);
                self.pool.free(slot);
                return Ok(());
            };
            params.mb_type = mb_type;
            let (motions, motion_count) = build_descriptors(mode, &params);

            coded_block_pattern = if mb_type.contains(MacroblockType::PATTERN) {
                self.coded_pattern()?
            } else {
                0
            };
            if self.picture.error {
                *mb_address = mb_address.saturating_sub(1);
                self.pool.free(slot);
                return Ok(());
            }

            {
                let record = self.pool.record_mut(&mut slot);
                record.mb_type = mb_type;
                record.motions = motions;
                record.motion_count = motion_count;
                record.coded_block_pattern = coded_block_pattern;
            }
        } else {
            if !self.picture.concealment_mv {
                self.mb.reset_motion_predictors();
            } else {
                /* Concealment vectors keep the predictors warm for error
                 * recovery; they do not predict anything here. */
                if self.sequence.mpeg2 {
                    self.decode_mv_mpeg2(&mut params, 0, structure)?;
                } else {
                    self.decode_mv_mpeg1(&mut params, 0, structure)?;
                }
                /* marker_bit */
                self.reader.remove(1)?;
            }

            coded_block_pattern = if mb_type.contains(MacroblockType::PATTERN) {
                self.coded_pattern()?
            } else {
                (1 << (4 + self.sequence.chroma_nb_blocks)) - 1
            };

            {
                let record = self.pool.record_mut(&mut slot);
                record.mb_type = mb_type;
                record.coded_block_pattern = coded_block_pattern;
                record.motion_count = 0;
            }
        }

        self.decode_blocks(&mut slot, coded_block_pattern, intra || coding_type == CodingType::I)?;

        if !self.picture.error {
            self.update_context(structure);
            self.pool.dispatch(slot);
        } else {
            /* Leave this address to the skipped-macroblock recovery. */
            *mb_address = mb_address.saturating_sub(1);
            self.pool.free(slot);
        }
        Ok(())
    }

    /// Decodes every coded block of the macroblock into its record slot and
    /// resolves the destination of each one.
    fn decode_blocks(
        &mut self,
        slot: &mut crate::decoder::pool::RecordSlot,
        coded_block_pattern: u32,
        intra: bool,
    ) -> Result<()> {
        let dct_type = self.mb.dct_type;
        let luma_base = self.mb.l_x + self.mb.l_y * self.sequence.width;
        let chroma_base = self.mb.c_x + self.mb.c_y * self.sequence.chroma_width;
        let l_stride = self.picture.l_stride;
        let c_stride = self.picture.c_stride;
        let mpeg2 = self.sequence.mpeg2;
        let d_picture = self.picture.coding_type == CodingType::D;

        let mut mask = 1u32 << 5;
        for index in 0..6 {
            if coded_block_pattern & mask != 0 {
                let chroma = index >= 4;
                let component = if chroma { 1 + (index & 1) } else { 0 };

                let record = self.pool.record_mut(slot);
                let block = &mut record.blocks[index];
                block.coeffs = [0; 64];

                match (mpeg2, intra) {
                    (false, true) => blocks::decode_mpeg1_intra(
                        &mut self.reader,
                        &mut self.mb,
                        &mut self.picture,
                        &self.sequence,
                        block,
                        chroma,
                        component,
                        d_picture,
                    )?,
                    (false, false) => blocks::decode_mpeg1_nonintra(
                        &mut self.reader,
                        &self.mb,
                        &mut self.picture,
                        &self.sequence,
                        block,
                        chroma,
                    )?,
                    (true, true) => blocks::decode_mpeg2_intra(
                        &mut self.reader,
                        &mut self.mb,
                        &mut self.picture,
                        &self.sequence,
                        block,
                        chroma,
                        component,
                    )?,
                    (true, false) => blocks::decode_mpeg2_nonintra(
                        &mut self.reader,
                        &self.mb,
                        &mut self.picture,
                        &self.sequence,
                        block,
                        chroma,
                    )?,
                }

                if chroma {
                    block.plane = if index & 1 == 0 { PlaneId::U } else { PlaneId::V };
                    block.offset =
                        chroma_base + BLOCK_Y[dct_type as usize][index] * c_stride + BLOCK_X[index];
                    block.stride = c_stride;
                } else {
                    block.plane = PlaneId::Y;
                    block.offset =
                        luma_base + BLOCK_Y[dct_type as usize][index] * l_stride + BLOCK_X[index];
                    block.stride = if dct_type { l_stride << 1 } else { l_stride };
                }

                if self.picture.error {
                    return Ok(());
                }
            }
            mask >>= 1;
        }
        Ok(())
    }
}
