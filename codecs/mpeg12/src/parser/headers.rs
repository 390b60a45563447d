//! Sequence, group and picture layer parsing.

use lumiere_video::{ChromaFormat, PictureHandle};

use super::VideoParser;
use crate::error::{Error, Result};
use crate::types::{
    CodingType, MatrixId, PictureStructure, QuantMatrix, ScalableMode, COPYRIGHT_EXTENSION_ID,
    DEFAULT_INTRA_QUANT, DEFAULT_NONINTRA_QUANT, EXTENSION_START_CODE, FRAME_RATE,
    PICTURE_DISPLAY_EXTENSION_ID, PICTURE_SPATIAL_SCALABLE_EXTENSION_ID,
    PICTURE_TEMPORAL_SCALABLE_EXTENSION_ID, QUANT_MATRIX_EXTENSION_ID, SCAN, SCAN_ZIGZAG,
    SEQUENCE_DISPLAY_EXTENSION_ID, SEQUENCE_SCALABLE_EXTENSION_ID, USER_DATA_START_CODE,
};

impl VideoParser {
    /// Reads a downloadable quantiser matrix, stored through the zig-zag
    /// scan.
    fn load_matrix(&mut self, id: MatrixId, chroma: bool) -> Result<()> {
        let mut matrix = Box::new([0u8; 64]);
        for i in 0..64 {
            matrix[SCAN[SCAN_ZIGZAG][i] as usize] = self.reader.get(8)?;
        }
        self.sequence
            .set_matrix(id, chroma, QuantMatrix::Owned(matrix));
        Ok(())
    }

    /// Sequence header (6.2.2.1), optionally promoted to MPEG-2 by an
    /// immediately following sequence_extension.
    pub(crate) fn sequence_header(&mut self) -> Result<()> {
        self.sequence.width = self.reader.get(12)?;
        self.sequence.height = self.reader.get(12)?;
        self.sequence.aspect_ratio = self.reader.get(4)?;
        self.sequence.frame_rate = FRAME_RATE[self.reader.get::<usize>(4)?];

        /* bit_rate_value, marker, vbv_buffer_size, constrained_parameters */
        self.reader.remove(30)?;

        if self.reader.get_flag()? {
            self.load_matrix(MatrixId::Intra, false)?;
        } else {
            self.sequence.set_matrix(
                MatrixId::Intra,
                false,
                QuantMatrix::Borrowed(&DEFAULT_INTRA_QUANT),
            );
        }
        if self.reader.get_flag()? {
            self.load_matrix(MatrixId::NonIntra, false)?;
        } else {
            self.sequence.set_matrix(
                MatrixId::NonIntra,
                false,
                QuantMatrix::Borrowed(&DEFAULT_NONINTRA_QUANT),
            );
        }
        /* Unless a quant_matrix_extension says otherwise, chrominance reads
         * through the luminance matrices. */
        self.sequence
            .set_matrix(MatrixId::Intra, true, QuantMatrix::Alias(MatrixId::Intra));
        self.sequence.set_matrix(
            MatrixId::NonIntra,
            true,
            QuantMatrix::Alias(MatrixId::NonIntra),
        );

        self.reader.next_start_code()?;
        if self.reader.show(32)? == EXTENSION_START_CODE {
            /* sequence_extension: this is MPEG-2. */
            self.sequence.mpeg2 = true;
            self.reader.remove(32)?;
            /* extension id, profile_and_level_indication */
            self.reader.remove(12)?;
            self.sequence.progressive = self.reader.get_flag()?;
            self.sequence.chroma_format = match self.reader.get::<u32>(2)? {
                1 => ChromaFormat::Chroma420,
                2 => ChromaFormat::Chroma422,
                3 => ChromaFormat::Chroma444,
                _ => return Err(Error::Unsupported("reserved chroma_format")),
            };
            self.sequence.width |= self.reader.get::<usize>(2)? << 12;
            self.sequence.height |= self.reader.get::<usize>(2)? << 12;
            /* bit_rate_extension, marker, vbv_buffer_size_extension,
             * low_delay */
            self.reader.remove(22)?;
            let ext_n = self.reader.get::<i64>(2)?;
            let ext_d = self.reader.get::<i64>(5)?;
            self.sequence.frame_rate = self.sequence.frame_rate * (ext_n + 1) / (ext_d + 1);
        } else {
            /* MPEG-1 compatibility values. */
            self.sequence.mpeg2 = false;
            self.sequence.progressive = true;
            self.sequence.chroma_format = ChromaFormat::Chroma420;
        }

        if self.sequence.width == 0 || self.sequence.height == 0 {
            return Err(Error::Unsupported("zero picture dimensions"));
        }
        self.sequence.update_geometry();
        self.sequence.scalable_mode = ScalableMode::None;

        /* This is a Main Profile @ Main Level decoder. */
        if self.sequence.chroma_format != ChromaFormat::Chroma420 {
            return Err(Error::Unsupported("chroma format above 4:2:0"));
        }
        if self.sequence.height > 2800 {
            return Err(Error::Unsupported("picture taller than 2800 lines"));
        }

        self.extension_and_user_data()?;

        if self.sequence.scalable_mode == ScalableMode::DataPartitioning {
            return Err(Error::Unsupported("data-partitioning scalability"));
        }
        Ok(())
    }

    /// Group-of-pictures header: nothing the decoder needs.
    pub(crate) fn group_header(&mut self) -> Result<()> {
        self.reader.remove(27)?;
        self.extension_and_user_data()
    }

    /// extension_and_user_data: every extension and user-data unit up to
    /// the next non-extension start code.
    fn extension_and_user_data(&mut self) -> Result<()> {
        loop {
            self.reader.next_start_code()?;
            match self.reader.show(32)? {
                EXTENSION_START_CODE => {
                    self.reader.remove(32)?;
                    match self.reader.get::<u32>(4)? {
                        SEQUENCE_DISPLAY_EXTENSION_ID => self.sequence_display_extension()?,
                        QUANT_MATRIX_EXTENSION_ID => self.quant_matrix_extension()?,
                        SEQUENCE_SCALABLE_EXTENSION_ID => self.sequence_scalable_extension()?,
                        PICTURE_DISPLAY_EXTENSION_ID => self.picture_display_extension()?,
                        PICTURE_SPATIAL_SCALABLE_EXTENSION_ID => {
                            /* Scalability is not decoded; skip the payload. */
                            self.reader.remove(32)?;
                            self.reader.remove(16)?;
                        }
                        PICTURE_TEMPORAL_SCALABLE_EXTENSION_ID => {
                            self.reader.remove(23)?;
                        }
                        COPYRIGHT_EXTENSION_ID => self.copyright_extension()?,
                        _ => {}
                    }
                }
                USER_DATA_START_CODE => {
                    self.reader.remove(32)?;
                    /* Swallowed up to the next start code. */
                }
                _ => return Ok(()),
            }
        }
    }

    fn sequence_display_extension(&mut self) -> Result<()> {
        /* video_format */
        self.reader.remove(3)?;
        if self.reader.get_flag()? {
            /* colour_primaries, transfer_characteristics */
            self.reader.remove(16)?;
            self.sequence.matrix_coefficients = self.reader.get(8)?;
        }
        /* display sizes and a marker bit */
        self.reader.remove(29)?;
        Ok(())
    }

    /// quant_matrix_extension: up to four downloadable matrices; chroma
    /// slots fall back to aliasing luminance.
    fn quant_matrix_extension(&mut self) -> Result<()> {
        if self.reader.get_flag()? {
            self.load_matrix(MatrixId::Intra, false)?;
        } else {
            self.sequence.set_matrix(
                MatrixId::Intra,
                false,
                QuantMatrix::Borrowed(&DEFAULT_INTRA_QUANT),
            );
        }
        if self.reader.get_flag()? {
            self.load_matrix(MatrixId::NonIntra, false)?;
        } else {
            self.sequence.set_matrix(
                MatrixId::NonIntra,
                false,
                QuantMatrix::Borrowed(&DEFAULT_NONINTRA_QUANT),
            );
        }
        if self.reader.get_flag()? {
            self.load_matrix(MatrixId::Intra, true)?;
        } else {
            self.sequence
                .set_matrix(MatrixId::Intra, true, QuantMatrix::Alias(MatrixId::Intra));
        }
        if self.reader.get_flag()? {
            self.load_matrix(MatrixId::NonIntra, true)?;
        } else {
            self.sequence.set_matrix(
                MatrixId::NonIntra,
                true,
                QuantMatrix::Alias(MatrixId::NonIntra),
            );
        }
        Ok(())
    }

    fn sequence_scalable_extension(&mut self) -> Result<()> {
        /* Only the mode matters; the payload length depends on it
         * (6.3.8). */
        self.sequence.scalable_mode = match self.reader.get::<u32>(2)? {
            0 => {
                /* layer_id */
                self.reader.remove(4)?;
                ScalableMode::DataPartitioning
            }
            1 => {
                /* layer_id plus the lower-layer geometry */
                self.reader.remove(32)?;
                self.reader.remove(21)?;
                ScalableMode::Spatial
            }
            2 => {
                self.reader.remove(4)?;
                ScalableMode::Snr
            }
            _ => {
                self.reader.remove(4)?;
                ScalableMode::Temporal
            }
        };
        Ok(())
    }

    fn picture_display_extension(&mut self) -> Result<()> {
        /* Frame centre offsets; their count depends on the picture flags
         * (6.3.12). The offsets themselves are ignored. */
        let count = if self.sequence.progressive {
            1 + self.picture.repeat_first_field as usize + self.picture.top_field_first as usize
        } else {
            (!self.picture.frame_structure as usize + 1) + self.picture.repeat_first_field as usize
        };
        for _ in 0..count {
            self.reader.remove(17)?;
            self.reader.remove(17)?;
        }
        Ok(())
    }

    fn copyright_extension(&mut self) -> Result<()> {
        self.sequence.copyright_flag = self.reader.get_flag()?;
        self.sequence.copyright_id = self.reader.get(8)?;
        self.sequence.original = self.reader.get_flag()?;
        /* reserved */
        self.reader.remove(8)?;
        let high = self.reader.get::<u64>(20)?;
        self.reader.remove(1)?;
        let mid = self.reader.get::<u64>(22)?;
        self.reader.remove(1)?;
        let low = self.reader.get::<u64>(22)?;
        self.sequence.copyright_number = (high << 44) | (mid << 22) | low;
        Ok(())
    }

    /// Picture header plus its coding extension, then the whole picture's
    /// slices. Implements the arrival protocol: pair up field pictures,
    /// check references, consult the synchroniser, rotate references, and
    /// only then ask the renderer for a buffer and decode.
    pub(crate) fn picture_header(&mut self) -> Result<()> {
        if self.sequence.expect_discontinuity {
            self.reference_update(CodingType::I, None);
            self.reference_update(CodingType::I, None);
            if let Some(picture) = self.picture.picture.take() {
                self.pool.wait_idle();
                self.synchro.lock().unwrap().end(true);
                self.output.lock().unwrap().destroy_picture(picture);
            }
            self.picture.current_structure = 0;
            self.sequence.expect_discontinuity = false;
        }

        /* temporal_reference */
        self.reader.remove(10)?;
        let coding_type = CodingType::from_code(self.reader.get(3)?);
        /* vbv_delay */
        self.reader.remove(16)?;

        let Some(coding_type) = coding_type else {
            tracing::warn!("reserved picture coding type");
            self.picture.error = true;
            return Ok(());
        };
        self.picture.coding_type = coding_type;

        if coding_type == CodingType::P || coding_type == CodingType::B {
            self.picture.full_pel_vector[0] = self.reader.get_flag()?;
            self.picture.forward_f_code = self.reader.get(3)?;
        }
        if coding_type == CodingType::B {
            self.picture.full_pel_vector[1] = self.reader.get_flag()?;
            self.picture.backward_f_code = self.reader.get(3)?;
        }

        /* extra_information_picture */
        while self.reader.get_flag()? {
            self.reader.remove(8)?;
        }

        self.reader.next_start_code()?;
        let structure = if self.reader.show(32)? == EXTENSION_START_CODE {
            /* picture_coding_extension */
            self.reader.remove(32)?;
            self.reader.remove(4)?;
            for s in 0..2 {
                for c in 0..2 {
                    self.picture.f_code[s][c] = self.reader.get(4)?;
                }
            }
            self.picture.intra_dc_precision = self.reader.get(2)?;
            let structure = PictureStructure::from_code(self.reader.get(2)?);
            self.picture.top_field_first = self.reader.get_flag()?;
            self.picture.frame_pred_frame_dct = self.reader.get_flag()?;
            self.picture.concealment_mv = self.reader.get_flag()?;
            self.picture.q_scale_type = self.reader.get_flag()?;
            self.picture.intra_vlc_format = self.reader.get_flag()?;
            self.picture.alternate_scan = self.reader.get_flag()?;
            self.picture.repeat_first_field = self.reader.get_flag()?;
            /* chroma_420_type, obsolete */
            self.reader.remove(1)?;
            self.picture.progressive_frame = self.reader.get_flag()?;
            if self.reader.get_flag()? {
                /* composite display information */
                self.reader.remove(20)?;
            }
            match structure {
                Some(s) => s,
                None => {
                    tracing::warn!("reserved picture structure");
                    self.picture.error = true;
                    return Ok(());
                }
            }
        } else {
            /* MPEG-1 compatibility values. */
            self.picture.f_code[0][0] = self.picture.forward_f_code;
            self.picture.f_code[0][1] = self.picture.forward_f_code;
            self.picture.f_code[1][0] = self.picture.backward_f_code;
            self.picture.f_code[1][1] = self.picture.backward_f_code;
            self.picture.intra_dc_precision = 0;
            self.picture.top_field_first = false;
            self.picture.frame_pred_frame_dct = true;
            self.picture.concealment_mv = false;
            self.picture.q_scale_type = false;
            self.picture.intra_vlc_format = false;
            self.picture.alternate_scan = false;
            self.picture.repeat_first_field = false;
            self.picture.progressive_frame = true;
            PictureStructure::Frame
        };

        if self.picture.current_structure != 0
            && (structure.is_frame()
                || structure as u32 == self.picture.current_structure)
        {
            /* The second field of the buffered frame never arrived. */
            if let Some(picture) = self.picture.picture.take() {
                self.pool.wait_idle();
                self.reference_replace(coding_type, None);
                self.synchro.lock().unwrap().end(true);
                self.output.lock().unwrap().destroy_picture(picture);
            }
            self.picture.current_structure = 0;
            tracing::warn!("odd number of field pictures");
        }

        /* Are the needed references there? */
        let mut parsable = !((coding_type == CodingType::P && self.sequence.backward.is_none())
            || (coding_type == CodingType::B
                && (self.sequence.forward.is_none() || self.sequence.backward.is_none())));

        if self.picture.current_structure != 0 {
            /* Second field: decode only if the first one was decoded. */
            if parsable {
                parsable = self.picture.picture.is_some();
            }
        } else {
            /* Number of half-periods this frame will occupy on screen. */
            let repeat_field = if self.sequence.progressive {
                (1 + self.picture.repeat_first_field as i32 + self.picture.top_field_first as i32)
                    * 2
            } else if self.picture.progressive_frame {
                2 + self.picture.repeat_first_field as i32
            } else {
                2
            };

            /* Never hold the synchro lock while taking the output lock;
             * the workers publish in the opposite order. */
            let render_time = self.output.lock().unwrap().render_time();
            let mut synchro = self.synchro.lock().unwrap();
            synchro.new_picture(
                coding_type,
                repeat_field,
                self.sequence.frame_rate,
                &mut self.sequence.next_pts,
                &mut self.sequence.next_dts,
            );

            if parsable {
                parsable = synchro.choose(coding_type, self.sequence.frame_rate, render_time);
            }
            drop(synchro);
            self.picture.repeat = repeat_field as u8;
        }

        if !parsable {
            self.reference_update(coding_type, None);

            if !structure.is_frame() {
                if (self.picture.current_structure | structure as u32)
                    == PictureStructure::Frame as u32
                {
                    self.picture.current_structure = 0;
                } else {
                    /* First field trashed; wait for its pair. */
                    self.picture.current_structure = structure as u32;
                    self.synchro.lock().unwrap().trash(coding_type);
                }
            } else {
                self.synchro.lock().unwrap().trash(coding_type);
            }
            self.picture.picture = None;
            return Ok(());
        }

        self.picture.error = false;
        self.picture.frame_structure = structure.is_frame();

        if self.picture.current_structure == 0 {
            /* A new frame: borrow a buffer from the renderer. */
            let picture: PictureHandle = loop {
                let attempt = self.output.lock().unwrap().allocate_picture(
                    self.sequence.chroma_format,
                    self.sequence.width,
                    self.sequence.height,
                );
                match attempt {
                    Some(p) => break p,
                    None => {
                        if self.reader.queue().is_dying() {
                            return Err(Error::Shutdown);
                        }
                        tracing::debug!("no free picture buffer, delaying");
                        std::thread::sleep(super::OUTMEM_SLEEP);
                    }
                }
            };

            self.synchro.lock().unwrap().decode(coding_type);
            picture.aspect_ratio.store(
                self.sequence.aspect_ratio as isize,
                std::sync::atomic::Ordering::Relaxed,
            );
            picture.matrix_coefficients.store(
                self.sequence.matrix_coefficients as isize,
                std::sync::atomic::Ordering::Relaxed,
            );
            self.picture.l_stride =
                self.sequence.width << (1 - self.picture.frame_structure as usize);
            self.picture.c_stride =
                self.sequence.chroma_width << (1 - self.picture.frame_structure as usize);
            picture.deccount.store(
                self.sequence.mb_size as isize + 1,
                std::sync::atomic::Ordering::Release,
            );

            self.reference_update(coding_type, Some(picture.clone()));
            self.picture.picture = Some(picture);
        }
        let second_field = self.picture.current_structure != 0;
        self.picture.current_structure |= structure as u32;
        self.picture.structure = structure;

        /* Initialise macroblock coordinates for this field. */
        if structure == PictureStructure::BottomField {
            self.mb.l_y = 1;
            self.mb.c_y = 1;
        } else {
            self.mb.l_y = 0;
            self.mb.c_y = 0;
        }
        self.mb.l_x = 0;
        self.mb.c_x = 0;

        self.extension_and_user_data()?;

        self.picture_data(coding_type, structure, second_field)?;

        self.pool.wait_idle();

        if self.picture.error {
            /* Trash the picture. */
            if let Some(picture) = self.picture.picture.take() {
                if picture.deccount.load(std::sync::atomic::Ordering::Acquire) != 1 {
                    self.synchro.lock().unwrap().end(true);
                    self.output.lock().unwrap().destroy_picture(picture);
                }
            }
            self.reference_replace(coding_type, None);
            if self.picture.current_structure == PictureStructure::Frame as u32 {
                self.picture.current_structure = 0;
            }
        } else if self.picture.current_structure == PictureStructure::Frame as u32 {
            /* Frame completely parsed. */
            self.picture.picture = None;
            self.picture.current_structure = 0;
        }
        Ok(())
    }
}
