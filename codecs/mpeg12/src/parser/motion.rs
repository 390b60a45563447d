//! Motion vector decoding (13818-2 7.6.3), including the dual-prime
//! arithmetic. Vectors decode against per-direction predictors that live in
//! the macroblock context; the decoded values land in the
//! [`MotionParams`] the slice parser is assembling for the macroblock.

use super::vlc::Lookup;
use super::VideoParser;
use crate::decoder::motion::MotionParams;
use crate::error::Result;
use crate::types::{PictureStructure, MOTION_FIELD};

/// Table B.10, motion_code. Three windows, from short codes to long.
static MV_TAB0: [Lookup; 8] = [
    Lookup { value: -1, length: 0 },
    Lookup { value: 3, length: 3 },
    Lookup { value: 2, length: 2 },
    Lookup { value: 2, length: 2 },
    Lookup { value: 1, length: 1 },
    Lookup { value: 1, length: 1 },
    Lookup { value: 1, length: 1 },
    Lookup { value: 1, length: 1 },
];

static MV_TAB1: [Lookup; 8] = [
    Lookup { value: -1, length: 0 },
    Lookup { value: -1, length: 0 },
    Lookup { value: -1, length: 0 },
    Lookup { value: 7, length: 6 },
    Lookup { value: 6, length: 6 },
    Lookup { value: 5, length: 6 },
    Lookup { value: 4, length: 5 },
    Lookup { value: 4, length: 5 },
];

static MV_TAB2: [Lookup; 12] = [
    Lookup { value: 16, length: 9 },
    Lookup { value: 15, length: 9 },
    Lookup { value: 14, length: 9 },
    Lookup { value: 13, length: 9 },
    Lookup { value: 12, length: 9 },
    Lookup { value: 11, length: 9 },
    Lookup { value: 10, length: 8 },
    Lookup { value: 10, length: 8 },
    Lookup { value: 9, length: 8 },
    Lookup { value: 9, length: 8 },
    Lookup { value: 8, length: 8 },
    Lookup { value: 8, length: 8 },
];

/// One step of 7.6.3.1: fold a (code, residual) pair into a predictor,
/// wrapping into `[-16<<r_size, (16<<r_size)-1]`.
pub(crate) fn decode_motion_vector(
    prediction: &mut i32,
    r_size: u32,
    motion_code: i32,
    motion_residual: i32,
    full_pel: u32,
) {
    let limit = 16 << r_size;
    let mut vector = *prediction >> full_pel;

    if motion_code > 0 {
        vector += ((motion_code - 1) << r_size) + motion_residual + 1;
        if vector >= limit {
            vector -= limit + limit;
        }
    } else if motion_code < 0 {
        vector -= ((-motion_code - 1) << r_size) + motion_residual + 1;
        if vector < -limit {
            vector += limit + limit;
        }
    }
    *prediction = vector << full_pel;
}

impl VideoParser {
    /// motion_code VLC (table B.10), sign included. An invalid code poisons
    /// the picture.
    fn motion_code(&mut self) -> Result<i32> {
        if self.reader.get_flag()? {
            return Ok(0);
        }
        let code = self.reader.show(9)? as usize;
        let entry = if code >= 64 {
            MV_TAB0[code >> 6]
        } else if code >= 24 {
            MV_TAB1[code >> 3]
        } else if code >= 12 {
            MV_TAB2[code - 12]
        } else {
            tracing::warn!("invalid motion_code");
            self.picture.error = true;
            return Ok(0);
        };
        self.reader.remove(entry.length)?;
        Ok(if self.reader.get_flag()? {
            -entry.value
        } else {
            entry.value
        })
    }

    /// One `motion_vector()` syntactic element: horizontal then vertical
    /// code/residual pairs, dual-prime differentials interleaved when the
    /// macroblock uses them.
    #[allow(clippy::too_many_arguments)]
    fn motion_vector(
        &mut self,
        parsed: &mut MotionParams,
        r: usize,
        s: usize,
        full_pel: u32,
        structure: PictureStructure,
        h_r_size: u32,
        v_r_size: u32,
    ) -> Result<()> {
        let motion_code = self.motion_code()?;
        let motion_residual = if h_r_size != 0 && motion_code != 0 {
            self.reader.get::<i32>(h_r_size)?
        } else {
            0
        };
        decode_motion_vector(
            &mut self.mb.pmv[r][s][0],
            h_r_size,
            motion_code,
            motion_residual,
            full_pel,
        );
        parsed.mvs[r][s][0] = self.mb.pmv[r][s][0];

        let mut dm_vector = [0i32; 2];
        if self.mb.dmv {
            dm_vector[0] = if self.reader.get_flag()? {
                if self.reader.get_flag()? {
                    -1
                } else {
                    1
                }
            } else {
                0
            };
        }

        let motion_code = self.motion_code()?;
        let motion_residual = if v_r_size != 0 && motion_code != 0 {
            self.reader.get::<i32>(v_r_size)?
        } else {
            0
        };

        /* Field vectors inside frame pictures are stored doubled; the
         * predictor is halved around the decode. */
        let field_in_frame =
            self.mb.mv_format == MOTION_FIELD && structure == PictureStructure::Frame;
        if field_in_frame {
            self.mb.pmv[r][s][1] >>= 1;
        }
        decode_motion_vector(
            &mut self.mb.pmv[r][s][1],
            v_r_size,
            motion_code,
            motion_residual,
            full_pel,
        );
        if field_in_frame {
            self.mb.pmv[r][s][1] <<= 1;
        }
        parsed.mvs[r][s][1] = self.mb.pmv[r][s][1];

        if self.mb.dmv {
            dm_vector[1] = if self.reader.get_flag()? {
                if self.reader.get_flag()? {
                    -1
                } else {
                    1
                }
            } else {
                0
            };

            /* Dual-prime arithmetic (7.6.3.6). */
            let mv_x = parsed.mvs[0][0][0];
            if structure == PictureStructure::Frame {
                let mv_y = parsed.mvs[0][0][1] << 1;
                if self.picture.top_field_first {
                    /* Top from bottom, then bottom from top. */
                    parsed.dmv[0][0] = ((mv_x + (mv_x > 0) as i32) >> 1) + dm_vector[0];
                    parsed.dmv[0][1] = ((mv_y + (mv_y > 0) as i32) >> 1) + dm_vector[1] - 1;
                    parsed.dmv[1][0] = ((3 * mv_x + (mv_x > 0) as i32) >> 1) + dm_vector[0];
                    parsed.dmv[1][1] = ((3 * mv_y + (mv_y > 0) as i32) >> 1) + dm_vector[1] + 1;
                } else {
                    parsed.dmv[0][0] = ((3 * mv_x + (mv_x > 0) as i32) >> 1) + dm_vector[0];
                    parsed.dmv[0][1] = ((3 * mv_y + (mv_y > 0) as i32) >> 1) + dm_vector[1] - 1;
                    parsed.dmv[1][0] = ((mv_x + (mv_x > 0) as i32) >> 1) + dm_vector[0];
                    parsed.dmv[1][1] = ((mv_y + (mv_y > 0) as i32) >> 1) + dm_vector[1] + 1;
                }
            } else {
                let mv_y = parsed.mvs[0][0][1];
                parsed.dmv[0][0] = ((mv_x + (mv_x > 0) as i32) >> 1) + dm_vector[0];
                parsed.dmv[0][1] = ((mv_y + (mv_y > 0) as i32) >> 1) + dm_vector[1];
                /* Opposite parity shifts one line. */
                if structure == PictureStructure::TopField {
                    parsed.dmv[0][1] -= 1;
                } else {
                    parsed.dmv[0][1] += 1;
                }
            }
        }
        Ok(())
    }

    /// MPEG-1 motion vectors: one frame vector with a shared range code.
    pub(crate) fn decode_mv_mpeg1(
        &mut self,
        parsed: &mut MotionParams,
        s: usize,
        _structure: PictureStructure,
    ) -> Result<()> {
        let r_size = if s == 1 {
            self.picture.backward_f_code.saturating_sub(1)
        } else {
            self.picture.forward_f_code.saturating_sub(1)
        };
        self.motion_vector(
            parsed,
            0,
            s,
            self.picture.full_pel_vector[s] as u32,
            PictureStructure::Frame,
            r_size,
            r_size,
        )
    }

    /// MPEG-2 motion_vectors(s) field: one or two vectors with field
    /// selects, per the mode worked out from motion_type.
    pub(crate) fn decode_mv_mpeg2(
        &mut self,
        parsed: &mut MotionParams,
        s: usize,
        structure: PictureStructure,
    ) -> Result<()> {
        let h_r_size = self.picture.f_code[s][0].saturating_sub(1);
        let v_r_size = self.picture.f_code[s][1].saturating_sub(1);

        if self.mb.mv_count == 1 {
            if self.mb.mv_format == MOTION_FIELD && !self.mb.dmv {
                let select = self.reader.get_flag()?;
                parsed.field_select[0][s] = select;
                parsed.field_select[1][s] = select;
            }
            self.motion_vector(parsed, 0, s, 0, structure, h_r_size, v_r_size)?;
            self.mb.pmv[1][s] = self.mb.pmv[0][s];
            parsed.mvs[1][s] = self.mb.pmv[0][s];
        } else {
            parsed.field_select[0][s] = self.reader.get_flag()?;
            self.motion_vector(parsed, 0, s, 0, structure, h_r_size, v_r_size)?;
            parsed.field_select[1][s] = self.reader.get_flag()?;
            self.motion_vector(parsed, 1, s, 0, structure, h_r_size, v_r_size)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_delta_advances_predictor() {
        let mut pred = 0;
        decode_motion_vector(&mut pred, 0, 3, 0, 0);
        assert_eq!(pred, 3);
        decode_motion_vector(&mut pred, 0, -1, 0, 0);
        assert_eq!(pred, 2);
    }

    #[test]
    fn wraps_into_the_f_code_range() {
        // r_size 0: range [-16, 15].
        let mut pred = 15;
        decode_motion_vector(&mut pred, 0, 2, 0, 0);
        assert_eq!(pred, -15);
        let mut pred = -16;
        decode_motion_vector(&mut pred, 0, -1, 0, 0);
        assert_eq!(pred, 15);
    }

    /// Decoded vectors always land inside `[-16<<r_size, (16<<r_size)-1]`.
    #[test]
    fn vector_bound_holds_for_all_codes() {
        for r_size in 0..3u32 {
            let limit = 16 << r_size;
            for start in [-limit, -1, 0, 1, limit - 1] {
                for code in -16..=16 {
                    for residual in 0..(1 << r_size) {
                        let mut pred = start;
                        decode_motion_vector(&mut pred, r_size, code, residual, 0);
                        assert!(pred >= -limit && pred < limit, "pred {} out of range", pred);
                    }
                }
            }
        }
    }

    #[test]
    fn full_pel_scales_by_two() {
        let mut pred = 0;
        decode_motion_vector(&mut pred, 0, 1, 0, 1);
        assert_eq!(pred, 2);
    }
}
