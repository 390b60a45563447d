//! Motion-compensated prediction.
//!
//! A prediction is one kernel call per plane: copy or average, with half-pel
//! interpolation selected independently per axis. The mode drivers that the
//! parser uses to turn decoded vectors into [`MotionDescriptor`]s live here
//! too, one per (picture structure x motion type) combination.

use lumiere_video::{PictureHandle, PlaneId, RawPlane};

use super::{MacroblockRecord, MotionDescriptor, PredSource, MAX_MOTIONS};
use crate::types::MacroblockType;

/// Half-pel interpolation selector: bit 0 horizontal, bit 1 vertical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HalfPel {
    None,
    Horizontal,
    Vertical,
    Bilinear,
}

impl HalfPel {
    fn from_vector(mv_x: i32, mv_y: i32) -> Self {
        match ((mv_y & 1) << 1) | (mv_x & 1) {
            0 => HalfPel::None,
            1 => HalfPel::Horizontal,
            2 => HalfPel::Vertical,
            _ => HalfPel::Bilinear,
        }
    }
}

/// Rectangle prediction kernel.
///
/// `stride` is the jump between predicted lines (source and destination
/// advance together); `step` is the distance to the vertically adjacent
/// sample used by the half-pel filters. Ranges are validated by the caller;
/// the pointers may belong to the same plane (opposite fields).
#[allow(clippy::too_many_arguments)]
fn component(
    src: RawPlane,
    src_offset: usize,
    dst: RawPlane,
    dst_offset: usize,
    width: usize,
    height: usize,
    stride: usize,
    step: usize,
    half_pel: HalfPel,
    average: bool,
) {
    let s = src.ptr;
    let d = dst.ptr;
    for line in 0..height {
        let so = src_offset + line * stride;
        let do_ = dst_offset + line * stride;
        for x in 0..width {
            let predicted = unsafe {
                let a = u32::from(s.add(so + x).read());
                match half_pel {
                    HalfPel::None => a,
                    HalfPel::Horizontal => {
                        (a + u32::from(s.add(so + x + 1).read()) + 1) >> 1
                    }
                    HalfPel::Vertical => {
                        (a + u32::from(s.add(so + x + step).read()) + 1) >> 1
                    }
                    HalfPel::Bilinear => {
                        (a + u32::from(s.add(so + x + 1).read())
                            + u32::from(s.add(so + x + step).read())
                            + u32::from(s.add(so + x + step + 1).read())
                            + 2)
                            >> 2
                    }
                }
            };
            unsafe {
                let p = d.add(do_ + x);
                let v = if average {
                    (u32::from(p.read()) + predicted + 1) >> 1
                } else {
                    predicted
                };
                p.write(v as u8);
            }
        }
    }
}

struct ComponentArgs {
    width: usize,
    height: usize,
    stride: usize,
    step: usize,
    half_pel: HalfPel,
}

/// Checked kernel invocation: refuses source rectangles that leave the
/// plane, which is how damaged motion vectors surface.
#[allow(clippy::too_many_arguments)]
fn checked_component(
    src: RawPlane,
    src_offset: isize,
    dst: RawPlane,
    dst_offset: usize,
    args: ComponentArgs,
    average: bool,
) -> bool {
    if src_offset < 0 {
        return false;
    }
    let src_offset = src_offset as usize;
    let extra = match args.half_pel {
        HalfPel::None => 0,
        HalfPel::Horizontal => 1,
        HalfPel::Vertical => args.step,
        HalfPel::Bilinear => args.step + 1,
    };
    let src_last = src_offset + (args.height - 1) * args.stride + args.width + extra;
    let dst_last = dst_offset + (args.height - 1) * args.stride + args.width;
    if src_last > src.len || dst_last > dst.len {
        return false;
    }
    component(
        src,
        src_offset,
        dst,
        dst_offset,
        args.width,
        args.height,
        args.stride,
        args.step,
        args.half_pel,
        average,
    );
    true
}

fn source_picture<'a>(
    record: &'a MacroblockRecord,
    source: PredSource,
) -> Option<&'a PictureHandle> {
    match source {
        PredSource::Forward => record.forward.as_ref(),
        PredSource::Backward => record.backward.as_ref(),
        PredSource::Current => record.picture.as_ref(),
    }
}

/// Executes one prediction: a 16-wide luma rectangle and, at 4:2:0, an
/// 8-wide rectangle on each chroma plane.
pub fn compensate(record: &MacroblockRecord, descriptor: &MotionDescriptor, grayscale: bool) {
    let Some(source) = source_picture(record, descriptor.source) else {
        // A damaged stream can request a prediction with no reference
        // available; the macroblock keeps whatever is in the buffer.
        return;
    };
    let Some(dest) = record.picture.as_ref() else {
        return;
    };

    let width = dest.width() as isize;
    let chroma_width = dest.chroma_width() as isize;
    let (mv_x, mv_y) = (descriptor.mv_x, descriptor.mv_y);
    let src_field = descriptor.src_field as usize;
    let dst_field = descriptor.dst_field as usize;

    /* Luminance. */
    let src_offset = (record.l_x as isize + (mv_x >> 1) as isize)
        + (record.motion_l_y + descriptor.v_offset + src_field) as isize * width
        + (mv_y >> 1) as isize * record.l_stride as isize;
    let dst_offset = record.l_x + (record.motion_l_y + dst_field) * width as usize;
    let ok = checked_component(
        source.raw_plane(PlaneId::Y),
        src_offset,
        dest.raw_plane(PlaneId::Y),
        dst_offset,
        ComponentArgs {
            width: 16,
            height: descriptor.height,
            stride: descriptor.pred_l_stride,
            step: record.l_stride,
            half_pel: HalfPel::from_vector(mv_x, mv_y),
        },
        descriptor.average,
    );
    if !ok {
        tracing::warn!("bad motion vector (lum)");
        return;
    }

    if grayscale {
        return;
    }

    /* Chrominance: the vector is halved, truncating towards zero, and the
     * half-pel flags are recomputed from the halved vector. */
    let (cv_x, cv_y) = (mv_x / 2, mv_y / 2);
    let src_offset = (record.c_x as isize + (cv_x >> 1) as isize)
        + (record.motion_c_y + (descriptor.v_offset >> 1) + src_field) as isize * chroma_width
        + (cv_y >> 1) as isize * record.c_stride as isize;
    let dst_offset = record.c_x + (record.motion_c_y + dst_field) * chroma_width as usize;
    let half_pel = HalfPel::from_vector(cv_x, cv_y);

    for plane in [PlaneId::U, PlaneId::V] {
        let ok = checked_component(
            source.raw_plane(plane),
            src_offset,
            dest.raw_plane(plane),
            dst_offset,
            ComponentArgs {
                width: 8,
                height: descriptor.height >> 1,
                stride: descriptor.pred_c_stride,
                step: record.c_stride,
                half_pel,
            },
            descriptor.average,
        );
        if !ok {
            tracing::warn!("bad motion vector (chroma)");
            return;
        }
    }
}

/// Motion mode of a macroblock, the cross product of picture structure and
/// coded motion_type that survives parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionMode {
    FrameFrame,
    FrameField,
    FrameDmv,
    FieldField,
    Field16x8,
    FieldDmv,
}

/// Inputs to descriptor construction, straight off the macroblock parser.
pub struct MotionParams {
    pub mb_type: MacroblockType,
    /// Decoded vectors, `[r][s][xy]`.
    pub mvs: [[[i32; 2]; 2]; 2],
    /// Dual-prime derived vectors, `[parity][xy]`.
    pub dmv: [[i32; 2]; 2],
    /// Field selects, `[r][s]`.
    pub field_select: [[bool; 2]; 2],
    pub motion_field: bool,
    pub p_second: bool,
    pub l_stride: usize,
    pub c_stride: usize,
}

impl MotionParams {
    fn fwd(&self) -> bool {
        self.mb_type.contains(MacroblockType::MOTION_FORWARD)
    }

    fn bwd(&self) -> bool {
        self.mb_type.contains(MacroblockType::MOTION_BACKWARD)
    }

    /// Forward predictions of the second field of a P frame read the freshly
    /// decoded opposite field when the field select points at it.
    fn forward_source(&self, select: bool) -> PredSource {
        if self.p_second && self.motion_field != select {
            PredSource::Current
        } else {
            PredSource::Forward
        }
    }
}

/// Expands a macroblock's motion state into at most four predictions.
pub fn build_descriptors(mode: MotionMode, p: &MotionParams) -> ([MotionDescriptor; MAX_MOTIONS], usize) {
    let mut out = [MotionDescriptor::default(); MAX_MOTIONS];
    let mut n = 0;

    let mut push = |d: MotionDescriptor| {
        out[n] = d;
        n += 1;
    };

    let desc = |source: PredSource,
                src_field: bool,
                dst_field: bool,
                mv: [i32; 2],
                stride_mul: usize,
                height: usize,
                v_offset: usize,
                average: bool| MotionDescriptor {
        source,
        src_field,
        dst_field,
        mv_x: mv[0],
        mv_y: mv[1],
        pred_l_stride: p.l_stride * stride_mul,
        pred_c_stride: p.c_stride * stride_mul,
        height,
        v_offset,
        average,
    };

    match mode {
        MotionMode::FrameFrame => {
            if p.fwd() {
                push(desc(PredSource::Forward, false, false, p.mvs[0][0], 1, 16, 0, false));
                if p.bwd() {
                    push(desc(PredSource::Backward, false, false, p.mvs[0][1], 1, 16, 0, true));
                }
            } else {
                push(desc(PredSource::Backward, false, false, p.mvs[0][1], 1, 16, 0, false));
            }
        }

        MotionMode::FrameField => {
            if p.fwd() {
                push(desc(PredSource::Forward, p.field_select[0][0], false, p.mvs[0][0], 2, 8, 0, false));
                push(desc(PredSource::Forward, p.field_select[1][0], true, p.mvs[1][0], 2, 8, 0, false));
                if p.bwd() {
                    push(desc(PredSource::Backward, p.field_select[0][1], false, p.mvs[0][1], 2, 8, 0, true));
                    push(desc(PredSource::Backward, p.field_select[1][1], true, p.mvs[1][1], 2, 8, 0, true));
                }
            } else {
                push(desc(PredSource::Backward, p.field_select[0][1], false, p.mvs[0][1], 2, 8, 0, false));
                push(desc(PredSource::Backward, p.field_select[1][1], true, p.mvs[1][1], 2, 8, 0, false));
            }
        }

        MotionMode::FrameDmv => {
            // Forward-only, P pictures. Both fields take the base vector
            // from their own parity, then average in the opposite-parity
            // prediction displaced by the derived vector.
            push(desc(PredSource::Forward, false, false, p.mvs[0][0], 2, 8, 0, false));
            push(desc(PredSource::Forward, true, false, [p.dmv[0][0], p.dmv[0][1]], 2, 8, 0, true));
            push(desc(PredSource::Forward, true, true, p.mvs[0][0], 2, 8, 0, false));
            push(desc(PredSource::Forward, false, true, [p.dmv[1][0], p.dmv[1][1]], 2, 8, 0, true));
        }

        MotionMode::FieldField => {
            if p.fwd() {
                let src = p.forward_source(p.field_select[0][0]);
                push(desc(src, p.field_select[0][0], p.motion_field, p.mvs[0][0], 1, 16, 0, false));
                if p.bwd() {
                    push(desc(PredSource::Backward, p.field_select[0][1], p.motion_field, p.mvs[0][1], 1, 16, 0, true));
                }
            } else {
                push(desc(PredSource::Backward, p.field_select[0][1], p.motion_field, p.mvs[0][1], 1, 16, 0, false));
            }
        }

        MotionMode::Field16x8 => {
            if p.fwd() {
                let src = p.forward_source(p.field_select[0][0]);
                push(desc(src, p.field_select[0][0], p.motion_field, p.mvs[0][0], 1, 8, 0, false));
                let src = p.forward_source(p.field_select[1][0]);
                push(desc(src, p.field_select[1][0], p.motion_field, p.mvs[1][0], 1, 8, 8, false));
                if p.bwd() {
                    push(desc(PredSource::Backward, p.field_select[0][1], p.motion_field, p.mvs[0][1], 1, 8, 0, true));
                    push(desc(PredSource::Backward, p.field_select[1][1], p.motion_field, p.mvs[1][1], 1, 8, 8, true));
                }
            } else {
                push(desc(PredSource::Backward, p.field_select[0][1], p.motion_field, p.mvs[0][1], 1, 8, 0, false));
                push(desc(PredSource::Backward, p.field_select[1][1], p.motion_field, p.mvs[1][1], 1, 8, 8, false));
            }
        }

        MotionMode::FieldDmv => {
            // Same parity with the base vector, then average the opposite
            // parity at the derived vector; the opposite field of a second
            // P field is the picture being decoded.
            push(desc(PredSource::Forward, p.motion_field, p.motion_field, p.mvs[0][0], 1, 16, 0, false));
            let src = if p.p_second {
                PredSource::Current
            } else {
                PredSource::Forward
            };
            push(desc(src, !p.motion_field, p.motion_field, [p.dmv[0][0], p.dmv[0][1]], 1, 16, 0, true));
        }
    }

    (out, n)
}
