//! Final stage of block reconstruction: move the IDCT output into the
//! picture, either copying (intra) or adding to the motion-compensated
//! prediction (non-intra), saturating to the 8-bit sample range. The stride
//! is the destination's line jump: the plane width, doubled for field DCT or
//! field pictures.

use lumiere_video::RawPlane;

fn block_fits(plane: RawPlane, offset: usize, stride: usize) -> bool {
    // Last sample touched: 7 line jumps down, 8 samples across.
    offset + 7 * stride + 8 <= plane.len
}

/// Copies an intra block into the destination with saturation.
pub fn copy_block(coeffs: &[i16; 64], plane: RawPlane, offset: usize, stride: usize) {
    if !block_fits(plane, offset, stride) {
        tracing::warn!("intra block outside picture, dropped");
        return;
    }
    for y in 0..8 {
        let line = offset + y * stride;
        for x in 0..8 {
            let v = coeffs[y * 8 + x].clamp(0, 255) as u8;
            unsafe { plane.ptr.add(line + x).write(v) };
        }
    }
}

/// Adds a residual block over the prediction with saturation.
pub fn add_block(coeffs: &[i16; 64], plane: RawPlane, offset: usize, stride: usize) {
    if !block_fits(plane, offset, stride) {
        tracing::warn!("residual block outside picture, dropped");
        return;
    }
    for y in 0..8 {
        let line = offset + y * stride;
        for x in 0..8 {
            unsafe {
                let p = plane.ptr.add(line + x);
                let v = i16::from(p.read()) + coeffs[y * 8 + x];
                p.write(v.clamp(0, 255) as u8);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumiere_video::{ChromaFormat, PictureBuffer, PlaneId};

    #[test]
    fn copy_saturates_both_ends() {
        let pic = PictureBuffer::new(ChromaFormat::Chroma420, 16, 16);
        let mut coeffs = [0i16; 64];
        coeffs[0] = -5;
        coeffs[1] = 300;
        coeffs[63] = 128;
        copy_block(&coeffs, pic.raw_plane(PlaneId::Y), 0, 16);
        let planes = pic.planes();
        assert_eq!(planes.y[0], 0);
        assert_eq!(planes.y[1], 255);
        assert_eq!(planes.y[7 * 16 + 7], 128);
    }

    #[test]
    fn add_is_residual_over_prediction() {
        let pic = PictureBuffer::new(ChromaFormat::Chroma420, 16, 16);
        unsafe { pic.planes_mut() }.y.fill(100);
        let mut coeffs = [0i16; 64];
        coeffs[0] = -10;
        coeffs[1] = 200;
        add_block(&coeffs, pic.raw_plane(PlaneId::Y), 0, 16);
        let planes = pic.planes();
        assert_eq!(planes.y[0], 90);
        assert_eq!(planes.y[1], 255);
        assert_eq!(planes.y[2], 100);
    }

    #[test]
    fn interlaced_stride_writes_alternate_lines() {
        let pic = PictureBuffer::new(ChromaFormat::Chroma420, 16, 16);
        let coeffs = [50i16; 64];
        copy_block(&coeffs, pic.raw_plane(PlaneId::Y), 0, 32);
        let planes = pic.planes();
        assert_eq!(planes.y[0], 50);
        assert_eq!(planes.y[16], 0);
        assert_eq!(planes.y[32], 50);
    }
}
