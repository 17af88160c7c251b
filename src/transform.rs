use crate::DecodeError;
use crate::frame::HostBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanarFormat {
    #[default]
    Yuv420p,
    Yuvj420p,
    Yuyv422,
    Other(u32),
}

impl PlanarFormat {
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Yuv420p | Self::Yuvj420p | Self::Yuyv422)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanarFrame {
    pub format: PlanarFormat,
    pub width: usize,
    pub height: usize,
    pub pts: i64,
    pub data: [Vec<u8>; 3],
    pub linesize: [usize; 3],
}

impl PlanarFrame {
    pub fn reshape(&mut self, format: PlanarFormat, width: usize, height: usize) {
        self.format = format;
        self.width = width;
        self.height = height;
        match format {
            PlanarFormat::Yuyv422 => {
                self.linesize = [width * 2, 0, 0];
                self.data[0].resize(width * 2 * height, 0);
                self.data[1].clear();
                self.data[2].clear();
            }
            _ => {
                let chroma_width = width.div_ceil(2);
                let chroma_height = height.div_ceil(2);
                self.linesize = [width, chroma_width, chroma_width];
                self.data[0].resize(width * height, 0);
                self.data[1].resize(chroma_width * chroma_height, 0);
                self.data[2].resize(chroma_width * chroma_height, 0);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nv12Image {
    pub width: usize,
    pub height: usize,
    pub stride: usize,
    pub data: HostBuffer,
}

impl Nv12Image {
    pub fn luma_len(&self) -> usize {
        self.stride * self.height
    }

    pub fn chroma_len(&self) -> usize {
        self.stride * self.height.div_ceil(2)
    }
}

pub fn aligned_stride(stride: usize, align: usize) -> usize {
    if align <= 1 {
        stride
    } else {
        stride.div_ceil(align) * align
    }
}

pub fn semi_planar_size(stride: usize, height: usize) -> usize {
    stride * height + stride * height.div_ceil(2)
}

/// Interleaves the chroma planes of a planar 4:2:0 frame behind its luma.
/// `swap_uv` produces VU order.
pub fn planar_to_semi_planar(
    frame: &PlanarFrame,
    dst: &mut [u8],
    dst_stride: usize,
    swap_uv: bool,
) -> Result<(), DecodeError> {
    if !matches!(frame.format, PlanarFormat::Yuv420p | PlanarFormat::Yuvj420p) {
        return Err(DecodeError::InvalidInput(format!(
            "planar conversion needs a 4:2:0 source, got {:?}",
            frame.format
        )));
    }
    let height = frame.height;
    let src_stride = frame.linesize[0];
    // Odd widths still carry a full chroma pair for the last column.
    let chroma_cols = frame.width.div_ceil(2).min(frame.linesize[1]);
    if dst_stride < frame.width
        || dst_stride < chroma_cols * 2
        || dst.len() < semi_planar_size(dst_stride, height)
    {
        return Err(DecodeError::InvalidInput(
            "semi-planar destination is smaller than the frame".to_string(),
        ));
    }
    let (dst_y, dst_uv) = dst.split_at_mut(dst_stride * height);

    if src_stride == dst_stride {
        let luma = src_stride * height;
        dst_y[..luma].copy_from_slice(&frame.data[0][..luma]);
    } else {
        let row_bytes = frame.width.min(src_stride);
        for row in 0..height {
            let src = &frame.data[0][row * src_stride..row * src_stride + row_bytes];
            dst_y[row * dst_stride..row * dst_stride + row_bytes].copy_from_slice(src);
        }
    }

    for row in 0..height.div_ceil(2) {
        let mut u = &frame.data[1][row * frame.linesize[1]..];
        let mut v = &frame.data[2][row * frame.linesize[2]..];
        if swap_uv {
            std::mem::swap(&mut u, &mut v);
        }
        let dst_row = &mut dst_uv[row * dst_stride..row * dst_stride + chroma_cols * 2];
        for (col, pair) in dst_row.chunks_exact_mut(2).enumerate() {
            pair[0] = u[col];
            pair[1] = v[col];
        }
    }
    Ok(())
}

pub fn yuyv_to_planar(frame: &PlanarFrame, out: &mut PlanarFrame) -> Result<(), DecodeError> {
    if frame.format != PlanarFormat::Yuyv422 {
        return Err(DecodeError::InvalidInput(format!(
            "packed conversion needs a yuyv source, got {:?}",
            frame.format
        )));
    }
    let width = frame.width;
    let height = frame.height;
    let src_stride = frame.linesize[0];
    if width < 2 || height == 0 {
        return Err(DecodeError::InvalidInput(format!(
            "yuyv frame of {width}x{height} is too small"
        )));
    }
    if src_stride < width * 2 || frame.data[0].len() < src_stride * height {
        return Err(DecodeError::InvalidInput(
            "yuyv plane is smaller than the frame".to_string(),
        ));
    }
    out.reshape(PlanarFormat::Yuv420p, width, height);
    out.pts = frame.pts;

    for row in 0..height {
        let src = &frame.data[0][row * src_stride..];
        let dst = &mut out.data[0][row * width..(row + 1) * width];
        for (x, y) in dst.iter_mut().enumerate() {
            *y = src[x * 2];
        }
    }

    let chroma_width = out.linesize[1];
    let last_pair = src_stride.saturating_sub(4) / 4 * 4;
    for row in 0..height.div_ceil(2) {
        let top = &frame.data[0][(row * 2) * src_stride..];
        let bottom_row = (row * 2 + 1).min(height - 1);
        let bottom = &frame.data[0][bottom_row * src_stride..];
        for col in 0..chroma_width {
            // Odd widths have no trailing V sample; reuse the last full pair.
            let base = (col * 4).min(last_pair);
            let u = (u16::from(top[base + 1]) + u16::from(bottom[base + 1]) + 1) / 2;
            let v = (u16::from(top[base + 3]) + u16::from(bottom[base + 3]) + 1) / 2;
            out.data[1][row * chroma_width + col] = u as u8;
            out.data[2][row * chroma_width + col] = v as u8;
        }
    }
    Ok(())
}

pub fn normalize_to_nv12(
    frame: &PlanarFrame,
    stride_align: usize,
    scratch: &mut PlanarFrame,
) -> Result<Nv12Image, DecodeError> {
    let source = match frame.format {
        PlanarFormat::Yuv420p | PlanarFormat::Yuvj420p => frame,
        PlanarFormat::Yuyv422 => {
            yuyv_to_planar(frame, scratch)?;
            &*scratch
        }
        PlanarFormat::Other(code) => {
            return Err(DecodeError::InvalidInput(format!(
                "unsupported software pixel format {code}; expected yuv420p, yuvj420p or yuyv422"
            )));
        }
    };

    let stride = aligned_stride(source.linesize[0].next_multiple_of(2), stride_align);
    let mut data = HostBuffer::alloc_exact(semi_planar_size(stride, source.height))?;
    planar_to_semi_planar(source, data.as_mut_slice(), stride, false)?;
    Ok(Nv12Image {
        width: source.width,
        height: source.height,
        stride,
        data,
    })
}

pub fn make_i420_dummy(width: usize, height: usize, seed: u8) -> PlanarFrame {
    let mut frame = PlanarFrame::default();
    frame.reshape(PlanarFormat::Yuv420p, width, height);
    for y in 0..height {
        for x in 0..width {
            frame.data[0][y * width + x] = seed.wrapping_add(((x + y) % 16) as u8);
        }
    }
    frame.data[1].fill(100);
    frame.data[2].fill(200);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_alignment_rounds_up() {
        assert_eq!(aligned_stride(1920, 128), 1920);
        assert_eq!(aligned_stride(1000, 128), 1024);
        assert_eq!(aligned_stride(1000, 1), 1000);
    }

    #[test]
    fn planar_to_nv12_interleaves_chroma() {
        let frame = make_i420_dummy(8, 4, 10);
        let mut dst = vec![0_u8; semi_planar_size(8, 4)];
        planar_to_semi_planar(&frame, &mut dst, 8, false).unwrap();
        assert_eq!(&dst[..8], &frame.data[0][..8]);
        assert_eq!(&dst[32..36], &[100, 200, 100, 200]);

        planar_to_semi_planar(&frame, &mut dst, 8, true).unwrap();
        assert_eq!(&dst[32..34], &[200, 100]);
    }

    #[test]
    fn normalize_pads_rows_to_alignment() {
        let frame = make_i420_dummy(100, 4, 0);
        let mut scratch = PlanarFrame::default();
        let image = normalize_to_nv12(&frame, 128, &mut scratch).unwrap();
        assert_eq!(image.stride, 128);
        assert_eq!(image.data.len(), semi_planar_size(128, 4));
        let data = image.data.as_slice();
        assert_eq!(&data[128..228], &frame.data[0][100..200]);
        assert_eq!(data[image.luma_len()], 100);
        assert_eq!(data[image.luma_len() + 1], 200);
    }

    #[test]
    fn odd_dimensions_keep_last_chroma_row_and_column() {
        let frame = make_i420_dummy(5, 3, 0);
        let mut scratch = PlanarFrame::default();
        let image = normalize_to_nv12(&frame, 1, &mut scratch).unwrap();
        assert_eq!(image.stride, 6);
        assert_eq!(image.chroma_len(), 12);
        assert_eq!(image.data.len(), semi_planar_size(6, 3));
        let data = image.data.as_slice();
        assert_eq!(&data[12..17], &frame.data[0][10..15]);
        let chroma = &data[image.luma_len()..];
        assert_eq!(chroma, &[100, 200, 100, 200, 100, 200, 100, 200, 100, 200, 100, 200]);

        let mut narrow = vec![0_u8; semi_planar_size(5, 3)];
        assert!(matches!(
            planar_to_semi_planar(&frame, &mut narrow, 5, false),
            Err(DecodeError::InvalidInput(_))
        ));
    }

    #[test]
    fn yuyv_goes_through_planar_before_packing() {
        let mut packed = PlanarFrame::default();
        packed.reshape(PlanarFormat::Yuyv422, 4, 2);
        // Row 0: Y=1,2,3,4 U=10,30 V=20,40; row 1: Y=5..8 U=12,32 V=22,42
        packed.data[0] = vec![
            1, 10, 2, 20, 3, 30, 4, 40, //
            5, 12, 6, 22, 7, 32, 8, 42,
        ];
        let mut scratch = PlanarFrame::default();
        let image = normalize_to_nv12(&packed, 1, &mut scratch).unwrap();
        assert_eq!(image.stride, 4);
        let data = image.data.as_slice();
        assert_eq!(&data[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&data[8..12], &[11, 21, 31, 41]);
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let mut frame = make_i420_dummy(4, 4, 0);
        frame.format = PlanarFormat::Other(42);
        let mut scratch = PlanarFrame::default();
        assert!(matches!(
            normalize_to_nv12(&frame, 1, &mut scratch),
            Err(DecodeError::InvalidInput(_))
        ));
    }
}
