use image::RgbImage;

use crate::capture::frame::ColorView;

/// BGRA → RGB reformatting for the render stage.
pub struct ColorSpaceConverter;

impl ColorSpaceConverter {
    /// Reorder every pixel of `raw` into `out`, dropping alpha. `out` is
    /// reallocated if its dimensions differ from the source.
    pub fn to_renderable(raw: &ColorView<'_>, out: &mut RgbImage) {
        let res = raw.resolution();
        if out.dimensions() != (res.width, res.height) {
            *out = RgbImage::new(res.width, res.height);
        }

        let row_len = res.width as usize * 3;
        let dst: &mut [u8] = out;
        for (src_row, dst_row) in raw.rows().zip(dst.chunks_exact_mut(row_len)) {
            for (bgra, rgb) in src_row.chunks_exact(4).zip(dst_row.chunks_exact_mut(3)) {
                rgb[0] = bgra[2];
                rgb[1] = bgra[1];
                rgb[2] = bgra[0];
            }
        }
    }

    /// Allocating form of [`to_renderable`](Self::to_renderable).
    pub fn convert(raw: &ColorView<'_>) -> RgbImage {
        let res = raw.resolution();
        let mut out = RgbImage::new(res.width, res.height);
        Self::to_renderable(raw, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::Resolution;

    #[test]
    fn channels_are_reordered_and_alpha_dropped() {
        let res = Resolution::new(2, 1);
        let bgra = [10, 20, 30, 40, 200, 150, 100, 0];
        let view = ColorView::new(&bgra, 8, res).unwrap();
        let rgb = ColorSpaceConverter::convert(&view);
        assert_eq!(rgb.get_pixel(0, 0).0, [30, 20, 10]);
        assert_eq!(rgb.get_pixel(1, 0).0, [100, 150, 200]);
    }

    #[test]
    fn every_pixel_keeps_its_color() {
        let res = Resolution::new(16, 16);
        let mut bgra = Vec::new();
        for i in 0..res.pixel_count() {
            let v = (i * 7) as u8;
            bgra.extend_from_slice(&[v, v.wrapping_add(1), v.wrapping_add(2), 255 - v]);
        }
        let view = ColorView::new(&bgra, 64, res).unwrap();
        let rgb = ColorSpaceConverter::convert(&view);
        for (i, px) in rgb.pixels().enumerate() {
            let src = &bgra[i * 4..i * 4 + 4];
            assert_eq!(px.0, [src[2], src[1], src[0]]);
        }
    }

    #[test]
    fn padded_rows_convert_correctly() {
        let res = Resolution::new(1, 2);
        // pitch 8: one pixel plus 4 padding bytes per row
        let bgra = [1, 2, 3, 4, 9, 9, 9, 9, 5, 6, 7, 8];
        let view = ColorView::new(&bgra, 8, res).unwrap();
        let rgb = ColorSpaceConverter::convert(&view);
        assert_eq!(rgb.get_pixel(0, 0).0, [3, 2, 1]);
        assert_eq!(rgb.get_pixel(0, 1).0, [7, 6, 5]);
    }

    #[test]
    fn mismatched_output_is_resized() {
        let res = Resolution::new(2, 2);
        let bgra = [0u8; 16];
        let view = ColorView::new(&bgra, 8, res).unwrap();
        let mut out = RgbImage::new(1, 1);
        ColorSpaceConverter::to_renderable(&view, &mut out);
        assert_eq!(out.dimensions(), (2, 2));
    }
}
