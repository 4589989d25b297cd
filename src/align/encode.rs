//! Base-255 depth encoding
//!
//! A depth sample `d` is stored as two 8-bit digits, `hi = d / 255` and
//! `lo = d - hi * 255`, and recovered as `hi * 255 + lo`. The round trip is
//! exact for `d <= 65024`.

use image::RgbImage;

use crate::sensor::{ColorSpacePoint, Resolution};

pub const ENCODE_BASE: u16 = 255;

/// Largest sample with an exact two-digit representation.
pub const MAX_ENCODABLE_DEPTH: u16 = ENCODE_BASE * ENCODE_BASE - 1;

/// Channel 2 value written next to every mapped sample when validity
/// marking is on.
pub const VALID_MARKER: u8 = 255;

#[inline]
pub fn encode(depth: u16) -> (u8, u8) {
    let hi = depth / ENCODE_BASE;
    let lo = depth - hi * ENCODE_BASE;
    (hi as u8, lo as u8)
}

#[inline]
pub fn decode(hi: u8, lo: u8) -> u16 {
    hi as u16 * ENCODE_BASE + lo as u16
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeStats {
    /// Samples written into the aligned frame, overwrites included
    pub written: usize,
    /// Samples whose point fell outside the color frame
    pub unmapped: usize,
    /// Samples above [`MAX_ENCODABLE_DEPTH`], written clamped
    pub clamped: usize,
}

/// Writes encoded depth at mapped color-space locations.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthEncoder {
    mark_valid: bool,
}

impl DepthEncoder {
    /// With `mark_valid`, channel 2 of every written pixel is set to
    /// [`VALID_MARKER`] so that depth 0 differs from "no sample".
    pub fn new(mark_valid: bool) -> Self {
        Self { mark_valid }
    }

    /// Rebuild `out` from `depth` and its projected `points`.
    ///
    /// Pixels nothing maps to stay (0, 0, 0). When several samples land on
    /// the same pixel, the one latest in raster order wins.
    pub fn encode_aligned(
        &self,
        depth: &[u16],
        points: &[ColorSpacePoint],
        resolution: Resolution,
        out: &mut RgbImage,
    ) -> EncodeStats {
        if out.dimensions() != (resolution.width, resolution.height) {
            *out = RgbImage::new(resolution.width, resolution.height);
        }
        let dst: &mut [u8] = out;
        dst.fill(0);

        let marker = if self.mark_valid { VALID_MARKER } else { 0 };
        let mut stats = EncodeStats::default();
        for (&sample, point) in depth.iter().zip(points) {
            let Some(index) = point.index_in(resolution) else {
                stats.unmapped += 1;
                continue;
            };
            let sample = if sample > MAX_ENCODABLE_DEPTH {
                stats.clamped += 1;
                MAX_ENCODABLE_DEPTH
            } else {
                sample
            };
            let (hi, lo) = encode(sample);
            let px = &mut dst[index * 3..index * 3 + 3];
            px[0] = hi;
            px[1] = lo;
            px[2] = marker;
            stats.written += 1;
        }
        stats
    }
}
