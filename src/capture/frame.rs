use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::sensor::{Resolution, StreamHandle, StreamKind};

/// A frame handed out by the sensor. The payload stays owned by the sensor
/// until the frame is released back to it.
#[derive(Debug)]
pub struct RawFrame {
    pub stream: StreamHandle,
    pub meta: FrameMetadata,
    /// Backing texture memory, only readable through a lock
    pub payload: Bytes,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

impl FrameMetadata {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Distance between the hardware timestamps of two frames, when both
    /// carry one.
    pub fn stream_skew(&self, other: &FrameMetadata) -> Option<Duration> {
        let (a, b) = (self.device_timestamp?, other.device_timestamp?);
        Some(if a > b { a - b } else { b - a })
    }
}

/// Pixel formats delivered by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 4 interleaved channels, B G R A
    Bgra32,
    /// 16-bit little-endian depth in millimeters
    Depth16,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra32 => 4,
            PixelFormat::Depth16 => 2,
        }
    }
}

/// Locked view of a frame's memory as returned by the sensor.
#[derive(Debug, Clone)]
pub struct LockedRect {
    pub bits: Bytes,
    /// Bytes per row, may include padding
    pub pitch: usize,
}

/// Checks that `len` bytes with the given pitch hold `res` pixels of `format`.
fn check_extent(
    stream: StreamKind,
    len: usize,
    pitch: usize,
    res: Resolution,
    format: PixelFormat,
) -> Result<()> {
    let row = res.width as usize * format.bytes_per_pixel();
    let rows = res.height as usize;
    let expected = if rows == 0 {
        0
    } else {
        pitch.max(row) * (rows - 1) + row
    };
    if pitch < row || len < expected {
        return Err(PipelineError::BufferSize {
            stream,
            expected,
            actual: len,
        });
    }
    Ok(())
}

/// Row access over a locked BGRA buffer.
#[derive(Debug, Clone, Copy)]
pub struct ColorView<'a> {
    bits: &'a [u8],
    pitch: usize,
    resolution: Resolution,
}

impl<'a> ColorView<'a> {
    pub fn new(bits: &'a [u8], pitch: usize, resolution: Resolution) -> Result<Self> {
        check_extent(
            StreamKind::Color,
            bits.len(),
            pitch,
            resolution,
            PixelFormat::Bgra32,
        )?;
        Ok(Self {
            bits,
            pitch,
            resolution,
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Pixel bytes of row `y`, without padding.
    pub fn row(&self, y: u32) -> &'a [u8] {
        let start = y as usize * self.pitch;
        &self.bits[start..start + self.resolution.width as usize * 4]
    }

    pub fn rows(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        (0..self.resolution.height).map(move |y| self.row(y))
    }
}

/// Row access over a locked 16-bit depth buffer.
#[derive(Debug, Clone, Copy)]
pub struct DepthView<'a> {
    bits: &'a [u8],
    pitch: usize,
    resolution: Resolution,
}

impl<'a> DepthView<'a> {
    pub fn new(bits: &'a [u8], pitch: usize, resolution: Resolution) -> Result<Self> {
        check_extent(
            StreamKind::Depth,
            bits.len(),
            pitch,
            resolution,
            PixelFormat::Depth16,
        )?;
        Ok(Self {
            bits,
            pitch,
            resolution,
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Decodes every sample into `out` in raster order, replacing its contents.
    pub fn read_samples(&self, out: &mut Vec<u16>) {
        out.clear();
        out.reserve(self.resolution.pixel_count());
        let row_len = self.resolution.width as usize * 2;
        for y in 0..self.resolution.height as usize {
            let start = y * self.pitch;
            out.extend(
                self.bits[start..start + row_len]
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]])),
            );
        }
    }
}
