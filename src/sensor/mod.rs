//! Depth sensor capability interface
//!
//! The pipeline only ever talks to the camera through [`SensorStreamService`],
//! so a real SDK binding and the [`SyntheticSensor`] are interchangeable.

pub mod calibration;
pub mod synthetic;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capture::frame::{LockedRect, RawFrame};
use crate::error::Result;

pub use calibration::{Calibration, Intrinsics};
pub use synthetic::{MappingModel, Pacer, SyntheticSensor};

/// Frame dimensions shared by both streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// The only mode both streams are opened in.
    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Color,
    Depth,
}

impl StreamKind {
    pub(crate) fn index(self) -> usize {
        match self {
            StreamKind::Color => 0,
            StreamKind::Depth => 1,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamKind::Color => "color",
            StreamKind::Depth => "depth",
        })
    }
}

/// Opaque handle to an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle {
    pub kind: StreamKind,
    pub id: u32,
}

/// Color-image pixel a depth sample projects onto. Either coordinate may be
/// outside the frame, in which case the point is unmapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ColorSpacePoint {
    pub x: i32,
    pub y: i32,
}

impl ColorSpacePoint {
    pub const INVALID: ColorSpacePoint = ColorSpacePoint { x: -1, y: -1 };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Raster index of this point in a frame of `res`, if it lies inside it.
    pub fn index_in(&self, res: Resolution) -> Option<usize> {
        let (x, y) = (u32::try_from(self.x).ok()?, u32::try_from(self.y).ok()?);
        (x < res.width && y < res.height).then(|| y as usize * res.width as usize + x as usize)
    }
}

/// Hardware abstraction over a color + depth camera.
///
/// Frame readiness is reported through a bounded channel per stream: a
/// pending message means "a new frame is ready", draining it clears the
/// signal. Every frame returned by [`next_frame`](Self::next_frame) must be
/// handed back through [`release_frame`](Self::release_frame), and every
/// successful lock paired with [`unlock_buffer`](Self::unlock_buffer).
pub trait SensorStreamService: Send + Sync {
    /// Open one of the two streams in the given mode.
    fn open_stream(&self, kind: StreamKind, resolution: Resolution) -> Result<StreamHandle>;

    /// Readiness signal for an open stream.
    fn readiness(&self, stream: StreamHandle) -> Result<flume::Receiver<()>>;

    /// Fails if the depth → color calibration cannot be used.
    fn calibration_ready(&self) -> Result<()> {
        Ok(())
    }

    /// Take the next frame of a stream without waiting.
    fn next_frame(&self, stream: StreamHandle) -> Result<RawFrame>;

    fn lock_buffer(&self, frame: &RawFrame) -> Result<LockedRect>;

    fn unlock_buffer(&self, frame: &RawFrame);

    fn release_frame(&self, stream: StreamHandle, frame: RawFrame);

    /// Project every depth sample (raster order) into the color image plane.
    /// `out` has one slot per sample.
    fn map_depth_to_color_space(
        &self,
        depth: &[u16],
        resolution: Resolution,
        out: &mut [ColorSpacePoint],
    ) -> Result<()>;

    fn close_stream(&self, _stream: StreamHandle) {}
}
