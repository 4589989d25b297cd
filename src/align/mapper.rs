use tracing::trace;

use crate::error::{PipelineError, Result};
use crate::sensor::{ColorSpacePoint, Resolution, SensorStreamService, StreamKind};

/// Projects a depth frame into color space through the sensor's calibration.
/// Owns the per-tick point scratch buffer.
pub struct CoordinateMapper {
    resolution: Resolution,
    points: Vec<ColorSpacePoint>,
}

impl CoordinateMapper {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            points: vec![ColorSpacePoint::INVALID; resolution.pixel_count()],
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// One point per depth sample, in raster order. Points outside the color
    /// frame are left for the encoder to skip.
    pub fn map_depth_to_color(
        &mut self,
        sensor: &dyn SensorStreamService,
        depth: &[u16],
    ) -> Result<&[ColorSpacePoint]> {
        let expected = self.resolution.pixel_count();
        if depth.len() != expected {
            return Err(PipelineError::BufferSize {
                stream: StreamKind::Depth,
                expected: expected * 2,
                actual: depth.len() * 2,
            });
        }

        self.points.fill(ColorSpacePoint::INVALID);
        sensor.map_depth_to_color_space(depth, self.resolution, &mut self.points)?;

        trace!(
            mapped = self
                .points
                .iter()
                .filter(|p| p.index_in(self.resolution).is_some())
                .count(),
            "depth frame mapped"
        );
        Ok(&self.points)
    }
}
