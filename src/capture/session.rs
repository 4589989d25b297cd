use std::sync::Arc;

use tracing::{info, instrument};

use crate::error::{PipelineError, Result};
use crate::sensor::{Resolution, SensorStreamService, StreamHandle, StreamKind};

/// Sensor plus its two open streams, created once at startup and closed on drop.
pub struct SensorSession {
    sensor: Arc<dyn SensorStreamService>,
    color: StreamHandle,
    depth: StreamHandle,
    color_ready: flume::Receiver<()>,
    depth_ready: flume::Receiver<()>,
    resolution: Resolution,
}

impl SensorSession {
    /// Open both streams and check calibration. Any failure is an
    /// initialization error and leaves no stream open.
    #[instrument(skip(sensor))]
    pub fn open(sensor: Arc<dyn SensorStreamService>, resolution: Resolution) -> Result<Self> {
        let color = sensor
            .open_stream(StreamKind::Color, resolution)
            .map_err(into_init)?;

        let depth = match sensor.open_stream(StreamKind::Depth, resolution) {
            Ok(depth) => depth,
            Err(e) => {
                sensor.close_stream(color);
                return Err(into_init(e));
            }
        };

        let signals = sensor
            .calibration_ready()
            .and_then(|_| Ok((sensor.readiness(color)?, sensor.readiness(depth)?)));
        let (color_ready, depth_ready) = match signals {
            Ok(signals) => signals,
            Err(e) => {
                sensor.close_stream(color);
                sensor.close_stream(depth);
                return Err(into_init(e));
            }
        };

        info!("Sensor session open: color + depth at {}", resolution);
        Ok(Self {
            sensor,
            color,
            depth,
            color_ready,
            depth_ready,
            resolution,
        })
    }

    pub fn sensor(&self) -> &dyn SensorStreamService {
        self.sensor.as_ref()
    }

    pub fn stream(&self, kind: StreamKind) -> StreamHandle {
        match kind {
            StreamKind::Color => self.color,
            StreamKind::Depth => self.depth,
        }
    }

    pub fn readiness(&self, kind: StreamKind) -> &flume::Receiver<()> {
        match kind {
            StreamKind::Color => &self.color_ready,
            StreamKind::Depth => &self.depth_ready,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }
}

impl Drop for SensorSession {
    fn drop(&mut self) {
        self.sensor.close_stream(self.color);
        self.sensor.close_stream(self.depth);
        info!("Sensor session closed");
    }
}

fn into_init(e: PipelineError) -> PipelineError {
    match e {
        PipelineError::Initialization(_) => e,
        other => PipelineError::Initialization(other.to_string()),
    }
}
