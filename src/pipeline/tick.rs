//! One capture → align → publish pass

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, error, instrument, warn};

use crate::align::{ColorSpaceConverter, CoordinateMapper, DepthEncoder};
use crate::capture::{acquire_frame, CancelToken, SensorSession, StreamSynchronizer};
use crate::error::{PipelineError, Result};
use crate::pipeline::publisher::{AlignedFramePublisher, PublishedFrame};
use crate::pipeline::ringbuf::TickTimings;
use crate::sensor::StreamKind;
use crate::{PipelineConfig, PipelineMetrics};

/// What a single tick did.
#[derive(Debug)]
pub enum TickOutcome {
    Published { generation: u64 },
    /// Recoverable failure; the previous pair stays published
    Skipped(PipelineError),
}

/// Owns the sensor session and every per-tick scratch buffer.
pub struct AlignmentPipeline {
    session: SensorSession,
    synchronizer: StreamSynchronizer,
    mapper: CoordinateMapper,
    encoder: DepthEncoder,
    publisher: Arc<AlignedFramePublisher>,
    depth_samples: Vec<u16>,
    spare: Option<PublishedFrame>,
    timings: TickTimings,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
    ticks_published: u64,
    ticks_failed: u64,
    samples_clamped: u64,
    last_skew: Option<Duration>,
    started: Instant,
}

impl AlignmentPipeline {
    pub fn new(
        session: SensorSession,
        publisher: Arc<AlignedFramePublisher>,
        config: &PipelineConfig,
        cancel: CancelToken,
    ) -> Self {
        let resolution = session.resolution();
        let timeout = (config.wait_timeout_ms > 0)
            .then(|| Duration::from_millis(config.wait_timeout_ms));
        let synchronizer = StreamSynchronizer::new(
            session.readiness(StreamKind::Color).clone(),
            session.readiness(StreamKind::Depth).clone(),
            cancel,
            timeout,
        );

        Self {
            session,
            synchronizer,
            mapper: CoordinateMapper::new(resolution),
            encoder: DepthEncoder::new(config.mark_valid_depth),
            publisher,
            depth_samples: Vec::with_capacity(resolution.pixel_count()),
            spare: None,
            timings: TickTimings::new(config.stats_window),
            max_consecutive_failures: config.max_consecutive_failures,
            consecutive_failures: 0,
            ticks_published: 0,
            ticks_failed: 0,
            samples_clamped: 0,
            last_skew: None,
            started: Instant::now(),
        }
    }

    pub fn publisher(&self) -> &Arc<AlignedFramePublisher> {
        &self.publisher
    }

    /// Run one tick.
    ///
    /// Recoverable failures come back as [`TickOutcome::Skipped`] with the
    /// last published pair untouched. Cancellation and too many consecutive
    /// failures are returned as errors.
    #[instrument(skip(self), level = "debug")]
    pub fn tick(&mut self) -> Result<TickOutcome> {
        let start = Instant::now();
        match self.run_tick() {
            Ok(generation) => {
                let elapsed = start.elapsed();
                self.timings.record(elapsed);
                self.consecutive_failures = 0;
                self.ticks_published += 1;
                metrics::counter!("ticks_published").increment(1);
                metrics::histogram!("tick_time_us").record(elapsed.as_micros() as f64);
                debug!(generation, ?elapsed, "tick published");
                Ok(TickOutcome::Published { generation })
            }
            Err(e) if e.is_recoverable() => {
                self.consecutive_failures += 1;
                self.ticks_failed += 1;
                metrics::counter!("ticks_failed").increment(1);
                warn!(
                    "Tick failed ({} in a row), keeping last frame: {}",
                    self.consecutive_failures, e
                );
                if self.max_consecutive_failures > 0
                    && self.consecutive_failures >= self.max_consecutive_failures
                {
                    error!("Sensor keeps failing, stopping capture");
                    return Err(PipelineError::TooManyFailures(self.consecutive_failures));
                }
                Ok(TickOutcome::Skipped(e))
            }
            Err(e) => Err(e),
        }
    }

    fn run_tick(&mut self) -> Result<u64> {
        self.synchronizer.wait_for_both_streams()?;

        let resolution = self.session.resolution();
        let sensor = self.session.sensor();
        let color = acquire_frame(sensor, self.session.stream(StreamKind::Color))?;
        let depth = acquire_frame(sensor, self.session.stream(StreamKind::Depth))?;

        let color_view = color.color_view()?;
        depth.depth_view()?.read_samples(&mut self.depth_samples);
        let points = self.mapper.map_depth_to_color(sensor, &self.depth_samples)?;

        let skew = match (color.meta(), depth.meta()) {
            (Some(c), Some(d)) => c.stream_skew(d),
            _ => None,
        };
        if let Some(skew) = skew {
            metrics::histogram!("stream_skew_us").record(skew.as_micros() as f64);
        }
        self.last_skew = skew;

        // Nothing below can fail, so a reclaimed pair is never dropped
        let (mut color_out, mut depth_out) = match self.spare.take() {
            Some(frame) => (frame.color, frame.depth),
            None => (
                RgbImage::new(resolution.width, resolution.height),
                RgbImage::new(resolution.width, resolution.height),
            ),
        };

        ColorSpaceConverter::to_renderable(&color_view, &mut color_out);
        let stats = self.encoder.encode_aligned(
            &self.depth_samples,
            points,
            resolution,
            &mut depth_out,
        );

        // Hardware buffers go back before the pair becomes visible
        drop(depth);
        drop(color);

        self.samples_clamped += stats.clamped as u64;
        metrics::counter!("depth_points_mapped").increment(stats.written as u64);

        let publication = self.publisher.publish(color_out, depth_out);
        self.spare = publication.reclaimed;
        Ok(publication.generation)
    }

    pub fn metrics(&self) -> PipelineMetrics {
        let uptime = self.started.elapsed().as_secs_f64();
        PipelineMetrics {
            capture_fps: if uptime > 0.0 {
                self.ticks_published as f64 / uptime
            } else {
                0.0
            },
            ticks_published: self.ticks_published,
            ticks_failed: self.ticks_failed,
            consecutive_failures: self.consecutive_failures,
            samples_clamped: self.samples_clamped,
            avg_tick_ms: self.timings.average().as_secs_f64() * 1000.0,
            p99_tick_ms: self.timings.percentile(99.0).as_secs_f64() * 1000.0,
            stream_skew_ms: self.last_skew.map(|d| d.as_secs_f64() * 1000.0),
            last_generation: self.publisher.generation(),
        }
    }
}
