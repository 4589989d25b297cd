//! Fixed-cadence driver for the alignment pipeline
//!
//! A dedicated capture thread runs ticks one at a time; the async side paces
//! it with an interval and hands the latest published pair to the render
//! stage. A tick request that arrives while the previous tick is still
//! running is dropped, not queued.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::capture::CancelToken;
use crate::error::{PipelineError, Result};
use crate::pipeline::publisher::AlignedFramePublisher;
use crate::pipeline::tick::AlignmentPipeline;
use crate::render::{RenderInputs, RenderStage, Viewport};
use crate::{PipelineConfig, PipelineMetrics};

pub struct CaptureLoop {
    pipeline: AlignmentPipeline,
    cadence: Duration,
    pin_core: Option<usize>,
    cancel: CancelToken,
}

impl CaptureLoop {
    pub fn new(pipeline: AlignmentPipeline, config: &PipelineConfig, cancel: CancelToken) -> Self {
        Self {
            pipeline,
            cadence: Duration::from_secs_f64(1.0 / config.tick_hz.max(1) as f64),
            pin_core: config.pin_core,
            cancel,
        }
    }

    /// Run until cancelled, until the pipeline hits a fatal error, or until
    /// the render stage fails. The capture thread is joined on every exit
    /// and the cancel token is left cancelled.
    pub async fn run<R: RenderStage>(self, mut render: R, viewport: Viewport) -> Result<PipelineMetrics> {
        let publisher = self.pipeline.publisher().clone();
        let (tick_tx, tick_rx) = flume::bounded::<()>(1);
        let (done_tx, done_rx) = flume::bounded::<Result<PipelineMetrics>>(1);
        let worker = spawn_worker(self.pipeline, tick_rx, done_tx, self.pin_core)?;

        let mut interval = tokio::time::interval(self.cadence);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let started = Instant::now();
        let mut last_rendered = 0;

        info!("Capture loop running every {:?}", self.cadence);

        let stop = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Capture loop cancelled");
                    break Stop::Cancelled;
                }
                result = done_rx.recv_async() => {
                    break Stop::Worker(result.unwrap_or_else(|_| {
                        Err(PipelineError::Worker("capture thread exited without a result".into()))
                    }));
                }
                _ = interval.tick() => {
                    if tick_tx.try_send(()).is_err() {
                        metrics::counter!("ticks_overrun").increment(1);
                        debug!("Previous tick still running, skipping");
                    }
                    match render_latest(&publisher, &mut render, last_rendered, started, viewport) {
                        Ok(generation) => last_rendered = generation,
                        Err(e) => {
                            error!("Render stage failed, stopping capture: {}", e);
                            break Stop::Render(e);
                        }
                    }
                }
            }
        };

        // The worker may be parked in an unbounded stream wait
        self.cancel.cancel();
        // Closing the tick channel ends the worker once its current tick returns
        drop(tick_tx);
        let render_ok = !matches!(stop, Stop::Render(_));
        let result = match stop {
            Stop::Cancelled => done_rx.recv_async().await.unwrap_or_else(|_| {
                Err(PipelineError::Worker("capture thread exited without a result".into()))
            }),
            Stop::Worker(result) => result,
            Stop::Render(e) => Err(e),
        };

        tokio::task::spawn_blocking(move || worker.join())
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))?
            .map_err(|_| PipelineError::Worker("capture thread panicked".into()))?;

        // Whatever the last tick published is still owed to the render stage
        if render_ok {
            render_latest(&publisher, &mut render, last_rendered, started, viewport)?;
        }
        result
    }
}

enum Stop {
    Cancelled,
    Worker(Result<PipelineMetrics>),
    Render(PipelineError),
}

fn render_latest<R: RenderStage>(
    publisher: &AlignedFramePublisher,
    render: &mut R,
    last_rendered: u64,
    started: Instant,
    viewport: Viewport,
) -> Result<u64> {
    match publisher.latest() {
        Some(frame) if frame.generation != last_rendered => {
            let generation = frame.generation;
            render.draw(RenderInputs {
                frame,
                elapsed: started.elapsed(),
                viewport,
            })?;
            Ok(generation)
        }
        _ => Ok(last_rendered),
    }
}

fn spawn_worker(
    mut pipeline: AlignmentPipeline,
    ticks: flume::Receiver<()>,
    done: flume::Sender<Result<PipelineMetrics>>,
    pin_core: Option<usize>,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("capture".into())
        .spawn(move || {
            if let Some(core) = pin_core {
                pin_to_core(core);
            }
            let result = (|| {
                for () in ticks.iter() {
                    match pipeline.tick() {
                        Ok(_) => {}
                        Err(PipelineError::Cancelled) => break,
                        Err(e) => return Err(e),
                    }
                }
                Ok(pipeline.metrics())
            })();
            let _ = done.send(result);
        })
        .map_err(|e| PipelineError::Worker(e.to_string()))
}

fn pin_to_core(core: usize) {
    let target = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|id| id.id == core));
    match target {
        Some(id) if core_affinity::set_for_current(id) => info!("Capture thread pinned to core {}", core),
        _ => warn!("Could not pin capture thread to core {}", core),
    }
}
