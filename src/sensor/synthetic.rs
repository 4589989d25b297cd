//! Deterministic in-memory sensor
//!
//! Produces a BGRA gradient and a depth ramp on two independently signalled
//! streams, keeps lock/release bookkeeping so callers can check that every
//! frame went back to the pool, and can be told to fail the next fetch or
//! lock on either stream.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{
    Calibration, ColorSpacePoint, Resolution, SensorStreamService, StreamHandle, StreamKind,
};
use crate::capture::frame::{FrameMetadata, LockedRect, PixelFormat, RawFrame};
use crate::error::{PipelineError, Result};

/// How depth pixels land in color space.
#[derive(Debug, Clone)]
pub enum MappingModel {
    Pinhole(Calibration),
    /// Precomputed registration table, one point per depth pixel
    Table(Arc<[ColorSpacePoint]>),
}

#[derive(Default)]
struct StreamState {
    open: Option<StreamHandle>,
    signal: Option<flume::Sender<()>>,
    readiness: Option<flume::Receiver<()>>,
    sequence: u64,
    emitted_at: Duration,
    pending: bool,
    outstanding_frames: u32,
    outstanding_locks: u32,
    fail_fetches: u32,
    fail_locks: u32,
}

struct Scene {
    color: Option<Bytes>,
    depth: Option<Bytes>,
}

struct Inner {
    resolution: Resolution,
    mapping: Mutex<MappingModel>,
    streams: Mutex<[StreamState; 2]>,
    scene: Mutex<Scene>,
    calibration_missing: AtomicBool,
    next_id: AtomicU32,
    started: Instant,
}

/// A fake depth camera for tests and the headless binary.
#[derive(Clone)]
pub struct SyntheticSensor {
    inner: Arc<Inner>,
}

impl SyntheticSensor {
    pub fn new(resolution: Resolution) -> Self {
        Self::with_mapping(resolution, MappingModel::Pinhole(Calibration::kinect_v1()))
    }

    pub fn with_mapping(resolution: Resolution, mapping: MappingModel) -> Self {
        Self {
            inner: Arc::new(Inner {
                resolution,
                mapping: Mutex::new(mapping),
                streams: Mutex::new(Default::default()),
                scene: Mutex::new(Scene {
                    color: None,
                    depth: None,
                }),
                calibration_missing: AtomicBool::new(false),
                next_id: AtomicU32::new(1),
                started: Instant::now(),
            }),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.inner.resolution
    }

    fn streams(&self) -> MutexGuard<'_, [StreamState; 2]> {
        self.inner
            .streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn scene(&self) -> MutexGuard<'_, Scene> {
        self.inner
            .scene
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark a new frame ready on `kind` and raise its readiness signal.
    pub fn emit(&self, kind: StreamKind) {
        let mut streams = self.streams();
        let state = &mut streams[kind.index()];
        state.sequence += 1;
        state.emitted_at = self.inner.started.elapsed();
        state.pending = true;
        if let Some(signal) = &state.signal {
            // A full slot means the signal is already set
            let _ = signal.try_send(());
        }
    }

    /// Emit a frame on both streams.
    pub fn emit_both(&self) {
        self.emit(StreamKind::Color);
        self.emit(StreamKind::Depth);
    }

    /// Replace the generated color pattern with a fixed BGRA frame (tight pitch).
    pub fn set_color_scene(&self, bgra: Vec<u8>) {
        self.scene().color = Some(Bytes::from(bgra));
    }

    /// Replace the generated depth ramp with fixed raster-order samples.
    pub fn set_depth_scene(&self, samples: &[u16]) {
        let bytes: Vec<u8> = samples.iter().flat_map(|d| d.to_le_bytes()).collect();
        self.scene().depth = Some(Bytes::from(bytes));
    }

    pub fn set_mapping(&self, mapping: MappingModel) {
        *self
            .inner
            .mapping
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = mapping;
    }

    pub fn fail_next_fetches(&self, kind: StreamKind, count: u32) {
        self.streams()[kind.index()].fail_fetches += count;
    }

    pub fn fail_next_locks(&self, kind: StreamKind, count: u32) {
        self.streams()[kind.index()].fail_locks += count;
    }

    pub fn set_calibration_missing(&self, missing: bool) {
        self.inner
            .calibration_missing
            .store(missing, Ordering::Relaxed);
    }

    /// Frames handed out and not yet released.
    pub fn outstanding_frames(&self, kind: StreamKind) -> u32 {
        self.streams()[kind.index()].outstanding_frames
    }

    /// Buffers locked and not yet unlocked.
    pub fn outstanding_locks(&self, kind: StreamKind) -> u32 {
        self.streams()[kind.index()].outstanding_locks
    }

    /// Emit frames on a background thread at `fps`, the depth stream trailing
    /// the color stream by `skew`.
    pub fn start_pacing(&self, fps: u32, skew: Duration) -> Pacer {
        let period = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        let stop = Arc::new(AtomicBool::new(false));
        let sensor = self.clone();
        let flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name("synthetic-sensor".into())
            .spawn(move || {
                let mut next = Instant::now();
                while !flag.load(Ordering::Relaxed) {
                    sensor.emit(StreamKind::Color);
                    std::thread::sleep(skew);
                    sensor.emit(StreamKind::Depth);
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
            });
        match handle {
            Ok(handle) => {
                info!("Synthetic sensor pacing at {} fps", fps);
                Pacer {
                    stop,
                    handle: Some(handle),
                }
            }
            Err(e) => {
                warn!("Failed to spawn synthetic sensor thread: {}", e);
                Pacer { stop, handle: None }
            }
        }
    }

    fn color_pattern(&self, sequence: u64) -> Bytes {
        let res = self.inner.resolution;
        let mut bgra = Vec::with_capacity(res.pixel_count() * 4);
        for y in 0..res.height {
            for x in 0..res.width {
                bgra.extend_from_slice(&[
                    x as u8,
                    y as u8,
                    (x as u64 + y as u64 + sequence) as u8,
                    255,
                ]);
            }
        }
        Bytes::from(bgra)
    }

    fn depth_pattern(&self) -> Bytes {
        let res = self.inner.resolution;
        let mut bytes = Vec::with_capacity(res.pixel_count() * 2);
        for y in 0..res.height {
            for x in 0..res.width {
                let depth = 800 + ((x * 3 + y * 5) % 3200) as u16;
                bytes.extend_from_slice(&depth.to_le_bytes());
            }
        }
        Bytes::from(bytes)
    }
}

impl SensorStreamService for SyntheticSensor {
    fn open_stream(&self, kind: StreamKind, resolution: Resolution) -> Result<StreamHandle> {
        if resolution != self.inner.resolution {
            return Err(PipelineError::Initialization(format!(
                "{} stream does not support {}, only {}",
                kind, resolution, self.inner.resolution
            )));
        }

        let mut streams = self.streams();
        let state = &mut streams[kind.index()];
        if state.open.is_some() {
            return Err(PipelineError::Initialization(format!(
                "{} stream already open",
                kind
            )));
        }

        let handle = StreamHandle {
            kind,
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
        };
        let (tx, rx) = flume::bounded(1);
        state.open = Some(handle);
        state.signal = Some(tx);
        state.readiness = Some(rx);
        state.pending = false;
        debug!("Opened {} stream {:?}", kind, handle);
        Ok(handle)
    }

    fn readiness(&self, stream: StreamHandle) -> Result<flume::Receiver<()>> {
        let streams = self.streams();
        let state = &streams[stream.kind.index()];
        match (&state.open, &state.readiness) {
            (Some(open), Some(rx)) if *open == stream => Ok(rx.clone()),
            _ => Err(PipelineError::Initialization(format!(
                "{} stream is not open",
                stream.kind
            ))),
        }
    }

    fn calibration_ready(&self) -> Result<()> {
        if self.inner.calibration_missing.load(Ordering::Relaxed) {
            return Err(PipelineError::Initialization(
                "coordinate mapper unavailable".into(),
            ));
        }
        Ok(())
    }

    fn next_frame(&self, stream: StreamHandle) -> Result<RawFrame> {
        let kind = stream.kind;
        let (sequence, emitted_at) = {
            let mut streams = self.streams();
            let state = &mut streams[kind.index()];
            if state.open != Some(stream) {
                return Err(PipelineError::FrameFetch {
                    stream: kind,
                    reason: "stream closed".into(),
                });
            }
            if state.fail_fetches > 0 {
                state.fail_fetches -= 1;
                return Err(PipelineError::FrameFetch {
                    stream: kind,
                    reason: "injected fetch failure".into(),
                });
            }
            if !state.pending {
                return Err(PipelineError::FrameFetch {
                    stream: kind,
                    reason: "no frame ready".into(),
                });
            }
            state.pending = false;
            state.outstanding_frames += 1;
            (state.sequence, state.emitted_at)
        };

        let (format, payload) = match kind {
            StreamKind::Color => {
                let fixed = self.scene().color.clone();
                (
                    PixelFormat::Bgra32,
                    fixed.unwrap_or_else(|| self.color_pattern(sequence)),
                )
            }
            StreamKind::Depth => {
                let fixed = self.scene().depth.clone();
                (
                    PixelFormat::Depth16,
                    fixed.unwrap_or_else(|| self.depth_pattern()),
                )
            }
        };

        let res = self.inner.resolution;
        Ok(RawFrame {
            stream,
            meta: FrameMetadata {
                sequence,
                width: res.width,
                height: res.height,
                format,
                device_timestamp: Some(emitted_at),
            },
            payload,
        })
    }

    fn lock_buffer(&self, frame: &RawFrame) -> Result<LockedRect> {
        let kind = frame.stream.kind;
        let mut streams = self.streams();
        let state = &mut streams[kind.index()];
        if state.fail_locks > 0 {
            state.fail_locks -= 1;
            return Err(PipelineError::Lock {
                stream: kind,
                reason: "injected lock failure".into(),
            });
        }
        state.outstanding_locks += 1;
        Ok(LockedRect {
            bits: frame.payload.clone(),
            pitch: frame.meta.width as usize * frame.meta.format.bytes_per_pixel(),
        })
    }

    fn unlock_buffer(&self, frame: &RawFrame) {
        let mut streams = self.streams();
        let state = &mut streams[frame.stream.kind.index()];
        state.outstanding_locks = state.outstanding_locks.saturating_sub(1);
    }

    fn release_frame(&self, stream: StreamHandle, frame: RawFrame) {
        let mut streams = self.streams();
        let state = &mut streams[stream.kind.index()];
        state.outstanding_frames = state.outstanding_frames.saturating_sub(1);
        drop(frame);
    }

    fn map_depth_to_color_space(
        &self,
        depth: &[u16],
        resolution: Resolution,
        out: &mut [ColorSpacePoint],
    ) -> Result<()> {
        self.calibration_ready()?;
        let mapping = self
            .inner
            .mapping
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match mapping {
            MappingModel::Pinhole(calibration) => {
                calibration.project_frame(depth, resolution, out);
            }
            MappingModel::Table(table) => {
                for (point, mapped) in out.iter_mut().zip(table.iter().copied()) {
                    *point = mapped;
                }
            }
        }
        Ok(())
    }

    fn close_stream(&self, stream: StreamHandle) {
        let mut streams = self.streams();
        let state = &mut streams[stream.kind.index()];
        if state.open == Some(stream) {
            state.open = None;
            state.signal = None;
            state.readiness = None;
            state.pending = false;
            debug!("Closed {} stream", stream.kind);
        }
    }
}

/// Background frame emitter, stops on drop.
pub struct Pacer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Pacer {
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Pacer {
    fn drop(&mut self) {
        self.stop();
    }
}
