use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use depth_align::align::decode;
use depth_align::capture::{CancelToken, SensorSession};
use depth_align::pipeline::{AlignedFramePublisher, AlignmentPipeline, CaptureLoop, TickOutcome};
use depth_align::render::{RenderInputs, RenderStage, Viewport};
use depth_align::sensor::{
    Calibration, ColorSpacePoint, MappingModel, Pacer, Resolution, SensorStreamService, StreamKind,
    SyntheticSensor,
};
use depth_align::{Config, PipelineConfig, PipelineError};

const VGA: Resolution = Resolution::VGA;

fn pipeline_config() -> PipelineConfig {
    Config::default().pipeline
}

fn open_pipeline(sensor: &SyntheticSensor, config: &PipelineConfig) -> AlignmentPipeline {
    open_pipeline_with_cancel(sensor, config, CancelToken::new())
}

fn open_pipeline_with_cancel(
    sensor: &SyntheticSensor,
    config: &PipelineConfig,
    cancel: CancelToken,
) -> AlignmentPipeline {
    let session = SensorSession::open(Arc::new(sensor.clone()), VGA).unwrap();
    AlignmentPipeline::new(session, Arc::new(AlignedFramePublisher::new()), config, cancel)
}

fn table(entries: &[(usize, ColorSpacePoint)]) -> MappingModel {
    let mut points = vec![ColorSpacePoint::INVALID; VGA.pixel_count()];
    for &(index, point) in entries {
        points[index] = point;
    }
    MappingModel::Table(points.into())
}

fn published(outcome: TickOutcome) -> u64 {
    match outcome {
        TickOutcome::Published { generation } => generation,
        TickOutcome::Skipped(e) => panic!("tick skipped: {e}"),
    }
}

#[test]
fn depth_sample_lands_at_its_mapped_color_pixel() {
    let sensor = SyntheticSensor::with_mapping(VGA, table(&[(12345, ColorSpacePoint::new(300, 200))]));
    let mut depth = vec![0u16; VGA.pixel_count()];
    depth[12345] = 600;
    sensor.set_depth_scene(&depth);
    let _pacer = sensor.start_pacing(200, Duration::from_millis(1));

    let mut pipeline = open_pipeline(&sensor, &pipeline_config());
    assert_eq!(published(pipeline.tick().unwrap()), 1);

    let frame = pipeline.publisher().latest().unwrap();
    let px = frame.depth.get_pixel(300, 200).0;
    assert_eq!(px, [2, 90, 0]);
    assert_eq!(decode(px[0], px[1]), 600);

    // nothing else was mapped
    let written = frame.depth.pixels().filter(|p| p.0 != [0, 0, 0]).count();
    assert_eq!(written, 1);
}

#[test]
fn colliding_samples_keep_the_later_one() {
    let target = ColorSpacePoint::new(10, 10);
    let sensor = SyntheticSensor::with_mapping(VGA, table(&[(100, target), (5000, target)]));
    let mut depth = vec![0u16; VGA.pixel_count()];
    depth[100] = 1000;
    depth[5000] = 2000;
    sensor.set_depth_scene(&depth);
    let _pacer = sensor.start_pacing(200, Duration::from_millis(1));

    let mut pipeline = open_pipeline(&sensor, &pipeline_config());
    published(pipeline.tick().unwrap());

    let frame = pipeline.publisher().latest().unwrap();
    let px = frame.depth.get_pixel(10, 10).0;
    assert_eq!(decode(px[0], px[1]), 2000);
}

#[test]
fn zero_depth_is_only_distinguishable_with_marking() {
    let mapping = table(&[(0, ColorSpacePoint::new(0, 0))]);
    let sensor = SyntheticSensor::with_mapping(VGA, mapping);
    sensor.set_depth_scene(&vec![0u16; VGA.pixel_count()]);
    let _pacer = sensor.start_pacing(200, Duration::from_millis(1));

    let mut config = pipeline_config();
    let mut pipeline = open_pipeline(&sensor, &config);
    published(pipeline.tick().unwrap());
    let plain = pipeline.publisher().latest().unwrap();
    assert_eq!(plain.depth.get_pixel(0, 0).0, [0, 0, 0]);
    assert_eq!(plain.depth.get_pixel(1, 0).0, [0, 0, 0]);
    drop(pipeline);

    config.mark_valid_depth = true;
    let mut pipeline = open_pipeline(&sensor, &config);
    published(pipeline.tick().unwrap());
    let marked = pipeline.publisher().latest().unwrap();
    assert_eq!(marked.depth.get_pixel(0, 0).0, [0, 0, 255]);
    assert_eq!(marked.depth.get_pixel(1, 0).0, [0, 0, 0]);
}

#[test]
fn color_is_published_as_rgb() {
    let sensor = SyntheticSensor::new(VGA);
    let mut bgra = vec![0u8; VGA.pixel_count() * 4];
    bgra[..4].copy_from_slice(&[10, 20, 30, 255]);
    let last = bgra.len() - 4;
    bgra[last..].copy_from_slice(&[1, 2, 3, 0]);
    sensor.set_color_scene(bgra);
    let _pacer = sensor.start_pacing(200, Duration::from_millis(1));

    let mut pipeline = open_pipeline(&sensor, &pipeline_config());
    published(pipeline.tick().unwrap());

    let frame = pipeline.publisher().latest().unwrap();
    assert_eq!(frame.color.get_pixel(0, 0).0, [30, 20, 10]);
    assert_eq!(frame.color.get_pixel(639, 479).0, [3, 2, 1]);
}

#[test]
fn mapping_changes_apply_on_the_next_tick() {
    let sensor = SyntheticSensor::with_mapping(VGA, MappingModel::Pinhole(Calibration::coincident(VGA)));
    let mut depth = vec![0u16; VGA.pixel_count()];
    depth[0] = 1234;
    sensor.set_depth_scene(&depth);
    let _pacer = sensor.start_pacing(200, Duration::from_millis(1));
    let mut pipeline = open_pipeline(&sensor, &pipeline_config());

    published(pipeline.tick().unwrap());
    let px = pipeline.publisher().latest().unwrap().depth.get_pixel(0, 0).0;
    assert_eq!(decode(px[0], px[1]), 1234);

    sensor.set_mapping(table(&[(0, ColorSpacePoint::new(5, 7))]));
    published(pipeline.tick().unwrap());
    let frame = pipeline.publisher().latest().unwrap();
    assert_eq!(frame.depth.get_pixel(0, 0).0, [0, 0, 0]);
    let px = frame.depth.get_pixel(5, 7).0;
    assert_eq!(decode(px[0], px[1]), 1234);
}

#[test]
fn stream_skew_is_reported() {
    let sensor = SyntheticSensor::new(VGA);
    let _pacer = sensor.start_pacing(30, Duration::from_millis(5));
    let mut pipeline = open_pipeline(&sensor, &pipeline_config());
    assert!(pipeline.metrics().stream_skew_ms.is_none());

    published(pipeline.tick().unwrap());
    let skew = pipeline.metrics().stream_skew_ms.unwrap();
    assert!(skew >= 5.0, "skew {skew} ms");
}

#[test]
fn fetch_failure_keeps_previous_pair() {
    let sensor = SyntheticSensor::new(VGA);
    let _pacer = sensor.start_pacing(200, Duration::from_millis(1));
    let mut pipeline = open_pipeline(&sensor, &pipeline_config());

    published(pipeline.tick().unwrap());
    let before = pipeline.publisher().latest().unwrap();
    let snapshot = (before.color.clone(), before.depth.clone());

    for kind in [StreamKind::Color, StreamKind::Depth] {
        sensor.fail_next_fetches(kind, 1);
        match pipeline.tick().unwrap() {
            TickOutcome::Skipped(PipelineError::FrameFetch { stream, .. }) => assert_eq!(stream, kind),
            other => panic!("expected fetch failure, got {other:?}"),
        }

        let after = pipeline.publisher().latest().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.color.as_raw(), snapshot.0.as_raw());
        assert_eq!(after.depth.as_raw(), snapshot.1.as_raw());
        assert_eq!(sensor.outstanding_frames(StreamKind::Color), 0);
        assert_eq!(sensor.outstanding_locks(StreamKind::Color), 0);
    }

    // and the next tick recovers
    assert_eq!(published(pipeline.tick().unwrap()), 2);
}

#[test]
fn lock_failure_is_recoverable_and_releases_everything() {
    let sensor = SyntheticSensor::new(VGA);
    let _pacer = sensor.start_pacing(200, Duration::from_millis(1));
    let mut pipeline = open_pipeline(&sensor, &pipeline_config());
    published(pipeline.tick().unwrap());

    sensor.fail_next_locks(StreamKind::Depth, 1);
    assert!(matches!(
        pipeline.tick().unwrap(),
        TickOutcome::Skipped(PipelineError::Lock { .. })
    ));
    for kind in [StreamKind::Color, StreamKind::Depth] {
        assert_eq!(sensor.outstanding_frames(kind), 0);
        assert_eq!(sensor.outstanding_locks(kind), 0);
    }
    assert_eq!(pipeline.publisher().generation(), 1);
}

#[test]
fn reclaimed_buffers_survive_a_short_frame() {
    let sensor = SyntheticSensor::new(VGA);
    let _pacer = sensor.start_pacing(200, Duration::from_millis(1));
    let mut pipeline = open_pipeline(&sensor, &pipeline_config());

    published(pipeline.tick().unwrap());
    let first_color = pipeline.publisher().latest().unwrap().color.as_raw().as_ptr() as usize;
    // nobody holds generation 1 any more, so tick 2 hands its buffers back
    published(pipeline.tick().unwrap());

    sensor.set_color_scene(vec![0u8; 16]);
    assert!(matches!(
        pipeline.tick().unwrap(),
        TickOutcome::Skipped(PipelineError::BufferSize {
            stream: StreamKind::Color,
            ..
        })
    ));

    sensor.set_color_scene(vec![7u8; VGA.pixel_count() * 4]);
    assert_eq!(published(pipeline.tick().unwrap()), 3);
    let frame = pipeline.publisher().latest().unwrap();
    assert_eq!(frame.color.as_raw().as_ptr() as usize, first_color);
    assert_eq!(frame.color.get_pixel(0, 0).0, [7, 7, 7]);
}

#[test]
fn repeated_failures_escalate() {
    let sensor = SyntheticSensor::new(VGA);
    let _pacer = sensor.start_pacing(200, Duration::from_millis(1));
    let mut config = pipeline_config();
    config.max_consecutive_failures = 3;
    let mut pipeline = open_pipeline(&sensor, &config);

    sensor.fail_next_fetches(StreamKind::Color, 10);
    assert!(matches!(pipeline.tick().unwrap(), TickOutcome::Skipped(_)));
    assert!(matches!(pipeline.tick().unwrap(), TickOutcome::Skipped(_)));
    assert!(matches!(
        pipeline.tick(),
        Err(PipelineError::TooManyFailures(3))
    ));
    assert_eq!(pipeline.metrics().ticks_failed, 3);
}

#[test]
fn stalled_sensor_times_out() {
    let sensor = SyntheticSensor::new(VGA);
    let mut config = pipeline_config();
    config.wait_timeout_ms = 30;
    let mut pipeline = open_pipeline(&sensor, &config);

    assert!(matches!(
        pipeline.tick().unwrap(),
        TickOutcome::Skipped(PipelineError::WaitTimeout(_))
    ));
    assert!(pipeline.publisher().latest().is_none());
}

#[test]
fn cancel_unblocks_an_unbounded_wait() {
    let sensor = SyntheticSensor::new(VGA);
    let mut config = pipeline_config();
    config.wait_timeout_ms = 0;
    let cancel = CancelToken::new();
    let mut pipeline = open_pipeline_with_cancel(&sensor, &config, cancel.clone());

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        cancel.cancel();
    });
    assert!(matches!(pipeline.tick(), Err(PipelineError::Cancelled)));
    canceller.join().unwrap();
}

struct CountingRenderer {
    drawn: Arc<AtomicU64>,
    last_generation: Arc<AtomicU64>,
}

impl RenderStage for CountingRenderer {
    fn draw(&mut self, inputs: RenderInputs) -> depth_align::Result<()> {
        assert_eq!(inputs.color_texture().len(), VGA.pixel_count() * 3);
        assert_eq!(inputs.depth_texture().len(), VGA.pixel_count() * 3);
        let previous = self.last_generation.swap(inputs.frame.generation, Ordering::SeqCst);
        assert!(inputs.frame.generation > previous, "frames rendered out of order");
        self.drawn.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capture_loop_runs_until_cancelled() {
    let sensor = SyntheticSensor::new(VGA);
    let _pacer = sensor.start_pacing(60, Duration::from_millis(2));

    let mut config = pipeline_config();
    config.tick_hz = 60;
    let cancel = CancelToken::new();
    let pipeline = open_pipeline_with_cancel(&sensor, &config, cancel.clone());
    let capture = CaptureLoop::new(pipeline, &config, cancel.clone());

    let drawn = Arc::new(AtomicU64::new(0));
    let last_generation = Arc::new(AtomicU64::new(0));
    let renderer = CountingRenderer {
        drawn: drawn.clone(),
        last_generation: last_generation.clone(),
    };

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        cancel.cancel();
    });

    let metrics = capture
        .run(
            renderer,
            Viewport {
                width: 640,
                height: 480,
            },
        )
        .await
        .unwrap();
    stopper.await.unwrap();

    assert!(metrics.ticks_published > 0);
    assert!(drawn.load(Ordering::SeqCst) > 0);
    assert_eq!(last_generation.load(Ordering::SeqCst), metrics.last_generation);

    // the session was closed and every frame returned
    for kind in [StreamKind::Color, StreamKind::Depth] {
        assert_eq!(sensor.outstanding_frames(kind), 0);
        assert_eq!(sensor.outstanding_locks(kind), 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capture_loop_surfaces_fatal_errors() {
    let sensor = SyntheticSensor::new(VGA);
    let _pacer = sensor.start_pacing(120, Duration::from_millis(1));
    sensor.fail_next_fetches(StreamKind::Depth, 1000);

    let mut config = pipeline_config();
    config.tick_hz = 120;
    config.max_consecutive_failures = 2;
    let cancel = CancelToken::new();
    let pipeline = open_pipeline_with_cancel(&sensor, &config, cancel.clone());
    let capture = CaptureLoop::new(pipeline, &config, cancel);

    let renderer = CountingRenderer {
        drawn: Arc::new(AtomicU64::new(0)),
        last_generation: Arc::new(AtomicU64::new(0)),
    };
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        capture.run(
            renderer,
            Viewport {
                width: 640,
                height: 480,
            },
        ),
    )
    .await
    .expect("capture loop did not stop");
    assert!(matches!(result, Err(PipelineError::TooManyFailures(2))));
}

struct FailingRenderer {
    pacer: Option<Pacer>,
}

impl RenderStage for FailingRenderer {
    fn draw(&mut self, _inputs: RenderInputs) -> depth_align::Result<()> {
        // the sensor goes quiet, leaving the capture thread parked in its wait
        if let Some(mut pacer) = self.pacer.take() {
            pacer.stop();
        }
        Err(PipelineError::Worker("display lost".into()))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn render_failure_stops_the_capture_thread() {
    let sensor = SyntheticSensor::new(VGA);
    let pacer = sensor.start_pacing(60, Duration::from_millis(1));

    let mut config = pipeline_config();
    config.tick_hz = 60;
    config.wait_timeout_ms = 0;
    let cancel = CancelToken::new();
    let pipeline = open_pipeline_with_cancel(&sensor, &config, cancel.clone());
    let capture = CaptureLoop::new(pipeline, &config, cancel.clone());

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        capture.run(
            FailingRenderer { pacer: Some(pacer) },
            Viewport {
                width: 640,
                height: 480,
            },
        ),
    )
    .await
    .expect("capture loop did not stop");

    assert!(matches!(result, Err(PipelineError::Worker(ref msg)) if msg == "display lost"));
    assert!(cancel.is_cancelled());

    // the session went down with the worker, so the streams can be reopened
    for kind in [StreamKind::Color, StreamKind::Depth] {
        assert_eq!(sensor.outstanding_frames(kind), 0);
        assert_eq!(sensor.outstanding_locks(kind), 0);
        sensor.open_stream(kind, VGA).unwrap();
    }
}
