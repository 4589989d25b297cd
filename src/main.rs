//! depth-align: color + aligned depth capture loop

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use depth_align::capture::{CancelToken, SensorSession};
use depth_align::pipeline::{AlignedFramePublisher, AlignmentPipeline, CaptureLoop};
use depth_align::render::{HeadlessRenderer, Viewport};
use depth_align::sensor::{MappingModel, SensorStreamService, SyntheticSensor};
use depth_align::Config;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("depth-align launching...");

    // Load configuration
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    depth_align::CONFIG.store(Arc::new(config));
    let config = depth_align::CONFIG.load_full();

    // Sensor and streams are opened once; failure here is fatal
    let sensor = SyntheticSensor::with_mapping(
        config.sensor.resolution(),
        MappingModel::Pinhole(config.sensor.calibration),
    );
    let mut pacer = sensor.start_pacing(
        config.sensor.fps,
        Duration::from_millis(config.sensor.stream_skew_ms),
    );
    let sensor: Arc<dyn SensorStreamService> = Arc::new(sensor);
    let session = match SensorSession::open(sensor, config.sensor.resolution()) {
        Ok(session) => session,
        Err(e) => {
            error!("Sensor initialization failed: {}", e);
            return Err(e.into());
        }
    };

    let cancel = CancelToken::new();
    let publisher = Arc::new(AlignedFramePublisher::new());
    let pipeline = AlignmentPipeline::new(session, publisher, &config.pipeline, cancel.clone());
    let capture = CaptureLoop::new(pipeline, &config.pipeline, cancel.clone());

    // Ctrl-C stops the loop
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        cancel.cancel();
    });

    let renderer = HeadlessRenderer::new();
    let result = capture
        .run(renderer, Viewport::from(&config.display))
        .await;
    pacer.stop();

    let metrics = result?;
    info!(
        "Published {} frames ({} failed ticks), {:.1} fps, tick avg {:.2} ms / p99 {:.2} ms",
        metrics.ticks_published,
        metrics.ticks_failed,
        metrics.capture_fps,
        metrics.avg_tick_ms,
        metrics.p99_tick_ms
    );
    info!("depth-align shutting down");
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("depth_align=info"));

    #[cfg(feature = "profiling")]
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()))
            .with(tracing_tracy::TracyLayer::default())
            .init();
    }

    #[cfg(not(feature = "profiling"))]
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();
}
