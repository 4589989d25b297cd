pub mod align;
pub mod capture;
pub mod error;
pub mod pipeline;
pub mod render;
pub mod sensor;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use error::{PipelineError, Result};
use sensor::{Calibration, Resolution};

/// Process-wide configuration, stored once the binary has loaded it.
///
/// Components copy the sections they need when built, so a later swap only
/// affects pipelines constructed after it.
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix for environment overrides, e.g. `DEPTH_ALIGN__PIPELINE__TICK_HZ=60`
pub const ENV_PREFIX: &str = "DEPTH_ALIGN";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sensor: SensorConfig,
    pub pipeline: PipelineConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Delay between color and depth frames of the synthetic sensor
    pub stream_skew_ms: u64,
    pub calibration: Calibration,
}

impl SensorConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub tick_hz: u32,
    /// 0 waits for both streams forever
    pub wait_timeout_ms: u64,
    /// 0 never gives up
    pub max_consecutive_failures: u32,
    /// Set channel 2 on every pixel that received a depth sample
    pub mark_valid_depth: bool,
    /// Ticks kept for avg/p99 timing
    pub stats_window: usize,
    pub pin_core: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sensor: SensorConfig {
                width: Resolution::VGA.width,
                height: Resolution::VGA.height,
                fps: 30,
                stream_skew_ms: 3,
                calibration: Calibration::kinect_v1(),
            },
            pipeline: PipelineConfig {
                tick_hz: 30,
                wait_timeout_ms: 1000,
                max_consecutive_failures: 90, // ~3s at 30Hz
                mark_valid_depth: false,
                stats_window: 120,
                pin_core: None,
            },
            display: DisplayConfig {
                width: 640,
                height: 480,
            },
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `DEPTH_ALIGN__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sensor.resolution() != Resolution::VGA {
            return Err(PipelineError::InvalidConfig(format!(
                "sensor resolution must be {}, got {}",
                Resolution::VGA,
                self.sensor.resolution()
            )));
        }
        if self.sensor.fps == 0 || self.pipeline.tick_hz == 0 {
            return Err(PipelineError::InvalidConfig(
                "sensor.fps and pipeline.tick_hz must be non-zero".into(),
            ));
        }
        if self.pipeline.stats_window == 0 {
            return Err(PipelineError::InvalidConfig(
                "pipeline.stats_window must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Performance metrics collected throughout the pipeline
#[derive(Debug, Default, Clone)]
pub struct PipelineMetrics {
    pub capture_fps: f64,
    pub ticks_published: u64,
    pub ticks_failed: u64,
    pub consecutive_failures: u32,
    pub samples_clamped: u64,
    pub avg_tick_ms: f64,
    pub p99_tick_ms: f64,
    /// Color/depth hardware timestamp gap of the last published tick
    pub stream_skew_ms: Option<f64>,
    pub last_generation: u64,
}
