use std::time::Duration;

use thiserror::Error;

use crate::sensor::StreamKind;

/// Errors raised by the capture and alignment pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Sensor creation, stream open or calibration lookup failed.
    #[error("sensor initialization failed: {0}")]
    Initialization(String),

    #[error("{stream} stream failed to deliver a frame: {reason}")]
    FrameFetch { stream: StreamKind, reason: String },

    #[error("{stream} buffer lock failed: {reason}")]
    Lock { stream: StreamKind, reason: String },

    #[error("no frame on both streams within {0:?}")]
    WaitTimeout(Duration),

    #[error("capture cancelled")]
    Cancelled,

    #[error("giving up after {0} consecutive failed ticks")]
    TooManyFailures(u32),

    #[error("{stream} buffer too small: expected at least {expected} bytes, got {actual}")]
    BufferSize {
        stream: StreamKind,
        expected: usize,
        actual: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("capture worker failed: {0}")]
    Worker(String),
}

impl PipelineError {
    /// Per-tick failures that leave the last published frame in place and
    /// are retried on the next tick.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::FrameFetch { .. }
                | PipelineError::Lock { .. }
                | PipelineError::WaitTimeout(_)
                | PipelineError::BufferSize { .. }
        )
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;
