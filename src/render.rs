//! Render stage boundary
//!
//! The render stage only ever reads published frames. Window creation and
//! shader binding live on the other side of [`RenderStage`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::Result;
use crate::pipeline::PublishedFrame;
use crate::DisplayConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl From<&DisplayConfig> for Viewport {
    fn from(config: &DisplayConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
        }
    }
}

/// Everything a frame draw samples: both textures plus the auxiliary
/// uniforms (elapsed time, viewport).
pub struct RenderInputs {
    pub frame: Arc<PublishedFrame>,
    pub elapsed: Duration,
    pub viewport: Viewport,
}

impl RenderInputs {
    /// RGB color texture, 3 bytes per texel.
    pub fn color_texture(&self) -> &[u8] {
        &self.frame.color
    }

    /// Encoded depth texture: channel 0 high digit, channel 1 low digit.
    pub fn depth_texture(&self) -> &[u8] {
        &self.frame.depth
    }
}

pub trait RenderStage: Send {
    fn draw(&mut self, inputs: RenderInputs) -> Result<()>;
}

/// Render stage without a window: counts frames and keeps the last one.
#[derive(Default)]
pub struct HeadlessRenderer {
    frames_drawn: u64,
    last: Option<Arc<PublishedFrame>>,
    last_age: Option<Duration>,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn last_frame(&self) -> Option<&Arc<PublishedFrame>> {
        self.last.as_ref()
    }

    /// Time from publication to draw of the last frame.
    pub fn last_frame_age(&self) -> Option<Duration> {
        self.last_age
    }
}

impl RenderStage for HeadlessRenderer {
    fn draw(&mut self, inputs: RenderInputs) -> Result<()> {
        self.frames_drawn += 1;
        let age = inputs.frame.captured_at.elapsed();
        metrics::counter!("frames_rendered").increment(1);
        metrics::histogram!("frame_age_us").record(age.as_micros() as f64);
        if self.frames_drawn == 1 {
            info!(
                "First frame at {:.2}s, viewport {}x{}",
                inputs.elapsed.as_secs_f32(),
                inputs.viewport.width,
                inputs.viewport.height
            );
        }
        debug!(
            generation = inputs.frame.generation,
            color_bytes = inputs.color_texture().len(),
            depth_bytes = inputs.depth_texture().len(),
            ?age,
            "frame drawn"
        );
        self.last = Some(inputs.frame);
        self.last_age = Some(age);
        Ok(())
    }
}
