//! Tear-free hand-off of aligned frames to the render stage

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use image::RgbImage;

/// One tick's output: the RGB color image and the depth image aligned to it.
#[derive(Debug, Clone)]
pub struct PublishedFrame {
    pub color: RgbImage,
    pub depth: RgbImage,
    /// Increases by one per published tick, starting at 1
    pub generation: u64,
    pub captured_at: Instant,
}

/// Result of a publish: the new generation and, when no reader still holds
/// it, the frame it replaced so its buffers can be reused.
pub struct Publication {
    pub generation: u64,
    pub reclaimed: Option<PublishedFrame>,
}

/// Single-writer, multi-reader slot for the latest frame pair.
///
/// Readers get an `Arc` snapshot holding both buffers of one tick, so a
/// half-written or mixed-tick pair can never be observed.
pub struct AlignedFramePublisher {
    current: ArcSwapOption<PublishedFrame>,
    generation: CachePadded<AtomicU64>,
}

impl AlignedFramePublisher {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            generation: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Make a fully written pair visible.
    pub fn publish(&self, color: RgbImage, depth: RgbImage) -> Publication {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let frame = Arc::new(PublishedFrame {
            color,
            depth,
            generation,
            captured_at: Instant::now(),
        });
        let previous = self.current.swap(Some(frame));
        Publication {
            generation,
            reclaimed: previous.and_then(|prev| Arc::try_unwrap(prev).ok()),
        }
    }

    /// Latest published pair, if any tick has succeeded yet.
    pub fn latest(&self) -> Option<Arc<PublishedFrame>> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl Default for AlignedFramePublisher {
    fn default() -> Self {
        Self::new()
    }
}
