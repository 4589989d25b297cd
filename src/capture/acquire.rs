use tracing::trace;

use crate::capture::frame::{ColorView, DepthView, FrameMetadata, LockedRect, RawFrame};
use crate::error::Result;
use crate::sensor::{Resolution, SensorStreamService, StreamHandle};

/// A frame locked for reading. Dropping it unlocks the buffer and returns the
/// frame to the sensor, exactly once, on every exit path.
pub struct AcquiredFrame<'s> {
    sensor: &'s dyn SensorStreamService,
    stream: StreamHandle,
    frame: Option<RawFrame>,
    rect: LockedRect,
}

/// Fetch and lock the next frame of `stream`.
///
/// If the lock fails the fetched frame is released before the error is
/// returned.
pub fn acquire_frame(
    sensor: &dyn SensorStreamService,
    stream: StreamHandle,
) -> Result<AcquiredFrame<'_>> {
    let frame = sensor.next_frame(stream)?;
    let rect = match sensor.lock_buffer(&frame) {
        Ok(rect) => rect,
        Err(e) => {
            sensor.release_frame(stream, frame);
            return Err(e);
        }
    };
    trace!(stream = %stream.kind, sequence = frame.meta.sequence, "frame locked");
    Ok(AcquiredFrame {
        sensor,
        stream,
        frame: Some(frame),
        rect,
    })
}

impl<'s> AcquiredFrame<'s> {
    pub fn meta(&self) -> Option<&FrameMetadata> {
        self.frame.as_ref().map(|f| &f.meta)
    }

    pub fn bits(&self) -> &[u8] {
        &self.rect.bits
    }

    pub fn pitch(&self) -> usize {
        self.rect.pitch
    }

    fn resolution(&self) -> Resolution {
        self.meta()
            .map(FrameMetadata::resolution)
            .unwrap_or(Resolution::new(0, 0))
    }

    pub fn color_view(&self) -> Result<ColorView<'_>> {
        ColorView::new(self.bits(), self.pitch(), self.resolution())
    }

    pub fn depth_view(&self) -> Result<DepthView<'_>> {
        DepthView::new(self.bits(), self.pitch(), self.resolution())
    }
}

impl Drop for AcquiredFrame<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.sensor.unlock_buffer(&frame);
            trace!(stream = %self.stream.kind, sequence = frame.meta.sequence, "frame released");
            self.sensor.release_frame(self.stream, frame);
        }
    }
}
