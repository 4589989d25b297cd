pub mod publisher;
pub mod ringbuf;
pub mod scheduler;
pub mod tick;

pub use publisher::{AlignedFramePublisher, Publication, PublishedFrame};
pub use ringbuf::TickTimings;
pub use scheduler::CaptureLoop;
pub use tick::{AlignmentPipeline, TickOutcome};
