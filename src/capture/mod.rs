pub mod acquire;
pub mod frame;
pub mod session;
pub mod sync;

pub use acquire::{acquire_frame, AcquiredFrame};
pub use frame::{ColorView, DepthView, FrameMetadata, LockedRect, PixelFormat, RawFrame};
pub use session::SensorSession;
pub use sync::{CancelToken, StreamSynchronizer};
