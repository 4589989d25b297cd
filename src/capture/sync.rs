//! Dual-stream frame gate

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use flume::{Receiver, Selector, Sender};
use tracing::trace;

use crate::error::{PipelineError, Result};
use crate::sensor::StreamKind;

/// Shared shutdown flag. Cancelling disconnects the inner channel, which
/// wakes every blocking or async waiter at once.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<Mutex<Option<Sender<()>>>>,
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = flume::bounded(1);
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.is_disconnected()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        // Nothing is ever sent, so this only returns on disconnect
        let _ = self.rx.recv_async().await;
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

enum Wake {
    Ready(StreamKind),
    Closed(StreamKind),
    Cancelled,
}

/// Blocks until both streams have signalled a new frame.
pub struct StreamSynchronizer {
    color: Receiver<()>,
    depth: Receiver<()>,
    cancel: CancelToken,
    timeout: Option<Duration>,
}

impl StreamSynchronizer {
    /// `timeout` of `None` waits forever (until cancelled).
    pub fn new(
        color: Receiver<()>,
        depth: Receiver<()>,
        cancel: CancelToken,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            color,
            depth,
            cancel,
            timeout,
        }
    }

    /// Clear both readiness signals, then wait until each stream signals again.
    pub fn wait_for_both_streams(&self) -> Result<()> {
        // Reset: drop any signal raised before this cycle
        self.color.drain().for_each(drop);
        self.depth.drain().for_each(drop);

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut color_ready = false;
        let mut depth_ready = false;

        while !(color_ready && depth_ready) {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let mut selector = Selector::new().recv(self.cancel.receiver(), |_| Wake::Cancelled);
            if !color_ready {
                selector = selector.recv(&self.color, |r| match r {
                    Ok(()) => Wake::Ready(StreamKind::Color),
                    Err(_) => Wake::Closed(StreamKind::Color),
                });
            }
            if !depth_ready {
                selector = selector.recv(&self.depth, |r| match r {
                    Ok(()) => Wake::Ready(StreamKind::Depth),
                    Err(_) => Wake::Closed(StreamKind::Depth),
                });
            }

            let wake = match deadline {
                Some(deadline) => selector.wait_deadline(deadline).map_err(|_| {
                    PipelineError::WaitTimeout(self.timeout.unwrap_or_default())
                })?,
                None => selector.wait(),
            };

            match wake {
                Wake::Ready(StreamKind::Color) => color_ready = true,
                Wake::Ready(StreamKind::Depth) => depth_ready = true,
                Wake::Closed(stream) => {
                    return Err(PipelineError::FrameFetch {
                        stream,
                        reason: "readiness signal disconnected".into(),
                    })
                }
                Wake::Cancelled => return Err(PipelineError::Cancelled),
            }
            trace!(color_ready, depth_ready, "stream signal");
        }

        Ok(())
    }
}
