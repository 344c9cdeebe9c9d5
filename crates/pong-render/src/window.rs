// SPDX-License-Identifier: CEPL-1.0
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What the swap chain needs to know about the window it presents into.
pub trait DrawableSurface {
    /// Framebuffer size in pixels right now. May be zero while minimised.
    fn drawable_size(&self) -> RenderSize;

    /// Returns a nonzero size once the window can be drawn into again.
    ///
    /// Implementations that can block do so until the size is nonzero.
    /// Event-driven windows return `None` instead, and the caller retries
    /// on a later tick.
    fn wait_until_drawable(&self) -> Option<RenderSize>;
}

/// Orchestrator side of the "surface invalidated" mailbox.
#[derive(Debug)]
pub struct SurfaceMailbox {
    rx: Receiver<()>,
}

/// Platform side of the mailbox. Cheap to clone and hand to callbacks.
#[derive(Clone, Debug)]
pub struct SurfaceNotifier {
    tx: SyncSender<()>,
}

/// Creates a connected notifier/mailbox pair holding at most one pending
/// notification.
pub fn mailbox() -> (SurfaceNotifier, SurfaceMailbox) {
    let (tx, rx) = mpsc::sync_channel(1);
    (SurfaceNotifier { tx }, SurfaceMailbox { rx })
}

impl SurfaceMailbox {
    /// Drains the slot. True if at least one notification was posted since
    /// the last call.
    pub fn take(&self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

impl SurfaceNotifier {
    pub fn invalidate(&self) {
        match self.tx.try_send(()) {
            // already pending; repeat posts coalesce
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                tracing::debug!("surface invalidated after renderer shut down");
            }
        }
    }
}
