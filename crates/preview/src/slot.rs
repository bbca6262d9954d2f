use crate::frame::PreviewFrame;
use std::sync::Arc;
use tokio::sync::watch;

/// Single-slot handoff of the newest frame.
///
/// Publishing overwrites the slot and never waits for readers. Readers get the
/// most recent complete frame, or the same one again if nothing new arrived.
#[derive(Debug, Clone)]
pub struct FrameSlot {
    tx: Arc<watch::Sender<Option<Arc<PreviewFrame>>>>,
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn publish(&self, frame: PreviewFrame) {
        self.tx.send_replace(Some(Arc::new(frame)));
    }

    /// Publish a frame that is already shared, or empty the slot
    pub fn replace(&self, frame: Option<Arc<PreviewFrame>>) {
        self.tx.send_replace(frame);
    }

    pub fn latest(&self) -> Option<Arc<PreviewFrame>> {
        self.tx.borrow().clone()
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Receiver that is notified on every publish
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<PreviewFrame>>> {
        self.tx.subscribe()
    }
}
