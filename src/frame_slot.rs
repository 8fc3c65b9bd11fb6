// Latest-frame register shared between a camera background thread and the
// booth orchestrator.

use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

const PREVIEW_CHANNEL_CAPACITY: usize = 4;

/// A single decoded camera frame, JPEG encoded.
#[derive(Debug, Clone)]
pub struct Frame {
    pub jpeg: Bytes,
    pub width: u32,
    pub height: u32,
}

#[derive(Default)]
struct SlotState {
    latest: Option<Frame>,
    fault: Option<String>,
}

/// Single-slot register: writers replace the whole frame, readers get the
/// freshest one. Preview observers are fed through a broadcast channel that
/// drops frames for slow receivers.
#[derive(Clone)]
pub struct FrameSlot {
    state: Arc<Mutex<SlotState>>,
    preview_tx: broadcast::Sender<Bytes>,
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSlot {
    pub fn new() -> Self {
        let (preview_tx, _) = broadcast::channel(PREVIEW_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(SlotState::default())),
            preview_tx,
        }
    }

    // A poisoned lock only means a writer panicked mid-assignment of an
    // Option, which cannot leave the slot torn.
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the current frame and notify preview observers.
    pub fn publish(&self, frame: Frame) {
        let jpeg = frame.jpeg.clone();
        self.lock().latest = Some(frame);
        // No receivers is the normal case when nobody watches the preview
        let _ = self.preview_tx.send(jpeg);
    }

    pub fn latest(&self) -> Option<Frame> {
        self.lock().latest.clone()
    }

    pub fn clear(&self) {
        self.lock().latest = None;
    }

    /// Record a terminal failure of the background producer.
    pub fn set_fault(&self, reason: impl Into<String>) {
        self.lock().fault = Some(reason.into());
    }

    pub fn clear_fault(&self) {
        self.lock().fault = None;
    }

    pub fn fault(&self) -> Option<String> {
        self.lock().fault.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.preview_tx.subscribe()
    }
}
