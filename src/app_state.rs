use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::services::capture::CaptureMessage;

/// Shared state of the capture listener's route handlers.
///
/// Holds the one-shot slot the first recognised capture message is sent
/// through. Once taken, later messages are refused.
#[derive(Clone)]
pub struct CaptureState {
    slot: Arc<Mutex<Option<oneshot::Sender<CaptureMessage>>>>,
}

impl CaptureState {
    pub fn new(slot: oneshot::Sender<CaptureMessage>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(slot))),
        }
    }

    pub fn take_slot(&self) -> Option<oneshot::Sender<CaptureMessage>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}
