//! Listener contract and recorder events

use super::state::{RecorderState, RecordingOutcome, RecordingSession};
use crate::utils::error::{ErrorResponse, RecorderError};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Callbacks delivered to the host application.
///
/// Called from runtime worker threads and the capture session's thread.
/// Calls made by control operations are delivered after the operation
/// released its locks, so a listener may call back into the recorder (from
/// a spawned task, since the control operations are async).
pub trait RecordListener: Send + Sync {
    /// Reported every time a capture session starts
    fn on_flash_support_detected(&self, supported: bool);

    /// The encoder finalized the output file
    fn on_record_complete(&self);

    fn on_error(&self, error: &RecorderError);
}

/// Events emitted by the recorder
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// State machine transition
    StateChanged(RecorderState),
    /// Capture session reported its flash capability
    FlashSupportDetected(bool),
    /// Session allocated and frames routed to the encoder; the encoder
    /// itself may still be starting
    RecordingStarted(RecordingSession),
    /// Output file finalized
    RecordComplete(RecordingOutcome),
    /// Error occurred
    Error(ErrorResponse),
}

/// Fans notifications out to the listener and to broadcast subscribers
pub(crate) struct Notifier {
    listener: Option<Arc<dyn RecordListener>>,
    event_tx: broadcast::Sender<RecorderEvent>,
}

impl Notifier {
    pub fn new(listener: Option<Arc<dyn RecordListener>>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self { listener, event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: RecorderEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    pub fn state_changed(&self, state: RecorderState) {
        self.emit(RecorderEvent::StateChanged(state));
    }

    pub fn flash_support(&self, supported: bool) {
        if let Some(listener) = &self.listener {
            listener.on_flash_support_detected(supported);
        }
        self.emit(RecorderEvent::FlashSupportDetected(supported));
    }

    pub fn recording_started(&self, session: &RecordingSession) {
        self.emit(RecorderEvent::RecordingStarted(session.clone()));
    }

    pub fn record_complete(&self, outcome: &RecordingOutcome) {
        if let Some(listener) = &self.listener {
            listener.on_record_complete();
        }
        self.emit(RecorderEvent::RecordComplete(outcome.clone()));
    }

    pub fn error(&self, error: &RecorderError) {
        tracing::error!("Recorder error: {}", error);
        if let Some(listener) = &self.listener {
            listener.on_error(error);
        }
        self.emit(RecorderEvent::Error(ErrorResponse::from(error)));
    }
}
