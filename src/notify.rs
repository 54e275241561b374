//! Outbound sinks that never fail the caller: viewer live-state events and
//! operational error reporting.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LiveStateEvent {
    pub stream_id: u32,
    pub live: bool,
}

/// Viewer-facing collaborator told whenever a stream goes live or ends.
pub trait ViewerNotifier: Send + Sync {
    fn live_state_changed(&self, stream_id: u32, live: bool);
}

/// Fans live-state events out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<LiveStateEvent>,
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveStateEvent> {
        self.tx.subscribe()
    }
}

impl ViewerNotifier for BroadcastNotifier {
    fn live_state_changed(&self, stream_id: u32, live: bool) {
        // No subscribers is not an error.
        let _ = self.tx.send(LiveStateEvent { stream_id, live });
        tracing::debug!(stream_id, live, "Live state changed");
    }
}

/// Observability sink for failures the scheduler swallows.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &DispatchError);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &DispatchError) {
        tracing::error!(error = %error, "Dispatch error");
    }
}

/// Keeps every reported error, for inspection.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reported: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reported(&self) -> Vec<String> {
        self.reported
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, error: &DispatchError) {
        if let Ok(mut reported) = self.reported.lock() {
            reported.push(error.to_string());
        }
    }
}
