//! Match events published to the host.

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::mpsc;

/// A non-unknown match observed in one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchEvent {
    pub label: String,
    pub distance: f32,
    pub at: DateTime<Local>,
}

impl MatchEvent {
    pub fn now(label: impl Into<String>, distance: f32) -> Self {
        Self {
            label: label.into(),
            distance,
            at: Local::now(),
        }
    }

    /// Local wall-clock time, e.g. "14:03:27".
    pub fn time_string(&self) -> String {
        self.at.format("%H:%M:%S").to_string()
    }
}

/// Receives every match event. One observer per loop.
pub trait MatchObserver: Send {
    fn on_face_matched(&mut self, event: &MatchEvent);
}

impl<F> MatchObserver for F
where
    F: FnMut(&MatchEvent) + Send,
{
    fn on_face_matched(&mut self, event: &MatchEvent) {
        self(event)
    }
}

/// Forwards events to the async side. A closed receiver drops them.
impl MatchObserver for mpsc::UnboundedSender<MatchEvent> {
    fn on_face_matched(&mut self, event: &MatchEvent) {
        if self.send(event.clone()).is_err() {
            tracing::debug!(label = %event.label, "match event dropped: receiver closed");
        }
    }
}
