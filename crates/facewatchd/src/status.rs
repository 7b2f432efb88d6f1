//! Shared, queryable view of the pipeline for the host interface.

use crate::events::MatchEvent;
use crate::state::{PipelineEvent, PipelineState, StateMachine};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Status {
    machine: StateMachine,
    latest_match: Option<MatchEvent>,
    references: Vec<String>,
    reference_warnings: Vec<String>,
    /// User-facing message for a problem that did not stop the pipeline.
    notice: Option<String>,
    capture: Option<(u32, u32)>,
    frames_processed: u64,
    frames_dropped: u64,
}

/// Clone-safe handle; every clone sees the same status.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<Mutex<Status>>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Status> {
        // A panicked holder cannot leave Status half-written.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Feed an event to the state machine. Returns false if it was rejected.
    pub fn apply(&self, event: PipelineEvent) -> bool {
        let mut status = self.lock();
        match status.machine.apply(event) {
            Ok(state) => {
                tracing::debug!(state = state.name(), "pipeline state changed");
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "pipeline event rejected");
                false
            }
        }
    }

    pub fn state(&self) -> PipelineState {
        self.lock().machine.state().clone()
    }

    pub fn set_references(&self, labels: Vec<String>, warnings: Vec<String>) {
        let mut status = self.lock();
        status.references = labels;
        status.reference_warnings = warnings;
    }

    pub fn set_notice(&self, message: impl Into<String>) {
        self.lock().notice = Some(message.into());
    }

    pub fn notice(&self) -> Option<String> {
        self.lock().notice.clone()
    }

    pub fn set_capture(&self, width: u32, height: u32) {
        self.lock().capture = Some((width, height));
    }

    pub fn record_frame(&self) {
        self.lock().frames_processed += 1;
    }

    pub fn record_dropped(&self) {
        self.lock().frames_dropped += 1;
    }

    pub fn set_latest_match(&self, event: &MatchEvent) {
        self.lock().latest_match = Some(event.clone());
    }

    pub fn latest_match(&self) -> Option<MatchEvent> {
        self.lock().latest_match.clone()
    }

    pub fn frames_processed(&self) -> u64 {
        self.lock().frames_processed
    }

    pub fn frames_dropped(&self) -> u64 {
        self.lock().frames_dropped
    }

    /// Everything the host can ask about, as JSON.
    pub fn to_json(&self) -> Value {
        let status = self.lock();
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "state": status.machine.state(),
            "references": status.references,
            "reference_warnings": status.reference_warnings,
            "notice": status.notice,
            "capture": status.capture.map(|(w, h)| json!({"width": w, "height": h})),
            "frames_processed": status.frames_processed,
            "frames_dropped": status.frames_dropped,
            "latest_match": status.latest_match.as_ref().map(match_json),
        })
    }
}

/// `{"label", "distance", "time"}` for one match event.
pub fn match_json(event: &MatchEvent) -> Value {
    json!({
        "label": event.label,
        "distance": event.distance,
        "time": event.time_string(),
    })
}
