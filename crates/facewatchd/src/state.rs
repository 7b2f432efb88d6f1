//! Pipeline state machine.
//!
//! ```text
//! Idle -> LoadingModels -> ModelsReady -> AwaitingCamera -> Streaming <-> Detecting -> TornDown
//!                 any non-terminal state --Failed/CameraDenied--> Error
//! ```

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    LoadingModels,
    ModelsReady,
    AwaitingCamera,
    Streaming,
    Detecting,
    TornDown,
    Error(String),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::TornDown | PipelineState::Error(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::LoadingModels => "loading_models",
            PipelineState::ModelsReady => "models_ready",
            PipelineState::AwaitingCamera => "awaiting_camera",
            PipelineState::Streaming => "streaming",
            PipelineState::Detecting => "detecting",
            PipelineState::TornDown => "torn_down",
            PipelineState::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    LoadStarted,
    ModelsLoaded,
    ReferencesLoaded,
    CameraRequested,
    CameraGranted,
    CameraDenied(String),
    FrameStarted,
    FrameFinished,
    Failed(String),
    TearDown,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid transition: {event:?} in state {from}")]
pub struct TransitionError {
    pub from: &'static str,
    pub event: PipelineEvent,
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    state: PipelineState,
    models_loaded: bool,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            state: PipelineState::Idle,
            models_loaded: false,
        }
    }
}

impl StateMachine {
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Apply `event`. Rejected events leave the state unchanged.
    pub fn apply(&mut self, event: PipelineEvent) -> Result<&PipelineState, TransitionError> {
        use PipelineEvent as E;
        use PipelineState as S;

        let next = match (&self.state, &event) {
            (s, _) if s.is_terminal() => None,
            (_, E::Failed(msg)) | (S::AwaitingCamera, E::CameraDenied(msg)) => {
                Some(S::Error(msg.clone()))
            }
            (_, E::TearDown) => Some(S::TornDown),
            (S::Idle, E::LoadStarted) => Some(S::LoadingModels),
            (S::LoadingModels, E::ModelsLoaded) => {
                self.models_loaded = true;
                Some(S::LoadingModels)
            }
            (S::LoadingModels, E::ReferencesLoaded) if self.models_loaded => Some(S::ModelsReady),
            (S::ModelsReady, E::CameraRequested) => Some(S::AwaitingCamera),
            (S::AwaitingCamera, E::CameraGranted) => Some(S::Streaming),
            (S::Streaming, E::FrameStarted) => Some(S::Detecting),
            (S::Detecting, E::FrameFinished) => Some(S::Streaming),
            _ => None,
        };

        match next {
            Some(state) => {
                self.state = state;
                Ok(&self.state)
            }
            None => Err(TransitionError {
                from: self.state.name(),
                event,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming() -> StateMachine {
        let mut sm = StateMachine::default();
        for ev in [
            PipelineEvent::LoadStarted,
            PipelineEvent::ModelsLoaded,
            PipelineEvent::ReferencesLoaded,
            PipelineEvent::CameraRequested,
            PipelineEvent::CameraGranted,
        ] {
            sm.apply(ev).unwrap();
        }
        sm
    }

    #[test]
    fn test_happy_path() {
        let mut sm = streaming();
        assert_eq!(sm.state(), &PipelineState::Streaming);
        assert_eq!(sm.apply(PipelineEvent::FrameStarted).unwrap(), &PipelineState::Detecting);
        assert_eq!(sm.apply(PipelineEvent::FrameFinished).unwrap(), &PipelineState::Streaming);
        assert_eq!(sm.apply(PipelineEvent::TearDown).unwrap(), &PipelineState::TornDown);
    }

    #[test]
    fn test_references_before_models_rejected() {
        let mut sm = StateMachine::default();
        sm.apply(PipelineEvent::LoadStarted).unwrap();
        let err = sm.apply(PipelineEvent::ReferencesLoaded).unwrap_err();
        assert_eq!(err.from, "loading_models");
        assert_eq!(sm.state(), &PipelineState::LoadingModels);
    }

    #[test]
    fn test_camera_not_requested_before_ready() {
        let mut sm = StateMachine::default();
        sm.apply(PipelineEvent::LoadStarted).unwrap();
        sm.apply(PipelineEvent::ModelsLoaded).unwrap();
        assert!(sm.apply(PipelineEvent::CameraRequested).is_err());
        assert!(sm.apply(PipelineEvent::FrameStarted).is_err());
    }

    #[test]
    fn test_camera_denied_is_terminal() {
        let mut sm = streaming();
        // Only valid while awaiting the camera.
        assert!(sm.apply(PipelineEvent::CameraDenied("x".into())).is_err());

        let mut sm = StateMachine::default();
        for ev in [
            PipelineEvent::LoadStarted,
            PipelineEvent::ModelsLoaded,
            PipelineEvent::ReferencesLoaded,
            PipelineEvent::CameraRequested,
        ] {
            sm.apply(ev).unwrap();
        }
        sm.apply(PipelineEvent::CameraDenied("denied".into())).unwrap();
        assert_eq!(sm.state(), &PipelineState::Error("denied".into()));
        assert!(sm.apply(PipelineEvent::CameraGranted).is_err());
        assert!(sm.apply(PipelineEvent::TearDown).is_err());
    }

    #[test]
    fn test_failure_from_loading() {
        let mut sm = StateMachine::default();
        sm.apply(PipelineEvent::LoadStarted).unwrap();
        sm.apply(PipelineEvent::Failed("no models".into())).unwrap();
        assert!(sm.state().is_terminal());
        assert_eq!(sm.state().name(), "error");
    }

    #[test]
    fn test_state_serializes_with_message() {
        let json = serde_json::to_value(PipelineState::Error("boom".into())).unwrap();
        assert_eq!(json, serde_json::json!({"state": "error", "message": "boom"}));
        let json = serde_json::to_value(PipelineState::Streaming).unwrap();
        assert_eq!(json, serde_json::json!({"state": "streaming"}));
    }
}
