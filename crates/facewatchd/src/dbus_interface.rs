use crate::events::MatchEvent;
use crate::status::{match_json, StatusHandle};
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.facewatch.Recognizer1";
pub const OBJECT_PATH: &str = "/org/facewatch/Recognizer1";

/// D-Bus interface for the facewatch daemon.
///
/// Bus name: org.facewatch.Recognizer1
/// Object path: /org/facewatch/Recognizer1
pub struct RecognizerService {
    status: StatusHandle,
}

impl RecognizerService {
    pub fn new(status: StatusHandle) -> Self {
        Self { status }
    }
}

#[interface(name = "org.facewatch.Recognizer1")]
impl RecognizerService {
    /// Pipeline state, references, capture size and counters as JSON.
    async fn status(&self) -> String {
        self.status.to_json().to_string()
    }

    /// The most recent match as `{"label", "distance", "time"}`, or `null`.
    async fn latest_match(&self) -> String {
        self.status
            .latest_match()
            .map(|event| match_json(&event))
            .unwrap_or(serde_json::Value::Null)
            .to_string()
    }

    /// Fired once per non-unknown detection per frame.
    #[zbus(signal)]
    async fn face_matched(emitter: &SignalEmitter<'_>, label: &str, time: &str)
        -> zbus::Result<()>;
}

/// Claim the bus name and serve the interface on the session bus.
pub async fn serve(status: StatusHandle) -> zbus::Result<zbus::Connection> {
    let conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, RecognizerService::new(status))?
        .build()
        .await?;
    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "D-Bus interface registered");
    Ok(conn)
}

/// Broadcast `FaceMatched(label, time)`.
pub async fn emit_face_matched(conn: &zbus::Connection, event: &MatchEvent) -> zbus::Result<()> {
    let emitter = SignalEmitter::new(conn, OBJECT_PATH)?;
    RecognizerService::face_matched(&emitter, &event.label, &event.time_string()).await
}
