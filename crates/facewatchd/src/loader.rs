//! Startup loading: models first, then reference descriptors.
//!
//! [`Ready`] can only be built here, so a recognition loop never exists
//! before both steps have completed.

use crate::config::ReferencePolicy;
use crate::engine::EngineError;
use crate::state::PipelineEvent;
use crate::status::StatusHandle;
use facewatch_core::reference::{describe_reference, merge_by_label};
use facewatch_core::{FaceAnalyzer, LabeledDescriptors, ModelError, ReferenceSpec};
use std::time::Duration;

/// Loaded models plus the reference descriptor sets they produced.
pub struct Ready<A> {
    analyzer: A,
    references: Vec<LabeledDescriptors>,
    warnings: Vec<String>,
    notice: Option<String>,
}

impl<A> Ready<A> {
    pub fn references(&self) -> &[LabeledDescriptors] {
        &self.references
    }

    /// One entry per reference dropped under [`ReferencePolicy::Degrade`].
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// What to tell the user when a reference was dropped.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn labels(&self) -> Vec<String> {
        self.references.iter().map(|r| r.label.clone()).collect()
    }

    pub(crate) fn into_parts(self) -> (A, Vec<LabeledDescriptors>) {
        (self.analyzer, self.references)
    }
}

/// Describe every reference with an already-loaded analyzer.
pub fn load_references<A: FaceAnalyzer>(
    mut analyzer: A,
    specs: &[ReferenceSpec],
    policy: ReferencePolicy,
) -> Result<Ready<A>, EngineError> {
    let mut sets = Vec::with_capacity(specs.len());
    let mut warnings = Vec::new();
    let mut notice = None;

    for spec in specs {
        match describe_reference(&mut analyzer, spec) {
            Ok(set) => sets.push(set),
            Err(err) if policy == ReferencePolicy::Degrade => {
                tracing::warn!(
                    label = %spec.label,
                    error = %err,
                    "reference dropped; continuing without it"
                );
                warnings.push(format!("{}: {}", spec.label, err));
                notice = Some(EngineError::from(err).user_message());
            }
            Err(err) => return Err(err.into()),
        }
    }

    let references = merge_by_label(sets);
    if references.is_empty() && !specs.is_empty() {
        tracing::warn!("no reference survived loading; every face will be unknown");
    }

    Ok(Ready {
        analyzer,
        references,
        warnings,
        notice,
    })
}

/// Load models and references off the async runtime, driving `status`
/// through the loading states.
///
/// `timeout` bounds the whole step. On failure the status ends in
/// `Error` with the user-facing message.
pub async fn prepare<A, F>(
    load_models: F,
    specs: Vec<ReferenceSpec>,
    policy: ReferencePolicy,
    timeout: Option<Duration>,
    status: &StatusHandle,
) -> Result<Ready<A>, EngineError>
where
    A: FaceAnalyzer + Send + 'static,
    F: FnOnce() -> Result<A, ModelError> + Send + 'static,
{
    status.apply(PipelineEvent::LoadStarted);

    let worker_status = status.clone();
    let task = tokio::task::spawn_blocking(move || {
        let analyzer = load_models()?;
        tracing::info!("face models loaded");
        worker_status.apply(PipelineEvent::ModelsLoaded);
        load_references(analyzer, &specs, policy)
    });

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                return Err(fail(
                    status,
                    EngineError::Timeout {
                        stage: "loading",
                        secs: limit.as_secs(),
                    },
                ))
            }
        },
        None => task.await,
    };

    let ready = match joined {
        Ok(Ok(ready)) => ready,
        Ok(Err(err)) => return Err(fail(status, err)),
        Err(join) => return Err(fail(status, EngineError::Thread(join.to_string()))),
    };

    status.set_references(ready.labels(), ready.warnings().to_vec());
    if let Some(notice) = ready.notice() {
        status.set_notice(notice);
    }
    status.apply(PipelineEvent::ReferencesLoaded);
    tracing::info!(
        references = ready.references().len(),
        dropped = ready.warnings().len(),
        "models and references ready"
    );
    Ok(ready)
}

fn fail(status: &StatusHandle, err: EngineError) -> EngineError {
    tracing::error!(error = %err, "loading failed");
    status.apply(PipelineEvent::Failed(err.user_message()));
    err
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::state::PipelineState;
    use facewatch_core::{
        AnalyzerError, BoundingBox, Embedding, FaceDescription, ReferenceError,
    };
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    pub(crate) fn face_at(x: f32, y: f32, size: f32, values: Vec<f32>) -> FaceDescription {
        FaceDescription {
            bbox: BoundingBox {
                x,
                y,
                width: size,
                height: size,
                confidence: 0.9,
                landmarks: None,
            },
            descriptor: Embedding::new(values),
        }
    }

    /// Fixed reference face for stills, scripted faces for live frames.
    ///
    /// `fail_live` is shared so a test can flip it after the analyzer has
    /// moved into a loop.
    pub(crate) struct ScriptedAnalyzer {
        pub reference: Option<Vec<f32>>,
        pub live: Vec<FaceDescription>,
        pub fail_live: Arc<AtomicBool>,
        pub live_delay: Duration,
    }

    impl ScriptedAnalyzer {
        pub(crate) fn new(reference: Option<Vec<f32>>, live: Vec<FaceDescription>) -> Self {
            Self {
                reference,
                live,
                fail_live: Arc::new(AtomicBool::new(false)),
                live_delay: Duration::ZERO,
            }
        }
    }

    impl FaceAnalyzer for ScriptedAnalyzer {
        fn describe_all(
            &mut self,
            _frame: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<FaceDescription>, AnalyzerError> {
            if !self.live_delay.is_zero() {
                std::thread::sleep(self.live_delay);
            }
            if self.fail_live.load(Ordering::SeqCst) {
                return Err(AnalyzerError::Detector(
                    facewatch_core::detector::DetectorError::InferenceFailed("scripted".into()),
                ));
            }
            Ok(self.live.clone())
        }

        fn describe_single(
            &mut self,
            _frame: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Option<FaceDescription>, AnalyzerError> {
            Ok(self
                .reference
                .clone()
                .map(|values| face_at(10.0, 10.0, 40.0, values)))
        }
    }

    pub(crate) fn write_still(dir: &Path, name: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        image::GrayImage::from_pixel(16, 16, image::Luma([120])).save(&path).unwrap();
        path
    }

    #[test]
    fn test_reference_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ReferenceSpec::new("Suman", write_still(dir.path(), "1.png"));
        let analyzer = ScriptedAnalyzer::new(Some(vec![0.0, 0.0]), vec![]);

        let ready = load_references(analyzer, &[spec], ReferencePolicy::Degrade).unwrap();
        assert_eq!(ready.labels(), vec!["Suman"]);
        assert!(ready.warnings().is_empty());
    }

    #[test]
    fn test_no_face_degrades_to_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ReferenceSpec::new("Suman", write_still(dir.path(), "1.png"));
        let analyzer = ScriptedAnalyzer::new(None, vec![]);

        let ready = load_references(analyzer, &[spec], ReferencePolicy::Degrade).unwrap();
        assert!(ready.references().is_empty());
        assert_eq!(ready.warnings().len(), 1);
        assert!(ready.warnings()[0].starts_with("Suman: "));
        assert_eq!(ready.notice(), Some(crate::engine::REFERENCE_MESSAGE));
    }

    #[test]
    fn test_fail_policy_rejects_missing_image() {
        let analyzer = ScriptedAnalyzer::new(Some(vec![0.0]), vec![]);
        let spec = ReferenceSpec::new("Suman", "/nonexistent/suman/1.png");

        let err = load_references(analyzer, &[spec], ReferencePolicy::Fail)
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Reference(ReferenceError::Image { .. })));
    }

    #[test]
    fn test_same_label_merged() {
        let dir = tempfile::tempdir().unwrap();
        let specs = [
            ReferenceSpec::new("Suman", write_still(dir.path(), "1.png")),
            ReferenceSpec::new("Suman", write_still(dir.path(), "2.png")),
        ];
        let analyzer = ScriptedAnalyzer::new(Some(vec![0.0, 0.0]), vec![]);

        let ready = load_references(analyzer, &specs, ReferencePolicy::Degrade).unwrap();
        assert_eq!(ready.references().len(), 1);
        assert_eq!(ready.references()[0].descriptors.len(), 2);
    }

    #[tokio::test]
    async fn test_prepare_reaches_models_ready() {
        let dir = tempfile::tempdir().unwrap();
        let specs = vec![ReferenceSpec::new("Suman", write_still(dir.path(), "1.png"))];
        let status = StatusHandle::new();

        let ready = prepare(
            || Ok(ScriptedAnalyzer::new(Some(vec![0.0, 0.0]), vec![])),
            specs,
            ReferencePolicy::Degrade,
            None,
            &status,
        )
        .await
        .unwrap();

        assert_eq!(ready.labels(), vec!["Suman"]);
        assert_eq!(status.state(), PipelineState::ModelsReady);
        assert_eq!(status.to_json()["references"][0], "Suman");
        assert!(status.notice().is_none());
    }

    #[tokio::test]
    async fn test_prepare_missing_image_degrades_with_notice() {
        let status = StatusHandle::new();
        let specs = vec![ReferenceSpec::new("Suman", "/nonexistent/suman/1.png")];

        let ready = prepare(
            || Ok(ScriptedAnalyzer::new(Some(vec![0.0, 0.0]), vec![])),
            specs,
            ReferencePolicy::Degrade,
            None,
            &status,
        )
        .await
        .unwrap();

        assert!(ready.references().is_empty());
        assert_eq!(status.state(), PipelineState::ModelsReady);
        let json = status.to_json();
        assert_eq!(json["notice"], crate::engine::REFERENCE_MESSAGE);
        assert_eq!(json["reference_warnings"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_prepare_model_failure_is_error_state() {
        let status = StatusHandle::new();
        let result = prepare::<ScriptedAnalyzer, _>(
            || {
                Err(ModelError::Recognizer(
                    facewatch_core::recognizer::RecognizerError::ModelNotFound(
                        "/models/w600k_r50.onnx".into(),
                    ),
                ))
            },
            vec![],
            ReferencePolicy::Degrade,
            Some(Duration::from_secs(5)),
            &status,
        )
        .await;

        assert!(matches!(result, Err(EngineError::Models(_))));
        match status.state() {
            PipelineState::Error(msg) => {
                assert!(msg.starts_with("Failed to load face recognition models"))
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_prepare_timeout() {
        let status = StatusHandle::new();
        let result = prepare(
            || {
                std::thread::sleep(Duration::from_millis(300));
                Ok(ScriptedAnalyzer::new(None, vec![]))
            },
            vec![],
            ReferencePolicy::Degrade,
            Some(Duration::from_millis(20)),
            &status,
        )
        .await;

        assert!(matches!(result, Err(EngineError::Timeout { stage: "loading", .. })));
        assert!(status.state().is_terminal());
    }
}
