//! facewatch-core: Face detection, description and reference matching.
//!
//! SCRFD detects faces and their keypoints, ArcFace turns aligned crops
//! into descriptors, and [`FaceMatcher`] assigns each descriptor the label
//! of the nearest reference set. Both models run on ONNX Runtime (CPU).

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod models;
pub mod recognizer;
pub mod reference;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, FaceDescription};
pub use models::{default_model_dir, ModelError, ModelPaths, ModelSet};
pub use reference::{ReferenceError, ReferenceSpec};
pub use types::{
    BoundingBox, Embedding, FaceMatch, FaceMatcher, LabeledDescriptors, Matcher,
    DEFAULT_MATCH_THRESHOLD, UNKNOWN_LABEL,
};
