//! Model files and the loaded model set.

use crate::analyzer::{AnalyzerError, FaceAnalyzer, FaceDescription};
use crate::detector::{DetectorError, DetectorProfile, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const FAST_DETECTOR_FILE: &str = "det_500m.onnx";
pub const ACCURATE_DETECTOR_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("fast detector: {0}")]
    FastDetector(DetectorError),
    #[error("accurate detector: {0}")]
    AccurateDetector(DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// `$XDG_DATA_HOME/facewatch/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facewatch")
        .join("models")
}

/// Locations of every model the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub fast_detector: PathBuf,
    pub accurate_detector: PathBuf,
    pub recognizer: PathBuf,
}

impl ModelPaths {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            fast_detector: dir.join(FAST_DETECTOR_FILE),
            accurate_detector: dir.join(ACCURATE_DETECTOR_FILE),
            recognizer: dir.join(RECOGNIZER_FILE),
        }
    }

    /// Paths that do not exist on disk.
    pub fn missing(&self) -> Vec<&Path> {
        [&self.fast_detector, &self.accurate_detector, &self.recognizer]
            .into_iter()
            .map(PathBuf::as_path)
            .filter(|p| !p.exists())
            .collect()
    }
}

/// Both detectors and the recognizer, ready for inference.
pub struct ModelSet {
    fast: FaceDetector,
    accurate: FaceDetector,
    recognizer: FaceRecognizer,
}

impl ModelSet {
    /// Load every model; the first failure aborts.
    pub fn load(paths: &ModelPaths) -> Result<Self, ModelError> {
        let fast = FaceDetector::load(&paths.fast_detector.to_string_lossy(), DetectorProfile::FAST)
            .map_err(ModelError::FastDetector)?;
        let accurate = FaceDetector::load(
            &paths.accurate_detector.to_string_lossy(),
            DetectorProfile::ACCURATE,
        )
        .map_err(ModelError::AccurateDetector)?;
        let recognizer = FaceRecognizer::load(&paths.recognizer.to_string_lossy())?;

        Ok(Self {
            fast,
            accurate,
            recognizer,
        })
    }
}

impl FaceAnalyzer for ModelSet {
    fn describe_all(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceDescription>, AnalyzerError> {
        let faces = self.fast.detect(frame, width, height)?;
        let mut described = Vec::with_capacity(faces.len());
        for bbox in faces {
            let descriptor = self.recognizer.describe(frame, width, height, &bbox)?;
            described.push(FaceDescription { bbox, descriptor });
        }
        Ok(described)
    }

    fn describe_single(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<FaceDescription>, AnalyzerError> {
        let Some(bbox) = self.accurate.detect(frame, width, height)?.into_iter().next() else {
            return Ok(None);
        };
        let descriptor = self.recognizer.describe(frame, width, height, &bbox)?;
        Ok(Some(FaceDescription { bbox, descriptor }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_in_dir() {
        let p = ModelPaths::in_dir("/models");
        assert_eq!(p.fast_detector, PathBuf::from("/models/det_500m.onnx"));
        assert_eq!(p.accurate_detector, PathBuf::from("/models/det_10g.onnx"));
        assert_eq!(p.recognizer, PathBuf::from("/models/w600k_r50.onnx"));
    }

    #[test]
    fn test_missing_models_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RECOGNIZER_FILE), b"").unwrap();
        let paths = ModelPaths::in_dir(dir.path());
        assert_eq!(
            paths.missing(),
            vec![paths.fast_detector.as_path(), paths.accurate_detector.as_path()]
        );
    }

    #[test]
    fn test_load_fails_on_missing_fast_detector() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelSet::load(&ModelPaths::in_dir(dir.path())).err().unwrap();
        assert!(matches!(
            err,
            ModelError::FastDetector(DetectorError::ModelNotFound(_))
        ));
    }
}
