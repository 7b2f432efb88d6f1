//! The seam between the control loop and the face models.

use crate::detector::DetectorError;
use crate::recognizer::RecognizerError;
use crate::types::{BoundingBox, Embedding};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// One detected face and its descriptor, in capture coordinates.
#[derive(Debug, Clone)]
pub struct FaceDescription {
    pub bbox: BoundingBox,
    pub descriptor: Embedding,
}

/// Detects faces in grayscale frames and describes them.
pub trait FaceAnalyzer {
    /// Fast pass over a live frame: every face, with descriptors.
    fn describe_all(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceDescription>, AnalyzerError>;

    /// Accurate pass over a still: the single most confident face, if any.
    fn describe_single(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<FaceDescription>, AnalyzerError>;
}

impl<A: FaceAnalyzer + ?Sized> FaceAnalyzer for Box<A> {
    fn describe_all(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceDescription>, AnalyzerError> {
        (**self).describe_all(frame, width, height)
    }

    fn describe_single(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<FaceDescription>, AnalyzerError> {
        (**self).describe_single(frame, width, height)
    }
}
