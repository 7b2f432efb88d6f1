//! Reference descriptor extraction from labeled still images.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::types::LabeledDescriptors;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("cannot read reference image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no face detected in reference image {0}")]
    NoFace(PathBuf),
    #[error("analysis of reference image {path} failed: {source}")]
    Analysis {
        path: PathBuf,
        #[source]
        source: AnalyzerError,
    },
}

/// An identity label bound to one still image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSpec {
    pub label: String,
    pub image: PathBuf,
}

impl ReferenceSpec {
    pub fn new(label: impl Into<String>, image: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            image: image.into(),
        }
    }
}

/// Decode an image file to an 8-bit grayscale buffer.
pub fn load_grayscale(path: &Path) -> Result<image::GrayImage, ReferenceError> {
    image::open(path)
        .map(|img| img.to_luma8())
        .map_err(|source| ReferenceError::Image {
            path: path.to_path_buf(),
            source,
        })
}

/// Describe the single most confident face of a reference image.
pub fn describe_reference<A: FaceAnalyzer + ?Sized>(
    analyzer: &mut A,
    spec: &ReferenceSpec,
) -> Result<LabeledDescriptors, ReferenceError> {
    let gray = load_grayscale(&spec.image)?;
    let (width, height) = gray.dimensions();

    let face = analyzer
        .describe_single(gray.as_raw(), width, height)
        .map_err(|source| ReferenceError::Analysis {
            path: spec.image.clone(),
            source,
        })?
        .ok_or_else(|| ReferenceError::NoFace(spec.image.clone()))?;

    tracing::info!(
        label = %spec.label,
        image = %spec.image.display(),
        confidence = face.bbox.confidence,
        "reference descriptor extracted"
    );

    Ok(LabeledDescriptors::new(spec.label.clone(), vec![face.descriptor]))
}

/// Fold descriptor sets sharing a label into one set per label, keeping
/// first-seen order.
pub fn merge_by_label(sets: Vec<LabeledDescriptors>) -> Vec<LabeledDescriptors> {
    let mut merged: Vec<LabeledDescriptors> = Vec::with_capacity(sets.len());
    for set in sets {
        match merged.iter_mut().find(|m| m.label == set.label) {
            Some(existing) => existing.descriptors.extend(set.descriptors),
            None => merged.push(set),
        }
    }
    merged
}
