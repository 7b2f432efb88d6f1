use serde::{Deserialize, Serialize};
use std::fmt;

/// Label assigned to a detection whose nearest reference is too far away.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Default maximum descriptor distance for a detection to count as a match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Map the box (and its landmarks) into another coordinate space.
    ///
    /// `sx` and `sy` are the target/source ratios per axis, e.g.
    /// `display_width / capture_width`.
    pub fn scaled(&self, sx: f32, sy: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * sx, ly * sy))),
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face descriptor (512-dimensional for ArcFace, L2-normalised).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this descriptor (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Euclidean distance between two descriptors.
    ///
    /// Descriptors of different length are compared over their common prefix.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An identity label and the descriptors known to belong to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledDescriptors {
    pub label: String,
    pub descriptors: Vec<Embedding>,
}

impl LabeledDescriptors {
    pub fn new(label: impl Into<String>, descriptors: Vec<Embedding>) -> Self {
        Self {
            label: label.into(),
            descriptors,
        }
    }

    /// Mean distance from `candidate` to every descriptor of this identity.
    ///
    /// Returns `None` when the set holds no descriptors.
    pub fn mean_distance(&self, candidate: &Embedding) -> Option<f32> {
        if self.descriptors.is_empty() {
            return None;
        }
        let total: f32 = self.descriptors.iter().map(|d| candidate.distance(d)).sum();
        Some(total / self.descriptors.len() as f32)
    }
}

/// Outcome of matching one detection against the reference sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    /// Matched identity, or [`UNKNOWN_LABEL`].
    pub label: String,
    /// Distance to the nearest reference set (infinite when there are none).
    pub distance: f32,
}

impl FaceMatch {
    pub fn unknown(distance: f32) -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            distance,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LABEL
    }
}

impl fmt::Display for FaceMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.distance.is_finite() {
            write!(f, "{} ({:.2})", self.label, self.distance)
        } else {
            f.write_str(&self.label)
        }
    }
}

/// Strategy for finding the reference identity closest to a candidate descriptor.
pub trait Matcher {
    fn best_match(&self, candidate: &Embedding) -> FaceMatch;
}

/// Nearest-reference matcher over labeled descriptor sets.
///
/// A set's distance is the mean over its descriptors; the nearest set wins
/// unless its distance is strictly greater than `threshold`.
#[derive(Debug, Clone)]
pub struct FaceMatcher {
    references: Vec<LabeledDescriptors>,
    threshold: f32,
}

impl FaceMatcher {
    pub fn new(references: Vec<LabeledDescriptors>, threshold: f32) -> Self {
        Self {
            references,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn references(&self) -> &[LabeledDescriptors] {
        &self.references
    }
}

impl Matcher for FaceMatcher {
    fn best_match(&self, candidate: &Embedding) -> FaceMatch {
        let mut best: Option<(usize, f32)> = None;

        // Every set is visited; ties keep the earlier set.
        for (i, set) in self.references.iter().enumerate() {
            let Some(dist) = set.mean_distance(candidate) else {
                continue;
            };
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((i, dist));
            }
        }

        match best {
            Some((idx, dist)) if dist <= self.threshold => FaceMatch {
                label: self.references[idx].label.clone(),
                distance: dist,
            },
            Some((_, dist)) => FaceMatch::unknown(dist),
            None => FaceMatch::unknown(f32::INFINITY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    /// Candidate at the origin; a reference at (d, 0) sits exactly `d` away.
    fn reference_at(label: &str, d: f32) -> LabeledDescriptors {
        LabeledDescriptors::new(label, vec![emb(&[d, 0.0])])
    }

    #[test]
    fn test_distance_identical() {
        let a = emb(&[0.3, 0.4, 0.5]);
        assert!(a.distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_distance_known_value() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[3.0, 4.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean_distance_over_descriptors() {
        let set = LabeledDescriptors::new("a", vec![emb(&[0.2, 0.0]), emb(&[0.4, 0.0])]);
        let d = set.mean_distance(&emb(&[0.0, 0.0])).unwrap();
        assert!((d - 0.3).abs() < 1e-6);
        assert!(LabeledDescriptors::new("b", vec![]).mean_distance(&emb(&[0.0])).is_none());
    }

    #[test]
    fn test_match_within_threshold() {
        let matcher = FaceMatcher::new(vec![reference_at("Suman", 0.3)], DEFAULT_MATCH_THRESHOLD);
        let m = matcher.best_match(&emb(&[0.0, 0.0]));
        assert_eq!(m.label, "Suman");
        assert!((m.distance - 0.3).abs() < 1e-6);
        assert!(!m.is_unknown());
    }

    #[test]
    fn test_match_beyond_threshold_is_unknown() {
        let matcher = FaceMatcher::new(vec![reference_at("Suman", 0.8)], DEFAULT_MATCH_THRESHOLD);
        let m = matcher.best_match(&emb(&[0.0, 0.0]));
        assert!(m.is_unknown());
        assert!((m.distance - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_match_at_threshold_is_accepted() {
        let matcher = FaceMatcher::new(vec![reference_at("Suman", 0.5)], 0.5);
        assert_eq!(matcher.best_match(&emb(&[0.0, 0.0])).label, "Suman");
    }

    #[test]
    fn test_nearest_set_wins() {
        let matcher = FaceMatcher::new(
            vec![
                reference_at("far", 0.5),
                reference_at("near", 0.1),
                reference_at("mid", 0.3),
            ],
            DEFAULT_MATCH_THRESHOLD,
        );
        assert_eq!(matcher.best_match(&emb(&[0.0, 0.0])).label, "near");
    }

    #[test]
    fn test_empty_references_always_unknown() {
        let matcher = FaceMatcher::new(vec![], DEFAULT_MATCH_THRESHOLD);
        let m = matcher.best_match(&emb(&[0.0, 0.0]));
        assert!(m.is_unknown());
        assert!(m.distance.is_infinite());
        assert_eq!(m.to_string(), "unknown");
    }

    #[test]
    fn test_match_display_rounds_distance() {
        let m = FaceMatch {
            label: "Suman".into(),
            distance: 0.30417,
        };
        assert_eq!(m.to_string(), "Suman (0.30)");
        assert_eq!(FaceMatch::unknown(0.8).to_string(), "unknown (0.80)");
    }

    #[test]
    fn test_bbox_scaled() {
        let b = BoundingBox {
            x: 10.0,
            y: 20.0,
            width: 30.0,
            height: 40.0,
            confidence: 0.9,
            landmarks: Some([(10.0, 20.0); 5]),
        };
        let s = b.scaled(2.0, 0.5);
        assert_eq!((s.x, s.y, s.width, s.height), (20.0, 10.0, 60.0, 20.0));
        assert_eq!(s.landmarks.unwrap()[0], (20.0, 10.0));
        assert_eq!(s.confidence, 0.9);
    }
}
