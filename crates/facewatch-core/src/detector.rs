//! SCRFD face detector via ONNX Runtime.
//!
//! One decoder serves two profiles: a small input for live frames and a
//! large input for reference stills. Both decode the three-stride
//! anchor-free heads (scores, box distances, five keypoints) and finish with
//! non-maximum suppression.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_KEYPOINTS: usize = 5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer too short for {width}x{height}: got {actual} bytes")]
    InvalidFrame { width: u32, height: u32, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Input size and thresholds for one detector role.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorProfile {
    /// Square network input side; must be a multiple of 32.
    pub input_size: usize,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl DetectorProfile {
    /// Live frames: small input, approximate boxes.
    pub const FAST: DetectorProfile = DetectorProfile {
        input_size: 320,
        score_threshold: 0.5,
        nms_threshold: 0.4,
    };

    /// Reference stills: full-size input.
    pub const ACCURATE: DetectorProfile = DetectorProfile {
        input_size: 640,
        score_threshold: 0.5,
        nms_threshold: 0.4,
    };
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    profile: DetectorProfile,
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load an SCRFD ONNX model and bind it to `profile`.
    pub fn load(model_path: &str, profile: DetectorProfile) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs 9 outputs (score/bbox/kps per stride), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::info!(
            path = model_path,
            input_size = profile.input_size,
            ?stride_indices,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            profile,
            stride_indices,
        })
    }

    pub fn profile(&self) -> DetectorProfile {
        self.profile
    }

    /// Detect faces in a grayscale frame, highest confidence first.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, scale) = letterbox(frame, width, height, self.profile.input_size)?;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[slot];
            let tensor = |idx: usize, what: &'static str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let heads = StrideHeads {
                scores: tensor(score_idx, "scores")?,
                bboxes: tensor(bbox_idx, "bboxes")?,
                kps: tensor(kps_idx, "kps")?,
            };
            candidates.extend(decode_stride(
                &heads,
                stride,
                self.profile.input_size,
                scale,
                self.profile.score_threshold,
            ));
        }

        Ok(nms(candidates, self.profile.nms_threshold))
    }
}

/// Resize a grayscale frame into the top-left corner of a square network
/// input, keeping aspect ratio, and normalise it to NCHW.
///
/// Returns the tensor and the resize factor needed to map detections back.
fn letterbox(
    frame: &[u8],
    width: u32,
    height: u32,
    input_size: usize,
) -> Result<(Array4<f32>, f32), DetectorError> {
    let pixels = width as usize * height as usize;
    let invalid = || DetectorError::InvalidFrame {
        width,
        height,
        actual: frame.len(),
    };
    if pixels == 0 || frame.len() < pixels {
        return Err(invalid());
    }
    let gray = GrayImage::from_raw(width, height, frame[..pixels].to_vec()).ok_or_else(invalid)?;

    let scale = (input_size as f32 / width as f32).min(input_size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, input_size as u32);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, input_size as u32);
    let resized = imageops::resize(&gray, new_w, new_h, FilterType::Triangle);

    // Padding stays at 0.0, i.e. the mean intensity after normalisation.
    let mut tensor = Array4::<f32>::zeros((1, 3, input_size, input_size));
    for (x, y, px) in resized.enumerate_pixels() {
        let v = (px.0[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = v;
        }
    }

    Ok((tensor, scale))
}

/// Map output tensors to stride slots.
///
/// Exports either name them ("score_8", "bbox_16", "kps_32", ...) or use
/// opaque numeric names, in which case the standard ordering applies:
/// scores 8/16/32, then boxes 8/16/32, then keypoints 8/16/32.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => {
            tracing::debug!(?names, "SCRFD output names not recognised, using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Raw head outputs for one stride level.
struct StrideHeads<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// Decode the anchors of one stride level into frame-space boxes.
fn decode_stride(
    heads: &StrideHeads<'_>,
    stride: usize,
    input_size: usize,
    scale: f32,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = input_size / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;
    let to_frame = |v: f32| v / scale;

    (0..anchors)
        .filter_map(|idx| {
            let score = *heads.scores.get(idx)?;
            if score <= threshold {
                return None;
            }
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * step;
            let ay = (cell / grid) as f32 * step;

            let d = heads.bboxes.get(idx * 4..idx * 4 + 4)?;
            let x1 = to_frame(ax - d[0] * step);
            let y1 = to_frame(ay - d[1] * step);
            let x2 = to_frame(ax + d[2] * step);
            let y2 = to_frame(ay + d[3] * step);

            let landmarks = heads
                .kps
                .get(idx * 2 * SCRFD_KEYPOINTS..(idx + 1) * 2 * SCRFD_KEYPOINTS)
                .map(|k| {
                    std::array::from_fn(|i| {
                        (
                            to_frame(ax + k[i * 2] * step),
                            to_frame(ay + k[i * 2 + 1] * step),
                        )
                    })
                });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(candidates.len());
    for cand in candidates {
        if kept.iter().all(|k| iou(k, &cand) <= iou_threshold) {
            kept.push(cand);
        }
    }
    kept
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let iw = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let ih = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = iw * ih;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn test_iou() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert!(iou(&a, &bbox(20.0, 20.0, 10.0, 10.0, 1.0)).abs() < 1e-6);
        // 5x10 overlap over a 150 union.
        let half = iou(&a, &bbox(5.0, 0.0, 10.0, 10.0, 1.0));
        assert!((half - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_cluster() {
        let out = nms(
            vec![
                bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                bbox(200.0, 200.0, 50.0, 50.0, 0.7),
                bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            0.4,
        );
        let confs: Vec<f32> = out.iter().map(|b| b.confidence).collect();
        assert_eq!(confs, vec![0.9, 0.7]);
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_discover_output_indices() {
        let shuffled: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(
            discover_output_indices(&shuffled),
            [(2, 0, 1), (5, 3, 4), (8, 6, 7)]
        );

        let numeric: Vec<String> = (0..9).map(|i: usize| (i + 420).to_string()).collect();
        assert_eq!(
            discover_output_indices(&numeric),
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        );
    }

    #[test]
    fn test_letterbox_scale_and_padding() {
        let frame = vec![255u8; 640 * 360];
        let (tensor, scale) = letterbox(&frame, 640, 360, 320).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 320, 320]);
        assert!((scale - 0.5).abs() < 1e-6);
        // Image occupies rows 0..180, the rest is padding at 0.0.
        let bright = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 1, 10, 10]] - bright).abs() < 1e-3);
        assert_eq!(tensor[[0, 1, 300, 10]], 0.0);
    }

    #[test]
    fn test_letterbox_rejects_short_frame() {
        let err = letterbox(&[0u8; 10], 640, 480, 320).unwrap_err();
        assert!(matches!(err, DetectorError::InvalidFrame { actual: 10, .. }));
    }

    #[test]
    fn test_decode_stride_maps_back_to_frame() {
        // 32x32 input at stride 32 → a single cell with two anchors.
        let heads = StrideHeads {
            scores: &[0.9, 0.1],
            bboxes: &[0.5, 0.5, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            kps: &[0.0; 20],
        };
        let dets = decode_stride(&heads, 32, 32, 0.5, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        // Anchor at (0,0): x1 = -16, x2 = 32 in input space, doubled in frame space.
        assert!((d.x + 32.0).abs() < 1e-4);
        assert!((d.width - 96.0).abs() < 1e-4);
        assert_eq!(d.landmarks.unwrap()[0], (0.0, 0.0));
    }
}
