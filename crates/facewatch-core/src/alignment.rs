//! Face alignment to the canonical ArcFace crop.
//!
//! The five detected keypoints are fitted to the InsightFace reference
//! layout with a closed-form least-squares similarity transform (scale,
//! rotation, translation), then the frame is resampled into a 112×112 crop.

/// ArcFace reference keypoints for a 112×112 crop.
pub(crate) const REFERENCE_KEYPOINTS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub(crate) const ALIGNED_SIZE: usize = 112;

/// Similarity transform `dst = [a -b; b a] * src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` points onto `dst` points.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Similarity {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (mpx, mpy) = mean(src);
        let (mqx, mqy) = mean(dst);

        let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
        for (&(px, py), &(qx, qy)) in src.iter().zip(dst.iter()) {
            let (px, py) = (px - mpx, py - mpy);
            let (qx, qy) = (qx - mqx, qy - mqy);
            dot += px * qx + py * qy;
            cross += px * qy - py * qx;
            norm += px * px + py * py;
        }

        if norm <= f32::EPSILON {
            // Degenerate keypoints: translate only.
            return Similarity {
                a: 1.0,
                b: 0.0,
                tx: mqx - mpx,
                ty: mqy - mpy,
            };
        }

        let a = dot / norm;
        let b = cross / norm;
        Similarity {
            a,
            b,
            tx: mqx - (a * mpx - b * mpy),
            ty: mqy - (b * mpx + a * mpy),
        }
    }

    /// Map a destination point back into source coordinates.
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Bilinear sample of a grayscale frame; outside pixels read as black.
fn sample(frame: &[u8], width: usize, height: usize, x: f32, y: f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let (fx, fy) = (x - x0, y - y0);
    let at = |xi: f32, yi: f32| -> f32 {
        if xi < 0.0 || yi < 0.0 || xi >= width as f32 || yi >= height as f32 {
            return 0.0;
        }
        frame
            .get(yi as usize * width + xi as usize)
            .map_or(0.0, |&p| p as f32)
    };
    at(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + at(x0 + 1.0, y0) * fx * (1.0 - fy)
        + at(x0, y0 + 1.0) * (1.0 - fx) * fy
        + at(x0 + 1.0, y0 + 1.0) * fx * fy
}

/// Align a detected face into a 112×112 grayscale crop.
pub fn align_face(frame: &[u8], width: u32, height: u32, keypoints: &[(f32, f32); 5]) -> Vec<u8> {
    let transform = Similarity::fit(keypoints, &REFERENCE_KEYPOINTS);
    let (w, h) = (width as usize, height as usize);

    let mut out = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];
    for (i, px) in out.iter_mut().enumerate() {
        let (ox, oy) = ((i % ALIGNED_SIZE) as f32, (i / ALIGNED_SIZE) as f32);
        if let Some((sx, sy)) = transform.invert_point(ox, oy) {
            *px = sample(frame, w, h, sx, sy).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_identity() {
        let t = Similarity::fit(&REFERENCE_KEYPOINTS, &REFERENCE_KEYPOINTS);
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-3 && t.ty.abs() < 1e-3);
    }

    #[test]
    fn test_fit_recovers_scale_and_shift() {
        // Keypoints at twice the reference size, shifted by (10, 20).
        let src = REFERENCE_KEYPOINTS.map(|(x, y)| (x * 2.0 + 10.0, y * 2.0 + 20.0));
        let t = Similarity::fit(&src, &REFERENCE_KEYPOINTS);
        assert!((t.a - 0.5).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4);
        let (x, y) = t.invert_point(REFERENCE_KEYPOINTS[2].0, REFERENCE_KEYPOINTS[2].1).unwrap();
        assert!((x - src[2].0).abs() < 1e-2 && (y - src[2].1).abs() < 1e-2);
    }

    #[test]
    fn test_fit_degenerate_points() {
        let src = [(5.0, 5.0); 5];
        let t = Similarity::fit(&src, &REFERENCE_KEYPOINTS);
        assert_eq!((t.a, t.b), (1.0, 0.0));
    }

    #[test]
    fn test_align_output_size_and_content() {
        let frame = vec![200u8; 640 * 480];
        // Keypoints in the middle of the frame so the crop stays inside it.
        let kps = REFERENCE_KEYPOINTS.map(|(x, y)| (x + 200.0, y + 150.0));
        let crop = align_face(&frame, 640, 480, &kps);
        assert_eq!(crop.len(), ALIGNED_SIZE * ALIGNED_SIZE);
        assert_eq!(crop[ALIGNED_SIZE * 56 + 56], 200);
    }

    #[test]
    fn test_align_moves_marked_eye_to_reference() {
        let (w, h) = (200usize, 200usize);
        let mut frame = vec![0u8; w * h];
        let kps: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for y in 58..63 {
            for x in 78..83 {
                frame[y * w + x] = 255;
            }
        }

        let crop = align_face(&frame, w as u32, h as u32, &kps);
        let (rx, ry) = (
            REFERENCE_KEYPOINTS[0].0.round() as usize,
            REFERENCE_KEYPOINTS[0].1.round() as usize,
        );
        let peak = (ry - 1..=ry + 1)
            .flat_map(|y| (rx - 1..=rx + 1).map(move |x| (x, y)))
            .map(|(x, y)| crop[y * ALIGNED_SIZE + x])
            .max()
            .unwrap_or(0);
        assert!(peak > 100, "left eye should land near ({rx}, {ry}), peak={peak}");
    }
}
