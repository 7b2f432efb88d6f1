//! Display surface and the transparent overlay drawn over it.
//!
//! Detections arrive in capture coordinates and are rescaled to the display
//! size before drawing. Labels use a built-in 5×7 bitmap font.

use facewatch_core::BoundingBox;
use image::imageops::{self, FilterType};
use image::{GrayImage, Rgba, RgbaImage};

const BOX_COLOR: Rgba<u8> = Rgba([0, 0, 255, 255]);
const LABEL_TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);
const BOX_THICKNESS: i32 = 2;
const GLYPH_W: i32 = 5;
const GLYPH_H: i32 = 7;
const GLYPH_ADVANCE: i32 = GLYPH_W + 1;
const LABEL_PAD: i32 = 2;

/// Rendered size of the video and its overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySurface {
    pub width: u32,
    pub height: u32,
}

impl DisplaySurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Per-axis factors mapping capture coordinates onto this surface.
    pub fn scale_from(&self, capture: (u32, u32)) -> (f32, f32) {
        let (cw, ch) = capture;
        let ratio = |display: u32, native: u32| {
            if native == 0 {
                1.0
            } else {
                display as f32 / native as f32
            }
        };
        (ratio(self.width, cw), ratio(self.height, ch))
    }
}

/// A box drawn during the last redraw, in display coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawnBox {
    pub label: String,
    pub bbox: BoundingBox,
}

/// Transparent RGBA layer the size of the display surface.
pub struct Overlay {
    canvas: RgbaImage,
    drawn: Vec<DrawnBox>,
}

impl Overlay {
    pub fn new(surface: DisplaySurface) -> Self {
        Self {
            canvas: RgbaImage::from_pixel(surface.width, surface.height, CLEAR),
            drawn: Vec::new(),
        }
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    pub fn drawn(&self) -> &[DrawnBox] {
        &self.drawn
    }

    pub fn clear(&mut self) {
        self.canvas.pixels_mut().for_each(|px| *px = CLEAR);
        self.drawn.clear();
    }

    /// Draw one labelled box; `bbox` must already be in display coordinates.
    pub fn draw(&mut self, bbox: &BoundingBox, label: &str) {
        let left = bbox.x.round() as i32;
        let top = bbox.y.round() as i32;
        let right = (bbox.x + bbox.width).round() as i32;
        let bottom = (bbox.y + bbox.height).round() as i32;

        for t in 0..BOX_THICKNESS {
            stroke_rect(&mut self.canvas, left + t, top + t, right - t, bottom - t, BOX_COLOR);
        }

        // Label sits on a filled tab under the box's bottom-left corner.
        let text_w = label.chars().count() as i32 * GLYPH_ADVANCE;
        let tab_top = bottom + 1;
        fill_rect(
            &mut self.canvas,
            left,
            tab_top,
            left + text_w + LABEL_PAD * 2,
            tab_top + GLYPH_H + LABEL_PAD * 2,
            BOX_COLOR,
        );
        draw_text(
            &mut self.canvas,
            left + LABEL_PAD,
            tab_top + LABEL_PAD,
            label,
            LABEL_TEXT_COLOR,
        );

        self.drawn.push(DrawnBox {
            label: label.to_string(),
            bbox: bbox.clone(),
        });
    }

    /// The frame scaled to the display size with the overlay blended on top.
    pub fn composite(&self, gray: &[u8], width: u32, height: u32) -> Option<RgbaImage> {
        let pixels = width as usize * height as usize;
        let frame = GrayImage::from_raw(width, height, gray.get(..pixels)?.to_vec())?;
        let (dw, dh) = self.canvas().dimensions();
        let scaled = imageops::resize(&frame, dw, dh, FilterType::Triangle);

        let mut out = RgbaImage::from_fn(dw, dh, |x, y| {
            let v = scaled.get_pixel(x, y).0[0];
            Rgba([v, v, v, 255])
        });
        imageops::overlay(&mut out, &self.canvas, 0, 0);
        Some(out)
    }
}

fn put(img: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn stroke_rect(img: &mut RgbaImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgba<u8>) {
    if left > right || top > bottom {
        return;
    }
    for x in left..=right {
        put(img, x, top, color);
        put(img, x, bottom, color);
    }
    for y in top..=bottom {
        put(img, left, y, color);
        put(img, right, y, color);
    }
}

fn fill_rect(img: &mut RgbaImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgba<u8>) {
    let w = img.width() as i32;
    let h = img.height() as i32;
    for y in top.max(0)..bottom.min(h) {
        for x in left.max(0)..right.min(w) {
            img.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_text(img: &mut RgbaImage, x: i32, y: i32, text: &str, color: Rgba<u8>) {
    for (i, ch) in text.chars().flat_map(char::to_uppercase).enumerate() {
        let Some(rows) = glyph(ch) else {
            continue;
        };
        let gx = x + i as i32 * GLYPH_ADVANCE;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_W {
                if (bits >> (GLYPH_W - 1 - col)) & 1 == 1 {
                    put(img, gx + col, y + row as i32, color);
                }
            }
        }
    }
}

fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0x0e, 0x11, 0x11, 0x1f, 0x11, 0x11, 0x11],
        'B' => [0x1e, 0x11, 0x11, 0x1e, 0x11, 0x11, 0x1e],
        'C' => [0x0e, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0e],
        'D' => [0x1c, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1c],
        'E' => [0x1f, 0x10, 0x10, 0x1e, 0x10, 0x10, 0x1f],
        'F' => [0x1f, 0x10, 0x10, 0x1e, 0x10, 0x10, 0x10],
        'G' => [0x0e, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0f],
        'H' => [0x11, 0x11, 0x11, 0x1f, 0x11, 0x11, 0x11],
        'I' => [0x0e, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0e],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0c],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1f],
        'M' => [0x11, 0x1b, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0e, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0e],
        'P' => [0x1e, 0x11, 0x11, 0x1e, 0x10, 0x10, 0x10],
        'Q' => [0x0e, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0d],
        'R' => [0x1e, 0x11, 0x11, 0x1e, 0x14, 0x12, 0x11],
        'S' => [0x0f, 0x10, 0x10, 0x0e, 0x01, 0x01, 0x1e],
        'T' => [0x1f, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0e],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0a, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0a],
        'X' => [0x11, 0x11, 0x0a, 0x04, 0x0a, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0a, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1f, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1f],
        '0' => [0x0e, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0e],
        '1' => [0x04, 0x0c, 0x04, 0x04, 0x04, 0x04, 0x0e],
        '2' => [0x0e, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1f],
        '3' => [0x1e, 0x01, 0x01, 0x0e, 0x01, 0x01, 0x1e],
        '4' => [0x02, 0x06, 0x0a, 0x12, 0x1f, 0x02, 0x02],
        '5' => [0x1f, 0x10, 0x1e, 0x01, 0x01, 0x11, 0x0e],
        '6' => [0x06, 0x08, 0x10, 0x1e, 0x11, 0x11, 0x0e],
        '7' => [0x1f, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0e, 0x11, 0x11, 0x0e, 0x11, 0x11, 0x0e],
        '9' => [0x0e, 0x11, 0x11, 0x0f, 0x01, 0x02, 0x0c],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0c, 0x0c],
        '-' => [0x00, 0x00, 0x00, 0x1f, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1f],
        ' ' => [0x00; 7],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            landmarks: None,
        }
    }

    #[test]
    fn test_scale_from_capture() {
        let surface = DisplaySurface::new(640, 480);
        assert_eq!(surface.scale_from((640, 480)), (1.0, 1.0));
        assert_eq!(surface.scale_from((1280, 960)), (0.5, 0.5));
        let (sx, sy) = surface.scale_from((640, 360));
        assert_eq!(sx, 1.0);
        assert!((sy - 480.0 / 360.0).abs() < 1e-6);
        assert_eq!(surface.scale_from((0, 0)), (1.0, 1.0));
    }

    #[test]
    fn test_draw_box_outline_and_label() {
        let mut overlay = Overlay::new(DisplaySurface::new(64, 48));
        overlay.draw(&bbox(10.0, 5.0, 20.0, 20.0), "AB");

        let c = overlay.canvas();
        assert_eq!(*c.get_pixel(10, 5), BOX_COLOR);
        assert_eq!(*c.get_pixel(30, 25), BOX_COLOR);
        assert_eq!(*c.get_pixel(11, 6), BOX_COLOR);
        // Interior stays transparent.
        assert_eq!(c.get_pixel(20, 15).0[3], 0);
        // Label tab starts right below the box.
        assert_ne!(c.get_pixel(12, 27).0[3], 0);
        assert_eq!(overlay.drawn().len(), 1);
        assert_eq!(overlay.drawn()[0].label, "AB");
    }

    #[test]
    fn test_clear_resets_canvas() {
        let mut overlay = Overlay::new(DisplaySurface::new(32, 32));
        overlay.draw(&bbox(2.0, 2.0, 10.0, 10.0), "X");
        overlay.clear();
        assert!(overlay.canvas().pixels().all(|p| p.0[3] == 0));
        assert!(overlay.drawn().is_empty());
    }

    #[test]
    fn test_draw_clips_offscreen_box() {
        let mut overlay = Overlay::new(DisplaySurface::new(16, 16));
        overlay.draw(&bbox(-10.0, -10.0, 100.0, 100.0), "unknown (0.80)");
        assert_eq!(overlay.drawn().len(), 1);
    }

    #[test]
    fn test_glyph_coverage() {
        for ch in "SUMAN UNKNOWN (0.30)".chars() {
            assert!(glyph(ch).is_some(), "missing glyph for {ch:?}");
        }
        assert!(glyph('~').is_none());
    }

    #[test]
    fn test_composite_scales_frame_and_blends() {
        let mut overlay = Overlay::new(DisplaySurface::new(8, 8));
        overlay.draw(&bbox(0.0, 0.0, 3.0, 3.0), "");
        let out = overlay.composite(&[100u8; 16], 4, 4).unwrap();
        assert_eq!(out.dimensions(), (8, 8));
        assert_eq!(*out.get_pixel(0, 0), BOX_COLOR);
        assert_eq!(*out.get_pixel(6, 6), Rgba([100, 100, 100, 255]));
        assert!(overlay.composite(&[0u8; 3], 4, 4).is_none());
    }
}
