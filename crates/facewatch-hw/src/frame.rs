//! Grayscale frames and pixel-format conversion.

use std::time::Instant;

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_RATIO: f32 = 0.95;
const DARK_PIXEL_LEVEL: u8 = 32;

/// A captured grayscale camera frame.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Wrap a grayscale buffer, flagging it dark if needed.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&data, DARK_FRAME_RATIO);
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
            is_dark,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("{format} buffer too short: expected {expected} bytes, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
}

fn check_len(format: &'static str, buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Packed YUYV 4:2:2 → grayscale: keep the luma byte of every pixel pair half.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    check_len("YUYV", yuyv, pixels * 2)?;
    Ok(yuyv[..pixels * 2].chunks_exact(2).map(|px| px[0]).collect())
}

/// 16-bit little-endian grayscale → 8-bit by keeping the high byte.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    check_len("Y16", y16, pixels * 2)?;
    Ok(y16[..pixels * 2].chunks_exact(2).map(|px| px[1]).collect())
}

/// 8-bit grayscale passthrough, trimmed to the frame size.
pub fn grey_to_grayscale(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    check_len("GREY", grey, pixels)?;
    Ok(grey[..pixels].to_vec())
}

/// True if more than `threshold_pct` of pixels are near black. Empty frames are dark.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < DARK_PIXEL_LEVEL).count();
    (dark as f32 / gray.len() as f32) > threshold_pct
}
