//! facewatch-hw: Camera capture for the recognition loop.
//!
//! Opens V4L2 devices, negotiates a grayscale-convertible pixel format and
//! streams frames through the [`FrameSource`] trait.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, FrameSource, PixelFormat};
pub use frame::Frame;
