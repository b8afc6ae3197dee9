//! Camera capture, latest-frame preview, and MJPEG/AVI recording behind a
//! single capture thread.

pub mod avi;
pub mod camera;
pub mod frame;
pub mod manager;

pub use avi::{muxer_available, MjpegAviWriter};
#[cfg(target_os = "linux")]
pub use camera::{V4lCamera, V4lCameraOpener};
pub use camera::{encode_jpeg, placeholder_jpeg, Camera, CameraOpener};
pub use frame::{Frame, FrameSlot};
pub use manager::{PreviewStream, RecordingReport, VideoSessionManager, VideoStatus};
