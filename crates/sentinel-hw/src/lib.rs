//! sentinel-hw — Hardware abstraction for the monitoring pipeline.
//!
//! Provides V4L2-based camera access plus the frame-consuming artifact
//! writers: session video recording and snapshot capture.

pub mod camera;
pub mod frame;
pub mod recorder;
pub mod snapshot;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, PixelFormat};
pub use frame::Frame;
pub use recorder::{RecorderError, VideoRecorder};
pub use snapshot::{write_snapshot, SnapshotError};
