//! V4L2 camera capture via the `v4l` crate.
//!
//! The camera holds one memory-mapped capture stream for its whole
//! lifetime (a self-referencing struct, since the stream borrows the
//! device) and hands out exactly one frame at a time. Dropping the camera
//! stops streaming and releases the device node.

use crate::frame::{self, Frame};
use ouroboros::self_referencing;
use std::os::fd::RawFd;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::{CaptureStream, Stream};
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Buffers queued on the capture stream. One frame is in flight at a time;
/// the extra buffers only absorb driver-side jitter.
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("no frame within {0} ms")]
    Timeout(u64),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Anything the monitoring loop can pull frames from.
///
/// `read_frame` must return within a bounded interval; a source that
/// cannot produce a frame in time reports [`CameraError::Timeout`] rather
/// than blocking the pipeline indefinitely.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Frame, CameraError>;
    fn resolution(&self) -> (u32, u32);
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 24-bit RGB (3 bytes/pixel, passthrough).
    Rgb3,
    /// YUYV 4:2:2 packed (2 bytes/pixel, converted on read).
    Yuyv,
}

#[self_referencing]
struct CameraState {
    device: Device,
    #[borrows(mut device)]
    #[covariant]
    stream: MmapStream<'this>,
}

/// V4L2 camera device handle.
pub struct Camera {
    state: CameraState,
    fd: RawFd,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
    read_timeout: Duration,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    ///
    /// Requests 640x480 packed RGB; drivers that cannot provide RGB fall
    /// back to YUYV, which is converted per frame.
    pub fn open(device_path: &str, read_timeout: Duration) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;

        fmt.width = 640;
        fmt.height = 480;
        fmt.fourcc = FourCC::new(b"RGB3");

        let mut negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        if negotiated.fourcc != FourCC::new(b"RGB3") {
            fmt.fourcc = FourCC::new(b"YUYV");
            negotiated = device.set_format(&fmt).map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
            })?;
        }

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"RGB3") {
            PixelFormat::Rgb3
        } else if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need RGB3 or YUYV)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        let fd = device.handle().fd();

        let mut state = CameraStateTryBuilder {
            device,
            stream_builder: |device| {
                MmapStream::with_buffers(device, BufType::VideoCapture, STREAM_BUFFERS).map_err(
                    |e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")),
                )
            },
        }
        .try_build()?;

        state
            .with_stream_mut(|stream| stream.start())
            .map_err(|e| CameraError::CaptureFailed(format!("failed to start stream: {e}")))?;

        Ok(Self {
            state,
            fd,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
            read_timeout,
        })
    }

    /// Block until the device signals a ready buffer or the timeout lapses.
    fn wait_readable(&self) -> Result<(), CameraError> {
        let timeout_ms = self.read_timeout.as_millis().min(i32::MAX as u128) as i32;
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };

        // SAFETY: pfd points to a valid, initialized pollfd for this call.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        match rc {
            0 => Err(CameraError::Timeout(self.read_timeout.as_millis() as u64)),
            r if r < 0 => Err(CameraError::CaptureFailed(format!(
                "poll: {}",
                std::io::Error::last_os_error()
            ))),
            _ => Ok(()),
        }
    }

    fn buf_to_rgb(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        match self.pixel_format {
            PixelFormat::Rgb3 => {
                let expected = (self.width * self.height * 3) as usize;
                if buf.len() < expected {
                    return Err(CameraError::CaptureFailed(format!(
                        "RGB3 buffer too short: expected {expected}, got {}",
                        buf.len()
                    )));
                }
                Ok(buf[..expected].to_vec())
            }
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height)
                .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps
                .capabilities
                .contains(v4l::capability::Flags::VIDEO_CAPTURE)
            {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSource for Camera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        self.wait_readable()?;

        let (data, sequence) = self.state.with_stream_mut(|stream| {
            stream
                .next()
                .map(|(buf, meta)| (buf.to_vec(), meta.sequence))
                .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))
        })?;

        let rgb = self.buf_to_rgb(&data)?;

        Ok(Frame {
            data: rgb,
            width: self.width,
            height: self.height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
