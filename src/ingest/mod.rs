//! Frame ingestion.
//!
//! This module provides the capture devices a `FrameSource` can drive:
//! - Synthetic streams (`stub://`) for tests and dry runs
//! - RTSP streams from IP cameras (feature: rtsp-gstreamer)
//! - HTTP MJPEG/JPEG streams from phone or ESP32 cameras (feature: ingest-http)
//! - USB/V4L2 webcams (feature: ingest-v4l2)
//!
//! Devices split capture into `grab` (pull the next encoded buffer) and `retrieve`
//! (decode the held buffer). The capture loop grabs until no backlog remains and only
//! then decodes, so stale frames are never decoded.

pub mod capture;
#[cfg(feature = "ingest-http")]
pub mod http;
pub(crate) mod normalize;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

pub use capture::FrameSource;
pub use synthetic::SyntheticDevice;

/// Where a camera lives and what the capture loop should hand out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    /// `stub://name`, `rtsp://...`, `http://...`, `/dev/videoN`, or a bare device index.
    pub url: String,
    /// Target output width after resize.
    pub width: u32,
    /// Target output height after resize.
    pub height: u32,
    /// Requested device frame rate. Zero means "device default".
    pub target_fps: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

/// A video device driven by one capture thread.
pub trait CaptureDevice: Send {
    /// Open the underlying device or stream.
    fn connect(&mut self) -> Result<()>;

    /// Pull the next encoded buffer, replacing any buffer held from a previous grab.
    fn grab(&mut self) -> Result<()>;

    /// True when another complete buffer is already waiting (grabbing again will not block).
    fn has_backlog(&self) -> bool {
        false
    }

    /// Decode the most recently grabbed buffer into an RGB24 frame at device resolution.
    fn retrieve(&mut self) -> Result<Frame>;

    /// Human-readable device identifier for logs.
    fn describe(&self) -> String;
}

/// Pick a device backend from the source URL.
pub fn open_device(settings: &SourceSettings) -> Result<Box<dyn CaptureDevice>> {
    let url = settings.url.trim();
    if url.is_empty() {
        return Err(anyhow!("camera source url is empty"));
    }
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticDevice::new(settings.clone())?));
    }
    if url.starts_with("rtsp://") || url.starts_with("rtsps://") {
        #[cfg(feature = "rtsp-gstreamer")]
        {
            return Ok(Box::new(rtsp::RtspDevice::new(settings.clone())?));
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            return Err(anyhow!("RTSP sources require the rtsp-gstreamer feature"));
        }
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        #[cfg(feature = "ingest-http")]
        {
            return Ok(Box::new(http::HttpDevice::new(settings.clone())?));
        }
        #[cfg(not(feature = "ingest-http"))]
        {
            return Err(anyhow!("HTTP sources require the ingest-http feature"));
        }
    }
    if let Some(path) = local_device_path(url) {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(v4l2::V4l2Device::new(settings.clone(), path)?));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            return Err(anyhow!(
                "local camera {} requires the ingest-v4l2 feature",
                path
            ));
        }
    }
    Err(anyhow!("unsupported camera source '{}'", url))
}

/// Map a bare index ("0") or a device node ("/dev/video0") to a device path.
fn local_device_path(url: &str) -> Option<String> {
    if url.starts_with("/dev/") {
        return Some(url.to_string());
    }
    url.parse::<u32>().ok().map(|index| format!("/dev/video{}", index))
}
