//! V4L2 capture device.
//!
//! Drives local USB webcams (`/dev/videoN`) through libv4l memory-mapped streaming. RGB3 is
//! requested; cameras that refuse it fall back to their native YUYV, NV12 or MJPG output,
//! which is converted to RGB24 at decode time.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CaptureDevice, SourceSettings};
use crate::frame::Frame;

/// Number of mmap buffers. Kept small so the driver queue cannot hold stale frames for long.
const STREAM_BUFFERS: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WireFormat {
    Raw(PixelFormat),
    Mjpeg,
}

pub struct V4l2Device {
    settings: SourceSettings,
    path: String,
    state: Option<V4l2State>,
    wire_format: WireFormat,
    active_width: u32,
    active_height: u32,
    held: Option<Vec<u8>>,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Device {
    pub fn new(settings: SourceSettings, path: String) -> Result<Self> {
        Ok(Self {
            active_width: settings.width,
            active_height: settings.height,
            settings,
            path,
            state: None,
            wire_format: WireFormat::Raw(PixelFormat::Rgb24),
            held: None,
        })
    }
}

impl CaptureDevice for V4l2Device {
    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.path)
            .with_context(|| format!("open v4l2 device {}", self.path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Device: failed to set format on {}: {}", self.path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.wire_format = match &format.fourcc.repr {
            b"RGB3" => WireFormat::Raw(PixelFormat::Rgb24),
            b"YUYV" => WireFormat::Raw(PixelFormat::Yuyv),
            b"NV12" => WireFormat::Raw(PixelFormat::Nv12),
            b"MJPG" => WireFormat::Mjpeg,
            other => {
                return Err(anyhow!(
                    "v4l2 device {} negotiated unsupported format {}",
                    self.path,
                    String::from_utf8_lossy(other)
                ))
            }
        };

        if self.settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Device: failed to set fps on {}: {}", self.path, err);
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Device: connected to {} ({}x{}, {:?})",
            self.path,
            self.active_width,
            self.active_height,
            self.wire_format
        );
        Ok(())
    }

    fn grab(&mut self) -> Result<()> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let bytes = state.with_stream_mut(|stream| {
            stream
                .next()
                .map(|(buf, meta)| buf[..(meta.bytesused as usize).min(buf.len())].to_vec())
        });
        let bytes = bytes.map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;
        self.held = Some(bytes);
        Ok(())
    }

    fn retrieve(&mut self) -> Result<Frame> {
        let bytes = self
            .held
            .take()
            .ok_or_else(|| anyhow!("no grabbed v4l2 buffer to decode"))?;
        match self.wire_format {
            WireFormat::Raw(format) => {
                let rgb = normalize_to_rgb(&bytes, self.active_width, self.active_height, format)?;
                Frame::from_rgb(rgb, self.active_width, self.active_height)
            }
            WireFormat::Mjpeg => {
                let rgb = image::load_from_memory(&bytes)
                    .context("decode v4l2 mjpeg frame")?
                    .into_rgb8();
                let (width, height) = rgb.dimensions();
                Frame::from_rgb(rgb.into_raw(), width, height)
            }
        }
    }

    fn describe(&self) -> String {
        format!("{} ({}x{})", self.path, self.active_width, self.active_height)
    }
}
