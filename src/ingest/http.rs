//! HTTP MJPEG/JPEG capture device.
//!
//! Phone "IP webcam" apps and ESP32-S3 boards serve either a multipart MJPEG stream or
//! single JPEG snapshots. Grabbing only slices JPEG bytes out of the stream; decoding is
//! deferred to `retrieve`, so frames that piled up in the socket buffer are skipped undecoded.

use anyhow::{anyhow, Context, Result};
use image::GenericImageView;
use std::io::Read;
use url::Url;

use super::{CaptureDevice, SourceSettings};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

pub struct HttpDevice {
    settings: SourceSettings,
    stream: Option<HttpStream>,
    held: Option<Vec<u8>>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl HttpDevice {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        let url = Url::parse(&settings.url).context("parse camera url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported http camera scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        Ok(Self {
            settings,
            stream: None,
            held: None,
        })
    }
}

impl CaptureDevice for HttpDevice {
    fn connect(&mut self) -> Result<()> {
        let response = ureq::get(&self.settings.url)
            .call()
            .context("connect to http camera stream")?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            let reader = response.into_reader();
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(reader)));
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
        }
        log::info!("HttpDevice: connected to {}", self.settings.url);
        Ok(())
    }

    fn grab(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("http camera not connected; call connect() first"))?;
        let jpeg = match stream {
            HttpStream::Mjpeg(stream) => stream.read_next_jpeg()?,
            HttpStream::SingleJpeg => fetch_single_jpeg(&self.settings.url)?,
        };
        self.held = Some(jpeg);
        Ok(())
    }

    fn has_backlog(&self) -> bool {
        match &self.stream {
            Some(HttpStream::Mjpeg(stream)) => stream.has_buffered_jpeg(),
            _ => false,
        }
    }

    fn retrieve(&mut self) -> Result<Frame> {
        let jpeg = self
            .held
            .take()
            .ok_or_else(|| anyhow!("no grabbed jpeg to decode"))?;
        let (pixels, width, height) = decode_jpeg(&jpeg)?;
        Frame::from_rgb(pixels, width, height)
    }

    fn describe(&self) -> String {
        self.settings.url.clone()
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn has_buffered_jpeg(&self) -> bool {
        find_jpeg_bounds(&self.buffer).is_some()
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    let (width, height) = image.dimensions();
    let rgb = image.into_rgb8();
    Ok((rgb.into_raw(), width, height))
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
