//! Synthetic capture device (`stub://`).
//!
//! Produces a moving gradient at the configured resolution. A `frames=N` query parameter
//! (e.g. `stub://side?frames=20`) makes the stream end after N frames, which is how tests
//! exercise the capture loop's failure path.

use anyhow::{anyhow, Result};

use super::{CaptureDevice, SourceSettings};
use crate::frame::{Frame, RGB_CHANNELS};

pub struct SyntheticDevice {
    settings: SourceSettings,
    frame_limit: Option<u64>,
    frame_count: u64,
    connected: bool,
    /// Simulated scene state, advanced every 50 frames.
    scene_state: u8,
}

impl SyntheticDevice {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        let frame_limit = parse_frame_limit(&settings.url)?;
        Ok(Self {
            settings,
            frame_limit,
            frame_count: 0,
            connected: false,
            scene_state: 0,
        })
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let width = self.settings.width as usize;
        let height = self.settings.height as usize;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; width * height * RGB_CHANNELS];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            // Mid-grey base keeps the synthetic scene inside the brightness window.
            let wave = (i as u64 / RGB_CHANNELS as u64 + self.frame_count) % 64;
            *pixel = 96u8
                .wrapping_add(wave as u8)
                .wrapping_add(self.scene_state % 16);
        }
        pixels
    }
}

impl CaptureDevice for SyntheticDevice {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "SyntheticDevice: connected to {} (synthetic)",
            self.settings.url
        );
        Ok(())
    }

    fn grab(&mut self) -> Result<()> {
        if !self.connected {
            return Err(anyhow!("synthetic device not connected; call connect() first"));
        }
        if let Some(limit) = self.frame_limit {
            if self.frame_count >= limit {
                return Err(anyhow!("synthetic stream ended after {} frames", limit));
            }
        }
        self.frame_count += 1;
        Ok(())
    }

    fn retrieve(&mut self) -> Result<Frame> {
        if self.frame_count == 0 {
            return Err(anyhow!("no grabbed frame to decode"));
        }
        let pixels = self.generate_pixels();
        Frame::from_rgb(pixels, self.settings.width, self.settings.height)
    }

    fn describe(&self) -> String {
        format!("{} (synthetic)", self.settings.url)
    }
}

fn parse_frame_limit(url: &str) -> Result<Option<u64>> {
    let Some((_, query)) = url.split_once('?') else {
        return Ok(None);
    };
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("frames=") {
            let limit = value
                .parse::<u64>()
                .map_err(|_| anyhow!("invalid frames limit in '{}'", url))?;
            return Ok(Some(limit));
        }
    }
    Ok(None)
}
