//! Decoded video frames.
//!
//! - `Frame`: owned RGB24 pixel buffer plus dimensions. Cloning copies the pixels, so a frame
//!   handed out by a `FrameSource` can never alias the capture thread's slot.
//! - `LatestFrame`: single-slot mailbox shared between one capture thread and one reader.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Bytes per pixel for RGB24.
pub const RGB_CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Decoded RGB24 frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic instant the frame was decoded.
    pub captured_at: Instant,
}

impl Frame {
    /// Wrap an RGB24 buffer. Fails when the buffer length does not match the dimensions.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = expected_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
        })
    }

    /// Uniform frame, mostly useful for tests and synthetic sources.
    pub fn filled(width: u32, height: u32, value: u8) -> Result<Self> {
        let len = expected_len(width, height)?;
        Self::from_rgb(vec![value; len], width, height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    /// Mean luma (BT.601) over the frame, sampling every 4th pixel.
    pub fn mean_luma(&self) -> f32 {
        let mut sum = 0.0f64;
        let mut count = 0u64;
        for px in self.data.chunks_exact(RGB_CHANNELS).step_by(4) {
            let y = 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64;
            sum += y;
            count += 1;
        }
        if count == 0 {
            return 0.0;
        }
        (sum / count as f64) as f32
    }

    /// Mirror the frame horizontally (front camera is shown as a mirror image).
    pub fn mirror(&mut self) {
        let row_bytes = self.width as usize * RGB_CHANNELS;
        if row_bytes == 0 {
            return;
        }
        for row in self.data.chunks_exact_mut(row_bytes) {
            let w = row.len() / RGB_CHANNELS;
            for i in 0..w / 2 {
                let j = w - 1 - i;
                for c in 0..RGB_CHANNELS {
                    row.swap(i * RGB_CHANNELS + c, j * RGB_CHANNELS + c);
                }
            }
        }
    }
}

fn expected_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// LatestFrame: single-slot mailbox
// ----------------------------------------------------------------------------

/// Latest-frame slot shared between a capture thread (writer) and the tick loop (reader).
///
/// The writer overwrites; the reader copies. Neither holds the lock beyond that.
#[derive(Clone, Debug, Default)]
pub struct LatestFrame {
    slot: Arc<Mutex<Option<Frame>>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the stored frame.
    pub fn store(&self, frame: Frame) {
        *self.lock() = Some(frame);
    }

    /// Copy of the stored frame, if any.
    pub fn snapshot(&self) -> Option<Frame> {
        self.lock().clone()
    }

    // A panicking writer must not take the reader down with it.
    fn lock(&self) -> MutexGuard<'_, Option<Frame>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
