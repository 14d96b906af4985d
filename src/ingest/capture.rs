//! Threaded frame source.
//!
//! `FrameSource` owns one capture thread per camera. The thread repeatedly drops any backlog,
//! decodes the newest buffer, resizes it to the configured target, and overwrites a
//! single-slot `LatestFrame`. The tick loop copies the slot out with `get_frame()`.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::normalize::resize_to;
use super::{open_device, CaptureDevice, SourceSettings};
use crate::frame::{Frame, LatestFrame};

/// Consecutive grab/decode failures after which the capture loop gives up.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 30;

/// How long `stop()` waits for the capture thread before detaching it.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

const RETRY_DELAY: Duration = Duration::from_millis(20);

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct CaptureStats {
    pub name: String,
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub running: bool,
}

pub struct FrameSource {
    name: String,
    settings: SourceSettings,
    latest: LatestFrame,
    running: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    frames_captured: Arc<AtomicU64>,
    frames_dropped: Arc<AtomicU64>,
    join: Option<JoinHandle<()>>,
    exited: Option<Receiver<()>>,
}

impl FrameSource {
    pub fn new(name: impl Into<String>, settings: SourceSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            latest: LatestFrame::new(),
            running: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            frames_captured: Arc::new(AtomicU64::new(0)),
            frames_dropped: Arc::new(AtomicU64::new(0)),
            join: None,
            exited: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open the device and spawn the capture thread.
    ///
    /// On failure the source stays "not running" and the error is returned to the caller.
    pub fn start(&mut self) -> Result<()> {
        if self.join.is_some() {
            return Err(anyhow!("frame source {} already started", self.name));
        }
        let device = match open_device(&self.settings).and_then(|mut device| {
            device.connect()?;
            Ok(device)
        }) {
            Ok(device) => device,
            Err(err) => {
                log::error!("{}: failed to open {}: {:#}", self.name, self.settings.url, err);
                return Err(err.context(format!("open camera {}", self.name)));
            }
        };
        log::info!("{}: capturing from {}", self.name, device.describe());

        self.stop.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let (exited_tx, exited_rx) = mpsc::channel();
        let worker = CaptureWorker {
            name: self.name.clone(),
            device,
            target: (self.settings.width, self.settings.height),
            latest: self.latest.clone(),
            stop: self.stop.clone(),
            frames_captured: self.frames_captured.clone(),
            frames_dropped: self.frames_dropped.clone(),
        };
        let guard = ExitGuard {
            running: self.running.clone(),
            exited: exited_tx,
        };
        let join = std::thread::Builder::new()
            .name(format!("capture-{}", self.name))
            .spawn(move || {
                let _guard = guard;
                worker.run();
            })
            .map_err(|err| {
                self.running.store(false, Ordering::SeqCst);
                anyhow!("spawn capture thread for {}: {}", self.name, err)
            })?;

        self.join = Some(join);
        self.exited = Some(exited_rx);
        Ok(())
    }

    /// Copy of the most recently decoded frame. Never blocks beyond the copy.
    pub fn get_frame(&self) -> Option<Frame> {
        self.latest.snapshot()
    }

    /// True while the capture thread is alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal the capture thread, join it with a bounded timeout, and release the device.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let Some(join) = self.join.take() else {
            return;
        };
        let exited = self
            .exited
            .take()
            .map(|rx| rx.recv_timeout(JOIN_TIMEOUT));
        match exited {
            Some(Ok(())) | Some(Err(RecvTimeoutError::Disconnected)) | None => {
                if join.join().is_err() {
                    log::error!("{}: capture thread panicked", self.name);
                }
                log::info!("{}: capture stopped", self.name);
            }
            Some(Err(RecvTimeoutError::Timeout)) => {
                log::warn!(
                    "{}: capture thread did not exit within {:?}; detaching",
                    self.name,
                    JOIN_TIMEOUT
                );
            }
        }
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            name: self.name.clone(),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            running: self.is_running(),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Capture thread
// ----------------------------------------------------------------------------

struct CaptureWorker {
    name: String,
    device: Box<dyn CaptureDevice>,
    target: (u32, u32),
    latest: LatestFrame,
    stop: Arc<AtomicBool>,
    frames_captured: Arc<AtomicU64>,
    frames_dropped: Arc<AtomicU64>,
}

impl CaptureWorker {
    fn run(mut self) {
        let mut failures = 0u32;
        while !self.stop.load(Ordering::SeqCst) {
            match self.capture_latest() {
                Ok(frame) => {
                    failures = 0;
                    self.latest.store(frame);
                    self.frames_captured.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    failures += 1;
                    log::warn!(
                        "{}: capture failed ({}/{}): {:#}",
                        self.name,
                        failures,
                        MAX_CONSECUTIVE_FAILURES,
                        err
                    );
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        log::error!("{}: too many capture failures, stopping", self.name);
                        break;
                    }
                    std::thread::sleep(RETRY_DELAY);
                }
            }
        }
    }

    fn capture_latest(&mut self) -> Result<Frame> {
        self.device.grab()?;
        while self.device.has_backlog() {
            self.device.grab()?;
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
        let frame = self.device.retrieve()?;
        resize_to(frame, self.target.0, self.target.1)
    }
}

/// Marks the source as stopped and signals `stop()` however the thread exits.
struct ExitGuard {
    running: Arc<AtomicBool>,
    exited: Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.exited.send(());
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn stub_settings(url: &str) -> SourceSettings {
        SourceSettings {
            url: url.to_string(),
            width: 64,
            height: 48,
            target_fps: 30,
        }
    }

    fn wait_for_frame(source: &FrameSource) -> Option<Frame> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Some(frame) = source.get_frame() {
                return Some(frame);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn source_serves_frames_at_target_resolution() -> Result<()> {
        let mut source = FrameSource::new("FRONT", stub_settings("stub://front"));
        assert!(source.get_frame().is_none());
        source.start()?;
        assert!(source.is_running());

        let frame = wait_for_frame(&source).expect("frame");
        assert_eq!((frame.width, frame.height), (64, 48));

        source.stop();
        assert!(!source.is_running());
        Ok(())
    }

    #[test]
    fn open_failure_leaves_source_not_running() {
        let mut source = FrameSource::new("SIDE", stub_settings("ftp://nowhere"));
        assert!(source.start().is_err());
        assert!(!source.is_running());
        assert!(source.get_frame().is_none());
    }

    #[test]
    fn returned_frames_are_copies() -> Result<()> {
        let mut source = FrameSource::new("FRONT", stub_settings("stub://front"));
        source.start()?;

        let mut frame = wait_for_frame(&source).expect("frame");
        frame.pixels_mut().fill(0);
        let again = source.get_frame().expect("frame");
        assert!(again.pixels().iter().any(|&p| p != 0));

        source.stop();
        Ok(())
    }

    #[test]
    fn loop_exits_after_repeated_failures() -> Result<()> {
        let mut source = FrameSource::new("SIDE", stub_settings("stub://side?frames=3"));
        source.start()?;

        let deadline = Instant::now() + Duration::from_secs(5);
        while source.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!source.is_running());
        assert_eq!(source.stats().frames_captured, 3);
        // The last decoded frame stays available.
        assert!(source.get_frame().is_some());
        Ok(())
    }
}
