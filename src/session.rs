//! Training session loop.
//!
//! One `CameraPipeline` per view turns the latest captured frame into smoothed landmarks.
//! `TrainingSession::run` ticks both pipelines, applies at most one command per tick, feeds
//! the form checks and the rep counter, forwards logged errors to storage and speech, and
//! publishes a `TickOutput` per tick.
//!
//! Output goes over a bounded channel. Running ticks are dropped when the consumer lags;
//! the final tick is always delivered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::command::{Command, CommandBus};
use crate::config::LungeGuardConfig;
use crate::environment::{EnvironmentMonitor, Notice, DEFAULT_CHECK_INTERVAL};
use crate::frame::Frame;
use crate::geometry::{self, FrontFeatures, SideFeatures};
use crate::ingest::{FrameSource, SourceSettings};
use crate::pose::{LandmarkSet, PoseEstimator, Side, View};
use crate::smoother::{LandmarkSmoother, DEFAULT_ALPHA};
use crate::speech::SpeechSink;
use crate::storage::{SessionId, SessionStore, UserId};
use crate::trainer::{
    Difficulty, ErrorCategory, ExerciseStateMachine, MonotonicClock, SessionClock,
    SessionReport, TrainerSettings, TrainerSnapshot,
};

pub const ANNOUNCE_START: &str = "Training started";
pub const ANNOUNCE_STOP: &str = "Paused";
pub const ANNOUNCE_RESET: &str = "Counter reset";
pub const ANNOUNCE_EXIT: &str = "Goodbye";

// ----------------------------------------------------------------------------
// Configuration and output
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub difficulty: Difficulty,
    pub audio_enabled: bool,
    pub voice_enabled: bool,
    pub front_source: SourceSettings,
    pub side_source: SourceSettings,
    pub active_side: Side,
    pub smoothing_alpha: f32,
    pub trainer: TrainerSettings,
    pub camera_timeout: Duration,
    pub tick_interval: Duration,
    pub environment_interval: u64,
}

impl SessionConfig {
    pub fn from_config(cfg: &LungeGuardConfig) -> Self {
        Self {
            difficulty: cfg.difficulty,
            audio_enabled: cfg.audio_enabled,
            voice_enabled: cfg.voice_enabled,
            front_source: cfg.front.clone(),
            side_source: cfg.side.clone(),
            active_side: cfg.active_side,
            smoothing_alpha: cfg.smoothing_alpha,
            trainer: cfg.trainer,
            camera_timeout: cfg.camera_timeout,
            tick_interval: cfg.tick_interval,
            environment_interval: cfg.environment_interval,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::default(),
            audio_enabled: true,
            voice_enabled: false,
            front_source: SourceSettings {
                url: "stub://front".to_string(),
                ..SourceSettings::default()
            },
            side_source: SourceSettings {
                url: "stub://side".to_string(),
                ..SourceSettings::default()
            },
            active_side: Side::Left,
            smoothing_alpha: DEFAULT_ALPHA,
            trainer: TrainerSettings::default(),
            camera_timeout: Duration::from_secs(5),
            tick_interval: Duration::from_millis(33),
            environment_interval: DEFAULT_CHECK_INTERVAL,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    SessionDone,
    CameraError,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "RUNNING",
            SessionStatus::SessionDone => "SESSION_DONE",
            SessionStatus::CameraError => "CAMERA_ERROR",
        }
    }
}

/// Everything a display needs for one tick.
#[derive(Clone, Debug)]
pub struct TickOutput {
    pub tick: u64,
    pub status: SessionStatus,
    /// Front frame, mirrored for display.
    pub front: Option<Frame>,
    pub side: Option<Frame>,
    pub active: bool,
    pub snapshot: TrainerSnapshot,
    pub front_features: Option<FrontFeatures>,
    pub side_features: Option<SideFeatures>,
    /// Errors logged on this tick.
    pub errors: Vec<ErrorCategory>,
    pub notices: Vec<Notice>,
    /// Present only on the `SessionDone` tick.
    pub report: Option<SessionReport>,
}

/// How a session ended.
#[derive(Clone, Debug)]
pub struct SessionOutcome {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub total_reps: u32,
    pub report: Option<SessionReport>,
}

// ----------------------------------------------------------------------------
// Camera pipeline
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraHealth {
    Healthy,
    /// Capture thread has exited.
    Stopped,
    /// No new frame within the camera timeout.
    Stalled,
}

/// Frame source, pose estimator and smoother for one camera.
pub struct CameraPipeline {
    view: View,
    source: FrameSource,
    estimator: Box<dyn PoseEstimator>,
    smoother: LandmarkSmoother,
    mirror: bool,
    last_captured_at: Option<Instant>,
    last_fresh: Instant,
}

/// One camera's contribution to a tick.
pub struct CameraTick {
    pub frame: Option<Frame>,
    pub landmarks: Option<LandmarkSet>,
}

impl CameraPipeline {
    pub fn new(
        view: View,
        source: FrameSource,
        estimator: Box<dyn PoseEstimator>,
        smoothing_alpha: f32,
    ) -> Self {
        Self {
            view,
            source,
            estimator,
            smoother: LandmarkSmoother::new(smoothing_alpha),
            mirror: view == View::Front,
            last_captured_at: None,
            last_fresh: Instant::now(),
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn start(&mut self) -> Result<()> {
        self.source
            .start()
            .with_context(|| format!("start {} camera", self.view.as_str()))?;
        if let Err(err) = self.estimator.warm_up() {
            log::warn!(
                "{}: {} estimator warm-up failed: {:#}",
                self.view.as_str(),
                self.estimator.name(),
                err
            );
        }
        self.last_fresh = Instant::now();
        Ok(())
    }

    pub fn stop(&mut self) {
        self.source.stop();
    }

    pub fn health(&self, now: Instant, timeout: Duration) -> CameraHealth {
        if !self.source.is_running() {
            CameraHealth::Stopped
        } else if now.saturating_duration_since(self.last_fresh) > timeout {
            CameraHealth::Stalled
        } else {
            CameraHealth::Healthy
        }
    }

    /// Copy out the latest frame and run estimation and smoothing on it.
    /// Latest frame plus smoothed landmarks. An estimator failure is logged and
    /// treated as no body in view; the frame is still returned for display.
    pub fn process(&mut self) -> CameraTick {
        let Some(mut frame) = self.source.get_frame() else {
            return CameraTick {
                frame: None,
                landmarks: None,
            };
        };
        if self.last_captured_at != Some(frame.captured_at) {
            self.last_captured_at = Some(frame.captured_at);
            self.last_fresh = Instant::now();
        }
        if self.mirror {
            frame.mirror();
        }
        let landmarks = match self.estimator.estimate(&frame) {
            Ok(raw) => self.smoother.smooth(raw),
            Err(err) => {
                log::warn!(
                    "{} pose estimation ({}) failed: {:#}",
                    self.view.as_str(),
                    self.estimator.name(),
                    err
                );
                self.smoother.reset();
                None
            }
        };
        CameraTick {
            frame: Some(frame),
            landmarks,
        }
    }
}

// ----------------------------------------------------------------------------
// Session loop
// ----------------------------------------------------------------------------

pub struct TrainingSession {
    config: SessionConfig,
    front: CameraPipeline,
    side: CameraPipeline,
    trainer: ExerciseStateMachine,
    commands: CommandBus,
    environment: EnvironmentMonitor,
    shutdown: Arc<AtomicBool>,
    active: bool,
    ticks: u64,
    last_front: Option<Frame>,
    last_side: Option<Frame>,
}

enum Step {
    Continue(TickOutput),
    Finish(SessionStatus),
}

impl TrainingSession {
    pub fn new(
        config: SessionConfig,
        front: CameraPipeline,
        side: CameraPipeline,
        commands: CommandBus,
    ) -> Self {
        Self::with_clock(config, front, side, commands, Box::new(MonotonicClock::start()))
    }

    pub fn with_clock(
        config: SessionConfig,
        front: CameraPipeline,
        side: CameraPipeline,
        commands: CommandBus,
        clock: Box<dyn SessionClock>,
    ) -> Self {
        let trainer = ExerciseStateMachine::new(config.difficulty.profile(), config.trainer, clock);
        let environment = EnvironmentMonitor::new(config.environment_interval);
        Self {
            config,
            front,
            side,
            trainer,
            commands,
            environment,
            shutdown: Arc::new(AtomicBool::new(false)),
            active: false,
            ticks: 0,
            last_front: None,
            last_side: None,
        }
    }

    /// Flag that ends the session at the next tick, as if EXIT had been received.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run until EXIT, shutdown, or a camera failure.
    ///
    /// Errors are returned only when the store cannot open a session; everything after that
    /// ends in an outcome and a final tick.
    pub fn run(
        mut self,
        store: &mut dyn SessionStore,
        user: UserId,
        speech: &mut dyn SpeechSink,
        output: &SyncSender<TickOutput>,
    ) -> Result<SessionOutcome> {
        let session_id = store.start_session(user)?;
        log::info!(
            "session {} started (user {}, difficulty {}, audio {}, voice {})",
            session_id,
            user,
            self.config.difficulty,
            self.config.audio_enabled,
            self.config.voice_enabled
        );

        let status = match self.start_cameras() {
            Ok(()) => self.tick_loop(store, session_id, speech, output),
            Err(err) => {
                log::error!("camera start failed: {:#}", err);
                SessionStatus::CameraError
            }
        };

        self.front.stop();
        self.side.stop();

        let report = match status {
            SessionStatus::SessionDone => Some(self.trainer.finalize()),
            _ => None,
        };
        let report_json = match report.as_ref().map(SessionReport::to_json).transpose() {
            Ok(json) => json,
            Err(err) => {
                log::error!("session {}: {:#}", session_id, err);
                None
            }
        };
        let total_reps = self.trainer.reps();
        if let Err(err) = store.end_session(session_id, total_reps, report_json.as_deref()) {
            log::error!("session {}: failed to close: {:#}", session_id, err);
        }
        log::info!(
            "session {} ended: {} ({} reps)",
            session_id,
            status.as_str(),
            total_reps
        );

        let last = TickOutput {
            tick: self.ticks,
            status,
            front: self.last_front.take(),
            side: self.last_side.take(),
            active: false,
            snapshot: self.trainer.snapshot(),
            front_features: None,
            side_features: None,
            errors: Vec::new(),
            notices: self.environment.notices(),
            report: report.clone(),
        };
        if output.send(last).is_err() {
            log::debug!("final tick dropped: consumer is gone");
        }

        Ok(SessionOutcome {
            session_id,
            status,
            total_reps,
            report,
        })
    }

    fn start_cameras(&mut self) -> Result<()> {
        self.front.start()?;
        self.side.start()?;
        Ok(())
    }

    fn tick_loop(
        &mut self,
        store: &mut dyn SessionStore,
        session_id: SessionId,
        speech: &mut dyn SpeechSink,
        output: &SyncSender<TickOutput>,
    ) -> SessionStatus {
        loop {
            let started = Instant::now();
            match self.tick(store, session_id, speech) {
                Ok(Step::Finish(status)) => return status,
                Ok(Step::Continue(out)) => match output.try_send(out) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        log::debug!("tick {} dropped: consumer is behind", self.ticks);
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        log::info!("tick consumer disconnected; ending session");
                        return SessionStatus::SessionDone;
                    }
                },
                Err(err) => log::error!("tick {} failed: {:#}", self.ticks, err),
            }
            let elapsed = started.elapsed();
            if elapsed < self.config.tick_interval {
                std::thread::sleep(self.config.tick_interval - elapsed);
            }
        }
    }

    fn tick(
        &mut self,
        store: &mut dyn SessionStore,
        session_id: SessionId,
        speech: &mut dyn SpeechSink,
    ) -> Result<Step> {
        self.ticks += 1;

        let now = Instant::now();
        for pipeline in [&self.front, &self.side] {
            match pipeline.health(now, self.config.camera_timeout) {
                CameraHealth::Healthy => {}
                health => {
                    log::error!("{} camera {:?}", pipeline.view().as_str(), health);
                    return Ok(Step::Finish(SessionStatus::CameraError));
                }
            }
        }

        let shutdown = self.shutdown.load(Ordering::SeqCst);
        let command = if shutdown {
            Some(Command::Exit)
        } else {
            self.commands.poll()
        };
        if let Some(command) = command {
            if self.apply(command, speech) {
                return Ok(Step::Finish(SessionStatus::SessionDone));
            }
        }

        let front = self.front.process();
        let side = self.side.process();
        if front.frame.is_some() {
            self.last_front = front.frame.clone();
        }
        if side.frame.is_some() {
            self.last_side = side.frame.clone();
        }

        let leg = self.config.active_side;
        let front_view = front
            .landmarks
            .as_ref()
            .and_then(|set| geometry::front_features(set, leg));
        let side_view = side
            .landmarks
            .as_ref()
            .and_then(|set| geometry::side_features(set, leg));

        let mut errors = Vec::new();
        if self.active {
            let mut triggered = Vec::new();
            if let Some(f) = &front_view {
                if self.trainer.check_valgus(f.knee_deviation) {
                    triggered.push(ErrorCategory::Valgus);
                }
            }
            if let Some(s) = &side_view {
                if self.trainer.check_torso(s.torso_lean) {
                    triggered.push(ErrorCategory::Torso);
                }
                if self.trainer.check_knee_forward(s.knee_angle, s.shin_angle) {
                    triggered.push(ErrorCategory::KneeForward);
                }
            }
            for category in triggered {
                if self.trainer.mark_error(category).is_logged() {
                    if let Err(err) = store.log_error(session_id, category) {
                        log::error!("session {}: failed to store {}: {:#}", session_id, category, err);
                    }
                    self.say(speech, category.cue(), false);
                    errors.push(category);
                }
            }

            if let Some(s) = &side_view {
                let update = self.trainer.update(s.knee_angle, s.foot_spread, s.hip_height);
                if update.rep_counted {
                    self.say(speech, &update.reps.to_string(), true);
                }
            }
        }

        let notices = self.environment.observe(
            front.frame.as_ref(),
            front.landmarks.as_ref(),
            side.frame.as_ref(),
            side.landmarks.as_ref(),
        );

        Ok(Step::Continue(TickOutput {
            tick: self.ticks,
            status: SessionStatus::Running,
            front: front.frame,
            side: side.frame,
            active: self.active,
            snapshot: self.trainer.snapshot(),
            front_features: front_view,
            side_features: side_view,
            errors,
            notices,
            report: None,
        }))
    }

    fn say(&self, speech: &mut dyn SpeechSink, text: &str, force: bool) {
        if self.config.audio_enabled {
            speech.speak(text, force);
        }
    }

    /// Apply a command. Returns true when the session should end.
    fn apply(&mut self, command: Command, speech: &mut dyn SpeechSink) -> bool {
        match command {
            Command::Start => {
                if !self.active {
                    self.active = true;
                    self.say(speech, ANNOUNCE_START, true);
                }
            }
            Command::Stop => {
                if self.active {
                    self.active = false;
                    self.say(speech, ANNOUNCE_STOP, true);
                }
            }
            Command::Reset => {
                self.trainer.reset();
                self.active = false;
                self.say(speech, ANNOUNCE_RESET, true);
            }
            Command::Exit => {
                self.say(speech, ANNOUNCE_EXIT, true);
                return true;
            }
        }
        false
    }
}
