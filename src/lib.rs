//! LungeGuard
//!
//! Dual-camera lunge coach: counts repetitions and calls out form errors in real time.
//!
//! # Pipeline
//!
//! Each tick the session loop:
//!
//! 1. copies the latest frame from the front and side cameras (`ingest`),
//! 2. runs pose estimation and exponential smoothing on each (`pose`, `smoother`),
//! 3. derives joint angles and alignment measures (`geometry`),
//! 4. applies at most one START/STOP/RESET/EXIT command (`command`, `voice`),
//! 5. runs the form checks and the repetition state machine (`trainer`),
//! 6. records logged errors (`storage`) and speaks cues (`speech`),
//! 7. publishes a `TickOutput` with frames, trainer state and setup notices (`environment`).
//!
//! When the session finishes, the trainer's angle and error history becomes a
//! `SessionReport` that is stored with the session.
//!
//! # Module Structure
//!
//! - `frame`: RGB frames and the single-slot latest-frame buffer
//! - `ingest`: capture devices (synthetic, RTSP, HTTP, V4L2) and the capture loop
//! - `pose`: landmark types and pose estimator backends
//! - `trainer`: difficulty profiles, the rep state machine, and session reports
//! - `session`: the tick loop tying everything together
//! - `storage`: users, sessions and error logs (SQLite or in-memory)

pub mod command;
pub mod config;
pub mod environment;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod pose;
pub mod session;
pub mod smoother;
pub mod speech;
pub mod storage;
pub mod trainer;
pub mod ui;
pub mod voice;

pub use command::{Command, CommandBus};
pub use config::LungeGuardConfig;
pub use environment::{EnvironmentMonitor, Notice, NoticeKind};
pub use frame::{Frame, LatestFrame};
pub use geometry::{angle, front_features, side_features, FrontFeatures, Point2, SideFeatures};
pub use ingest::{FrameSource, SourceSettings};
pub use pose::{Landmark, LandmarkSet, PoseEstimator, ScriptedEstimator, Side, StubEstimator, View};
#[cfg(feature = "backend-tract")]
pub use pose::TractEstimator;
pub use session::{
    CameraPipeline, SessionConfig, SessionOutcome, SessionStatus, TickOutput, TrainingSession,
};
pub use smoother::LandmarkSmoother;
pub use speech::{MutedSpeech, SpeechQueue, SpeechSink};
pub use storage::{InMemorySessionStore, SessionStore, SqliteSessionStore};
pub use trainer::{
    Difficulty, DifficultyProfile, ErrorCategory, ExerciseStateMachine, SessionReport, Stage,
};
pub use voice::{KeywordSpotter, VoiceInput};
