//! Repetition counting and form evaluation.
//!
//! `ExerciseStateMachine` is driven once per tick by the session loop. It owns the rep
//! counter, the standing-hip calibration, the per-category error debounce, and the angle and
//! error histories that end up in the `SessionReport`.
//!
//! A rep is counted on the Down to Up transition unless a form error was logged while Down.
//! Entering Down requires the hip to have dropped below the lowest standing hip height seen
//! so far, so bending only the knee cannot fake a rep.

mod clock;
mod history;
mod profile;

pub use clock::{ManualClock, MonotonicClock, SessionClock};
pub use history::{AngleSample, ErrorEvent, ErrorMarker, SessionReport};
pub use profile::{Difficulty, DifficultyProfile, UP_ANGLE};

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Minimum seconds between two logged errors of the same category.
pub const DEFAULT_ERROR_COOLDOWN: f64 = 2.0;

/// Minimum hip drop (normalized) below the standing baseline to enter Down.
pub const DEFAULT_MIN_HIP_DROP: f32 = 0.05;

/// The knee-over-toe check only applies once the knee is bent at least this far.
pub const KNEE_FORWARD_MAX_KNEE: f32 = 140.0;

// ----------------------------------------------------------------------------
// Types
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    #[serde(rename = "Valgus")]
    Valgus,
    #[serde(rename = "Torso Inclination")]
    Torso,
    #[serde(rename = "Knee Over Toe")]
    KneeForward,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 3] = [
        ErrorCategory::Valgus,
        ErrorCategory::Torso,
        ErrorCategory::KneeForward,
    ];

    /// Label stored in the database and in reports.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::Valgus => "Valgus",
            ErrorCategory::Torso => "Torso Inclination",
            ErrorCategory::KneeForward => "Knee Over Toe",
        }
    }

    /// Spoken correction cue.
    pub fn cue(&self) -> &'static str {
        match self {
            ErrorCategory::Valgus => "Knee out",
            ErrorCategory::Torso => "Straighten your back",
            ErrorCategory::KneeForward => "Knee back",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ErrorCategory {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let wanted = value.trim();
        for category in ErrorCategory::ALL {
            if category.label().eq_ignore_ascii_case(wanted) {
                return Ok(category);
            }
        }
        match wanted.to_ascii_lowercase().as_str() {
            "torso" => Ok(ErrorCategory::Torso),
            "kneeforward" | "knee_forward" | "knee-forward" => Ok(ErrorCategory::KneeForward),
            _ => Err(anyhow!("unknown error category '{}'", wanted)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    #[default]
    Up,
    Down,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Up => "UP",
            Stage::Down => "DOWN",
        }
    }
}

/// Outcome of one `update` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RepUpdate {
    pub reps: u32,
    pub stage: Stage,
    /// A clean rep was counted on this update.
    pub rep_counted: bool,
    /// A rep finished on this update but was voided by a form error.
    pub rep_rejected: bool,
}

/// Outcome of `mark_error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorLog {
    /// Recorded in the error history. Only logged errors go to storage and speech.
    Logged,
    /// Same category was logged within the cooldown window.
    Suppressed,
}

impl ErrorLog {
    pub fn is_logged(&self) -> bool {
        matches!(self, ErrorLog::Logged)
    }
}

/// Tunables that are not part of the difficulty profile.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainerSettings {
    pub min_hip_drop: f32,
    pub error_cooldown: f64,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            min_hip_drop: DEFAULT_MIN_HIP_DROP,
            error_cooldown: DEFAULT_ERROR_COOLDOWN,
        }
    }
}

/// Point-in-time view of the trainer for display.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TrainerSnapshot {
    pub reps: u32,
    pub stage: Stage,
    pub current_rep_failed: bool,
    pub knee_angle: Option<f32>,
    pub foot_spread: Option<f32>,
    /// `None` until a standing pose has been observed.
    pub standing_hip_baseline: Option<f32>,
}

// ----------------------------------------------------------------------------
// State machine
// ----------------------------------------------------------------------------

pub struct ExerciseStateMachine {
    profile: DifficultyProfile,
    settings: TrainerSettings,
    clock: Box<dyn SessionClock>,
    reps: u32,
    stage: Stage,
    current_rep_failed: bool,
    standing_hip_baseline: f32,
    last_logged: HashMap<ErrorCategory, f64>,
    angles: Vec<AngleSample>,
    errors: Vec<ErrorEvent>,
    last_knee_angle: Option<f32>,
    last_foot_spread: Option<f32>,
}

impl ExerciseStateMachine {
    pub fn new(
        profile: DifficultyProfile,
        settings: TrainerSettings,
        clock: Box<dyn SessionClock>,
    ) -> Self {
        Self {
            profile,
            settings,
            clock,
            reps: 0,
            stage: Stage::Up,
            current_rep_failed: false,
            standing_hip_baseline: f32::INFINITY,
            last_logged: HashMap::new(),
            angles: Vec::new(),
            errors: Vec::new(),
            last_knee_angle: None,
            last_foot_spread: None,
        }
    }

    pub fn profile(&self) -> &DifficultyProfile {
        &self.profile
    }

    pub fn reps(&self) -> u32 {
        self.reps
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn current_rep_failed(&self) -> bool {
        self.current_rep_failed
    }

    /// Feed one side-view observation.
    ///
    /// `foot_spread` is recorded for display only.
    pub fn update(&mut self, knee_angle: f32, foot_spread: f32, hip_height: f32) -> RepUpdate {
        let now = self.clock.now();
        let mut rep_counted = false;
        let mut rep_rejected = false;

        if knee_angle > self.profile.up_angle() {
            if self.stage == Stage::Down {
                if self.current_rep_failed {
                    rep_rejected = true;
                    log::warn!("repetition rejected: form error while down");
                } else {
                    self.reps += 1;
                    rep_counted = true;
                    log::info!("repetition {} counted", self.reps);
                }
                self.stage = Stage::Up;
                self.current_rep_failed = false;
            }
            self.standing_hip_baseline = self.standing_hip_baseline.min(hip_height);
        } else if knee_angle < self.profile.down_angle() && self.stage == Stage::Up {
            let drop = hip_height - self.standing_hip_baseline;
            if drop > self.settings.min_hip_drop {
                self.stage = Stage::Down;
                self.current_rep_failed = false;
            } else {
                log::debug!(
                    "descent ignored: hip drop {:.3} does not exceed {:.3}",
                    drop,
                    self.settings.min_hip_drop
                );
            }
        }

        self.angles.push(AngleSample { t: now, knee_angle });
        self.last_knee_angle = Some(knee_angle);
        self.last_foot_spread = Some(foot_spread);

        RepUpdate {
            reps: self.reps,
            stage: self.stage,
            rep_counted,
            rep_rejected,
        }
    }

    /// Record a form error, subject to the per-category cooldown.
    ///
    /// A logged error while Down voids the current rep. Suppressed errors change nothing.
    pub fn mark_error(&mut self, category: ErrorCategory) -> ErrorLog {
        let now = self.clock.now();
        if let Some(&last) = self.last_logged.get(&category) {
            if now - last < self.settings.error_cooldown {
                return ErrorLog::Suppressed;
            }
        }

        self.last_logged.insert(category, now);
        self.errors.push(ErrorEvent { t: now, category });
        if self.stage == Stage::Down {
            self.current_rep_failed = true;
        }
        log::info!("form error logged: {}", category);
        ErrorLog::Logged
    }

    pub fn check_valgus(&self, knee_deviation: f32) -> bool {
        knee_deviation.abs() > self.profile.valgus_limit()
    }

    pub fn check_torso(&self, torso_lean: f32) -> bool {
        torso_lean > self.profile.torso_limit()
    }

    pub fn check_knee_forward(&self, knee_angle: f32, shin_angle: f32) -> bool {
        knee_angle <= KNEE_FORWARD_MAX_KNEE && shin_angle > self.profile.shin_limit()
    }

    /// Start over within the same session. The standing baseline is kept.
    pub fn reset(&mut self) {
        self.reps = 0;
        self.stage = Stage::Up;
        self.current_rep_failed = false;
        self.last_logged.clear();
        self.angles.clear();
        self.errors.clear();
        self.last_knee_angle = None;
        self.last_foot_spread = None;
    }

    pub fn snapshot(&self) -> TrainerSnapshot {
        TrainerSnapshot {
            reps: self.reps,
            stage: self.stage,
            current_rep_failed: self.current_rep_failed,
            knee_angle: self.last_knee_angle,
            foot_spread: self.last_foot_spread,
            standing_hip_baseline: self
                .standing_hip_baseline
                .is_finite()
                .then_some(self.standing_hip_baseline),
        }
    }

    pub fn finalize(&self) -> SessionReport {
        SessionReport::new(self.angles.clone(), self.errors.clone(), self.reps)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
