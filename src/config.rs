use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::SourceSettings;
use crate::pose::Side;
use crate::smoother::DEFAULT_ALPHA;
use crate::trainer::{Difficulty, TrainerSettings, DEFAULT_ERROR_COOLDOWN, DEFAULT_MIN_HIP_DROP};

const DEFAULT_DB_PATH: &str = "lunge_guard.db";
const DEFAULT_USER: &str = "default";
const DEFAULT_FRONT_SOURCE: &str = "stub://front";
const DEFAULT_SIDE_SOURCE: &str = "stub://side";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_CAMERA_TIMEOUT_SECS: f64 = 5.0;
const DEFAULT_TICK_INTERVAL_MS: u64 = 33;
const DEFAULT_ENVIRONMENT_INTERVAL: u64 = 30;
const DEFAULT_SPEECH_COOLDOWN_SECS: f64 = 2.0;
const DEFAULT_POSE_INPUT_SIZE: u32 = 256;

#[derive(Debug, Deserialize, Default)]
struct LungeGuardConfigFile {
    db_path: Option<String>,
    user: Option<String>,
    difficulty: Option<Difficulty>,
    audio: Option<bool>,
    voice: Option<bool>,
    cameras: Option<CamerasConfigFile>,
    tracking: Option<TrackingConfigFile>,
    timing: Option<TimingConfigFile>,
    speech: Option<SpeechConfigFile>,
    voice_input: Option<VoiceInputConfigFile>,
    pose: Option<PoseConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CamerasConfigFile {
    front: Option<CameraConfigFile>,
    side: Option<CameraConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    smoothing_alpha: Option<f32>,
    side: Option<Side>,
    min_hip_drop: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TimingConfigFile {
    error_cooldown_secs: Option<f64>,
    camera_timeout_secs: Option<f64>,
    tick_interval_ms: Option<u64>,
    environment_interval_ticks: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SpeechConfigFile {
    cooldown_secs: Option<f64>,
    command: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct VoiceInputConfigFile {
    transcript_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct PoseConfigFile {
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct LungeGuardConfig {
    pub db_path: String,
    pub user: String,
    pub difficulty: Difficulty,
    pub audio_enabled: bool,
    pub voice_enabled: bool,
    pub front: SourceSettings,
    pub side: SourceSettings,
    pub active_side: Side,
    pub smoothing_alpha: f32,
    pub trainer: TrainerSettings,
    pub camera_timeout: Duration,
    pub tick_interval: Duration,
    pub environment_interval: u64,
    pub speech: SpeechSettings,
    pub voice_transcript_path: Option<PathBuf>,
    pub pose: PoseSettings,
}

#[derive(Debug, Clone)]
pub struct SpeechSettings {
    pub cooldown: Duration,
    /// External TTS command line; the phrase is appended as the last argument.
    pub command: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PoseSettings {
    /// ONNX landmark model. Without one, the synthetic estimator is used.
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
}

impl LungeGuardConfig {
    /// Load from `LUNGE_GUARD_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LUNGE_GUARD_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        Self::finish(file_cfg.unwrap_or_default())
    }

    /// Load from an explicit file, then apply environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        Self::finish(read_config_file(path)?)
    }

    fn finish(file: LungeGuardConfigFile) -> Result<Self> {
        let mut cfg = Self::from_file(file)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LungeGuardConfigFile) -> Result<Self> {
        let cameras = file.cameras.unwrap_or_default();
        let tracking = file.tracking.unwrap_or_default();
        let timing = file.timing.unwrap_or_default();
        let speech = file.speech.unwrap_or_default();
        let pose = file.pose.unwrap_or_default();

        Ok(Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            user: file.user.unwrap_or_else(|| DEFAULT_USER.to_string()),
            difficulty: file.difficulty.unwrap_or_default(),
            audio_enabled: file.audio.unwrap_or(true),
            voice_enabled: file.voice.unwrap_or(false),
            front: camera_settings(cameras.front, DEFAULT_FRONT_SOURCE),
            side: camera_settings(cameras.side, DEFAULT_SIDE_SOURCE),
            active_side: tracking.side.unwrap_or_default(),
            smoothing_alpha: tracking.smoothing_alpha.unwrap_or(DEFAULT_ALPHA),
            trainer: TrainerSettings {
                min_hip_drop: tracking.min_hip_drop.unwrap_or(DEFAULT_MIN_HIP_DROP),
                error_cooldown: timing.error_cooldown_secs.unwrap_or(DEFAULT_ERROR_COOLDOWN),
            },
            camera_timeout: secs(
                "camera_timeout_secs",
                timing
                    .camera_timeout_secs
                    .unwrap_or(DEFAULT_CAMERA_TIMEOUT_SECS),
            )?,
            tick_interval: Duration::from_millis(
                timing.tick_interval_ms.unwrap_or(DEFAULT_TICK_INTERVAL_MS),
            ),
            environment_interval: timing
                .environment_interval_ticks
                .unwrap_or(DEFAULT_ENVIRONMENT_INTERVAL),
            speech: SpeechSettings {
                cooldown: secs(
                    "speech.cooldown_secs",
                    speech.cooldown_secs.unwrap_or(DEFAULT_SPEECH_COOLDOWN_SECS),
                )?,
                command: speech.command.filter(|c| !c.trim().is_empty()),
            },
            voice_transcript_path: file.voice_input.and_then(|v| v.transcript_path),
            pose: PoseSettings {
                model_path: pose.model_path,
                input_size: pose.input_size.unwrap_or(DEFAULT_POSE_INPUT_SIZE),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_value("LUNGE_GUARD_DB_PATH") {
            self.db_path = path;
        }
        if let Some(user) = env_value("LUNGE_GUARD_USER") {
            self.user = user;
        }
        if let Some(url) = env_value("LUNGE_GUARD_FRONT_SOURCE") {
            self.front.url = url;
        }
        if let Some(url) = env_value("LUNGE_GUARD_SIDE_SOURCE") {
            self.side.url = url;
        }
        if let Some(difficulty) = env_value("LUNGE_GUARD_DIFFICULTY") {
            self.difficulty = difficulty
                .parse()
                .map_err(|e| anyhow!("LUNGE_GUARD_DIFFICULTY: {}", e))?;
        }
        if let Some(audio) = env_value("LUNGE_GUARD_AUDIO") {
            self.audio_enabled = parse_flag("LUNGE_GUARD_AUDIO", &audio)?;
        }
        if let Some(voice) = env_value("LUNGE_GUARD_VOICE") {
            self.voice_enabled = parse_flag("LUNGE_GUARD_VOICE", &voice)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.user = self.user.trim().to_string();
        if self.user.is_empty() {
            return Err(anyhow!("user must not be empty"));
        }
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        for (name, source) in [("front", &self.front), ("side", &self.side)] {
            if source.url.trim().is_empty() {
                return Err(anyhow!("{} camera source must not be empty", name));
            }
            if source.width == 0 || source.height == 0 {
                return Err(anyhow!("{} camera resolution must be non-zero", name));
            }
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(anyhow!(
                "smoothing_alpha must be in (0, 1], got {}",
                self.smoothing_alpha
            ));
        }
        if !(0.0..1.0).contains(&self.trainer.min_hip_drop) {
            return Err(anyhow!("min_hip_drop must be in [0, 1)"));
        }
        if !(self.trainer.error_cooldown >= 0.0 && self.trainer.error_cooldown.is_finite()) {
            return Err(anyhow!("error_cooldown_secs must be a non-negative number"));
        }
        if self.camera_timeout.is_zero() {
            return Err(anyhow!("camera_timeout_secs must be greater than zero"));
        }
        if self.tick_interval.is_zero() {
            return Err(anyhow!("tick_interval_ms must be greater than zero"));
        }
        if self.environment_interval == 0 {
            return Err(anyhow!("environment_interval_ticks must be greater than zero"));
        }
        if self.pose.input_size == 0 {
            return Err(anyhow!("pose input_size must be greater than zero"));
        }
        if self.voice_enabled && self.voice_transcript_path.is_none() {
            log::warn!("voice commands enabled without a transcript path; reading none");
        }
        Ok(())
    }
}

fn camera_settings(file: Option<CameraConfigFile>, default_url: &str) -> SourceSettings {
    let file = file.unwrap_or_default();
    SourceSettings {
        url: file.url.unwrap_or_else(|| default_url.to_string()),
        width: file.width.unwrap_or(DEFAULT_WIDTH),
        height: file.height.unwrap_or(DEFAULT_HEIGHT),
        target_fps: file.target_fps.unwrap_or(DEFAULT_FPS),
    }
}

fn secs(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| anyhow!("{} must be a non-negative number of seconds", name))
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("{} must be a boolean, got '{}'", name, other)),
    }
}

fn read_config_file(path: &Path) -> Result<LungeGuardConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
