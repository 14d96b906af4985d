use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use lunge_guard::config::LungeGuardConfig;
use lunge_guard::pose::Side;
use lunge_guard::trainer::Difficulty;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "LUNGE_GUARD_CONFIG",
        "LUNGE_GUARD_DB_PATH",
        "LUNGE_GUARD_USER",
        "LUNGE_GUARD_FRONT_SOURCE",
        "LUNGE_GUARD_SIDE_SOURCE",
        "LUNGE_GUARD_DIFFICULTY",
        "LUNGE_GUARD_AUDIO",
        "LUNGE_GUARD_VOICE",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = LungeGuardConfig::load().expect("load defaults");
    assert_eq!(cfg.db_path, "lunge_guard.db");
    assert_eq!(cfg.user, "default");
    assert_eq!(cfg.difficulty, Difficulty::Medium);
    assert!(cfg.audio_enabled);
    assert!(!cfg.voice_enabled);
    assert_eq!(cfg.front.url, "stub://front");
    assert_eq!(cfg.side.url, "stub://side");
    assert_eq!((cfg.front.width, cfg.front.height), (640, 480));
    assert_eq!(cfg.active_side, Side::Left);
    assert!((cfg.smoothing_alpha - 0.65).abs() < 1e-6);
    assert!((cfg.trainer.error_cooldown - 2.0).abs() < 1e-9);
    assert!((cfg.trainer.min_hip_drop - 0.05).abs() < 1e-6);
    assert_eq!(cfg.camera_timeout, Duration::from_secs(5));
    assert_eq!(cfg.tick_interval, Duration::from_millis(33));
    assert_eq!(cfg.environment_interval, 30);
    assert_eq!(cfg.speech.cooldown, Duration::from_secs(2));
    assert!(cfg.speech.command.is_none());
    assert!(cfg.pose.model_path.is_none());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        r#"{
            "db_path": "gym.db",
            "user": "alex",
            "difficulty": "hard",
            "audio": false,
            "cameras": {
                "front": { "url": "rtsp://front-cam", "width": 1280, "height": 720 },
                "side": { "url": "http://phone.local/video", "target_fps": 15 }
            },
            "tracking": { "smoothing_alpha": 0.5, "side": "right", "min_hip_drop": 0.08 },
            "timing": {
                "error_cooldown_secs": 1.5,
                "camera_timeout_secs": 3.0,
                "tick_interval_ms": 50,
                "environment_interval_ticks": 10
            },
            "speech": { "cooldown_secs": 4.0, "command": "espeak -s 150" },
            "voice_input": { "transcript_path": "/tmp/transcript.txt" },
            "pose": { "input_size": 192 }
        }"#,
    );

    std::env::set_var("LUNGE_GUARD_CONFIG", file.path());
    std::env::set_var("LUNGE_GUARD_USER", "  sam ");
    std::env::set_var("LUNGE_GUARD_SIDE_SOURCE", "/dev/video2");
    std::env::set_var("LUNGE_GUARD_VOICE", "yes");

    let cfg = LungeGuardConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "gym.db");
    assert_eq!(cfg.user, "sam");
    assert_eq!(cfg.difficulty, Difficulty::Hard);
    assert!(!cfg.audio_enabled);
    assert!(cfg.voice_enabled);
    assert_eq!(cfg.front.url, "rtsp://front-cam");
    assert_eq!((cfg.front.width, cfg.front.height), (1280, 720));
    assert_eq!(cfg.side.url, "/dev/video2");
    assert_eq!(cfg.side.target_fps, 15);
    assert_eq!(cfg.active_side, Side::Right);
    assert!((cfg.smoothing_alpha - 0.5).abs() < 1e-6);
    assert!((cfg.trainer.min_hip_drop - 0.08).abs() < 1e-6);
    assert!((cfg.trainer.error_cooldown - 1.5).abs() < 1e-9);
    assert_eq!(cfg.camera_timeout, Duration::from_secs(3));
    assert_eq!(cfg.tick_interval, Duration::from_millis(50));
    assert_eq!(cfg.environment_interval, 10);
    assert_eq!(cfg.speech.cooldown, Duration::from_secs(4));
    assert_eq!(cfg.speech.command.as_deref(), Some("espeak -s 150"));
    assert_eq!(
        cfg.voice_transcript_path.as_deref(),
        Some(std::path::Path::new("/tmp/transcript.txt"))
    );
    assert_eq!(cfg.pose.input_size, 192);

    clear_env();
}

#[test]
fn explicit_path_still_takes_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(r#"{ "difficulty": "easy", "db_path": "a.db" }"#);
    std::env::set_var("LUNGE_GUARD_DB_PATH", "b.db");

    let cfg = LungeGuardConfig::load_from_path(file.path()).expect("load config");
    assert_eq!(cfg.difficulty, Difficulty::Easy);
    assert_eq!(cfg.db_path, "b.db");

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let bad_alpha = config_file(r#"{ "tracking": { "smoothing_alpha": 0.0 } }"#);
    assert!(LungeGuardConfig::load_from_path(bad_alpha.path()).is_err());

    let bad_timeout = config_file(r#"{ "timing": { "camera_timeout_secs": -1.0 } }"#);
    assert!(LungeGuardConfig::load_from_path(bad_timeout.path()).is_err());

    let bad_difficulty = config_file(r#"{ "difficulty": "brutal" }"#);
    assert!(LungeGuardConfig::load_from_path(bad_difficulty.path()).is_err());

    let bad_json = config_file("{ not json");
    assert!(LungeGuardConfig::load_from_path(bad_json.path()).is_err());

    std::env::set_var("LUNGE_GUARD_AUDIO", "maybe");
    assert!(LungeGuardConfig::load().is_err());
    clear_env();

    std::env::set_var("LUNGE_GUARD_DIFFICULTY", "extreme");
    assert!(LungeGuardConfig::load().is_err());
    clear_env();

    std::env::set_var("LUNGE_GUARD_USER", "   ");
    // Blank env values are ignored, so the default user stands.
    let cfg = LungeGuardConfig::load().expect("blank env ignored");
    assert_eq!(cfg.user, "default");

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("LUNGE_GUARD_CONFIG", "/nonexistent/lunge_guard.json");
    assert!(LungeGuardConfig::load().is_err());

    clear_env();
}
