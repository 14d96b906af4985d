//! lunge_guard - live lunge coaching session
//!
//! This binary:
//! 1. Loads configuration (file, environment, then command-line overrides)
//! 2. Opens the session database and resolves the user
//! 3. Starts the front and side cameras with a pose estimator each
//! 4. Reads START/STOP/RESET/EXIT from stdin and, optionally, a voice transcript
//! 5. Runs the session loop until EXIT, Ctrl-C, or a camera failure

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{BufRead, BufReader, IsTerminal};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Sender};

use lunge_guard::config::LungeGuardConfig;
use lunge_guard::pose::{PoseEstimator, Side, StubEstimator, View};
#[cfg(feature = "backend-tract")]
use lunge_guard::pose::TractEstimator;
use lunge_guard::session::{
    CameraPipeline, SessionConfig, SessionStatus, TickOutput, TrainingSession,
};
use lunge_guard::speech::{CommandVoice, LogVoice, MutedSpeech, SpeechQueue, SpeechSink, Voice};
use lunge_guard::storage::{SessionStore, SqliteSessionStore};
use lunge_guard::trainer::{Difficulty, ErrorCategory};
use lunge_guard::ui::{Ui, UiMode};
use lunge_guard::voice::{VoiceInput, TRIGGER_COOLDOWN};
use lunge_guard::{CommandBus, FrameSource};

#[derive(Parser, Debug)]
#[command(author, version, about = "Dual-camera lunge counter and form coach")]
struct Args {
    /// JSON config file (overrides LUNGE_GUARD_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    /// easy, medium or hard.
    #[arg(long)]
    difficulty: Option<Difficulty>,

    /// Front camera source (stub://name, rtsp://..., http://..., /dev/videoN).
    #[arg(long)]
    front: Option<String>,

    /// Side camera source.
    #[arg(long)]
    side: Option<String>,

    /// Leg tracked by the side camera: left or right.
    #[arg(long)]
    leg: Option<Side>,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    db: Option<String>,

    /// Disable spoken feedback.
    #[arg(long)]
    mute: bool,

    /// Read voice commands from a transcript file, one utterance per line.
    #[arg(long, value_name = "PATH")]
    voice_transcript: Option<PathBuf>,

    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::new(UiMode::parse(Some(&args.ui)), std::io::stderr().is_terminal());

    let cfg = {
        let _step = ui.step("Load configuration");
        let cfg = match &args.config {
            Some(path) => LungeGuardConfig::load_from_path(path)?,
            None => LungeGuardConfig::load()?,
        };
        apply_args(cfg, &args)
    };

    let mut store = {
        let _step = ui.step("Open session database");
        SqliteSessionStore::open(&cfg.db_path)
            .with_context(|| format!("open database {}", cfg.db_path))?
    };
    let user = store.ensure_user(&cfg.user)?;
    log::info!(
        "user '{}' (id {}), difficulty {}, tracking {} leg",
        cfg.user,
        user,
        cfg.difficulty,
        cfg.active_side.as_str()
    );

    let front = CameraPipeline::new(
        View::Front,
        FrameSource::new("front", cfg.front.clone()),
        build_estimator(View::Front, &cfg)?,
        cfg.smoothing_alpha,
    );
    let side = CameraPipeline::new(
        View::Side,
        FrameSource::new("side", cfg.side.clone()),
        build_estimator(View::Side, &cfg)?,
        cfg.smoothing_alpha,
    );

    let (gui_tx, gui_rx) = mpsc::channel();
    spawn_keyboard(gui_tx)?;
    let mut bus = CommandBus::new().with_gui(gui_rx);

    let mut voice_input = None;
    if cfg.voice_enabled {
        match &cfg.voice_transcript_path {
            Some(path) => {
                let file = std::fs::File::open(path)
                    .with_context(|| format!("open voice transcript {}", path.display()))?;
                let (voice_tx, voice_rx) = mpsc::channel();
                voice_input = Some(VoiceInput::start(
                    BufReader::new(file),
                    voice_tx,
                    TRIGGER_COOLDOWN,
                )?);
                bus = bus.with_voice(voice_rx);
            }
            None => log::warn!("voice commands enabled but no transcript configured"),
        }
    }

    let mut speech: Box<dyn SpeechSink> = if cfg.audio_enabled {
        let voice: Box<dyn Voice> = match &cfg.speech.command {
            Some(command) => Box::new(CommandVoice::from_command_line(command)?),
            None => Box::new(LogVoice),
        };
        Box::new(SpeechQueue::start(voice, cfg.speech.cooldown)?)
    } else {
        Box::new(MutedSpeech)
    };

    let session = TrainingSession::new(SessionConfig::from_config(&cfg), front, side, bus);
    let shutdown = session.shutdown_handle();
    ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
        .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    eprintln!("type start, stop, reset or exit and press enter");

    let (tick_tx, tick_rx) = mpsc::sync_channel::<TickOutput>(4);
    let mut status = ui.live_status();
    let display = std::thread::Builder::new()
        .name("display".to_string())
        .spawn(move || {
            for tick in tick_rx {
                status.update(&tick);
                if tick.status != SessionStatus::Running {
                    status.finish(&format!("session ended: {}", tick.status.as_str()));
                }
            }
        })
        .map_err(|e| anyhow!("spawn display thread: {}", e))?;

    let outcome = session.run(&mut store, user, speech.as_mut(), &tick_tx);
    drop(tick_tx);
    if display.join().is_err() {
        log::error!("display thread panicked");
    }
    if let Some(mut voice_input) = voice_input {
        voice_input.stop();
    }
    drop(speech);

    let outcome = outcome?;
    match outcome.status {
        SessionStatus::CameraError => Err(anyhow!(
            "session {} stopped: camera error after {} reps",
            outcome.session_id,
            outcome.total_reps
        )),
        _ => {
            log::info!(
                "session {} complete: {} reps",
                outcome.session_id,
                outcome.total_reps
            );
            if let Some(report) = &outcome.report {
                for category in ErrorCategory::ALL {
                    let count = report.error_count(category);
                    if count > 0 {
                        log::info!("  {}: {}", category.label(), count);
                    }
                }
                log::info!("  duration: {:.1}s", report.duration());
            }
            Ok(())
        }
    }
}

fn apply_args(mut cfg: LungeGuardConfig, args: &Args) -> LungeGuardConfig {
    if let Some(difficulty) = args.difficulty {
        cfg.difficulty = difficulty;
    }
    if let Some(front) = &args.front {
        cfg.front.url = front.clone();
    }
    if let Some(side) = &args.side {
        cfg.side.url = side.clone();
    }
    if let Some(leg) = args.leg {
        cfg.active_side = leg;
    }
    if let Some(user) = &args.user {
        cfg.user = user.trim().to_string();
    }
    if let Some(db) = &args.db {
        cfg.db_path = db.clone();
    }
    if args.mute {
        cfg.audio_enabled = false;
    }
    if let Some(path) = &args.voice_transcript {
        cfg.voice_enabled = true;
        cfg.voice_transcript_path = Some(path.clone());
    }
    cfg
}

fn build_estimator(view: View, cfg: &LungeGuardConfig) -> Result<Box<dyn PoseEstimator>> {
    match &cfg.pose.model_path {
        #[cfg(feature = "backend-tract")]
        Some(path) => Ok(Box::new(TractEstimator::new(path, cfg.pose.input_size)?)),
        #[cfg(not(feature = "backend-tract"))]
        Some(path) => Err(anyhow!(
            "pose model {} requires the backend-tract feature",
            path.display()
        )),
        None => {
            log::warn!("{}: no pose model configured; using synthetic poses", view.as_str());
            Ok(Box::new(StubEstimator::new(view).with_side(cfg.active_side)))
        }
    }
}

/// Forward stdin lines as commands. The thread is detached; it ends at EOF.
fn spawn_keyboard(tx: Sender<String>) -> Result<()> {
    std::thread::Builder::new()
        .name("keyboard".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .map_err(|e| anyhow!("spawn keyboard thread: {}", e))?;
    Ok(())
}
