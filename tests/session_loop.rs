use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use anyhow::{anyhow, Result};

use lunge_guard::frame::Frame;
use lunge_guard::pose::{
    index, lunge_pose, Landmark, LandmarkSet, PoseEstimator, ScriptedEstimator, Side, View,
};
use lunge_guard::session::{
    CameraPipeline, SessionConfig, SessionOutcome, SessionStatus, TickOutput, TrainingSession,
    ANNOUNCE_EXIT, ANNOUNCE_START,
};
use lunge_guard::speech::SpeechSink;
use lunge_guard::storage::{InMemorySessionStore, SessionStore};
use lunge_guard::trainer::{ErrorCategory, ManualClock, Stage};
use lunge_guard::voice::{VoiceInput, TRIGGER_COOLDOWN};
use lunge_guard::{CommandBus, FrameSource, SourceSettings};

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct RecordingSpeech {
    said: Vec<(String, bool)>,
}

impl RecordingSpeech {
    fn spoke(&self, text: &str, force: bool) -> usize {
        self.said
            .iter()
            .filter(|(t, f)| t == text && *f == force)
            .count()
    }
}

impl SpeechSink for RecordingSpeech {
    fn speak(&mut self, text: &str, force: bool) {
        self.said.push((text.to_string(), force));
    }
}

fn config(front: &str, side: &str) -> SessionConfig {
    let settings = |url: &str| SourceSettings {
        url: url.to_string(),
        width: 64,
        height: 48,
        target_fps: 60,
    };
    SessionConfig {
        front_source: settings(front),
        side_source: settings(side),
        tick_interval: Duration::from_millis(5),
        ..SessionConfig::default()
    }
}

fn pipeline(
    view: View,
    cfg: &SessionConfig,
    estimator: impl PoseEstimator + 'static,
) -> CameraPipeline {
    let settings = match view {
        View::Front => cfg.front_source.clone(),
        View::Side => cfg.side_source.clone(),
    };
    CameraPipeline::new(
        view,
        FrameSource::new(view.as_str(), settings),
        Box::new(estimator),
        cfg.smoothing_alpha,
    )
}

/// Estimator whose model never loads a usable result.
struct BrokenModel;

impl PoseEstimator for BrokenModel {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn estimate(&mut self, _frame: &Frame) -> Result<Option<LandmarkSet>> {
        Err(anyhow!("output tensor shape mismatch"))
    }
}

/// Runs the session on a worker thread while `drive` consumes ticks and issues commands.
fn run_session<F>(
    session: TrainingSession,
    store: &mut InMemorySessionStore,
    speech: &mut RecordingSpeech,
    commands: Sender<String>,
    mut drive: F,
) -> Result<(SessionOutcome, Vec<TickOutput>)>
where
    F: FnMut(&TickOutput, &Sender<String>),
{
    let user = store.ensure_user("tester")?;
    let (tx, rx) = mpsc::sync_channel(64);
    std::thread::scope(|scope| {
        let worker = scope.spawn(move || session.run(store, user, speech, &tx));
        let ticks = collect(&rx, |tick| drive(tick, &commands));
        let outcome = worker.join().expect("session thread panicked")?;
        Ok((outcome, ticks))
    })
}

fn collect(rx: &Receiver<TickOutput>, mut drive: impl FnMut(&TickOutput)) -> Vec<TickOutput> {
    let mut ticks = Vec::new();
    loop {
        let tick = rx.recv_timeout(RECV_TIMEOUT).expect("session stalled");
        drive(&tick);
        let done = tick.status != SessionStatus::Running;
        ticks.push(tick);
        if done {
            return ticks;
        }
    }
}

#[test]
fn clean_rep_is_counted_and_reported() -> Result<()> {
    let cfg = config("stub://front", "stub://side");
    let depths = [0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
    let front = pipeline(View::Front, &cfg, ScriptedEstimator::new(Vec::new()));
    let side = pipeline(
        View::Side,
        &cfg,
        ScriptedEstimator::from_depths(View::Side, Side::Left, &depths),
    );

    let (gui_tx, gui_rx) = mpsc::channel();
    gui_tx.send("start".to_string())?;
    let session = TrainingSession::new(cfg, front, side, CommandBus::new().with_gui(gui_rx));

    let mut store = InMemorySessionStore::new();
    let mut speech = RecordingSpeech::default();
    let mut exit_sent = false;
    let (outcome, ticks) = run_session(session, &mut store, &mut speech, gui_tx, |tick, tx| {
        if !exit_sent && tick.snapshot.reps == 1 && tick.snapshot.stage == Stage::Up {
            tx.send("EXIT".to_string()).expect("send exit");
            exit_sent = true;
        }
    })?;

    assert_eq!(outcome.status, SessionStatus::SessionDone);
    assert_eq!(outcome.total_reps, 1);
    let report = outcome.report.expect("report");
    assert_eq!(report.total_reps(), 1);
    assert!(!report.angles().is_empty());
    assert!(report.errors().is_empty());

    let last = ticks.last().expect("final tick");
    assert_eq!(last.status, SessionStatus::SessionDone);
    assert!(last.report.is_some());
    assert_eq!(
        ticks.iter().filter(|t| t.report.is_some()).count(),
        1,
        "report is delivered exactly once"
    );

    assert!(store.is_ended(outcome.session_id));
    assert!(store.errors(outcome.session_id).is_empty());
    assert!(store.session_report(outcome.session_id)?.is_some());

    assert_eq!(speech.spoke(ANNOUNCE_START, true), 1);
    assert_eq!(speech.spoke("1", true), 1);
    assert_eq!(speech.spoke(ANNOUNCE_EXIT, true), 1);
    Ok(())
}

fn valgus_pose() -> LandmarkSet {
    let standing = lunge_pose(View::Front, Side::Left, 0.0);
    let points: Vec<Landmark> = standing
        .points()
        .iter()
        .map(|lm| {
            if lm.index == index::LEFT_KNEE {
                Landmark::new(lm.index, lm.x + 0.1, lm.y, lm.z)
            } else {
                *lm
            }
        })
        .collect();
    LandmarkSet::new(points)
}

#[test]
fn repeated_fault_is_logged_once_within_cooldown() -> Result<()> {
    let cfg = config("stub://front", "stub://side");
    let front = pipeline(
        View::Front,
        &cfg,
        ScriptedEstimator::new((0..20).map(|_| Some(valgus_pose()))),
    );
    let side = pipeline(View::Side, &cfg, ScriptedEstimator::new(Vec::new()));

    let (gui_tx, gui_rx) = mpsc::channel();
    gui_tx.send("START".to_string())?;
    let clock = ManualClock::new();
    let session = TrainingSession::with_clock(
        cfg,
        front,
        side,
        CommandBus::new().with_gui(gui_rx),
        Box::new(clock),
    );

    let mut store = InMemorySessionStore::new();
    let mut speech = RecordingSpeech::default();
    let mut faulty_ticks = 0;
    let mut exit_sent = false;
    let (outcome, _) = run_session(session, &mut store, &mut speech, gui_tx, |tick, tx| {
        if tick.front_features.is_some() {
            faulty_ticks += 1;
        }
        if !exit_sent && faulty_ticks >= 10 {
            tx.send("exit".to_string()).expect("send exit");
            exit_sent = true;
        }
    })?;

    assert_eq!(outcome.status, SessionStatus::SessionDone);
    assert_eq!(store.errors(outcome.session_id), vec![ErrorCategory::Valgus]);
    let report = outcome.report.expect("report");
    assert_eq!(report.error_count(ErrorCategory::Valgus), 1);
    assert_eq!(speech.spoke(ErrorCategory::Valgus.cue(), false), 1);
    Ok(())
}

#[test]
fn paused_session_ignores_faults() -> Result<()> {
    let cfg = config("stub://front", "stub://side");
    let front = pipeline(
        View::Front,
        &cfg,
        ScriptedEstimator::new((0..20).map(|_| Some(valgus_pose()))),
    );
    let side = pipeline(View::Side, &cfg, ScriptedEstimator::new(Vec::new()));

    let (gui_tx, gui_rx) = mpsc::channel();
    let session = TrainingSession::new(cfg, front, side, CommandBus::new().with_gui(gui_rx));

    let mut store = InMemorySessionStore::new();
    let mut speech = RecordingSpeech::default();
    let mut seen = 0;
    let mut exit_sent = false;
    let (outcome, ticks) = run_session(session, &mut store, &mut speech, gui_tx, |tick, tx| {
        if tick.front_features.is_some() {
            seen += 1;
        }
        if !exit_sent && seen >= 5 {
            tx.send("EXIT".to_string()).expect("send exit");
            exit_sent = true;
        }
    })?;

    assert_eq!(outcome.status, SessionStatus::SessionDone);
    assert!(store.errors(outcome.session_id).is_empty());
    assert!(ticks.iter().all(|t| !t.active && t.errors.is_empty()));
    assert_eq!(speech.spoke(ErrorCategory::Valgus.cue(), false), 0);
    Ok(())
}

#[test]
fn dead_camera_ends_with_camera_error() -> Result<()> {
    let cfg = config("stub://front", "stub://side?frames=3");
    let front = pipeline(View::Front, &cfg, ScriptedEstimator::new(Vec::new()));
    let side = pipeline(View::Side, &cfg, ScriptedEstimator::new(Vec::new()));
    let (gui_tx, gui_rx) = mpsc::channel();
    let session = TrainingSession::new(cfg, front, side, CommandBus::new().with_gui(gui_rx));

    let mut store = InMemorySessionStore::new();
    let mut speech = RecordingSpeech::default();
    let (outcome, ticks) = run_session(session, &mut store, &mut speech, gui_tx, |_, _| {})?;

    assert_eq!(outcome.status, SessionStatus::CameraError);
    assert!(outcome.report.is_none());
    let last = ticks.last().expect("final tick");
    assert_eq!(last.status, SessionStatus::CameraError);
    assert!(last.report.is_none());
    assert!(store.is_ended(outcome.session_id));
    assert!(store.session_report(outcome.session_id)?.is_none());
    assert_eq!(speech.spoke(ANNOUNCE_EXIT, true), 0);
    Ok(())
}

#[test]
fn unopenable_camera_fails_fast() -> Result<()> {
    let cfg = config("stub://front", "ftp://nowhere");
    let front = pipeline(View::Front, &cfg, ScriptedEstimator::new(Vec::new()));
    let side = pipeline(View::Side, &cfg, ScriptedEstimator::new(Vec::new()));
    let (gui_tx, gui_rx) = mpsc::channel();
    let session = TrainingSession::new(cfg, front, side, CommandBus::new().with_gui(gui_rx));

    let mut store = InMemorySessionStore::new();
    let mut speech = RecordingSpeech::default();
    let (outcome, ticks) = run_session(session, &mut store, &mut speech, gui_tx, |_, _| {})?;

    assert_eq!(outcome.status, SessionStatus::CameraError);
    assert_eq!(ticks.len(), 1);
    assert!(store.is_ended(outcome.session_id));
    Ok(())
}

#[test]
fn shutdown_flag_finishes_like_exit() -> Result<()> {
    let cfg = config("stub://front", "stub://side");
    let front = pipeline(View::Front, &cfg, ScriptedEstimator::new(Vec::new()));
    let side = pipeline(View::Side, &cfg, ScriptedEstimator::new(Vec::new()));
    let (gui_tx, gui_rx) = mpsc::channel();
    let session = TrainingSession::new(cfg, front, side, CommandBus::new().with_gui(gui_rx));
    session
        .shutdown_handle()
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let mut store = InMemorySessionStore::new();
    let mut speech = RecordingSpeech::default();
    let (outcome, ticks) = run_session(session, &mut store, &mut speech, gui_tx, |_, _| {})?;

    assert_eq!(outcome.status, SessionStatus::SessionDone);
    assert_eq!(outcome.total_reps, 0);
    assert!(ticks.last().and_then(|t| t.report.as_ref()).is_some());
    assert_eq!(speech.spoke(ANNOUNCE_EXIT, true), 1);
    Ok(())
}

#[test]
fn voice_transcript_starts_training() -> Result<()> {
    let cfg = config("stub://front", "stub://side");
    let front = pipeline(View::Front, &cfg, ScriptedEstimator::new(Vec::new()));
    let side = pipeline(View::Side, &cfg, ScriptedEstimator::new(Vec::new()));

    let (voice_tx, voice_rx) = mpsc::channel();
    let mut voice = VoiceInput::start(
        std::io::Cursor::new("um okay\nlet's go\n"),
        voice_tx,
        TRIGGER_COOLDOWN,
    )?;
    let (gui_tx, gui_rx) = mpsc::channel();
    let bus = CommandBus::new().with_gui(gui_rx).with_voice(voice_rx);
    let session = TrainingSession::new(cfg, front, side, bus);

    let mut store = InMemorySessionStore::new();
    let mut speech = RecordingSpeech::default();
    let mut exit_sent = false;
    let (outcome, ticks) = run_session(session, &mut store, &mut speech, gui_tx, |tick, tx| {
        if !exit_sent && tick.active {
            tx.send("EXIT".to_string()).expect("send exit");
            exit_sent = true;
        }
    })?;
    voice.stop();

    assert_eq!(outcome.status, SessionStatus::SessionDone);
    assert!(ticks.iter().any(|t| t.active));
    assert_eq!(speech.spoke(ANNOUNCE_START, true), 1);
    Ok(())
}

#[test]
fn muted_session_says_nothing() -> Result<()> {
    let cfg = SessionConfig {
        audio_enabled: false,
        ..config("stub://front", "stub://side")
    };
    let front = pipeline(View::Front, &cfg, ScriptedEstimator::new(Vec::new()));
    let side = pipeline(View::Side, &cfg, ScriptedEstimator::new(Vec::new()));
    let (gui_tx, gui_rx) = mpsc::channel();
    gui_tx.send("START".to_string())?;
    gui_tx.send("RESET".to_string())?;
    gui_tx.send("EXIT".to_string())?;
    let session = TrainingSession::new(cfg, front, side, CommandBus::new().with_gui(gui_rx));

    let mut store = InMemorySessionStore::new();
    let mut speech = RecordingSpeech::default();
    let (outcome, ticks) = run_session(session, &mut store, &mut speech, gui_tx, |_, _| {})?;

    assert_eq!(outcome.status, SessionStatus::SessionDone);
    // START and RESET each take one tick before EXIT.
    assert_eq!(ticks.len(), 3);
    assert!(speech.said.is_empty());
    Ok(())
}

#[test]
fn failing_estimator_keeps_serving_video() -> Result<()> {
    let cfg = config("stub://front", "stub://side");
    let front = pipeline(View::Front, &cfg, BrokenModel);
    let side = pipeline(View::Side, &cfg, ScriptedEstimator::new(Vec::new()));
    let (gui_tx, gui_rx) = mpsc::channel();
    gui_tx.send("START".to_string())?;
    let session = TrainingSession::new(cfg, front, side, CommandBus::new().with_gui(gui_rx));

    let mut store = InMemorySessionStore::new();
    let mut speech = RecordingSpeech::default();
    let mut served = 0;
    let mut exit_sent = false;
    let (outcome, ticks) = run_session(session, &mut store, &mut speech, gui_tx, |tick, tx| {
        if tick.status == SessionStatus::Running && tick.front.is_some() {
            served += 1;
        }
        if !exit_sent && served >= 3 {
            tx.send("EXIT".to_string()).expect("send exit");
            exit_sent = true;
        }
    })?;

    assert_eq!(outcome.status, SessionStatus::SessionDone);
    assert!(outcome.report.is_some());
    let running: Vec<_> = ticks
        .iter()
        .filter(|t| t.status == SessionStatus::Running)
        .collect();
    assert!(running.iter().filter(|t| t.front.is_some()).count() >= 3);
    assert!(running.iter().all(|t| t.front_features.is_none()));
    assert!(running.iter().any(|t| t.active));
    let last = ticks.last().expect("final tick");
    assert_eq!(last.status, SessionStatus::SessionDone);
    assert!(last.report.is_some());
    assert!(store.session_report(outcome.session_id)?.is_some());
    assert_eq!(speech.spoke(ANNOUNCE_EXIT, true), 1);
    Ok(())
}

#[test]
fn exit_is_honored_while_estimator_fails() -> Result<()> {
    let cfg = config("stub://front", "stub://side");
    let front = pipeline(View::Front, &cfg, BrokenModel);
    let side = pipeline(View::Side, &cfg, BrokenModel);
    let (gui_tx, gui_rx) = mpsc::channel();
    let session = TrainingSession::new(cfg, front, side, CommandBus::new().with_gui(gui_rx));
    let shutdown = session.shutdown_handle();

    let mut store = InMemorySessionStore::new();
    let mut speech = RecordingSpeech::default();
    let mut seen = 0;
    let (outcome, _) = run_session(session, &mut store, &mut speech, gui_tx, |_, _| {
        seen += 1;
        if seen == 5 {
            shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    })?;

    assert_eq!(outcome.status, SessionStatus::SessionDone);
    assert!(seen >= 5);
    assert!(store.is_ended(outcome.session_id));
    Ok(())
}
