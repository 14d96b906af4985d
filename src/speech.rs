//! Spoken feedback.
//!
//! The session loop talks to a `SpeechSink`. `SpeechQueue` is the production sink: it
//! suppresses repeats of the same phrase and hands text to a `Voice` on its own thread so a
//! slow synthesizer never stalls a tick.

use std::collections::HashMap;
use std::process::Command as Process;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

/// Default per-phrase repeat window.
pub const SPEECH_COOLDOWN: Duration = Duration::from_secs(2);

/// Consumer of spoken phrases.
pub trait SpeechSink {
    /// Queue `text`. Unless `force` is set, a phrase spoken within the cooldown is dropped.
    fn speak(&mut self, text: &str, force: bool);
}

/// Speech synthesizer backend, driven from the queue thread.
pub trait Voice: Send {
    fn say(&mut self, text: &str) -> Result<()>;
}

/// Writes phrases to the log instead of a speaker.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogVoice;

impl Voice for LogVoice {
    fn say(&mut self, text: &str) -> Result<()> {
        log::info!("speak: {}", text);
        Ok(())
    }
}

/// Runs an external TTS program with the phrase as its last argument (`espeak`, `say`, ...).
#[derive(Clone, Debug)]
pub struct CommandVoice {
    program: String,
    args: Vec<String>,
}

impl CommandVoice {
    /// Split a command line like `"espeak -s 150"` into program and arguments.
    pub fn from_command_line(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("speech command is empty"))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl Voice for CommandVoice {
    fn say(&mut self, text: &str) -> Result<()> {
        let status = Process::new(&self.program)
            .args(&self.args)
            .arg(text)
            .status()
            .with_context(|| format!("run speech command {}", self.program))?;
        if !status.success() {
            return Err(anyhow!("speech command {} exited with {}", self.program, status));
        }
        Ok(())
    }
}

/// Sink used when audio is disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct MutedSpeech;

impl SpeechSink for MutedSpeech {
    fn speak(&mut self, text: &str, _force: bool) {
        log::debug!("muted speech: {}", text);
    }
}

/// Cooldown-filtered queue in front of a `Voice` worker thread.
pub struct SpeechQueue {
    tx: Option<Sender<String>>,
    join: Option<JoinHandle<()>>,
    cooldown: Duration,
    last_spoken: HashMap<String, Instant>,
}

impl SpeechQueue {
    pub fn start(mut voice: Box<dyn Voice>, cooldown: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<String>();
        let join = std::thread::Builder::new()
            .name("speech".to_string())
            .spawn(move || {
                for text in rx {
                    if let Err(err) = voice.say(&text) {
                        log::warn!("speech failed: {:#}", err);
                    }
                }
            })
            .map_err(|err| anyhow!("spawn speech thread: {}", err))?;
        Ok(Self {
            tx: Some(tx),
            join: Some(join),
            cooldown,
            last_spoken: HashMap::new(),
        })
    }

    /// Close the queue, let the worker finish what is queued, and join it.
    pub fn stop(&mut self) {
        self.tx.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("speech thread panicked");
            }
        }
    }
}

impl SpeechSink for SpeechQueue {
    fn speak(&mut self, text: &str, force: bool) {
        let now = Instant::now();
        if !force {
            if let Some(&last) = self.last_spoken.get(text) {
                if now.duration_since(last) < self.cooldown {
                    return;
                }
            }
        }
        self.last_spoken.insert(text.to_string(), now);
        if let Some(tx) = &self.tx {
            if tx.send(text.to_string()).is_err() {
                log::warn!("speech thread is gone; dropping '{}'", text);
            }
        }
    }
}

impl Drop for SpeechQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
