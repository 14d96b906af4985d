//! Voice command input.
//!
//! Speech recognition itself runs outside this crate. The recognizer writes partial
//! transcripts, one per line, to a pipe or file; `VoiceInput` spots command keywords in them
//! and forwards command tokens to the session's voice channel.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::command::Command;

/// Minimum time between two recognized commands.
pub const TRIGGER_COOLDOWN: Duration = Duration::from_millis(500);

const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Keyword table in priority order: the first group with a hit wins.
const KEYWORDS: [(Command, &[&str]); 4] = [
    (Command::Exit, &["exit", "quit", "finish"]),
    (Command::Stop, &["stop", "pause"]),
    (Command::Start, &["start", "begin", "go"]),
    (Command::Reset, &["reset"]),
];

/// Maps partial transcripts to commands with a trigger cooldown.
#[derive(Debug)]
pub struct KeywordSpotter {
    cooldown: Duration,
    last_trigger: Option<Instant>,
}

impl KeywordSpotter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_trigger: None,
        }
    }

    pub fn process(&mut self, transcript: &str, now: Instant) -> Option<Command> {
        if let Some(last) = self.last_trigger {
            if now.saturating_duration_since(last) < self.cooldown {
                return None;
            }
        }
        let command = match_keywords(transcript)?;
        self.last_trigger = Some(now);
        Some(command)
    }
}

impl Default for KeywordSpotter {
    fn default() -> Self {
        Self::new(TRIGGER_COOLDOWN)
    }
}

fn match_keywords(transcript: &str) -> Option<Command> {
    let words: Vec<String> = transcript
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    KEYWORDS
        .iter()
        .find(|(_, keys)| words.iter().any(|w| keys.contains(&w.as_str())))
        .map(|(command, _)| *command)
}

/// Transcript reader thread.
pub struct VoiceInput {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    exited: Option<Receiver<()>>,
}

impl VoiceInput {
    /// Spawn the reader. Lines are read until EOF, a read error, or `stop()`.
    pub fn start<R>(reader: R, commands: Sender<String>, cooldown: Duration) -> Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let (exited_tx, exited_rx) = mpsc::channel();
        let thread_stop = stop.clone();
        let join = std::thread::Builder::new()
            .name("voice-input".to_string())
            .spawn(move || {
                run_reader(reader, commands, KeywordSpotter::new(cooldown), thread_stop);
                let _ = exited_tx.send(());
            })
            .map_err(|err| anyhow!("spawn voice input thread: {}", err))?;
        log::info!("voice input listening");
        Ok(Self {
            stop,
            join: Some(join),
            exited: Some(exited_rx),
        })
    }

    /// Stop reading. A reader blocked on input is detached after a short wait.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let Some(join) = self.join.take() else {
            return;
        };
        match self.exited.take().map(|rx| rx.recv_timeout(JOIN_TIMEOUT)) {
            Some(Err(RecvTimeoutError::Timeout)) => {
                log::debug!("voice input blocked on read; detaching");
            }
            _ => {
                if join.join().is_err() {
                    log::error!("voice input thread panicked");
                }
            }
        }
    }
}

impl Drop for VoiceInput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_reader<R: BufRead>(
    reader: R,
    commands: Sender<String>,
    mut spotter: KeywordSpotter,
    stop: Arc<AtomicBool>,
) {
    for line in reader.lines() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                log::warn!("voice transcript read failed: {}", err);
                break;
            }
        };
        if let Some(command) = spotter.process(&line, Instant::now()) {
            log::info!("voice keyword -> {}", command);
            if commands.send(command.as_str().to_string()).is_err() {
                break;
            }
        }
    }
    log::debug!("voice input finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn keywords_follow_priority() {
        assert_eq!(match_keywords("ok stop and quit"), Some(Command::Exit));
        assert_eq!(match_keywords("please pause, then go"), Some(Command::Stop));
        assert_eq!(match_keywords("let's begin"), Some(Command::Start));
        assert_eq!(match_keywords("RESET"), Some(Command::Reset));
        assert_eq!(match_keywords("good morning"), None);
    }

    #[test]
    fn cooldown_swallows_rapid_repeats() {
        let mut spotter = KeywordSpotter::default();
        let t0 = Instant::now();
        assert_eq!(spotter.process("start", t0), Some(Command::Start));
        assert_eq!(spotter.process("stop", t0 + Duration::from_millis(200)), None);
        assert_eq!(
            spotter.process("stop", t0 + Duration::from_millis(600)),
            Some(Command::Stop)
        );
    }

    #[test]
    fn non_matching_text_does_not_arm_cooldown() {
        let mut spotter = KeywordSpotter::default();
        let t0 = Instant::now();
        assert_eq!(spotter.process("hmm", t0), None);
        assert_eq!(spotter.process("reset", t0), Some(Command::Reset));
    }

    #[test]
    fn reader_forwards_tokens() -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let transcript = Cursor::new("start\nnothing here\nfinish\n");
        let mut input = VoiceInput::start(transcript, tx, Duration::ZERO)?;
        let first = rx.recv_timeout(Duration::from_secs(2))?;
        let second = rx.recv_timeout(Duration::from_secs(2))?;
        assert_eq!(first, "START");
        assert_eq!(second, "EXIT");
        input.stop();
        Ok(())
    }
}
