//! Session control commands and the two channels they arrive on.

use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::{Receiver, TryRecvError};

use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Start,
    Stop,
    Reset,
    Exit,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Start => "START",
            Command::Stop => "STOP",
            Command::Reset => "RESET",
            Command::Exit => "EXIT",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "START" => Ok(Command::Start),
            "STOP" => Ok(Command::Stop),
            "RESET" => Ok(Command::Reset),
            "EXIT" => Ok(Command::Exit),
            other => Err(anyhow!("unknown command '{}'", other)),
        }
    }
}

/// Non-blocking reader over the GUI and voice command channels.
///
/// The GUI channel is always drained first. At most one command is returned per poll;
/// unrecognized tokens are discarded.
#[derive(Default)]
pub struct CommandBus {
    gui: Option<Receiver<String>>,
    voice: Option<Receiver<String>>,
}

impl CommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gui(mut self, gui: Receiver<String>) -> Self {
        self.gui = Some(gui);
        self
    }

    pub fn with_voice(mut self, voice: Receiver<String>) -> Self {
        self.voice = Some(voice);
        self
    }

    pub fn poll(&mut self) -> Option<Command> {
        poll_channel(&mut self.gui, "gui").or_else(|| poll_channel(&mut self.voice, "voice"))
    }
}

fn poll_channel(slot: &mut Option<Receiver<String>>, label: &str) -> Option<Command> {
    let rx = slot.as_ref()?;
    loop {
        match rx.try_recv() {
            Ok(token) => match token.parse::<Command>() {
                Ok(command) => {
                    log::info!("{} command: {}", label, command);
                    return Some(command);
                }
                Err(_) => log::debug!("ignoring {} token '{}'", label, token.trim()),
            },
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => {
                log::debug!("{} command channel closed", label);
                *slot = None;
                return None;
            }
        }
    }
}
