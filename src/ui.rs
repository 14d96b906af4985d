//! Terminal output for the binaries.
//!
//! `Ui::step` prints a timed step for batch commands. `LiveStatus` keeps one status line
//! updated with the trainer state while a session runs. Both fall back to plain lines on
//! stderr when not attached to a terminal.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::session::{SessionStatus, TickOutput};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: Option<&str>) -> Self {
        match flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    pub fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    pub fn step(&self, name: &str) -> StepGuard {
        if self.pretty() {
            let spinner = spinner("{spinner} {msg}");
            spinner.set_message(format!("{name}…"));
            StepGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StepGuard::new(name.to_string(), None)
        }
    }

    pub fn live_status(&self) -> LiveStatus {
        LiveStatus::new(self.pretty())
    }
}

fn spinner(template: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_draw_target(ProgressDrawTarget::stderr());
    bar.enable_steady_tick(Duration::from_millis(120));
    let style = ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    bar.set_style(style);
    bar
}

/// Prints the step's elapsed time when dropped.
pub struct StepGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StepGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StepGuard {
    fn drop(&mut self) {
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

/// Single-line session status.
pub struct LiveStatus {
    bar: Option<ProgressBar>,
    last_line: String,
}

impl LiveStatus {
    fn new(pretty: bool) -> Self {
        Self {
            bar: pretty.then(|| spinner("{spinner} {msg}")),
            last_line: String::new(),
        }
    }

    pub fn update(&mut self, tick: &TickOutput) {
        let line = status_line(tick);
        if line == self.last_line {
            return;
        }
        match &self.bar {
            Some(bar) => bar.set_message(line.clone()),
            None => eprintln!("{line}"),
        }
        self.last_line = line;
    }

    pub fn finish(&mut self, message: &str) {
        match self.bar.take() {
            Some(bar) => bar.finish_with_message(message.to_string()),
            None => eprintln!("{message}"),
        }
    }
}

/// Human-readable summary of one tick.
pub fn status_line(tick: &TickOutput) -> String {
    let snapshot = &tick.snapshot;
    let mut line = format!(
        "{} | reps {} | {}",
        if tick.active { "training" } else { "paused" },
        snapshot.reps,
        snapshot.stage.as_str()
    );
    if let Some(knee) = snapshot.knee_angle {
        line.push_str(&format!(" | knee {:.0}°", knee));
    }
    if snapshot.current_rep_failed {
        line.push_str(" | form error");
    }
    for category in &tick.errors {
        line.push_str(&format!(" | {}", category.cue()));
    }
    for notice in &tick.notices {
        line.push_str(&format!(" | {}: {}", notice.view.as_str(), notice.message()));
    }
    if tick.status != SessionStatus::Running {
        line.push_str(&format!(" | {}", tick.status.as_str()));
    }
    line
}

pub fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
