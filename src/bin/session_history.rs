//! session_history - inspect stored users, sessions and session reports

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;

use lunge_guard::storage::{SessionStore, SqliteSessionStore};
use lunge_guard::trainer::{ErrorCategory, SessionReport};
use lunge_guard::ui::{Ui, UiMode};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the session database.
    #[arg(long, env = "LUNGE_GUARD_DB_PATH", default_value = "lunge_guard.db")]
    db_path: String,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// List registered users.
    Users,
    /// Register a new user.
    AddUser {
        #[arg(long)]
        name: String,
    },
    /// List a user's sessions, newest first.
    History {
        #[arg(long)]
        user: String,
    },
    /// Summarize a finished session's report.
    Report {
        #[arg(long)]
        session: i64,
    },
    /// Write a session's report JSON to a file.
    Export {
        #[arg(long)]
        session: i64,
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = Ui::new(UiMode::parse(Some(&args.ui)), std::io::stderr().is_terminal());

    let mut store = {
        let _step = ui.step("Open session database");
        SqliteSessionStore::open(&args.db_path)?
    };

    match args.command {
        Action::Users => {
            for user in store.get_users()? {
                println!("{}\t{}\t{}", user.id, user.name, user.created_at);
            }
        }
        Action::AddUser { name } => match store.add_user(&name)? {
            Some(id) => println!("added user '{}' (id {})", name.trim(), id),
            None => return Err(anyhow!("user '{}' already exists", name.trim())),
        },
        Action::History { user } => {
            let users = store.get_users()?;
            let found = users
                .iter()
                .find(|u| u.name == user.trim())
                .ok_or_else(|| anyhow!("unknown user '{}'", user.trim()))?;
            let history = {
                let _step = ui.step("Load history");
                store.user_history(found.id)?
            };
            println!("session\tstarted\tended\treps\terrors");
            for row in history {
                let ended = row
                    .ended_at
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    row.session_id, row.started_at, ended, row.reps, row.error_count
                );
            }
        }
        Action::Report { session } => {
            let report = load_report(&mut store, session)?;
            println!("session {}", session);
            println!("reps: {}", report.total_reps());
            println!("duration: {:.1}s", report.duration());
            for category in ErrorCategory::ALL {
                println!("{}: {}", category.label(), report.error_count(category));
            }
            for marker in report.error_markers() {
                let knee = marker
                    .knee_angle
                    .map(|a| format!("{:.1}", a))
                    .unwrap_or_else(|| "-".to_string());
                println!("  t={:.2}s {} (knee {})", marker.t, marker.category.label(), knee);
            }
        }
        Action::Export { session, out } => {
            let report = load_report(&mut store, session)?;
            let _step = ui.step("Write report");
            let json = serde_json::to_string_pretty(&report)?;
            std::fs::write(&out, json)
                .map_err(|e| anyhow!("failed to write {}: {}", out.display(), e))?;
            eprintln!("wrote {}", out.display());
        }
    }
    Ok(())
}

fn load_report(store: &mut dyn SessionStore, session: i64) -> Result<SessionReport> {
    let json = store
        .session_report(session)?
        .ok_or_else(|| anyhow!("session {} has no stored report", session))?;
    SessionReport::from_json(&json)
}
