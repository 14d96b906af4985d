use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::trainer::ErrorCategory;

pub type UserId = i64;
pub type SessionId = i64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub created_at: i64,
}

/// One row of a user's training history, newest first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub reps: u32,
    pub error_count: u32,
}

/// Persistence for users, sessions and their form errors.
pub trait SessionStore {
    fn start_session(&mut self, user: UserId) -> Result<SessionId>;

    fn log_error(&mut self, session: SessionId, category: ErrorCategory) -> Result<()>;

    /// Close a session. `report_json` is the serialized `SessionReport`, absent when the
    /// session ended abnormally.
    fn end_session(
        &mut self,
        session: SessionId,
        total_reps: u32,
        report_json: Option<&str>,
    ) -> Result<()>;

    /// Insert a user. Returns `None` when the name is taken.
    fn add_user(&mut self, name: &str) -> Result<Option<UserId>>;

    fn get_users(&mut self) -> Result<Vec<User>>;

    /// Id of the named user, creating it if needed.
    fn ensure_user(&mut self, name: &str) -> Result<UserId>;

    fn user_history(&mut self, user: UserId) -> Result<Vec<SessionSummary>>;

    /// Stored report of a finished session, if one was written.
    fn session_report(&mut self, session: SessionId) -> Result<Option<String>>;
}

pub(crate) fn now_s() -> Result<i64> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| anyhow!("system clock is before unix epoch"))?
        .as_secs();
    i64::try_from(secs).map_err(|_| anyhow!("timestamp exceeds i64 range"))
}

fn clean_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("user name must not be empty"));
    }
    Ok(name)
}

// ----------------------------------------------------------------------------
// SQLite
// ----------------------------------------------------------------------------

pub struct SqliteSessionStore {
    conn: Connection,
}

impl SqliteSessionStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open session database {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory session database")?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS users (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT UNIQUE NOT NULL,
              created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              user_id INTEGER NOT NULL REFERENCES users(id),
              start_time INTEGER NOT NULL,
              end_time INTEGER,
              reps INTEGER NOT NULL DEFAULT 0,
              report_json TEXT
            );

            CREATE TABLE IF NOT EXISTS error_logs (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              session_id INTEGER NOT NULL REFERENCES sessions(id),
              error_type TEXT NOT NULL,
              timestamp INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_errors_session ON error_logs(session_id);
            "#,
        )?;
        Ok(())
    }

    fn find_user(&self, name: &str) -> Result<Option<UserId>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM users WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

impl SessionStore for SqliteSessionStore {
    fn start_session(&mut self, user: UserId) -> Result<SessionId> {
        self.conn
            .execute(
                "INSERT INTO sessions(user_id, start_time, reps) VALUES (?1, ?2, 0)",
                params![user, now_s()?],
            )
            .with_context(|| format!("start session for user {}", user))?;
        Ok(self.conn.last_insert_rowid())
    }

    fn log_error(&mut self, session: SessionId, category: ErrorCategory) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO error_logs(session_id, error_type, timestamp) VALUES (?1, ?2, ?3)",
                params![session, category.label(), now_s()?],
            )
            .with_context(|| format!("log {} for session {}", category, session))?;
        Ok(())
    }

    fn end_session(
        &mut self,
        session: SessionId,
        total_reps: u32,
        report_json: Option<&str>,
    ) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE sessions SET end_time = ?1, reps = ?2, report_json = ?3 WHERE id = ?4",
            params![now_s()?, total_reps, report_json, session],
        )?;
        if updated == 0 {
            return Err(anyhow!("unknown session {}", session));
        }
        Ok(())
    }

    fn add_user(&mut self, name: &str) -> Result<Option<UserId>> {
        let name = clean_name(name)?;
        if self.find_user(name)?.is_some() {
            return Ok(None);
        }
        self.conn.execute(
            "INSERT INTO users(name, created_at) VALUES (?1, ?2)",
            params![name, now_s()?],
        )?;
        Ok(Some(self.conn.last_insert_rowid()))
    }

    fn get_users(&mut self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM users ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(User {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        let mut users = Vec::new();
        for user in rows {
            users.push(user?);
        }
        Ok(users)
    }

    fn ensure_user(&mut self, name: &str) -> Result<UserId> {
        let name = clean_name(name)?;
        if let Some(id) = self.find_user(name)? {
            return Ok(id);
        }
        self.add_user(name)?
            .ok_or_else(|| anyhow!("user {} vanished during insert", name))
    }

    fn user_history(&mut self, user: UserId) -> Result<Vec<SessionSummary>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT s.id, s.start_time, s.end_time, s.reps, COUNT(e.id)
            FROM sessions s
            LEFT JOIN error_logs e ON s.id = e.session_id
            WHERE s.user_id = ?1
            GROUP BY s.id
            ORDER BY s.start_time DESC, s.id DESC
            "#,
        )?;
        let rows = stmt.query_map(params![user], |row| {
            Ok(SessionSummary {
                session_id: row.get(0)?,
                started_at: row.get(1)?,
                ended_at: row.get(2)?,
                reps: row.get(3)?,
                error_count: row.get(4)?,
            })
        })?;
        let mut history = Vec::new();
        for summary in rows {
            history.push(summary?);
        }
        Ok(history)
    }

    fn session_report(&mut self, session: SessionId) -> Result<Option<String>> {
        let report: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT report_json FROM sessions WHERE id = ?1",
                params![session],
                |row| row.get(0),
            )
            .optional()?;
        match report {
            Some(report) => Ok(report),
            None => Err(anyhow!("unknown session {}", session)),
        }
    }
}

// ----------------------------------------------------------------------------
// In-memory
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct InMemorySession {
    id: SessionId,
    user: UserId,
    started_at: i64,
    ended_at: Option<i64>,
    reps: u32,
    report_json: Option<String>,
    errors: Vec<ErrorCategory>,
}

/// Store used by tests and dry runs.
#[derive(Clone, Debug, Default)]
pub struct InMemorySessionStore {
    users: Vec<User>,
    sessions: Vec<InMemorySession>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors logged for a session, in order.
    pub fn errors(&self, session: SessionId) -> Vec<ErrorCategory> {
        self.sessions
            .iter()
            .find(|s| s.id == session)
            .map(|s| s.errors.clone())
            .unwrap_or_default()
    }

    pub fn is_ended(&self, session: SessionId) -> bool {
        self.sessions
            .iter()
            .any(|s| s.id == session && s.ended_at.is_some())
    }

    fn session_mut(&mut self, session: SessionId) -> Result<&mut InMemorySession> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == session)
            .ok_or_else(|| anyhow!("unknown session {}", session))
    }
}

impl SessionStore for InMemorySessionStore {
    fn start_session(&mut self, user: UserId) -> Result<SessionId> {
        if !self.users.iter().any(|u| u.id == user) {
            return Err(anyhow!("unknown user {}", user));
        }
        let id = self.sessions.len() as SessionId + 1;
        self.sessions.push(InMemorySession {
            id,
            user,
            started_at: now_s()?,
            ended_at: None,
            reps: 0,
            report_json: None,
            errors: Vec::new(),
        });
        Ok(id)
    }

    fn log_error(&mut self, session: SessionId, category: ErrorCategory) -> Result<()> {
        self.session_mut(session)?.errors.push(category);
        Ok(())
    }

    fn end_session(
        &mut self,
        session: SessionId,
        total_reps: u32,
        report_json: Option<&str>,
    ) -> Result<()> {
        let ended_at = now_s()?;
        let entry = self.session_mut(session)?;
        entry.ended_at = Some(ended_at);
        entry.reps = total_reps;
        entry.report_json = report_json.map(str::to_string);
        Ok(())
    }

    fn add_user(&mut self, name: &str) -> Result<Option<UserId>> {
        let name = clean_name(name)?;
        if self.users.iter().any(|u| u.name == name) {
            return Ok(None);
        }
        let id = self.users.len() as UserId + 1;
        self.users.push(User {
            id,
            name: name.to_string(),
            created_at: now_s()?,
        });
        Ok(Some(id))
    }

    fn get_users(&mut self) -> Result<Vec<User>> {
        Ok(self.users.clone())
    }

    fn ensure_user(&mut self, name: &str) -> Result<UserId> {
        let name = clean_name(name)?;
        if let Some(user) = self.users.iter().find(|u| u.name == name) {
            return Ok(user.id);
        }
        self.add_user(name)?
            .ok_or_else(|| anyhow!("user {} vanished during insert", name))
    }

    fn user_history(&mut self, user: UserId) -> Result<Vec<SessionSummary>> {
        let mut history: Vec<SessionSummary> = self
            .sessions
            .iter()
            .filter(|s| s.user == user)
            .map(|s| SessionSummary {
                session_id: s.id,
                started_at: s.started_at,
                ended_at: s.ended_at,
                reps: s.reps,
                error_count: s.errors.len() as u32,
            })
            .collect();
        history.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then(b.session_id.cmp(&a.session_id))
        });
        Ok(history)
    }

    fn session_report(&mut self, session: SessionId) -> Result<Option<String>> {
        Ok(self.session_mut(session)?.report_json.clone())
    }
}
