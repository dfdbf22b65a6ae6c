//! Shared SQLite store
//!
//! One connection per process, WAL mode, shared across wrapper instances and
//! out-of-band hook processes on the same host. The schema is applied
//! idempotently on open; concurrent writers serialize at the engine via the
//! busy timeout.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::warn;

use klaude_protocol::{LinkSource, SessionStatus};

/// Walking more parent links than this means the adjacency list is corrupt.
const MAX_DEPTH_WALK: u32 = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(
        "database file {path} is not readable by this build of klaude; \
         it may have been created by an incompatible version — move it aside and retry"
    )]
    AbiMismatch { path: PathBuf },

    #[error("session parent chain for {0} exceeds 100 links (cycle?)")]
    DepthCycle(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Current time as an ISO-8601 string with millisecond precision.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone)]
pub struct ProjectRow {
    pub id: i64,
    pub root_path: String,
    pub project_hash: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct InstanceRow {
    pub instance_id: String,
    pub project_id: i64,
    pub pid: i64,
    pub tty: Option<String>,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub exit_code: Option<i64>,
    pub metadata_json: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: String,
    pub project_id: i64,
    pub parent_id: Option<String>,
    pub agent_type: String,
    pub instance_id: Option<String>,
    pub title: Option<String>,
    pub prompt: Option<String>,
    pub status: SessionStatus,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub ended_at: Option<String>,
    pub last_claude_session_id: Option<String>,
    pub last_transcript_path: Option<String>,
    pub current_process_pid: Option<i64>,
    pub metadata_json: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LinkRow {
    pub id: i64,
    pub klaude_session_id: String,
    pub claude_session_id: String,
    pub transcript_path: Option<String>,
    pub source: String,
    pub started_at: String,
    pub ended_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RuntimeProcessRow {
    pub id: i64,
    pub klaude_session_id: String,
    pub pid: i64,
    pub kind: String,
    pub started_at: String,
    pub exited_at: Option<String>,
    pub exit_code: Option<i64>,
    pub is_current: bool,
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: i64,
    pub project_id: Option<i64>,
    pub klaude_session_id: Option<String>,
    pub kind: String,
    pub payload_json: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct AgentUpdateRow {
    pub id: i64,
    pub session_id: String,
    pub parent_session_id: Option<String>,
    pub update_text: String,
    pub acknowledged: bool,
    pub created_at: String,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    root_path TEXT NOT NULL UNIQUE,
    project_hash TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS instances (
    instance_id TEXT PRIMARY KEY,
    project_id INTEGER NOT NULL,
    pid INTEGER NOT NULL,
    tty TEXT,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    exit_code INTEGER,
    metadata_json TEXT
);
CREATE INDEX IF NOT EXISTS idx_instances_project ON instances(project_id);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    project_id INTEGER NOT NULL,
    parent_id TEXT,
    agent_type TEXT NOT NULL,
    instance_id TEXT,
    title TEXT,
    prompt TEXT,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT,
    ended_at TEXT,
    last_claude_session_id TEXT,
    last_transcript_path TEXT,
    current_process_pid INTEGER,
    metadata_json TEXT
);
CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_id);
CREATE INDEX IF NOT EXISTS idx_sessions_parent ON sessions(parent_id);

CREATE TABLE IF NOT EXISTS claude_session_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    klaude_session_id TEXT NOT NULL,
    claude_session_id TEXT NOT NULL UNIQUE,
    transcript_path TEXT,
    source TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_links_session ON claude_session_links(klaude_session_id);

CREATE TABLE IF NOT EXISTS runtime_processes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    klaude_session_id TEXT NOT NULL,
    pid INTEGER NOT NULL,
    kind TEXT NOT NULL,
    started_at TEXT NOT NULL,
    exited_at TEXT,
    exit_code INTEGER,
    is_current INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_runtime_processes_session ON runtime_processes(klaude_session_id);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER,
    klaude_session_id TEXT,
    kind TEXT NOT NULL,
    payload_json TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_session ON events(klaude_session_id);

CREATE TABLE IF NOT EXISTS agent_updates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    parent_session_id TEXT,
    update_text TEXT NOT NULL,
    acknowledged INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_agent_updates_parent
    ON agent_updates(parent_session_id, acknowledged);
";

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the shared database and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        match Self::init_connection(&conn) {
            Ok(()) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::NotADatabase =>
            {
                return Err(StoreError::AbiMismatch {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_connection(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;
        conn.execute_batch(SCHEMA)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|poison| poison.into_inner());
        f(&conn)
    }

    // ── Projects ─────────────────────────────────────────────────────

    pub fn upsert_project(&self, root_path: &str, hash: &str) -> Result<ProjectRow, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (root_path, project_hash, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(root_path) DO NOTHING",
                params![root_path, hash, now_iso()],
            )?;
            let row = conn.query_row(
                "SELECT id, root_path, project_hash, created_at FROM projects WHERE root_path = ?1",
                params![root_path],
                project_from_row,
            )?;
            Ok(row)
        })
    }

    pub fn get_project_by_hash(&self, hash: &str) -> Result<Option<ProjectRow>, StoreError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, root_path, project_hash, created_at
                     FROM projects WHERE project_hash = ?1",
                    params![hash],
                    project_from_row,
                )
                .optional()?)
        })
    }

    // ── Instances ────────────────────────────────────────────────────

    pub fn insert_instance(&self, row: &InstanceRow) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO instances
                    (instance_id, project_id, pid, tty, started_at, metadata_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.instance_id,
                    row.project_id,
                    row.pid,
                    row.tty,
                    row.started_at,
                    row.metadata_json,
                ],
            )?;
            Ok(())
        })
    }

    pub fn end_instance(
        &self,
        instance_id: &str,
        exit_code: Option<i64>,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE instances
                 SET ended_at = COALESCE(ended_at, ?1), exit_code = ?2
                 WHERE instance_id = ?3",
                params![now_iso(), exit_code, instance_id],
            )?;
            Ok(())
        })
    }

    // ── Sessions ─────────────────────────────────────────────────────

    pub fn create_session(&self, row: &SessionRow) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions
                    (id, project_id, parent_id, agent_type, instance_id, title, prompt,
                     status, created_at, metadata_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    row.id,
                    row.project_id,
                    row.parent_id,
                    row.agent_type,
                    row.instance_id,
                    row.title,
                    row.prompt,
                    row.status.as_str(),
                    row.created_at,
                    row.metadata_json,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_session(&self, id: &str) -> Result<Option<SessionRow>, StoreError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
                    params![id],
                    session_from_row,
                )
                .optional()?)
        })
    }

    pub fn list_sessions(&self, project_id: i64) -> Result<Vec<SessionRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM sessions WHERE project_id = ?1 ORDER BY created_at",
                SESSION_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![project_id], session_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn children_of(&self, parent_id: &str) -> Result<Vec<SessionRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM sessions WHERE parent_id = ?1 ORDER BY created_at",
                SESSION_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![parent_id], session_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Set a session's status. Terminal statuses are absorbing: a session
    /// already in one never transitions back to active/running. Returns
    /// whether a row actually changed.
    pub fn update_session_status(
        &self,
        id: &str,
        status: SessionStatus,
    ) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let changed = if status.is_terminal() {
                conn.execute(
                    "UPDATE sessions
                     SET status = ?1, updated_at = ?2, ended_at = COALESCE(ended_at, ?2)
                     WHERE id = ?3",
                    params![status.as_str(), now_iso(), id],
                )?
            } else {
                conn.execute(
                    "UPDATE sessions
                     SET status = ?1, updated_at = ?2
                     WHERE id = ?3
                       AND status NOT IN ('done', 'failed', 'interrupted', 'orphaned')",
                    params![status.as_str(), now_iso(), id],
                )?
            };
            Ok(changed > 0)
        })
    }

    /// Mark the session terminal and orphan its direct children. Individual
    /// child failures are logged and skipped so the cascade always completes.
    pub fn cascade_mark_session_ended(
        &self,
        id: &str,
        status: SessionStatus,
    ) -> Result<(), StoreError> {
        let children = self.children_of(id)?;
        self.update_session_status(id, status)?;
        for child in children {
            if child.status.is_terminal() {
                continue;
            }
            if let Err(e) = self.update_session_status(&child.id, SessionStatus::Orphaned) {
                warn!(
                    component = "store",
                    event = "store.cascade.child_failed",
                    session_id = %child.id,
                    error = %e,
                    "Failed to orphan child session"
                );
            }
        }
        Ok(())
    }

    pub fn set_session_claude_id(
        &self,
        id: &str,
        claude_session_id: &str,
        transcript_path: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions
                 SET last_claude_session_id = ?1,
                     last_transcript_path = COALESCE(?2, last_transcript_path),
                     updated_at = ?3
                 WHERE id = ?4",
                params![claude_session_id, transcript_path, now_iso(), id],
            )?;
            Ok(())
        })
    }

    pub fn set_session_current_pid(&self, id: &str, pid: Option<i64>) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET current_process_pid = ?1, updated_at = ?2 WHERE id = ?3",
                params![pid, now_iso(), id],
            )?;
            Ok(())
        })
    }

    /// Distance from the root of the session tree (root = 0), walking
    /// `parent_id` upward. Aborts once the walk is clearly cyclic.
    pub fn calculate_session_depth(&self, id: &str) -> Result<u32, StoreError> {
        let mut depth = 0u32;
        let mut current = id.to_string();
        loop {
            let session = self
                .get_session(&current)?
                .ok_or_else(|| StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))?;
            match session.parent_id {
                Some(parent) => {
                    depth += 1;
                    if depth > MAX_DEPTH_WALK {
                        return Err(StoreError::DepthCycle(id.to_string()));
                    }
                    current = parent;
                }
                None => return Ok(depth),
            }
        }
    }

    // ── Claude session links ─────────────────────────────────────────

    /// Record a link between a logical session and an underlying TUI
    /// conversation. Any other active link for the session is closed first so
    /// at most one stays open; re-linking the same conversation re-opens it.
    pub fn upsert_link(
        &self,
        klaude_session_id: &str,
        claude_session_id: &str,
        transcript_path: Option<&str>,
        source: LinkSource,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let now = now_iso();
            conn.execute(
                "UPDATE claude_session_links
                 SET ended_at = ?1
                 WHERE klaude_session_id = ?2 AND ended_at IS NULL AND claude_session_id != ?3",
                params![now, klaude_session_id, claude_session_id],
            )?;
            conn.execute(
                "INSERT INTO claude_session_links
                    (klaude_session_id, claude_session_id, transcript_path, source, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(claude_session_id) DO UPDATE SET
                    transcript_path = COALESCE(excluded.transcript_path, transcript_path),
                    ended_at = NULL",
                params![
                    klaude_session_id,
                    claude_session_id,
                    transcript_path,
                    source.as_str(),
                    now,
                ],
            )?;
            Ok(())
        })
    }

    pub fn active_link(&self, klaude_session_id: &str) -> Result<Option<LinkRow>, StoreError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, klaude_session_id, claude_session_id, transcript_path,
                            source, started_at, ended_at
                     FROM claude_session_links
                     WHERE klaude_session_id = ?1 AND ended_at IS NULL
                     ORDER BY started_at DESC, id DESC LIMIT 1",
                    params![klaude_session_id],
                    link_from_row,
                )
                .optional()?)
        })
    }

    pub fn latest_link(&self, klaude_session_id: &str) -> Result<Option<LinkRow>, StoreError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, klaude_session_id, claude_session_id, transcript_path,
                            source, started_at, ended_at
                     FROM claude_session_links
                     WHERE klaude_session_id = ?1
                     ORDER BY started_at DESC, id DESC LIMIT 1",
                    params![klaude_session_id],
                    link_from_row,
                )
                .optional()?)
        })
    }

    pub fn end_link(&self, claude_session_id: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE claude_session_links
                 SET ended_at = COALESCE(ended_at, ?1)
                 WHERE claude_session_id = ?2",
                params![now_iso(), claude_session_id],
            )?;
            Ok(())
        })
    }

    // ── Runtime processes ────────────────────────────────────────────

    /// Ledger a spawned child and make it the session's current process.
    /// `kind` is a backend name or `tui` for the foreground process.
    pub fn insert_runtime_process(
        &self,
        klaude_session_id: &str,
        pid: i64,
        kind: &str,
    ) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            let now = now_iso();
            conn.execute(
                "UPDATE runtime_processes SET is_current = 0 WHERE klaude_session_id = ?1",
                params![klaude_session_id],
            )?;
            conn.execute(
                "INSERT INTO runtime_processes
                    (klaude_session_id, pid, kind, started_at, is_current)
                 VALUES (?1, ?2, ?3, ?4, 1)",
                params![klaude_session_id, pid, kind, now],
            )?;
            let row_id = conn.last_insert_rowid();
            conn.execute(
                "UPDATE sessions SET current_process_pid = ?1, updated_at = ?2 WHERE id = ?3",
                params![pid, now, klaude_session_id],
            )?;
            Ok(row_id)
        })
    }

    /// Close the ledger row for an exited child and clear the session's
    /// current pid when it still points at that child.
    pub fn close_runtime_process(
        &self,
        klaude_session_id: &str,
        pid: i64,
        exit_code: Option<i64>,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let now = now_iso();
            conn.execute(
                "UPDATE runtime_processes
                 SET exited_at = COALESCE(exited_at, ?1), exit_code = ?2, is_current = 0
                 WHERE klaude_session_id = ?3 AND pid = ?4 AND exited_at IS NULL",
                params![now, exit_code, klaude_session_id, pid],
            )?;
            conn.execute(
                "UPDATE sessions
                 SET current_process_pid = NULL, updated_at = ?1
                 WHERE id = ?2 AND current_process_pid = ?3",
                params![now, klaude_session_id, pid],
            )?;
            Ok(())
        })
    }

    pub fn runtime_processes_for_session(
        &self,
        klaude_session_id: &str,
    ) -> Result<Vec<RuntimeProcessRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, klaude_session_id, pid, kind, started_at, exited_at,
                        exit_code, is_current
                 FROM runtime_processes WHERE klaude_session_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![klaude_session_id], runtime_process_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // ── Events ───────────────────────────────────────────────────────

    pub fn insert_event(
        &self,
        project_id: Option<i64>,
        klaude_session_id: Option<&str>,
        kind: &str,
        payload_json: Option<&str>,
    ) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (project_id, klaude_session_id, kind, payload_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![project_id, klaude_session_id, kind, payload_json, now_iso()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn events_for_session(&self, klaude_session_id: &str) -> Result<Vec<EventRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, klaude_session_id, kind, payload_json, created_at
                 FROM events WHERE klaude_session_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![klaude_session_id], event_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // ── Agent updates ────────────────────────────────────────────────

    pub fn insert_agent_update(
        &self,
        session_id: &str,
        parent_session_id: Option<&str>,
        update_text: &str,
    ) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO agent_updates
                    (session_id, parent_session_id, update_text, acknowledged, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![session_id, parent_session_id, update_text, now_iso()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn unacknowledged_updates(
        &self,
        parent_session_id: &str,
    ) -> Result<Vec<AgentUpdateRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, parent_session_id, update_text, acknowledged, created_at
                 FROM agent_updates
                 WHERE parent_session_id = ?1 AND acknowledged = 0
                 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![parent_session_id], agent_update_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn acknowledge_update(&self, id: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE agent_updates SET acknowledged = 1 WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
    }

    /// Rewire a session's parent — test scaffolding for cycle detection.
    #[cfg(test)]
    pub fn set_parent_for_test(&self, id: &str, parent: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET parent_id = ?1 WHERE id = ?2",
                params![parent, id],
            )?;
            Ok(())
        })
    }
}

const SESSION_COLUMNS: &str = "id, project_id, parent_id, agent_type, instance_id, title, prompt, \
     status, created_at, updated_at, ended_at, last_claude_session_id, \
     last_transcript_path, current_process_pid, metadata_json";

fn project_from_row(row: &Row) -> rusqlite::Result<ProjectRow> {
    Ok(ProjectRow {
        id: row.get(0)?,
        root_path: row.get(1)?,
        project_hash: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn session_from_row(row: &Row) -> rusqlite::Result<SessionRow> {
    let status_str: String = row.get(7)?;
    let status = SessionStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("unknown session status: {}", status_str).into(),
        )
    })?;
    Ok(SessionRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        parent_id: row.get(2)?,
        agent_type: row.get(3)?,
        instance_id: row.get(4)?,
        title: row.get(5)?,
        prompt: row.get(6)?,
        status,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        ended_at: row.get(10)?,
        last_claude_session_id: row.get(11)?,
        last_transcript_path: row.get(12)?,
        current_process_pid: row.get(13)?,
        metadata_json: row.get(14)?,
    })
}

fn link_from_row(row: &Row) -> rusqlite::Result<LinkRow> {
    Ok(LinkRow {
        id: row.get(0)?,
        klaude_session_id: row.get(1)?,
        claude_session_id: row.get(2)?,
        transcript_path: row.get(3)?,
        source: row.get(4)?,
        started_at: row.get(5)?,
        ended_at: row.get(6)?,
    })
}

fn runtime_process_from_row(row: &Row) -> rusqlite::Result<RuntimeProcessRow> {
    let is_current: i64 = row.get(7)?;
    Ok(RuntimeProcessRow {
        id: row.get(0)?,
        klaude_session_id: row.get(1)?,
        pid: row.get(2)?,
        kind: row.get(3)?,
        started_at: row.get(4)?,
        exited_at: row.get(5)?,
        exit_code: row.get(6)?,
        is_current: is_current != 0,
    })
}

fn event_from_row(row: &Row) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        klaude_session_id: row.get(2)?,
        kind: row.get(3)?,
        payload_json: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn agent_update_from_row(row: &Row) -> rusqlite::Result<AgentUpdateRow> {
    let acknowledged: i64 = row.get(4)?;
    Ok(AgentUpdateRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        parent_session_id: row.get(2)?,
        update_text: row.get(3)?,
        acknowledged: acknowledged != 0,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use ulid::Ulid;

    pub fn new_session(project_id: i64, parent: Option<&str>, agent_type: &str) -> SessionRow {
        SessionRow {
            id: Ulid::new().to_string(),
            project_id,
            parent_id: parent.map(String::from),
            agent_type: agent_type.to_string(),
            instance_id: None,
            title: None,
            prompt: None,
            status: SessionStatus::Active,
            created_at: now_iso(),
            updated_at: None,
            ended_at: None,
            last_claude_session_id: None,
            last_transcript_path: None,
            current_process_pid: None,
            metadata_json: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::new_session;
    use super::*;

    fn store_with_project() -> (Store, ProjectRow) {
        let store = Store::open_in_memory().expect("open store");
        let project = store.upsert_project("/p", "abc123").expect("project");
        (store, project)
    }

    #[test]
    fn upsert_project_is_idempotent() {
        let (store, project) = store_with_project();
        let again = store.upsert_project("/p", "abc123").unwrap();
        assert_eq!(project.id, again.id);
        assert_eq!(again.project_hash, "abc123");
    }

    #[test]
    fn session_round_trip() {
        let (store, project) = store_with_project();
        let session = new_session(project.id, None, "tui");
        store.create_session(&session).unwrap();
        let loaded = store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(loaded.agent_type, "tui");
        assert_eq!(loaded.status, SessionStatus::Active);
        assert!(loaded.parent_id.is_none());
    }

    #[test]
    fn terminal_status_is_monotone() {
        let (store, project) = store_with_project();
        let session = new_session(project.id, None, "tui");
        store.create_session(&session).unwrap();

        assert!(store
            .update_session_status(&session.id, SessionStatus::Done)
            .unwrap());
        assert!(!store
            .update_session_status(&session.id, SessionStatus::Running)
            .unwrap());
        let loaded = store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Done);
        assert!(loaded.ended_at.is_some());
    }

    #[test]
    fn ended_at_is_coalesced_not_overwritten() {
        let (store, project) = store_with_project();
        let session = new_session(project.id, None, "tui");
        store.create_session(&session).unwrap();

        store
            .update_session_status(&session.id, SessionStatus::Failed)
            .unwrap();
        let first = store.get_session(&session.id).unwrap().unwrap().ended_at;
        store
            .update_session_status(&session.id, SessionStatus::Orphaned)
            .unwrap();
        let second = store.get_session(&session.id).unwrap().unwrap().ended_at;
        assert_eq!(first, second);
    }

    #[test]
    fn depth_walk_counts_hops_to_root() {
        let (store, project) = store_with_project();
        let root = new_session(project.id, None, "tui");
        store.create_session(&root).unwrap();
        let child = new_session(project.id, Some(&root.id), "planner");
        store.create_session(&child).unwrap();
        let grandchild = new_session(project.id, Some(&child.id), "worker");
        store.create_session(&grandchild).unwrap();

        assert_eq!(store.calculate_session_depth(&root.id).unwrap(), 0);
        assert_eq!(store.calculate_session_depth(&child.id).unwrap(), 1);
        assert_eq!(store.calculate_session_depth(&grandchild.id).unwrap(), 2);
    }

    #[test]
    fn depth_walk_aborts_on_cycle() {
        let (store, project) = store_with_project();
        let a = new_session(project.id, None, "tui");
        store.create_session(&a).unwrap();
        let b = new_session(project.id, Some(&a.id), "planner");
        store.create_session(&b).unwrap();
        store.set_parent_for_test(&a.id, &b.id).unwrap();

        let err = store.calculate_session_depth(&a.id).unwrap_err();
        assert!(matches!(err, StoreError::DepthCycle(_)));
    }

    #[test]
    fn cascade_orphans_direct_children() {
        let (store, project) = store_with_project();
        let parent = new_session(project.id, None, "tui");
        store.create_session(&parent).unwrap();
        let child = new_session(project.id, Some(&parent.id), "planner");
        store.create_session(&child).unwrap();
        let finished = new_session(project.id, Some(&parent.id), "worker");
        store.create_session(&finished).unwrap();
        store
            .update_session_status(&finished.id, SessionStatus::Done)
            .unwrap();

        store
            .cascade_mark_session_ended(&parent.id, SessionStatus::Interrupted)
            .unwrap();

        let parent = store.get_session(&parent.id).unwrap().unwrap();
        assert_eq!(parent.status, SessionStatus::Interrupted);
        let child = store.get_session(&child.id).unwrap().unwrap();
        assert_eq!(child.status, SessionStatus::Orphaned);
        // Already-terminal children keep their status.
        let finished = store.get_session(&finished.id).unwrap().unwrap();
        assert_eq!(finished.status, SessionStatus::Done);
    }

    #[test]
    fn at_most_one_active_link_per_session() {
        let (store, project) = store_with_project();
        let session = new_session(project.id, None, "tui");
        store.create_session(&session).unwrap();

        store
            .upsert_link(&session.id, "conv-1", None, LinkSource::Startup)
            .unwrap();
        store
            .upsert_link(&session.id, "conv-2", Some("/t.jsonl"), LinkSource::Resume)
            .unwrap();

        let active = store.active_link(&session.id).unwrap().unwrap();
        assert_eq!(active.claude_session_id, "conv-2");

        let latest = store.latest_link(&session.id).unwrap().unwrap();
        assert_eq!(latest.claude_session_id, "conv-2");
    }

    #[test]
    fn upsert_link_is_idempotent_per_conversation() {
        let (store, project) = store_with_project();
        let session = new_session(project.id, None, "tui");
        store.create_session(&session).unwrap();

        store
            .upsert_link(&session.id, "conv-1", None, LinkSource::Startup)
            .unwrap();
        store.end_link("conv-1").unwrap();
        store
            .upsert_link(&session.id, "conv-1", Some("/t.jsonl"), LinkSource::Resume)
            .unwrap();

        let active = store.active_link(&session.id).unwrap().unwrap();
        assert_eq!(active.claude_session_id, "conv-1");
        assert_eq!(active.transcript_path.as_deref(), Some("/t.jsonl"));
    }

    #[test]
    fn end_link_coalesces_ended_at() {
        let (store, project) = store_with_project();
        let session = new_session(project.id, None, "tui");
        store.create_session(&session).unwrap();
        store
            .upsert_link(&session.id, "conv-1", None, LinkSource::Startup)
            .unwrap();

        store.end_link("conv-1").unwrap();
        let first = store.latest_link(&session.id).unwrap().unwrap().ended_at;
        store.end_link("conv-1").unwrap();
        let second = store.latest_link(&session.id).unwrap().unwrap().ended_at;
        assert_eq!(first, second);
        assert!(store.active_link(&session.id).unwrap().is_none());
    }

    #[test]
    fn runtime_process_ledger_tracks_current() {
        let (store, project) = store_with_project();
        let session = new_session(project.id, None, "planner");
        store.create_session(&session).unwrap();

        store
            .insert_runtime_process(&session.id, 4242, "codex")
            .unwrap();
        let loaded = store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(loaded.current_process_pid, Some(4242));

        store
            .close_runtime_process(&session.id, 4242, Some(0))
            .unwrap();
        let loaded = store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(loaded.current_process_pid, None);

        let rows = store.runtime_processes_for_session(&session.id).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].exited_at.is_some());
        assert_eq!(rows[0].exit_code, Some(0));
        assert!(!rows[0].is_current);
    }

    #[test]
    fn event_ids_strictly_increase() {
        let (store, project) = store_with_project();
        let session = new_session(project.id, None, "tui");
        store.create_session(&session).unwrap();

        let a = store
            .insert_event(Some(project.id), Some(&session.id), "wrapper.start", None)
            .unwrap();
        let b = store
            .insert_event(
                Some(project.id),
                Some(&session.id),
                "wrapper.tui.spawned",
                Some("{\"pid\":1}"),
            )
            .unwrap();
        assert!(b > a);

        let events = store.events_for_session(&session.id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, "wrapper.start");
        assert_eq!(events[1].kind, "wrapper.tui.spawned");
    }

    #[test]
    fn agent_updates_queue_round_trip() {
        let (store, project) = store_with_project();
        let parent = new_session(project.id, None, "tui");
        store.create_session(&parent).unwrap();
        let child = new_session(project.id, Some(&parent.id), "worker");
        store.create_session(&child).unwrap();

        store
            .insert_agent_update(&child.id, Some(&parent.id), "pass 1/3 done")
            .unwrap();
        let pending = store.unacknowledged_updates(&parent.id).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].update_text, "pass 1/3 done");
        assert!(!pending[0].acknowledged);

        store.acknowledge_update(pending[0].id).unwrap();
        assert!(store.unacknowledged_updates(&parent.id).unwrap().is_empty());
    }
}
