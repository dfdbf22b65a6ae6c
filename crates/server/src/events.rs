//! Event recording
//!
//! Every session-state mutation funnels through here: one row in the shared
//! `events` table plus one JSON line in the per-session log file. The row is
//! authoritative — a failed file append is logged and swallowed, a failed
//! insert propagates to the caller.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::warn;

use crate::store::{now_iso, Store, StoreError};

pub struct EventRecorder {
    store: Arc<Store>,
    projects_dir: PathBuf,
    project_hash: String,
    project_id: i64,
}

impl EventRecorder {
    pub fn new(
        store: Arc<Store>,
        projects_dir: PathBuf,
        project_hash: String,
        project_id: i64,
    ) -> Self {
        Self {
            store,
            projects_dir,
            project_hash,
            project_id,
        }
    }

    /// Record one event for a session. Returns the event row id.
    ///
    /// Callers that must not unwind (exit handlers, the checkout state
    /// machine) use [`EventRecorder::record_quiet`] instead.
    pub fn record(&self, session_id: &str, kind: &str, payload: Value) -> Result<i64, StoreError> {
        let payload_json = if payload.is_null() {
            None
        } else {
            Some(serde_json::to_string(&payload)?)
        };
        let id = self.store.insert_event(
            Some(self.project_id),
            Some(session_id),
            kind,
            payload_json.as_deref(),
        )?;

        if let Err(e) = self.append_log_line(session_id, kind, &payload) {
            warn!(
                component = "events",
                event = "events.log_append_failed",
                session_id = %session_id,
                kind = %kind,
                error = %e,
                "Failed to append session log line"
            );
        }

        Ok(id)
    }

    /// Record and swallow any failure (logged only).
    pub fn record_quiet(&self, session_id: &str, kind: &str, payload: Value) {
        if let Err(e) = self.record(session_id, kind, payload) {
            warn!(
                component = "events",
                event = "events.record_failed",
                session_id = %session_id,
                kind = %kind,
                error = %e,
                "Failed to record event"
            );
        }
    }

    /// Path of a session's JSONL log file.
    pub fn log_path(&self, session_id: &str) -> PathBuf {
        crate::paths::session_log_path(&self.projects_dir, &self.project_hash, session_id)
    }

    fn append_log_line(
        &self,
        session_id: &str,
        kind: &str,
        payload: &Value,
    ) -> std::io::Result<()> {
        let path = self.log_path(session_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = json!({
            "timestamp": now_iso(),
            "kind": kind,
            "payload": payload,
        });
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        writeln!(file, "{}", line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::new_session;

    fn recorder() -> (EventRecorder, Arc<Store>, String, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(Store::open_in_memory().expect("store"));
        let project = store.upsert_project("/p", "abc123").unwrap();
        let session = new_session(project.id, None, "tui");
        store.create_session(&session).unwrap();
        let recorder = EventRecorder::new(
            store.clone(),
            dir.path().to_path_buf(),
            "abc123".into(),
            project.id,
        );
        (recorder, store, session.id, dir)
    }

    #[test]
    fn record_writes_row_and_log_line() {
        let (recorder, store, session_id, _dir) = recorder();

        recorder
            .record(&session_id, "wrapper.start", json!({"pid": 42}))
            .unwrap();
        recorder
            .record(&session_id, "wrapper.tui.spawned", Value::Null)
            .unwrap();

        let events = store.events_for_session(&session_id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, "wrapper.start");
        assert_eq!(events[0].payload_json.as_deref(), Some("{\"pid\":42}"));
        assert!(events[1].payload_json.is_none());

        let content = std::fs::read_to_string(recorder.log_path(&session_id)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["kind"], "wrapper.start");
        assert_eq!(first["payload"]["pid"], 42);
        assert!(first["timestamp"].is_string());
    }

    #[test]
    fn log_line_order_matches_event_id_order() {
        let (recorder, store, session_id, _dir) = recorder();
        for i in 0..5 {
            recorder
                .record(&session_id, "agent.runtime.log", json!({"seq": i}))
                .unwrap();
        }
        let events = store.events_for_session(&session_id).unwrap();
        let content = std::fs::read_to_string(recorder.log_path(&session_id)).unwrap();
        for (event, line) in events.iter().zip(content.lines()) {
            let parsed: Value = serde_json::from_str(line).unwrap();
            let db_payload: Value =
                serde_json::from_str(event.payload_json.as_deref().unwrap()).unwrap();
            assert_eq!(parsed["payload"], db_payload);
        }
    }

    #[test]
    fn log_round_trip_preserves_kind_and_payload() {
        let (recorder, _store, session_id, _dir) = recorder();
        let payload = json!({"nested": {"a": [1, 2, 3]}, "text": "hé"});
        recorder
            .record(&session_id, "agent.runtime.message", payload.clone())
            .unwrap();

        let content = std::fs::read_to_string(recorder.log_path(&session_id)).unwrap();
        let parsed: Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["kind"], "agent.runtime.message");
        assert_eq!(parsed["payload"], payload);
    }
}
