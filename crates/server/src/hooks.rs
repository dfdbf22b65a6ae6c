//! Out-of-band hook handlers
//!
//! The TUI invokes `klaude hook session-start` / `session-end` as separate
//! processes. Coordination with the wrapper is entirely through the shared
//! database and the `KLAUDE_*` env vars exported at TUI spawn. Handlers must
//! exit 0 no matter what so the TUI never blocks on them; failures go to
//! stderr only.

use std::io::Read;

use serde::Deserialize;

use crate::paths;
use crate::store::Store;
use klaude_protocol::LinkSource;

/// Payload the TUI writes to the hook's stdin.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HookPayload {
    session_id: Option<String>,
    transcript_path: Option<String>,
    /// `startup` | `resume` on session-start.
    source: Option<String>,
    /// Some TUIs put the subtype here instead.
    hook_event_name: Option<String>,
}

fn read_stdin_payload() -> HookPayload {
    let mut raw = String::new();
    if std::io::stdin().read_to_string(&mut raw).is_err() || raw.trim().is_empty() {
        return HookPayload::default();
    }
    serde_json::from_str(&raw).unwrap_or_default()
}

struct HookContext {
    session_id: String,
    payload: HookPayload,
    store: Store,
}

/// Resolve the calling session from the environment and open the store.
fn hook_context() -> Result<HookContext, String> {
    let session_id =
        std::env::var("KLAUDE_SESSION_ID").map_err(|_| "KLAUDE_SESSION_ID not set".to_string())?;
    // Presence of the other exports distinguishes wrapper-spawned TUIs from
    // bare ones; a bare TUI gets a silent no-op.
    std::env::var("KLAUDE_INSTANCE_ID").map_err(|_| "KLAUDE_INSTANCE_ID not set".to_string())?;

    let payload = read_stdin_payload();
    let store = Store::open(&paths::db_path()).map_err(|e| e.to_string())?;
    Ok(HookContext {
        session_id,
        payload,
        store,
    })
}

/// `session-start`: upsert a claude-session link and cache the conversation
/// id on the session row. Always exits 0.
pub fn run_session_start() -> i32 {
    let ctx = match hook_context() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("klaude hook session-start: {}", e);
            return 0;
        }
    };

    let Some(claude_session_id) = ctx.payload.session_id.clone() else {
        eprintln!("klaude hook session-start: payload has no session_id");
        return 0;
    };

    let source = match ctx
        .payload
        .source
        .as_deref()
        .or(ctx.payload.hook_event_name.as_deref())
    {
        Some("resume") | Some("SessionResume") => LinkSource::Resume,
        _ => LinkSource::Startup,
    };

    if let Err(e) = ctx.store.upsert_link(
        &ctx.session_id,
        &claude_session_id,
        ctx.payload.transcript_path.as_deref(),
        source,
    ) {
        eprintln!("klaude hook session-start: {}", e);
        return 0;
    }
    if let Err(e) = ctx.store.set_session_claude_id(
        &ctx.session_id,
        &claude_session_id,
        ctx.payload.transcript_path.as_deref(),
    ) {
        eprintln!("klaude hook session-start: {}", e);
    }
    0
}

/// `session-end`: close the matching link. Always exits 0.
pub fn run_session_end() -> i32 {
    let ctx = match hook_context() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("klaude hook session-end: {}", e);
            return 0;
        }
    };

    let Some(claude_session_id) = ctx.payload.session_id else {
        eprintln!("klaude hook session-end: payload has no session_id");
        return 0;
    };

    if let Err(e) = ctx.store.end_link(&claude_session_id) {
        eprintln!("klaude hook session-end: {}", e);
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::new_session;

    #[test]
    fn session_start_payload_parses_loosely() {
        let payload: HookPayload = serde_json::from_str(
            r#"{"session_id": "tui-conv-001", "transcript_path": "/t.jsonl",
                "source": "startup", "unknown_field": 1}"#,
        )
        .unwrap();
        assert_eq!(payload.session_id.as_deref(), Some("tui-conv-001"));
        assert_eq!(payload.transcript_path.as_deref(), Some("/t.jsonl"));
        assert_eq!(payload.source.as_deref(), Some("startup"));
    }

    #[test]
    fn start_then_end_closes_the_link() {
        // Exercises the same store calls the handlers make, without the
        // process-global env plumbing.
        let store = Store::open_in_memory().unwrap();
        let project = store.upsert_project("/p", "h").unwrap();
        let session = new_session(project.id, None, "tui");
        store.create_session(&session).unwrap();

        store
            .upsert_link(&session.id, "tui-conv-001", None, LinkSource::Startup)
            .unwrap();
        store
            .set_session_claude_id(&session.id, "tui-conv-001", None)
            .unwrap();

        let loaded = store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(
            loaded.last_claude_session_id.as_deref(),
            Some("tui-conv-001")
        );
        assert!(store.active_link(&session.id).unwrap().is_some());

        store.end_link("tui-conv-001").unwrap();
        assert!(store.active_link(&session.id).unwrap().is_none());
    }
}
