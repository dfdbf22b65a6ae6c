//! Wrapper instance composition root
//!
//! Owns startup and shutdown: store, project and instance rows, root session,
//! socket server, foreground TUI, and the shared mutable state every handler
//! works against. One orchestrator per process.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::WrapperError;
use crate::events::EventRecorder;
use crate::paths;
use crate::registry;
use crate::runtime::RuntimeEntry;
use crate::store::{now_iso, InstanceRow, ProjectRow, SessionRow, Store};
use klaude_protocol::server::{CheckoutResult, PingResult, StatusResult};
use klaude_protocol::{events, InstanceInfo, SessionStatus};

/// Foreground TUI process handle. The generation distinguishes a relaunched
/// TUI from the one an exit callback was registered for.
#[derive(Debug, Clone, Copy)]
pub struct TuiHandle {
    pub pid: u32,
    pub generation: u64,
}

/// One-shot completion handle for an in-flight checkout.
pub struct PendingSwitch {
    pub target_session_id: String,
    pub resume_claude_session_id: String,
    pub resolve: oneshot::Sender<Result<CheckoutResult, WrapperError>>,
}

/// In-memory state guarded by the orchestrator mutex. Exactly one task
/// mutates it at a time; handlers hold the lock across their awaits so the
/// checkout state machine is strictly serialized.
pub struct WrapperState {
    pub current_session_id: String,
    pub tui: Option<TuiHandle>,
    pub pending_switch: Option<PendingSwitch>,
    pub next_generation: u64,
    pub shutting_down: bool,
}

pub struct Orchestrator {
    pub config: Config,
    pub store: Arc<Store>,
    pub recorder: Arc<EventRecorder>,
    pub project: ProjectRow,
    pub project_root: PathBuf,
    pub instance_id: String,
    pub root_session_id: String,
    pub socket_path: PathBuf,
    /// Persistent TUI flags captured at instance creation, replayed on every
    /// relaunch.
    pub tui_flags: Vec<String>,
    pub state: Mutex<WrapperState>,
    /// Live (or retrying) agent runtimes keyed by session id.
    pub runtimes: DashMap<String, RuntimeEntry>,
    exit_tx: watch::Sender<Option<i32>>,
    exit_rx: watch::Receiver<Option<i32>>,
}

impl Orchestrator {
    /// Build the orchestrator: open the store, register project/instance/root
    /// session rows. Does not bind the socket or spawn the TUI — `run` does.
    pub fn initialize(
        project_root: PathBuf,
        config: Config,
        tui_flags: Vec<String>,
    ) -> anyhow::Result<Arc<Self>> {
        let store = Arc::new(Store::open(&paths::db_path())?);

        let root_str = project_root.to_string_lossy().to_string();
        let project_hash = paths::project_hash(&project_root);
        let project = store.upsert_project(&root_str, &project_hash)?;

        let instance_id = ulid::Ulid::new().to_string();
        let metadata = json!({ "claudeFlags": tui_flags });
        store.insert_instance(&InstanceRow {
            instance_id: instance_id.clone(),
            project_id: project.id,
            pid: std::process::id() as i64,
            tty: std::env::var("TTY").ok(),
            started_at: now_iso(),
            ended_at: None,
            exit_code: None,
            metadata_json: Some(metadata.to_string()),
        })?;

        let root_session_id = ulid::Ulid::new().to_string();
        store.create_session(&SessionRow {
            id: root_session_id.clone(),
            project_id: project.id,
            parent_id: None,
            agent_type: "tui".to_string(),
            instance_id: Some(instance_id.clone()),
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
        })?;

        let recorder = Arc::new(EventRecorder::new(
            store.clone(),
            config.projects_dir(),
            project_hash.clone(),
            project.id,
        ));

        let socket_path = paths::socket_path(&config.socket_dir(), &project_hash, &instance_id);

        let (exit_tx, exit_rx) = watch::channel(None);

        Ok(Arc::new(Self {
            config,
            store,
            recorder,
            project,
            project_root,
            instance_id,
            root_session_id: root_session_id.clone(),
            socket_path,
            tui_flags,
            state: Mutex::new(WrapperState {
                current_session_id: root_session_id,
                tui: None,
                pending_switch: None,
                next_generation: 0,
                shutting_down: false,
            }),
            runtimes: DashMap::new(),
            exit_tx,
            exit_rx,
        }))
    }

    /// Run the wrapper to completion; returns the process exit code.
    pub async fn run(self: &Arc<Self>) -> anyhow::Result<i32> {
        let listener = crate::socket::bind(&self.socket_path)?;
        registry::register_instance(
            &self.project.project_hash,
            InstanceInfo {
                instance_id: self.instance_id.clone(),
                pid: std::process::id(),
                socket_path: self.socket_path.to_string_lossy().to_string(),
                started_at: now_iso(),
                tty: std::env::var("TTY").ok(),
            },
        )?;

        let serve_orch = self.clone();
        tokio::spawn(async move {
            crate::socket::serve(listener, serve_orch).await;
        });

        self.recorder.record_quiet(
            &self.root_session_id,
            events::WRAPPER_START,
            json!({
                "instanceId": self.instance_id,
                "pid": std::process::id(),
                "projectRoot": self.project_root.to_string_lossy(),
            }),
        );

        // Fresh launch: no resume id, so block on the session-start hook.
        if let Err(e) = self.launch_foreground_tui(None).await {
            warn!(
                component = "orchestrator",
                event = "orchestrator.tui_launch_failed",
                error = %e,
                "Initial TUI launch failed"
            );
            // A hook timeout leaves the TUI child alive; take it down before
            // releasing the terminal. Clearing the handle also disarms the
            // exit callback so this path owns finalization.
            {
                let mut state = self.state.lock().await;
                if let Some(tui) = state.tui.take() {
                    crate::tui::send_signal(tui.pid, libc::SIGTERM);
                }
            }
            self.finalize_instance(1).await;
            return Err(anyhow::anyhow!("{}", e));
        }

        crate::updates::spawn_update_watcher(self.clone());

        // SIGTERM to the wrapper forwards to the TUI; the normal exit path
        // then finalizes the instance.
        let signal_orch = self.clone();
        tokio::spawn(async move {
            let Ok(mut sigterm) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            else {
                return;
            };
            sigterm.recv().await;
            let state = signal_orch.state.lock().await;
            if let Some(tui) = state.tui {
                crate::tui::send_signal(tui.pid, libc::SIGTERM);
            }
        });

        let mut exit_rx = self.exit_rx.clone();
        loop {
            if let Some(code) = *exit_rx.borrow() {
                return Ok(code);
            }
            if exit_rx.changed().await.is_err() {
                return Ok(1);
            }
        }
    }

    /// End the instance: stop runtimes, close rows, release the socket and
    /// registry entry, and unblock `run`.
    pub async fn finalize_instance(self: &Arc<Self>, exit_code: i32) {
        {
            let mut state = self.state.lock().await;
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }

        let session_ids: Vec<String> = self.runtimes.iter().map(|e| e.key().clone()).collect();
        for session_id in session_ids {
            if let Err(e) = self.ensure_agent_runtime_stopped(&session_id, 5.0).await {
                warn!(
                    component = "orchestrator",
                    event = "orchestrator.runtime_stop_failed",
                    session_id = %session_id,
                    error = %e,
                    "Failed to stop agent runtime during shutdown"
                );
            }
        }

        if let Err(e) = self.store.end_instance(&self.instance_id, Some(exit_code as i64)) {
            warn!(
                component = "orchestrator",
                event = "orchestrator.instance_end_failed",
                error = %e,
                "Failed to mark instance ended"
            );
        }

        self.recorder.record_quiet(
            &self.root_session_id,
            events::WRAPPER_FINALIZED,
            json!({ "exitCode": exit_code }),
        );

        if let Err(e) = registry::unregister_instance(&self.project.project_hash, &self.instance_id)
        {
            warn!(
                component = "orchestrator",
                event = "orchestrator.registry_cleanup_failed",
                error = %e,
                "Failed to remove registry entry"
            );
        }
        let _ = std::fs::remove_file(&self.socket_path);

        info!(
            component = "orchestrator",
            event = "orchestrator.finalized",
            instance_id = %self.instance_id,
            exit_code = exit_code,
            "Wrapper instance finalized"
        );
        let _ = self.exit_tx.send(Some(exit_code));
    }

    // ── Simple request handlers ──────────────────────────────────────

    pub fn handle_ping(&self) -> PingResult {
        PingResult {
            pong: true,
            timestamp: now_iso(),
        }
    }

    pub async fn handle_status(&self) -> Result<StatusResult, WrapperError> {
        let state = self.state.lock().await;
        let session = self
            .store
            .get_session(&state.current_session_id)?
            .ok_or_else(|| WrapperError::session_not_found(&state.current_session_id))?;
        Ok(StatusResult {
            instance_id: self.instance_id.clone(),
            project_root: self.project_root.to_string_lossy().to_string(),
            project_hash: self.project.project_hash.clone(),
            session_id: session.id,
            session_status: session.status,
            tui_pid: state.tui.map(|t| t.pid),
            agent_runtimes: self.runtimes.len(),
            switching: state.pending_switch.is_some(),
        })
    }

    /// Look up a session and require it to belong to this project.
    pub fn require_session(&self, session_id: &str) -> Result<SessionRow, WrapperError> {
        let session = self
            .store
            .get_session(session_id)?
            .ok_or_else(|| WrapperError::session_not_found(session_id))?;
        if session.project_id != self.project.id {
            return Err(WrapperError::new(
                klaude_protocol::ErrorCode::SessionProjectMismatch,
                format!("session {} belongs to another project", session_id),
            ));
        }
        Ok(session)
    }
}

/// Last 6 chars of a ULID, exported as `KLAUDE_SESSION_ID_SHORT`.
pub fn short_session_id(session_id: &str) -> &str {
    let len = session_id.len();
    &session_id[len.saturating_sub(6)..]
}
