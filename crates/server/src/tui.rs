//! Foreground TUI lifecycle and the checkout state machine
//!
//! The TUI child inherits the terminal; the wrapper tracks it by pid and
//! generation. Checkout atomically swaps the foreground to another session:
//! resolve a resume id, stop the target's headless runtime, SIGTERM the
//! current TUI under a grace timer, and relaunch with `--resume` once the old
//! process is gone. At most one switch is ever outstanding.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::error::WrapperError;
use crate::orchestrator::{short_session_id, Orchestrator, PendingSwitch, TuiHandle, WrapperState};
use crate::store::{Store, StoreError};
use klaude_protocol::client::CheckoutPayload;
use klaude_protocol::server::CheckoutResult;
use klaude_protocol::{events, ErrorCode, SessionStatus};

/// Hook-propagation wait on a fresh (no-resume) launch.
const FRESH_LAUNCH_HOOK_TIMEOUT: Duration = Duration::from_secs(10);
/// Interval for all database polling loops.
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Default bound for resume-id waits.
const DEFAULT_WAIT_SECONDS: f64 = 5.0;

pub fn send_signal(pid: u32, signal: i32) -> bool {
    unsafe { libc::kill(pid as i32, signal) == 0 }
}

pub fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Map a child exit to a terminal session status.
pub fn status_from_exit(code: Option<i32>, signal: Option<i32>) -> SessionStatus {
    match (code, signal) {
        (_, Some(sig)) if sig == libc::SIGINT || sig == libc::SIGTERM => {
            SessionStatus::Interrupted
        }
        (_, Some(_)) => SessionStatus::Failed,
        (Some(0), _) => SessionStatus::Done,
        _ => SessionStatus::Failed,
    }
}

pub fn exit_parts(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
    (status.code(), status.signal())
}

/// Validate a caller-supplied `waitSeconds`. `0` disables polling.
pub(crate) fn validate_wait(
    wait_seconds: Option<f64>,
    default: f64,
) -> Result<f64, WrapperError> {
    match wait_seconds {
        None => Ok(default),
        Some(w) if w.is_finite() && w >= 0.0 => Ok(w),
        Some(w) => Err(WrapperError::new(
            ErrorCode::InvalidWaitValue,
            format!("invalid waitSeconds: {}", w),
        )),
    }
}

/// Immediate resume-id resolution: active link > most recent link > cached
/// `lastClaudeSessionId`. Returns the id and the reason for observability.
pub(crate) fn resume_from_store(
    store: &Store,
    session_id: &str,
) -> Result<Option<(String, String)>, StoreError> {
    if let Some(link) = store.active_link(session_id)? {
        return Ok(Some((link.claude_session_id, "active_link".to_string())));
    }
    if let Some(link) = store.latest_link(session_id)? {
        return Ok(Some((link.claude_session_id, "latest_link".to_string())));
    }
    if let Some(session) = store.get_session(session_id)? {
        if let Some(cached) = session.last_claude_session_id {
            return Ok(Some((cached, "cached".to_string())));
        }
    }
    Ok(None)
}

impl Orchestrator {
    /// Launch the TUI for the current session. Used once at startup; a fresh
    /// launch (no resume id) blocks until the session-start hook has recorded
    /// the TUI's conversation id.
    pub async fn launch_foreground_tui(
        self: &Arc<Self>,
        resume_claude_session_id: Option<String>,
    ) -> Result<(), WrapperError> {
        let session_id = {
            let mut state = self.state.lock().await;
            let session_id = state.current_session_id.clone();
            self.launch_tui_locked(&mut state, &session_id, resume_claude_session_id.as_deref())?;
            session_id
        };

        if resume_claude_session_id.is_none() {
            self.wait_for_claude_session_id(&session_id, FRESH_LAUNCH_HOOK_TIMEOUT)
                .await?;
        }
        Ok(())
    }

    /// Spawn the TUI child for a session. Caller holds the state lock.
    pub(crate) fn launch_tui_locked(
        self: &Arc<Self>,
        state: &mut WrapperState,
        session_id: &str,
        resume_claude_session_id: Option<&str>,
    ) -> Result<u32, WrapperError> {
        let binary = self.config.claude_binary()?;

        let mut cmd = tokio::process::Command::new(&binary);
        cmd.current_dir(&self.project_root);
        cmd.args(&self.tui_flags);
        if let Some(resume) = resume_claude_session_id {
            cmd.arg("--resume").arg(resume);
        }
        cmd.env("KLAUDE_PROJECT_HASH", &self.project.project_hash)
            .env("KLAUDE_INSTANCE_ID", &self.instance_id)
            .env("KLAUDE_SESSION_ID", session_id)
            .env("KLAUDE_SESSION_ID_SHORT", short_session_id(session_id));

        // stdio stays inherited — the TUI owns the terminal.
        let mut child = cmd.spawn().map_err(|e| {
            WrapperError::new(
                ErrorCode::TuiLaunchFailed,
                format!("failed to spawn TUI {}: {}", binary.display(), e),
            )
        })?;
        let pid = child.id().ok_or_else(|| {
            WrapperError::new(ErrorCode::TuiLaunchFailed, "TUI exited before tracking")
        })?;

        let generation = state.next_generation;
        state.next_generation += 1;
        state.tui = Some(TuiHandle { pid, generation });
        state.current_session_id = session_id.to_string();

        self.store
            .update_session_status(session_id, SessionStatus::Running)?;
        self.store
            .insert_runtime_process(session_id, pid as i64, "tui")?;
        self.recorder.record_quiet(
            session_id,
            events::WRAPPER_TUI_SPAWNED,
            json!({
                "pid": pid,
                "resume": resume_claude_session_id,
            }),
        );

        info!(
            component = "tui",
            event = "tui.spawned",
            session_id = %session_id,
            pid = pid,
            resume = ?resume_claude_session_id,
            "Foreground TUI spawned"
        );

        let orch = self.clone();
        let sid = session_id.to_string();
        tokio::spawn(async move {
            let result = child.wait().await;
            orch.on_tui_exit(generation, sid, pid, result).await;
        });

        Ok(pid)
    }

    /// TUI-exit callback. Continues a pending switch or finalizes the
    /// instance. `session_id` is the session the exited TUI was serving.
    pub(crate) async fn on_tui_exit(
        self: &Arc<Self>,
        generation: u64,
        session_id: String,
        pid: u32,
        result: std::io::Result<ExitStatus>,
    ) {
        let mut state = self.state.lock().await;
        match state.tui {
            Some(handle) if handle.generation == generation => {}
            _ => return, // a newer TUI already replaced this one
        }
        state.tui = None;

        let (code, signal) = match &result {
            Ok(status) => exit_parts(status),
            Err(_) => (None, None),
        };
        if let Err(e) =
            self.store
                .close_runtime_process(&session_id, pid as i64, code.map(|c| c as i64))
        {
            warn!(
                component = "tui",
                event = "tui.exit.close_ledger_failed",
                session_id = %session_id,
                error = %e,
                "Failed to close TUI process row"
            );
        }
        self.recorder.record_quiet(
            &session_id,
            events::WRAPPER_TUI_EXITED,
            json!({ "code": code, "signal": signal }),
        );

        if let Some(pending) = state.pending_switch.take() {
            // Mid-switch: the source session stays non-terminal.
            if let Err(e) = self
                .store
                .update_session_status(&session_id, SessionStatus::Active)
            {
                warn!(
                    component = "tui",
                    event = "tui.switch.source_update_failed",
                    session_id = %session_id,
                    error = %e,
                    "Failed to mark source session active"
                );
            }

            let target = pending.target_session_id.clone();
            let resume = pending.resume_claude_session_id.clone();
            match self.launch_tui_locked(&mut state, &target, Some(&resume)) {
                Ok(pid) => {
                    self.recorder.record_quiet(
                        &target,
                        events::WRAPPER_CHECKOUT_ACTIVATED,
                        json!({ "claudeSessionId": resume, "pid": pid }),
                    );
                    let _ = pending.resolve.send(Ok(CheckoutResult {
                        session_id: target,
                        claude_session_id: Some(resume),
                        already_active: false,
                    }));
                }
                Err(e) => {
                    warn!(
                        component = "tui",
                        event = "tui.switch.relaunch_failed",
                        target = %target,
                        error = %e,
                        "Failed to relaunch TUI for switch target"
                    );
                    let _ = pending.resolve.send(Err(e));
                    drop(state);
                    self.finalize_instance(1).await;
                }
            }
            return;
        }

        if state.shutting_down {
            return;
        }

        // Final exit: terminal status, orphan children, end the instance.
        let status = status_from_exit(code, signal);
        if let Err(e) = self.store.cascade_mark_session_ended(&session_id, status) {
            warn!(
                component = "tui",
                event = "tui.exit.cascade_failed",
                session_id = %session_id,
                error = %e,
                "Failed to finalize session on TUI exit"
            );
        }
        let exit_code = match status {
            SessionStatus::Done => 0,
            _ => code.unwrap_or(1),
        };
        drop(state);
        self.finalize_instance(exit_code).await;
    }

    /// The `checkout` verb. Replies only after the target TUI is live (or
    /// immediately for the degenerate cases).
    pub async fn handle_checkout(
        self: &Arc<Self>,
        payload: CheckoutPayload,
    ) -> Result<CheckoutResult, WrapperError> {
        let wait_seconds = validate_wait(payload.wait_seconds, DEFAULT_WAIT_SECONDS)?;

        let mut state = self.state.lock().await;
        if state.pending_switch.is_some() {
            return Err(WrapperError::new(
                ErrorCode::CheckoutInProgress,
                "a checkout is already in progress",
            ));
        }

        // The caller's vantage point: its own session when provided, else the
        // current foreground session.
        let base_id = payload
            .from_session_id
            .clone()
            .unwrap_or_else(|| state.current_session_id.clone());
        let base = self.require_session(&base_id)?;

        self.recorder.record_quiet(
            &base_id,
            events::WRAPPER_CHECKOUT_REQUESTED,
            json!({
                "requested": payload.session_id,
                "from": payload.from_session_id,
            }),
        );

        let target_id = match payload.session_id.clone().or(base.parent_id) {
            Some(id) => id,
            None => {
                return Err(WrapperError::new(
                    ErrorCode::SwitchTargetMissing,
                    "no target session given and the caller has no parent",
                ))
            }
        };
        self.require_session(&target_id)?;

        let (resume_id, reason) = self.resolve_resume_id(&target_id, wait_seconds).await?;

        let current_id = state.current_session_id.clone();

        // A headless runtime may still own the target's conversation; stop it
        // before the TUI takes over.
        if target_id != current_id && self.runtimes.contains_key(&target_id) {
            self.ensure_agent_runtime_stopped(&target_id, wait_seconds)
                .await?;
            self.recorder.record_quiet(
                &target_id,
                events::WRAPPER_CHECKOUT_RUNTIME_STOPPED,
                json!({ "reason": "checkout" }),
            );
        }

        self.recorder.record_quiet(
            &target_id,
            events::WRAPPER_CHECKOUT_RESUME_SELECTED,
            json!({ "claudeSessionId": resume_id, "reason": reason }),
        );

        if target_id == current_id && state.tui.is_some() {
            self.recorder.record_quiet(
                &target_id,
                events::WRAPPER_CHECKOUT_ALREADY_ACTIVE,
                serde_json::Value::Null,
            );
            return Ok(CheckoutResult {
                session_id: target_id,
                claude_session_id: Some(resume_id),
                already_active: true,
            });
        }

        if state.tui.is_none() {
            self.launch_tui_locked(&mut state, &target_id, Some(&resume_id))?;
            self.recorder.record_quiet(
                &target_id,
                events::WRAPPER_CHECKOUT_ACTIVATED,
                json!({ "claudeSessionId": resume_id, "relaunch": false }),
            );
            return Ok(CheckoutResult {
                session_id: target_id,
                claude_session_id: Some(resume_id),
                already_active: false,
            });
        }

        // Live TUI on another session: arm the switch and wait for the exit
        // handler to complete it.
        let Some(tui) = state.tui else {
            return Err(WrapperError::internal("TUI handle vanished mid-checkout"));
        };
        let (resolve_tx, resolve_rx) = oneshot::channel();
        state.pending_switch = Some(PendingSwitch {
            target_session_id: target_id.clone(),
            resume_claude_session_id: resume_id,
            resolve: resolve_tx,
        });

        send_signal(tui.pid, libc::SIGTERM);

        let grace = Duration::from_secs_f64(self.config.grace_seconds());
        let orch = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let state = orch.state.lock().await;
            if let Some(current) = state.tui {
                if current.generation == tui.generation && process_alive(current.pid) {
                    warn!(
                        component = "tui",
                        event = "tui.switch.grace_expired",
                        pid = current.pid,
                        "TUI ignored SIGTERM, sending SIGKILL"
                    );
                    send_signal(current.pid, libc::SIGKILL);
                }
            }
        });

        drop(state);
        resolve_rx
            .await
            .map_err(|_| WrapperError::internal("switch resolution channel dropped"))?
    }

    /// Resume-id precedence with bounded polling. Active links are rechecked
    /// first inside the loop so a newer link supersedes a stale cache.
    pub(crate) async fn resolve_resume_id(
        &self,
        session_id: &str,
        wait_seconds: f64,
    ) -> Result<(String, String), WrapperError> {
        if let Some(found) = resume_from_store(&self.store, session_id)? {
            return Ok(found);
        }
        if wait_seconds > 0.0 {
            let deadline = tokio::time::Instant::now() + Duration::from_secs_f64(wait_seconds);
            while tokio::time::Instant::now() < deadline {
                tokio::time::sleep(POLL_INTERVAL).await;
                if let Some(link) = self.store.active_link(session_id)? {
                    return Ok((link.claude_session_id, "waited_active_link".to_string()));
                }
                if let Some(session) = self.store.get_session(session_id)? {
                    if let Some(cached) = session.last_claude_session_id {
                        return Ok((cached, "waited_cached".to_string()));
                    }
                }
            }
        }
        Err(WrapperError::new(
            ErrorCode::SwitchTargetMissing,
            format!("no resume id known for session {}", session_id),
        ))
    }

    /// Block until the session-start hook has written the TUI's conversation
    /// id for a freshly launched session.
    async fn wait_for_claude_session_id(
        &self,
        session_id: &str,
        timeout: Duration,
    ) -> Result<String, WrapperError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(session) = self.store.get_session(session_id)? {
                if let Some(id) = session.last_claude_session_id {
                    return Ok(id);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(WrapperError::new(
                    ErrorCode::HookTimeout,
                    "session-start hook did not fire within 10s; \
                     run `klaude install-hooks` and check the TUI's hook configuration",
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::new_session;
    use klaude_protocol::LinkSource;

    #[test]
    fn exit_mapping_follows_signal_then_code() {
        assert_eq!(
            status_from_exit(None, Some(libc::SIGINT)),
            SessionStatus::Interrupted
        );
        assert_eq!(
            status_from_exit(None, Some(libc::SIGTERM)),
            SessionStatus::Interrupted
        );
        assert_eq!(
            status_from_exit(None, Some(libc::SIGKILL)),
            SessionStatus::Failed
        );
        assert_eq!(status_from_exit(Some(0), None), SessionStatus::Done);
        assert_eq!(status_from_exit(Some(2), None), SessionStatus::Failed);
        assert_eq!(status_from_exit(None, None), SessionStatus::Failed);
    }

    #[test]
    fn wait_validation() {
        assert_eq!(validate_wait(None, 5.0).unwrap(), 5.0);
        assert_eq!(validate_wait(Some(0.0), 5.0).unwrap(), 0.0);
        assert_eq!(validate_wait(Some(2.5), 5.0).unwrap(), 2.5);
        assert_eq!(
            validate_wait(Some(-1.0), 5.0).unwrap_err().code,
            ErrorCode::InvalidWaitValue
        );
        assert_eq!(
            validate_wait(Some(f64::NAN), 5.0).unwrap_err().code,
            ErrorCode::InvalidWaitValue
        );
    }

    #[test]
    fn resume_precedence_active_then_latest_then_cached() {
        let store = Store::open_in_memory().unwrap();
        let project = store.upsert_project("/p", "h").unwrap();
        let session = new_session(project.id, None, "tui");
        store.create_session(&session).unwrap();

        assert!(resume_from_store(&store, &session.id).unwrap().is_none());

        store
            .set_session_claude_id(&session.id, "cached-1", None)
            .unwrap();
        let (id, reason) = resume_from_store(&store, &session.id).unwrap().unwrap();
        assert_eq!((id.as_str(), reason.as_str()), ("cached-1", "cached"));

        store
            .upsert_link(&session.id, "conv-1", None, LinkSource::Startup)
            .unwrap();
        store.end_link("conv-1").unwrap();
        let (id, reason) = resume_from_store(&store, &session.id).unwrap().unwrap();
        assert_eq!((id.as_str(), reason.as_str()), ("conv-1", "latest_link"));

        store
            .upsert_link(&session.id, "conv-2", None, LinkSource::Resume)
            .unwrap();
        let (id, reason) = resume_from_store(&store, &session.id).unwrap().unwrap();
        assert_eq!((id.as_str(), reason.as_str()), ("conv-2", "active_link"));
    }
}
