//! Headless agent runtime supervision
//!
//! Start-agent validation, spawning through the connector crate, consumption
//! of the typed event stream into the recorder, startup retry with jittered
//! backoff for the one-shot backends, and the stop ladder used by checkout
//! and shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::agents::{self, AgentDefinition};
use crate::config::Config;
use crate::error::WrapperError;
use crate::orchestrator::{short_session_id, Orchestrator};
use crate::selector::select_runtime;
use crate::store::{now_iso, SessionRow};
use crate::tui::{send_signal, status_from_exit, validate_wait};
use klaude_protocol::client::{
    InterruptPayload, MessagePayload, StartAgentOptions, StartAgentPayload,
};
use klaude_protocol::server::{InterruptResult, MessageResult, StartAgentResult};
use klaude_protocol::{events, ErrorCode, LinkSource, RuntimeKind, SessionStatus};
use klaude_runtimes::{claude, codex, cursor, gemini, RuntimeEvent, RuntimeHandle, SpawnSpec, StreamItem};

const MAX_AGENT_COUNT: u32 = 10;
const DEFAULT_MESSAGE_WAIT_SECONDS: f64 = 5.0;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tracked state for one session's runtime (live process or retry window).
pub struct RuntimeEntry {
    pub kind: RuntimeKind,
    pub pid: u32,
    pub stdin_tx: Option<mpsc::Sender<String>>,
    pub retrying: bool,
    pub last_exit_status: Option<SessionStatus>,
    pub cancelled: Arc<AtomicBool>,
    pub retry_task: Option<tokio::task::AbortHandle>,
}

/// Session metadata persisted at creation: the definition, the runtime
/// decision, and the resolved MCP visibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionMetadata {
    pub definition: AgentDefinition,
    pub runtime: RuntimeDecision,
    #[serde(default)]
    pub resolved_mcps: HashMap<String, Value>,
    #[serde(default)]
    pub options: StartAgentOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RuntimeDecision {
    pub primary: RuntimeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<RuntimeKind>,
}

fn parse_metadata(session: &SessionRow) -> Option<SessionMetadata> {
    session
        .metadata_json
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
}

/// `[UPDATE] ...` lines from child output become agent-update rows.
fn parse_update_text(text: &str) -> Option<&str> {
    let rest = text.trim().strip_prefix("[UPDATE]")?;
    let rest = rest.trim();
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

fn jitter_ms(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    nanos % max
}

fn signal_from_name(name: Option<&str>) -> Result<(i32, &'static str), WrapperError> {
    match name.unwrap_or("SIGINT") {
        "SIGINT" | "INT" | "2" => Ok((libc::SIGINT, "SIGINT")),
        "SIGTERM" | "TERM" | "15" => Ok((libc::SIGTERM, "SIGTERM")),
        "SIGKILL" | "KILL" | "9" => Ok((libc::SIGKILL, "SIGKILL")),
        "SIGHUP" | "HUP" | "1" => Ok((libc::SIGHUP, "SIGHUP")),
        other => Err(WrapperError::new(
            ErrorCode::InterruptFailed,
            format!("unsupported signal: {}", other),
        )),
    }
}

impl Orchestrator {
    /// The `start-agent` verb.
    pub async fn handle_start_agent(
        self: &Arc<Self>,
        payload: StartAgentPayload,
    ) -> Result<StartAgentResult, WrapperError> {
        if payload.agent_type.trim().is_empty() {
            return Err(WrapperError::new(
                ErrorCode::AgentTypeRequired,
                "agentType is required",
            ));
        }
        if payload.prompt.trim().is_empty() {
            return Err(WrapperError::new(
                ErrorCode::PromptRequired,
                "prompt is required",
            ));
        }
        let options = payload.options.clone().unwrap_or_default();

        let parent_id = match payload.parent_session_id.clone() {
            Some(id) => id,
            None => self.state.lock().await.current_session_id.clone(),
        };
        let parent = self.require_session(&parent_id)?;

        // Definition lookup; `general-purpose` works without a file.
        let definition = match agents::load_definition(&self.project_root, &payload.agent_type)? {
            Some(def) => def,
            None if payload.agent_type == agents::GENERAL_PURPOSE => {
                agents::general_purpose_fallback()
            }
            None => {
                let available = agents::available_types(&self.project_root);
                return Err(WrapperError::new(
                    ErrorCode::AgentTypeInvalid,
                    format!(
                        "unknown agent type {}; available: {}",
                        payload.agent_type,
                        if available.is_empty() {
                            "(none)".to_string()
                        } else {
                            available.join(", ")
                        }
                    ),
                ));
            }
        };

        // Non-root parents may restrict which children they spawn.
        if parent.agent_type != "tui" {
            if let Some(metadata) = parse_metadata(&parent) {
                if let Some(allowed) = metadata.definition.allowed_agents {
                    if !allowed.iter().any(|t| t == &payload.agent_type) {
                        return Err(WrapperError::new(
                            ErrorCode::AgentTypeNotAllowed,
                            format!(
                                "agent type {} is not in the parent's allowedAgents",
                                payload.agent_type
                            ),
                        ));
                    }
                }
            }
        }

        let depth = self.store.calculate_session_depth(&parent_id)?;
        let max_depth = self.config.max_agent_depth();
        if depth + 1 > max_depth {
            return Err(WrapperError::new(
                ErrorCode::MaxDepthExceeded,
                format!(
                    "spawning at depth {} exceeds maxAgentDepth {}",
                    depth + 1,
                    max_depth
                ),
            ));
        }

        // MCP visibility. Explicit unknown names fail hard; everything else
        // degrades to an empty set with a log line.
        let project_mcps = Config::project_mcp_servers(&self.project_root);
        let parent_mcps = parse_metadata(&parent).map(|m| m.resolved_mcps);
        let resolved_mcps = match agents::resolve_mcps(
            &definition,
            &project_mcps,
            parent_mcps.as_ref(),
        ) {
            Ok(resolved) => resolved,
            Err(e) if definition.mcp_servers.is_some() => return Err(e),
            Err(e) => {
                warn!(
                    component = "runtime",
                    event = "runtime.mcp_resolution_failed",
                    agent_type = %payload.agent_type,
                    error = %e,
                    "MCP resolution failed, continuing without MCPs"
                );
                HashMap::new()
            }
        };

        let choice = select_runtime(&definition);

        let share_resume = if options.share {
            crate::tui::resume_from_store(&self.store, &parent_id)?.map(|(id, _)| id)
        } else {
            None
        };

        let count = payload.agent_count.unwrap_or(1).clamp(1, MAX_AGENT_COUNT);
        let metadata = SessionMetadata {
            definition: definition.clone(),
            runtime: RuntimeDecision {
                primary: choice.primary,
                fallback: choice.fallback,
            },
            resolved_mcps: resolved_mcps.clone(),
            options: options.clone(),
        };
        let metadata_json = serde_json::to_string(&metadata)?;

        let mut session_ids = Vec::with_capacity(count as usize);
        for index in 0..count {
            let session_id = ulid::Ulid::new().to_string();
            let title = if count == 1 {
                definition.name.clone()
            } else {
                format!("{} #{}", definition.name, index + 1)
            };
            self.store.create_session(&SessionRow {
                id: session_id.clone(),
                project_id: self.project.id,
                parent_id: Some(parent_id.clone()),
                agent_type: payload.agent_type.clone(),
                instance_id: Some(self.instance_id.clone()),
                title: Some(title),
                prompt: Some(payload.prompt.clone()),
                status: SessionStatus::Active,
                created_at: now_iso(),
                updated_at: None,
                ended_at: None,
                last_claude_session_id: None,
                last_transcript_path: None,
                current_process_pid: None,
                metadata_json: Some(metadata_json.clone()),
            })?;
            self.recorder.record_quiet(
                &session_id,
                events::AGENT_SESSION_CREATED,
                json!({
                    "agentType": payload.agent_type,
                    "parentSessionId": parent_id,
                    "runtime": choice.primary.as_str(),
                    "share": options.share,
                }),
            );

            self.spawn_agent_runtime(
                &session_id,
                choice.primary,
                1,
                choice.fallback,
                share_resume.clone(),
                payload.prompt.clone(),
            )
            .await?;
            session_ids.push(session_id);
        }

        // Optionally hand the foreground over to the new session.
        if options.checkout {
            if let Some(first) = session_ids.first().cloned() {
                let orch = self.clone();
                tokio::spawn(async move {
                    let result = orch
                        .handle_checkout(klaude_protocol::client::CheckoutPayload {
                            session_id: Some(first.clone()),
                            from_session_id: None,
                            wait_seconds: None,
                        })
                        .await;
                    if let Err(e) = result {
                        warn!(
                            component = "runtime",
                            event = "runtime.start_checkout_failed",
                            session_id = %first,
                            error = %e,
                            "Post-spawn checkout failed"
                        );
                    }
                });
            }
        }

        Ok(StartAgentResult {
            session_ids,
            agent_type: payload.agent_type,
            runtime: choice.primary.as_str().to_string(),
        })
    }

    /// Spawn (or re-spawn) the runtime child for a session.
    pub(crate) fn spawn_agent_runtime<'a>(
        self: &'a Arc<Self>,
        session_id: &'a str,
        kind: RuntimeKind,
        attempt: u32,
        fallback: Option<RuntimeKind>,
        resume_session_id: Option<String>,
        prompt: String,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), WrapperError>> + Send + 'a>> {
        Box::pin(async move {
        let session = self.require_session(session_id)?;
        let metadata = parse_metadata(&session);
        let definition = metadata.as_ref().map(|m| m.definition.clone());
        let resolved_mcps = metadata.as_ref().map(|m| m.resolved_mcps.clone());

        let instructions = definition
            .as_ref()
            .map(|d| d.instructions.clone())
            .filter(|i| !i.is_empty());
        let model = definition
            .as_ref()
            .and_then(|d| d.model.clone())
            .or_else(|| self.config.sdk.model.clone());

        let spec = SpawnSpec {
            binary: self.config.runtime_binary(kind),
            cwd: self.project_root.clone(),
            prompt: prompt.clone(),
            instructions,
            model,
            permission_mode: Some(self.config.permission_mode().to_string()),
            reasoning_effort: self.config.sdk.reasoning_effort.clone(),
            resume_session_id: resume_session_id.clone(),
            envs: vec![
                (
                    "KLAUDE_PROJECT_HASH".into(),
                    self.project.project_hash.clone(),
                ),
                ("KLAUDE_INSTANCE_ID".into(), self.instance_id.clone()),
                ("KLAUDE_SESSION_ID".into(), session_id.to_string()),
                (
                    "KLAUDE_SESSION_ID_SHORT".into(),
                    short_session_id(session_id).to_string(),
                ),
            ],
        };

        let mcps_value = resolved_mcps
            .filter(|m| !m.is_empty())
            .map(|m| serde_json::to_value(m))
            .transpose()?;

        let spawned = match kind {
            RuntimeKind::Claude => claude::spawn(&spec, mcps_value.as_ref()).await,
            RuntimeKind::Codex => codex::spawn(&spec),
            RuntimeKind::Cursor => cursor::spawn(&spec),
            RuntimeKind::Gemini => gemini::spawn(&spec),
        };

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.recorder.record_quiet(
                    session_id,
                    events::AGENT_RUNTIME_PROCESS_ERROR,
                    json!({
                        "error": e.to_string(),
                        "kind": kind.as_str(),
                        "attempt": attempt,
                    }),
                );
                if let Some(fb) = fallback {
                    info!(
                        component = "runtime",
                        event = "runtime.fallback",
                        session_id = %session_id,
                        primary = kind.as_str(),
                        fallback = fb.as_str(),
                        "Primary runtime failed to spawn, trying fallback"
                    );
                    return Box::pin(self.spawn_agent_runtime(
                        session_id,
                        fb,
                        1,
                        None,
                        resume_session_id,
                        prompt,
                    ))
                    .await;
                }
                self.runtimes.remove(session_id);
                let _ = self
                    .store
                    .update_session_status(session_id, SessionStatus::Failed);
                return Err(WrapperError::new(
                    ErrorCode::Internal,
                    format!("failed to spawn {} runtime: {}", kind.as_str(), e),
                ));
            }
        };

        let pid = handle.pid;
        self.store
            .insert_runtime_process(session_id, pid as i64, kind.as_str())?;
        self.recorder.record_quiet(
            session_id,
            events::AGENT_RUNTIME_SPAWNED,
            json!({ "pid": pid, "kind": kind.as_str(), "attempt": attempt }),
        );

        let cancelled = match self.runtimes.get(session_id) {
            Some(entry) => entry.cancelled.clone(),
            None => Arc::new(AtomicBool::new(false)),
        };
        self.runtimes.insert(
            session_id.to_string(),
            RuntimeEntry {
                kind,
                pid,
                stdin_tx: handle.stdin_tx(),
                retrying: false,
                last_exit_status: None,
                cancelled: cancelled.clone(),
                retry_task: None,
            },
        );

        let orch = self.clone();
        let sid = session_id.to_string();
        tokio::spawn(async move {
            supervise(orch, sid, handle, attempt, fallback, cancelled, resume_session_id, prompt)
                .await;
        });

        Ok(())
        })
    }

    /// Apply one envelope event to the session. Recording failures are logged
    /// and never unwind the supervisor.
    pub(crate) fn handle_runtime_event(&self, session_id: &str, event: RuntimeEvent) {
        match event {
            RuntimeEvent::Status { status, detail } => {
                self.recorder.record_quiet(
                    session_id,
                    events::AGENT_RUNTIME_STATUS,
                    json!({ "status": status, "detail": detail }),
                );
                match status.as_str() {
                    "running" => {
                        let _ = self
                            .store
                            .update_session_status(session_id, SessionStatus::Running);
                    }
                    "completed" => {
                        let running = self
                            .store
                            .get_session(session_id)
                            .ok()
                            .flatten()
                            .map(|s| s.status == SessionStatus::Running)
                            .unwrap_or(false);
                        if running {
                            let _ = self
                                .store
                                .update_session_status(session_id, SessionStatus::Done);
                        }
                    }
                    _ => {}
                }
            }
            RuntimeEvent::Message {
                message_type,
                payload,
                text,
            } => {
                self.recorder.record_quiet(
                    session_id,
                    events::AGENT_RUNTIME_MESSAGE,
                    json!({ "messageType": message_type, "payload": payload, "text": text }),
                );
                if let Some(update) = text.as_deref().and_then(parse_update_text) {
                    let parent = self
                        .store
                        .get_session(session_id)
                        .ok()
                        .flatten()
                        .and_then(|s| s.parent_id);
                    if let Some(parent_id) = parent {
                        if let Err(e) =
                            self.store
                                .insert_agent_update(session_id, Some(&parent_id), update)
                        {
                            warn!(
                                component = "runtime",
                                event = "runtime.update_insert_failed",
                                session_id = %session_id,
                                error = %e,
                                "Failed to queue agent update"
                            );
                        }
                    }
                }
            }
            RuntimeEvent::Log { level, message } => {
                self.recorder.record_quiet(
                    session_id,
                    events::AGENT_RUNTIME_LOG,
                    json!({ "level": level, "message": message }),
                );
            }
            RuntimeEvent::Result {
                result,
                stop_reason,
            } => {
                self.recorder.record_quiet(
                    session_id,
                    events::AGENT_RUNTIME_RESULT,
                    json!({ "result": result, "stopReason": stop_reason }),
                );
            }
            RuntimeEvent::Error { message, stack } => {
                self.recorder.record_quiet(
                    session_id,
                    events::AGENT_RUNTIME_ERROR,
                    json!({ "message": message, "stack": stack }),
                );
                let _ = self
                    .store
                    .update_session_status(session_id, SessionStatus::Failed);
            }
            RuntimeEvent::Done { status, reason } => {
                self.recorder.record_quiet(
                    session_id,
                    events::AGENT_RUNTIME_DONE,
                    json!({ "status": status, "reason": reason }),
                );
                let terminal = match status.as_str() {
                    "failed" => SessionStatus::Failed,
                    "interrupted" => SessionStatus::Interrupted,
                    _ => SessionStatus::Done,
                };
                let _ = self.store.update_session_status(session_id, terminal);
            }
            RuntimeEvent::ClaudeSession {
                session_id: claude_id,
                transcript_path,
            } => {
                if let Err(e) = self.store.upsert_link(
                    session_id,
                    &claude_id,
                    transcript_path.as_deref(),
                    LinkSource::Runtime,
                ) {
                    warn!(
                        component = "runtime",
                        event = "runtime.link_upsert_failed",
                        session_id = %session_id,
                        error = %e,
                        "Failed to record claude-session link"
                    );
                }
                let _ = self.store.set_session_claude_id(
                    session_id,
                    &claude_id,
                    transcript_path.as_deref(),
                );
                self.recorder.record_quiet(
                    session_id,
                    events::AGENT_RUNTIME_CLAUDE_SESSION,
                    json!({ "sessionId": claude_id, "transcriptPath": transcript_path }),
                );
            }
            RuntimeEvent::Unknown { raw } => {
                self.recorder.record_quiet(
                    session_id,
                    events::AGENT_RUNTIME_EVENT_UNKNOWN,
                    json!({ "raw": raw }),
                );
            }
        }
    }

    /// Child-exit bookkeeping: close the ledger row, then either schedule a
    /// startup retry, switch to the fallback backend, or finalize the session.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn on_runtime_exit(
        self: &Arc<Self>,
        session_id: &str,
        kind: RuntimeKind,
        pid: u32,
        result: std::io::Result<std::process::ExitStatus>,
        saw_output: bool,
        attempt: u32,
        fallback: Option<RuntimeKind>,
        cancelled: Arc<AtomicBool>,
        resume_session_id: Option<String>,
        prompt: String,
    ) {
        let (code, signal) = match &result {
            Ok(status) => crate::tui::exit_parts(status),
            Err(_) => (None, None),
        };
        if let Err(e) = self
            .store
            .close_runtime_process(session_id, pid as i64, code.map(|c| c as i64))
        {
            warn!(
                component = "runtime",
                event = "runtime.close_ledger_failed",
                session_id = %session_id,
                error = %e,
                "Failed to close runtime process row"
            );
        }
        self.recorder.record_quiet(
            session_id,
            events::AGENT_RUNTIME_PROCESS_EXITED,
            json!({
                "pid": pid,
                "code": code,
                "signal": signal,
                "attempt": attempt,
                "sawOutput": saw_output,
            }),
        );

        let inferred = status_from_exit(code, signal);
        if let Some(mut entry) = self.runtimes.get_mut(session_id) {
            entry.last_exit_status = Some(inferred);
        }

        // A cancelled runtime was stopped deliberately; the canceller owns
        // session finalization and the map entry.
        if cancelled.load(Ordering::SeqCst) {
            self.runtimes.remove(session_id);
            return;
        }

        let startup_failure = kind.is_one_shot() && !saw_output;
        let retry_cfg = self.config.retry_config(kind);

        if startup_failure && attempt < retry_cfg.max_attempts {
            let next_attempt = attempt + 1;
            let delay_ms =
                retry_cfg.delay_ms * u64::from((next_attempt - 1).max(1)) + jitter_ms(retry_cfg.jitter_ms);
            self.recorder.record_quiet(
                session_id,
                events::AGENT_RUNTIME_RETRY,
                json!({ "attempt": next_attempt, "delayMs": delay_ms }),
            );

            let orch = self.clone();
            let sid = session_id.to_string();
            let cancelled_for_retry = cancelled.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                if cancelled_for_retry.load(Ordering::SeqCst) {
                    return;
                }
                if let Err(e) = Box::pin(orch.spawn_agent_runtime(
                    &sid,
                    kind,
                    next_attempt,
                    fallback,
                    resume_session_id,
                    prompt,
                ))
                .await
                {
                    warn!(
                        component = "runtime",
                        event = "runtime.retry_spawn_failed",
                        session_id = %sid,
                        error = %e,
                        "Startup retry failed to spawn"
                    );
                }
            });
            if let Some(mut entry) = self.runtimes.get_mut(session_id) {
                entry.retrying = true;
                entry.retry_task = Some(task.abort_handle());
            }
            return;
        }

        // Fallback once when the primary either never started or failed.
        if let Some(fb) = fallback {
            if startup_failure || inferred == SessionStatus::Failed {
                info!(
                    component = "runtime",
                    event = "runtime.fallback",
                    session_id = %session_id,
                    primary = kind.as_str(),
                    fallback = fb.as_str(),
                    "Primary runtime failed, launching fallback"
                );
                match Box::pin(self.spawn_agent_runtime(
                    session_id,
                    fb,
                    1,
                    None,
                    resume_session_id,
                    prompt,
                ))
                .await
                {
                    Ok(()) => return,
                    Err(e) => {
                        warn!(
                            component = "runtime",
                            event = "runtime.fallback_spawn_failed",
                            session_id = %session_id,
                            error = %e,
                            "Fallback runtime failed to spawn"
                        );
                    }
                }
            }
        }

        self.runtimes.remove(session_id);
        let still_open = self
            .store
            .get_session(session_id)
            .ok()
            .flatten()
            .map(|s| !s.status.is_terminal())
            .unwrap_or(false);
        if still_open {
            let _ = self.store.update_session_status(session_id, inferred);
        }
    }

    /// Stop a session's runtime: SIGTERM, poll up to max(wait, 5) s, SIGKILL,
    /// poll 1 s more. Pending retries are cancelled and the session is
    /// finalized with its last exit status.
    pub async fn ensure_agent_runtime_stopped(
        self: &Arc<Self>,
        session_id: &str,
        wait_seconds: f64,
    ) -> Result<(), WrapperError> {
        let Some(entry) = self.runtimes.get(session_id) else {
            return Ok(());
        };
        entry.cancelled.store(true, Ordering::SeqCst);
        let retrying = entry.retrying;
        let pid = entry.pid;
        let last_status = entry.last_exit_status;
        if let Some(task) = &entry.retry_task {
            task.abort();
        }
        drop(entry);

        if retrying {
            // No live process; just cancel the pending respawn.
            self.recorder.record_quiet(
                session_id,
                events::AGENT_RUNTIME_RETRY_CANCELLED,
                serde_json::Value::Null,
            );
            self.runtimes.remove(session_id);
            let _ = self
                .store
                .update_session_status(session_id, last_status.unwrap_or(SessionStatus::Failed));
            return Ok(());
        }

        send_signal(pid, libc::SIGTERM);
        let term_window = Duration::from_secs_f64(wait_seconds.max(5.0));
        let mut dead = wait_for_death(pid, term_window).await;
        if !dead {
            warn!(
                component = "runtime",
                event = "runtime.stop.sigkill",
                session_id = %session_id,
                pid = pid,
                "Runtime ignored SIGTERM, sending SIGKILL"
            );
            send_signal(pid, libc::SIGKILL);
            dead = wait_for_death(pid, Duration::from_secs(1)).await;
        }
        if !dead {
            return Err(WrapperError::new(
                ErrorCode::AgentRuntimeTimeout,
                format!("runtime pid {} did not exit after SIGKILL", pid),
            ));
        }

        self.runtimes.remove(session_id);
        let _ = self
            .store
            .update_session_status(session_id, last_status.unwrap_or(SessionStatus::Failed));
        Ok(())
    }

    /// The `message` verb.
    pub async fn handle_message(
        self: &Arc<Self>,
        payload: MessagePayload,
    ) -> Result<MessageResult, WrapperError> {
        if payload.session_id.trim().is_empty() {
            return Err(WrapperError::new(
                ErrorCode::SessionNotFound,
                "sessionId is required",
            ));
        }
        if payload.prompt.trim().is_empty() {
            return Err(WrapperError::new(
                ErrorCode::PromptRequired,
                "prompt is required",
            ));
        }
        let wait_seconds = validate_wait(payload.wait_seconds, DEFAULT_MESSAGE_WAIT_SECONDS)?;
        let session = self.require_session(&payload.session_id)?;

        if let Some(entry) = self.runtimes.get(&payload.session_id) {
            if entry.kind != RuntimeKind::Claude {
                return Err(WrapperError::new(
                    ErrorCode::AgentMessageUnsupported,
                    format!("{} runtimes do not accept messages", entry.kind.as_str()),
                ));
            }
            let stdin = entry.stdin_tx.clone().ok_or_else(|| {
                WrapperError::new(
                    ErrorCode::AgentStdinUnavailable,
                    "runtime stdin is not available",
                )
            })?;
            drop(entry);

            let line = claude::message_line(&payload.prompt)
                .map_err(|e| WrapperError::new(ErrorCode::MessageSendFailed, e.to_string()))?;
            stdin.send(line).await.map_err(|_| {
                WrapperError::new(ErrorCode::MessageSendFailed, "runtime stdin closed")
            })?;

            self.recorder.record_quiet(
                &payload.session_id,
                events::AGENT_MESSAGE_SENT,
                json!({ "promptChars": payload.prompt.len() }),
            );
            return Ok(MessageResult {
                status: "queued".to_string(),
                messages_queued: 1,
            });
        }

        // No live runtime: only the native backend can be revived.
        let metadata = parse_metadata(&session);
        let kind = metadata
            .as_ref()
            .map(|m| m.runtime.primary)
            .unwrap_or(RuntimeKind::Claude);
        if kind != RuntimeKind::Claude {
            return Err(WrapperError::new(
                ErrorCode::AgentMessageUnsupported,
                format!(
                    "session {} ran on the {} backend; messages need a native runtime",
                    payload.session_id,
                    kind.as_str()
                ),
            ));
        }

        let resume = match self
            .resolve_resume_id(&payload.session_id, wait_seconds)
            .await
        {
            Ok((id, _reason)) => Some(id),
            Err(_) => None, // no prior conversation — start a fresh one
        };

        self.spawn_agent_runtime(
            &payload.session_id,
            RuntimeKind::Claude,
            1,
            None,
            resume,
            payload.prompt.clone(),
        )
        .await?;

        self.recorder.record_quiet(
            &payload.session_id,
            events::AGENT_MESSAGE_RUNTIME_STARTED,
            json!({ "promptChars": payload.prompt.len() }),
        );
        Ok(MessageResult {
            status: "queued".to_string(),
            messages_queued: 1,
        })
    }

    /// The `interrupt` verb.
    pub async fn handle_interrupt(
        self: &Arc<Self>,
        payload: InterruptPayload,
    ) -> Result<InterruptResult, WrapperError> {
        let session = self.require_session(&payload.session_id)?;

        let Some(entry) = self.runtimes.get(&payload.session_id) else {
            // The ledger says a process exists but this wrapper lost track of
            // it (e.g. it belongs to a previous instance).
            if session.current_process_pid.is_some() {
                return Err(WrapperError::new(
                    ErrorCode::AgentRuntimeEntryMissing,
                    format!(
                        "session {} has a recorded process but no tracked runtime",
                        payload.session_id
                    ),
                ));
            }
            return Err(WrapperError::new(
                ErrorCode::AgentNotRunning,
                format!("no tracked runtime for session {}", payload.session_id),
            ));
        };
        let pid = entry.pid;
        drop(entry);
        if pid == 0 {
            return Err(WrapperError::new(
                ErrorCode::AgentPidUnavailable,
                "runtime pid unavailable",
            ));
        }

        let (signal, name) = signal_from_name(payload.signal.as_deref())?;
        if !send_signal(pid, signal) {
            return Err(WrapperError::new(
                ErrorCode::InterruptFailed,
                format!("failed to deliver {} to pid {}", name, pid),
            ));
        }

        self.recorder.record_quiet(
            &payload.session_id,
            events::AGENT_INTERRUPTED,
            json!({ "signal": name, "pid": pid }),
        );
        Ok(InterruptResult {
            session_id: payload.session_id,
            signal: name.to_string(),
            pid,
        })
    }
}

async fn wait_for_death(pid: u32, window: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + window;
    while tokio::time::Instant::now() < deadline {
        if !crate::tui::process_alive(pid) {
            return true;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
    !crate::tui::process_alive(pid)
}

/// Per-child supervisor: drain the event stream, then reap the exit.
#[allow(clippy::too_many_arguments)]
async fn supervise(
    orch: Arc<Orchestrator>,
    session_id: String,
    mut handle: RuntimeHandle,
    attempt: u32,
    fallback: Option<RuntimeKind>,
    cancelled: Arc<AtomicBool>,
    resume_session_id: Option<String>,
    prompt: String,
) {
    let kind = handle.kind;
    let pid = handle.pid;

    while let Some(item) = handle.next_item().await {
        match item {
            StreamItem::Event(event) => orch.handle_runtime_event(&session_id, event),
            StreamItem::Stderr(line) => {
                orch.recorder.record_quiet(
                    &session_id,
                    events::AGENT_RUNTIME_STDERR,
                    json!({ "line": line }),
                );
            }
        }
    }

    let result = handle.wait().await;
    let saw_output = handle.saw_output();
    handle.cleanup();

    orch.on_runtime_exit(
        &session_id,
        kind,
        pid,
        result,
        saw_output,
        attempt,
        fallback,
        cancelled,
        resume_session_id,
        prompt,
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_lines_are_extracted() {
        assert_eq!(
            parse_update_text("[UPDATE] pass 1/3 done"),
            Some("pass 1/3 done")
        );
        assert_eq!(
            parse_update_text("  [UPDATE]   trimmed  "),
            Some("trimmed")
        );
        assert_eq!(parse_update_text("[UPDATE]"), None);
        assert_eq!(parse_update_text("no marker here"), None);
        assert_eq!(parse_update_text("prefix [UPDATE] not at start"), None);
    }

    #[test]
    fn jitter_stays_in_range() {
        for _ in 0..32 {
            assert!(jitter_ms(200) < 200);
        }
        assert_eq!(jitter_ms(0), 0);
    }

    #[test]
    fn signal_names_parse() {
        assert_eq!(signal_from_name(None).unwrap().0, libc::SIGINT);
        assert_eq!(signal_from_name(Some("SIGTERM")).unwrap().0, libc::SIGTERM);
        assert_eq!(signal_from_name(Some("KILL")).unwrap().0, libc::SIGKILL);
        assert!(signal_from_name(Some("SIGSTOP")).is_err());
    }

    #[test]
    fn session_metadata_round_trips() {
        let metadata = SessionMetadata {
            definition: crate::agents::parse_definition(
                "planner",
                "---\nname: planner\nallowedAgents: [worker]\n---\nplan it\n",
            )
            .unwrap(),
            runtime: RuntimeDecision {
                primary: RuntimeKind::Codex,
                fallback: Some(RuntimeKind::Claude),
            },
            resolved_mcps: HashMap::new(),
            options: StartAgentOptions {
                share: true,
                ..Default::default()
            },
        };
        let json = serde_json::to_string(&metadata).unwrap();
        let back: SessionMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.runtime.primary, RuntimeKind::Codex);
        assert_eq!(back.runtime.fallback, Some(RuntimeKind::Claude));
        assert!(back.options.share);
        assert_eq!(
            back.definition.allowed_agents.as_deref(),
            Some(&["worker".to_string()][..])
        );
    }
}
