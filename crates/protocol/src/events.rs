//! Well-known event kinds recorded to the store and per-session logs.
//!
//! Kinds are dotted strings; the `wrapper.*` family covers the instance and
//! the foreground TUI, the `agent.*` family covers headless runtimes.

pub const WRAPPER_START: &str = "wrapper.start";
pub const WRAPPER_FINALIZED: &str = "wrapper.finalized";

pub const WRAPPER_TUI_SPAWNED: &str = "wrapper.tui.spawned";
pub const WRAPPER_TUI_EXITED: &str = "wrapper.tui.exited";

pub const WRAPPER_CHECKOUT_REQUESTED: &str = "wrapper.checkout.requested";
pub const WRAPPER_CHECKOUT_RESUME_SELECTED: &str = "wrapper.checkout.resume_selected";
pub const WRAPPER_CHECKOUT_ACTIVATED: &str = "wrapper.checkout.activated";
pub const WRAPPER_CHECKOUT_ALREADY_ACTIVE: &str = "wrapper.checkout.already_active";
pub const WRAPPER_CHECKOUT_RUNTIME_STOPPED: &str = "wrapper.checkout.runtime_stopped";

pub const AGENT_SESSION_CREATED: &str = "agent.session.created";
pub const AGENT_RUNTIME_SPAWNED: &str = "agent.runtime.spawned";
pub const AGENT_RUNTIME_STATUS: &str = "agent.runtime.status";
pub const AGENT_RUNTIME_MESSAGE: &str = "agent.runtime.message";
pub const AGENT_RUNTIME_LOG: &str = "agent.runtime.log";
pub const AGENT_RUNTIME_RESULT: &str = "agent.runtime.result";
pub const AGENT_RUNTIME_ERROR: &str = "agent.runtime.error";
pub const AGENT_RUNTIME_DONE: &str = "agent.runtime.done";
pub const AGENT_RUNTIME_CLAUDE_SESSION: &str = "agent.runtime.claude-session";
pub const AGENT_RUNTIME_STDERR: &str = "agent.runtime.stderr";
pub const AGENT_RUNTIME_EVENT_UNKNOWN: &str = "agent.runtime.event.unknown";
pub const AGENT_RUNTIME_PROCESS_EXITED: &str = "agent.runtime.process.exited";
pub const AGENT_RUNTIME_PROCESS_ERROR: &str = "agent.runtime.process.error";
pub const AGENT_RUNTIME_RETRY: &str = "agent.runtime.retry";
pub const AGENT_RUNTIME_RETRY_CANCELLED: &str = "agent.runtime.retry.cancelled";

pub const AGENT_MESSAGE_SENT: &str = "agent.message.sent";
pub const AGENT_MESSAGE_RUNTIME_STARTED: &str = "agent.message.runtime_started";
pub const AGENT_INTERRUPTED: &str = "agent.interrupted";
