//! Stable error codes carried in socket responses and CLI exit messages.

use serde::{Deserialize, Serialize};

/// Every failure the wrapper can report to a client. The wire encoding is the
/// `E_`-prefixed name and must never change for a released code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "E_INVALID_JSON")]
    InvalidJson,
    #[serde(rename = "E_UNSUPPORTED_ACTION")]
    UnsupportedAction,
    #[serde(rename = "E_INTERNAL")]
    Internal,
    #[serde(rename = "E_SESSION_NOT_FOUND")]
    SessionNotFound,
    #[serde(rename = "E_SESSION_PROJECT_MISMATCH")]
    SessionProjectMismatch,
    #[serde(rename = "E_AGENT_TYPE_REQUIRED")]
    AgentTypeRequired,
    #[serde(rename = "E_PROMPT_REQUIRED")]
    PromptRequired,
    #[serde(rename = "E_AGENT_TYPE_INVALID")]
    AgentTypeInvalid,
    #[serde(rename = "E_AGENT_TYPE_NOT_ALLOWED")]
    AgentTypeNotAllowed,
    #[serde(rename = "E_AGENT_INSTRUCTIONS_MISSING")]
    AgentInstructionsMissing,
    #[serde(rename = "E_MAX_DEPTH_EXCEEDED")]
    MaxDepthExceeded,
    #[serde(rename = "E_CHECKOUT_IN_PROGRESS")]
    CheckoutInProgress,
    #[serde(rename = "E_SWITCH_TARGET_MISSING")]
    SwitchTargetMissing,
    #[serde(rename = "E_INVALID_WAIT_VALUE")]
    InvalidWaitValue,
    #[serde(rename = "E_AGENT_RUNTIME_TIMEOUT")]
    AgentRuntimeTimeout,
    #[serde(rename = "E_AGENT_MESSAGE_UNSUPPORTED")]
    AgentMessageUnsupported,
    #[serde(rename = "E_AGENT_STDIN_UNAVAILABLE")]
    AgentStdinUnavailable,
    #[serde(rename = "E_MESSAGE_SEND_FAILED")]
    MessageSendFailed,
    #[serde(rename = "E_AGENT_NOT_RUNNING")]
    AgentNotRunning,
    #[serde(rename = "E_AGENT_PID_UNAVAILABLE")]
    AgentPidUnavailable,
    #[serde(rename = "E_INTERRUPT_FAILED")]
    InterruptFailed,
    #[serde(rename = "E_TUI_BINARY_MISSING")]
    TuiBinaryMissing,
    #[serde(rename = "E_TUI_LAUNCH_FAILED")]
    TuiLaunchFailed,
    #[serde(rename = "E_HOOK_TIMEOUT")]
    HookTimeout,
    #[serde(rename = "E_AGENT_RUNTIME_ENTRY_MISSING")]
    AgentRuntimeEntryMissing,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidJson => "E_INVALID_JSON",
            ErrorCode::UnsupportedAction => "E_UNSUPPORTED_ACTION",
            ErrorCode::Internal => "E_INTERNAL",
            ErrorCode::SessionNotFound => "E_SESSION_NOT_FOUND",
            ErrorCode::SessionProjectMismatch => "E_SESSION_PROJECT_MISMATCH",
            ErrorCode::AgentTypeRequired => "E_AGENT_TYPE_REQUIRED",
            ErrorCode::PromptRequired => "E_PROMPT_REQUIRED",
            ErrorCode::AgentTypeInvalid => "E_AGENT_TYPE_INVALID",
            ErrorCode::AgentTypeNotAllowed => "E_AGENT_TYPE_NOT_ALLOWED",
            ErrorCode::AgentInstructionsMissing => "E_AGENT_INSTRUCTIONS_MISSING",
            ErrorCode::MaxDepthExceeded => "E_MAX_DEPTH_EXCEEDED",
            ErrorCode::CheckoutInProgress => "E_CHECKOUT_IN_PROGRESS",
            ErrorCode::SwitchTargetMissing => "E_SWITCH_TARGET_MISSING",
            ErrorCode::InvalidWaitValue => "E_INVALID_WAIT_VALUE",
            ErrorCode::AgentRuntimeTimeout => "E_AGENT_RUNTIME_TIMEOUT",
            ErrorCode::AgentMessageUnsupported => "E_AGENT_MESSAGE_UNSUPPORTED",
            ErrorCode::AgentStdinUnavailable => "E_AGENT_STDIN_UNAVAILABLE",
            ErrorCode::MessageSendFailed => "E_MESSAGE_SEND_FAILED",
            ErrorCode::AgentNotRunning => "E_AGENT_NOT_RUNNING",
            ErrorCode::AgentPidUnavailable => "E_AGENT_PID_UNAVAILABLE",
            ErrorCode::InterruptFailed => "E_INTERRUPT_FAILED",
            ErrorCode::TuiBinaryMissing => "E_TUI_BINARY_MISSING",
            ErrorCode::TuiLaunchFailed => "E_TUI_LAUNCH_FAILED",
            ErrorCode::HookTimeout => "E_HOOK_TIMEOUT",
            ErrorCode::AgentRuntimeEntryMissing => "E_AGENT_RUNTIME_ENTRY_MISSING",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_encoding_matches_as_str() {
        for code in [
            ErrorCode::InvalidJson,
            ErrorCode::UnsupportedAction,
            ErrorCode::MaxDepthExceeded,
            ErrorCode::CheckoutInProgress,
            ErrorCode::HookTimeout,
            ErrorCode::AgentRuntimeEntryMissing,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
            let back: ErrorCode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, code);
        }
    }
}
