//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// Lifecycle status of a logical session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Running,
    Done,
    Failed,
    Interrupted,
    Orphaned,
}

impl SessionStatus {
    /// Terminal statuses are absorbing: a session never leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Done
                | SessionStatus::Failed
                | SessionStatus::Interrupted
                | SessionStatus::Orphaned
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Running => "running",
            SessionStatus::Done => "done",
            SessionStatus::Failed => "failed",
            SessionStatus::Interrupted => "interrupted",
            SessionStatus::Orphaned => "orphaned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "running" => Some(SessionStatus::Running),
            "done" => Some(SessionStatus::Done),
            "failed" => Some(SessionStatus::Failed),
            "interrupted" => Some(SessionStatus::Interrupted),
            "orphaned" => Some(SessionStatus::Orphaned),
            _ => None,
        }
    }
}

/// Agent runtime backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    /// Bidirectional stream-json CLI (foreground TUI's headless mode)
    Claude,
    /// One-shot exec CLI, JSON per line on stdout
    Codex,
    /// One-shot stream CLI, JSON per line on stdout
    Cursor,
    /// One-shot stream CLI, system prompt delivered via env-pointed file
    Gemini,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Claude => "claude",
            RuntimeKind::Codex => "codex",
            RuntimeKind::Cursor => "cursor",
            RuntimeKind::Gemini => "gemini",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claude" => Some(RuntimeKind::Claude),
            "codex" => Some(RuntimeKind::Codex),
            "cursor" => Some(RuntimeKind::Cursor),
            "gemini" => Some(RuntimeKind::Gemini),
            _ => None,
        }
    }

    /// One-shot kinds qualify for startup retry; the bidirectional CLI does not.
    pub fn is_one_shot(&self) -> bool {
        !matches!(self, RuntimeKind::Claude)
    }
}

/// Where a claude-session link came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkSource {
    /// session-start hook with a fresh conversation
    Startup,
    /// session-start hook after `--resume`
    Resume,
    /// `claude-session` event from a headless runtime
    Runtime,
}

impl LinkSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkSource::Startup => "startup",
            LinkSource::Resume => "resume",
            LinkSource::Runtime => "runtime",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "startup" => Some(LinkSource::Startup),
            "resume" => Some(LinkSource::Resume),
            "runtime" => Some(LinkSource::Runtime),
            _ => None,
        }
    }
}

/// A registered wrapper instance, as stored in `instances.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub instance_id: String,
    pub pid: u32,
    pub socket_path: String,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_absorbing() {
        assert!(SessionStatus::Done.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(SessionStatus::Interrupted.is_terminal());
        assert!(SessionStatus::Orphaned.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Running,
            SessionStatus::Done,
            SessionStatus::Failed,
            SessionStatus::Interrupted,
            SessionStatus::Orphaned,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("bogus"), None);
    }

    #[test]
    fn only_claude_is_bidirectional() {
        assert!(!RuntimeKind::Claude.is_one_shot());
        assert!(RuntimeKind::Codex.is_one_shot());
        assert!(RuntimeKind::Cursor.is_one_shot());
        assert!(RuntimeKind::Gemini.is_one_shot());
    }
}
