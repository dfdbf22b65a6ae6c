//! Configuration surface for the wrapper instance.
//!
//! Loaded from `<dataDir>/config.json` with env overrides. Every field has a
//! default except the TUI binary, which is validated at launch time so the
//! read-only CLI verbs still work without it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::WrapperError;
use crate::paths;
use klaude_protocol::{ErrorCode, RuntimeKind};

pub const DEFAULT_GRACE_SECONDS: f64 = 1.0;
pub const DEFAULT_MAX_AGENT_DEPTH: u32 = 3;
pub const DEFAULT_STARTUP_RETRIES: u32 = 3;
pub const DEFAULT_STARTUP_RETRY_DELAY_MS: u64 = 400;
pub const DEFAULT_STARTUP_RETRY_JITTER_MS: u64 = 200;
pub const DEFAULT_PERMISSION_MODE: &str = "bypassPermissions";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub wrapper: WrapperConfig,
    pub sdk: SdkConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WrapperConfig {
    /// Path to the foreground TUI binary. Required to launch a wrapper.
    pub claude_binary: Option<String>,
    pub projects_dir: Option<PathBuf>,
    pub socket_dir: Option<PathBuf>,
    pub switch: SwitchConfig,
    pub max_agent_depth: Option<u32>,
    /// Per-backend runtime settings, keyed by kind (`codex`, `cursor`, `gemini`).
    pub gpt: HashMap<String, GptRuntimeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchConfig {
    pub grace_seconds: f64,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            grace_seconds: DEFAULT_GRACE_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GptRuntimeConfig {
    pub binary_path: Option<String>,
    pub startup_retries: Option<u32>,
    pub startup_retry_delay_ms: Option<u64>,
    pub startup_retry_jitter_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SdkConfig {
    /// Binary implementing the native runner protocol.
    pub runner_binary: Option<String>,
    pub model: Option<String>,
    pub fallback_model: Option<String>,
    pub permission_mode: Option<String>,
    pub reasoning_effort: Option<String>,
}

/// Startup-retry knobs resolved per backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub jitter_ms: u64,
}

impl Config {
    /// Load from `<dataDir>/config.json`; a missing file means defaults, a
    /// malformed file is a warning plus defaults (the wrapper must still come
    /// up far enough to report useful errors).
    pub fn load() -> Self {
        let path = paths::config_path();
        let mut config = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Config>(&raw) {
                Ok(config) => config,
                Err(e) => {
                    warn!(
                        component = "config",
                        event = "config.parse_error",
                        path = %path.display(),
                        error = %e,
                        "Failed to parse config.json, using defaults"
                    );
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        };

        if let Ok(binary) = std::env::var("KLAUDE_CLAUDE_BINARY") {
            config.wrapper.claude_binary = Some(binary);
        }
        config
    }

    /// The TUI binary, validated to exist on disk.
    pub fn claude_binary(&self) -> Result<PathBuf, WrapperError> {
        let configured = self.wrapper.claude_binary.as_deref().ok_or_else(|| {
            WrapperError::new(
                ErrorCode::TuiBinaryMissing,
                "wrapper.claudeBinary is not configured",
            )
        })?;
        let path = PathBuf::from(configured);
        if !path.exists() {
            return Err(WrapperError::new(
                ErrorCode::TuiBinaryMissing,
                format!("TUI binary not found at {}", path.display()),
            ));
        }
        Ok(path)
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.wrapper
            .projects_dir
            .clone()
            .unwrap_or_else(paths::projects_dir)
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.wrapper
            .socket_dir
            .clone()
            .unwrap_or_else(paths::run_dir)
    }

    pub fn grace_seconds(&self) -> f64 {
        let configured = self.wrapper.switch.grace_seconds;
        if configured.is_finite() && configured >= 0.0 {
            configured
        } else {
            DEFAULT_GRACE_SECONDS
        }
    }

    pub fn max_agent_depth(&self) -> u32 {
        self.wrapper
            .max_agent_depth
            .unwrap_or(DEFAULT_MAX_AGENT_DEPTH)
    }

    pub fn permission_mode(&self) -> &str {
        self.sdk
            .permission_mode
            .as_deref()
            .unwrap_or(DEFAULT_PERMISSION_MODE)
    }

    /// Binary for a runtime kind. One-shot backends default to the vendor CLI
    /// name resolved via PATH; the native runner defaults to the bundled
    /// runner name.
    pub fn runtime_binary(&self, kind: RuntimeKind) -> PathBuf {
        match kind {
            RuntimeKind::Claude => PathBuf::from(
                self.sdk
                    .runner_binary
                    .as_deref()
                    .unwrap_or("klaude-sdk-runner"),
            ),
            _ => {
                let configured = self
                    .wrapper
                    .gpt
                    .get(kind.as_str())
                    .and_then(|c| c.binary_path.as_deref());
                PathBuf::from(configured.unwrap_or(match kind {
                    RuntimeKind::Codex => "codex",
                    RuntimeKind::Cursor => "cursor-agent",
                    RuntimeKind::Gemini => "gemini",
                    RuntimeKind::Claude => unreachable!(),
                }))
            }
        }
    }

    pub fn retry_config(&self, kind: RuntimeKind) -> RetryConfig {
        let gpt = self.wrapper.gpt.get(kind.as_str());
        RetryConfig {
            max_attempts: gpt
                .and_then(|c| c.startup_retries)
                .unwrap_or(DEFAULT_STARTUP_RETRIES)
                .max(1),
            delay_ms: gpt
                .and_then(|c| c.startup_retry_delay_ms)
                .unwrap_or(DEFAULT_STARTUP_RETRY_DELAY_MS),
            jitter_ms: gpt
                .and_then(|c| c.startup_retry_jitter_ms)
                .unwrap_or(DEFAULT_STARTUP_RETRY_JITTER_MS),
        }
    }

    /// Project-level MCP server definitions from `<project>/.mcp.json`.
    pub fn project_mcp_servers(project_root: &Path) -> HashMap<String, serde_json::Value> {
        let path = project_root.join(".mcp.json");
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return HashMap::new();
        };
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(value) => value
                .get("mcpServers")
                .and_then(|v| v.as_object())
                .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
            Err(e) => {
                warn!(
                    component = "config",
                    event = "config.mcp_parse_error",
                    path = %path.display(),
                    error = %e,
                    "Failed to parse .mcp.json"
                );
                HashMap::new()
            }
        }
    }
}
