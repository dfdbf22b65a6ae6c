//! Klaude Runtime Connectors
//!
//! Connectors for the four headless agent backends. Each connector spawns a
//! CLI subprocess and translates its stdout stream into the common
//! [`RuntimeEvent`] envelope. Shared plumbing (line-buffered readers, stdin
//! writer, output tracking for startup-failure detection) lives here; the
//! backend modules own argv construction and the vendor-schema mapping.

pub mod claude;
pub mod codex;
pub mod cursor;
pub mod gemini;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

pub use klaude_protocol::RuntimeKind;

/// Errors that can occur in runtime connectors
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn runtime process: {0}")]
    Spawn(String),

    #[error("runtime io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("runtime json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("runtime stdin unavailable")]
    StdinUnavailable,

    #[error("runtime channel closed")]
    ChannelClosed,
}

/// Typed envelope every backend's stdout is mapped into.
///
/// The native runtime emits these objects directly; the vendor backends are
/// translated by their connector's parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RuntimeEvent {
    #[serde(rename_all = "camelCase")]
    Status {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Message {
        message_type: String,
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Log { level: String, message: String },
    #[serde(rename_all = "camelCase")]
    Result {
        result: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ClaudeSession {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript_path: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Unknown { raw: Value },
}

/// One item from a runtime's combined output streams.
#[derive(Debug, Clone)]
pub enum StreamItem {
    /// Parsed (or mapped) stdout envelope event
    Event(RuntimeEvent),
    /// Raw stderr line
    Stderr(String),
}

/// Everything a backend needs to build its process.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub binary: PathBuf,
    pub cwd: PathBuf,
    pub prompt: String,
    /// Agent definition instructions (system prompt), when present.
    pub instructions: Option<String>,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    pub reasoning_effort: Option<String>,
    /// Underlying conversation to resume (native backend only).
    pub resume_session_id: Option<String>,
    /// Extra environment exported to the child (`KLAUDE_*`).
    pub envs: Vec<(String, String)>,
}

/// Handle to a spawned runtime child. The caller owns supervision: it drains
/// `events` until the channel closes, then awaits the exit status.
pub struct RuntimeHandle {
    pub kind: RuntimeKind,
    pub pid: u32,
    child: Child,
    events: mpsc::Receiver<StreamItem>,
    stdin_tx: Option<mpsc::Sender<String>>,
    saw_output: Arc<AtomicBool>,
    /// Files to delete once the process is gone (e.g. system-prompt temp file).
    cleanup_paths: Vec<PathBuf>,
}

impl RuntimeHandle {
    /// Receive the next stream item; `None` once both pipe readers finished.
    pub async fn next_item(&mut self) -> Option<StreamItem> {
        self.events.recv().await
    }

    /// Wait for the child to exit. Call after the event channel closes.
    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    /// Whether the child produced at least one stdout or stderr byte.
    /// A clean-exit child with no output is classified as a startup failure.
    pub fn saw_output(&self) -> bool {
        self.saw_output.load(Ordering::SeqCst)
    }

    /// Sender for stdin lines (native backend only).
    pub fn stdin_tx(&self) -> Option<mpsc::Sender<String>> {
        self.stdin_tx.clone()
    }

    /// Remove per-process scratch files. Safe to call more than once.
    pub fn cleanup(&mut self) {
        for path in self.cleanup_paths.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        component = "runtime",
                        event = "runtime.cleanup.failed",
                        path = %path.display(),
                        error = %e,
                        "Failed to remove runtime scratch file"
                    );
                }
            }
        }
    }
}

impl Drop for RuntimeHandle {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Spawn a backend process and wire up the shared reader/writer tasks.
///
/// `parser` maps one stdout JSON value to envelope events. Lines that are not
/// JSON at all surface as [`RuntimeEvent::Unknown`] so nothing a child prints
/// is silently dropped.
pub(crate) fn launch(
    mut cmd: Command,
    kind: RuntimeKind,
    parser: fn(&Value) -> Vec<RuntimeEvent>,
    want_stdin: bool,
    cleanup_paths: Vec<PathBuf>,
) -> Result<RuntimeHandle, RuntimeError> {
    cmd.stdin(if want_stdin {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| RuntimeError::Spawn(format!("{}: {}", kind.as_str(), e)))?;

    let pid = child
        .id()
        .ok_or_else(|| RuntimeError::Spawn(format!("{}: no pid after spawn", kind.as_str())))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RuntimeError::Spawn(format!("{}: no stdout pipe", kind.as_str())))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| RuntimeError::Spawn(format!("{}: no stderr pipe", kind.as_str())))?;

    let (event_tx, event_rx) = mpsc::channel::<StreamItem>(256);
    let saw_output = Arc::new(AtomicBool::new(false));

    // Stdout reader: one line, one JSON value, parser maps to envelope events.
    {
        let tx = event_tx.clone();
        let saw = saw_output.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        saw.store(true, Ordering::SeqCst);
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let events = match serde_json::from_str::<Value>(line) {
                            Ok(value) => parser(&value),
                            Err(e) => {
                                debug!(
                                    component = "runtime",
                                    event = "runtime.stdout.parse_error",
                                    kind = kind.as_str(),
                                    error = %e,
                                    "Non-JSON stdout line from runtime"
                                );
                                vec![RuntimeEvent::Unknown {
                                    raw: Value::String(line.to_string()),
                                }]
                            }
                        };
                        for ev in events {
                            if tx.send(StreamItem::Event(ev)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        error!(
                            component = "runtime",
                            event = "runtime.stdout.read_error",
                            kind = kind.as_str(),
                            error = %e,
                            "Error reading runtime stdout"
                        );
                        return;
                    }
                }
            }
        });
    }

    // Stderr reader: forwarded verbatim for event recording.
    {
        let tx = event_tx;
        let saw = saw_output.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                saw.store(true, Ordering::SeqCst);
                if tx.send(StreamItem::Stderr(line)).await.is_err() {
                    return;
                }
            }
        });
    }

    // Stdin writer task: channel in, newline-terminated lines out.
    let stdin_tx = if want_stdin {
        let stdin = child.stdin.take().ok_or(RuntimeError::StdinUnavailable)?;
        let (tx, rx) = mpsc::channel::<String>(256);
        tokio::spawn(stdin_writer(stdin, rx));
        Some(tx)
    } else {
        None
    };

    Ok(RuntimeHandle {
        kind,
        pid,
        child,
        events: event_rx,
        stdin_tx,
        saw_output,
        cleanup_paths,
    })
}

async fn stdin_writer(mut stdin: tokio::process::ChildStdin, mut rx: mpsc::Receiver<String>) {
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            error!(
                component = "runtime",
                event = "runtime.stdin.write_error",
                error = %e,
                "Failed to write to runtime stdin"
            );
            break;
        }
        if let Err(e) = stdin.flush().await {
            error!(
                component = "runtime",
                event = "runtime.stdin.flush_error",
                error = %e,
                "Failed to flush runtime stdin"
            );
            break;
        }
    }
    debug!(
        component = "runtime",
        event = "runtime.stdin.closed",
        "Stdin writer task ended"
    );
}

/// Extract concatenated text from an Anthropic-style content block array.
pub(crate) fn content_text(message: &Value) -> Option<String> {
    let blocks = message.get("content")?.as_array()?;
    let mut text = String::new();
    for block in blocks {
        if block.get("type").and_then(|t| t.as_str()) == Some("text") {
            if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(t);
            }
        }
    }
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
