//! Gemini CLI backend (one-shot stream)
//!
//! Runs the gemini CLI with `--output-format stream-json`. The CLI has no
//! system-prompt flag; instructions are written to a scratch file referenced
//! by `GEMINI_SYSTEM_MD`, which the handle deletes when the process is gone.

use std::path::PathBuf;

use serde_json::Value;
use tokio::process::Command;
use tracing::info;

use crate::{launch, RuntimeError, RuntimeEvent, RuntimeHandle, RuntimeKind, SpawnSpec};

pub fn spawn(spec: &SpawnSpec) -> Result<RuntimeHandle, RuntimeError> {
    let mut cleanup_paths = Vec::new();

    let mut cmd = Command::new(&spec.binary);
    cmd.arg("--output-format").arg("stream-json");
    if let Some(model) = &spec.model {
        cmd.arg("--model").arg(model);
    }
    cmd.arg("--prompt").arg(&spec.prompt);
    cmd.current_dir(&spec.cwd);
    for (key, value) in &spec.envs {
        cmd.env(key, value);
    }

    if let Some(instructions) = &spec.instructions {
        let path = system_prompt_path();
        std::fs::write(&path, instructions)?;
        cmd.env("GEMINI_SYSTEM_MD", &path);
        cleanup_paths.push(path);
    }

    info!(
        component = "runtime",
        event = "runtime.gemini.spawn",
        binary = %spec.binary.display(),
        cwd = %spec.cwd.display(),
        "Spawning gemini runtime"
    );

    launch(cmd, RuntimeKind::Gemini, parse_line, false, cleanup_paths)
}

fn system_prompt_path() -> PathBuf {
    std::env::temp_dir().join(format!("klaude-gemini-{}.md", ulid::Ulid::new()))
}

fn parse_line(value: &Value) -> Vec<RuntimeEvent> {
    let msg_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match msg_type {
        "init" | "session_start" => vec![RuntimeEvent::Status {
            status: "running".into(),
            detail: None,
        }],
        "message" | "content" => {
            let text = value
                .get("text")
                .or_else(|| value.get("content"))
                .and_then(|v| v.as_str())
                .map(String::from);
            vec![RuntimeEvent::Message {
                message_type: value
                    .get("role")
                    .and_then(|v| v.as_str())
                    .unwrap_or("assistant")
                    .to_string(),
                payload: value.clone(),
                text,
            }]
        }
        "tool_use" | "tool_result" => vec![RuntimeEvent::Message {
            message_type: "tool".into(),
            payload: value.clone(),
            text: None,
        }],
        "result" => {
            let status = value.get("status").and_then(|v| v.as_str()).unwrap_or("");
            let failed = status == "error" || status == "failed";
            vec![
                RuntimeEvent::Result {
                    result: value.clone(),
                    stop_reason: value
                        .get("stop_reason")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                },
                RuntimeEvent::Done {
                    status: if failed { "failed" } else { "done" }.into(),
                    reason: None,
                },
            ]
        }
        "error" => vec![RuntimeEvent::Error {
            message: value
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("gemini error")
                .to_string(),
            stack: None,
        }],
        _ => vec![RuntimeEvent::Unknown { raw: value.clone() }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_lines_become_messages() {
        let events = parse_line(&json!({"type": "content", "role": "assistant", "text": "hi"}));
        match events.as_slice() {
            [RuntimeEvent::Message {
                message_type, text, ..
            }] => {
                assert_eq!(message_type, "assistant");
                assert_eq!(text.as_deref(), Some("hi"));
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn result_status_error_maps_to_failed() {
        let events = parse_line(&json!({"type": "result", "status": "error"}));
        assert!(
            matches!(&events[1], RuntimeEvent::Done { status, .. } if status == "failed")
        );
    }

    #[test]
    fn scratch_paths_are_unique() {
        assert_ne!(system_prompt_path(), system_prompt_path());
    }
}
