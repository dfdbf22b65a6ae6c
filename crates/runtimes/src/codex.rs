//! Codex exec backend (one-shot)
//!
//! Runs `codex exec --json <prompt>` and maps the experimental JSON event
//! stream into the envelope. Communication is one-shot: the prompt goes on
//! the command line and the child exits when the turn completes.

use serde_json::{json, Value};
use tokio::process::Command;
use tracing::info;

use crate::{launch, content_text, RuntimeError, RuntimeEvent, RuntimeHandle, RuntimeKind, SpawnSpec};

pub fn spawn(spec: &SpawnSpec) -> Result<RuntimeHandle, RuntimeError> {
    let mut cmd = Command::new(&spec.binary);
    cmd.arg("exec").arg("--json");
    if let Some(model) = &spec.model {
        cmd.arg("--model").arg(model);
    }
    cmd.arg("--skip-git-repo-check");
    cmd.arg(&spec.prompt);
    cmd.current_dir(&spec.cwd);
    for (key, value) in &spec.envs {
        cmd.env(key, value);
    }
    // Instructions ride along as developer context; codex exec has no
    // dedicated system-prompt flag.
    if let Some(instructions) = &spec.instructions {
        cmd.env("CODEX_DEVELOPER_INSTRUCTIONS", instructions);
    }

    info!(
        component = "runtime",
        event = "runtime.codex.spawn",
        binary = %spec.binary.display(),
        cwd = %spec.cwd.display(),
        "Spawning codex exec runtime"
    );

    launch(cmd, RuntimeKind::Codex, parse_line, false, Vec::new())
}

/// Map one codex exec JSON line into envelope events.
fn parse_line(value: &Value) -> Vec<RuntimeEvent> {
    let msg_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match msg_type {
        "session.created" | "thread.started" => vec![RuntimeEvent::Status {
            status: "running".into(),
            detail: None,
        }],
        "item.completed" => {
            let item = value.get("item").cloned().unwrap_or(Value::Null);
            let item_type = item.get("type").and_then(|v| v.as_str()).unwrap_or("");
            match item_type {
                "agent_message" | "assistant_message" => {
                    let text = item
                        .get("text")
                        .and_then(|v| v.as_str())
                        .map(String::from)
                        .or_else(|| content_text(&item));
                    vec![RuntimeEvent::Message {
                        message_type: "assistant".into(),
                        payload: item,
                        text,
                    }]
                }
                "reasoning" => vec![RuntimeEvent::Log {
                    level: "debug".into(),
                    message: item
                        .get("text")
                        .and_then(|v| v.as_str())
                        .unwrap_or("reasoning")
                        .to_string(),
                }],
                "command_execution" | "file_change" | "mcp_tool_call" => {
                    vec![RuntimeEvent::Message {
                        message_type: "tool".into(),
                        payload: item,
                        text: None,
                    }]
                }
                _ => vec![RuntimeEvent::Unknown { raw: value.clone() }],
            }
        }
        "turn.completed" => {
            let usage = value.get("usage").cloned().unwrap_or(Value::Null);
            vec![
                RuntimeEvent::Result {
                    result: json!({"usage": usage}),
                    stop_reason: Some("turn_completed".into()),
                },
                RuntimeEvent::Done {
                    status: "done".into(),
                    reason: None,
                },
            ]
        }
        "turn.failed" => {
            let message = value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("turn failed")
                .to_string();
            vec![
                RuntimeEvent::Error {
                    message,
                    stack: None,
                },
                RuntimeEvent::Done {
                    status: "failed".into(),
                    reason: Some("turn_failed".into()),
                },
            ]
        }
        "error" => vec![RuntimeEvent::Error {
            message: value
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("codex error")
                .to_string(),
            stack: None,
        }],
        _ => vec![RuntimeEvent::Unknown { raw: value.clone() }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_message_maps_to_assistant_message() {
        let line = json!({
            "type": "item.completed",
            "item": {"type": "agent_message", "text": "[UPDATE] scan finished"}
        });
        let events = parse_line(&line);
        match events.as_slice() {
            [RuntimeEvent::Message {
                message_type, text, ..
            }] => {
                assert_eq!(message_type, "assistant");
                assert_eq!(text.as_deref(), Some("[UPDATE] scan finished"));
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn turn_completed_yields_result_then_done() {
        let line = json!({"type": "turn.completed", "usage": {"input_tokens": 12}});
        let events = parse_line(&line);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], RuntimeEvent::Result { .. }));
        assert!(
            matches!(&events[1], RuntimeEvent::Done { status, .. } if status == "done")
        );
    }

    #[test]
    fn turn_failed_yields_error_then_failed_done() {
        let line = json!({
            "type": "turn.failed",
            "error": {"message": "model overloaded"}
        });
        let events = parse_line(&line);
        assert!(
            matches!(&events[0], RuntimeEvent::Error { message, .. } if message == "model overloaded")
        );
        assert!(
            matches!(&events[1], RuntimeEvent::Done { status, .. } if status == "failed")
        );
    }

    #[test]
    fn unrecognized_lines_are_unknown() {
        let events = parse_line(&json!({"type": "telemetry.blip"}));
        assert!(matches!(events.as_slice(), [RuntimeEvent::Unknown { .. }]));
    }
}
