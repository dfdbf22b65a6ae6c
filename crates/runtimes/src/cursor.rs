//! Cursor agent backend (one-shot stream)
//!
//! Runs `cursor-agent --print --output-format stream-json` and maps its
//! Claude-flavored stream into the envelope.

use serde_json::Value;
use tokio::process::Command;
use tracing::info;

use crate::{launch, content_text, RuntimeError, RuntimeEvent, RuntimeHandle, RuntimeKind, SpawnSpec};

pub fn spawn(spec: &SpawnSpec) -> Result<RuntimeHandle, RuntimeError> {
    let mut cmd = Command::new(&spec.binary);
    cmd.arg("--print").arg("--output-format").arg("stream-json");
    if let Some(model) = &spec.model {
        cmd.arg("--model").arg(model);
    }
    cmd.arg(&spec.prompt);
    cmd.current_dir(&spec.cwd);
    for (key, value) in &spec.envs {
        cmd.env(key, value);
    }
    if let Some(instructions) = &spec.instructions {
        cmd.env("CURSOR_SYSTEM_PROMPT", instructions);
    }

    info!(
        component = "runtime",
        event = "runtime.cursor.spawn",
        binary = %spec.binary.display(),
        cwd = %spec.cwd.display(),
        "Spawning cursor runtime"
    );

    launch(cmd, RuntimeKind::Cursor, parse_line, false, Vec::new())
}

fn parse_line(value: &Value) -> Vec<RuntimeEvent> {
    let msg_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match msg_type {
        "system" => {
            let subtype = value.get("subtype").and_then(|v| v.as_str()).unwrap_or("");
            if subtype == "init" {
                vec![RuntimeEvent::Status {
                    status: "running".into(),
                    detail: value
                        .get("model")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                }]
            } else {
                vec![RuntimeEvent::Log {
                    level: "info".into(),
                    message: format!("system.{}", subtype),
                }]
            }
        }
        "assistant" | "user" => {
            let message = value.get("message").cloned().unwrap_or(Value::Null);
            let text = content_text(&message);
            vec![RuntimeEvent::Message {
                message_type: msg_type.to_string(),
                payload: message,
                text,
            }]
        }
        "result" => {
            let is_error = value
                .get("is_error")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let mut events = vec![RuntimeEvent::Result {
                result: value.clone(),
                stop_reason: value
                    .get("subtype")
                    .and_then(|v| v.as_str())
                    .map(String::from),
            }];
            events.push(RuntimeEvent::Done {
                status: if is_error { "failed" } else { "done" }.into(),
                reason: None,
            });
            events
        }
        _ => vec![RuntimeEvent::Unknown { raw: value.clone() }],
    }
}
