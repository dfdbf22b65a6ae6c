//! Native claude runtime connector
//!
//! Spawns the SDK runner as a subprocess and communicates over NDJSON on
//! both pipes: an init payload followed by `{type:"message",prompt}` lines
//! on stdin, envelope events on stdout. This is the only bidirectional
//! backend; `message` requests are delivered to a live child's stdin.

use serde::Serialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::info;

use crate::{launch, RuntimeError, RuntimeEvent, RuntimeHandle, RuntimeKind, SpawnSpec};

/// Messages written to the runner's stdin.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StdinMessage<'a> {
    #[serde(rename_all = "camelCase")]
    Init {
        prompt: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        system_prompt: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        permission_mode: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning_effort: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        resume_session_id: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        mcp_servers: Option<&'a Value>,
    },
    Message { prompt: &'a str },
}

/// Serialize a follow-up `{type:"message",prompt}` stdin line.
pub fn message_line(prompt: &str) -> Result<String, RuntimeError> {
    Ok(serde_json::to_string(&StdinMessage::Message { prompt })?)
}

/// Spawn the native runner and deliver the init payload.
///
/// `mcp_servers` carries the resolved MCP visibility for the session; `None`
/// leaves the runner with its own defaults.
pub async fn spawn(
    spec: &SpawnSpec,
    mcp_servers: Option<&Value>,
) -> Result<RuntimeHandle, RuntimeError> {
    let mut cmd = Command::new(&spec.binary);
    cmd.current_dir(&spec.cwd);
    for (key, value) in &spec.envs {
        cmd.env(key, value);
    }

    info!(
        component = "runtime",
        event = "runtime.claude.spawn",
        binary = %spec.binary.display(),
        cwd = %spec.cwd.display(),
        resume = ?spec.resume_session_id,
        "Spawning native claude runtime"
    );

    let handle = launch(cmd, RuntimeKind::Claude, parse_line, true, Vec::new())?;

    let init = StdinMessage::Init {
        prompt: &spec.prompt,
        system_prompt: spec.instructions.as_deref(),
        model: spec.model.as_deref(),
        permission_mode: spec.permission_mode.as_deref(),
        reasoning_effort: spec.reasoning_effort.as_deref(),
        resume_session_id: spec.resume_session_id.as_deref(),
        mcp_servers,
    };
    let line = serde_json::to_string(&init)?;
    let stdin = handle.stdin_tx().ok_or(RuntimeError::StdinUnavailable)?;
    stdin
        .send(line)
        .await
        .map_err(|_| RuntimeError::ChannelClosed)?;

    Ok(handle)
}

/// The native runner emits the envelope directly; anything that fails to
/// deserialize is preserved as `unknown`.
fn parse_line(value: &Value) -> Vec<RuntimeEvent> {
    match serde_json::from_value::<RuntimeEvent>(value.clone()) {
        Ok(ev) => vec![ev],
        Err(_) => vec![RuntimeEvent::Unknown { raw: value.clone() }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_line_is_single_json_object() {
        let line = message_line("continue with step 2").unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["prompt"], "continue with step 2");
        assert!(!line.contains('\n'));
    }

    #[test]
    fn parse_line_passes_envelope_through() {
        let value = json!({"type": "status", "status": "running"});
        let events = parse_line(&value);
        assert!(matches!(
            events.as_slice(),
            [RuntimeEvent::Status { status, .. }] if status == "running"
        ));
    }

    #[test]
    fn parse_line_wraps_foreign_payloads_as_unknown() {
        let value = json!({"event": "totally-different-schema"});
        let events = parse_line(&value);
        assert!(matches!(events.as_slice(), [RuntimeEvent::Unknown { .. }]));
    }

    #[test]
    fn init_message_serializes_camel_case() {
        let init = StdinMessage::Init {
            prompt: "hello",
            system_prompt: Some("be brief"),
            model: None,
            permission_mode: Some("bypassPermissions"),
            reasoning_effort: None,
            resume_session_id: Some("conv-9"),
            mcp_servers: None,
        };
        let value = serde_json::to_value(&init).unwrap();
        assert_eq!(value["type"], "init");
        assert_eq!(value["systemPrompt"], "be brief");
        assert_eq!(value["resumeSessionId"], "conv-9");
        assert!(value.get("model").is_none());
    }
}
