//! Socket client for the CLI verbs
//!
//! Finds the live wrapper instance for the current project via the on-disk
//! registry, sends one NDJSON request, reads one response, and exits non-zero
//! on a domain error with the code preserved in the message.

use std::path::Path;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::registry;
use klaude_protocol::client::{Action, Request};
use klaude_protocol::{InstanceInfo, Response};

/// Pick the instance to talk to for a project.
///
/// `KLAUDE_INSTANCE_ID` (exported into every child shell) pins the choice;
/// otherwise the most recently started live instance wins.
pub fn resolve_instance(project_hash: &str) -> anyhow::Result<InstanceInfo> {
    let mut instances = registry::list_instances(project_hash);
    if instances.is_empty() {
        anyhow::bail!(
            "no running klaude instance for this project; start one with `klaude`"
        );
    }
    if let Ok(pinned) = std::env::var("KLAUDE_INSTANCE_ID") {
        if let Some(found) = instances.iter().find(|i| i.instance_id == pinned) {
            return Ok(found.clone());
        }
    }
    instances.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Ok(instances.remove(0))
}

/// Send one request to a socket and return the decoded response envelope.
pub async fn send_request(socket_path: &Path, request: &Request) -> anyhow::Result<Response> {
    let stream = UnixStream::connect(socket_path).await.map_err(|e| {
        anyhow::anyhow!(
            "failed to connect to {} ({}); the instance may have exited",
            socket_path.display(),
            e
        )
    })?;
    let (read_half, mut write_half) = stream.into_split();

    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    write_half.write_all(line.as_bytes()).await?;
    write_half.shutdown().await?;

    let mut reader = BufReader::new(read_half);
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await?;
    if response_line.trim().is_empty() {
        anyhow::bail!("empty response from wrapper");
    }
    Ok(serde_json::from_str(response_line.trim())?)
}

/// Send a request to the project's live instance; unwrap the result or turn
/// the error body into a CLI-friendly failure.
pub async fn call(project_root: &Path, action: Action, payload: Value) -> anyhow::Result<Value> {
    let hash = crate::paths::project_hash(project_root);
    let instance = resolve_instance(&hash)?;
    let request = Request::new(action, payload);
    let response = send_request(Path::new(&instance.socket_path), &request).await?;
    if response.ok {
        Ok(response.result.unwrap_or(Value::Null))
    } else {
        let error = response
            .error
            .map(|e| format!("{}: {}", e.code, e.message))
            .unwrap_or_else(|| "unknown error".to_string());
        anyhow::bail!("{}", error)
    }
}
