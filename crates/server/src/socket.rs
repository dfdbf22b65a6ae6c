//! Unix-domain socket control channel
//!
//! One newline-delimited JSON request per connection, one response, then the
//! connection closes. Stale socket files are unlinked before binding so a
//! crashed instance never blocks its successor.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::orchestrator::Orchestrator;
use crate::router;
use klaude_protocol::{ErrorCode, Response};

/// Requests larger than this are rejected outright.
const MAX_REQUEST_BYTES: u64 = 1024 * 1024;

/// Bind the instance socket, unlinking any stale file first.
pub fn bind(path: &Path) -> std::io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    info!(
        component = "socket",
        event = "socket.listening",
        path = %path.display(),
        "Listening for control requests"
    );
    Ok(listener)
}

/// Accept loop; one task per connection.
pub async fn serve(listener: UnixListener, orchestrator: Arc<Orchestrator>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let orch = orchestrator.clone();
                tokio::spawn(async move {
                    handle_connection(stream, orch).await;
                });
            }
            Err(e) => {
                warn!(
                    component = "socket",
                    event = "socket.accept_error",
                    error = %e,
                    "Failed to accept connection"
                );
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, orchestrator: Arc<Orchestrator>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half).take(MAX_REQUEST_BYTES);

    let mut line = String::new();
    let response = match reader.read_line(&mut line).await {
        Ok(0) => return, // client connected and went away
        Ok(_) => {
            debug!(
                component = "socket",
                event = "socket.request",
                bytes = line.len(),
                "Received request line"
            );
            router::handle_line(&orchestrator, line.trim()).await
        }
        Err(e) => Response::failure(
            ErrorCode::Internal,
            format!("failed to read request: {}", e),
        ),
    };

    let mut encoded = match serde_json::to_string(&response) {
        Ok(s) => s,
        Err(e) => {
            warn!(
                component = "socket",
                event = "socket.encode_error",
                error = %e,
                "Failed to encode response"
            );
            return;
        }
    };
    encoded.push('\n');

    if let Err(e) = write_half.write_all(encoded.as_bytes()).await {
        debug!(
            component = "socket",
            event = "socket.write_error",
            error = %e,
            "Failed to write response"
        );
    }
    let _ = write_half.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client;
    use crate::config::Config;
    use crate::orchestrator::Orchestrator;
    use klaude_protocol::client::{Action, Request};

    #[tokio::test]
    async fn one_request_one_response_over_the_socket() {
        let _guard = crate::paths::test_env_lock();
        let dir = tempfile::tempdir().expect("tempdir");
        crate::paths::init_data_dir(Some(dir.path()));
        crate::paths::ensure_dirs().expect("ensure dirs");
        let project_root = dir.path().join("project");
        std::fs::create_dir_all(&project_root).expect("project dir");

        let orch = Orchestrator::initialize(project_root, Config::default(), Vec::new())
            .expect("initialize");

        let socket_path = dir.path().join("test.sock");
        let listener = bind(&socket_path).expect("bind");
        let serve_orch = orch.clone();
        tokio::spawn(async move {
            serve(listener, serve_orch).await;
        });

        let request = Request::new(Action::Ping, serde_json::json!({}));
        let response = client::send_request(&socket_path, &request)
            .await
            .expect("ping response");
        assert!(response.ok);
        assert_eq!(response.result.unwrap()["pong"], true);

        // Stale file handling: rebinding over the same path succeeds.
        drop(bind(&socket_path).expect("rebind over stale socket"));
    }
}
