//! Request routing
//!
//! Decodes one request line, dispatches on the action verb, and encodes the
//! typed result or the domain error. Everything a handler can throw carries a
//! stable error code; anything else would be a bug and surfaces as
//! `E_INTERNAL`.

use std::sync::Arc;

use serde_json::Value;

use crate::error::WrapperError;
use crate::orchestrator::Orchestrator;
use klaude_protocol::client::{
    Action, CheckoutPayload, InterruptPayload, MessagePayload, Request, StartAgentPayload,
};
use klaude_protocol::{ErrorCode, Response};

pub async fn handle_line(orchestrator: &Arc<Orchestrator>, line: &str) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            return Response::failure(ErrorCode::InvalidJson, format!("invalid request: {}", e))
        }
    };

    let Some(action) = Action::parse(&request.action) else {
        return Response::failure(
            ErrorCode::UnsupportedAction,
            format!("unsupported action: {}", request.action),
        );
    };

    let payload = Value::Object(request.payload_object());
    match dispatch(orchestrator, action, payload).await {
        Ok(result) => Response::success(result),
        Err(e) => Response::failure(e.code, e.message),
    }
}

async fn dispatch(
    orchestrator: &Arc<Orchestrator>,
    action: Action,
    payload: Value,
) -> Result<Value, WrapperError> {
    match action {
        Action::Ping => Ok(serde_json::to_value(orchestrator.handle_ping())?),
        Action::Status => Ok(serde_json::to_value(orchestrator.handle_status().await?)?),
        Action::StartAgent => {
            let payload: StartAgentPayload = decode_payload(payload)?;
            Ok(serde_json::to_value(
                orchestrator.handle_start_agent(payload).await?,
            )?)
        }
        Action::Checkout => {
            let payload: CheckoutPayload = decode_payload(payload)?;
            Ok(serde_json::to_value(
                orchestrator.handle_checkout(payload).await?,
            )?)
        }
        Action::Message => {
            let payload: MessagePayload = decode_payload(payload)?;
            Ok(serde_json::to_value(
                orchestrator.handle_message(payload).await?,
            )?)
        }
        Action::Interrupt => {
            let payload: InterruptPayload = decode_payload(payload)?;
            Ok(serde_json::to_value(
                orchestrator.handle_interrupt(payload).await?,
            )?)
        }
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, WrapperError> {
    serde_json::from_value(payload)
        .map_err(|e| WrapperError::new(ErrorCode::InvalidJson, format!("invalid payload: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::test_support::new_session;
    use crate::store::SessionRow;
    use klaude_protocol::{LinkSource, SessionStatus};

    struct Fixture {
        _guard: std::sync::MutexGuard<'static, ()>,
        _dir: tempfile::TempDir,
        orch: Arc<Orchestrator>,
    }

    fn setup() -> Fixture {
        let guard = crate::paths::test_env_lock();
        let dir = tempfile::tempdir().expect("tempdir");
        crate::paths::init_data_dir(Some(dir.path()));
        crate::paths::ensure_dirs().expect("ensure dirs");
        let project_root = dir.path().join("project");
        std::fs::create_dir_all(&project_root).expect("project dir");
        let orch = Orchestrator::initialize(project_root, Config::default(), Vec::new())
            .expect("initialize orchestrator");
        Fixture {
            _guard: guard,
            _dir: dir,
            orch,
        }
    }

    fn error_code(response: &Response) -> String {
        serde_json::to_value(response.error.as_ref().expect("error body")).unwrap()["code"]
            .as_str()
            .unwrap()
            .to_string()
    }

    /// Insert an agent session under the root with the given metadata.
    fn seed_session(fixture: &Fixture, agent_type: &str, metadata: Option<&str>) -> SessionRow {
        let mut session = new_session(fixture.orch.project.id, None, agent_type);
        session.parent_id = Some(fixture.orch.root_session_id.clone());
        session.metadata_json = metadata.map(String::from);
        fixture.orch.store.create_session(&session).unwrap();
        session
    }

    #[tokio::test]
    async fn ping_round_trips() {
        let fixture = setup();
        let response = handle_line(&fixture.orch, r#"{"action":"ping"}"#).await;
        assert!(response.ok);
        let result = response.result.unwrap();
        assert_eq!(result["pong"], true);
        assert!(result["timestamp"].is_string());
    }

    #[tokio::test]
    async fn unsupported_action_is_rejected() {
        let fixture = setup();
        let response = handle_line(&fixture.orch, r#"{"action":"self-destruct"}"#).await;
        assert!(!response.ok);
        assert_eq!(error_code(&response), "E_UNSUPPORTED_ACTION");
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let fixture = setup();
        let response = handle_line(&fixture.orch, "{not json").await;
        assert!(!response.ok);
        assert_eq!(error_code(&response), "E_INVALID_JSON");
    }

    #[tokio::test]
    async fn status_snapshots_the_root_session() {
        let fixture = setup();
        let response = handle_line(&fixture.orch, r#"{"action":"status"}"#).await;
        assert!(response.ok);
        let result = response.result.unwrap();
        assert_eq!(result["sessionId"], fixture.orch.root_session_id.as_str());
        assert_eq!(result["switching"], false);
        assert_eq!(result["agentRuntimes"], 0);
        assert!(result.get("tuiPid").is_none());
    }

    #[tokio::test]
    async fn start_agent_requires_type_and_prompt() {
        let fixture = setup();
        let response = handle_line(
            &fixture.orch,
            r#"{"action":"start-agent","payload":{"agentType":"","prompt":"x"}}"#,
        )
        .await;
        assert_eq!(error_code(&response), "E_AGENT_TYPE_REQUIRED");

        let response = handle_line(
            &fixture.orch,
            r#"{"action":"start-agent","payload":{"agentType":"planner","prompt":""}}"#,
        )
        .await;
        assert_eq!(error_code(&response), "E_PROMPT_REQUIRED");
    }

    #[tokio::test]
    async fn start_agent_rejects_unknown_type_with_available_list() {
        let fixture = setup();
        let response = handle_line(
            &fixture.orch,
            r#"{"action":"start-agent","payload":{"agentType":"nonexistent-xyz","prompt":"go"}}"#,
        )
        .await;
        assert_eq!(error_code(&response), "E_AGENT_TYPE_INVALID");
    }

    #[tokio::test]
    async fn start_agent_enforces_max_depth() {
        let fixture = setup();
        // Definition on disk so the lookup succeeds before the depth check.
        let agents_dir = fixture.orch.project_root.join(".claude").join("agents");
        std::fs::create_dir_all(&agents_dir).unwrap();
        std::fs::write(agents_dir.join("planner.md"), "Plan the work.\n").unwrap();

        // Chain root -> a -> b -> c puts c at depth 3 (the default max).
        let mut parent_id = fixture.orch.root_session_id.clone();
        for _ in 0..3 {
            let mut session = new_session(fixture.orch.project.id, None, "planner");
            session.parent_id = Some(parent_id.clone());
            fixture.orch.store.create_session(&session).unwrap();
            parent_id = session.id;
        }

        let request = serde_json::json!({
            "action": "start-agent",
            "payload": {
                "agentType": "planner",
                "prompt": "go deeper",
                "parentSessionId": parent_id,
            },
        });
        let response = handle_line(&fixture.orch, &request.to_string()).await;
        assert_eq!(error_code(&response), "E_MAX_DEPTH_EXCEEDED");
    }

    #[tokio::test]
    async fn checkout_without_resume_id_misses_immediately_when_wait_zero() {
        let fixture = setup();
        let request = serde_json::json!({
            "action": "checkout",
            "payload": {
                "sessionId": fixture.orch.root_session_id,
                "waitSeconds": 0,
            },
        });
        let response = handle_line(&fixture.orch, &request.to_string()).await;
        assert_eq!(error_code(&response), "E_SWITCH_TARGET_MISSING");
    }

    #[tokio::test]
    async fn checkout_rejects_negative_wait() {
        let fixture = setup();
        let request = serde_json::json!({
            "action": "checkout",
            "payload": { "sessionId": fixture.orch.root_session_id, "waitSeconds": -2 },
        });
        let response = handle_line(&fixture.orch, &request.to_string()).await;
        assert_eq!(error_code(&response), "E_INVALID_WAIT_VALUE");
    }

    #[tokio::test]
    async fn checkout_without_target_or_parent_is_missing() {
        let fixture = setup();
        // Root has no parent, so an empty checkout has nowhere to go.
        let response = handle_line(&fixture.orch, r#"{"action":"checkout"}"#).await;
        assert_eq!(error_code(&response), "E_SWITCH_TARGET_MISSING");
    }

    #[tokio::test]
    async fn checkout_with_known_link_fails_on_missing_tui_binary() {
        let fixture = setup();
        let session = seed_session(&fixture, "planner", None);
        fixture
            .orch
            .store
            .upsert_link(&session.id, "conv-42", None, LinkSource::Runtime)
            .unwrap();

        let request = serde_json::json!({
            "action": "checkout",
            "payload": { "sessionId": session.id, "waitSeconds": 0 },
        });
        let response = handle_line(&fixture.orch, &request.to_string()).await;
        // Resume resolution succeeds; the unconfigured TUI binary is the
        // first hard failure on the launch path.
        assert_eq!(error_code(&response), "E_TUI_BINARY_MISSING");
    }

    #[tokio::test]
    async fn interrupt_without_runtime_distinguishes_tracking_loss() {
        let fixture = setup();
        let session = seed_session(&fixture, "planner", None);

        let request = serde_json::json!({
            "action": "interrupt",
            "payload": { "sessionId": session.id },
        });
        let response = handle_line(&fixture.orch, &request.to_string()).await;
        assert_eq!(error_code(&response), "E_AGENT_NOT_RUNNING");

        // A ledgered pid with no tracked entry is a different failure.
        fixture
            .orch
            .store
            .insert_runtime_process(&session.id, 12345, "codex")
            .unwrap();
        let response = handle_line(&fixture.orch, &request.to_string()).await;
        assert_eq!(error_code(&response), "E_AGENT_RUNTIME_ENTRY_MISSING");
    }

    #[tokio::test]
    async fn interrupt_unknown_session_not_found() {
        let fixture = setup();
        let response = handle_line(
            &fixture.orch,
            r#"{"action":"interrupt","payload":{"sessionId":"01UNKNOWN"}}"#,
        )
        .await;
        assert_eq!(error_code(&response), "E_SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn message_to_one_shot_backend_is_unsupported() {
        let fixture = setup();
        let metadata = serde_json::json!({
            "definition": { "name": "planner", "instructions": "plan" },
            "runtime": { "primary": "codex" },
        })
        .to_string();
        let session = seed_session(&fixture, "planner", Some(&metadata));

        let request = serde_json::json!({
            "action": "message",
            "payload": { "sessionId": session.id, "prompt": "more work" },
        });
        let response = handle_line(&fixture.orch, &request.to_string()).await;
        assert_eq!(error_code(&response), "E_AGENT_MESSAGE_UNSUPPORTED");
    }

    #[tokio::test]
    async fn shorthand_envelope_fields_reach_the_handler() {
        let fixture = setup();
        let response = handle_line(
            &fixture.orch,
            r#"{"action":"interrupt","sessionId":"01UNKNOWN"}"#,
        )
        .await;
        assert_eq!(error_code(&response), "E_SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn session_project_mismatch_is_surfaced() {
        let fixture = setup();
        let other = fixture
            .orch
            .store
            .upsert_project("/somewhere/else", "ffffffffffffffffffffffff")
            .unwrap();
        let foreign = new_session(other.id, None, "tui");
        fixture.orch.store.create_session(&foreign).unwrap();

        let request = serde_json::json!({
            "action": "checkout",
            "payload": { "sessionId": foreign.id, "waitSeconds": 0 },
        });
        let response = handle_line(&fixture.orch, &request.to_string()).await;
        assert_eq!(error_code(&response), "E_SESSION_PROJECT_MISMATCH");
    }
}
