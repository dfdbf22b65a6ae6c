//! Client → wrapper requests
//!
//! One request per connection: a single JSON object terminated by `\n`.
//! The canonical shape is `{action, payload}`, but older clients put the
//! payload fields directly on the envelope; `Request::payload_object` merges
//! both so handlers see one object either way.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Action verbs understood by the wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Ping,
    Status,
    StartAgent,
    Checkout,
    Message,
    Interrupt,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Ping => "ping",
            Action::Status => "status",
            Action::StartAgent => "start-agent",
            Action::Checkout => "checkout",
            Action::Message => "message",
            Action::Interrupt => "interrupt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ping" => Some(Action::Ping),
            "status" => Some(Action::Status),
            "start-agent" => Some(Action::StartAgent),
            "checkout" => Some(Action::Checkout),
            "message" => Some(Action::Message),
            "interrupt" => Some(Action::Interrupt),
            _ => None,
        }
    }
}

/// Request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Shorthand fields for backwards compat (payload fields on the envelope).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Request {
    pub fn new(action: Action, payload: Value) -> Self {
        Self {
            action: action.as_str().to_string(),
            payload: Some(payload),
            extra: Map::new(),
        }
    }

    /// The effective payload: explicit `payload` keys win over envelope
    /// shorthand fields.
    pub fn payload_object(&self) -> Map<String, Value> {
        let mut merged = self.extra.clone();
        if let Some(Value::Object(payload)) = &self.payload {
            for (k, v) in payload {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }
}

/// `start-agent` payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAgentPayload {
    #[serde(default)]
    pub agent_type: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<StartAgentOptions>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAgentOptions {
    #[serde(default)]
    pub checkout: bool,
    #[serde(default)]
    pub share: bool,
    #[serde(default)]
    pub detach: bool,
}

/// `checkout` payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<f64>,
}

/// `message` payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<f64>,
}

/// `interrupt` payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterruptPayload {
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_object_prefers_explicit_payload() {
        let req: Request = serde_json::from_str(
            r#"{"action":"checkout","sessionId":"shorthand","payload":{"sessionId":"explicit"}}"#,
        )
        .unwrap();
        let merged = req.payload_object();
        assert_eq!(merged.get("sessionId"), Some(&json!("explicit")));
    }

    #[test]
    fn shorthand_fields_alone_form_the_payload() {
        let req: Request =
            serde_json::from_str(r#"{"action":"interrupt","sessionId":"s1","signal":"SIGTERM"}"#)
                .unwrap();
        let payload: InterruptPayload =
            serde_json::from_value(Value::Object(req.payload_object())).unwrap();
        assert_eq!(payload.session_id, "s1");
        assert_eq!(payload.signal.as_deref(), Some("SIGTERM"));
    }

    #[test]
    fn action_verbs_round_trip() {
        for action in [
            Action::Ping,
            Action::Status,
            Action::StartAgent,
            Action::Checkout,
            Action::Message,
            Action::Interrupt,
        ] {
            assert_eq!(Action::parse(action.as_str()), Some(action));
        }
    }

    #[test]
    fn start_agent_options_default_to_false() {
        let payload: StartAgentPayload =
            serde_json::from_str(r#"{"agentType":"planner","prompt":"go"}"#).unwrap();
        assert!(payload.options.is_none());
        let opts: StartAgentOptions = serde_json::from_str(r#"{"share":true}"#).unwrap();
        assert!(opts.share);
        assert!(!opts.checkout);
        assert!(!opts.detach);
    }
}
