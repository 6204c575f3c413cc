//! Wire envelopes exchanged with the backend
//!
//! Field names are part of the wire format and must not change.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name the backend uses to mark a failed call
pub const ERROR_EVENT: &str = "error";

const UNKNOWN_ERROR: &str = "Unknown error";

/// A call from client to backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub id: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl OutboundEnvelope {
    pub fn new(id: impl Into<String>, action: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            payload,
        }
    }
}

/// A reply or push event from backend to client
///
/// Replies carry the `id` of the call they answer. Push events carry no `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl InboundEnvelope {
    /// A push event
    pub fn event(event: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            id: None,
            event: event.into(),
            payload,
        }
    }

    /// A successful reply; the backend echoes the action as the event name
    pub fn reply(id: impl Into<String>, action: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            id: Some(id.into()),
            event: action.into(),
            payload,
        }
    }

    /// An error reply carrying `message`
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            event: ERROR_EVENT.to_string(),
            payload: Some(serde_json::json!({ "message": message.into() })),
        }
    }

    pub fn is_error(&self) -> bool {
        self.event == ERROR_EVENT
    }

    /// Server-supplied message of an error reply
    pub fn error_message(&self) -> String {
        self.payload
            .as_ref()
            .and_then(|p| p.get("message"))
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(UNKNOWN_ERROR)
            .to_string()
    }

    /// Payload, with an absent payload read as JSON `null`
    pub fn into_payload(self) -> Value {
        self.payload.unwrap_or(Value::Null)
    }
}
