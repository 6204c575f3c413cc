//! Typed backend protocol
//!
//! Every action the backend handles and every event it pushes has a schema
//! here. Payloads are checked against it at the boundary, before any caller
//! sees them.

use flowlink_core::{RouteField, RouteLayout};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A call the backend handles
pub trait Action: Serialize {
    /// Wire name, e.g. `route.list`
    const NAME: &'static str;

    /// Shape of a successful reply
    type Reply: DeserializeOwned;
}

/// An event the backend pushes
pub trait PushEvent: DeserializeOwned {
    const NAME: &'static str;
}

/// Request payload for the wire: unit actions send no payload at all
pub fn encode_payload<A: Action>(action: &A) -> Result<Option<Value>> {
    let value = serde_json::to_value(action).map_err(|e| Error::Codec(e.to_string()))?;
    Ok((!value.is_null()).then_some(value))
}

/// Validate `payload` against `T`
pub fn decode_payload<T: DeserializeOwned>(name: &str, payload: &Value) -> Result<T> {
    T::deserialize(payload).map_err(|e| Error::Codec(format!("invalid `{}` payload: {}", name, e)))
}

/// The backend encodes empty lists as `null`
fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Replies ─────────────────────────────────────────────────────────────────

/// Generic acknowledgement, e.g. `{"status":"ok"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: String,
}

/// State of the backend's own link to the game server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendLinkState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Any state name this client does not know
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStatusReply {
    pub state: BackendLinkState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtoList {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub files: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<Value>,
}

/// Route value bound to request/response message names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMapping {
    pub route: u32,
    pub request_msg: String,
    pub response_msg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteList {
    pub routes: Vec<RouteMapping>,
}

// ── Actions ─────────────────────────────────────────────────────────────────

/// Ask the backend to open its link to a game server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_fields: Option<RouteLayout>,
}

impl ConnectTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: None,
            reconnect: None,
            heartbeat: None,
            frame_fields: None,
        }
    }

    pub fn with_layout(mut self, layout: RouteLayout) -> Self {
        self.frame_fields = Some(layout);
        self
    }

    /// Like [`ConnectTarget::with_layout`], validating raw header fields first
    pub fn with_fields(self, fields: Vec<RouteField>) -> Result<Self> {
        Ok(self.with_layout(RouteLayout::new(fields)?))
    }
}

impl Action for ConnectTarget {
    const NAME: &'static str = "conn.connect";
    type Reply = StatusReply;
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DisconnectTarget;

impl Action for DisconnectTarget {
    const NAME: &'static str = "conn.disconnect";
    type Reply = StatusReply;
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GetLinkStatus;

impl Action for GetLinkStatus {
    const NAME: &'static str = "conn.status";
    type Reply = LinkStatusReply;
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ListProtos;

impl Action for ListProtos {
    const NAME: &'static str = "proto.list";
    type Reply = ProtoList;
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ListRoutes;

impl Action for ListRoutes {
    const NAME: &'static str = "route.list";
    type Reply = RouteList;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SetRoute(pub RouteMapping);

impl Action for SetRoute {
    const NAME: &'static str = "route.set";
    type Reply = StatusReply;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteRoute {
    pub route: u32,
}

impl Action for DeleteRoute {
    const NAME: &'static str = "route.delete";
    type Reply = StatusReply;
}

/// Run a request flow; node and edge shapes belong to the editor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecuteFlow {
    pub nodes: Vec<Value>,
    pub edges: Vec<Value>,
}

impl Action for ExecuteFlow {
    const NAME: &'static str = "flow.execute";
    type Reply = StatusReply;
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StopFlow;

impl Action for StopFlow {
    const NAME: &'static str = "flow.stop";
    type Reply = StatusReply;
}

// ── Push events ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnStatus {
    pub state: BackendLinkState,
    #[serde(default)]
    pub addr: Option<String>,
}

impl PushEvent for ConnStatus {
    const NAME: &'static str = "conn.status";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStart {
    pub node_id: String,
}

impl PushEvent for NodeStart {
    const NAME: &'static str = "node.start";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: String,
    #[serde(default)]
    pub request: Option<Value>,
    #[serde(default)]
    pub response: Option<Value>,
    /// Round trip in milliseconds
    #[serde(default)]
    pub duration: Option<u64>,
}

impl PushEvent for NodeResult {
    const NAME: &'static str = "node.result";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeError {
    pub node_id: String,
    pub error: String,
}

impl PushEvent for NodeError {
    const NAME: &'static str = "node.error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStarted;

impl PushEvent for FlowStarted {
    const NAME: &'static str = "flow.started";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowComplete;

impl PushEvent for FlowComplete {
    const NAME: &'static str = "flow.complete";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowError {
    pub error: String,
}

impl PushEvent for FlowError {
    const NAME: &'static str = "flow.error";
}

/// Every event the backend pushes
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ConnStatus(ConnStatus),
    NodeStart(NodeStart),
    NodeResult(NodeResult),
    NodeError(NodeError),
    FlowStarted,
    FlowComplete,
    FlowError(FlowError),
}

impl ServerEvent {
    pub const NAMES: [&'static str; 7] = [
        ConnStatus::NAME,
        NodeStart::NAME,
        NodeResult::NAME,
        NodeError::NAME,
        FlowStarted::NAME,
        FlowComplete::NAME,
        FlowError::NAME,
    ];

    /// Decode a push event. `Ok(None)` for names outside the protocol.
    pub fn decode(event: &str, payload: &Value) -> Result<Option<Self>> {
        let decoded = match event {
            ConnStatus::NAME => Self::ConnStatus(decode_payload(event, payload)?),
            NodeStart::NAME => Self::NodeStart(decode_payload(event, payload)?),
            NodeResult::NAME => Self::NodeResult(decode_payload(event, payload)?),
            NodeError::NAME => Self::NodeError(decode_payload(event, payload)?),
            FlowStarted::NAME => Self::FlowStarted,
            FlowComplete::NAME => Self::FlowComplete,
            FlowError::NAME => Self::FlowError(decode_payload(event, payload)?),
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnStatus(_) => ConnStatus::NAME,
            Self::NodeStart(_) => NodeStart::NAME,
            Self::NodeResult(_) => NodeResult::NAME,
            Self::NodeError(_) => NodeError::NAME,
            Self::FlowStarted => FlowStarted::NAME,
            Self::FlowComplete => FlowComplete::NAME,
            Self::FlowError(_) => FlowError::NAME,
        }
    }
}
