use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC version string attached to every frame.
pub const JSONRPC_VERSION: &str = "2.0";
/// MCP protocol revision sent during `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC method name used to initialize MCP servers.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Notification acknowledging a completed handshake.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// Request listing the tools exposed by a server.
pub const METHOD_LIST_TOOLS: &str = "tools/list";
/// Request invoking a named tool.
pub const METHOD_CALL_TOOL: &str = "tools/call";
/// Notification emitted by servers whose tool manifest changed.
pub const METHOD_TOOLS_CHANGED: &str = "notifications/tools/list_changed";

/// Unique identifier for JSON-RPC calls. Scoped to one process handle.
pub type RequestId = u64;

/// Client metadata attached to the `initialize` request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "mcp-hub".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Parameters for the initial `initialize` handshake.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "clientInfo")]
    pub client: ClientInfo,
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
}

impl InitializeParams {
    /// Handshake parameters with an empty capability map.
    pub fn new(client: ClientInfo) -> Self {
        Self {
            client,
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: Value::Object(Default::default()),
        }
    }
}

/// A callable capability exposed by an MCP server.
///
/// Produced verbatim from the server's `tools/list` response; the input
/// schema stays an opaque JSON object.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// Result payload of `tools/list`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<Tool>,
}

/// Parameters for `tools/call`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Result payload of `tools/call`. Content parts pass through untouched.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(rename = "isError", default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Incoming JSON-RPC response frame.
#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    pub id: Value,
    pub result: Option<Value>,
    pub error: Option<RpcErrorObject>,
}

/// Incoming JSON-RPC notification frame.
#[derive(Clone, Debug, Deserialize)]
pub struct RpcNotification {
    pub method: String,
    pub params: Option<Value>,
}

/// JSON-RPC error object carried inside a response.
#[derive(Clone, Debug, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

/// Decoded frame read from a server's stdout.
#[derive(Debug)]
pub enum Incoming {
    Response(RpcResponse),
    Notification(RpcNotification),
}

/// Classifies a parsed JSON value as a response or notification.
///
/// Frames that match neither shape are dropped by the caller; a malformed
/// line must never take the transport down.
pub fn decode_frame(value: Value) -> Option<Incoming> {
    let is_notification = value.get("id").is_none() && value.get("method").is_some();
    if is_notification {
        let notification: RpcNotification = serde_json::from_value(value).ok()?;
        return Some(Incoming::Notification(notification));
    }

    if value.get("id").is_some() {
        let response: RpcResponse = serde_json::from_value(value).ok()?;
        return Some(Incoming::Response(response));
    }

    None
}

/// Extracts the numeric request id this transport generates.
pub fn parse_request_id(value: &Value) -> Option<RequestId> {
    value.as_u64()
}
