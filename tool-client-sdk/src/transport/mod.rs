//! Transport capability for tool servers
//!
//! A [`Transport`] is the concrete bidirectional channel to one tool
//! server. The pool consumes the trait only; the wire-level details live
//! in the per-kind implementations:
//!
//! - [`stdio::StdioTransport`] spawns the server as a subprocess and
//!   speaks line-delimited JSON-RPC over its pipes
//! - [`http::HttpTransport`] POSTs JSON-RPC frames to an endpoint
//!
//! Both perform an `initialize` handshake on connect before they are
//! considered live.

pub mod http;
pub mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::error::{ClientError, Result};

/// Transport kind selector for a server definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Subprocess with JSON-RPC over stdin/stdout
    Stdio,
    /// JSON-RPC over HTTP POST
    Http,
}

/// Identity and launch/connection parameters for one tool server.
///
/// Immutable once registered; re-registering the same id swaps the
/// definition without forcibly closing live connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDefinition {
    /// Unique server id
    pub id: String,

    /// Which transport implementation to use
    pub kind: TransportKind,

    /// Command to spawn (stdio transports)
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments for the spawned command
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables for the spawned command
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Endpoint URL (HTTP transports)
    #[serde(default)]
    pub url: Option<String>,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Free-form tags for grouping and filtering
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl ServerDefinition {
    /// Define a stdio (subprocess) server
    pub fn stdio(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TransportKind::Stdio,
            command: Some(command.into()),
            args: Vec::new(),
            env: HashMap::new(),
            url: None,
            request_timeout_ms: default_request_timeout_ms(),
            tags: Vec::new(),
        }
    }

    /// Define an HTTP server
    pub fn http(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TransportKind::Http,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: Some(url.into()),
            request_timeout_ms: default_request_timeout_ms(),
            tags: Vec::new(),
        }
    }

    /// Append arguments for the spawned command
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the spawned command
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Per-request timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// A tool exposed by a server, as reported by `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    /// Tool name, unique within its server
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,

    /// JSON schema for the tool's arguments
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<Value>,
}

/// Connection status reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// No live channel
    Disconnected,
    /// Channel is live and the handshake completed
    Connected,
    /// The channel died with an error
    Failed,
}

/// Lifecycle events emitted by a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The channel closed (peer exit, pipe EOF, explicit disconnect)
    Disconnected,
    /// The channel failed with an error
    Error(String),
}

/// Capability interface to one tool server.
///
/// All methods take `&self`; implementations use interior mutability so
/// a connected transport can be shared behind an `Arc` by the pool and
/// the caller currently holding it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the channel and run the `initialize` handshake.
    /// Idempotent on an already-connected transport.
    async fn connect(&self) -> Result<()>;

    /// Tear the channel down. Pending requests fail with a connection
    /// error.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the channel is currently live
    fn is_connected(&self) -> bool;

    /// Current status
    fn status(&self) -> TransportStatus;

    /// Subscribe to disconnect/error events
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// Dispatch one raw JSON-RPC request and await its response
    async fn call(&self, method: &str, params: Value) -> Result<Value>;

    /// List the tools the server exposes
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = self.call("tools/list", json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or_else(|| json!([]));
        serde_json::from_value(tools)
            .map_err(|e| ClientError::protocol(format!("Malformed tools/list result: {}", e)))
    }

    /// Invoke one tool and return the raw result object
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let result = self
            .call("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            let text = first_text(&result).unwrap_or("Unknown tool error");
            return Err(ClientError::tool_execution(text.to_string()));
        }
        Ok(result)
    }
}

/// Creates unconnected transports from server definitions.
///
/// The pool calls `create` then `connect` for every new pooled
/// connection; injecting a factory is the seam tests use to substitute
/// scripted transports.
pub trait TransportFactory: Send + Sync {
    /// Build an unconnected transport for the given definition
    fn create(&self, definition: &ServerDefinition) -> Result<Arc<dyn Transport>>;
}

/// Factory dispatching on [`TransportKind`]
#[derive(Debug, Default)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, definition: &ServerDefinition) -> Result<Arc<dyn Transport>> {
        match definition.kind {
            TransportKind::Stdio => Ok(Arc::new(StdioTransport::new(definition.clone()))),
            TransportKind::Http => Ok(Arc::new(HttpTransport::new(definition.clone())?)),
        }
    }
}

/// Extract the first `content[].text` entry from a tool result
fn first_text(result: &Value) -> Option<&str> {
    result
        .get("content")?
        .as_array()?
        .iter()
        .find_map(|c| c.get("text").and_then(Value::as_str))
}

// JSON-RPC framing helpers shared by the transport implementations.

/// Build a JSON-RPC 2.0 request frame
pub(crate) fn rpc_request(id: u64, method: &str, params: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Build a JSON-RPC 2.0 notification frame
pub(crate) fn rpc_notification(method: &str, params: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}

/// Decode a JSON-RPC response payload into the result value.
///
/// Error payloads map onto the client taxonomy by code: method-not-found
/// becomes `ToolNotFound`, malformed-request codes become `Protocol`,
/// everything else is the server reporting a failed execution.
pub(crate) fn decode_rpc_payload(response: &Value) -> Result<Value> {
    if let Some(error) = response.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown RPC error");
        return Err(match code {
            -32601 => ClientError::tool_not_found(message.to_string()),
            -32700 | -32600 | -32602 => {
                ClientError::protocol(format!("RPC error {}: {}", code, message))
            }
            _ => ClientError::tool_execution(format!("RPC error {}: {}", code, message)),
        });
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}

/// Check that a response frame answers the request we sent
pub(crate) fn response_matches(response: &Value, id: u64) -> bool {
    response.get("id").and_then(Value::as_u64) == Some(id)
}
