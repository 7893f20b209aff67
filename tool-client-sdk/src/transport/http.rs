//! HTTP transport POSTing JSON-RPC frames to an endpoint
//!
//! Each call is one POST carrying a single request frame; the response
//! body carries the matching response frame (or a batch containing it).
//! HTTP transports are stateless between calls, so "connected" only
//! means the initialize handshake succeeded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use super::{
    decode_rpc_payload, response_matches, rpc_request, ServerDefinition, Transport,
    TransportEvent, TransportStatus,
};
use crate::error::{ClientError, Result};

/// JSON-RPC transport over HTTP POST
#[derive(Debug)]
pub struct HttpTransport {
    definition: ServerDefinition,
    endpoint: String,
    client: reqwest::Client,
    next_id: AtomicU64,
    connected: AtomicBool,
    failed: AtomicBool,
    events: broadcast::Sender<TransportEvent>,
}

impl HttpTransport {
    /// Create an unconnected transport; fails if the definition carries
    /// no URL or the HTTP client cannot be built.
    pub fn new(definition: ServerDefinition) -> Result<Self> {
        let endpoint = definition
            .url
            .clone()
            .ok_or_else(|| ClientError::validation("HTTP transport requires a url"))?;
        let client = reqwest::Client::builder()
            .timeout(definition.request_timeout())
            .build()
            .map_err(|e| ClientError::internal(format!("failed to build HTTP client: {}", e)))?;
        let (events, _) = broadcast::channel(16);
        Ok(Self {
            definition,
            endpoint,
            client,
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            events,
        })
    }

    async fn post_request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = rpc_request(id, method, &params);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&frame)
            .send()
            .await
            .map_err(|e| self.note_failure(e.into()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = if status.is_server_error() || status.as_u16() == 429 {
                ClientError::connection(format!("HTTP error: {} - {}", status, body))
            } else {
                ClientError::protocol(format!("HTTP error: {} - {}", status, body))
            };
            return Err(self.note_failure(err));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ClientError::protocol(format!("failed to parse JSON response: {}", e)))?;
        decode_body(body, id)
    }

    /// Record a connection-level failure and pass the error through
    fn note_failure(&self, err: ClientError) -> ClientError {
        if matches!(err, ClientError::Connection(_) | ClientError::Timeout(_)) {
            self.failed.store(true, Ordering::SeqCst);
            let _ = self.events.send(TransportEvent::Error(err.to_string()));
        }
        err
    }
}

/// Pick our response frame out of the body, which may be a batch
fn decode_body(body: Value, request_id: u64) -> Result<Value> {
    match body {
        Value::Array(frames) => frames
            .iter()
            .find(|f| response_matches(f, request_id))
            .map(decode_rpc_payload)
            .unwrap_or_else(|| {
                Err(ClientError::protocol(format!(
                    "missing response for request id {}",
                    request_id
                )))
            }),
        frame => {
            if response_matches(&frame, request_id) {
                decode_rpc_payload(&frame)
            } else {
                Err(ClientError::protocol(format!(
                    "missing response for request id {}",
                    request_id
                )))
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.post_request(
            "initialize",
            json!({ "clientInfo": { "name": "tool-client-sdk" } }),
        )
        .await?;
        self.connected.store(true, Ordering::SeqCst);
        self.failed.store(false, Ordering::SeqCst);
        log::debug!("HTTP transport connected to server '{}'", self.definition.id);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::Disconnected);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn status(&self) -> TransportStatus {
        if self.is_connected() {
            TransportStatus::Connected
        } else if self.failed.load(Ordering::SeqCst) {
            TransportStatus::Failed
        } else {
            TransportStatus::Disconnected
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        if !self.is_connected() {
            return Err(ClientError::connection("transport is not connected"));
        }
        self.post_request(method, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_requires_url() {
        let mut def = ServerDefinition::http("api", "http://localhost:1");
        def.url = None;
        let err = HttpTransport::new(def).unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }

    #[test]
    fn decode_body_handles_batches() {
        let body = json!([
            {"jsonrpc": "2.0", "method": "notifications/progress", "params": {}},
            {"jsonrpc": "2.0", "id": 3, "result": {"tools": []}}
        ]);
        assert_eq!(decode_body(body, 3).unwrap(), json!({"tools": []}));
    }

    #[test]
    fn decode_body_rejects_mismatched_id() {
        let body = json!({"jsonrpc": "2.0", "id": 2, "result": {}});
        let err = decode_body(body, 1).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }
}
