//! Subprocess transport speaking line-delimited JSON-RPC
//!
//! Spawns the tool server as a child process and correlates requests to
//! responses over its stdin/stdout pipes. A dedicated writer task owns
//! stdin; a reader task owns stdout and completes pending requests as
//! response frames arrive. Pipe EOF or a read error marks the transport
//! dead, fails every pending request, and emits a transport event so the
//! pool can evict the connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, oneshot};

use super::{
    decode_rpc_payload, rpc_notification, rpc_request, ServerDefinition, Transport,
    TransportEvent, TransportStatus,
};
use crate::error::{ClientError, Result};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Live channel state, present only while the child is running
struct Live {
    write_tx: mpsc::Sender<String>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    child: Arc<tokio::sync::Mutex<Child>>,
}

/// JSON-RPC transport over a spawned subprocess
pub struct StdioTransport {
    definition: ServerDefinition,
    next_id: AtomicU64,
    live: Mutex<Option<Live>>,
    failed: Arc<AtomicBool>,
    events: broadcast::Sender<TransportEvent>,
}

impl StdioTransport {
    /// Create an unconnected transport for the given definition
    pub fn new(definition: ServerDefinition) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            definition,
            next_id: AtomicU64::new(1),
            live: Mutex::new(None),
            failed: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    /// Snapshot the pieces needed to dispatch a request, without holding
    /// the state lock across an await point.
    fn channel(&self) -> Result<(mpsc::Sender<String>, PendingMap, Arc<AtomicBool>)> {
        let guard = self.live.lock().unwrap();
        match guard.as_ref() {
            Some(live) if live.alive.load(Ordering::SeqCst) => Ok((
                live.write_tx.clone(),
                Arc::clone(&live.pending),
                Arc::clone(&live.alive),
            )),
            _ => Err(ClientError::connection("transport is not connected")),
        }
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        let (write_tx, pending, _alive) = self.channel()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = rpc_request(id, method, &params);
        let line = format!("{}\n", frame);

        let (tx, mut rx) = oneshot::channel();
        pending.lock().unwrap().insert(id, tx);

        if write_tx.send(line).await.is_err() {
            pending.lock().unwrap().remove(&id);
            return Err(ClientError::connection("transport write channel closed"));
        }

        match tokio::time::timeout(self.definition.request_timeout(), &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::connection("transport closed mid-request")),
            Err(_) => {
                pending.lock().unwrap().remove(&id);
                Err(ClientError::timeout(format!(
                    "request '{}' timed out after {:?}",
                    method,
                    self.definition.request_timeout()
                )))
            }
        }
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        let (write_tx, _, _) = self.channel()?;
        let line = format!("{}\n", rpc_notification(method, &params));
        write_tx
            .send(line)
            .await
            .map_err(|_| ClientError::connection("transport write channel closed"))
    }
}

/// Fail every pending request when the channel dies
fn drain_pending(pending: &PendingMap) {
    let mut map = pending.lock().unwrap();
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(ClientError::connection("transport closed")));
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let command = self.definition.command.as_ref().ok_or_else(|| {
            ClientError::validation("stdio transport requires a command".to_string())
        })?;

        let mut cmd = Command::new(command);
        cmd.args(&self.definition.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &self.definition.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ClientError::connection(format!("failed to spawn '{}': {}", command, e))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::connection("failed to open child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::connection("failed to open child stdout"))?;

        let alive = Arc::new(AtomicBool::new(true));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        // Writer task: sole owner of the child's stdin.
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let alive_writer = Arc::clone(&alive);
        tokio::spawn(async move {
            while let Some(line) = write_rx.recv().await {
                if !alive_writer.load(Ordering::SeqCst) {
                    break;
                }
                if stdin.write_all(line.as_bytes()).await.is_err()
                    || stdin.flush().await.is_err()
                {
                    alive_writer.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        // Reader task: completes pending requests, detects channel death.
        let alive_reader = Arc::clone(&alive);
        let pending_reader = Arc::clone(&pending);
        let failed = Arc::clone(&self.failed);
        let events = self.events.clone();
        let server_id = self.definition.id.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        alive_reader.store(false, Ordering::SeqCst);
                        let _ = events.send(TransportEvent::Disconnected);
                        break;
                    }
                    Ok(_) => {
                        let frame: Value = match serde_json::from_str(line.trim()) {
                            Ok(v) => v,
                            Err(e) => {
                                log::warn!(
                                    "server '{}' sent an unparseable frame: {}",
                                    server_id,
                                    e
                                );
                                continue;
                            }
                        };
                        // Only responses are interesting; incoming requests
                        // and notifications from the server are dropped.
                        let id = match frame.get("id").and_then(Value::as_u64) {
                            Some(id) if frame.get("method").is_none() => id,
                            _ => continue,
                        };
                        let tx = pending_reader.lock().unwrap().remove(&id);
                        if let Some(tx) = tx {
                            let _ = tx.send(decode_rpc_payload(&frame));
                        }
                    }
                    Err(e) => {
                        alive_reader.store(false, Ordering::SeqCst);
                        failed.store(true, Ordering::SeqCst);
                        let _ = events.send(TransportEvent::Error(format!(
                            "stdio read error: {}",
                            e
                        )));
                        let _ = events.send(TransportEvent::Disconnected);
                        break;
                    }
                }
            }
            drain_pending(&pending_reader);
        });

        {
            let mut guard = self.live.lock().unwrap();
            *guard = Some(Live {
                write_tx,
                pending,
                alive,
                child: Arc::new(tokio::sync::Mutex::new(child)),
            });
        }
        self.failed.store(false, Ordering::SeqCst);

        // Handshake: the server is live only after it answers initialize.
        // A failed handshake tears the channel back down so the transport
        // does not report itself connected and a retried connect starts
        // over.
        if let Err(e) = self
            .send_request("initialize", json!({ "clientInfo": { "name": "tool-client-sdk" } }))
            .await
        {
            self.failed.store(true, Ordering::SeqCst);
            let _ = self.disconnect().await;
            return Err(e);
        }
        let _ = self
            .send_notification("notifications/initialized", json!({}))
            .await;

        log::debug!("stdio transport connected to server '{}'", self.definition.id);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let live = self.live.lock().unwrap().take();
        if let Some(live) = live {
            live.alive.store(false, Ordering::SeqCst);
            drain_pending(&live.pending);
            let mut child = live.child.lock().await;
            let _ = child.kill().await;
            let _ = self.events.send(TransportEvent::Disconnected);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.live
            .lock()
            .unwrap()
            .as_ref()
            .map(|l| l.alive.load(Ordering::SeqCst))
            .unwrap_or(false)
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
        self.send_request(method, params).await
    }
}
