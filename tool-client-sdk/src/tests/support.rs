//! Scripted transports and factories shared by the pool and manager tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::error::{ClientError, Result};
use crate::transport::{
    ServerDefinition, Transport, TransportEvent, TransportFactory, TransportStatus,
};

type Script = Arc<Mutex<VecDeque<Result<Value>>>>;

/// In-memory transport driven by a per-server response script.
///
/// With an empty script every call answers a generic successful tool
/// result. Scripted entries are consumed once each, shared across every
/// transport the factory creates for the same server.
pub struct TestTransport {
    connected: AtomicBool,
    fail_connect: bool,
    script: Script,
    call_delay: Option<Duration>,
    calls: Mutex<Vec<(String, Value)>>,
    events: broadcast::Sender<TransportEvent>,
}

impl TestTransport {
    fn new(fail_connect: bool, script: Script, call_delay: Option<Duration>) -> Self {
        let (events, _) = broadcast::channel(8);
        Self {
            connected: AtomicBool::new(false),
            fail_connect,
            script,
            call_delay,
            calls: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Simulate the channel dying underneath the pool
    pub fn fail(&self, message: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Error(message.to_string()));
        let _ = self.events.send(TransportEvent::Disconnected);
    }

    /// Methods dispatched through this transport, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(method, _)| method.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for TestTransport {
    async fn connect(&self) -> Result<()> {
        if self.fail_connect {
            return Err(ClientError::connection("scripted connect failure"));
        }
        self.connected.store(true, Ordering::SeqCst);
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
        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(json!({ "content": [{ "type": "text", "text": "done" }] })),
        }
    }
}

/// Factory producing [`TestTransport`]s, with per-server scripting
pub struct TestFactory {
    created: AtomicUsize,
    fail_connect_for: Mutex<HashSet<String>>,
    scripts: Mutex<HashMap<String, Script>>,
    call_delay: Mutex<Option<Duration>>,
    transports: Mutex<Vec<(String, Arc<TestTransport>)>>,
}

impl TestFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            created: AtomicUsize::new(0),
            fail_connect_for: Mutex::new(HashSet::new()),
            scripts: Mutex::new(HashMap::new()),
            call_delay: Mutex::new(None),
            transports: Mutex::new(Vec::new()),
        })
    }

    /// Every transport created for `server_id` fails to connect
    pub fn fail_connect(&self, server_id: &str) {
        self.fail_connect_for
            .lock()
            .unwrap()
            .insert(server_id.to_string());
    }

    /// Queue scripted call results for a server
    pub fn script(&self, server_id: &str, results: Vec<Result<Value>>) {
        let script = self.script_for(server_id);
        script.lock().unwrap().extend(results);
    }

    /// Delay every call on transports created after this point
    pub fn set_call_delay(&self, delay: Duration) {
        *self.call_delay.lock().unwrap() = Some(delay);
    }

    /// Transports created so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// The most recently created transport for a server
    pub fn last_transport(&self, server_id: &str) -> Option<Arc<TestTransport>> {
        self.transports
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| id == server_id)
            .map(|(_, t)| Arc::clone(t))
    }

    fn script_for(&self, server_id: &str) -> Script {
        Arc::clone(
            self.scripts
                .lock()
                .unwrap()
                .entry(server_id.to_string())
                .or_default(),
        )
    }
}

impl TransportFactory for TestFactory {
    fn create(&self, definition: &ServerDefinition) -> Result<Arc<dyn Transport>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let fail_connect = self
            .fail_connect_for
            .lock()
            .unwrap()
            .contains(&definition.id);
        let transport = Arc::new(TestTransport::new(
            fail_connect,
            self.script_for(&definition.id),
            *self.call_delay.lock().unwrap(),
        ));
        self.transports
            .lock()
            .unwrap()
            .push((definition.id.clone(), Arc::clone(&transport)));
        Ok(transport)
    }
}

/// A stdio definition pointing at a command that is never spawned;
/// tests pair it with a [`TestFactory`].
pub fn definition(id: &str) -> ServerDefinition {
    ServerDefinition::stdio(id, "unused-command")
}
