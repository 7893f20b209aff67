//! Bounded connection pool with a FIFO wait queue
//!
//! One pool instance owns the connections for every registered server.
//! Each server id maps to a slot holding its definition, its pooled
//! connections, and its wait queue; connections are never shared across
//! slots.
//!
//! Acquisition order:
//! 1. Unknown server → `ServerNotFound`; shut-down pool → `PoolClosed`
//! 2. An idle, still-connected connection is reused
//! 3. Below `max_connections`, a new transport is created and connected
//! 4. Otherwise the caller queues; a release hands the freed connection
//!    to the oldest waiter directly, never through the idle list
//!
//! A periodic sweep closes connections idle past `idle_timeout`, keeping
//! at least `min_connections` live per server. Transport disconnect and
//! error events evict connections immediately; holders of an in-flight
//! connection are not retried here; that is the client manager's job.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::transport::{ServerDefinition, Transport, TransportEvent, TransportFactory};

/// Rolling latency window size per server
const LATENCY_SAMPLES: usize = 100;

/// A leased connection, handed out by [`ConnectionPool::acquire`].
///
/// The transport is shared with the pool; the lease ends when the handle
/// is passed back through `release` (or `discard`).
#[derive(Clone)]
pub struct ConnectionHandle {
    /// Id of the pooled connection backing this lease
    pub connection_id: Uuid,
    /// Server this connection belongs to
    pub server_id: String,
    /// The live transport; callers dispatch requests through it
    pub transport: Arc<dyn Transport>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("connection_id", &self.connection_id)
            .field("server_id", &self.server_id)
            .finish_non_exhaustive()
    }
}

/// One pooled connection and its bookkeeping
struct PooledConnection {
    id: Uuid,
    transport: Arc<dyn Transport>,
    created_at: Instant,
    last_used: Instant,
    in_use: bool,
    use_count: u64,
    /// Transport reported death while the connection was leased out;
    /// dropped instead of returned to the idle list on release.
    defunct: bool,
    watcher: JoinHandle<()>,
}

impl PooledConnection {
    fn handle(&self, server_id: &str) -> ConnectionHandle {
        ConnectionHandle {
            connection_id: self.id,
            server_id: server_id.to_string(),
            transport: Arc::clone(&self.transport),
        }
    }
}

/// A queued acquisition request
struct Waiter {
    id: u64,
    tx: oneshot::Sender<Result<ConnectionHandle>>,
}

/// Rolling, purely observational per-server call metrics
#[derive(Default)]
struct PoolMetrics {
    latencies: VecDeque<Duration>,
    total_requests: u64,
    total_errors: u64,
}

impl PoolMetrics {
    fn record(&mut self, latency: Duration, ok: bool) {
        if self.latencies.len() == LATENCY_SAMPLES {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
        self.total_requests += 1;
        if !ok {
            self.total_errors += 1;
        }
    }

    fn snapshot(&self) -> PoolMetricsSnapshot {
        let average_latency = if self.latencies.is_empty() {
            Duration::ZERO
        } else {
            self.latencies.iter().sum::<Duration>() / self.latencies.len() as u32
        };
        let error_rate = if self.total_requests == 0 {
            0.0
        } else {
            self.total_errors as f64 / self.total_requests as f64
        };
        PoolMetricsSnapshot {
            total_requests: self.total_requests,
            total_errors: self.total_errors,
            error_rate,
            average_latency,
        }
    }
}

/// Point-in-time view of a server's call metrics
#[derive(Debug, Clone, PartialEq)]
pub struct PoolMetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub average_latency: Duration,
}

/// Per-server pool state
struct ServerSlot {
    definition: ServerDefinition,
    connections: Vec<PooledConnection>,
    waiters: VecDeque<Waiter>,
    /// Creations in flight, reserved against `max_connections`
    pending_creates: usize,
    metrics: PoolMetrics,
}

impl ServerSlot {
    fn new(definition: ServerDefinition) -> Self {
        Self {
            definition,
            connections: Vec::new(),
            waiters: VecDeque::new(),
            pending_creates: 0,
            metrics: PoolMetrics::default(),
        }
    }
}

/// What `acquire` decided to do while holding the state lock
enum AcquirePlan {
    Ready(ConnectionHandle),
    Create(ServerDefinition),
    Wait(u64, oneshot::Receiver<Result<ConnectionHandle>>),
}

/// The connection pool. See the module docs for semantics.
pub struct ConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn TransportFactory>,
    servers: Mutex<HashMap<String, ServerSlot>>,
    events: EventBus,
    closed: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    next_waiter_id: AtomicU64,
    self_ref: Mutex<Weak<ConnectionPool>>,
}

impl ConnectionPool {
    /// Create a pool and start its idle sweeper
    pub fn new(
        config: PoolConfig,
        factory: Arc<dyn TransportFactory>,
        events: EventBus,
    ) -> Arc<Self> {
        let pool = Arc::new(Self {
            config,
            factory,
            servers: Mutex::new(HashMap::new()),
            events,
            closed: AtomicBool::new(false),
            sweeper: Mutex::new(None),
            next_waiter_id: AtomicU64::new(1),
            self_ref: Mutex::new(Weak::new()),
        });
        *pool.self_ref.lock().unwrap() = Arc::downgrade(&pool);

        if pool.config.sweep_interval_ms > 0 {
            let weak = Arc::downgrade(&pool);
            let interval = pool.config.sweep_interval();
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // First tick completes immediately.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    match weak.upgrade() {
                        Some(pool) => pool.sweep_idle(),
                        None => break,
                    }
                }
            });
            *pool.sweeper.lock().unwrap() = Some(handle);
        }
        pool
    }

    /// Subscribe to pool lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Register a server, or swap the definition of an existing one.
    /// Swapping never forcibly closes live connections.
    pub fn register_server(&self, definition: ServerDefinition) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::pool_closed("connection pool is shut down"));
        }
        let server_id = definition.id.clone();
        {
            let mut servers = self.servers.lock().unwrap();
            match servers.get_mut(&server_id) {
                Some(slot) => slot.definition = definition,
                None => {
                    servers.insert(server_id.clone(), ServerSlot::new(definition));
                }
            }
        }
        log::debug!("registered tool server '{}'", server_id);
        self.events.emit(ClientEvent::ServerRegistered { server_id });
        Ok(())
    }

    /// Remove a server: queued waiters are rejected with `ServerNotFound`
    /// and its connections are closed. A no-op for unknown ids.
    pub fn unregister_server(&self, server_id: &str) -> Result<()> {
        let slot = self.servers.lock().unwrap().remove(server_id);
        let Some(mut slot) = slot else {
            return Ok(());
        };
        for waiter in slot.waiters.drain(..) {
            let _ = waiter
                .tx
                .send(Err(ClientError::server_not_found(server_id)));
        }
        for conn in slot.connections.drain(..) {
            self.drop_connection(server_id, conn);
        }
        log::debug!("unregistered tool server '{}'", server_id);
        self.events.emit(ClientEvent::ServerUnregistered {
            server_id: server_id.to_string(),
        });
        Ok(())
    }

    /// Acquire a connection for a server, waiting in FIFO order when the
    /// pool is at `max_connections`.
    pub async fn acquire(&self, server_id: &str) -> Result<ConnectionHandle> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::pool_closed("connection pool is shut down"));
        }

        let plan = self.plan_acquire(server_id)?;
        match plan {
            AcquirePlan::Ready(handle) => Ok(handle),
            AcquirePlan::Create(definition) => self.create_connection(server_id, definition).await,
            AcquirePlan::Wait(waiter_id, mut rx) => {
                let timeout = self.config.acquire_timeout();
                match tokio::time::timeout(timeout, &mut rx).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(ClientError::pool_closed(
                        "wait queue dropped while acquiring",
                    )),
                    Err(_) => {
                        // Remove ourselves from the queue. If the waiter
                        // entry is already gone, a release satisfied it in
                        // the same instant; take the connection instead of
                        // failing, so it is resolved exactly once.
                        let still_queued = {
                            let mut servers = self.servers.lock().unwrap();
                            servers
                                .get_mut(server_id)
                                .map(|slot| {
                                    let before = slot.waiters.len();
                                    slot.waiters.retain(|w| w.id != waiter_id);
                                    slot.waiters.len() != before
                                })
                                .unwrap_or(false)
                        };
                        if !still_queued {
                            if let Ok(result) = rx.try_recv() {
                                return result;
                            }
                        }
                        Err(ClientError::resource_exhausted(format!(
                            "acquire timed out after {:?} waiting for server '{}'",
                            timeout, server_id
                        )))
                    }
                }
            }
        }
    }

    /// Return a leased connection. If a waiter is queued, the connection
    /// is handed to the oldest waiter directly.
    pub fn release(&self, server_id: &str, handle: ConnectionHandle) -> Result<()> {
        let mut servers = self.servers.lock().unwrap();
        let Some(slot) = servers.get_mut(server_id) else {
            // Server was unregistered while the connection was out.
            drop(servers);
            detach_transport(handle.transport);
            return Ok(());
        };
        let Some(pos) = slot
            .connections
            .iter()
            .position(|c| c.id == handle.connection_id)
        else {
            drop(servers);
            detach_transport(handle.transport);
            return Ok(());
        };

        if slot.connections[pos].defunct || !slot.connections[pos].transport.is_connected() {
            let conn = slot.connections.remove(pos);
            drop(servers);
            self.drop_connection(server_id, conn);
            return Ok(());
        }

        while let Some(waiter) = slot.waiters.pop_front() {
            let conn = &mut slot.connections[pos];
            if waiter.tx.send(Ok(conn.handle(server_id))).is_ok() {
                conn.use_count += 1;
                conn.last_used = Instant::now();
                return Ok(());
            }
            // That waiter timed out or was cancelled; try the next one.
        }

        let conn = &mut slot.connections[pos];
        conn.in_use = false;
        conn.last_used = Instant::now();
        Ok(())
    }

    /// Drop a leased connection instead of returning it, closing the
    /// transport. Used by the manager after connection-level call
    /// failures.
    pub fn discard(&self, server_id: &str, handle: ConnectionHandle) {
        let removed = {
            let mut servers = self.servers.lock().unwrap();
            servers.get_mut(server_id).and_then(|slot| {
                slot.connections
                    .iter()
                    .position(|c| c.id == handle.connection_id)
                    .map(|pos| slot.connections.remove(pos))
            })
        };
        match removed {
            Some(conn) => self.drop_connection(server_id, conn),
            None => detach_transport(handle.transport),
        }
    }

    /// Record the outcome of one tool call for a server's metrics
    pub fn record_call(&self, server_id: &str, latency: Duration, ok: bool) {
        let mut servers = self.servers.lock().unwrap();
        if let Some(slot) = servers.get_mut(server_id) {
            slot.metrics.record(latency, ok);
        }
    }

    /// Metrics snapshot for one server
    pub fn metrics(&self, server_id: &str) -> Option<PoolMetricsSnapshot> {
        let servers = self.servers.lock().unwrap();
        servers.get(server_id).map(|slot| slot.metrics.snapshot())
    }

    /// Whether a server id is registered
    pub fn is_registered(&self, server_id: &str) -> bool {
        self.servers.lock().unwrap().contains_key(server_id)
    }

    /// Ids of every registered server
    pub fn server_ids(&self) -> Vec<String> {
        self.servers.lock().unwrap().keys().cloned().collect()
    }

    /// Live connections for a server (leased + idle)
    pub fn connection_count(&self, server_id: &str) -> usize {
        let servers = self.servers.lock().unwrap();
        servers
            .get(server_id)
            .map(|slot| slot.connections.len())
            .unwrap_or(0)
    }

    /// Idle connections for a server
    pub fn idle_count(&self, server_id: &str) -> usize {
        let servers = self.servers.lock().unwrap();
        servers
            .get(server_id)
            .map(|slot| slot.connections.iter().filter(|c| !c.in_use).count())
            .unwrap_or(0)
    }

    /// Queued acquire requests for a server
    pub fn waiting_count(&self, server_id: &str) -> usize {
        let servers = self.servers.lock().unwrap();
        servers
            .get(server_id)
            .map(|slot| slot.waiters.len())
            .unwrap_or(0)
    }

    /// Shut the pool down: reject every waiter with `PoolClosed`, close
    /// every connection, stop the sweeper. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
        let slots: Vec<(String, ServerSlot)> = {
            let mut servers = self.servers.lock().unwrap();
            servers.drain().collect()
        };
        for (server_id, mut slot) in slots {
            for waiter in slot.waiters.drain(..) {
                let _ = waiter
                    .tx
                    .send(Err(ClientError::pool_closed("connection pool is shut down")));
            }
            for conn in slot.connections.drain(..) {
                conn.watcher.abort();
                self.events.emit(ClientEvent::ConnectionClosed {
                    server_id: server_id.clone(),
                    connection_id: conn.id,
                });
                let _ = conn.transport.disconnect().await;
            }
        }
        log::debug!("connection pool closed");
    }

    // Internals

    /// Decide what to do for an acquire while holding the state lock
    fn plan_acquire(&self, server_id: &str) -> Result<AcquirePlan> {
        let mut dead: Vec<PooledConnection> = Vec::new();
        let plan = {
            let mut servers = self.servers.lock().unwrap();
            let slot = servers
                .get_mut(server_id)
                .ok_or_else(|| ClientError::server_not_found(server_id))?;

            // Evict idle connections that died since their last use.
            let mut i = 0;
            while i < slot.connections.len() {
                let c = &slot.connections[i];
                if !c.in_use && (c.defunct || !c.transport.is_connected()) {
                    dead.push(slot.connections.swap_remove(i));
                } else {
                    i += 1;
                }
            }

            if let Some(conn) = slot.connections.iter_mut().find(|c| !c.in_use) {
                conn.in_use = true;
                conn.use_count += 1;
                conn.last_used = Instant::now();
                AcquirePlan::Ready(conn.handle(server_id))
            } else if slot.connections.len() + slot.pending_creates < self.config.max_connections {
                slot.pending_creates += 1;
                AcquirePlan::Create(slot.definition.clone())
            } else {
                let waiter_id = self.next_waiter_id.fetch_add(1, Ordering::SeqCst);
                let (tx, rx) = oneshot::channel();
                slot.waiters.push_back(Waiter { id: waiter_id, tx });
                AcquirePlan::Wait(waiter_id, rx)
            }
        };
        for conn in dead {
            self.drop_connection(server_id, conn);
        }
        Ok(plan)
    }

    /// Create, connect, and install a new pooled connection
    async fn create_connection(
        &self,
        server_id: &str,
        definition: ServerDefinition,
    ) -> Result<ConnectionHandle> {
        let connect_result = match self.factory.create(&definition) {
            Ok(transport) => match transport.connect().await {
                Ok(()) => Ok(transport),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        let transport = match connect_result {
            Ok(transport) => transport,
            Err(e) => {
                self.release_create_slot(server_id);
                return Err(ClientError::connection(format!(
                    "failed to connect to server '{}': {}",
                    server_id, e
                )));
            }
        };

        let connection_id = Uuid::new_v4();
        let watcher = self.spawn_watcher(server_id, connection_id, transport.subscribe());

        let handle = {
            let mut servers = self.servers.lock().unwrap();
            let Some(slot) = servers.get_mut(server_id) else {
                drop(servers);
                watcher.abort();
                detach_transport(transport);
                return Err(ClientError::server_not_found(server_id));
            };
            slot.pending_creates = slot.pending_creates.saturating_sub(1);
            if self.closed.load(Ordering::SeqCst) {
                drop(servers);
                watcher.abort();
                detach_transport(transport);
                return Err(ClientError::pool_closed("connection pool is shut down"));
            }
            let now = Instant::now();
            let conn = PooledConnection {
                id: connection_id,
                transport: Arc::clone(&transport),
                created_at: now,
                last_used: now,
                in_use: true,
                use_count: 1,
                defunct: false,
                watcher,
            };
            let handle = conn.handle(server_id);
            slot.connections.push(conn);
            handle
        };

        log::debug!(
            "created connection {} for server '{}'",
            connection_id,
            server_id
        );
        self.events.emit(ClientEvent::ConnectionCreated {
            server_id: server_id.to_string(),
            connection_id,
        });
        Ok(handle)
    }

    fn release_create_slot(&self, server_id: &str) {
        let mut servers = self.servers.lock().unwrap();
        if let Some(slot) = servers.get_mut(server_id) {
            slot.pending_creates = slot.pending_creates.saturating_sub(1);
        }
    }

    /// Watch one transport's event stream and evict its connection when
    /// the channel dies.
    fn spawn_watcher(
        &self,
        server_id: &str,
        connection_id: Uuid,
        mut rx: broadcast::Receiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let weak = self.self_ref.lock().unwrap().clone();
        let server_id = server_id.to_string();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Some(pool) = weak.upgrade() else { break };
                        if pool.handle_transport_event(&server_id, connection_id, event) {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// React to a transport event; returns true when the watcher is done
    fn handle_transport_event(
        &self,
        server_id: &str,
        connection_id: Uuid,
        event: TransportEvent,
    ) -> bool {
        if let TransportEvent::Error(message) = &event {
            log::warn!(
                "connection {} to server '{}' failed: {}",
                connection_id,
                server_id,
                message
            );
            self.events.emit(ClientEvent::ConnectionError {
                server_id: server_id.to_string(),
                connection_id,
                message: message.clone(),
            });
        }

        let removed = {
            let mut servers = self.servers.lock().unwrap();
            let Some(slot) = servers.get_mut(server_id) else {
                return true;
            };
            let Some(pos) = slot
                .connections
                .iter()
                .position(|c| c.id == connection_id)
            else {
                return true;
            };
            if slot.connections[pos].in_use {
                // The holder finds out on release; dropping the connection
                // out from under an in-flight call would double-free it.
                slot.connections[pos].defunct = true;
                None
            } else {
                Some(slot.connections.remove(pos))
            }
        };

        if let Some(conn) = removed {
            self.events.emit(ClientEvent::ConnectionClosed {
                server_id: server_id.to_string(),
                connection_id: conn.id,
            });
            detach_transport(conn.transport);
        }
        true
    }

    /// Close and account for a connection that left the pool
    fn drop_connection(&self, server_id: &str, conn: PooledConnection) {
        conn.watcher.abort();
        log::debug!(
            "closing connection {} to server '{}' after {} uses ({:?} old)",
            conn.id,
            server_id,
            conn.use_count,
            conn.created_at.elapsed()
        );
        self.events.emit(ClientEvent::ConnectionClosed {
            server_id: server_id.to_string(),
            connection_id: conn.id,
        });
        detach_transport(conn.transport);
    }

    /// Periodic sweep: evict dead idle connections unconditionally, then
    /// idle-timed-out connections down to `min_connections`.
    fn sweep_idle(&self) {
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout();
        let min = self.config.min_connections;
        let mut removed: Vec<(String, PooledConnection)> = Vec::new();
        {
            let mut servers = self.servers.lock().unwrap();
            for (server_id, slot) in servers.iter_mut() {
                let mut i = 0;
                while i < slot.connections.len() {
                    let c = &slot.connections[i];
                    if !c.in_use && (c.defunct || !c.transport.is_connected()) {
                        removed.push((server_id.clone(), slot.connections.swap_remove(i)));
                    } else {
                        i += 1;
                    }
                }
                while slot.connections.len() > min {
                    let Some(pos) = slot.connections.iter().position(|c| {
                        !c.in_use && now.duration_since(c.last_used) >= idle_timeout
                    }) else {
                        break;
                    };
                    removed.push((server_id.clone(), slot.connections.remove(pos)));
                }
            }
        }
        for (server_id, conn) in removed {
            self.drop_connection(&server_id, conn);
        }
    }
}

/// Disconnect a transport that no longer belongs to the pool
fn detach_transport(transport: Arc<dyn Transport>) {
    tokio::spawn(async move {
        let _ = transport.disconnect().await;
    });
}
