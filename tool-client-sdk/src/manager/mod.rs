//! Client manager facade
//!
//! The [`ClientManager`] is the single entry point callers use: it owns
//! the connection pool, the server registry, and the optional resilience
//! policies. A tool invocation is acquire → dispatch → release, with the
//! per-call deadline applied around the dispatch and retry/breaker
//! policies layered around the whole cycle when enabled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::{ManagerConfig, PoolConfig};
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::pool::{ConnectionHandle, ConnectionPool, PoolMetricsSnapshot};
use crate::resilience::{BreakerRegistry, CircuitState, RetryExecutor};
use crate::transport::{
    DefaultTransportFactory, ServerDefinition, ToolDescriptor, TransportFactory,
};

/// Manages tool server connections and dispatches tool invocations
pub struct ClientManager {
    pool: Arc<ConnectionPool>,
    config: ManagerConfig,
    retry: RetryExecutor,
    breakers: BreakerRegistry,
    events: EventBus,
    initialized: AtomicBool,
}

impl ClientManager {
    /// Create a manager using the default stdio/HTTP transport factory
    pub fn new(config: ManagerConfig, pool_config: PoolConfig) -> Self {
        Self::with_factory(config, pool_config, Arc::new(DefaultTransportFactory))
    }

    /// Create a manager with a custom transport factory
    pub fn with_factory(
        config: ManagerConfig,
        pool_config: PoolConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let events = EventBus::new();
        let pool = ConnectionPool::new(pool_config, factory, events.clone());
        let retry = RetryExecutor::new(config.retry.clone());
        let breakers = BreakerRegistry::new(config.circuit_breaker.clone());
        Self {
            pool,
            config,
            retry,
            breakers,
            events,
            initialized: AtomicBool::new(false),
        }
    }

    /// Mark the manager ready for tool invocation. Idempotent.
    pub fn initialize(&self) -> Result<()> {
        if !self.initialized.swap(true, Ordering::SeqCst) {
            log::info!("tool client manager initialized");
            self.events.emit(ClientEvent::Initialized);
        }
        Ok(())
    }

    /// Shut down: close the pool and reject future invocations. Idempotent.
    pub async fn shutdown(&self) {
        if self.initialized.swap(false, Ordering::SeqCst) {
            self.pool.close().await;
            log::info!("tool client manager shut down");
            self.events.emit(ClientEvent::Shutdown);
        }
    }

    /// Register a server definition; an existing id has its definition
    /// swapped without closing live connections. Allowed before
    /// `initialize`, so deployments can configure first and go live once.
    pub fn register_server(&self, definition: ServerDefinition) -> Result<()> {
        self.pool.register_server(definition)
    }

    /// Remove a server and its connections, breaker included
    pub fn unregister_server(&self, server_id: &str) -> Result<()> {
        self.pool.unregister_server(server_id)?;
        self.breakers.remove(server_id);
        Ok(())
    }

    /// Whether a server id is registered
    pub fn is_registered(&self, server_id: &str) -> bool {
        self.pool.is_registered(server_id)
    }

    /// Ids of every registered server
    pub fn server_ids(&self) -> Vec<String> {
        self.pool.server_ids()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Call metrics for one server
    pub fn metrics(&self, server_id: &str) -> Option<PoolMetricsSnapshot> {
        self.pool.metrics(server_id)
    }

    /// Circuit state for one server, when breakers are enabled
    pub fn circuit_state(&self, server_id: &str) -> Option<CircuitState> {
        self.config
            .enable_circuit_breaker
            .then(|| self.breakers.for_server(server_id).state())
    }

    /// The underlying pool, for introspection
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Invoke one tool on one server.
    ///
    /// Applies the per-call deadline, and the retry and circuit-breaker
    /// policies when enabled. Connection-level failures discard the
    /// pooled connection; every other outcome returns it.
    pub async fn call_tool(
        &self,
        server_id: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value> {
        self.ensure_initialized()?;
        let breaker = self
            .config
            .enable_circuit_breaker
            .then(|| self.breakers.for_server(server_id));

        let attempt = || {
            let breaker = breaker.clone();
            let arguments = arguments.clone();
            async move {
                if let Some(breaker) = &breaker {
                    breaker.check()?;
                }
                let result = self.attempt_call(server_id, tool, arguments).await;
                if let Some(breaker) = &breaker {
                    match &result {
                        Ok(_) => breaker.record_success(),
                        // Only server-side failures count against the
                        // breaker; pool exhaustion and caller mistakes do
                        // not.
                        Err(ClientError::Connection(_))
                        | Err(ClientError::Timeout(_))
                        | Err(ClientError::ToolExecution(_)) => breaker.record_failure(),
                        Err(_) => {}
                    }
                }
                result
            }
        };

        if self.config.enable_retry {
            self.retry.execute(attempt).await
        } else {
            attempt().await
        }
    }

    /// List the tools one server exposes
    pub async fn get_tools(&self, server_id: &str) -> Result<Vec<ToolDescriptor>> {
        self.ensure_initialized()?;
        let handle = self.pool.acquire(server_id).await?;
        let result = handle.transport.list_tools().await;
        self.finish_lease(server_id, handle, &result)?;
        result
    }

    /// List the tools of every registered server, queried concurrently.
    ///
    /// A server that cannot be reached contributes an empty list instead
    /// of failing the whole aggregation.
    pub async fn get_all_tools(&self) -> Result<HashMap<String, Vec<ToolDescriptor>>> {
        self.ensure_initialized()?;
        let listings = self.pool.server_ids().into_iter().map(|server_id| async {
            let tools = self.get_tools(&server_id).await;
            (server_id, tools)
        });
        let mut all = HashMap::new();
        for (server_id, tools) in future::join_all(listings).await {
            match tools {
                Ok(tools) => {
                    all.insert(server_id, tools);
                }
                Err(e) => {
                    log::warn!("listing tools for server '{}' failed: {}", server_id, e);
                    all.insert(server_id, Vec::new());
                }
            }
        }
        Ok(all)
    }

    // Internals

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::validation("client manager is not initialized"))
        }
    }

    /// One acquire → dispatch → release cycle with the per-call deadline
    async fn attempt_call(&self, server_id: &str, tool: &str, arguments: Value) -> Result<Value> {
        let handle = self.pool.acquire(server_id).await?;
        let started = Instant::now();

        let call = handle.transport.call_tool(tool, arguments);
        let result = match self.config.default_timeout() {
            Some(deadline) => match tokio::time::timeout(deadline, call).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::timeout(format!(
                    "tool '{}' on server '{}' exceeded {:?}",
                    tool, server_id, deadline
                ))),
            },
            None => call.await,
        };

        self.pool
            .record_call(server_id, started.elapsed(), result.is_ok());
        self.finish_lease(server_id, handle, &result)?;
        result
    }

    /// Return the lease: connection failures drop the connection, every
    /// other outcome puts it back.
    fn finish_lease<T>(
        &self,
        server_id: &str,
        handle: ConnectionHandle,
        result: &Result<T>,
    ) -> Result<()> {
        match result {
            Err(ClientError::Connection(_)) => {
                self.pool.discard(server_id, handle);
                Ok(())
            }
            _ => self.pool.release(server_id, handle),
        }
    }
}
