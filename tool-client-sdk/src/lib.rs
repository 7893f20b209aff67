//! # Tool Client SDK
//!
//! Resilient connection pooling and client management for external tool
//! servers speaking a JSON-RPC tool-invocation protocol.
//!
//! This crate provides:
//!
//! - A `Transport` capability trait with stdio (subprocess) and HTTP
//!   implementations
//! - A bounded `ConnectionPool` with a FIFO wait queue and idle sweeping
//! - A `ClientManager` facade that owns server registration and tool
//!   invocation
//! - Resilience patterns (retries, per-server circuit breakers)
//! - A typed event bus for connection lifecycle observability
//!
//! ## Architecture
//!
//! Callers never touch a pool directly. A caller asks the [`ClientManager`]
//! to invoke a tool; the manager acquires a connection from the
//! [`ConnectionPool`], dispatches the call through the connection's
//! [`Transport`], and releases the connection back. Optional retry and
//! circuit-breaker policies are layered around that acquire/invoke cycle.

// Re-export error handling
pub mod error;
pub use error::{ClientError, Result};

// Re-export transport capability and implementations
pub mod transport;
pub use transport::{
    ServerDefinition, ToolDescriptor, Transport, TransportEvent, TransportFactory,
    TransportKind, TransportStatus,
};

// Re-export the connection pool
pub mod pool;
pub use pool::{ConnectionHandle, ConnectionPool, PoolMetricsSnapshot};

// Re-export the client manager
pub mod manager;
pub use manager::ClientManager;

// Re-export resilience patterns
pub mod resilience;
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, RetryConfig, RetryExecutor};

// Re-export configuration
pub mod config;
pub use config::{ManagerConfig, PoolConfig};

// Re-export events
pub mod events;
pub use events::{ClientEvent, EventBus};

#[cfg(test)]
mod tests;
