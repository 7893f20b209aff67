//! Error handling for the Tool Client SDK
//!
//! This module provides the pool- and manager-level error taxonomy:
//! - Connection and protocol failures surfaced by transports
//! - Pool lifecycle failures (unknown server, exhaustion, closed pool)
//! - Policy failures (timeouts, open circuit breakers)
//!
//! Every variant carries a short stable code used by recovery tooling to
//! match errors without parsing display strings.

use thiserror::Error;

/// Result type for Tool Client SDK operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Main error type for the Tool Client SDK
#[derive(Error, Debug)]
pub enum ClientError {
    /// Failed to establish or keep a transport connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// The referenced server id is not registered
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// The pool (or a per-server slot) has been shut down
    #[error("Pool closed: {0}")]
    PoolClosed(String),

    /// All connections are busy and the wait queue timed out
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// An invocation exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The per-server circuit breaker is rejecting calls
    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    /// The tool server reported a failed tool invocation
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// The tool server does not expose the requested tool
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Request validation failed before dispatch
    #[error("Validation error: {0}")]
    Validation(String),

    /// The peer sent a frame we could not interpret
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Unexpected internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        ClientError::Connection(message.into())
    }

    /// Create a server-not-found error
    pub fn server_not_found(server_id: impl Into<String>) -> Self {
        ClientError::ServerNotFound(server_id.into())
    }

    /// Create a pool-closed error
    pub fn pool_closed(message: impl Into<String>) -> Self {
        ClientError::PoolClosed(message.into())
    }

    /// Create a resource-exhausted error
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        ClientError::ResourceExhausted(message.into())
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        ClientError::Timeout(message.into())
    }

    /// Create a circuit-open error
    pub fn circuit_open(message: impl Into<String>) -> Self {
        ClientError::CircuitOpen(message.into())
    }

    /// Create a tool execution error
    pub fn tool_execution(message: impl Into<String>) -> Self {
        ClientError::ToolExecution(message.into())
    }

    /// Create a tool-not-found error
    pub fn tool_not_found(message: impl Into<String>) -> Self {
        ClientError::ToolNotFound(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        ClientError::Validation(message.into())
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        ClientError::Protocol(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        ClientError::Internal(message.into())
    }

    /// Short stable code for this error variant
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Connection(_) => "CONNECTION_ERROR",
            ClientError::ServerNotFound(_) => "SERVER_NOT_FOUND",
            ClientError::PoolClosed(_) => "POOL_CLOSED",
            ClientError::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            ClientError::Timeout(_) => "TIMEOUT",
            ClientError::CircuitOpen(_) => "CIRCUIT_OPEN",
            ClientError::ToolExecution(_) => "TOOL_EXECUTION_ERROR",
            ClientError::ToolNotFound(_) => "TOOL_NOT_FOUND",
            ClientError::Validation(_) => "VALIDATION_ERROR",
            ClientError::Protocol(_) => "PROTOCOL_ERROR",
            ClientError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Check if this is a retryable error
    ///
    /// Circuit-open errors are deliberately not retryable: the breaker
    /// rejects fast until its reset timeout elapses.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Connection(_)
                | ClientError::Timeout(_)
                | ClientError::ResourceExhausted(_)
        )
    }

    /// Check if this is a permanent error (not retryable)
    pub fn is_permanent(&self) -> bool {
        !self.is_retryable()
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::connection(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::protocol(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::timeout(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            ClientError::connection(format!("Connection error: {}", err))
        } else if err.is_decode() {
            ClientError::protocol(format!("Response decode error: {}", err))
        } else {
            ClientError::connection(format!("HTTP error: {}", err))
        }
    }
}
