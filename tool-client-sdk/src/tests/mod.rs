//! Unit and integration tests for the Tool Client SDK
//!
//! Pool and manager tests run against scripted in-memory transports; the
//! transport tests run against a raw TCP JSON-RPC fixture.

// Re-export test modules
pub mod manager_tests;
pub mod support;
