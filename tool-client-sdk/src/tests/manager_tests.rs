//! Client manager behavior tests

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::config::{ManagerConfig, PoolConfig};
use crate::error::ClientError;
use crate::manager::ClientManager;
use crate::resilience::{CircuitBreakerConfig, CircuitState, RetryConfig};
use crate::tests::support::{definition, TestFactory};

fn quick_pool_config() -> PoolConfig {
    PoolConfig {
        max_connections: 2,
        acquire_timeout_ms: 200,
        sweep_interval_ms: 0,
        ..PoolConfig::default()
    }
}

fn new_manager(config: ManagerConfig) -> (ClientManager, Arc<TestFactory>) {
    let factory = TestFactory::new();
    let manager = ClientManager::with_factory(config, quick_pool_config(), factory.clone());
    (manager, factory)
}

#[tokio::test]
async fn invocation_requires_initialization() {
    let (manager, _factory) = new_manager(ManagerConfig::default());
    manager.register_server(definition("files")).unwrap();

    let err = manager
        .call_tool("files", "read", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));

    manager.initialize().unwrap();
    assert!(manager.call_tool("files", "read", json!({})).await.is_ok());
}

#[tokio::test]
async fn call_tool_dispatches_and_returns_the_connection() {
    let (manager, factory) = new_manager(ManagerConfig::default());
    manager.initialize().unwrap();
    manager.register_server(definition("files")).unwrap();

    let result = manager
        .call_tool("files", "read", json!({ "path": "/tmp/x" }))
        .await
        .unwrap();
    assert_eq!(result["content"][0]["text"], "done");

    let transport = factory.last_transport("files").unwrap();
    assert_eq!(transport.calls(), vec!["tools/call"]);
    assert_eq!(manager.pool().idle_count("files"), 1);
}

#[tokio::test]
async fn connection_errors_discard_the_pooled_connection() {
    let (manager, factory) = new_manager(ManagerConfig::default());
    manager.initialize().unwrap();
    manager.register_server(definition("files")).unwrap();
    factory.script(
        "files",
        vec![Err(ClientError::connection("pipe broke mid-call"))],
    );

    let err = manager
        .call_tool("files", "read", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Connection(_)));
    assert_eq!(manager.pool().connection_count("files"), 0);
}

#[tokio::test]
async fn retry_reacquires_after_transient_failures() {
    let config = ManagerConfig {
        enable_retry: true,
        retry: RetryConfig {
            max_retries: 2,
            initial_interval_ms: 5,
            max_interval_ms: 20,
            ..RetryConfig::default()
        },
        ..ManagerConfig::default()
    };
    let (manager, factory) = new_manager(config);
    manager.initialize().unwrap();
    manager.register_server(definition("files")).unwrap();
    factory.script(
        "files",
        vec![
            Err(ClientError::connection("pipe broke mid-call")),
            Ok(json!({ "content": [{ "type": "text", "text": "recovered" }] })),
        ],
    );

    let result = manager.call_tool("files", "read", json!({})).await.unwrap();
    assert_eq!(result["content"][0]["text"], "recovered");
    // The failed connection was discarded and a fresh one created.
    assert_eq!(factory.created(), 2);
}

#[tokio::test]
async fn breaker_opens_after_repeated_server_failures() {
    let config = ManagerConfig {
        enable_circuit_breaker: true,
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            ..CircuitBreakerConfig::default()
        },
        ..ManagerConfig::default()
    };
    let (manager, factory) = new_manager(config);
    manager.initialize().unwrap();
    manager.register_server(definition("files")).unwrap();
    factory.script(
        "files",
        vec![
            Err(ClientError::tool_execution("boom")),
            Err(ClientError::tool_execution("boom")),
        ],
    );

    for _ in 0..2 {
        let err = manager
            .call_tool("files", "read", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ToolExecution(_)));
    }

    assert_eq!(manager.circuit_state("files"), Some(CircuitState::Open));
    let err = manager
        .call_tool("files", "read", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::CircuitOpen(_)));
}

#[tokio::test]
async fn per_call_deadline_yields_timeout() {
    let config = ManagerConfig {
        default_timeout_ms: 30,
        ..ManagerConfig::default()
    };
    let (manager, factory) = new_manager(config);
    factory.set_call_delay(Duration::from_millis(200));
    manager.initialize().unwrap();
    manager.register_server(definition("slow")).unwrap();

    let err = manager
        .call_tool("slow", "read", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)));
    // Timeouts return the connection rather than discarding it.
    assert_eq!(manager.pool().connection_count("slow"), 1);
}

#[tokio::test]
async fn get_tools_lists_server_tools() {
    let (manager, factory) = new_manager(ManagerConfig::default());
    manager.initialize().unwrap();
    manager.register_server(definition("files")).unwrap();
    factory.script(
        "files",
        vec![Ok(json!({ "tools": [{ "name": "read" }, { "name": "write" }] }))],
    );

    let tools = manager.get_tools("files").await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["read", "write"]);
}

#[tokio::test]
async fn get_all_tools_skips_unreachable_servers() {
    let (manager, factory) = new_manager(ManagerConfig::default());
    manager.initialize().unwrap();
    manager.register_server(definition("good")).unwrap();
    manager.register_server(definition("bad")).unwrap();
    factory.fail_connect("bad");
    factory.script("good", vec![Ok(json!({ "tools": [{ "name": "read" }] }))]);

    let all = manager.get_all_tools().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all["good"].len(), 1);
    assert!(all["bad"].is_empty());
}

#[tokio::test]
async fn unregister_removes_server_and_breaker() {
    let (manager, _factory) = new_manager(ManagerConfig::default());
    manager.initialize().unwrap();
    manager.register_server(definition("files")).unwrap();
    assert!(manager.is_registered("files"));

    manager.unregister_server("files").unwrap();
    assert!(!manager.is_registered("files"));

    let err = manager
        .call_tool("files", "read", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::ServerNotFound(_)));
}

#[tokio::test]
async fn shutdown_closes_the_pool_and_is_idempotent() {
    let (manager, _factory) = new_manager(ManagerConfig::default());
    manager.initialize().unwrap();
    manager.register_server(definition("files")).unwrap();
    manager.call_tool("files", "read", json!({})).await.unwrap();

    manager.shutdown().await;
    manager.shutdown().await;

    let err = manager
        .call_tool("files", "read", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
}
