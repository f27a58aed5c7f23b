//! Failure tests for the monitoring engine
//!
//! These tests verify that the system handles failures gracefully:
//! - Unreachable endpoints
//! - Session pool exhaustion
//! - Circuit breaker trips and recovery
//! - Compromised sessions
//! - Alert sinks that reject notifications

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use webwatch::{
    CheckStatus,
    alerts::LogSink,
    breaker::CircuitState,
    engine::Engine,
    session::{CheckError, HttpSessionFactory},
};

use crate::helpers::*;

#[tokio::test]
async fn test_unreachable_website_is_down() {
    let mut config = create_test_config(vec![create_test_website(1, "http://127.0.0.1:9")]);
    config.retry.max_attempts = 2;

    let factory = Arc::new(HttpSessionFactory::from_config(&config.pool));
    let engine = Engine::start(&config, factory, Arc::new(LogSink))
        .await
        .unwrap();

    let result = engine.monitor(1).unwrap().check_now().await.unwrap();

    assert_eq!(result.status, CheckStatus::Down);
    assert_eq!(result.response_time_millis, 0);
    assert!(result.error.is_some());

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_pool_produces_down_result() {
    let mut config = create_test_config(vec![create_test_website(1, "https://example.com")]);
    config.pool.acquire_timeout_secs = 30;
    config.websites[0].monitoring_interval = 3600;

    let factory = ScriptedFactory::new(Duration::ZERO);
    let engine = Engine::start(&config, factory, Arc::new(LogSink))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let _a = engine.pool().acquire(Duration::from_secs(1)).await.unwrap();
    let _b = engine.pool().acquire(Duration::from_secs(1)).await.unwrap();

    let start = tokio::time::Instant::now();
    let result = engine.executor().monitor(&config.websites[0]).await;

    assert!(start.elapsed() >= Duration::from_secs(30));
    assert_eq!(result.status, CheckStatus::Down);
    assert!(
        result
            .error
            .as_deref()
            .is_some_and(|e| e.contains("no available session")),
        "unexpected error: {:?}",
        result.error
    );
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_then_recovers() {
    let mut config = create_test_config(vec![create_test_website(1, "https://example.com")]);
    config.websites[0].monitoring_interval = 3600;
    config.breaker.failure_threshold = 3;
    config.breaker.cool_down_secs = 30;

    let factory = ScriptedFactory::new(Duration::from_millis(5));
    let engine = Engine::start(&config, factory.clone(), Arc::new(LogSink))
        .await
        .unwrap();
    // let the startup check finish before failures are switched on
    tokio::time::sleep(Duration::from_millis(100)).await;

    factory.set_failing(true);
    let website = &config.websites[0];

    let first = engine.executor().monitor(website).await;
    assert_eq!(first.error.as_deref(), Some("connection failed"));
    assert_eq!(engine.executor().breaker().state(), CircuitState::Open);

    let navigations = factory.navigations();
    let rejected = engine.executor().monitor(website).await;
    assert_eq!(
        rejected.error.as_deref(),
        Some("circuit breaker 'monitoring' is open")
    );
    assert_eq!(factory.navigations(), navigations);

    factory.set_failing(false);
    tokio::time::sleep(Duration::from_secs(30)).await;

    let recovered = engine.executor().monitor(website).await;
    assert!(recovered.is_up());
    assert_eq!(engine.executor().breaker().state(), CircuitState::Closed);

    let stats = engine.stats();
    assert_eq!(stats.breakers[0].name, "monitoring");
    assert!(stats.breakers[0].rejected >= 1);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_compromised_session_is_replaced() {
    let mut config = create_test_config(vec![create_test_website(1, "https://example.com")]);
    config.websites[0].monitoring_interval = 3600;

    let factory = ScriptedFactory::new(Duration::ZERO);
    let engine = Engine::start(&config, factory.clone(), Arc::new(LogSink))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    factory.push_outcomes([Err(CheckError::SessionLost("browser crashed".into()))]);

    let result = engine.executor().monitor(&config.websites[0]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(result.is_up(), "retry should succeed on a healthy session");
    let pool = engine.pool().stats();
    assert_eq!(pool.discarded, 1);
    assert_eq!(pool.available, 2);
    assert_eq!(factory.created(), 3);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_sink_does_not_stop_pipeline() {
    let mut config = create_test_config(vec![create_test_website(1, "https://example.com")]);
    config.websites[0].monitoring_interval = 3600;
    config.retry.max_attempts = 1;

    let factory = ScriptedFactory::new(Duration::ZERO);
    factory.set_failing(true);
    let sink = Arc::new(RecordingSink::failing());
    let engine = Engine::start(&config, factory, sink.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    for _ in 0..3 {
        engine.monitor(1).unwrap().check_now().await.unwrap();
    }
    engine.shutdown().await;

    let stats = engine.stats();
    assert_eq!(stats.consumers.processed, 4);
    assert_eq!(stats.alerts.alerts, 4);
    assert_eq!(stats.alerts.dispatch_failures, 4);
    assert_eq!(sink.received().len(), 4);
}
