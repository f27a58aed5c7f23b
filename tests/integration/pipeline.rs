//! End-to-end tests of the check → queue → broadcast/alert pipeline
//!
//! Checks run through real HTTP sessions against mock servers.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use webwatch::{CheckStatus, engine::Engine, session::HttpSessionFactory};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

async fn mock_site() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_results_reach_subscribers_and_alerts() {
    let server = mock_site().await;
    let config = create_test_config(vec![
        create_test_website(1, format!("{}/ok", server.uri())),
        create_test_website(2, format!("{}/broken", server.uri())),
    ]);

    let sink = Arc::new(RecordingSink::default());
    let factory = Arc::new(HttpSessionFactory::from_config(&config.pool));
    let engine = Engine::start(&config, factory, sink.clone()).await.unwrap();

    let subscriber = Arc::new(RecordingSubscriber::default());
    engine.broadcaster().register(subscriber.clone());

    let up = engine.monitor(1).unwrap().check_now().await.unwrap();
    let down = engine.monitor(2).unwrap().check_now().await.unwrap();

    assert_eq!(up.status, CheckStatus::Up);
    assert_eq!(down.status, CheckStatus::Down);
    assert_eq!(down.error.as_deref(), Some("unexpected status code: 500"));
    assert_eq!(down.response_time_millis, 0);

    let received = subscriber.wait_for(2, Duration::from_secs(5)).await;
    assert!(received.len() >= 2, "expected both manual checks to be broadcast");
    assert!(received.iter().all(|update| update["website"].is_object()));
    assert!(
        received
            .iter()
            .any(|update| update["website"]["id"] == 2 && update["result"]["status"] == "DOWN")
    );

    // scheduled checks also ran at startup, so wait for the sink rather than counting exactly
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while sink.received().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let alerts = sink.received();
    assert!(!alerts.is_empty());
    assert!(alerts.iter().all(|a| a.metric.id == "website:2:availability"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_slow_response_triggers_response_time_alert() {
    let server = mock_site().await;
    let mut config = create_test_config(vec![create_test_website(
        1,
        format!("{}/slow", server.uri()),
    )]);
    config.alerts.response_time_threshold_ms = Some(100);

    let sink = Arc::new(RecordingSink::default());
    let factory = Arc::new(HttpSessionFactory::from_config(&config.pool));
    let engine = Engine::start(&config, factory, sink.clone()).await.unwrap();

    let result = engine.monitor(1).unwrap().check_now().await.unwrap();
    assert!(result.is_up());
    assert!(result.response_time_millis >= 300);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while sink.received().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let alert = &sink.received()[0];
    assert_eq!(alert.metric.id, "website:1:response_time");
    assert!(alert.metric.value >= 300.0);
    assert_eq!(alert.metric.threshold, 100.0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_healthy_website_produces_no_alerts() {
    let server = mock_site().await;
    let config = create_test_config(vec![create_test_website(1, format!("{}/ok", server.uri()))]);

    let sink = Arc::new(RecordingSink::default());
    let factory = Arc::new(HttpSessionFactory::from_config(&config.pool));
    let engine = Engine::start(&config, factory, sink.clone()).await.unwrap();

    engine.monitor(1).unwrap().check_now().await.unwrap();
    engine.shutdown().await;

    let stats = engine.stats();
    assert!(stats.consumers.processed >= 1);
    assert_eq!(stats.alerts.alerts, 0);
    assert!(sink.received().is_empty());
}
