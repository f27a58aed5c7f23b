//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - REST endpoints return correct responses
//! - Unknown and inactive websites cannot be checked
//! - WebSocket clients receive live updates

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use futures::StreamExt;
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use webwatch::{
    alerts::LogSink,
    api::{ApiConfig, ApiState, spawn_api_server},
    engine::Engine,
};

use crate::helpers::*;

async fn spawn_test_api() -> (SocketAddr, Arc<Engine>) {
    let mut inactive = create_test_website(2, "https://inactive.example.com");
    inactive.active = false;

    let mut config = create_test_config(vec![
        create_test_website(1, "https://example.com"),
        inactive,
    ]);
    config.websites[0].monitoring_interval = 3600;

    let factory = ScriptedFactory::new(Duration::from_millis(5));
    let engine = Arc::new(
        Engine::start(&config, factory, Arc::new(LogSink))
            .await
            .unwrap(),
    );

    let api_config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(), // Random port
        enable_cors: true,
    };
    let addr = spawn_api_server(api_config, ApiState::new(Arc::clone(&engine), 16))
        .await
        .unwrap();

    (addr, engine)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, engine) = spawn_test_api().await;

    let response = reqwest::get(format!("http://{addr}/api/v1/health"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), StatusCode::OK.as_u16());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_stats_endpoint() {
    let (addr, engine) = spawn_test_api().await;

    let body: Value = reqwest::get(format!("http://{addr}/api/v1/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["websites"], 1);
    assert_eq!(body["pool"]["capacity"], 2);
    assert_eq!(body["breakers"][0]["name"], "monitoring");
    assert_eq!(body["breakers"][0]["state"], "CLOSED");
    assert!(body["queue"]["capacity"].is_number());
    assert!(body["broadcast"]["subscribers"].is_number());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_check_endpoint_runs_check() {
    let (addr, engine) = spawn_test_api().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/api/v1/websites/1/check"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), StatusCode::OK.as_u16());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["websiteId"], 1);
    assert_eq!(body["status"], "UP");
    assert!(body["timestamp"].is_i64());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_check_endpoint_rejects_unknown_and_inactive() {
    let (addr, engine) = spawn_test_api().await;
    let client = reqwest::Client::new();

    for id in [2, 99] {
        let response = client
            .post(format!("http://{addr}/api/v1/websites/{id}/check"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), StatusCode::NOT_FOUND.as_u16());

        let body: Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains(&id.to_string()));
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn test_websocket_receives_updates() {
    let (addr, engine) = spawn_test_api().await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/api/v1/stream"))
        .await
        .unwrap();

    // registration happens once the upgrade completes on the server side
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while engine.broadcaster().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(engine.broadcaster().len(), 1);

    reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/websites/1/check"))
        .send()
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("no update within 5s")
        .unwrap()
        .unwrap();
    let text = match frame {
        Message::Text(text) => text,
        other => panic!("expected a text frame, got {other:?}"),
    };

    let update: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(update["website"]["id"], 1);
    assert_eq!(update["result"]["websiteId"], 1);
    assert_eq!(update["result"]["status"], "UP");

    socket.close(None).await.unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !engine.broadcaster().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(engine.broadcaster().is_empty());

    engine.shutdown().await;
}
