//! Concurrency tests
//!
//! - The pool never lends more sessions than it owns
//! - Concurrent offers never exceed the queue bound
//! - Subscribers can come and go while updates are published

use std::sync::Arc;
use std::time::Duration;

use webwatch::{
    MonitoringData, MonitoringResult, Website,
    alerts::LogSink,
    broadcast::{BroadcastOptions, Broadcaster},
    engine::Engine,
    queue::ResultQueue,
};

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_concurrent_checks_never_exceed_pool_capacity() {
    let mut config = create_test_config(vec![create_test_website(1, "https://example.com")]);
    config.pool.capacity = 5;
    config.pool.acquire_timeout_secs = 60;
    config.websites[0].monitoring_interval = 3600;

    let factory = ScriptedFactory::new(Duration::from_millis(50));
    let engine = Arc::new(
        Engine::start(&config, factory.clone(), Arc::new(LogSink))
            .await
            .unwrap(),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    let handles: Vec<_> = (0..50)
        .map(|id| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let website = Website::new(id, format!("https://site-{id}.example.com"));
                engine.executor().monitor(&website).await
            })
        })
        .collect();

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.is_up(), "check {} failed: {:?}", result.website_id, result.error);
    }

    assert!(factory.max_in_flight() <= 5);
    assert_eq!(factory.navigations(), 51);

    let pool = engine.pool().stats();
    assert_eq!(pool.available, 5);
    assert_eq!(pool.checked_out, 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_offers_respect_capacity() {
    let queue = ResultQueue::new(100);

    let handles: Vec<_> = (0..10)
        .map(|task| {
            let queue = queue.clone();
            tokio::spawn(async move {
                for i in 0..50u64 {
                    let id = task * 50 + i;
                    queue.offer(MonitoringData::new(
                        Website::new(id, "https://example.com"),
                        MonitoringResult::up(id, Duration::from_millis(1)),
                    ));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = queue.stats();
    assert_eq!(stats.len, 100);
    assert_eq!(stats.enqueued, 100);
    assert_eq!(stats.dropped, 400);
}

#[tokio::test]
async fn test_subscribers_churn_during_publish() {
    let broadcaster = Arc::new(Broadcaster::new(BroadcastOptions::default()));
    let steady = Arc::new(RecordingSubscriber::default());
    broadcaster.register(steady.clone());

    let churn = {
        let broadcaster = Arc::clone(&broadcaster);
        tokio::spawn(async move {
            for _ in 0..100 {
                let id = broadcaster.register(Arc::new(RecordingSubscriber::default()));
                tokio::task::yield_now().await;
                broadcaster.unregister(id);
            }
        })
    };

    for id in 0..100 {
        let data = MonitoringData::new(
            Website::new(id, "https://example.com"),
            MonitoringResult::down(id, "connection failed"),
        );
        broadcaster.publish(&data).await.unwrap();
    }
    churn.await.unwrap();

    assert_eq!(steady.received().len(), 100);
    assert_eq!(broadcaster.len(), 1);
}
