//! Fan-out of monitoring updates to live subscribers
//!
//! Payloads are serialized once per publish and shared between all sends. Slow or broken
//! subscribers only affect themselves: each send is bounded by a timeout, and any
//! connection that fails is dropped from the registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, instrument, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("send timed out after {0:?}")]
    TimedOut(Duration),

    #[error("transport error: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("failed to serialize update: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One live subscriber, e.g. a websocket session
#[async_trait]
pub trait SubscriberConnection: Send + Sync {
    fn is_open(&self) -> bool;

    async fn send(&self, payload: Arc<str>) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub delivered: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    pub subscribers: usize,
    pub published: u64,
    pub delivered: u64,
    pub removed: u64,
    pub serialize_failures: u64,
}

#[derive(Debug, Clone)]
pub struct BroadcastOptions {
    pub fanout_concurrency: usize,
    pub send_timeout: Duration,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self {
            fanout_concurrency: 16,
            send_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&crate::config::BroadcastConfig> for BroadcastOptions {
    fn from(config: &crate::config::BroadcastConfig) -> Self {
        Self {
            fanout_concurrency: config.fanout_concurrency,
            send_timeout: config.send_timeout(),
        }
    }
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    removed: AtomicU64,
    serialize_failures: AtomicU64,
}

pub struct Broadcaster {
    connections: DashMap<ConnectionId, Arc<dyn SubscriberConnection>>,
    next_id: AtomicU64,
    options: BroadcastOptions,
    counters: Counters,
}

impl Broadcaster {
    pub fn new(options: BroadcastOptions) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            options,
            counters: Counters::default(),
        }
    }

    pub fn register(&self, connection: Arc<dyn SubscriberConnection>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections.insert(id, connection);
        info!("{id} subscribed ({} total)", self.connections.len());
        id
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unregister(&self, id: ConnectionId) {
        if self.connections.remove(&id).is_some() {
            info!("{id} unsubscribed ({} total)", self.connections.len());
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Deliver `update` to every subscriber registered right now.
    #[instrument(skip_all, fields(subscribers = self.connections.len()))]
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        update: &T,
    ) -> Result<PublishReport, BroadcastError> {
        let payload: Arc<str> = match serde_json::to_string(update) {
            Ok(json) => json.into(),
            Err(e) => {
                self.counters
                    .serialize_failures
                    .fetch_add(1, Ordering::Relaxed);
                error!("could not serialize update: {e}");
                return Err(e.into());
            }
        };
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        // snapshot so no map shard stays locked while sends are in flight
        let targets: Vec<_> = self
            .connections
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        if targets.is_empty() {
            trace!("no subscribers");
            return Ok(PublishReport::default());
        }

        let send_timeout = self.options.send_timeout;
        let sends: Vec<_> = targets
            .into_iter()
            .map(|(id, connection)| {
                let payload = Arc::clone(&payload);
                async move {
                    if !connection.is_open() {
                        return (id, Err(TransportError::Closed));
                    }
                    let outcome = match tokio::time::timeout(send_timeout, connection.send(payload))
                        .await
                    {
                        Ok(sent) => sent,
                        Err(_) => Err(TransportError::TimedOut(send_timeout)),
                    };
                    (id, outcome)
                }
            })
            .collect();

        let outcomes: Vec<(ConnectionId, Result<(), TransportError>)> = stream::iter(sends)
            .buffer_unordered(self.options.fanout_concurrency.max(1))
            .collect()
            .await;

        let mut report = PublishReport::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!("dropping {id}: {e}");
                    if self.connections.remove(&id).is_some() {
                        report.removed += 1;
                    }
                }
            }
        }

        self.counters
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.counters
            .removed
            .fetch_add(report.removed as u64, Ordering::Relaxed);

        Ok(report)
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            subscribers: self.connections.len(),
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            removed: self.counters.removed.load(Ordering::Relaxed),
            serialize_failures: self.counters.serialize_failures.load(Ordering::Relaxed),
        }
    }
}
