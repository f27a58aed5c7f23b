//! Bounded result queue
//!
//! Producers never wait: [`ResultQueue::offer`] drops the item when the queue is full and
//! counts the drop, so monitoring cadence is never throttled by downstream consumers.
//! History can therefore have gaps under sustained overload.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;
use tracing::{trace, warn};

use crate::MonitoringData;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub capacity: usize,
    pub len: usize,
    pub enqueued: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

/// Result of one poll
#[derive(Debug, PartialEq, Eq)]
pub enum Poll {
    Item(MonitoringData),
    Empty,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ResultQueue {
    tx: Sender<MonitoringData>,
    rx: Receiver<MonitoringData>,
    capacity: usize,
    counters: Arc<Counters>,
}

impl ResultQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = async_channel::bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            counters: Arc::default(),
        }
    }

    /// Enqueue without waiting. Returns `false` if the item was dropped.
    pub fn offer(&self, data: MonitoringData) -> bool {
        match self.tx.try_send(data) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(data)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    website = data.website.id,
                    "result queue full, dropping result ({dropped} dropped so far)"
                );
                false
            }
            Err(TrySendError::Closed(data)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(website = data.website.id, "result queue closed, dropping result");
                false
            }
        }
    }

    /// Wait up to `timeout` for the next item.
    pub async fn poll(&self, timeout: Duration) -> Poll {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Ok(data)) => Poll::Item(data),
            Ok(Err(_)) => Poll::Closed,
            Err(_) => Poll::Empty,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Refuse new items. Items already queued can still be polled.
    pub fn close(&self) {
        self.tx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            capacity: self.capacity,
            len: self.len(),
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}
