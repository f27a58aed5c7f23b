//! QueueConsumer - drains the result queue into the broadcaster and the alert evaluator
//!
//! A group of identical workers shares one queue. Each item is handled by exactly one
//! worker; there is no ordering between workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::MonitoringData;
use crate::alerts::AlertEvaluator;
use crate::broadcast::Broadcaster;
use crate::queue::{Poll, ResultQueue};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub workers: usize,
    pub processed: u64,
    pub publish_failures: u64,
    pub alerts: u64,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    publish_failures: AtomicU64,
    alerts: AtomicU64,
}

struct QueueConsumer {
    worker: usize,
    queue: ResultQueue,
    broadcaster: Arc<Broadcaster>,
    evaluator: Arc<AlertEvaluator>,
    poll_timeout: Duration,
    stop: watch::Receiver<bool>,
    counters: Arc<Counters>,
}

impl QueueConsumer {
    #[instrument(skip(self), fields(worker = self.worker))]
    async fn run(mut self) {
        debug!("starting queue consumer");

        loop {
            if *self.stop.borrow() {
                break;
            }

            tokio::select! {
                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        break;
                    }
                }

                poll = self.queue.poll(self.poll_timeout) => match poll {
                    Poll::Item(data) => self.process(data).await,
                    Poll::Empty => trace!("queue empty"),
                    Poll::Closed => {
                        debug!("queue closed and drained");
                        break;
                    }
                },
            }
        }

        debug!("queue consumer stopped");
    }

    async fn process(&self, data: MonitoringData) {
        if let Err(e) = self.broadcaster.publish(&data).await {
            self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
            warn!(website = data.website.id, "failed to publish update: {e}");
        }

        let alerts = self.evaluator.evaluate_result(&data).await;
        self.counters
            .alerts
            .fetch_add(alerts as u64, Ordering::Relaxed);
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
    }
}

/// A running set of queue consumers
pub struct ConsumerGroup {
    stop: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl ConsumerGroup {
    pub fn spawn(
        workers: usize,
        queue: ResultQueue,
        broadcaster: Arc<Broadcaster>,
        evaluator: Arc<AlertEvaluator>,
        poll_timeout: Duration,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());

        let workers = (0..workers.max(1))
            .map(|worker| {
                let consumer = QueueConsumer {
                    worker,
                    queue: queue.clone(),
                    broadcaster: Arc::clone(&broadcaster),
                    evaluator: Arc::clone(&evaluator),
                    poll_timeout,
                    stop: stop_rx.clone(),
                    counters: Arc::clone(&counters),
                };
                tokio::spawn(consumer.run())
            })
            .collect::<Vec<_>>();

        info!("started {} queue consumers", workers.len());

        Self {
            stop,
            workers,
            counters,
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            workers: self.workers.len(),
            processed: self.counters.processed.load(Ordering::Relaxed),
            publish_failures: self.counters.publish_failures.load(Ordering::Relaxed),
            alerts: self.counters.alerts.load(Ordering::Relaxed),
        }
    }

    /// Wait up to `grace` for the workers to drain a closed queue, then stop them.
    ///
    /// An item being processed when the stop signal arrives is finished first. Returns the
    /// final counters.
    pub async fn shutdown(self, grace: Duration) -> ConsumerStats {
        let workers_len = self.workers.len();
        let Self {
            stop,
            workers,
            counters,
        } = self;

        let all = futures::future::join_all(workers);
        tokio::pin!(all);

        if tokio::time::timeout(grace, &mut all).await.is_err() {
            debug!("consumers did not drain within {grace:?}, stopping them");
            let _ = stop.send(true);
            all.await;
        }

        info!("queue consumers stopped");

        ConsumerStats {
            workers: workers_len,
            processed: counters.processed.load(Ordering::Relaxed),
            publish_failures: counters.publish_failures.load(Ordering::Relaxed),
            alerts: counters.alerts.load(Ordering::Relaxed),
        }
    }
}
