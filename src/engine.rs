//! Wiring of the monitoring core
//!
//! ```text
//! start:    pool → breaker → queue → broadcaster/evaluator → consumers → monitors
//! shutdown: monitors → queue close → consumers drain → pool
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::actors::consumer::{ConsumerGroup, ConsumerStats};
use crate::actors::website_monitor::WebsiteMonitorHandle;
use crate::alerts::{AlertEvaluator, AlertOptions, AlertStats, NotificationSink};
use crate::breaker::{BreakerOptions, BreakerRegistry, BreakerSnapshot};
use crate::broadcast::{BroadcastOptions, BroadcastStats, Broadcaster};
use crate::config::Config;
use crate::executor::{ExecutorOptions, MONITORING, MonitorExecutor};
use crate::queue::{QueueStats, ResultQueue};
use crate::session::{PoolError, PoolOptions, PoolStats, SessionFactory, SessionPool};

/// How long consumers get to drain the queue on shutdown
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub websites: usize,
    pub pool: PoolStats,
    pub breakers: Vec<BreakerSnapshot>,
    pub queue: QueueStats,
    pub consumers: ConsumerStats,
    pub broadcast: BroadcastStats,
    pub alerts: AlertStats,
}

pub struct Engine {
    pool: SessionPool,
    breakers: Arc<BreakerRegistry>,
    queue: ResultQueue,
    broadcaster: Arc<Broadcaster>,
    evaluator: Arc<AlertEvaluator>,
    executor: Arc<MonitorExecutor>,
    monitors: BTreeMap<u64, WebsiteMonitorHandle>,
    consumers: Mutex<Option<ConsumerGroup>>,
    consumer_stats: Mutex<ConsumerStats>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Create the session pool and start every actor.
    ///
    /// Fails only if the pool cannot be filled.
    #[instrument(skip_all, fields(websites = config.websites.len()))]
    pub async fn start(
        config: &Config,
        factory: Arc<dyn SessionFactory>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, PoolError> {
        let pool = SessionPool::new(PoolOptions::from(&config.pool), factory).await?;
        let breakers = Arc::new(BreakerRegistry::new(BreakerOptions::from(&config.breaker)));
        let queue = ResultQueue::new(config.queue.capacity);
        let broadcaster = Arc::new(Broadcaster::new(BroadcastOptions::from(&config.broadcast)));
        let evaluator = Arc::new(AlertEvaluator::new(AlertOptions::from(&config.alerts), sink));

        let executor = Arc::new(MonitorExecutor::new(
            pool.clone(),
            breakers.get(MONITORING),
            queue.clone(),
            ExecutorOptions::from_config(config),
        ));

        let consumers = ConsumerGroup::spawn(
            config.queue.consumers,
            queue.clone(),
            Arc::clone(&broadcaster),
            Arc::clone(&evaluator),
            config.queue.poll_timeout(),
        );

        let monitors: BTreeMap<_, _> = config
            .active_websites()
            .map(|website| {
                (
                    website.id,
                    WebsiteMonitorHandle::spawn(website.clone(), Arc::clone(&executor)),
                )
            })
            .collect();

        let maintenance = tokio::spawn(maintain(pool.clone(), config.pool.maintenance_interval()));

        info!("monitoring {} websites", monitors.len());

        Ok(Self {
            pool,
            breakers,
            queue,
            broadcaster,
            evaluator,
            executor,
            monitors,
            consumers: Mutex::new(Some(consumers)),
            consumer_stats: Mutex::default(),
            maintenance: Mutex::new(Some(maintenance)),
        })
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn executor(&self) -> &Arc<MonitorExecutor> {
        &self.executor
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    /// Monitor of an active website
    pub fn monitor(&self, website_id: u64) -> Option<&WebsiteMonitorHandle> {
        self.monitors.get(&website_id)
    }

    pub fn stats(&self) -> EngineStats {
        let consumers = match &*self.consumers.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(group) => group.stats(),
            None => self
                .consumer_stats
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        };

        EngineStats {
            websites: self.monitors.len(),
            pool: self.pool.stats(),
            breakers: self.breakers.snapshots(),
            queue: self.queue.stats(),
            consumers,
            broadcast: self.broadcaster.stats(),
            alerts: self.evaluator.stats(),
        }
    }

    /// Stop everything in dependency order. Calling it again does nothing.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let maintenance = self
            .maintenance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(maintenance) = maintenance else {
            return;
        };
        maintenance.abort();

        futures::future::join_all(self.monitors.values().map(|m| m.shutdown())).await;
        debug!("website monitors stopped");

        self.queue.close();
        let consumers = self
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(group) = consumers {
            let last = group.shutdown(DRAIN_GRACE).await;
            *self
                .consumer_stats
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = last;
        }

        self.pool.shutdown().await;
        info!("engine stopped");
    }
}

/// Periodically recreate sessions the pool failed to replace.
async fn maintain(pool: SessionPool, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let added = pool.replenish().await;
        if added > 0 {
            debug!("maintenance restored {added} sessions");
        }
    }
}
