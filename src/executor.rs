//! MonitorExecutor - one check of one website, always ending in a result
//!
//! The check capability is wrapped explicitly instead of through annotations:
//!
//! ```text
//! for each attempt:
//!     breaker.try_acquire()  ── open ──► fallback DOWN
//!     pool.acquire(timeout)  ── timed out ──► breaker.failure, fallback DOWN
//!     session.navigate(url)  (timed)
//!         ok            → breaker.success, release, UP
//!         session fault → breaker.failure, discard (replaced in background), retry
//!         other error   → breaker.failure, release, retry
//! retries exhausted ──► fallback DOWN with the last error
//! ```
//!
//! Every result is also offered to the result queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};

use crate::breaker::{CircuitBreaker, CircuitOpen};
use crate::queue::ResultQueue;
use crate::session::{CheckError, PoolError, SessionPool};
use crate::{MonitoringData, MonitoringResult, Website};

/// Operation class the executor reports to
pub const MONITORING: &str = "monitoring";

/// Why a check ended in a DOWN result
#[derive(Debug, Clone, thiserror::Error)]
pub enum MonitorError {
    #[error("no available session within {}s (session pool exhausted)", .0.as_secs())]
    NoAvailableSession(Duration),

    #[error("session pool is shut down")]
    PoolClosed,

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),

    #[error(transparent)]
    Check(#[from] CheckError),
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub acquire_timeout: Duration,

    /// Total attempts per call, including the first
    pub max_attempts: usize,

    pub backoff: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl ExecutorOptions {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            acquire_timeout: config.pool.acquire_timeout(),
            max_attempts: config.retry.max_attempts.max(1),
            backoff: config.retry.backoff(),
        }
    }
}

#[derive(Clone)]
pub struct MonitorExecutor {
    pool: SessionPool,
    breaker: Arc<CircuitBreaker>,
    queue: ResultQueue,
    options: ExecutorOptions,
}

impl MonitorExecutor {
    pub fn new(
        pool: SessionPool,
        breaker: Arc<CircuitBreaker>,
        queue: ResultQueue,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            pool,
            breaker,
            queue,
            options,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Check `website` once (with retries). Never fails; problems become a DOWN result.
    #[instrument(skip(self, website), fields(website = website.id, url = %website.url))]
    pub async fn monitor(&self, website: &Website) -> MonitoringResult {
        let result = match self.execute(website).await {
            Ok(elapsed) => {
                trace!("website up after {elapsed:?}");
                MonitoringResult::up(website.id, elapsed)
            }
            Err(e) => {
                warn!("website check failed: {e}");
                MonitoringResult::down(website.id, e)
            }
        };

        self.queue
            .offer(MonitoringData::new(website.clone(), result.clone()));

        result
    }

    async fn execute(&self, website: &Website) -> Result<Duration, MonitorError> {
        let attempts = self.options.max_attempts.max(1);
        let mut last_error: Option<MonitorError> = None;

        for attempt in 1..=attempts {
            let permit = match self.breaker.try_acquire() {
                Ok(permit) => permit,
                Err(open) => {
                    debug!("breaker rejected attempt {attempt}");
                    return Err(last_error.unwrap_or(open.into()));
                }
            };

            let mut lease = match self.pool.acquire(self.options.acquire_timeout).await {
                Ok(lease) => lease,
                Err(PoolError::TimedOut(waited)) => {
                    self.breaker.record_failure(permit);
                    return Err(MonitorError::NoAvailableSession(waited));
                }
                Err(_) => {
                    self.breaker.record_failure(permit);
                    return Err(MonitorError::PoolClosed);
                }
            };

            let start = Instant::now();
            let outcome = lease.navigate(&website.url).await;
            let elapsed = start.elapsed();

            match outcome {
                Ok(()) => {
                    self.breaker.record_success(permit);
                    lease.release().await;
                    return Ok(elapsed);
                }
                Err(e) => {
                    self.breaker.record_failure(permit);
                    if e.is_session_fault() {
                        lease.discard();
                    } else {
                        lease.release().await;
                    }

                    debug!("attempt {attempt}/{attempts} failed: {e}");
                    last_error = Some(e.into());
                }
            }

            if attempt < attempts && !self.options.backoff.is_zero() {
                tokio::time::sleep(self.options.backoff).await;
            }
        }

        Err(last_error.unwrap_or(MonitorError::PoolClosed))
    }
}
