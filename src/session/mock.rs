//! Scriptable sessions for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{CheckError, Session, SessionError, SessionFactory};

#[derive(Debug, Clone, Default)]
pub struct SessionScript {
    /// Simulated page load time
    pub latency: Duration,
    pub fail_reset: bool,
}

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    navigations: AtomicUsize,
    resets: AtomicUsize,
    closed: AtomicUsize,
    next_id: AtomicU64,
    /// Creations still allowed before failing, `usize::MAX` for unlimited
    creates_left: AtomicUsize,
    outcomes: Mutex<VecDeque<Result<(), CheckError>>>,
    hang: AtomicBool,
}

pub struct MockFactory {
    script: SessionScript,
    counters: Arc<Counters>,
}

impl MockFactory {
    pub fn new(script: SessionScript) -> Arc<Self> {
        let counters = Counters {
            creates_left: AtomicUsize::new(usize::MAX),
            ..Default::default()
        };
        Arc::new(Self {
            script,
            counters: Arc::new(counters),
        })
    }

    /// Queue navigation outcomes; once empty, navigations succeed.
    pub fn push_outcomes(&self, outcomes: impl IntoIterator<Item = Result<(), CheckError>>) {
        self.counters.outcomes.lock().unwrap().extend(outcomes);
    }

    pub fn fail_creates_after(&self, successes: usize) {
        self.counters.creates_left.store(successes, Ordering::SeqCst);
    }

    pub fn allow_creates(&self) {
        self.counters.creates_left.store(usize::MAX, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> usize {
        self.counters.navigations.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.counters.resets.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    /// Make every navigation from now on wait forever.
    pub fn hang_navigations(&self) {
        self.counters.hang.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn create(&self) -> Result<Box<dyn Session>, SessionError> {
        let allowed = self
            .counters
            .creates_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                usize::MAX => Some(usize::MAX),
                0 => None,
                n => Some(n - 1),
            });
        if allowed.is_err() {
            return Err(SessionError::Create("browser failed to start".into()));
        }

        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            id: self.counters.next_id.fetch_add(1, Ordering::SeqCst),
            script: self.script.clone(),
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct MockSession {
    id: u64,
    script: SessionScript,
    counters: Arc<Counters>,
}

#[async_trait]
impl Session for MockSession {
    fn id(&self) -> u64 {
        self.id
    }

    async fn navigate(&mut self, _url: &str) -> Result<(), CheckError> {
        self.counters.navigations.fetch_add(1, Ordering::SeqCst);
        if self.counters.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.script.latency.is_zero() {
            tokio::time::sleep(self.script.latency).await;
        }
        let outcome = self.counters.outcomes.lock().unwrap().pop_front();
        outcome.unwrap_or(Ok(()))
    }

    async fn reset(&mut self) -> Result<(), SessionError> {
        self.counters.resets.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_reset {
            return Err(SessionError::Reset("cookies could not be cleared".into()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Executor over a fresh pool of mock sessions, without retry backoff
pub async fn executor(
    factory: Arc<MockFactory>,
    capacity: usize,
) -> (
    crate::executor::MonitorExecutor,
    super::SessionPool,
    crate::queue::ResultQueue,
) {
    use crate::breaker::{BreakerOptions, CircuitBreaker};
    use crate::executor::{ExecutorOptions, MONITORING, MonitorExecutor};

    let pool = super::SessionPool::new(
        super::PoolOptions {
            capacity,
            replace_attempts: 1,
            replace_backoff: Duration::from_millis(1),
        },
        factory,
    )
    .await
    .unwrap();
    let queue = crate::queue::ResultQueue::new(64);
    let executor = MonitorExecutor::new(
        pool.clone(),
        Arc::new(CircuitBreaker::new(MONITORING, BreakerOptions::default())),
        queue.clone(),
        ExecutorOptions {
            acquire_timeout: Duration::from_secs(1),
            max_attempts: 1,
            backoff: Duration::ZERO,
        },
    );

    (executor, pool, queue)
}
