//! Fixed-capacity session pool
//!
//! The free set is guarded by a mutex that is only held for a push or a pop. A semaphore
//! whose permit count mirrors the free set length is what acquirers actually wait on, so
//! waiting never holds the lock.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, trace, warn};

use super::{Session, SessionError, SessionFactory};

#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("no session became available within {0:?}")]
    TimedOut(Duration),

    #[error("session pool is shut down")]
    Closed,

    #[error(transparent)]
    Create(#[from] SessionError),
}

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub capacity: usize,

    /// Attempts made to create a replacement for a discarded session
    pub replace_attempts: usize,

    pub replace_backoff: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            capacity: 20,
            replace_attempts: 3,
            replace_backoff: Duration::from_secs(1),
        }
    }
}

impl From<&crate::config::PoolConfig> for PoolOptions {
    fn from(config: &crate::config::PoolConfig) -> Self {
        Self {
            capacity: config.capacity,
            replace_attempts: config.replace_attempts,
            replace_backoff: config.replace_backoff(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
    pub checked_out: usize,

    /// Replacements currently being created
    pub replacing: usize,

    /// Sessions lost because every replacement attempt failed
    pub deficit: usize,

    pub created: u64,
    pub discarded: u64,
    pub closed: bool,
}

struct Shared {
    options: PoolOptions,
    factory: Arc<dyn SessionFactory>,
    free: Mutex<VecDeque<Box<dyn Session>>>,
    available: Semaphore,
    checked_out: AtomicUsize,
    replacing: AtomicUsize,
    deficit: AtomicUsize,
    created: AtomicU64,
    discarded: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn free(&self) -> MutexGuard<'_, VecDeque<Box<dyn Session>>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Put a healthy session into the free set and wake one acquirer.
    fn push_free(&self, session: Box<dyn Session>) {
        self.free().push_back(session);
        self.available.add_permits(1);
    }

    async fn check_in(self: &Arc<Self>, mut session: Box<dyn Session>) {
        self.checked_out.fetch_sub(1, Ordering::AcqRel);

        if self.is_closed() {
            close_session(session.as_mut()).await;
            return;
        }

        match session.reset().await {
            Ok(()) => {
                trace!(session = session.id(), "session returned to pool");
                self.push_free(session);
            }
            Err(e) => {
                warn!(session = session.id(), "reset failed, replacing session: {e}");
                self.schedule_replacement(session);
            }
        }
    }

    fn discard(self: &Arc<Self>, session: Box<dyn Session>) {
        self.checked_out.fetch_sub(1, Ordering::AcqRel);
        debug!(session = session.id(), "discarding session");
        self.schedule_replacement(session);
    }

    /// Close `old` and create its replacement off the caller's path.
    fn schedule_replacement(self: &Arc<Self>, mut old: Box<dyn Session>) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        self.replacing.fetch_add(1, Ordering::AcqRel);

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            close_session(old.as_mut()).await;
            drop(old);

            if shared.is_closed() {
                shared.replacing.fetch_sub(1, Ordering::AcqRel);
                return;
            }

            let replacement = shared.create_with_retries().await;
            shared.replacing.fetch_sub(1, Ordering::AcqRel);

            match replacement {
                Some(session) => shared.admit(session).await,
                None => {
                    shared.deficit.fetch_add(1, Ordering::AcqRel);
                    error!("pool is running below capacity after failed session replacement");
                }
            }
        });
    }

    async fn create_with_retries(&self) -> Option<Box<dyn Session>> {
        let attempts = self.options.replace_attempts.max(1);

        for attempt in 1..=attempts {
            match self.factory.create().await {
                Ok(session) => {
                    self.created.fetch_add(1, Ordering::Relaxed);
                    return Some(session);
                }
                Err(e) => {
                    error!("replacement attempt {attempt}/{attempts} failed: {e}");
                    if attempt < attempts {
                        tokio::time::sleep(self.options.replace_backoff).await;
                    }
                }
            }
        }

        None
    }

    /// Add a freshly created session, unless the pool closed in the meantime.
    async fn admit(&self, mut session: Box<dyn Session>) {
        if self.is_closed() {
            close_session(session.as_mut()).await;
        } else {
            self.push_free(session);
        }
    }
}

async fn close_session(session: &mut dyn Session) {
    if let Err(e) = session.close().await {
        error!(session = session.id(), "error closing session: {e}");
    }
}

/// Pool of `capacity` sessions created up front.
///
/// Cloning is cheap and yields another handle to the same pool.
#[derive(Clone)]
pub struct SessionPool {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("stats", &self.stats())
            .finish()
    }
}

impl SessionPool {
    /// Create the pool and all of its sessions.
    ///
    /// Fails if any session cannot be created; sessions created until then are closed.
    #[instrument(skip(factory), fields(capacity = options.capacity))]
    pub async fn new(
        options: PoolOptions,
        factory: Arc<dyn SessionFactory>,
    ) -> Result<Self, PoolError> {
        let mut sessions: VecDeque<Box<dyn Session>> = VecDeque::with_capacity(options.capacity);

        for _ in 0..options.capacity {
            match factory.create().await {
                Ok(session) => sessions.push_back(session),
                Err(e) => {
                    error!("failed to initialize session pool: {e}");
                    for mut session in sessions {
                        close_session(session.as_mut()).await;
                    }
                    return Err(e.into());
                }
            }
        }

        info!("initialized session pool with {} sessions", options.capacity);

        let created = sessions.len() as u64;
        let permits = sessions.len();

        Ok(Self {
            shared: Arc::new(Shared {
                options,
                factory,
                free: Mutex::new(sessions),
                available: Semaphore::new(permits),
                checked_out: AtomicUsize::new(0),
                replacing: AtomicUsize::new(0),
                deficit: AtomicUsize::new(0),
                created: AtomicU64::new(created),
                discarded: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.shared.options.capacity
    }

    /// Borrow a session, waiting at most `timeout` for one to become free.
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledSession, PoolError> {
        let permit = match tokio::time::timeout(timeout, self.shared.available.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                debug!("no session available within {timeout:?}");
                return Err(PoolError::TimedOut(timeout));
            }
        };
        permit.forget();

        let Some(session) = self.shared.free().pop_front() else {
            // shutdown drained the free set between the permit and the pop
            return Err(PoolError::Closed);
        };
        self.shared.checked_out.fetch_add(1, Ordering::AcqRel);

        trace!(session = session.id(), "session checked out");

        Ok(PooledSession {
            session: Some(session),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Reset the session and return it to the free set.
    pub async fn release(&self, lease: PooledSession) {
        lease.release().await;
    }

    /// Throw the session away and replace it in the background.
    pub fn discard(&self, lease: PooledSession) {
        lease.discard();
    }

    /// Recreate sessions lost to failed replacements. Returns how many were added.
    pub async fn replenish(&self) -> usize {
        let mut added = 0;

        while !self.shared.is_closed() {
            let claimed = self
                .shared
                .deficit
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1));
            if claimed.is_err() {
                break;
            }

            match self.shared.factory.create().await {
                Ok(session) => {
                    self.shared.created.fetch_add(1, Ordering::Relaxed);
                    self.shared.admit(session).await;
                    added += 1;
                }
                Err(e) => {
                    self.shared.deficit.fetch_add(1, Ordering::AcqRel);
                    warn!("failed to replenish session pool: {e}");
                    break;
                }
            }
        }

        if added > 0 {
            info!("replenished {added} sessions");
        }

        added
    }

    /// Close every idle session and refuse further acquires.
    ///
    /// Leased sessions are closed when their holders hand them back.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.available.close();

        let drained: Vec<_> = self.shared.free().drain(..).collect();
        let count = drained.len();
        for mut session in drained {
            close_session(session.as_mut()).await;
        }

        info!("session pool shut down, closed {count} idle sessions");
    }

    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        PoolStats {
            capacity: shared.options.capacity,
            available: shared.free().len(),
            checked_out: shared.checked_out.load(Ordering::Acquire),
            replacing: shared.replacing.load(Ordering::Acquire),
            deficit: shared.deficit.load(Ordering::Acquire),
            created: shared.created.load(Ordering::Relaxed),
            discarded: shared.discarded.load(Ordering::Relaxed),
            closed: shared.is_closed(),
        }
    }
}

/// A borrowed session.
///
/// Hand it back with [`release`](Self::release) or [`discard`](Self::discard). A lease that
/// is dropped without either (early return, panic) is released from a background task.
pub struct PooledSession {
    session: Option<Box<dyn Session>>,
    shared: Arc<Shared>,
}

impl PooledSession {
    pub async fn release(mut self) {
        if let Some(session) = self.session.take() {
            self.shared.check_in(session).await;
        }
    }

    pub fn discard(mut self) {
        if let Some(session) = self.session.take() {
            self.shared.discard(session);
        }
    }
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("session", &self.session.as_ref().map(|s| s.id()))
            .finish()
    }
}

impl Deref for PooledSession {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        // only `release`/`discard`/`drop` take the session, and all of them consume the lease
        self.session.as_deref().expect("lease holds a session until consumed")
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
            .as_deref_mut()
            .expect("lease holds a session until consumed")
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(session = session.id(), "lease dropped without release");
                let shared = Arc::clone(&self.shared);
                handle.spawn(async move { shared.check_in(session).await });
            }
            Err(_) => {
                // no runtime to reset on; count it as lost so replenish can recover it
                self.shared.checked_out.fetch_sub(1, Ordering::AcqRel);
                self.shared.deficit.fetch_add(1, Ordering::AcqRel);
                error!("lease dropped outside of a runtime, session lost");
            }
        }
    }
}
