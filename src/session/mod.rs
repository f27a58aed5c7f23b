//! Execution sessions and the pool that owns them
//!
//! A session is an expensive, stateful handle (think: one browser instance) that can
//! load a URL. Sessions are created by a [`SessionFactory`], owned by the
//! [`SessionPool`](pool::SessionPool), and only ever lent out through a
//! [`PooledSession`](pool::PooledSession) lease.
//!
//! ```text
//!   acquire(timeout) ──► PooledSession ──► navigate(url)
//!        ▲                    │
//!        │          release() │ discard()
//!        │      reset ok      ▼      reset failed / compromised
//!   free set ◄──────────── pool ────────► close + background replacement
//! ```

pub mod http;
pub mod pool;

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use async_trait::async_trait;

pub use http::{HttpSession, HttpSessionFactory};
pub use pool::{PoolError, PoolOptions, PoolStats, PooledSession, SessionPool};

/// Errors raised while creating, resetting or closing a session
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("failed to create session: {0}")]
    Create(String),

    #[error("failed to reset session: {0}")]
    Reset(String),

    #[error("failed to close session: {0}")]
    Close(String),
}

/// Errors raised by the check capability itself
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    /// The endpoint could not be loaded; the session itself is fine
    #[error("{0}")]
    Navigation(String),

    #[error("page load timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status code: {0}")]
    Status(u16),

    /// The session is unusable and must not go back into the pool
    #[error("session compromised: {0}")]
    SessionLost(String),
}

impl CheckError {
    pub fn is_session_fault(&self) -> bool {
        matches!(self, CheckError::SessionLost(_))
    }
}

#[async_trait]
pub trait Session: Send {
    /// Identifier used in logs
    fn id(&self) -> u64;

    /// Load `url` and wait until it has fully arrived.
    async fn navigate(&mut self, url: &str) -> Result<(), CheckError>;

    /// Clear transient state (cookies, navigation state) so the next borrower starts clean.
    async fn reset(&mut self) -> Result<(), SessionError>;

    async fn close(&mut self) -> Result<(), SessionError>;
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn Session>, SessionError>;
}
