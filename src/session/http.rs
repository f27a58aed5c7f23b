//! HTTP-backed session
//!
//! Each session owns its own `reqwest::Client` (connection pool, TLS state) and its own
//! cookie store. `reset` swaps in an empty cookie jar, which is the equivalent of clearing
//! a browser's cookies between checks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use tracing::{instrument, trace};

use super::{CheckError, Session, SessionError, SessionFactory};

/// Cookie store whose contents can be dropped in one go
#[derive(Default)]
struct ResettableJar {
    inner: RwLock<Jar>,
}

impl ResettableJar {
    fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Jar::default();
    }
}

impl CookieStore for ResettableJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .set_cookies(cookie_headers, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .cookies(url)
    }
}

pub struct HttpSession {
    id: u64,
    client: Option<reqwest::Client>,
    jar: Arc<ResettableJar>,
    page_load_timeout: Duration,
}

#[async_trait]
impl Session for HttpSession {
    fn id(&self) -> u64 {
        self.id
    }

    #[instrument(skip(self), fields(session = self.id))]
    async fn navigate(&mut self, url: &str) -> Result<(), CheckError> {
        let Some(client) = &self.client else {
            return Err(CheckError::SessionLost("session is closed".into()));
        };

        trace!("loading page");

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CheckError::Status(status.as_u16()));
        }

        // a page counts as loaded once its body has fully arrived
        response.bytes().await.map_err(|e| self.classify(e))?;

        Ok(())
    }

    async fn reset(&mut self) -> Result<(), SessionError> {
        if self.client.is_none() {
            return Err(SessionError::Reset("session is closed".into()));
        }
        self.jar.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.client = None;
        self.jar.clear();
        Ok(())
    }
}

impl HttpSession {
    fn classify(&self, error: reqwest::Error) -> CheckError {
        if error.is_timeout() {
            CheckError::Timeout(self.page_load_timeout)
        } else if error.is_builder() {
            CheckError::Navigation(format!("invalid url: {error}"))
        } else {
            CheckError::Navigation(error.to_string())
        }
    }
}

/// Creates [`HttpSession`]s with the configured timeouts
pub struct HttpSessionFactory {
    page_load_timeout: Duration,
    connect_timeout: Duration,
    next_id: AtomicU64,
}

impl HttpSessionFactory {
    pub fn new(page_load_timeout: Duration, connect_timeout: Duration) -> Self {
        Self {
            page_load_timeout,
            connect_timeout,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &crate::config::PoolConfig) -> Self {
        Self::new(config.page_load_timeout(), config.implicit_wait())
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn create(&self) -> Result<Box<dyn Session>, SessionError> {
        let jar = Arc::new(ResettableJar::default());

        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(self.page_load_timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(concat!("webwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SessionError::Create(e.to_string()))?;

        Ok(Box::new(HttpSession {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            client: Some(client),
            jar,
            page_load_timeout: self.page_load_timeout,
        }))
    }
}
