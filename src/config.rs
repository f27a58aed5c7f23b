use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tracing::trace;

use crate::Website;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub websites: Vec<Website>,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub broadcast: BroadcastConfig,

    #[serde(default)]
    pub alerts: AlertConfig,

    #[serde(default)]
    pub api: ApiSettings,
}

impl Config {
    pub fn active_websites(&self) -> impl Iterator<Item = &Website> {
        self.websites.iter().filter(|website| website.active)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.capacity == 0 {
            return Err(ConfigError::Invalid("pool.capacity must be at least 1".into()));
        }
        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid("queue.capacity must be at least 1".into()));
        }
        if self.queue.consumers == 0 {
            return Err(ConfigError::Invalid("queue.consumers must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker.failure_threshold must be at least 1".into(),
            ));
        }

        let mut ids = std::collections::HashSet::new();
        for website in &self.websites {
            if !ids.insert(website.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate website id {}",
                    website.id
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_pool_capacity")]
    pub capacity: usize,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    #[serde(default = "default_page_load_timeout_secs")]
    pub page_load_timeout_secs: u64,

    /// Connect timeout of the HTTP session
    #[serde(default = "default_implicit_wait_secs")]
    pub implicit_wait_secs: u64,

    #[serde(default = "default_replace_attempts")]
    pub replace_attempts: usize,

    #[serde(default = "default_replace_backoff_ms")]
    pub replace_backoff_ms: u64,

    /// How often the hub tries to recreate sessions lost to failed replacements
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_pool_capacity(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            page_load_timeout_secs: default_page_load_timeout_secs(),
            implicit_wait_secs: default_implicit_wait_secs(),
            replace_attempts: default_replace_attempts(),
            replace_backoff_ms: default_replace_backoff_ms(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    pub fn implicit_wait(&self) -> Duration {
        Duration::from_secs(self.implicit_wait_secs)
    }

    pub fn replace_backoff(&self) -> Duration {
        Duration::from_millis(self.replace_backoff_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs.max(1))
    }
}

fn default_pool_capacity() -> usize {
    20
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_page_load_timeout_secs() -> u64 {
    30
}

fn default_implicit_wait_secs() -> u64 {
    10
}

fn default_replace_attempts() -> usize {
    3
}

fn default_replace_backoff_ms() -> u64 {
    1000
}

fn default_maintenance_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RetryConfig {
    /// Total attempts per `monitor` call, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

fn default_max_attempts() -> usize {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_cool_down_secs")]
    pub cool_down_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_secs: default_window_secs(),
            cool_down_secs: default_cool_down_secs(),
        }
    }
}

impl BreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cool_down(&self) -> Duration {
        Duration::from_secs(self.cool_down_secs)
    }
}

fn default_failure_threshold() -> usize {
    5
}

fn default_window_secs() -> u64 {
    60
}

fn default_cool_down_secs() -> u64 {
    30
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    #[serde(default = "default_consumers")]
    pub consumers: usize,

    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            consumers: default_consumers(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl QueueConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_consumers() -> usize {
    5
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_fanout_concurrency")]
    pub fanout_concurrency: usize,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Outgoing frames buffered per websocket subscriber
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            fanout_concurrency: default_fanout_concurrency(),
            send_timeout_ms: default_send_timeout_ms(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl BroadcastConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

fn default_fanout_concurrency() -> usize {
    16
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_subscriber_buffer() -> usize {
    64
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AlertConfig {
    /// Alert when an UP check took longer than this
    pub response_time_threshold_ms: Option<u64>,

    #[serde(default = "default_alert_on_down")]
    pub alert_on_down: bool,

    #[serde(default = "default_alert_concurrency")]
    pub concurrency: usize,

    /// A sink that takes longer than this counts as a failed dispatch
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,

    /// Where notifications go, logged only if absent
    pub sink: Option<Alert>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            response_time_threshold_ms: None,
            alert_on_down: default_alert_on_down(),
            concurrency: default_alert_concurrency(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            sink: None,
        }
    }
}

impl AlertConfig {
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

fn default_alert_on_down() -> bool {
    true
}

fn default_alert_concurrency() -> usize {
    8
}

fn default_dispatch_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alert {
    Discord(Discord),
    Webhook(Webhook),
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            enable_cors: default_enable_cors(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_enable_cors() -> bool {
    true
}

pub fn read_config_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
