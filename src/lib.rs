pub mod actors;
pub mod alerts;
pub mod api;
pub mod breaker;
pub mod broadcast;
pub mod config;
pub mod discord;
pub mod engine;
pub mod executor;
pub mod queue;
pub mod session;
pub mod util;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A monitored endpoint, as handed to the core by the registry.
///
/// Treated as an immutable snapshot for the duration of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Website {
    pub id: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub url: String,

    /// Check interval in seconds
    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval: u64,

    #[serde(default = "default_active")]
    pub active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

fn default_monitoring_interval() -> u64 {
    60
}

fn default_active() -> bool {
    true
}

impl Website {
    pub fn new(id: u64, url: impl ToString) -> Self {
        Self {
            id,
            name: None,
            url: url.to_string(),
            monitoring_interval: default_monitoring_interval(),
            active: true,
            region: None,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.monitoring_interval.max(1))
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Up,
    Down,
}

/// Outcome of one `monitor` call. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringResult {
    pub website_id: u64,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    pub status: CheckStatus,

    /// Elapsed time of the successful check, 0 for fallback results
    #[serde(rename = "responseTime")]
    pub response_time_millis: u64,

    pub error: Option<String>,
}

impl MonitoringResult {
    pub fn up(website_id: u64, elapsed: Duration) -> Self {
        Self {
            website_id,
            timestamp: Utc::now(),
            status: CheckStatus::Up,
            response_time_millis: elapsed.as_millis() as u64,
            error: None,
        }
    }

    pub fn down(website_id: u64, error: impl ToString) -> Self {
        Self {
            website_id,
            timestamp: Utc::now(),
            status: CheckStatus::Down,
            response_time_millis: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == CheckStatus::Up
    }
}

/// Unit placed on the result queue and published to live subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringData {
    pub website: Website,
    pub result: MonitoringResult,
}

impl MonitoringData {
    pub fn new(website: Website, result: MonitoringResult) -> Self {
        Self { website, result }
    }
}
