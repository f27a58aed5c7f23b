use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, instrument, trace, warn};

use crate::config::{Alert, AlertConfig};
use crate::discord::DiscordSink;
use crate::{CheckStatus, MonitoringData, Website};

/// A named measurement with the threshold it is judged against
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub id: String,

    /// Website the metric was derived from, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_id: Option<u64>,

    pub value: f64,
    pub threshold: f64,
}

impl Metric {
    pub fn new(id: impl ToString, value: f64, threshold: f64) -> Self {
        Self {
            id: id.to_string(),
            website_id: None,
            value,
            threshold,
        }
    }

    fn for_website(mut self, website_id: u64) -> Self {
        self.website_id = Some(website_id);
        self
    }

    pub fn response_time(website_id: u64, millis: u64, threshold_ms: u64) -> Self {
        Self::new(
            format!("website:{website_id}:response_time"),
            millis as f64,
            threshold_ms as f64,
        )
        .for_website(website_id)
    }

    pub fn availability(website_id: u64, status: CheckStatus) -> Self {
        let value = match status {
            CheckStatus::Up => 0.0,
            CheckStatus::Down => 1.0,
        };
        Self::new(format!("website:{website_id}:availability"), value, 0.0)
            .for_website(website_id)
    }
}

/// What a sink receives for a metric over its threshold
#[derive(Debug, Clone, Serialize)]
pub struct AlertNotification {
    pub metric: Metric,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<Website>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl AlertNotification {
    pub fn subject(&self) -> String {
        match (&self.website, self.metric.website_id) {
            (Some(website), _) => website.display_name().to_string(),
            (None, Some(id)) => format!("website {id}"),
            (None, None) => self.metric.id.clone(),
        }
    }

    pub fn message(&self) -> String {
        let subject = self.subject();
        if self.metric.id.ends_with(":availability") {
            match &self.error {
                Some(err) => format!("🔴 **Website DOWN**: `{subject}` is unreachable ({err})"),
                None => format!("🔴 **Website DOWN**: `{subject}` is unreachable"),
            }
        } else {
            format!(
                "⚠️ **Threshold exceeded**: `{subject}` {} is **{}** (threshold: {})",
                self.metric.id, self.metric.value, self.metric.threshold
            )
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to deliver alert: {0}")]
    Http(#[from] reqwest::Error),

    #[error("alert endpoint responded with status {0}")]
    Status(u16),

    #[error("alert dispatch timed out after {0:?}")]
    TimedOut(Duration),
}

/// Outbound notification channel
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn dispatch(&self, notification: &AlertNotification) -> Result<(), DispatchError>;
}

/// Writes alerts to the log and nowhere else
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn dispatch(&self, notification: &AlertNotification) -> Result<(), DispatchError> {
        warn!(
            metric = %notification.metric.id,
            value = notification.metric.value,
            threshold = notification.metric.threshold,
            "{}",
            notification.message()
        );
        Ok(())
    }
}

/// POSTs a JSON document per alert to a generic webhook
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl ToString) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    #[instrument(skip_all, fields(metric = %notification.metric.id))]
    async fn dispatch(&self, notification: &AlertNotification) -> Result<(), DispatchError> {
        let payload = json!({
            "message": notification.message(),
            "metric": notification.metric.id,
            "value": notification.metric.value,
            "threshold": notification.metric.threshold,
            "website": notification
                .website
                .as_ref()
                .map(|w| w.id)
                .or(notification.metric.website_id),
            "url": notification.website.as_ref().map(|w| w.url.as_str()),
            "error": notification.error,
            "timestamp": notification.timestamp.to_rfc3339(),
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(DispatchError::Status(response.status().as_u16()));
        }

        info!("Successfully sent webhook alert");
        Ok(())
    }
}

/// Build the sink selected in the configuration, falling back to [`LogSink`].
pub fn sink_from_config(alert: Option<&Alert>) -> Arc<dyn NotificationSink> {
    match alert {
        Some(Alert::Discord(discord)) => Arc::new(DiscordSink::new(discord.clone())),
        Some(Alert::Webhook(webhook)) => Arc::new(WebhookSink::new(&webhook.url)),
        None => Arc::new(LogSink),
    }
}

#[derive(Debug, Clone)]
pub struct AlertOptions {
    pub response_time_threshold_ms: Option<u64>,
    pub alert_on_down: bool,
    pub concurrency: usize,

    /// Upper bound for one sink dispatch
    pub dispatch_timeout: Duration,
}

impl Default for AlertOptions {
    fn default() -> Self {
        Self {
            response_time_threshold_ms: None,
            alert_on_down: true,
            concurrency: 8,
            dispatch_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&AlertConfig> for AlertOptions {
    fn from(config: &AlertConfig) -> Self {
        Self {
            response_time_threshold_ms: config.response_time_threshold_ms,
            alert_on_down: config.alert_on_down,
            concurrency: config.concurrency,
            dispatch_timeout: config.dispatch_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertStats {
    pub evaluated: u64,
    pub alerts: u64,
    pub dispatch_failures: u64,
}

#[derive(Default)]
struct Counters {
    evaluated: AtomicU64,
    alerts: AtomicU64,
    dispatch_failures: AtomicU64,
}

pub struct AlertEvaluator {
    options: AlertOptions,
    sink: Arc<dyn NotificationSink>,
    counters: Counters,
}

impl AlertEvaluator {
    pub fn new(options: AlertOptions, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            options,
            sink,
            counters: Counters::default(),
        }
    }

    /// The alert rule: strictly above threshold.
    pub fn is_alerting(metric: &Metric) -> bool {
        metric.value > metric.threshold
    }

    /// Evaluate one metric, notifying the sink if it alerts.
    pub async fn evaluate(&self, metric: &Metric) -> bool {
        self.evaluate_in_context(metric, None, None).await
    }

    /// Evaluate every metric independently with bounded parallelism. Output keeps input order.
    pub async fn evaluate_batch(&self, metrics: Vec<Metric>) -> Vec<(Metric, bool)> {
        let evaluations: Vec<_> = metrics
            .into_iter()
            .map(|metric| async move {
                let alerting = self.evaluate(&metric).await;
                (metric, alerting)
            })
            .collect();

        stream::iter(evaluations)
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await
    }

    /// Metrics derived from one monitoring result.
    pub fn metrics_for(&self, data: &MonitoringData) -> Vec<Metric> {
        let result = &data.result;
        let mut metrics = Vec::with_capacity(2);

        if let Some(threshold) = self.options.response_time_threshold_ms
            && result.is_up()
        {
            metrics.push(Metric::response_time(
                result.website_id,
                result.response_time_millis,
                threshold,
            ));
        }

        if self.options.alert_on_down {
            metrics.push(Metric::availability(result.website_id, result.status));
        }

        metrics
    }

    /// Evaluate the metrics of one result. Returns how many alerted.
    #[instrument(skip_all, fields(website = data.website.id))]
    pub async fn evaluate_result(&self, data: &MonitoringData) -> usize {
        let metrics = self.metrics_for(data);

        let evaluations: Vec<_> = metrics
            .iter()
            .map(|metric| {
                self.evaluate_in_context(metric, Some(&data.website), data.result.error.as_deref())
            })
            .collect();

        let alerting: Vec<bool> = stream::iter(evaluations)
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;

        alerting.into_iter().filter(|alerting| *alerting).count()
    }

    async fn evaluate_in_context(
        &self,
        metric: &Metric,
        website: Option<&Website>,
        error: Option<&str>,
    ) -> bool {
        self.counters.evaluated.fetch_add(1, Ordering::Relaxed);

        if !Self::is_alerting(metric) {
            trace!(metric = %metric.id, "within threshold");
            return false;
        }
        self.counters.alerts.fetch_add(1, Ordering::Relaxed);

        let notification = AlertNotification {
            metric: metric.clone(),
            website: website.cloned(),
            error: error.map(str::to_string),
            timestamp: Utc::now(),
        };

        let timeout = self.options.dispatch_timeout;
        let dispatched = tokio::time::timeout(timeout, self.sink.dispatch(&notification))
            .await
            .unwrap_or(Err(DispatchError::TimedOut(timeout)));

        if let Err(e) = dispatched {
            self.counters.dispatch_failures.fetch_add(1, Ordering::Relaxed);
            error!(metric = %metric.id, "failed to dispatch alert: {e}");
        }

        true
    }

    pub fn stats(&self) -> AlertStats {
        AlertStats {
            evaluated: self.counters.evaluated.load(Ordering::Relaxed),
            alerts: self.counters.alerts.load(Ordering::Relaxed),
            dispatch_failures: self.counters.dispatch_failures.load(Ordering::Relaxed),
        }
    }
}
