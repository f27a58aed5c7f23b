//! WebsiteMonitorActor - checks one website on its own schedule
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → MonitorExecutor::monitor → ResultQueue → [Broadcaster, AlertEvaluator]
//!     ↑
//!     └─── Commands (CheckNow, UpdateInterval, Shutdown)
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior, interval};
use tracing::{debug, instrument, warn};

use crate::executor::MonitorExecutor;
use crate::{MonitoringResult, Website};

use super::messages::MonitorCommand;

/// Actor that owns the schedule of a single website
pub struct WebsiteMonitorActor {
    website: Website,
    executor: Arc<MonitorExecutor>,
    command_rx: mpsc::Receiver<MonitorCommand>,
    interval_duration: Duration,
}

fn schedule(period: Duration) -> Interval {
    let mut ticker = interval(period);
    // a check slower than its interval must not cause a burst of catch-up checks
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

impl WebsiteMonitorActor {
    pub fn new(
        website: Website,
        executor: Arc<MonitorExecutor>,
        command_rx: mpsc::Receiver<MonitorCommand>,
    ) -> Self {
        let interval_duration = website.interval();
        Self {
            website,
            executor,
            command_rx,
            interval_duration,
        }
    }

    /// Runs until a Shutdown command arrives or every handle is dropped.
    #[instrument(skip(self), fields(website = self.website.id))]
    pub async fn run(mut self) {
        debug!(
            "starting website monitor for {} every {:?}",
            self.website.display_name(),
            self.interval_duration
        );

        let mut ticker = schedule(self.interval_duration);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.executor.monitor(&self.website).await;
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(MonitorCommand::CheckNow { respond_to }) => {
                        debug!("received CheckNow command");
                        let result = self.executor.monitor(&self.website).await;
                        let _ = respond_to.send(result);
                    }

                    Some(MonitorCommand::UpdateInterval { interval_secs }) => {
                        debug!("updating interval to {interval_secs}s");
                        self.website.monitoring_interval = interval_secs;
                        self.interval_duration = self.website.interval();
                        ticker = schedule(self.interval_duration);
                        // skip the immediate first tick, the next check is one period away
                        ticker.reset();
                    }

                    Some(MonitorCommand::Shutdown) => {
                        debug!("received shutdown command");
                        break;
                    }

                    None => {
                        warn!("every handle dropped, shutting down");
                        break;
                    }
                },
            }
        }

        debug!("website monitor stopped");
    }
}

/// Handle for controlling a WebsiteMonitorActor
#[derive(Clone)]
pub struct WebsiteMonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
    website_id: u64,
}

impl WebsiteMonitorHandle {
    pub fn spawn(website: Website, executor: Arc<MonitorExecutor>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let website_id = website.id;

        let actor = WebsiteMonitorActor::new(website, executor, cmd_rx);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            website_id,
        }
    }

    /// Check right away and wait for the result
    pub async fn check_now(&self) -> Result<MonitoringResult> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::CheckNow { respond_to: tx })
            .await?;

        Ok(rx.await?)
    }

    pub async fn update_interval(&self, interval_secs: u64) -> Result<()> {
        self.sender
            .send(MonitorCommand::UpdateInterval { interval_secs })
            .await?;
        Ok(())
    }

    /// Ask the actor to stop and wait until it has.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(MonitorCommand::Shutdown).await;
        self.sender.closed().await;
    }

    pub fn website_id(&self) -> u64 {
        self.website_id
    }
}
