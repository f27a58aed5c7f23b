//! Message types for actor communication

use tokio::sync::oneshot;

use crate::MonitoringResult;

/// Commands that can be sent to a WebsiteMonitorActor
#[derive(Debug)]
pub enum MonitorCommand {
    /// Check the website right away, outside of the timer
    CheckNow {
        respond_to: oneshot::Sender<MonitoringResult>,
    },

    /// Change the check interval. The timer restarts from now.
    UpdateInterval { interval_secs: u64 },

    /// Stop after the check currently in flight, if any
    Shutdown,
}
