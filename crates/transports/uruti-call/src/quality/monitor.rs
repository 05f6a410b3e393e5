//! Periodic quality polling task

use crate::session::SessionNegotiator;
use parking_lot::Mutex;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Polls every live link on a fixed interval
///
/// The task holds only a weak reference to the negotiator and exits once it
/// is gone. Dropping the monitor aborts the task.
pub struct QualityMonitor {
    handle: Mutex<Option<JoinHandle<()>>>,
    interval: Duration,
}

impl QualityMonitor {
    pub fn spawn(negotiator: Weak<SessionNegotiator>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(negotiator) = negotiator.upgrade() else {
                    debug!("Negotiator dropped, quality monitor exiting");
                    break;
                };
                negotiator.poll_quality().await;
            }
        });

        info!("Quality monitor started (interval: {:?})", interval);

        Self {
            handle: Mutex::new(Some(handle)),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Abort the polling task; safe to call repeatedly
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            info!("Quality monitor stopped");
        }
    }
}

impl Drop for QualityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let monitor = QualityMonitor::spawn(Weak::new(), Duration::from_millis(10));
        assert!(monitor.is_running());
        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn test_exits_without_negotiator() {
        let monitor = QualityMonitor::spawn(Weak::new(), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!monitor.is_running());
    }
}
