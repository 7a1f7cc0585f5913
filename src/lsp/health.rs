//! Periodic connection health checks
//!
//! Catches sockets that died silently: the session object may still look
//! usable while the byte stream underneath is gone.

use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::client::ClientInner;

/// Shortest period the monitor will tick at
pub const MIN_HEALTH_INTERVAL: Duration = Duration::from_millis(1);

/// Runs a check on a fixed interval until stopped or the check breaks
pub struct HealthMonitor {
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Start ticking. The first check runs one full `interval` after start.
    /// Intervals below [`MIN_HEALTH_INTERVAL`] are raised to it.
    pub fn start<F>(interval: Duration, mut check: F) -> Self
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let interval = interval.max(MIN_HEALTH_INTERVAL);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // consume the immediate first tick

            loop {
                ticker.tick().await;
                if check().is_break() {
                    break;
                }
            }
        });

        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl ClientInner {
    /// Start a monitor bound to this client. Holds only a weak reference.
    pub(crate) fn spawn_health_monitor(self: &Arc<Self>) -> HealthMonitor {
        let weak: Weak<ClientInner> = Arc::downgrade(self);
        HealthMonitor::start(self.config.health_check_interval, move || {
            match weak.upgrade() {
                Some(client) => client.health_tick(),
                None => ControlFlow::Break(()),
            }
        })
    }

    /// One health check. Breaks once the client is destroyed.
    pub(crate) fn health_tick(self: &Arc<Self>) -> ControlFlow<()> {
        if self.is_destroyed() {
            return ControlFlow::Break(());
        }

        let session = self.current_session();
        if !self.is_valid(session.as_ref()) {
            // The oracle already kicked recovery if there was something to recover
            return ControlFlow::Continue(());
        }

        let socket_open = session
            .as_ref()
            .map(|s| s.socket().is_open())
            .unwrap_or(false);
        if !socket_open {
            warn!("health check found socket not open; forcing reconnect");
            self.force_reconnect();
        } else {
            debug!("health check ok");
        }

        ControlFlow::Continue(())
    }
}
