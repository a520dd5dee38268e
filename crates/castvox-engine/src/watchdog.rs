//! Startup watchdog: a single-shot timer guarding pipeline startup latency.
//!
//! Armed when a segment spawn begins, disarmed on first bytes or any segment
//! teardown. The fired event carries the owning segment's generation, so a
//! late fire into a newer segment is ignored by the controller.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::events::EngineEvent;

pub struct StartupWatchdog {
    timeout: Duration,
    handle: Option<AbortHandle>,
}

impl StartupWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            handle: None,
        }
    }

    /// Arm for `segment`. Re-arming disarms the previous timer first.
    pub fn arm(&mut self, segment: u64, events: mpsc::Sender<EngineEvent>) {
        self.disarm();
        let timeout = self.timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(EngineEvent::Watchdog { segment }).await;
        });
        self.handle = Some(handle.abort_handle());
    }

    pub fn disarm(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for StartupWatchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}
