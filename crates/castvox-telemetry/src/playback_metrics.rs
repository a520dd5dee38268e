use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared metrics for cross-task playback monitoring
#[derive(Clone)]
pub struct PlaybackMetrics {
    // Segment lifecycle
    pub segments_started: Arc<AtomicU64>,
    pub first_bytes_latency_ms: Arc<AtomicU64>, // latency of the most recent segment
    pub watchdog_fires: Arc<AtomicU64>,
    pub clean_advances: Arc<AtomicU64>, // natural end-of-stream
    pub error_advances: Arc<AtomicU64>, // mid-stream failure or spawn failure

    // Presence-driven pausing
    pub presence_pauses: Arc<AtomicU64>,
    pub manual_pauses: Arc<AtomicU64>,
    pub resumes: Arc<AtomicU64>,
    pub stale_restarts: Arc<AtomicU64>, // paused past the staleness threshold

    // Connection supervisor
    pub reconnect_attempts: Arc<AtomicU64>,
    pub reconnects: Arc<AtomicU64>,
    pub keepalive_ticks: Arc<AtomicU64>,

    // Stream volume
    pub bytes_streamed: Arc<AtomicU64>,

    // Activity indicators
    pub last_first_bytes: Arc<RwLock<Option<Instant>>>,
}

impl Default for PlaybackMetrics {
    fn default() -> Self {
        Self {
            segments_started: Arc::new(AtomicU64::new(0)),
            first_bytes_latency_ms: Arc::new(AtomicU64::new(0)),
            watchdog_fires: Arc::new(AtomicU64::new(0)),
            clean_advances: Arc::new(AtomicU64::new(0)),
            error_advances: Arc::new(AtomicU64::new(0)),
            presence_pauses: Arc::new(AtomicU64::new(0)),
            manual_pauses: Arc::new(AtomicU64::new(0)),
            resumes: Arc::new(AtomicU64::new(0)),
            stale_restarts: Arc::new(AtomicU64::new(0)),
            reconnect_attempts: Arc::new(AtomicU64::new(0)),
            reconnects: Arc::new(AtomicU64::new(0)),
            keepalive_ticks: Arc::new(AtomicU64::new(0)),
            bytes_streamed: Arc::new(AtomicU64::new(0)),
            last_first_bytes: Arc::new(RwLock::new(None)),
        }
    }
}

impl PlaybackMetrics {
    pub fn record_first_bytes(&self, latency_ms: u64) {
        self.first_bytes_latency_ms
            .store(latency_ms, Ordering::Relaxed);
        *self.last_first_bytes.write() = Some(Instant::now());
    }

    pub fn add_streamed(&self, bytes: u64) {
        self.bytes_streamed.fetch_add(bytes, Ordering::Relaxed);
    }

    /// One-line summary for the periodic stats log.
    pub fn summary(&self) -> String {
        format!(
            "segments={} clean_adv={} err_adv={} watchdog={} pauses={}/{} resumes={} stale={} reconnects={}/{} streamed={}KiB",
            self.segments_started.load(Ordering::Relaxed),
            self.clean_advances.load(Ordering::Relaxed),
            self.error_advances.load(Ordering::Relaxed),
            self.watchdog_fires.load(Ordering::Relaxed),
            self.presence_pauses.load(Ordering::Relaxed),
            self.manual_pauses.load(Ordering::Relaxed),
            self.resumes.load(Ordering::Relaxed),
            self.stale_restarts.load(Ordering::Relaxed),
            self.reconnects.load(Ordering::Relaxed),
            self.reconnect_attempts.load(Ordering::Relaxed),
            self.bytes_streamed.load(Ordering::Relaxed) / 1024,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let m = PlaybackMetrics::default();
        assert_eq!(m.segments_started.load(Ordering::Relaxed), 0);
        assert!(m.last_first_bytes.read().is_none());
    }

    #[test]
    fn record_first_bytes_updates_latency_and_timestamp() {
        let m = PlaybackMetrics::default();
        m.record_first_bytes(1234);
        assert_eq!(m.first_bytes_latency_ms.load(Ordering::Relaxed), 1234);
        assert!(m.last_first_bytes.read().is_some());
    }

    #[test]
    fn summary_mentions_counters() {
        let m = PlaybackMetrics::default();
        m.segments_started.fetch_add(3, Ordering::Relaxed);
        assert!(m.summary().contains("segments=3"));
    }
}
