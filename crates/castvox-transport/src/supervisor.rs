//! Connection supervisor: owns the voice session lifecycle.
//!
//! Establishes the session once (bounded attempts, fatal on exhaustion),
//! exposes a reconnect-stable audio sink, forwards transport events upward,
//! and recovers from disconnects: in-place resume within a grace window
//! first, then a full rejoin after a fixed delay. A low-frequency keep-alive
//! tick refreshes the network path while idle and swallows its own failures.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use castvox_foundation::TransportError;
use castvox_telemetry::PlaybackMetrics;

use crate::{TransportEvent, VoiceSession, VoiceTransport};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Attempts for the initial session; exhaustion is fatal to the process.
    pub connect_attempts: u32,
    pub connect_retry_delay: Duration,
    /// Window for in-place resume before falling back to a full rejoin.
    pub resume_grace: Duration,
    /// Fixed delay between rejoin attempts (plus a little jitter).
    pub rejoin_delay: Duration,
    pub keepalive_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 5,
            connect_retry_delay: Duration::from_secs(2),
            resume_grace: Duration::from_secs(5),
            rejoin_delay: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(60),
        }
    }
}

pub struct ConnectionSupervisor;

pub struct SupervisorHandle {
    audio_tx: mpsc::Sender<Bytes>,
    events_rx: Option<mpsc::Receiver<TransportEvent>>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Reconnect-stable audio sink: bytes written here reach whichever
    /// session is currently live.
    pub fn audio_sink(&self) -> mpsc::Sender<Bytes> {
        self.audio_tx.clone()
    }

    /// Take the forwarded transport event stream (membership changes).
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.take()
    }

    /// Close the session and stop the supervision loop.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

impl ConnectionSupervisor {
    /// Establish the initial session and start the supervision loop.
    pub async fn start(
        transport: Arc<dyn VoiceTransport>,
        config: SupervisorConfig,
        metrics: Arc<PlaybackMetrics>,
    ) -> Result<SupervisorHandle, TransportError> {
        let session = Self::connect_initial(&transport, &config).await?;

        let (audio_tx, audio_rx) = mpsc::channel::<Bytes>(64);
        let (events_tx, events_rx) = mpsc::channel::<TransportEvent>(64);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(run_loop(
            session,
            transport,
            config,
            metrics,
            audio_rx,
            events_tx,
            shutdown_rx,
        ));

        Ok(SupervisorHandle {
            audio_tx,
            events_rx: Some(events_rx),
            shutdown_tx,
            task,
        })
    }

    async fn connect_initial(
        transport: &Arc<dyn VoiceTransport>,
        config: &SupervisorConfig,
    ) -> Result<Box<dyn VoiceSession>, TransportError> {
        let mut last_error = None;
        for attempt in 1..=config.connect_attempts {
            match transport.connect().await {
                Ok(session) => {
                    info!(attempt, "Voice session established");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max = config.connect_attempts,
                        "Initial connect failed: {}", e
                    );
                    last_error = Some(e);
                    tokio::time::sleep(with_jitter(config.connect_retry_delay)).await;
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| TransportError::ConnectFailed("no attempts configured".into())))
    }
}

fn with_jitter(delay: Duration) -> Duration {
    delay + Duration::from_millis(fastrand::u64(0..=500))
}

async fn run_loop(
    mut session: Box<dyn VoiceSession>,
    transport: Arc<dyn VoiceTransport>,
    config: SupervisorConfig,
    metrics: Arc<PlaybackMetrics>,
    mut audio_rx: mpsc::Receiver<Bytes>,
    events_tx: mpsc::Sender<TransportEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut session_events = session.take_events();
    let mut keepalive = tokio::time::interval(config.keepalive_interval);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    keepalive.tick().await; // the first tick completes immediately

    loop {
        let events_open = session_events.is_some();
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Supervisor shutting down, closing voice session");
                session.close().await;
                break;
            }

            chunk = audio_rx.recv() => match chunk {
                Some(chunk) => {
                    if let Err(e) = session.send_audio(chunk).await {
                        warn!("Audio send failed: {}", e);
                        session_events = match reestablish(
                            &mut session, &transport, &config, &metrics, &mut shutdown_rx,
                        ).await {
                            Some(rx) => Some(rx),
                            None => break,
                        };
                    }
                }
                None => {
                    // The engine side is gone; nothing left to stream.
                    session.close().await;
                    break;
                }
            },

            ev = recv_event(&mut session_events), if events_open => match ev {
                Some(TransportEvent::MembershipChanged(members)) => {
                    let _ = events_tx.send(TransportEvent::MembershipChanged(members)).await;
                }
                other => {
                    let reason = match other {
                        Some(TransportEvent::Disconnected { reason }) => reason,
                        _ => "event stream closed".to_string(),
                    };
                    warn!("Voice session disconnected: {}", reason);
                    session_events = match reestablish(
                        &mut session, &transport, &config, &metrics, &mut shutdown_rx,
                    ).await {
                        Some(rx) => Some(rx),
                        None => break,
                    };
                }
            },

            _ = keepalive.tick() => {
                metrics.keepalive_ticks.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = session.keepalive().await {
                    debug!("Keepalive failed (best-effort): {}", e);
                }
            }
        }
    }
}

async fn recv_event(
    events: &mut Option<mpsc::Receiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Recover the session after a disconnect. In-place resume inside the grace
/// window first; otherwise tear down and rejoin on a fixed cadence until it
/// works. Returns the fresh event stream, or `None` on shutdown.
async fn reestablish(
    session: &mut Box<dyn VoiceSession>,
    transport: &Arc<dyn VoiceTransport>,
    config: &SupervisorConfig,
    metrics: &Arc<PlaybackMetrics>,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> Option<mpsc::Receiver<TransportEvent>> {
    metrics.reconnect_attempts.fetch_add(1, Ordering::Relaxed);

    match tokio::time::timeout(config.resume_grace, session.resume()).await {
        Ok(Ok(())) => {
            info!("Voice session resumed in place");
            metrics.reconnects.fetch_add(1, Ordering::Relaxed);
            return session.take_events();
        }
        Ok(Err(e)) => debug!("In-place resume failed: {}", e),
        Err(_) => debug!(
            "In-place resume did not complete within {:?}",
            config.resume_grace
        ),
    }

    session.close().await;
    loop {
        let delay = with_jitter(config.rejoin_delay);
        tokio::select! {
            _ = shutdown_rx.recv() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
        metrics.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        match transport.connect().await {
            Ok(new_session) => {
                info!("Voice session re-established");
                metrics.reconnects.fetch_add(1, Ordering::Relaxed);
                *session = new_session;
                return session.take_events();
            }
            Err(e) => warn!("Rejoin failed, will retry: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackTransport;
    use crate::{ChannelMember, MockVoiceTransport};

    fn human(id: u64) -> ChannelMember {
        ChannelMember {
            user_id: id,
            display_name: format!("user{}", id),
            is_bot: false,
        }
    }

    fn quick_config() -> SupervisorConfig {
        SupervisorConfig {
            connect_attempts: 2,
            connect_retry_delay: Duration::from_millis(10),
            resume_grace: Duration::from_millis(50),
            rejoin_delay: Duration::from_millis(20),
            keepalive_interval: Duration::from_millis(25),
        }
    }

    #[tokio::test]
    async fn initial_connect_exhaustion_is_fatal() {
        let mut transport = MockVoiceTransport::new();
        transport
            .expect_connect()
            .times(2)
            .returning(|| Err(TransportError::ConnectFailed("gateway down".into())));

        let result = ConnectionSupervisor::start(
            Arc::new(transport),
            quick_config(),
            Arc::new(PlaybackMetrics::default()),
        )
        .await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    }

    #[tokio::test]
    async fn membership_events_are_forwarded() {
        let (transport, driver) = LoopbackTransport::new();
        let metrics = Arc::new(PlaybackMetrics::default());
        let mut handle =
            ConnectionSupervisor::start(Arc::new(transport), quick_config(), metrics)
                .await
                .unwrap();
        let mut events = handle.take_events().unwrap();

        // Initial snapshot first.
        match events.recv().await {
            Some(TransportEvent::MembershipChanged(members)) => assert!(members.is_empty()),
            other => panic!("unexpected event: {:?}", other),
        }

        driver.set_members(vec![human(1)]);
        match events.recv().await {
            Some(TransportEvent::MembershipChanged(members)) => assert_eq!(members.len(), 1),
            other => panic!("unexpected event: {:?}", other),
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn audio_flows_through_the_stable_sink() {
        let (transport, driver) = LoopbackTransport::new();
        let metrics = Arc::new(PlaybackMetrics::default());
        let handle = ConnectionSupervisor::start(Arc::new(transport), quick_config(), metrics)
            .await
            .unwrap();

        let sink = handle.audio_sink();
        sink.send(Bytes::from_static(b"0123456789")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(driver.bytes_sunk(), 10);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_recovers_in_place() {
        let (transport, driver) = LoopbackTransport::new();
        let metrics = Arc::new(PlaybackMetrics::default());
        let handle = ConnectionSupervisor::start(
            Arc::new(transport),
            quick_config(),
            Arc::clone(&metrics),
        )
        .await
        .unwrap();

        driver.drop_connection("simulated network blip");
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Loopback resumes in place, so one attempt and one success.
        assert_eq!(metrics.reconnects.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.reconnect_attempts.load(Ordering::Relaxed), 1);

        // The sink still works after recovery.
        let sink = handle.audio_sink();
        sink.send(Bytes::from_static(b"abc")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(driver.bytes_sunk(), 3);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn keepalive_ticks_while_idle() {
        let (transport, _driver) = LoopbackTransport::new();
        let metrics = Arc::new(PlaybackMetrics::default());
        let handle = ConnectionSupervisor::start(
            Arc::new(transport),
            quick_config(),
            Arc::clone(&metrics),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(metrics.keepalive_ticks.load(Ordering::Relaxed) >= 2);

        handle.shutdown().await;
    }
}
