//! Runtime wiring: queue, feed refresher, connection supervisor, playback
//! controller, and the membership forwarder that feeds the presence gate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use castvox_engine::{ControllerHandle, Listener, PlaybackController};
use castvox_feed::{spawn_refresh_task, EpisodeQueue, FeedFetcher};
use castvox_foundation::{real_clock, AppError, HealthCheck, HealthMonitor};
use castvox_pipeline::Transcoder;
use castvox_telemetry::PlaybackMetrics;
use castvox_transport::{ConnectionSupervisor, TransportEvent, VoiceTransport};

use crate::config::AppConfig;

/// Handle to the running application pipeline
pub struct AppHandle {
    pub controller: ControllerHandle,
    pub metrics: Arc<PlaybackMetrics>,

    engine_task: JoinHandle<()>,
    supervisor: castvox_transport::SupervisorHandle,
    refresh_task: JoinHandle<()>,
    forward_task: JoinHandle<()>,
    health: HealthMonitor,
}

struct TaskAlive {
    name: &'static str,
    alive: Arc<AtomicBool>,
}

impl HealthCheck for TaskAlive {
    fn check(&self) -> Result<(), String> {
        if self.alive.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(format!("{} task exited", self.name))
        }
    }

    fn name(&self) -> &str {
        self.name
    }
}

struct SinkOpen {
    sink: mpsc::Sender<Bytes>,
}

impl HealthCheck for SinkOpen {
    fn check(&self) -> Result<(), String> {
        if self.sink.is_closed() {
            Err("audio sink closed (supervisor gone)".into())
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &str {
        "audio-sink"
    }
}

/// Start the CastVox pipeline with the given collaborators.
///
/// Fatal failures here (initial feed fetch, initial voice session) bubble up
/// and terminate the process; everything after this point recovers locally.
pub async fn start(
    config: AppConfig,
    fetcher: Arc<dyn FeedFetcher>,
    transcoder: Arc<dyn Transcoder>,
    transport: Arc<dyn VoiceTransport>,
    metrics: Arc<PlaybackMetrics>,
) -> Result<AppHandle, AppError> {
    // 1) Episode queue, seeded by a required initial fetch
    let queue = Arc::new(EpisodeQueue::new());
    let episodes = fetcher.fetch().await?;
    info!(episodes = episodes.len(), "Initial feed fetch complete");
    queue.replace(episodes);
    let refresh_task = spawn_refresh_task(
        Arc::clone(&queue),
        Arc::clone(&fetcher),
        Duration::from_secs(config.feed.refresh_secs),
    );

    // 2) Voice session, supervised
    let mut supervisor =
        ConnectionSupervisor::start(transport, config.supervisor_config(), Arc::clone(&metrics))
            .await?;
    let sink = supervisor.audio_sink();

    // 3) Playback controller
    let (controller, handle) = PlaybackController::new(
        config.controller_config(),
        Arc::clone(&queue),
        transcoder,
        sink.clone(),
        real_clock(),
        Arc::clone(&metrics),
    );
    let engine_alive = Arc::new(AtomicBool::new(true));
    let engine_task = {
        let alive = Arc::clone(&engine_alive);
        tokio::spawn(async move {
            controller.run().await;
            alive.store(false, Ordering::Relaxed);
        })
    };

    // 4) Membership forwarder: transport events -> presence gate
    let mut transport_events = supervisor
        .take_events()
        .expect("fresh supervisor always has an event stream");
    let forward_task = {
        let controller = handle.clone();
        tokio::spawn(async move {
            while let Some(event) = transport_events.recv().await {
                if let TransportEvent::MembershipChanged(members) = event {
                    let listeners = members
                        .into_iter()
                        .map(|m| Listener {
                            user_id: m.user_id,
                            is_bot: m.is_bot,
                        })
                        .collect();
                    controller.notify_membership(listeners).await;
                }
            }
        })
    };

    // 5) Health monitoring
    let health = HealthMonitor::new(Duration::from_secs(10));
    health.register(Box::new(TaskAlive {
        name: "playback-engine",
        alive: engine_alive,
    }));
    health.register(Box::new(SinkOpen { sink }));
    let health = health.start();

    info!("CastVox runtime started");
    Ok(AppHandle {
        controller: handle,
        metrics,
        engine_task,
        supervisor,
        refresh_task,
        forward_task,
        health,
    })
}

impl AppHandle {
    /// Gracefully stop the pipeline: cancel timers and kill the live
    /// pipeline (engine), then close the voice session, then stop the
    /// ancillary tasks. Best-effort, in that order.
    pub async fn shutdown(mut self) {
        info!("Shutting down CastVox runtime...");

        self.controller.shutdown().await;
        let _ = self.engine_task.await;

        self.supervisor.shutdown().await;

        self.refresh_task.abort();
        self.forward_task.abort();
        let _ = self.refresh_task.await;
        let _ = self.forward_task.await;

        self.health.stop();
        info!("CastVox runtime shutdown complete");
    }
}
