//! Playback controller: the single-owner event loop for all playback state.
//!
//! Every mutation of `PlaybackState` happens inside `handle_event` /
//! `handle_signal`, which run to completion on one task; pipeline signals,
//! timers, presence updates and control commands are all just events. Timers
//! are spawned tasks tracked by abort handles and owned by the current
//! segment: `teardown_segment` cancels them and bumps the generation on every
//! exit path, so anything still in flight arrives stale and is dropped.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use castvox_feed::EpisodeQueue;
use castvox_foundation::SharedClock;
use castvox_pipeline::{
    AudioSink, BoxedPipeline, PipelineEvent, PipelineSignal, Transcoder,
};
use castvox_telemetry::PlaybackMetrics;

use crate::events::{ControlCommand, ControlRejected, EngineEvent, NowPlaying};
use crate::handle::ControllerHandle;
use crate::presence::{PresenceChange, PresenceGate};
use crate::status::{PlaybackState, PlaybackStatus};
use crate::watchdog::StartupWatchdog;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Startup watchdog window. Tuned high for slow remote sources.
    pub watchdog_timeout: Duration,
    /// Delay before retrying after a failed or stalled segment.
    pub retry_backoff: Duration,
    /// Paused-empty duration beyond which resume restarts from zero.
    pub staleness_threshold: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(5),
            staleness_threshold: Duration::from_secs(3600),
        }
    }
}

pub struct PlaybackController {
    config: ControllerConfig,
    state: PlaybackState,
    queue: Arc<EpisodeQueue>,
    transcoder: Arc<dyn Transcoder>,
    sink: AudioSink,
    clock: SharedClock,
    metrics: Arc<PlaybackMetrics>,
    gate: PresenceGate,
    watchdog: StartupWatchdog,
    retry_timer: Option<AbortHandle>,
    pipeline: Option<BoxedPipeline>,
    spawned_at: Option<std::time::Instant>,
    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: mpsc::Receiver<EngineEvent>,
    signal_tx: mpsc::Sender<PipelineSignal>,
    signal_rx: mpsc::Receiver<PipelineSignal>,
}

impl PlaybackController {
    pub fn new(
        config: ControllerConfig,
        queue: Arc<EpisodeQueue>,
        transcoder: Arc<dyn Transcoder>,
        sink: AudioSink,
        clock: SharedClock,
        metrics: Arc<PlaybackMetrics>,
    ) -> (Self, ControllerHandle) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (signal_tx, signal_rx) = mpsc::channel(16);
        let handle = ControllerHandle::new(events_tx.clone());
        let watchdog = StartupWatchdog::new(config.watchdog_timeout);
        (
            Self {
                config,
                state: PlaybackState::new(),
                queue,
                transcoder,
                sink,
                clock,
                metrics,
                gate: PresenceGate::new(),
                watchdog,
                retry_timer: None,
                pipeline: None,
                spawned_at: None,
                events_tx,
                events_rx,
                signal_tx,
                signal_rx,
            },
            handle,
        )
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.status
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    /// Run the event loop. Returns when `Shutdown` is received or every
    /// handle has been dropped; the live segment is torn down either way.
    pub async fn run(mut self) {
        info!("Playback controller started");
        loop {
            tokio::select! {
                ev = self.events_rx.recv() => match ev {
                    Some(EngineEvent::Shutdown) | None => break,
                    Some(ev) => self.handle_event(ev),
                },
                Some(sig) = self.signal_rx.recv() => self.handle_signal(sig),
            }
        }
        self.teardown_segment();
        info!("Playback controller stopped");
    }

    /// The state machine's transition function. Runs to completion; all
    /// suspension happens between events, never inside one.
    pub fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Membership(members) => {
                let change = self.gate.observe(&members);
                self.on_presence(change);
            }
            EngineEvent::Watchdog { segment } => self.on_watchdog(segment),
            EngineEvent::StartRetry { segment } => self.on_retry(segment),
            EngineEvent::Command(cmd) => self.on_command(cmd),
            EngineEvent::Shutdown => self.teardown_segment(),
        }
    }

    pub fn handle_signal(&mut self, signal: PipelineSignal) {
        if signal.segment != self.state.segment {
            debug!(
                signal_segment = signal.segment,
                current = self.state.segment,
                "Dropping stale pipeline signal"
            );
            return;
        }
        match signal.event {
            PipelineEvent::FirstBytes => self.on_first_bytes(),
            PipelineEvent::Ended => self.on_stream_end(None),
            PipelineEvent::Failed(reason) => self.on_stream_end(Some(reason)),
        }
    }

    // ── presence ─────────────────────────────────────────────────────────

    fn on_presence(&mut self, change: PresenceChange) {
        if change.went_empty {
            self.on_channel_empty();
        } else if change.became_occupied {
            self.on_listener_joined();
        }
    }

    fn on_channel_empty(&mut self) {
        match self.state.status {
            PlaybackStatus::Playing => {
                self.accumulate_elapsed();
                info!(
                    offset_ms = self.state.resume_offset.as_millis() as u64,
                    "Channel empty, pausing"
                );
                self.pause_into(PlaybackStatus::PausedEmpty);
                self.metrics.presence_pauses.fetch_add(1, Ordering::Relaxed);
            }
            PlaybackStatus::Starting => {
                // Nothing has played yet; keep whatever offset we were
                // starting from.
                info!("Channel emptied during startup, pausing");
                self.pause_into(PlaybackStatus::PausedEmpty);
                self.metrics.presence_pauses.fetch_add(1, Ordering::Relaxed);
            }
            PlaybackStatus::PausedManual => {
                // The empty channel takes precedence over the manual cause so
                // the staleness rule applies while nobody is listening.
                self.state.paused_at = Some(self.clock.now());
                self.state.transition(PlaybackStatus::PausedEmpty);
            }
            _ => {}
        }
    }

    fn on_listener_joined(&mut self) {
        match self.state.status {
            PlaybackStatus::WaitingForListener => {
                info!("First listener joined, starting playback");
                self.begin_segment(Duration::ZERO);
            }
            PlaybackStatus::PausedEmpty => {
                let paused_for = self
                    .state
                    .paused_at
                    .map(|at| self.clock.now().saturating_duration_since(at))
                    .unwrap_or(Duration::ZERO);
                let offset = if paused_for > self.config.staleness_threshold {
                    info!(
                        paused_secs = paused_for.as_secs(),
                        "Resume is stale, restarting episode from the top"
                    );
                    self.metrics.stale_restarts.fetch_add(1, Ordering::Relaxed);
                    Duration::ZERO
                } else {
                    self.state.resume_offset
                };
                self.metrics.resumes.fetch_add(1, Ordering::Relaxed);
                self.begin_segment(offset);
            }
            PlaybackStatus::PausedManual => {
                self.metrics.resumes.fetch_add(1, Ordering::Relaxed);
                let offset = self.state.resume_offset;
                self.begin_segment(offset);
            }
            _ => {}
        }
    }

    // ── pipeline signals ─────────────────────────────────────────────────

    fn on_first_bytes(&mut self) {
        if self.state.status != PlaybackStatus::Starting {
            debug!("First bytes after segment left Starting, ignoring");
            return;
        }
        self.watchdog.disarm();
        let now = self.clock.now();
        if let Some(spawned) = self.spawned_at {
            let latency = now.saturating_duration_since(spawned);
            self.metrics.record_first_bytes(latency.as_millis() as u64);
        }
        self.state.transition(PlaybackStatus::Playing);
        self.state.segment_started_at = Some(now);
        info!(
            offset_ms = self.state.resume_offset.as_millis() as u64,
            "Audio flowing"
        );
    }

    fn on_stream_end(&mut self, failure: Option<String>) {
        match self.state.status {
            PlaybackStatus::Playing => {
                if let Some(reason) = failure {
                    warn!("Pipeline failed mid-stream: {}", reason);
                    self.metrics.error_advances.fetch_add(1, Ordering::Relaxed);
                    self.advance_after_failure();
                } else {
                    info!("Episode finished, advancing");
                    self.metrics.clean_advances.fetch_add(1, Ordering::Relaxed);
                    self.state.transition(PlaybackStatus::Transitioning);
                    self.teardown_segment();
                    self.state.resume_offset = Duration::ZERO;
                    self.state.segment_started_at = None;
                    self.queue.advance();
                    self.state.transition(PlaybackStatus::Starting);
                    self.spawn_current();
                }
            }
            PlaybackStatus::Starting => {
                // Died before producing audio; same recovery as a stall.
                let reason = failure.unwrap_or_else(|| "stream ended before first bytes".into());
                warn!("Pipeline failed during startup: {}", reason);
                self.metrics.error_advances.fetch_add(1, Ordering::Relaxed);
                self.advance_after_failure();
            }
            _ => debug!("Stream end in {:?}, ignoring", self.state.status),
        }
    }

    // ── timers ───────────────────────────────────────────────────────────

    fn on_watchdog(&mut self, segment: u64) {
        if segment != self.state.segment || self.state.status != PlaybackStatus::Starting {
            debug!(segment, "Stale watchdog fire, ignoring");
            return;
        }
        warn!(
            timeout_secs = self.config.watchdog_timeout.as_secs(),
            "No audio within the watchdog window, advancing"
        );
        self.metrics.watchdog_fires.fetch_add(1, Ordering::Relaxed);
        self.advance_after_failure();
    }

    fn on_retry(&mut self, segment: u64) {
        if segment != self.state.segment || self.state.status != PlaybackStatus::Starting {
            debug!(segment, "Stale retry timer, ignoring");
            return;
        }
        self.retry_timer = None;
        self.spawn_current();
    }

    // ── control surface ──────────────────────────────────────────────────

    fn on_command(&mut self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::Skip { reply } => {
                let _ = reply.send(self.do_skip());
            }
            ControlCommand::Restart { reply } => {
                let _ = reply.send(self.do_restart());
            }
            ControlCommand::Pause { reply } => {
                let _ = reply.send(self.do_pause());
            }
            ControlCommand::Resume { reply } => {
                let _ = reply.send(self.do_resume());
            }
            ControlCommand::NowPlaying { reply } => {
                let _ = reply.send(self.do_now_playing());
            }
        }
    }

    fn do_skip(&mut self) -> Result<(), ControlRejected> {
        if self.queue.is_empty() {
            return Err(ControlRejected::QueueEmpty);
        }
        match self.state.status {
            PlaybackStatus::WaitingForListener => Err(ControlRejected::NotStarted),
            PlaybackStatus::PausedEmpty => {
                // Selection moves on; playback waits for a listener.
                self.teardown_segment();
                self.queue.advance();
                self.state.resume_offset = Duration::ZERO;
                self.state.current_episode = self.queue.current();
                Ok(())
            }
            _ => {
                self.queue.advance();
                self.begin_segment(Duration::ZERO);
                Ok(())
            }
        }
    }

    fn do_restart(&mut self) -> Result<(), ControlRejected> {
        if self.queue.is_empty() {
            return Err(ControlRejected::QueueEmpty);
        }
        match self.state.status {
            PlaybackStatus::WaitingForListener => Err(ControlRejected::NotStarted),
            PlaybackStatus::PausedEmpty => {
                self.teardown_segment();
                self.state.resume_offset = Duration::ZERO;
                Ok(())
            }
            _ => {
                self.begin_segment(Duration::ZERO);
                Ok(())
            }
        }
    }

    fn do_pause(&mut self) -> Result<(), ControlRejected> {
        match self.state.status {
            PlaybackStatus::Playing => {
                self.accumulate_elapsed();
                self.pause_into(PlaybackStatus::PausedManual);
                self.metrics.manual_pauses.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            PlaybackStatus::PausedManual | PlaybackStatus::PausedEmpty => {
                Err(ControlRejected::AlreadyPaused)
            }
            _ => Err(ControlRejected::NotPlaying),
        }
    }

    fn do_resume(&mut self) -> Result<(), ControlRejected> {
        match self.state.status {
            PlaybackStatus::PausedManual => {
                if self.gate.listeners() == 0 {
                    // Presence rules win while the channel is empty.
                    Err(ControlRejected::ChannelEmpty)
                } else {
                    self.metrics.resumes.fetch_add(1, Ordering::Relaxed);
                    let offset = self.state.resume_offset;
                    self.begin_segment(offset);
                    Ok(())
                }
            }
            PlaybackStatus::PausedEmpty => Err(ControlRejected::ChannelEmpty),
            PlaybackStatus::WaitingForListener => Err(ControlRejected::NotStarted),
            _ => Err(ControlRejected::AlreadyPlaying),
        }
    }

    fn do_now_playing(&self) -> Result<NowPlaying, ControlRejected> {
        match &self.state.current_episode {
            Some(episode) => Ok(NowPlaying {
                episode: episode.clone(),
                position_ms: self.state.position(self.clock.now()).as_millis() as u64,
                status: self.state.status,
            }),
            None => Err(ControlRejected::NotStarted),
        }
    }

    // ── segment lifecycle ────────────────────────────────────────────────

    /// Fold the elapsed playtime of the live segment into the resume offset.
    fn accumulate_elapsed(&mut self) {
        if self.state.status != PlaybackStatus::Playing {
            return;
        }
        if let Some(started) = self.state.segment_started_at.take() {
            let elapsed = self.clock.now().saturating_duration_since(started);
            self.state.resume_offset += elapsed;
        }
    }

    fn pause_into(&mut self, status: PlaybackStatus) {
        self.teardown_segment();
        self.state.segment_started_at = None;
        self.state.paused_at = Some(self.clock.now());
        self.state.transition(status);
    }

    /// Start a new segment at `offset`: tear down whatever was live, enter
    /// `Starting`, and spawn.
    fn begin_segment(&mut self, offset: Duration) {
        self.teardown_segment();
        if !self.state.transition(PlaybackStatus::Starting) {
            return;
        }
        self.state.resume_offset = offset;
        self.state.segment_started_at = None;
        self.state.paused_at = None;
        self.spawn_current();
    }

    /// Failure path shared by watchdog fires, spawn errors, and mid-stream
    /// failures: advance the queue, reset the offset, retry after backoff.
    fn advance_after_failure(&mut self) {
        self.teardown_segment();
        self.state.resume_offset = Duration::ZERO;
        self.state.segment_started_at = None;
        self.queue.advance();
        self.state.transition(PlaybackStatus::Starting);
        self.schedule_retry();
    }

    fn spawn_current(&mut self) {
        if self.pipeline.is_some() {
            // Play lock: one in-flight start at a time; extra requests are
            // dropped, not queued.
            warn!("Start already in flight, dropping start request");
            return;
        }
        let Some(episode) = self.queue.current() else {
            warn!("Episode queue is empty, retrying after backoff");
            self.schedule_retry();
            return;
        };
        match self.transcoder.spawn(
            &episode.source_url,
            self.state.resume_offset,
            self.state.segment,
            self.signal_tx.clone(),
            self.sink.clone(),
        ) {
            Ok(handle) => {
                self.pipeline = Some(handle);
                self.spawned_at = Some(self.clock.now());
                self.watchdog.arm(self.state.segment, self.events_tx.clone());
                self.metrics.segments_started.fetch_add(1, Ordering::Relaxed);
                info!(
                    title = %episode.title,
                    offset_ms = self.state.resume_offset.as_millis() as u64,
                    segment = self.state.segment,
                    "Segment started"
                );
                self.state.current_episode = Some(episode);
            }
            Err(e) => {
                warn!("Failed to spawn transcoder: {}", e);
                self.metrics.error_advances.fetch_add(1, Ordering::Relaxed);
                self.advance_after_failure();
            }
        }
    }

    /// End the current segment on any path: disarm the watchdog, cancel the
    /// retry timer, kill the pipeline, and bump the generation so anything
    /// still in flight for the old segment arrives stale.
    fn teardown_segment(&mut self) {
        self.watchdog.disarm();
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.kill();
        }
        self.spawned_at = None;
        self.state.segment += 1;
    }

    fn schedule_retry(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        let segment = self.state.segment;
        let delay = self.config.retry_backoff;
        let events = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(EngineEvent::StartRetry { segment }).await;
        });
        self.retry_timer = Some(handle.abort_handle());
    }
}
