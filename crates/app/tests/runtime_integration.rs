//! End-to-end wiring tests: fixture feed -> runtime -> presence-driven
//! playback over the loopback transport, with a scripted transcoder standing
//! in for ffmpeg.

use std::sync::Arc;
use std::time::Duration;

use castvox_app::config::AppConfig;
use castvox_app::runtime;
use castvox_engine::{ControlRejected, PlaybackStatus};
use castvox_foundation::AppError;
use castvox_telemetry::PlaybackMetrics;
use castvox_transport::{ChannelMember, LoopbackDriver, LoopbackTransport};

mod common;
use common::{wait_until, FixtureFetcher, InstantTranscoder};

fn human(id: u64) -> ChannelMember {
    ChannelMember {
        user_id: id,
        display_name: format!("user{}", id),
        is_bot: false,
    }
}

fn quick_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.feed.url = "https://feeds.example.com/cast.xml".into();
    config.feed.refresh_secs = 3600;
    config.playback.retry_backoff_ms = 50;
    config.transport.keepalive_secs = 3600;
    config
}

async fn start_runtime() -> (
    runtime::AppHandle,
    LoopbackDriver,
    Arc<std::sync::Mutex<common::TranscoderLog>>,
) {
    let (transcoder, log) = InstantTranscoder::new();
    let (transport, driver) = LoopbackTransport::new();
    let handle = runtime::start(
        quick_config(),
        Arc::new(FixtureFetcher::with_episodes(2)),
        Arc::new(transcoder),
        Arc::new(transport),
        Arc::new(PlaybackMetrics::default()),
    )
    .await
    .expect("runtime should start");
    (handle, driver, log)
}

#[tokio::test]
async fn failing_initial_fetch_is_fatal() {
    let (transcoder, _log) = InstantTranscoder::new();
    let (transport, _driver) = LoopbackTransport::new();
    let result = runtime::start(
        quick_config(),
        Arc::new(FixtureFetcher::failing()),
        Arc::new(transcoder),
        Arc::new(transport),
        Arc::new(PlaybackMetrics::default()),
    )
    .await;
    assert!(matches!(result, Err(AppError::Feed(_))));
}

#[tokio::test]
async fn playback_follows_listener_presence() {
    let (handle, driver, log) = start_runtime().await;

    // Nothing plays before the first listener.
    assert_eq!(
        handle.controller.now_playing().await.unwrap_err(),
        ControlRejected::NotStarted
    );

    // First join: the oldest episode starts from zero.
    driver.set_members(vec![human(1)]);
    let playing = wait_until(Duration::from_secs(2), || async {
        matches!(
            handle.controller.now_playing().await,
            Ok(now) if now.status == PlaybackStatus::Playing
        )
    })
    .await;
    assert!(playing, "playback should start after the first join");
    let now = handle.controller.now_playing().await.unwrap();
    assert_eq!(now.episode.title, "Episode 1");

    // Everyone leaves: paused, pipeline released.
    driver.set_members(vec![]);
    let paused = wait_until(Duration::from_secs(2), || async {
        matches!(
            handle.controller.now_playing().await,
            Ok(now) if now.status == PlaybackStatus::PausedEmpty
        )
    })
    .await;
    assert!(paused, "empty channel should pause playback");
    {
        let log = log.lock().unwrap();
        assert_eq!(log.spawns.len(), 1);
        assert_eq!(log.kills.len(), 1);
    }

    // Rejoin: the same episode resumes.
    driver.set_members(vec![human(2)]);
    let resumed = wait_until(Duration::from_secs(2), || async {
        matches!(
            handle.controller.now_playing().await,
            Ok(now) if now.status == PlaybackStatus::Playing
        )
    })
    .await;
    assert!(resumed, "join should resume playback");
    assert_eq!(
        handle.controller.now_playing().await.unwrap().episode.title,
        "Episode 1"
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn skip_moves_to_the_next_episode() {
    let (handle, driver, log) = start_runtime().await;
    driver.set_members(vec![human(1)]);
    wait_until(Duration::from_secs(2), || async {
        matches!(
            handle.controller.now_playing().await,
            Ok(now) if now.status == PlaybackStatus::Playing
        )
    })
    .await;

    handle.controller.skip().await.unwrap();
    let advanced = wait_until(Duration::from_secs(2), || async {
        matches!(
            handle.controller.now_playing().await,
            Ok(now) if now.episode.title == "Episode 2"
        )
    })
    .await;
    assert!(advanced, "skip should start the next episode");
    {
        let log = log.lock().unwrap();
        let last = log.spawns.last().unwrap().clone();
        assert_eq!(last.url, "https://cdn.example.com/ep2.mp3");
        assert_eq!(last.offset_ms, 0);
    }

    handle.shutdown().await;
}

#[tokio::test]
async fn manual_pause_then_resume_round_trips() {
    let (handle, driver, _log) = start_runtime().await;
    driver.set_members(vec![human(1)]);
    wait_until(Duration::from_secs(2), || async {
        matches!(
            handle.controller.now_playing().await,
            Ok(now) if now.status == PlaybackStatus::Playing
        )
    })
    .await;

    handle.controller.pause().await.unwrap();
    assert_eq!(
        handle.controller.now_playing().await.unwrap().status,
        PlaybackStatus::PausedManual
    );
    assert_eq!(
        handle.controller.pause().await.unwrap_err(),
        ControlRejected::AlreadyPaused
    );

    handle.controller.resume().await.unwrap();
    let resumed = wait_until(Duration::from_secs(2), || async {
        matches!(
            handle.controller.now_playing().await,
            Ok(now) if now.status == PlaybackStatus::Playing
        )
    })
    .await;
    assert!(resumed);

    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_kills_the_live_pipeline() {
    let (handle, driver, log) = start_runtime().await;
    driver.set_members(vec![human(1)]);
    wait_until(Duration::from_secs(2), || async {
        matches!(
            handle.controller.now_playing().await,
            Ok(now) if now.status == PlaybackStatus::Playing
        )
    })
    .await;

    handle.shutdown().await;
    let log = log.lock().unwrap();
    assert_eq!(
        log.spawns.len(),
        log.kills.len(),
        "every spawned pipeline must be killed by shutdown"
    );
}
