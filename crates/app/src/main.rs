use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use castvox_app::config::AppConfig;
use castvox_app::runtime;
use castvox_feed::RssFetcher;
use castvox_foundation::ShutdownHandler;
use castvox_pipeline::FfmpegTranscoder;
use castvox_telemetry::PlaybackMetrics;
use castvox_transport::{ChannelMember, LoopbackTransport};

#[derive(Parser, Debug)]
#[command(name = "castvox", about = "Streams a podcast feed into a shared voice channel")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, env = "CASTVOX_CONFIG", default_value = "castvox.toml")]
    config: std::path::PathBuf,

    /// Override the feed URL from the config file
    #[arg(long, env = "CASTVOX_FEED_URL")]
    feed_url: Option<String>,

    /// Override the ffmpeg binary path
    #[arg(long, env = "CASTVOX_FFMPEG")]
    ffmpeg: Option<String>,
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "castvox.log");
    let (non_blocking_file, _guard) = tracing_appender::non_blocking(file_appender);
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout.and(non_blocking_file))
        .with_env_filter(log_level)
        .init();
    std::mem::forget(_guard);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging()?;
    tracing::info!("Starting CastVox");

    let cli = Cli::parse();
    let mut config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        tracing::warn!(
            "Config file {} not found, using defaults",
            cli.config.display()
        );
        AppConfig::default()
    };
    if let Some(url) = cli.feed_url {
        config.feed.url = url;
    }
    if let Some(ffmpeg) = cli.ffmpeg {
        config.audio.ffmpeg_path = ffmpeg;
    }
    if config.feed.url.is_empty() {
        return Err(anyhow!("no feed URL configured (set feed.url or --feed-url)").into());
    }

    let shutdown = ShutdownHandler::new().install().await;

    // --- Collaborators ---
    let metrics = Arc::new(PlaybackMetrics::default());
    let fetcher = Arc::new(RssFetcher::new(config.feed.url.clone()));
    let transcoder = Arc::new(FfmpegTranscoder::new(
        config.transcoder_config(),
        Arc::clone(&metrics),
    ));
    // Loopback stands in for a real voice gateway binding; its local monitor
    // counts as one listener so playback starts immediately.
    let (transport, driver) = LoopbackTransport::with_members(vec![ChannelMember {
        user_id: 1,
        display_name: "local-monitor".into(),
        is_bot: false,
    }]);
    let _driver = driver; // keeps the channel drivable for the process lifetime

    // --- Runtime ---
    let handle = runtime::start(
        config,
        fetcher,
        transcoder,
        Arc::new(transport),
        Arc::clone(&metrics),
    )
    .await?;
    tracing::info!("CastVox running");

    // --- Main application loop ---
    let mut stats_interval = tokio::time::interval(Duration::from_secs(30));
    stats_interval.tick().await; // immediate first tick
    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            _ = stats_interval.tick() => {
                tracing::info!("Pipeline: {}", metrics.summary());
                if let Ok(now) = handle.controller.now_playing().await {
                    match serde_json::to_string(&now) {
                        Ok(json) => tracing::info!(target: "castvox::now_playing", "{}", json),
                        Err(e) => tracing::debug!("now_playing serialization failed: {}", e),
                    }
                }
            }
        }
    }

    // --- Graceful shutdown: timers, pipeline, session — in that order ---
    handle.shutdown().await;
    tracing::info!("CastVox stopped");
    Ok(())
}
