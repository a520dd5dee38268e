//! ffmpeg transcoding pipeline.
//!
//! One subprocess per playback attempt: source URL + start offset in, a
//! continuous s16le PCM byte stream out on stdout. stderr is logged
//! line-by-line and never parsed for control decisions. The subprocess is an
//! owned child resource torn down on every segment exit path
//! (`kill_on_drop` as the backstop).

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use castvox_foundation::PipelineError;
use castvox_telemetry::PlaybackMetrics;

/// Where the pipeline's encoded audio bytes go.
pub type AudioSink = mpsc::Sender<Bytes>;

/// Signals from a running pipeline, tagged with the segment generation that
/// owns it. Stale generations are dropped by the receiver.
#[derive(Debug, Clone)]
pub struct PipelineSignal {
    pub segment: u64,
    pub event: PipelineEvent,
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Actual audio arrived — distinct from "process spawned", which can
    /// precede real bytes by seconds on slow remote sources.
    FirstBytes,
    /// Clean end of stream (EOF and zero exit status).
    Ended,
    /// Read error, non-zero exit, or other mid-stream failure.
    Failed(String),
}

/// Control over one live pipeline. `kill` is idempotent and safe on an
/// already-dead subprocess.
pub trait PipelineControl: Send {
    fn kill(&mut self);
    fn segment(&self) -> u64;
}

pub type BoxedPipeline = Box<dyn PipelineControl>;

/// Spawns one pipeline per segment.
pub trait Transcoder: Send + Sync {
    fn spawn(
        &self,
        source_url: &str,
        offset: Duration,
        segment: u64,
        signals: mpsc::Sender<PipelineSignal>,
        sink: AudioSink,
    ) -> Result<BoxedPipeline, PipelineError>;
}

#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    pub ffmpeg_path: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Stdout read size; one sink message per full read.
    pub chunk_bytes: usize,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".into(),
            sample_rate: 48_000,
            channels: 2,
            chunk_bytes: 8192,
        }
    }
}

pub struct FfmpegTranscoder {
    config: TranscoderConfig,
    metrics: Arc<PlaybackMetrics>,
}

impl FfmpegTranscoder {
    pub fn new(config: TranscoderConfig, metrics: Arc<PlaybackMetrics>) -> Self {
        Self { config, metrics }
    }
}

/// Seek placement heuristic. Input-side `-ss` (before `-i`) on http(s)
/// sources: cheap, range-assisted, accurate enough on the container formats
/// podcasts use (mp3/aac). Output-side `-ss` elsewhere: exact, but slower to
/// first byte — the watchdog budget is tuned for this path.
fn seek_before_input(source_url: &str) -> bool {
    let lower = source_url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

pub(crate) fn build_args(config: &TranscoderConfig, source_url: &str, offset: Duration) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "warning".into(),
        "-nostdin".into(),
    ];
    let offset_secs = offset.as_millis() as f64 / 1000.0;
    let input_seek = seek_before_input(source_url);
    if offset > Duration::ZERO && input_seek {
        args.push("-ss".into());
        args.push(format!("{:.3}", offset_secs));
    }
    args.push("-i".into());
    args.push(source_url.into());
    if offset > Duration::ZERO && !input_seek {
        args.push("-ss".into());
        args.push(format!("{:.3}", offset_secs));
    }
    args.extend([
        "-vn".into(),
        "-ac".into(),
        config.channels.to_string(),
        "-ar".into(),
        config.sample_rate.to_string(),
        "-f".into(),
        "s16le".into(),
        "pipe:1".into(),
    ]);
    args
}

impl Transcoder for FfmpegTranscoder {
    fn spawn(
        &self,
        source_url: &str,
        offset: Duration,
        segment: u64,
        signals: mpsc::Sender<PipelineSignal>,
        sink: AudioSink,
    ) -> Result<BoxedPipeline, PipelineError> {
        let args = build_args(&self.config, source_url, offset);
        debug!(segment, url = %source_url, offset_ms = offset.as_millis() as u64, "Spawning transcoder");

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(PipelineError::Spawn)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::Spawn(std::io::Error::other("no stdout pipe")))?;
        let stderr = child.stderr.take();

        // Diagnostics channel: log only, never parse for control decisions.
        let logger = stderr.map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "castvox::ffmpeg", segment, "{}", line);
                }
            })
            .abort_handle()
        });

        let metrics = Arc::clone(&self.metrics);
        let chunk_bytes = self.config.chunk_bytes;
        let pump = tokio::spawn(async move {
            let mut stdout = stdout;
            let mut buf = vec![0u8; chunk_bytes];
            let mut first = true;
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => {
                        let _ = signals
                            .send(PipelineSignal {
                                segment,
                                event: PipelineEvent::Ended,
                            })
                            .await;
                        break;
                    }
                    Ok(n) => {
                        if first {
                            first = false;
                            let _ = signals
                                .send(PipelineSignal {
                                    segment,
                                    event: PipelineEvent::FirstBytes,
                                })
                                .await;
                        }
                        metrics.add_streamed(n as u64);
                        if sink.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                            // Sink gone: the session pump shut down under us.
                            let _ = signals
                                .send(PipelineSignal {
                                    segment,
                                    event: PipelineEvent::Failed("audio sink closed".into()),
                                })
                                .await;
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = signals
                            .send(PipelineSignal {
                                segment,
                                event: PipelineEvent::Failed(e.to_string()),
                            })
                            .await;
                        break;
                    }
                }
            }
        })
        .abort_handle();

        Ok(Box::new(FfmpegPipeline {
            segment,
            child: Some(child),
            pump,
            logger,
        }))
    }
}

struct FfmpegPipeline {
    segment: u64,
    child: Option<Child>,
    pump: AbortHandle,
    logger: Option<AbortHandle>,
}

impl PipelineControl for FfmpegPipeline {
    fn kill(&mut self) {
        self.pump.abort();
        if let Some(logger) = self.logger.take() {
            logger.abort();
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                // Already exited; nothing to do.
                debug!(segment = self.segment, "start_kill: {}", e);
            }
            // Reap off the hot path so kill stays synchronous. Outside a
            // runtime (late drop) kill_on_drop already covers the child.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    match child.wait().await {
                        Ok(status) if !status.success() => {
                            debug!("Transcoder exited with {}", status);
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Failed to reap transcoder: {}", e),
                    }
                });
            }
        }
    }

    fn segment(&self) -> u64 {
        self.segment
    }
}

impl Drop for FfmpegPipeline {
    fn drop(&mut self) {
        // kill_on_drop covers the child; the pumps still need aborting if the
        // handle is dropped without an explicit kill.
        self.kill();
    }
}
