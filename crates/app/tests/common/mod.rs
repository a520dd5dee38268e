//! Shared test collaborators: a fixture feed and a scripted transcoder that
//! "plays" instantly without any subprocess.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;

use castvox_feed::{Episode, FeedFetcher};
use castvox_foundation::{FeedError, PipelineError};
use castvox_pipeline::{
    AudioSink, BoxedPipeline, PipelineControl, PipelineEvent, PipelineSignal, Transcoder,
};

pub fn episode(n: usize) -> Episode {
    Episode::new(
        format!("Episode {}", n),
        format!("https://cdn.example.com/ep{}.mp3", n),
        Utc.timestamp_opt(1_700_000_000 + n as i64 * 86_400, 0).unwrap(),
    )
}

pub struct FixtureFetcher {
    pub episodes: Vec<Episode>,
    pub fail: bool,
}

impl FixtureFetcher {
    pub fn with_episodes(count: usize) -> Self {
        Self {
            episodes: (1..=count).map(episode).collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            episodes: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl FeedFetcher for FixtureFetcher {
    async fn fetch(&self) -> Result<Vec<Episode>, FeedError> {
        if self.fail {
            return Err(FeedError::Http("connection refused".into()));
        }
        Ok(self.episodes.clone())
    }
}

#[derive(Debug, Clone)]
pub struct SpawnRecord {
    pub url: String,
    pub offset_ms: u64,
    pub segment: u64,
}

#[derive(Default)]
pub struct TranscoderLog {
    pub spawns: Vec<SpawnRecord>,
    pub kills: Vec<u64>,
}

/// Records every spawn/kill and reports first bytes immediately, so segments
/// reach `Playing` without a real subprocess.
pub struct InstantTranscoder {
    pub log: Arc<Mutex<TranscoderLog>>,
}

impl InstantTranscoder {
    pub fn new() -> (Self, Arc<Mutex<TranscoderLog>>) {
        let log = Arc::new(Mutex::new(TranscoderLog::default()));
        (
            Self {
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

impl Transcoder for InstantTranscoder {
    fn spawn(
        &self,
        source_url: &str,
        offset: Duration,
        segment: u64,
        signals: mpsc::Sender<PipelineSignal>,
        _sink: AudioSink,
    ) -> Result<BoxedPipeline, PipelineError> {
        self.log.lock().unwrap().spawns.push(SpawnRecord {
            url: source_url.to_string(),
            offset_ms: offset.as_millis() as u64,
            segment,
        });
        let _ = signals.try_send(PipelineSignal {
            segment,
            event: PipelineEvent::FirstBytes,
        });
        Ok(Box::new(InstantPipeline {
            segment,
            killed: false,
            log: Arc::clone(&self.log),
        }))
    }
}

struct InstantPipeline {
    segment: u64,
    killed: bool,
    log: Arc<Mutex<TranscoderLog>>,
}

impl PipelineControl for InstantPipeline {
    fn kill(&mut self) {
        if !self.killed {
            self.killed = true;
            self.log.lock().unwrap().kills.push(self.segment);
        }
    }

    fn segment(&self) -> u64 {
        self.segment
    }
}

impl Drop for InstantPipeline {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Poll `probe` until it returns true or the timeout elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if probe().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
