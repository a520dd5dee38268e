use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shutdown requested")]
    ShutdownRequested,

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Feed request failed: {0}")]
    Http(String),

    #[error("Feed parse failed: {0}")]
    Parse(String),

    #[error("Feed contained no playable episodes")]
    Empty,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to spawn transcoder process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Transcoder I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transcoder exited with status {status}")]
    Exited { status: i32 },

    #[error("No audio data within {timeout:?} of startup")]
    StartupStall { timeout: Duration },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to establish voice session: {0}")]
    ConnectFailed(String),

    #[error("Voice session disconnected: {0}")]
    Disconnected(String),

    #[error("Voice session closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub enum RecoveryStrategy {
    /// Retry the same operation after a delay, up to a bound.
    Retry { max_attempts: u32, delay: Duration },
    /// Give up on the current episode: advance the queue and retry shortly.
    AdvanceAndRetry { delay: Duration },
    /// Tear the session down and rejoin after a fixed delay.
    Rejoin { delay: Duration },
    Ignore,
    Fatal,
}

impl AppError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            AppError::Feed(FeedError::Empty) => RecoveryStrategy::Ignore,
            AppError::Feed(_) => RecoveryStrategy::Retry {
                max_attempts: u32::MAX,
                delay: Duration::from_secs(60),
            },
            AppError::Pipeline(_) => RecoveryStrategy::AdvanceAndRetry {
                delay: Duration::from_secs(5),
            },
            AppError::Transport(TransportError::Disconnected(_)) => RecoveryStrategy::Rejoin {
                delay: Duration::from_secs(10),
            },
            AppError::Fatal(_) | AppError::ShutdownRequested => RecoveryStrategy::Fatal,
            _ => RecoveryStrategy::Fatal,
        }
    }
}
