//! All inputs into the playback controller's event loop.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use castvox_feed::Episode;

use crate::status::PlaybackStatus;

/// One member of the observed voice channel, as seen by the presence gate.
#[derive(Debug, Clone)]
pub struct Listener {
    pub user_id: u64,
    pub is_bot: bool,
}

#[derive(Debug)]
pub enum EngineEvent {
    /// Current membership of the target voice channel.
    Membership(Vec<Listener>),
    /// The startup watchdog for `segment` elapsed without first bytes.
    Watchdog { segment: u64 },
    /// The retry backoff timer scheduled by `segment` elapsed.
    StartRetry { segment: u64 },
    /// A control-surface operation.
    Command(ControlCommand),
    /// Stop the loop: cancel timers and kill any live pipeline.
    Shutdown,
}

#[derive(Debug)]
pub enum ControlCommand {
    Skip {
        reply: oneshot::Sender<Result<(), ControlRejected>>,
    },
    Restart {
        reply: oneshot::Sender<Result<(), ControlRejected>>,
    },
    Pause {
        reply: oneshot::Sender<Result<(), ControlRejected>>,
    },
    Resume {
        reply: oneshot::Sender<Result<(), ControlRejected>>,
    },
    NowPlaying {
        reply: oneshot::Sender<Result<NowPlaying, ControlRejected>>,
    },
}

/// Reported reason for a control operation that was a no-op. No state is
/// mutated when one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ControlRejected {
    #[error("playback has not started yet")]
    NotStarted,
    #[error("the voice channel is empty")]
    ChannelEmpty,
    #[error("already playing")]
    AlreadyPlaying,
    #[error("already paused")]
    AlreadyPaused,
    #[error("nothing is playing")]
    NotPlaying,
    #[error("the episode queue is empty")]
    QueueEmpty,
    #[error("the playback engine is not running")]
    EngineStopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct NowPlaying {
    pub episode: Episode,
    pub position_ms: u64,
    pub status: PlaybackStatus,
}
