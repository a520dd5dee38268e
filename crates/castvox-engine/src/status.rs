use serde::Serialize;
use std::time::{Duration, Instant};

use castvox_feed::Episode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackStatus {
    /// Cold start: nothing plays until the first listener ever joins.
    WaitingForListener,
    /// A pipeline spawn is in flight or backing off for a retry.
    Starting,
    Playing,
    /// Paused because the channel emptied; staleness rules apply on resume.
    PausedEmpty,
    /// Paused by an explicit control operation; resumes at the saved offset.
    PausedManual,
    /// Momentary state while the natural end-of-stream handler runs.
    Transitioning,
}

pub fn transition_allowed(from: PlaybackStatus, to: PlaybackStatus) -> bool {
    use PlaybackStatus::*;
    matches!(
        (from, to),
        (WaitingForListener, Starting)
            | (Starting, Playing)
            | (Starting, Starting)
            | (Starting, PausedEmpty)
            | (Playing, Transitioning)
            | (Playing, PausedEmpty)
            | (Playing, PausedManual)
            | (Playing, Starting)
            | (Transitioning, Starting)
            | (PausedEmpty, Starting)
            | (PausedManual, Starting)
            | (PausedManual, PausedEmpty)
    )
}

/// The authoritative mutable playback record. Owned by the controller task;
/// mutated only inside its event handlers.
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub current_episode: Option<Episode>,
    /// Cumulative consumed playtime of the current episode. Reset to zero on
    /// natural completion, restart, or skip — never on pause.
    pub resume_offset: Duration,
    /// When the current segment actually started producing audio.
    pub segment_started_at: Option<Instant>,
    /// When the current pause began (staleness clock).
    pub paused_at: Option<Instant>,
    /// Segment generation. Every timer and pipeline signal carries the
    /// generation it belongs to; stale generations are no-ops.
    pub segment: u64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackState {
    pub fn new() -> Self {
        Self {
            status: PlaybackStatus::WaitingForListener,
            current_episode: None,
            resume_offset: Duration::ZERO,
            segment_started_at: None,
            paused_at: None,
            segment: 0,
        }
    }

    /// True playback position at `now`.
    pub fn position(&self, now: Instant) -> Duration {
        match (self.status, self.segment_started_at) {
            (PlaybackStatus::Playing, Some(started)) => {
                self.resume_offset + now.saturating_duration_since(started)
            }
            _ => self.resume_offset,
        }
    }

    /// Validated transition; invalid ones are logged and refused.
    pub fn transition(&mut self, to: PlaybackStatus) -> bool {
        if !transition_allowed(self.status, to) {
            tracing::warn!("Invalid state transition: {:?} -> {:?}", self.status, to);
            return false;
        }
        tracing::info!("State transition: {:?} -> {:?}", self.status, to);
        self.status = to;
        true
    }
}
