//! Episode queue: the ordered collection of playable items plus the cursor.
//!
//! The collection is replaced wholesale on each feed refresh (no incremental
//! merge); the cursor wraps modulo the collection length so consumption is
//! chronological and cycles back to the oldest episode.

use parking_lot::RwLock;

use crate::episode::Episode;

pub struct EpisodeQueue {
    inner: RwLock<QueueInner>,
}

struct QueueInner {
    episodes: Vec<Episode>,
    cursor: usize,
}

impl Default for EpisodeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EpisodeQueue {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(QueueInner {
                episodes: Vec::new(),
                cursor: 0,
            }),
        }
    }

    /// Atomically swap in a fresh collection. An empty refresh result is a
    /// transient fetch failure: it is ignored and the previous collection is
    /// preserved. Returns whether the swap happened.
    ///
    /// The cursor is re-validated against the new length since the
    /// collection may have shrunk.
    pub fn replace(&self, episodes: Vec<Episode>) -> bool {
        if episodes.is_empty() {
            tracing::debug!("Ignoring empty feed refresh, keeping {} episodes", self.len());
            return false;
        }
        let mut inner = self.inner.write();
        inner.cursor %= episodes.len();
        inner.episodes = episodes;
        true
    }

    /// The episode at the cursor, or `None` while the collection is empty.
    pub fn current(&self) -> Option<Episode> {
        let inner = self.inner.read();
        if inner.episodes.is_empty() {
            return None;
        }
        Some(inner.episodes[inner.cursor % inner.episodes.len()].clone())
    }

    /// Move the cursor forward one episode, wrapping at the end.
    pub fn advance(&self) {
        let mut inner = self.inner.write();
        if inner.episodes.is_empty() {
            return;
        }
        inner.cursor = (inner.cursor + 1) % inner.episodes.len();
    }

    pub fn len(&self) -> usize {
        self.inner.read().episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().episodes.is_empty()
    }

    /// Cursor position and collection length, for status reporting.
    pub fn position(&self) -> (usize, usize) {
        let inner = self.inner.read();
        (inner.cursor, inner.episodes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn episodes(n: usize) -> Vec<Episode> {
        (0..n)
            .map(|i| {
                Episode::new(
                    format!("Episode {}", i + 1),
                    format!("https://feeds.example.com/ep{}.mp3", i + 1),
                    Utc.timestamp_opt(1_700_000_000 + i as i64 * 86_400, 0).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn empty_queue_has_no_current() {
        let queue = EpisodeQueue::new();
        assert!(queue.current().is_none());
        queue.advance(); // no-op, must not panic
        assert!(queue.is_empty());
    }

    #[test]
    fn empty_replace_is_ignored() {
        let queue = EpisodeQueue::new();
        assert!(queue.replace(episodes(3)));
        assert!(!queue.replace(Vec::new()));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn advance_wraps_around() {
        let queue = EpisodeQueue::new();
        queue.replace(episodes(2));
        assert_eq!(queue.current().unwrap().title, "Episode 1");
        queue.advance();
        assert_eq!(queue.current().unwrap().title, "Episode 2");
        queue.advance();
        assert_eq!(queue.current().unwrap().title, "Episode 1");
    }

    #[test]
    fn cursor_revalidated_when_collection_shrinks() {
        let queue = EpisodeQueue::new();
        queue.replace(episodes(5));
        for _ in 0..4 {
            queue.advance();
        }
        assert_eq!(queue.current().unwrap().title, "Episode 5");

        queue.replace(episodes(2));
        // cursor 4 mod 2 == 0
        assert_eq!(queue.current().unwrap().title, "Episode 1");
    }

    proptest! {
        #[test]
        fn advancing_len_times_returns_to_start(len in 1usize..32, pre_advance in 0usize..64) {
            let queue = EpisodeQueue::new();
            queue.replace(episodes(len));
            for _ in 0..pre_advance {
                queue.advance();
            }
            let start = queue.current().unwrap();
            for _ in 0..len {
                queue.advance();
            }
            prop_assert_eq!(queue.current().unwrap(), start);
        }
    }
}
