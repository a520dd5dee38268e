//! Loopback transport: an in-process voice "channel" that counts the bytes
//! it sinks and lets callers drive membership and disconnect events. Used by
//! the binary when no real gateway is wired, and by tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;

use castvox_foundation::TransportError;

use crate::{ChannelMember, TransportEvent, VoiceSession, VoiceTransport};

struct LoopbackShared {
    events: broadcast::Sender<TransportEvent>,
    members: Mutex<Vec<ChannelMember>>,
    bytes_sunk: AtomicU64,
}

pub struct LoopbackTransport {
    shared: Arc<LoopbackShared>,
}

/// Drives the loopback channel from the outside: membership changes,
/// forced disconnects, and a byte counter for assertions.
#[derive(Clone)]
pub struct LoopbackDriver {
    shared: Arc<LoopbackShared>,
}

impl LoopbackTransport {
    pub fn new() -> (Self, LoopbackDriver) {
        Self::with_members(Vec::new())
    }

    /// Start with a fixed membership snapshot, delivered to every session on
    /// connect.
    pub fn with_members(members: Vec<ChannelMember>) -> (Self, LoopbackDriver) {
        let (events, _) = broadcast::channel(32);
        let shared = Arc::new(LoopbackShared {
            events,
            members: Mutex::new(members),
            bytes_sunk: AtomicU64::new(0),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            LoopbackDriver { shared },
        )
    }
}

impl LoopbackDriver {
    pub fn set_members(&self, members: Vec<ChannelMember>) {
        *self.shared.members.lock().unwrap() = members.clone();
        let _ = self
            .shared
            .events
            .send(TransportEvent::MembershipChanged(members));
    }

    pub fn drop_connection(&self, reason: &str) {
        let _ = self.shared.events.send(TransportEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    pub fn bytes_sunk(&self) -> u64 {
        self.shared.bytes_sunk.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl VoiceTransport for LoopbackTransport {
    async fn connect(&self) -> Result<Box<dyn VoiceSession>, TransportError> {
        Ok(Box::new(LoopbackSession {
            shared: Arc::clone(&self.shared),
            forward: None,
        }))
    }
}

struct LoopbackSession {
    shared: Arc<LoopbackShared>,
    forward: Option<AbortHandle>,
}

#[async_trait]
impl VoiceSession for LoopbackSession {
    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        if let Some(prev) = self.forward.take() {
            prev.abort();
        }
        let (tx, rx) = mpsc::channel(32);
        let members = self.shared.members.lock().unwrap().clone();
        let mut sub = self.shared.events.subscribe();
        let handle = tokio::spawn(async move {
            // Replay the current snapshot so a fresh subscriber knows who is
            // already in the channel.
            if tx
                .send(TransportEvent::MembershipChanged(members))
                .await
                .is_err()
            {
                return;
            }
            while let Ok(ev) = sub.recv().await {
                if tx.send(ev).await.is_err() {
                    break;
                }
            }
        })
        .abort_handle();
        self.forward = Some(handle);
        Some(rx)
    }

    async fn send_audio(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        self.shared
            .bytes_sunk
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn keepalive(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(forward) = self.forward.take() {
            forward.abort();
        }
    }
}

impl Drop for LoopbackSession {
    fn drop(&mut self) {
        if let Some(forward) = self.forward.take() {
            forward.abort();
        }
    }
}
