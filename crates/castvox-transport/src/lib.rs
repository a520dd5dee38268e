//! Voice transport abstraction.
//!
//! The engine depends on exactly three things from the transport: it accepts
//! an encoded audio byte stream, it reports membership and disconnect events,
//! and it can be re-established. Everything protocol-specific (handshakes,
//! encryption, frame pacing) lives behind these traits.

pub mod loopback;
pub mod supervisor;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use castvox_foundation::TransportError;

// Public API
pub use loopback::{LoopbackDriver, LoopbackTransport};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig, SupervisorHandle};

#[derive(Debug, Clone)]
pub struct ChannelMember {
    pub user_id: u64,
    pub display_name: String,
    pub is_bot: bool,
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Full membership snapshot of the target voice channel.
    MembershipChanged(Vec<ChannelMember>),
    Disconnected { reason: String },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn VoiceSession>, TransportError>;
}

#[async_trait]
pub trait VoiceSession: Send {
    /// Take the session's event stream. Each call yields a fresh receiver
    /// (the previous one stops yielding), so it can be re-taken after a
    /// successful `resume`.
    fn take_events(&mut self) -> Option<mpsc::Receiver<TransportEvent>>;

    async fn send_audio(&mut self, chunk: Bytes) -> Result<(), TransportError>;

    /// In-place recovery after a disconnect, without a full rejoin.
    async fn resume(&mut self) -> Result<(), TransportError>;

    /// Refresh the underlying network path while idle. Best-effort.
    async fn keepalive(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self);
}
