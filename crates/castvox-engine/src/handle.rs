//! Public operations on the playback controller, for command/button handlers
//! and the runtime. Each operation round-trips through the controller's event
//! queue and reports a reason when it is a no-op in the current state.

use tokio::sync::{mpsc, oneshot};

use crate::events::{ControlCommand, ControlRejected, EngineEvent, Listener, NowPlaying};

#[derive(Clone)]
pub struct ControllerHandle {
    events: mpsc::Sender<EngineEvent>,
}

impl ControllerHandle {
    pub(crate) fn new(events: mpsc::Sender<EngineEvent>) -> Self {
        Self { events }
    }

    pub async fn skip(&self) -> Result<(), ControlRejected> {
        self.request(|reply| ControlCommand::Skip { reply }).await
    }

    pub async fn restart(&self) -> Result<(), ControlRejected> {
        self.request(|reply| ControlCommand::Restart { reply }).await
    }

    pub async fn pause(&self) -> Result<(), ControlRejected> {
        self.request(|reply| ControlCommand::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<(), ControlRejected> {
        self.request(|reply| ControlCommand::Resume { reply }).await
    }

    pub async fn now_playing(&self) -> Result<NowPlaying, ControlRejected> {
        self.request(|reply| ControlCommand::NowPlaying { reply })
            .await
    }

    /// Deliver a fresh membership snapshot of the voice channel.
    pub async fn notify_membership(&self, members: Vec<Listener>) {
        let _ = self.events.send(EngineEvent::Membership(members)).await;
    }

    /// Stop the controller: cancels timers and kills any live pipeline.
    pub async fn shutdown(&self) {
        let _ = self.events.send(EngineEvent::Shutdown).await;
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T, ControlRejected>>) -> ControlCommand,
    ) -> Result<T, ControlRejected> {
        let (reply, rx) = oneshot::channel();
        if self
            .events
            .send(EngineEvent::Command(command(reply)))
            .await
            .is_err()
        {
            return Err(ControlRejected::EngineStopped);
        }
        rx.await.unwrap_or(Err(ControlRejected::EngineStopped))
    }
}
