pub mod controller;
pub mod events;
pub mod handle;
pub mod presence;
pub mod status;
pub mod watchdog;

// Public API
pub use controller::{ControllerConfig, PlaybackController};
pub use events::{ControlCommand, ControlRejected, EngineEvent, Listener, NowPlaying};
pub use handle::ControllerHandle;
pub use presence::{PresenceChange, PresenceGate};
pub use status::{PlaybackState, PlaybackStatus};
pub use watchdog::StartupWatchdog;
