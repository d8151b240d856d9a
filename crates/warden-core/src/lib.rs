//! warden-core: session lifecycle supervision for an authenticated client.
//! Decides when a logged-in session is alive, idle, about to expire or dead,
//! and drives warnings, forced logout and backend re-validation.
//!
//! Pure library: every wakeup goes through [`clock::Clock`], every side
//! effect through the collaborator traits in [`ports`]. The runtime crate
//! supplies tokio/HTTP/console implementations; [`memory`] supplies shared
//! in-memory ones used by replay, tests and the runtime itself.

pub mod activity;
pub mod clock;
pub mod error;
pub mod event_bus;
pub mod manager;
pub mod memory;
pub mod policy;
pub mod ports;
pub mod replay;
pub mod state;

pub use activity::ActivityDetector;
pub use clock::{Clock, ManualClock, TimerHandle, TimerKind};
pub use error::{BackendError, PolicyError, ScenarioError};
pub use event_bus::{EventKind, SessionEvent, SessionEventBus, SubscriptionId};
pub use manager::{Collaborators, SessionInput, SessionLifecycleManager};
pub use memory::{MemoryIdentity, MemoryRoute, PromptRecord, RecordingPrompts, ScriptedBackend};
pub use policy::{ActivitySignal, PolicyConfig, PromptMessages, SessionPolicy};
pub use ports::{
    BackendCall, BackendRequest, BackendResponse, ClosedPrompt, IdentityHolder, Navigator,
    PromptSurface, RequestId, SessionBackend, User, WarningOutcome, WarningPrompt,
};
pub use replay::{ReplayHarness, ReplayReport, Scenario};
pub use state::{ArmedTimers, Phase, SessionRuntimeState, SessionStatus, TerminationReason};
