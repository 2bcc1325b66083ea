//! Lifecycle orchestration for a hierarchy of observation controllers.
//!
//! A parent drives its children through a fixed lifecycle (connect, claim,
//! prepare, resume, suspend, release, quit) by sending state requests and
//! collecting acknowledgements. Three parts cooperate over socket links:
//!
//! - [`RegistryHandle`] runs on the parent and tracks every child, queueing
//!   and retrying requests until they are acknowledged.
//! - [`ControllerRuntime`] runs in every controller process and serves any
//!   number of parents through one [`Controller`] implementation.
//! - [`SpawnerServer`] runs once per host and launches controller processes,
//!   sharing one process between parents where the controller type allows.
//!
//! The state machines behind them ([`ChildRegistry`], [`ParentSync`],
//! [`ProcessSpawner`]) do no I/O and can be driven directly.

mod completion;
mod macros;
mod parent_sync;
mod protocol;
mod registry;
mod retry;
mod spawner;
mod state;
mod timer;
mod types;

pub mod transport;

// Re-export public API
pub use completion::{CompletedState, CompletionPort, CompletionTimer, TryRecvError};
pub use parent_sync::{
    Controller, ControllerConfig, ControllerError, ControllerRuntime, ParentContext, ParentSync,
    SyncEffect, Transition, TransitionOutcome, TransitionStep, run_transition,
};
pub use protocol::Message;
pub use registry::{
    ActionStatus, ChildRegistry, ControllerDescriptor, PendingRequest, RegistryConfig,
    RegistryEffect, RegistryError, RegistryHandle,
};
pub use retry::RetryPolicy;
pub use spawner::{
    CreateOutcome, DEFAULT_SPAWNER_PORT, Launcher, ProcessLauncher, ProcessSpawner,
    ProgramLocator, SearchPathLocator, SpawnError, SpawnRequest, SpawnerConfig, SpawnerEffect,
    SpawnerServer,
};
pub use state::{ControllerState, Signal, UnknownState};
pub use timer::{TimerId, TimerQueue};
pub use transport::{ServiceAddress, TransportError};
pub use types::{
    ControllerName, ControllerType, EndpointId, NameError, ObservationId, ResultCode, shared_name,
};
