//! Child-side synchronisation with one or more parents

mod config;
mod context;
mod controller;
mod core;
mod error;
mod runtime;

pub use config::ControllerConfig;
pub use context::ParentContext;
pub use controller::{Controller, TransitionOutcome, TransitionStep, run_transition};
pub use self::core::{ParentSync, SyncEffect, Transition};
pub use error::ControllerError;
pub use runtime::ControllerRuntime;
