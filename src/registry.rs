//! Parent-side registry of child controllers

mod config;
mod core;
mod descriptor;
mod error;
mod handle;
mod runtime;

pub use config::RegistryConfig;
pub use self::core::{ChildRegistry, RegistryEffect};
pub use descriptor::{ActionStatus, ControllerDescriptor, PendingRequest};
pub use error::RegistryError;
pub use handle::RegistryHandle;
