//! Per-host controller spawner

mod config;
mod core;
mod error;
mod launcher;
mod server;

pub use config::{DEFAULT_SPAWNER_PORT, SpawnerConfig};
pub use self::core::{CreateOutcome, ProcessSpawner, SpawnRequest, SpawnerEffect};
pub use error::SpawnError;
pub use launcher::{Launcher, ProcessLauncher, ProgramLocator, SearchPathLocator};
pub use server::SpawnerServer;
