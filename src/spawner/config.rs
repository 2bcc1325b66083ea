//! Spawner configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Port a spawner listens on unless configured otherwise.
pub const DEFAULT_SPAWNER_PORT: u16 = 24_001;

/// Settings for a [`ProcessSpawner`](super::ProcessSpawner).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnerConfig {
    /// How long a launched controller has to announce itself
    pub announce_timeout: Duration,
    /// Directories searched for controller programs; empty means `PATH`
    pub search_paths: Vec<PathBuf>,
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            announce_timeout: Duration::from_secs(20),
            search_paths: Vec::new(),
        }
    }
}

impl SpawnerConfig {
    pub fn with_announce_timeout(mut self, timeout: Duration) -> Self {
        self.announce_timeout = timeout;
        self
    }

    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }
}
