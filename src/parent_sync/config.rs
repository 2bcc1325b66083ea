//! Controller process configuration

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for a [`ControllerRuntime`](super::ControllerRuntime).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Redial policy for a parent whose link dropped
    pub reconnect: RetryPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reconnect: RetryPolicy::new(Duration::from_secs(2), 10),
        }
    }
}

impl ControllerConfig {
    pub fn with_reconnect(mut self, reconnect: RetryPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}
