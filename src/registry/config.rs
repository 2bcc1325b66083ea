//! Registry configuration

use crate::retry::RetryPolicy;
use crate::spawner::DEFAULT_SPAWNER_PORT;
use crate::transport::ServiceAddress;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Settings for a [`ChildRegistry`](super::ChildRegistry) and its runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Resend policy for unacknowledged requests
    pub retry: RetryPolicy,
    /// Period of the action-queue tick
    pub tick_interval: Duration,
    /// Address the service children dial is bound to
    pub listen: ServiceAddress,
    /// Port of the spawner on hosts without an explicit entry in `spawners`
    pub spawner_port: u16,
    /// Explicit spawner addresses per host
    pub spawners: HashMap<String, ServiceAddress>,
    /// Completed-and-gone controllers kept visible to completion polls
    pub departed_history: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            tick_interval: Duration::from_secs(1),
            listen: ServiceAddress::Tcp("0.0.0.0:0".to_string()),
            spawner_port: DEFAULT_SPAWNER_PORT,
            spawners: HashMap::new(),
            departed_history: 64,
        }
    }
}

impl RegistryConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_listen(mut self, address: ServiceAddress) -> Self {
        self.listen = address;
        self
    }

    /// Routes start requests for `host` to an explicit spawner address.
    pub fn with_spawner(mut self, host: impl Into<String>, address: ServiceAddress) -> Self {
        self.spawners.insert(host.into(), address);
        self
    }

    pub fn with_departed_history(mut self, len: usize) -> Self {
        self.departed_history = len;
        self
    }

    /// Spawner address for `host`.
    pub fn spawner_address(&self, host: &str) -> ServiceAddress {
        self.spawners
            .get(host)
            .cloned()
            .unwrap_or_else(|| ServiceAddress::Tcp(format!("{}:{}", host, self.spawner_port)))
    }
}
