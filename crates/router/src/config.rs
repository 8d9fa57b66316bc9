use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Upper bound on one backend call; `None` waits indefinitely.
    pub backend_timeout_ms: Option<u64>,
    pub append_backoff_initial_ms: u64,
    pub append_backoff_max_ms: u64,
    /// Fixed seed for the weighted sampler. Unset draws from OS entropy.
    pub sampler_seed: Option<u64>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            backend_timeout_ms: Some(30_000),
            append_backoff_initial_ms: 10,
            append_backoff_max_ms: 2_000,
            sampler_seed: None,
        }
    }
}

impl RouterConfig {
    pub fn backend_timeout(&self) -> Option<Duration> {
        self.backend_timeout_ms.map(Duration::from_millis)
    }
}
