use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::OptimizationTarget;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub tick_interval_secs: u64,
    pub cooldown_secs: u64,
    /// Transitions retained per target for diagnostics.
    pub history_limit: usize,
    pub targets: Vec<OptimizationTarget>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            cooldown_secs: 3_600,
            history_limit: 32,
            targets: Vec::new(),
        }
    }
}

impl OptimizerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}
