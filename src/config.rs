//! Gateway configuration: one serde tree, layered from defaults, an optional file and
//! `TUNEGATE__`-prefixed environment variables (`TUNEGATE__ROUTER__SAMPLER_SEED=7`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tunegate_example_index::IndexConfig;
use tunegate_feedback::FeedbackConfig;
use tunegate_inference_log::LogPolicyView;
use tunegate_optimizer::OptimizerConfig;
use tunegate_router::RouterConfig;

use crate::errors::{GatewayError, GatewayResult};

const ENV_PREFIX: &str = "TUNEGATE";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub logging: LoggingConfig,
    pub log: LogPolicyView,
    pub index: IndexConfig,
    pub router: RouterConfig,
    pub feedback: FeedbackConfig,
    pub promotion: PromotionConfig,
    pub optimizer: OptimizerConfig,
    /// Routing YAML handed to the registry as its initial snapshot.
    pub routing_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Which feedback turns an inference into a stored example.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    pub enabled: bool,
    pub metrics: Vec<String>,
    /// Numeric values at or above this count as positive. Booleans project to 0/1.
    pub min_value: f64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics: vec!["intent_accuracy".into(), "demonstration".into()],
            min_value: 0.5,
        }
    }
}

impl PromotionConfig {
    pub fn watches(&self, metric: &str) -> bool {
        self.enabled && self.metrics.iter().any(|name| name == metric)
    }
}

impl GatewayConfig {
    /// Layers `path` (YAML, TOML or JSON by extension) and the environment over defaults.
    pub fn load(path: Option<&Path>) -> GatewayResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(GatewayError::Config(format!(
                    "config file {} not found",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );
        let cfg: GatewayConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.index.buffer_capacity == 0 {
            return Err(GatewayError::Config(
                "index.buffer_capacity must be positive".into(),
            ));
        }
        if self.feedback.pending_ttl_secs == 0 {
            return Err(GatewayError::Config(
                "feedback.pending_ttl_secs must be positive".into(),
            ));
        }
        if !self.promotion.min_value.is_finite() {
            return Err(GatewayError::Config("promotion.min_value must be finite".into()));
        }
        for metric in &self.promotion.metrics {
            if !self.feedback.metrics.iter().any(|m| &m.name == metric) {
                return Err(GatewayError::Config(format!(
                    "promotion metric {metric} is not a configured feedback metric"
                )));
            }
        }
        for target in &self.optimizer.targets {
            if !self.feedback.metrics.iter().any(|m| m.name == target.metric) {
                return Err(GatewayError::Config(format!(
                    "optimization target {}:{} tracks an unknown metric",
                    target.function, target.metric
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn defaults_without_sources() {
        let cfg = GatewayConfig::load(None).unwrap();
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.promotion.watches("intent_accuracy"));
        assert!(cfg.routing_path.is_none());
    }

    #[test]
    #[serial]
    fn file_and_env_layers() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "router:\n  sampler_seed: 11\noptimizer:\n  cooldown_secs: 5\n  targets:\n    - function: classify\n      metric: intent_accuracy\n      policy:\n        kind: mean_below\n        target: 0.5\n"
        )
        .unwrap();
        std::env::set_var("TUNEGATE__INDEX__BUFFER_CAPACITY", "8");
        let cfg = GatewayConfig::load(Some(file.path()));
        std::env::remove_var("TUNEGATE__INDEX__BUFFER_CAPACITY");
        let cfg = cfg.unwrap();
        assert_eq!(cfg.router.sampler_seed, Some(11));
        assert_eq!(cfg.optimizer.cooldown_secs, 5);
        assert_eq!(cfg.optimizer.targets.len(), 1);
        assert_eq!(cfg.optimizer.targets[0].min_samples, 100);
        assert_eq!(cfg.index.buffer_capacity, 8);
    }

    #[test]
    #[serial]
    fn unknown_promotion_metric_is_rejected() {
        let mut cfg = GatewayConfig::default();
        cfg.promotion.metrics.push("vibes".into());
        assert!(matches!(cfg.validate(), Err(GatewayError::Config(_))));
    }

    #[test]
    #[serial]
    fn zero_pending_ttl_is_rejected() {
        let mut cfg = GatewayConfig::default();
        cfg.feedback.pending_ttl_secs = 0;
        assert!(matches!(cfg.validate(), Err(GatewayError::Config(_))));
    }

    #[test]
    #[serial]
    fn missing_file_is_an_error() {
        let err = GatewayConfig::load(Some(Path::new("/nonexistent/tunegate.yaml")));
        assert!(err.is_err());
    }
}
