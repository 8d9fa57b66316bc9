//! Tunegate library
//!
//! Wires the routing, logging, retrieval, feedback and optimization crates into one
//! gateway and exposes it for the CLI and integration tests.

pub mod config;
pub mod errors;
pub mod gateway;
pub mod metrics;
pub mod promotion;
pub mod simulate;

pub use config::{GatewayConfig, LoggingConfig, PromotionConfig};
pub use errors::{GatewayError, GatewayResult};
pub use gateway::Gateway;
pub use promotion::Promoter;
