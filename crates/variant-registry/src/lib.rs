pub mod api;
pub mod errors;
pub mod loader;
pub mod model;
pub mod override_store;

pub use api::{InMemoryVariantRegistry, VariantRegistry};
pub use errors::RegistryError;
pub use loader::{load_routing_config, snapshot_from_config};
pub use model::{
    FunctionVariants, RegistrySnapshot, RetrievalCfg, RoutingConfig, Variant, VariantStatus,
    WeightOverrideSpec,
};

#[cfg(test)]
mod tests;
