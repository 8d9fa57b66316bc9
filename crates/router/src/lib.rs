pub mod api;
pub mod backend;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod sampler;

pub use api::Router;
pub use backend::{Backend, BackendContext, BackendError};
pub use config::RouterConfig;
pub use errors::RouterError;
pub use metrics::{RouterMetricSnapshot, RouterMetrics};
pub use model::{InferenceRequest, InferenceResponse, Selection};
pub use sampler::WeightedSampler;
