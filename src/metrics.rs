use lazy_static::lazy_static;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{
    core::Collector, opts, Encoder, GaugeVec, IntCounter, IntGauge, IntGaugeVec, Registry,
    TextEncoder,
};
use tracing::error;
use tunegate_optimizer::OptimizationPhase;
use tunegate_variant_registry::VariantRegistry;

use crate::errors::{GatewayError, GatewayResult};
use crate::Gateway;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

lazy_static! {
    static ref ROUTER_SELECTIONS: IntGaugeVec = IntGaugeVec::new(
        opts!("tunegate_router_selections", "Variant selections by reason"),
        &["reason"]
    )
    .expect("valid metric");
    static ref ROUTER_EVENTS: IntGaugeVec = IntGaugeVec::new(
        opts!("tunegate_router_events", "Request path outcomes"),
        &["event"]
    )
    .expect("valid metric");
    static ref LOG_ENTRIES: IntGaugeVec = IntGaugeVec::new(
        opts!("tunegate_log_entries", "Inference log appends by outcome"),
        &["outcome"]
    )
    .expect("valid metric");
    static ref LOG_COLD_PENDING: IntGauge =
        IntGauge::new("tunegate_log_cold_pending", "Entries queued for the cold sink")
            .expect("valid metric");
    static ref FEEDBACK_EVENTS: IntGaugeVec = IntGaugeVec::new(
        opts!("tunegate_feedback_submissions", "Feedback submissions by outcome"),
        &["outcome"]
    )
    .expect("valid metric");
    static ref FEEDBACK_PENDING: IntGauge = IntGauge::new(
        "tunegate_feedback_pending",
        "Feedback parked until its inference is written"
    )
    .expect("valid metric");
    static ref INDEX_OPS: IntGaugeVec = IntGaugeVec::new(
        opts!("tunegate_index_operations", "Example index operations"),
        &["op"]
    )
    .expect("valid metric");
    static ref INDEX_SIZE: IntGaugeVec = IntGaugeVec::new(
        opts!("tunegate_index_size", "Example index shape"),
        &["dimension"]
    )
    .expect("valid metric");
    static ref OPTIMIZER_EVENTS: IntGaugeVec = IntGaugeVec::new(
        opts!("tunegate_optimizer_events", "Optimization scheduler activity"),
        &["event"]
    )
    .expect("valid metric");
    static ref OPTIMIZER_TARGETS: IntGaugeVec = IntGaugeVec::new(
        opts!("tunegate_optimizer_targets", "Optimization targets per phase"),
        &["phase"]
    )
    .expect("valid metric");
    static ref REGISTRY_VERSION: IntGauge =
        IntGauge::new("tunegate_registry_version", "Published registry snapshot version")
            .expect("valid metric");
    static ref REGISTRY_OVERRIDES: IntGauge =
        IntGauge::new("tunegate_registry_overrides", "Active runtime weight overrides")
            .expect("valid metric");
    static ref VARIANT_WEIGHT: GaugeVec = GaugeVec::new(
        opts!("tunegate_variant_weight", "Routing weight per variant"),
        &["function", "variant"]
    )
    .expect("valid metric");
    static ref PROMOTIONS_TOTAL: IntCounter =
        IntCounter::new("tunegate_promotions_total", "Inferences promoted to examples")
            .expect("valid metric");
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register gateway metric");
        }
    }
}

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        register(registry, ROUTER_SELECTIONS.clone());
        register(registry, ROUTER_EVENTS.clone());
        register(registry, LOG_ENTRIES.clone());
        register(registry, LOG_COLD_PENDING.clone());
        register(registry, FEEDBACK_EVENTS.clone());
        register(registry, FEEDBACK_PENDING.clone());
        register(registry, INDEX_OPS.clone());
        register(registry, INDEX_SIZE.clone());
        register(registry, OPTIMIZER_EVENTS.clone());
        register(registry, OPTIMIZER_TARGETS.clone());
        register(registry, REGISTRY_VERSION.clone());
        register(registry, REGISTRY_OVERRIDES.clone());
        register(registry, VARIANT_WEIGHT.clone());
        register(registry, PROMOTIONS_TOTAL.clone());
    });
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

pub fn record_promotion() {
    PROMOTIONS_TOTAL.inc();
}

fn set(vec: &IntGaugeVec, label: &str, value: u64) {
    vec.with_label_values(&[label]).set(value as i64);
}

/// Copies every component's counters into the exported gauges.
pub fn refresh(gateway: &Gateway) {
    register_metrics();

    let router = gateway.router().metrics().snapshot();
    set(&ROUTER_SELECTIONS, "override", router.override_selections);
    set(&ROUTER_SELECTIONS, "episode_affinity", router.affinity_selections);
    set(&ROUTER_SELECTIONS, "weighted", router.weighted_selections);
    set(&ROUTER_EVENTS, "inference", router.inferences);
    set(&ROUTER_EVENTS, "backend_error", router.backend_errors);
    set(&ROUTER_EVENTS, "timeout", router.timeouts);
    set(&ROUTER_EVENTS, "retrieval_error", router.retrieval_errors);
    set(&ROUTER_EVENTS, "append_retry", router.append_retries);

    let log = gateway.log().metrics().snapshot();
    set(&LOG_ENTRIES, "inference", log.inferences);
    set(&LOG_ENTRIES, "feedback", log.feedback);
    set(&LOG_ENTRIES, "duplicate", log.duplicates);
    set(&LOG_ENTRIES, "rejected", log.rejected);
    set(&LOG_ENTRIES, "cold_error", log.cold_errors);
    LOG_COLD_PENDING.set(log.cold_pending as i64);

    let feedback = gateway.feedback().counters().snapshot();
    set(&FEEDBACK_EVENTS, "applied", feedback.applied);
    set(&FEEDBACK_EVENTS, "duplicate", feedback.duplicates);
    set(&FEEDBACK_EVENTS, "deferred", feedback.deferred);
    set(&FEEDBACK_EVENTS, "deferred_applied", feedback.deferred_applied);
    set(&FEEDBACK_EVENTS, "rejected", feedback.rejected);
    set(&FEEDBACK_EVENTS, "expired", feedback.expired);
    FEEDBACK_PENDING.set(gateway.feedback().pending_len() as i64);

    let index = gateway.index().metrics().snapshot();
    set(&INDEX_OPS, "upsert", index.upserts);
    set(&INDEX_OPS, "rejected", index.rejected);
    set(&INDEX_OPS, "query", index.queries);
    set(&INDEX_OPS, "seal", index.seals);
    set(&INDEX_OPS, "compaction", index.compactions);
    let stats = gateway.index().stats();
    set(&INDEX_SIZE, "partitions", stats.partitions as u64);
    set(&INDEX_SIZE, "examples", stats.examples as u64);
    set(&INDEX_SIZE, "segments", stats.segments as u64);
    set(&INDEX_SIZE, "buffered", stats.buffered as u64);

    let optimizer = gateway.optimizer().metrics().snapshot();
    set(&OPTIMIZER_EVENTS, "evaluation", optimizer.evaluations);
    set(&OPTIMIZER_EVENTS, "trigger", optimizer.triggers);
    set(&OPTIMIZER_EVENTS, "job_started", optimizer.jobs_started);
    set(&OPTIMIZER_EVENTS, "job_succeeded", optimizer.jobs_succeeded);
    set(&OPTIMIZER_EVENTS, "job_failed", optimizer.jobs_failed);
    set(&OPTIMIZER_EVENTS, "publish_rejected", optimizer.publishes_rejected);
    let states = gateway.optimizer().states();
    for phase in [
        OptimizationPhase::Idle,
        OptimizationPhase::Evaluating,
        OptimizationPhase::Triggered,
        OptimizationPhase::Running,
        OptimizationPhase::Cooldown,
    ] {
        let count = states.iter().filter(|state| state.phase == phase).count();
        set(&OPTIMIZER_TARGETS, phase_label(phase), count as u64);
    }

    let registry = gateway.registry();
    REGISTRY_VERSION.set(registry.version() as i64);
    REGISTRY_OVERRIDES.set(registry.override_count() as i64);
    let snapshot = registry.current_snapshot();
    for (function, variants) in &snapshot.functions {
        for variant in variants.variants.values() {
            VARIANT_WEIGHT
                .with_label_values(&[function.as_str(), variant.name.as_str()])
                .set(variant.weight);
        }
    }
}

fn phase_label(phase: OptimizationPhase) -> &'static str {
    match phase {
        OptimizationPhase::Idle => "idle",
        OptimizationPhase::Evaluating => "evaluating",
        OptimizationPhase::Triggered => "triggered",
        OptimizationPhase::Running => "running",
        OptimizationPhase::Cooldown => "cooldown",
    }
}

/// Prometheus text exposition of the global registry.
pub fn render() -> GatewayResult<String> {
    register_metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&global_registry().gather(), &mut buffer)
        .map_err(|err| GatewayError::Metrics(err.to_string()))?;
    String::from_utf8(buffer).map_err(|err| GatewayError::Metrics(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotions_show_up_in_exposition() {
        record_promotion();
        let text = render().unwrap();
        assert!(text.contains("tunegate_promotions_total"));
    }
}
