use std::collections::BTreeMap;
use std::env;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use crate::api::{InMemoryVariantRegistry, VariantRegistry};
use crate::errors::RegistryError;
use crate::loader::{load_routing_config, snapshot_from_config};
use crate::model::{
    RegistrySnapshot, RoutingConfig, RoutingSource, Variant, VariantStatus, WeightOverrideSpec,
};

fn two_variant_snapshot(a: f64, b: f64) -> RegistrySnapshot {
    let mut snapshot = RegistrySnapshot::default();
    snapshot.insert_variant("draft_response", Variant::new("a", "backend-a", a));
    snapshot.insert_variant("draft_response", Variant::new("b", "backend-b", b));
    snapshot
}

fn override_spec(variant: &str, weight: f64, ttl_seconds: u64) -> WeightOverrideSpec {
    WeightOverrideSpec {
        function: "draft_response".into(),
        variant: variant.into(),
        weight,
        owner: "ops".into(),
        reason: "unit test".into(),
        ttl_seconds,
    }
}

#[test]
fn zero_weight_publish_keeps_previous_snapshot() {
    let registry = InMemoryVariantRegistry::new(two_variant_snapshot(1.0, 1.0)).unwrap();
    let before = registry.current_snapshot();

    let err = registry
        .publish(two_variant_snapshot(0.0, 0.0))
        .unwrap_err();
    assert!(matches!(err, RegistryError::Validation(_)));

    let after = registry.current_snapshot();
    assert_eq!(after.version, before.version);
    assert_eq!(after.variant("draft_response", "a").unwrap().weight, 1.0);
}

#[test]
fn empty_snapshot_is_rejected() {
    assert!(matches!(
        InMemoryVariantRegistry::new(RegistrySnapshot::default()),
        Err(RegistryError::Validation(_))
    ));

    let registry = InMemoryVariantRegistry::new(two_variant_snapshot(1.0, 1.0)).unwrap();
    let err = registry.publish(RegistrySnapshot::default()).unwrap_err();
    assert!(matches!(err, RegistryError::Validation(_)));
    let current = registry.current_snapshot();
    assert_eq!(current.version, 1);
    assert!(current.function("draft_response").is_some());
}

#[test]
fn negative_and_nan_weights_are_rejected() {
    let registry = InMemoryVariantRegistry::new(two_variant_snapshot(1.0, 1.0)).unwrap();
    assert!(registry.publish(two_variant_snapshot(1.0, -0.5)).is_err());
    assert!(registry.publish(two_variant_snapshot(f64::NAN, 1.0)).is_err());
}

#[test]
fn shadow_weight_does_not_count_as_active() {
    let mut snapshot = RegistrySnapshot::default();
    let mut shadow = Variant::new("shadow", "backend", 5.0);
    shadow.status = VariantStatus::Shadow;
    snapshot.insert_variant("classify_intent", shadow);
    snapshot.insert_variant("classify_intent", Variant::new("live", "backend", 0.0));
    assert!(matches!(
        snapshot.validate(),
        Err(RegistryError::Validation(_))
    ));
}

#[test]
fn versions_increase_monotonically() {
    let registry = InMemoryVariantRegistry::new(two_variant_snapshot(1.0, 0.0)).unwrap();
    let first = registry.version();
    let v2 = registry.publish(two_variant_snapshot(0.0, 1.0)).unwrap();
    let v3 = registry.publish(two_variant_snapshot(1.0, 1.0)).unwrap();
    assert!(first < v2 && v2 < v3);
    assert_eq!(registry.current_snapshot().version, v3);
}

#[test]
fn captured_snapshot_survives_publish() {
    let registry = InMemoryVariantRegistry::new(two_variant_snapshot(1.0, 0.0)).unwrap();
    let held = registry.current_snapshot();
    registry.publish(two_variant_snapshot(0.0, 1.0)).unwrap();

    assert_eq!(held.variant("draft_response", "a").unwrap().weight, 1.0);
    assert_eq!(held.variant("draft_response", "b").unwrap().weight, 0.0);
    let fresh = registry.current_snapshot();
    assert_eq!(fresh.variant("draft_response", "a").unwrap().weight, 0.0);
    assert!(fresh.version > held.version);
}

#[test]
fn readers_never_observe_mixed_weights() {
    let registry = InMemoryVariantRegistry::new(two_variant_snapshot(1.0, 0.0)).unwrap();
    let reader = registry.clone();
    let handle = std::thread::spawn(move || {
        for _ in 0..10_000 {
            let snapshot = reader.current_snapshot();
            let a = snapshot.variant("draft_response", "a").unwrap().weight;
            let b = snapshot.variant("draft_response", "b").unwrap().weight;
            assert!((a, b) == (1.0, 0.0) || (a, b) == (0.0, 1.0));
        }
    });
    for i in 0..200 {
        let (a, b) = if i % 2 == 0 { (0.0, 1.0) } else { (1.0, 0.0) };
        registry.publish(two_variant_snapshot(a, b)).unwrap();
    }
    handle.join().unwrap();
}

#[test]
fn with_weights_builds_successor() {
    let snapshot = two_variant_snapshot(1.0, 1.0);
    let weights = BTreeMap::from([("b".to_string(), 3.0)]);
    let next = snapshot.with_weights("draft_response", &weights).unwrap();
    assert_eq!(next.variant("draft_response", "b").unwrap().weight, 3.0);
    assert_eq!(next.variant("draft_response", "a").unwrap().weight, 1.0);

    let unknown = BTreeMap::from([("zzz".to_string(), 1.0)]);
    assert!(matches!(
        snapshot.with_weights("draft_response", &unknown),
        Err(RegistryError::UnknownVariant { .. })
    ));
}

#[tokio::test]
async fn subscribe_streams_publishes() {
    let registry = InMemoryVariantRegistry::new(two_variant_snapshot(1.0, 0.0)).unwrap();
    let mut rx = registry.subscribe();
    let original = rx.borrow().version;

    registry.publish(two_variant_snapshot(0.0, 1.0)).unwrap();
    rx.changed().await.unwrap();
    let snapshot = Arc::clone(&rx.borrow());
    assert!(snapshot.version > original);
    assert_eq!(snapshot.variant("draft_response", "b").unwrap().weight, 1.0);
}

#[tokio::test]
async fn override_survives_publish_and_records_provenance() {
    let registry = InMemoryVariantRegistry::new(two_variant_snapshot(1.0, 1.0)).unwrap();
    registry
        .apply_weight_override(override_spec("b", 0.0, 0))
        .await
        .unwrap();
    registry.publish(two_variant_snapshot(2.0, 2.0)).unwrap();

    let snapshot = registry.current_snapshot();
    assert_eq!(snapshot.variant("draft_response", "b").unwrap().weight, 0.0);
    assert_eq!(snapshot.variant("draft_response", "a").unwrap().weight, 2.0);
    assert_eq!(
        snapshot
            .provenance
            .get("draft_response.b.weight")
            .unwrap()
            .source,
        RoutingSource::RuntimeOverride
    );

    registry
        .clear_weight_override("draft_response", "b")
        .await
        .unwrap();
    assert_eq!(
        registry
            .current_snapshot()
            .variant("draft_response", "b")
            .unwrap()
            .weight,
        2.0
    );
}

#[tokio::test]
async fn override_that_empties_function_is_rejected() {
    let registry = InMemoryVariantRegistry::new(two_variant_snapshot(1.0, 0.0)).unwrap();
    let version = registry.version();
    let err = registry
        .apply_weight_override(override_spec("a", 0.0, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Validation(_)));
    assert_eq!(registry.version(), version);
    assert_eq!(registry.override_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn override_expires_after_ttl() {
    let registry = InMemoryVariantRegistry::new(two_variant_snapshot(1.0, 1.0)).unwrap();
    registry
        .apply_weight_override(override_spec("a", 9.0, 30))
        .await
        .unwrap();
    assert_eq!(
        registry
            .current_snapshot()
            .variant("draft_response", "a")
            .unwrap()
            .weight,
        9.0
    );

    tokio::time::sleep(Duration::from_secs(31)).await;
    // Let the expiry task run.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(
        registry
            .current_snapshot()
            .variant("draft_response", "a")
            .unwrap()
            .weight,
        1.0
    );
    assert_eq!(registry.override_count(), 0);
}

#[test]
fn load_routing_config_reads_yaml() {
    let _guard = env_guard().lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("routing.yaml");
    std::fs::write(
        &file_path,
        r#"functions:
  draft_response:
    variants:
      gpt_4o:
        backend_ref: openai::gpt-4o
        weight: 0.5
      gpt_4o_mini_dicl:
        backend_ref: openai::gpt-4o-mini
        weight: 0.5
        retrieval_augmented: true
        k: 3
        namespace: billing
      legacy:
        backend_ref: openai::gpt-3.5
        status: disabled
"#,
    )
    .unwrap();

    let snapshot = load_routing_config(Some(file_path.as_path())).unwrap();
    snapshot.validate().unwrap();
    let dicl = snapshot
        .variant("draft_response", "gpt_4o_mini_dicl")
        .unwrap();
    assert!(dicl.retrieval_augmented);
    assert_eq!(dicl.retrieval.k, 3);
    assert_eq!(dicl.retrieval.namespace, "billing");
    let legacy = snapshot.variant("draft_response", "legacy").unwrap();
    assert_eq!(legacy.status, VariantStatus::Disabled);
    assert_eq!(legacy.weight, 1.0);
    assert_eq!(
        snapshot
            .provenance
            .get("draft_response.gpt_4o.weight")
            .unwrap()
            .source,
        RoutingSource::File
    );
}

#[test]
fn missing_routing_file_is_an_error() {
    let _guard = env_guard().lock().unwrap();
    let err = load_routing_config(Some(std::path::Path::new("/nonexistent/routing.yaml")))
        .unwrap_err();
    assert!(matches!(err, RegistryError::Io(_)));
}

#[test]
fn env_overlay_replaces_weight() {
    let _guard = env_guard().lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("routing.yaml");
    std::fs::write(
        &file_path,
        r#"functions:
  classify_intent:
    variants:
      baseline:
        backend_ref: local
        weight: 1.0
"#,
    )
    .unwrap();

    let key = "TUNEGATE_ROUTING__CLASSIFY_INTENT__BASELINE__WEIGHT";
    env::set_var(key, "0.25");
    let snapshot = load_routing_config(Some(file_path.as_path()));
    env::remove_var(key);
    let snapshot = snapshot.unwrap();
    assert_eq!(
        snapshot.variant("classify_intent", "baseline").unwrap().weight,
        0.25
    );
    assert_eq!(
        snapshot
            .provenance
            .get("classify_intent.baseline.weight")
            .unwrap()
            .source,
        RoutingSource::Env
    );
}

#[test]
fn snapshot_from_config_marks_builtin() {
    let config: RoutingConfig = serde_yaml::from_str(
        r#"functions:
  summarize:
    variants:
      only:
        backend_ref: local
"#,
    )
    .unwrap();
    let snapshot = snapshot_from_config(config);
    assert_eq!(snapshot.variant("summarize", "only").unwrap().weight, 1.0);
    assert_eq!(
        snapshot
            .provenance
            .get("summarize.only.backend_ref")
            .unwrap()
            .source,
        RoutingSource::Builtin
    );
}

fn env_guard() -> &'static Mutex<()> {
    static ENV_GUARD: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_GUARD.get_or_init(|| Mutex::new(()))
}
