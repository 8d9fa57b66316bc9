use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::errors::RegistryError;
use crate::model::{RegistrySnapshot, RoutingSource, WeightOverrideSpec};
use crate::override_store::WeightOverrideStore;

#[async_trait]
pub trait VariantRegistry: Send + Sync {
    /// Lock-free read of the snapshot every new selection should use.
    fn current_snapshot(&self) -> Arc<RegistrySnapshot>;
    /// Validates and swaps in a new snapshot, returning the version it was assigned.
    fn publish(&self, snapshot: RegistrySnapshot) -> Result<u64, RegistryError>;
    fn subscribe(&self) -> watch::Receiver<Arc<RegistrySnapshot>>;
    async fn apply_weight_override(&self, spec: WeightOverrideSpec) -> Result<u64, RegistryError>;
    async fn clear_weight_override(&self, function: &str, variant: &str)
        -> Result<u64, RegistryError>;
}

struct RegistryState {
    base: RegistrySnapshot,
    overrides: WeightOverrideStore,
    version: u64,
}

impl RegistryState {
    /// Layers live overrides over `base` into a validated successor snapshot.
    fn compose(&mut self, base: &RegistrySnapshot) -> Result<RegistrySnapshot, RegistryError> {
        let mut next = base.clone();
        for ((function, variant), weight) in self.overrides.active_entries() {
            // Pins on variants dropped from the base are skipped, not fatal.
            let Some(target) = next
                .functions
                .get_mut(&function)
                .and_then(|f| f.variants.get_mut(&variant))
            else {
                continue;
            };
            target.weight = weight;
            next.set_provenance(
                &format!("{function}.{variant}.weight"),
                RoutingSource::RuntimeOverride,
            );
        }
        next.validate()?;
        next.version = self.version + 1;
        next.published_at = Utc::now();
        Ok(next)
    }
}

struct RegistryInner {
    current: ArcSwap<RegistrySnapshot>,
    state: Mutex<RegistryState>,
    watch_tx: watch::Sender<Arc<RegistrySnapshot>>,
}

impl RegistryInner {
    fn install(&self, state: &mut RegistryState, next: RegistrySnapshot) -> u64 {
        state.version = next.version;
        let snapshot = Arc::new(next);
        self.current.store(Arc::clone(&snapshot));
        // No receivers is fine; the swap above is what readers use.
        let _ = self.watch_tx.send(snapshot);
        state.version
    }
}

/// Registry backed by an atomically swapped snapshot. Publishers serialize on a mutex;
/// readers never take it.
#[derive(Clone)]
pub struct InMemoryVariantRegistry {
    inner: Arc<RegistryInner>,
}

impl InMemoryVariantRegistry {
    pub fn new(initial: RegistrySnapshot) -> Result<Self, RegistryError> {
        initial.validate()?;
        let mut snapshot = initial;
        snapshot.version = snapshot.version.max(1);
        let state = RegistryState {
            base: snapshot.clone(),
            overrides: WeightOverrideStore::default(),
            version: snapshot.version,
        };
        let snapshot = Arc::new(snapshot);
        let (watch_tx, _watch_rx) = watch::channel(Arc::clone(&snapshot));
        Ok(Self {
            inner: Arc::new(RegistryInner {
                current: ArcSwap::new(snapshot),
                state: Mutex::new(state),
                watch_tx,
            }),
        })
    }

    pub fn version(&self) -> u64 {
        self.inner.current.load().version
    }

    pub fn override_count(&self) -> usize {
        self.inner.state.lock().overrides.len()
    }

    fn expire_later(&self, function: String, variant: String, ticket: u64, ttl: Duration) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            sleep(ttl).await;
            let mut guard = inner.state.lock();
            if !guard.overrides.remove_ticket(&function, &variant, ticket) {
                return;
            }
            let base = guard.base.clone();
            match guard.compose(&base) {
                Ok(next) => {
                    let version = inner.install(&mut guard, next);
                    info!(%function, %variant, version, "weight override expired");
                }
                Err(err) => {
                    warn!(%function, %variant, "weight override expiry recompute failed: {err}");
                }
            }
        });
    }
}

#[async_trait]
impl VariantRegistry for InMemoryVariantRegistry {
    fn current_snapshot(&self) -> Arc<RegistrySnapshot> {
        self.inner.current.load_full()
    }

    fn publish(&self, snapshot: RegistrySnapshot) -> Result<u64, RegistryError> {
        snapshot.validate()?;
        let mut guard = self.inner.state.lock();
        let next = guard.compose(&snapshot)?;
        guard.base = snapshot;
        let version = self.inner.install(&mut guard, next);
        info!(version, "registry snapshot published");
        Ok(version)
    }

    fn subscribe(&self) -> watch::Receiver<Arc<RegistrySnapshot>> {
        self.inner.watch_tx.subscribe()
    }

    async fn apply_weight_override(&self, spec: WeightOverrideSpec) -> Result<u64, RegistryError> {
        if !spec.weight.is_finite() || spec.weight < 0.0 {
            return Err(RegistryError::InvalidValue(format!(
                "override weight {} is not a non-negative finite number",
                spec.weight
            )));
        }
        let ttl = (spec.ttl_seconds > 0).then(|| Duration::from_secs(spec.ttl_seconds));
        let (version, ticket) = {
            let mut guard = self.inner.state.lock();
            if guard.base.variant(&spec.function, &spec.variant).is_none() {
                return Err(RegistryError::UnknownVariant {
                    function: spec.function.clone(),
                    variant: spec.variant.clone(),
                });
            }
            let saved = guard.overrides.clone();
            let ticket = guard.overrides.insert(
                &spec.function,
                &spec.variant,
                spec.weight,
                &spec.owner,
                ttl,
            );
            let base = guard.base.clone();
            match guard.compose(&base) {
                Ok(next) => (self.inner.install(&mut guard, next), ticket),
                Err(err) => {
                    guard.overrides = saved;
                    return Err(err);
                }
            }
        };
        info!(
            function = %spec.function,
            variant = %spec.variant,
            weight = spec.weight,
            owner = %spec.owner,
            reason = %spec.reason,
            version,
            "weight override applied"
        );
        if let Some(ttl) = ttl {
            self.expire_later(spec.function, spec.variant, ticket, ttl);
        }
        Ok(version)
    }

    async fn clear_weight_override(
        &self,
        function: &str,
        variant: &str,
    ) -> Result<u64, RegistryError> {
        let mut guard = self.inner.state.lock();
        if !guard.overrides.remove(function, variant) {
            return Ok(guard.version);
        }
        let base = guard.base.clone();
        let next = guard.compose(&base)?;
        Ok(self.inner.install(&mut guard, next))
    }
}
