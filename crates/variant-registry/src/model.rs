use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RegistryError;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantStatus {
    #[default]
    Active,
    /// Selectable only by explicit override; never drawn by weight.
    Shadow,
    Disabled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalCfg {
    pub k: usize,
    pub namespace: String,
}

impl Default for RetrievalCfg {
    fn default() -> Self {
        Self {
            k: 5,
            namespace: "default".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    pub backend_ref: String,
    pub weight: f64,
    #[serde(default)]
    pub retrieval_augmented: bool,
    #[serde(default)]
    pub status: VariantStatus,
    #[serde(default)]
    pub retrieval: RetrievalCfg,
}

impl Variant {
    pub fn new(name: impl Into<String>, backend_ref: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            backend_ref: backend_ref.into(),
            weight,
            retrieval_augmented: false,
            status: VariantStatus::Active,
            retrieval: RetrievalCfg::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == VariantStatus::Active
    }

    pub fn is_selectable(&self) -> bool {
        self.status != VariantStatus::Disabled
    }
}

/// Variants of one function, ordered by name so weighted draws are reproducible.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionVariants {
    pub variants: BTreeMap<String, Variant>,
}

impl FunctionVariants {
    pub fn get(&self, name: &str) -> Option<&Variant> {
        self.variants.get(name)
    }

    pub fn active(&self) -> impl Iterator<Item = &Variant> {
        self.variants.values().filter(|variant| variant.is_active())
    }

    pub fn active_weight(&self) -> f64 {
        self.active().map(|variant| variant.weight).sum()
    }
}

/// Immutable view of every function's variants. Replaced wholesale, never edited in place.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub version: u64,
    pub published_at: DateTime<Utc>,
    pub functions: BTreeMap<String, FunctionVariants>,
    #[serde(default)]
    pub provenance: HashMap<String, RoutingProvenance>,
}

impl Default for RegistrySnapshot {
    fn default() -> Self {
        Self {
            version: 0,
            published_at: Utc::now(),
            functions: BTreeMap::new(),
            provenance: HashMap::new(),
        }
    }
}

impl RegistrySnapshot {
    pub fn function(&self, name: &str) -> Option<&FunctionVariants> {
        self.functions.get(name)
    }

    pub fn variant(&self, function: &str, variant: &str) -> Option<&Variant> {
        self.functions.get(function).and_then(|f| f.get(variant))
    }

    pub fn insert_variant(&mut self, function: impl Into<String>, variant: Variant) {
        self.functions
            .entry(function.into())
            .or_default()
            .variants
            .insert(variant.name.clone(), variant);
    }

    /// Successor snapshot with the given weights applied to one function.
    pub fn with_weights(
        &self,
        function: &str,
        weights: &BTreeMap<String, f64>,
    ) -> Result<RegistrySnapshot, RegistryError> {
        let mut next = self.clone();
        let entry = next.functions.get_mut(function).ok_or_else(|| {
            RegistryError::Validation(format!("unknown function {function}"))
        })?;
        for (name, weight) in weights {
            let variant =
                entry
                    .variants
                    .get_mut(name)
                    .ok_or_else(|| RegistryError::UnknownVariant {
                        function: function.to_string(),
                        variant: name.clone(),
                    })?;
            variant.weight = *weight;
        }
        Ok(next)
    }

    /// Checks that at least one function is routed and every function stays selectable:
    /// weights are finite and non-negative, and active weights sum above zero.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.functions.is_empty() {
            return Err(RegistryError::Validation(
                "snapshot routes no functions".into(),
            ));
        }
        for (function, variants) in &self.functions {
            if variants.variants.is_empty() {
                return Err(RegistryError::Validation(format!(
                    "function {function} has no variants"
                )));
            }
            for (name, variant) in &variants.variants {
                if name != &variant.name {
                    return Err(RegistryError::Validation(format!(
                        "variant key {name} does not match name {}",
                        variant.name
                    )));
                }
                if !variant.weight.is_finite() || variant.weight < 0.0 {
                    return Err(RegistryError::Validation(format!(
                        "variant {function}/{name} has invalid weight {}",
                        variant.weight
                    )));
                }
                if variant.retrieval_augmented && variant.retrieval.k == 0 {
                    return Err(RegistryError::Validation(format!(
                        "retrieval-augmented variant {function}/{name} requests zero exemplars"
                    )));
                }
            }
            if variants.active_weight() <= 0.0 {
                return Err(RegistryError::Validation(format!(
                    "function {function} has zero total weight across active variants"
                )));
            }
        }
        Ok(())
    }

    pub fn set_provenance(&mut self, path: &str, source: RoutingSource) {
        self.provenance.insert(
            path.to_string(),
            RoutingProvenance {
                path: path.to_string(),
                source,
            },
        );
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingProvenance {
    pub path: String,
    pub source: RoutingSource,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoutingSource {
    Builtin,
    File,
    Env,
    RuntimeOverride,
    Optimizer,
}

/// On-disk routing configuration: `functions.<fn>.variants.<name>`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionConfig {
    #[serde(default)]
    pub variants: BTreeMap<String, VariantConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariantConfig {
    pub backend_ref: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub retrieval_augmented: bool,
    #[serde(default)]
    pub status: VariantStatus,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub namespace: Option<String>,
}

fn default_weight() -> f64 {
    1.0
}

/// Operator pin of one variant's weight, optionally expiring.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WeightOverrideSpec {
    pub function: String,
    pub variant: String,
    pub weight: f64,
    pub owner: String,
    pub reason: String,
    pub ttl_seconds: u64,
}
