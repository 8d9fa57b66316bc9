use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::RegistryError;
use crate::model::{
    RegistrySnapshot, RetrievalCfg, RoutingConfig, RoutingSource, Variant, VariantStatus,
};

const ENV_PREFIX: &str = "TUNEGATE_ROUTING__";

#[derive(Debug, Default)]
pub struct LoadOptions {
    pub paths: Vec<PathBuf>,
    pub include_env: bool,
}

impl LoadOptions {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            paths: vec![path.into()],
            include_env: true,
        }
    }
}

/// Loads the routing file (if any) and applies `TUNEGATE_ROUTING__<FN>__<VARIANT>__<FIELD>`
/// environment overlays on top.
pub fn load_routing_config(path: Option<&Path>) -> Result<RegistrySnapshot, RegistryError> {
    let mut options = LoadOptions {
        include_env: true,
        ..LoadOptions::default()
    };
    if let Some(p) = path {
        options.paths.push(p.to_path_buf());
    }
    load_with_options(&options)
}

pub fn load_with_options(options: &LoadOptions) -> Result<RegistrySnapshot, RegistryError> {
    let mut snapshot = RegistrySnapshot::default();
    for path in &options.paths {
        if !path.exists() {
            return Err(RegistryError::Io(format!(
                "routing file {} not found",
                path.display()
            )));
        }
        let config = read_config_file(path)?;
        merge_config(&mut snapshot, config, RoutingSource::File);
    }

    if options.include_env {
        for (path, value) in overlays_from_env() {
            apply_overlay(&mut snapshot, &path, &value, RoutingSource::Env)?;
        }
    }
    Ok(snapshot)
}

pub fn snapshot_from_config(config: RoutingConfig) -> RegistrySnapshot {
    let mut snapshot = RegistrySnapshot::default();
    merge_config(&mut snapshot, config, RoutingSource::Builtin);
    snapshot
}

fn read_config_file(path: &Path) -> Result<RoutingConfig, RegistryError> {
    let content = fs::read_to_string(path).map_err(|err| RegistryError::Io(err.to_string()))?;
    serde_yaml::from_str(&content).map_err(|err| RegistryError::Invalid(err.to_string()))
}

fn merge_config(snapshot: &mut RegistrySnapshot, config: RoutingConfig, source: RoutingSource) {
    for (function, function_cfg) in config.functions {
        for (name, cfg) in function_cfg.variants {
            let variant = Variant {
                name: name.clone(),
                backend_ref: cfg.backend_ref,
                weight: cfg.weight,
                retrieval_augmented: cfg.retrieval_augmented,
                status: cfg.status,
                retrieval: RetrievalCfg {
                    k: cfg.k.unwrap_or_else(|| RetrievalCfg::default().k),
                    namespace: cfg
                        .namespace
                        .unwrap_or_else(|| RetrievalCfg::default().namespace),
                },
            };
            for field in ["backend_ref", "weight", "retrieval_augmented", "status"] {
                snapshot.set_provenance(&format!("{function}.{name}.{field}"), source);
            }
            snapshot.insert_variant(function.clone(), variant);
        }
    }
}

/// Applies one `function.variant.field` assignment.
pub(crate) fn apply_overlay(
    snapshot: &mut RegistrySnapshot,
    path: &str,
    value: &Value,
    source: RoutingSource,
) -> Result<(), RegistryError> {
    let mut parts = path.rsplitn(3, '.');
    let (field, variant_name, function) = match (parts.next(), parts.next(), parts.next()) {
        (Some(field), Some(variant), Some(function)) => (field, variant, function),
        _ => return Err(RegistryError::UnsupportedPath(path.to_string())),
    };
    let variant = snapshot
        .functions
        .get_mut(function)
        .and_then(|f| f.variants.get_mut(variant_name))
        .ok_or_else(|| RegistryError::UnknownVariant {
            function: function.to_string(),
            variant: variant_name.to_string(),
        })?;
    match field {
        "weight" => variant.weight = to_f64(value)?,
        "backend_ref" => variant.backend_ref = to_string(value)?,
        "retrieval_augmented" => variant.retrieval_augmented = to_bool(value)?,
        "status" => variant.status = to_status(value)?,
        "k" => variant.retrieval.k = to_f64(value)? as usize,
        "namespace" => variant.retrieval.namespace = to_string(value)?,
        other => return Err(RegistryError::UnsupportedPath(other.to_string())),
    }
    debug!(path, ?source, "routing overlay applied");
    snapshot.set_provenance(path, source);
    Ok(())
}

fn overlays_from_env() -> Vec<(String, Value)> {
    let mut overlays = Vec::new();
    for (key, raw) in env::vars() {
        if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
            let path = stripped
                .split("__")
                .filter(|segment| !segment.is_empty())
                .map(|segment| segment.to_ascii_lowercase())
                .collect::<Vec<_>>()
                .join(".");
            if path.is_empty() {
                continue;
            }
            overlays.push((path, parse_env_value(&raw)));
        }
    }
    overlays.sort_by(|a, b| a.0.cmp(&b.0));
    overlays
}

fn parse_env_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
        return parsed;
    }
    Value::String(raw.to_string())
}

fn to_f64(value: &Value) -> Result<f64, RegistryError> {
    value
        .as_f64()
        .ok_or_else(|| RegistryError::InvalidValue(format!("expected number, got {value}")))
}

fn to_bool(value: &Value) -> Result<bool, RegistryError> {
    value
        .as_bool()
        .ok_or_else(|| RegistryError::InvalidValue(format!("expected bool, got {value}")))
}

fn to_string(value: &Value) -> Result<String, RegistryError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RegistryError::InvalidValue(format!("expected string, got {value}")))
}

fn to_status(value: &Value) -> Result<VariantStatus, RegistryError> {
    serde_json::from_value(value.clone())
        .map_err(|_| RegistryError::InvalidValue(format!("expected variant status, got {value}")))
}
