use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use shannon_core::{Result, ShannonError};

use crate::schema::ShannonConfig;

const ENV_PREFIX: &str = "SHANNON_";

/// Resolve the config path: explicit path > SHANNON_CONFIG env > default dir.
pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }
    if let Ok(p) = std::env::var("SHANNON_CONFIG") {
        return Some(PathBuf::from(p));
    }
    let default = dirs::config_dir()?.join("shannon").join("config.yaml");
    default.exists().then_some(default)
}

/// Load the config: YAML file (when present) overlaid by `SHANNON_*`
/// environment variables, then validated.
pub fn load(path: Option<&Path>) -> Result<ShannonConfig> {
    let mut doc = match resolve_path(path) {
        Some(p) if p.exists() => {
            info!(path = %p.display(), "loading configuration");
            let raw = std::fs::read_to_string(&p)?;
            serde_yaml::from_str::<Value>(&raw).map_err(|e| {
                ShannonError::Config(format!("failed to parse {}: {e}", p.display()))
            })?
        }
        Some(p) => {
            return Err(ShannonError::Config(format!(
                "config file not found: {}",
                p.display()
            )));
        }
        None => {
            warn!("no config file found, using defaults");
            Value::Mapping(Default::default())
        }
    };

    apply_env_overrides(&mut doc, std::env::vars());
    finish(doc)
}

/// Parse a config from a YAML string, with env overrides applied. The seam
/// used by tests.
pub fn load_from_str(
    raw: &str,
    env: impl IntoIterator<Item = (String, String)>,
) -> Result<ShannonConfig> {
    let mut doc = serde_yaml::from_str::<Value>(raw)
        .map_err(|e| ShannonError::Config(format!("failed to parse config: {e}")))?;
    apply_env_overrides(&mut doc, env);
    finish(doc)
}

fn finish(doc: Value) -> Result<ShannonConfig> {
    let config: ShannonConfig = serde_yaml::from_value(doc)
        .map_err(|e| ShannonError::Config(format!("invalid configuration: {e}")))?;
    match config.validate() {
        Ok(warnings) => {
            for w in &warnings {
                warn!("{w}");
            }
        }
        Err(e) => return Err(ShannonError::Config(e)),
    }
    Ok(config)
}

/// Overlay `SHANNON_`-prefixed environment variables onto the YAML tree.
/// Nested keys join with `__`: `SHANNON_LLM__MODEL=x` sets `llm.model`.
/// Values are parsed as YAML scalars, so numbers, booleans, and inline
/// lists work; anything unparseable stays a string.
fn apply_env_overrides(doc: &mut Value, env: impl IntoIterator<Item = (String, String)>) {
    for (key, raw) in env {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        if rest == "CONFIG" {
            continue; // path selector, not a config key
        }
        let segments: Vec<String> = rest.split("__").map(|s| s.to_lowercase()).collect();
        if segments.iter().any(|s| s.is_empty()) {
            continue;
        }
        let value =
            serde_yaml::from_str::<Value>(&raw).unwrap_or_else(|_| Value::String(raw.clone()));
        set_path(doc, &segments, value);
    }
}

fn set_path(doc: &mut Value, segments: &[String], value: Value) {
    if !matches!(doc, Value::Mapping(_)) {
        *doc = Value::Mapping(Default::default());
    }
    let Value::Mapping(map) = doc else {
        unreachable!()
    };
    let key = Value::String(segments[0].clone());
    if segments.len() == 1 {
        map.insert(key, value);
        return;
    }
    let child = map.entry(key).or_insert(Value::Mapping(Default::default()));
    set_path(child, &segments[1..], value);
}
