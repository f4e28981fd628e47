//! Configuration loading from `~/.conduit/config.toml` with defaults.
//!
//! A config may list `include = ["services.toml", ...]`. Included files are
//! deep-merged in order and the including file overrides them. Includes must
//! be relative paths inside the config directory; cycles are rejected.

use conduit_types::config::ConduitConfig;
use conduit_types::ConduitError;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

/// Maximum include nesting depth.
const MAX_INCLUDE_DEPTH: u32 = 10;

/// Load configuration, falling back to defaults on any problem.
///
/// `None` reads [`default_config_path`]. A missing file is not an error.
pub fn load_config(path: Option<&Path>) -> ConduitConfig {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return ConduitConfig::default();
    }

    match try_load_config(&config_path) {
        Ok(config) => {
            info!(
                path = %config_path.display(),
                services = config.services.len(),
                "Loaded configuration"
            );
            config
        }
        Err(e) => {
            warn!(error = %e, path = %config_path.display(), "Invalid config, using defaults");
            ConduitConfig::default()
        }
    }
}

/// Load and validate one config file, including its includes.
pub fn try_load_config(config_path: &Path) -> Result<ConduitConfig, ConduitError> {
    let mut root = read_toml(config_path)?;
    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    let mut visited = HashSet::new();
    visited.insert(std::fs::canonicalize(config_path).unwrap_or_else(|_| config_path.to_path_buf()));
    resolve_includes(&mut root, config_dir, &mut visited, 0)?;

    let config = root
        .try_into::<ConduitConfig>()
        .map_err(|e| ConduitError::Config(format!("{}: {e}", config_path.display())))?;
    validate(&config)?;
    Ok(config)
}

fn read_toml(path: &Path) -> Result<toml::Value, ConduitError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConduitError::Config(format!("cannot read {}: {e}", path.display())))?;
    toml::from_str(&contents)
        .map_err(|e| ConduitError::Config(format!("cannot parse {}: {e}", path.display())))
}

fn take_includes(value: &mut toml::Value) -> Vec<String> {
    let Some(table) = value.as_table_mut() else {
        return Vec::new();
    };
    match table.remove("include") {
        Some(toml::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        Some(toml::Value::String(single)) => vec![single],
        _ => Vec::new(),
    }
}

/// Replace `value` with `includes ⊕ value`, recursively.
fn resolve_includes(
    value: &mut toml::Value,
    dir: &Path,
    visited: &mut HashSet<PathBuf>,
    depth: u32,
) -> Result<(), ConduitError> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(ConduitError::Config(format!(
            "config includes nest deeper than {MAX_INCLUDE_DEPTH}"
        )));
    }

    let includes = take_includes(value);
    if includes.is_empty() {
        return Ok(());
    }

    let mut merged = toml::Value::Table(toml::map::Map::new());
    for include in &includes {
        let canonical = checked_include_path(dir, include)?;
        if !visited.insert(canonical.clone()) {
            return Err(ConduitError::Config(format!(
                "circular config include: {include}"
            )));
        }
        info!(include = %include, "Loading config include");

        let mut included = read_toml(&canonical)?;
        let include_dir = canonical.parent().unwrap_or(dir).to_path_buf();
        resolve_includes(&mut included, &include_dir, visited, depth + 1)?;
        deep_merge_toml(&mut merged, &included);
    }

    deep_merge_toml(&mut merged, value);
    *value = merged;
    Ok(())
}

/// Resolve an include against `dir`, rejecting anything that could leave it.
fn checked_include_path(dir: &Path, include: &str) -> Result<PathBuf, ConduitError> {
    let relative = Path::new(include);
    if relative.is_absolute() {
        return Err(ConduitError::Config(format!(
            "config include must be relative: {include}"
        )));
    }
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ConduitError::Config(format!(
            "config include may not contain '..': {include}"
        )));
    }

    let canonical = std::fs::canonicalize(dir.join(relative))
        .map_err(|e| ConduitError::Config(format!("config include '{include}': {e}")))?;
    let canonical_dir = std::fs::canonicalize(dir)
        .map_err(|e| ConduitError::Config(format!("config dir {}: {e}", dir.display())))?;
    if !canonical.starts_with(&canonical_dir) {
        return Err(ConduitError::Config(format!(
            "config include '{include}' escapes the config directory"
        )));
    }
    Ok(canonical)
}

/// Deep-merge two TOML values. Tables merge key by key; anything else is
/// replaced by `overlay`.
pub fn deep_merge_toml(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, overlay_val) in overlay_tbl {
                match base_tbl.get_mut(key) {
                    Some(base_val) => deep_merge_toml(base_val, overlay_val),
                    None => {
                        base_tbl.insert(key.clone(), overlay_val.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

fn validate(config: &ConduitConfig) -> Result<(), ConduitError> {
    if config.domain.is_empty() || config.domain.contains('.') {
        return Err(ConduitError::Config(format!(
            "domain '{}' must be a single non-empty subject segment",
            config.domain
        )));
    }
    if config.retry.min_delay_ms > config.retry.max_delay_ms {
        return Err(ConduitError::Config(format!(
            "retry.min_delay_ms ({}) exceeds retry.max_delay_ms ({})",
            config.retry.min_delay_ms, config.retry.max_delay_ms
        )));
    }
    if !(0.0..=1.0).contains(&config.retry.jitter) {
        return Err(ConduitError::Config(format!(
            "retry.jitter must be within 0.0..=1.0, got {}",
            config.retry.jitter
        )));
    }
    let mut seen = HashSet::new();
    for service in &config.services {
        if service.name.is_empty() || service.name.contains('.') {
            return Err(ConduitError::Config(format!(
                "service name '{}' must be a single non-empty subject segment",
                service.name
            )));
        }
        if !seen.insert(service.name.as_str()) {
            return Err(ConduitError::Config(format!(
                "service '{}' is declared twice",
                service.name
            )));
        }
    }
    Ok(())
}

/// `~/.conduit/config.toml`, or under the temp dir when there is no home.
pub fn default_config_path() -> PathBuf {
    conduit_home().join("config.toml")
}

/// The Conduit home directory.
pub fn conduit_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".conduit")
}
