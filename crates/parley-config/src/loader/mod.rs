//! Layered configuration loader with locked requirements.
//!
//! Discovers configuration layers (system/user/project/etc), validates schema,
//! merges them under the requirements constraints, and produces a final
//! `ParleyConfig`.

mod layer_io;
mod mcp_servers;
mod merge;
mod schema;
mod utils;


use crate::{ConfigError, ParleyConfig};
use log::{debug, info};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Default config filename in local layers.
const DEFAULT_CONFIG_FILE: &str = "parley.json5";
/// Default config directory under user or repo roots.
const DEFAULT_CONFIG_DIR: &str = ".parley";
/// Marker files/dirs that identify a project root.
const DEFAULT_PROJECT_ROOT_MARKERS: &[&str] = &[".git"];

#[cfg(not(windows))]
const SYSTEM_CONFIG_PATH: &str = "/etc/parley/parley.json5";
#[cfg(not(windows))]
const SYSTEM_REQUIREMENTS_PATH: &str = "/etc/parley/requirements.json5";
#[cfg(windows)]
const SYSTEM_CONFIG_PATH: &str = "C:\\ProgramData\\parley\\parley.json5";
#[cfg(windows)]
const SYSTEM_REQUIREMENTS_PATH: &str = "C:\\ProgramData\\parley\\requirements.json5";

/// Effective config plus metadata about which layers were loaded.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    /// The merged, validated config.
    pub config: ParleyConfig,
    /// Metadata for each layer that contributed to the config.
    pub layers: Vec<ConfigLayer>,
}

/// Origin for a single config layer in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayerSource {
    /// Locked values no other layer may override.
    Requirements,
    System,
    User,
    /// Project root configuration.
    Project,
    /// Current working directory configuration.
    Cwd,
    /// Repo-local `.parley` directory.
    Repo,
    /// `mcpServers` provider file.
    ProviderFile,
    /// Runtime overrides (highest precedence).
    Runtime,
}

impl ConfigLayerSource {
    fn label(&self) -> &'static str {
        match self {
            ConfigLayerSource::Requirements => "requirements",
            ConfigLayerSource::System => "system",
            ConfigLayerSource::User => "user",
            ConfigLayerSource::Project => "project",
            ConfigLayerSource::Cwd => "cwd",
            ConfigLayerSource::Repo => "repo",
            ConfigLayerSource::ProviderFile => "providers",
            ConfigLayerSource::Runtime => "runtime",
        }
    }
}

/// Metadata about a loaded config layer.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    pub source: ConfigLayerSource,
    /// Location on disk.
    pub path: PathBuf,
}

/// Schema validation mode for layered configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchemaMode {
    /// Individual layers may omit required provider fields.
    Partial,
    /// The effective config must be complete.
    Full,
}

/// Options controlling layered config discovery and overrides.
#[derive(Debug, Clone)]
pub struct LayeredConfigOptions {
    /// Working directory used to resolve local layers.
    pub cwd: PathBuf,
    pub system_config_path: Option<PathBuf>,
    /// Optional user config path (defaults to `~/.parley/parley.json5`).
    pub user_config_path: Option<PathBuf>,
    /// Optional requirements path for locked settings.
    pub requirements_path: Option<PathBuf>,
    /// Runtime override config paths applied last.
    pub runtime_paths: Vec<PathBuf>,
    /// `mcpServers`-style provider files merged into `providers` before runtime layers.
    pub provider_files: Vec<PathBuf>,
    /// Marker files/dirs used to detect the project root.
    pub project_root_markers: Vec<String>,
}

impl LayeredConfigOptions {
    /// Create options with default layer locations for the provided cwd.
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            system_config_path: layer_io::default_system_config_path(),
            user_config_path: layer_io::default_user_config_path(),
            requirements_path: layer_io::default_requirements_path(),
            runtime_paths: Vec::new(),
            provider_files: Vec::new(),
            project_root_markers: DEFAULT_PROJECT_ROOT_MARKERS
                .iter()
                .map(|marker| marker.to_string())
                .collect(),
        }
    }

    /// Options that only read the given runtime paths, skipping system and user layers.
    pub fn isolated(cwd: impl AsRef<Path>) -> Self {
        Self {
            system_config_path: None,
            user_config_path: None,
            requirements_path: None,
            ..Self::new(cwd)
        }
    }

    /// Add a runtime override config path that is applied last.
    pub fn with_runtime_path(mut self, path: impl AsRef<Path>) -> Self {
        self.runtime_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Add an `mcpServers` provider file.
    pub fn with_provider_file(mut self, path: impl AsRef<Path>) -> Self {
        self.provider_files.push(path.as_ref().to_path_buf());
        self
    }
}

impl ParleyConfig {
    /// Load a single config from a path (no layering).
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        info!("loading config from path: {}", path.as_ref().display());
        let contents = fs::read_to_string(path)?;
        Self::load_from_str(&contents)
    }

    /// Load a single config from JSON5 contents (no layering).
    pub fn load_from_str(contents: &str) -> Result<Self, ConfigError> {
        debug!("loading config from raw contents (len={})", contents.len());
        let value: Value = json5::from_str(contents)?;
        config_from_value(value, "config")
    }

    /// Load a layered config stack using the default layer locations.
    pub fn load_layered(cwd: impl AsRef<Path>) -> Result<LayeredConfig, ConfigError> {
        Self::load_layered_with_options(LayeredConfigOptions::new(cwd))
    }

    /// Load a layered config stack using explicit layer locations and overrides.
    ///
    /// Layer precedence (low -> high): system, user, project, cwd, repo,
    /// provider files, runtime overrides. Values present in the requirements
    /// layer win over all of them.
    pub fn load_layered_with_options(
        options: LayeredConfigOptions,
    ) -> Result<LayeredConfig, ConfigError> {
        let cwd = utils::normalize_path(&options.cwd)?;
        debug!("normalized cwd for config load: {}", cwd.display());
        let mut layers = Vec::new();
        let mut overlays = Vec::new();

        let requirements = layer_io::load_optional_layer(
            ConfigLayerSource::Requirements,
            options.requirements_path.as_deref(),
        )?;
        let constraints = requirements.as_ref().map(|layer| layer.value.clone());
        if let Some(layer) = requirements {
            layers.push(layer.meta);
        }

        for (source, path) in [
            (
                ConfigLayerSource::System,
                options.system_config_path.as_deref(),
            ),
            (ConfigLayerSource::User, options.user_config_path.as_deref()),
        ] {
            if let Some(layer) = layer_io::load_optional_layer(source, path)? {
                layers.push(layer.meta.clone());
                overlays.push(layer);
            }
        }

        let mut seen_paths = HashSet::new();
        for (source, path) in local_layer_candidates(&cwd, &options.project_root_markers) {
            if !path.exists() {
                debug!(
                    "skipping missing layer (source={:?}, path={})",
                    source,
                    path.display()
                );
                continue;
            }
            if !seen_paths.insert(utils::unique_path(&path)) {
                debug!(
                    "skipping duplicate layer (source={:?}, path={})",
                    source,
                    path.display()
                );
                continue;
            }
            let layer = layer_io::load_required_layer(source, &path)?;
            layers.push(layer.meta.clone());
            overlays.push(layer);
        }

        for path in &options.provider_files {
            let layer = mcp_servers::load_provider_file(path)?;
            layers.push(layer.meta.clone());
            overlays.push(layer);
        }

        for path in &options.runtime_paths {
            let layer = layer_io::load_required_layer(ConfigLayerSource::Runtime, path)?;
            layers.push(layer.meta.clone());
            overlays.push(layer);
        }

        let mut merged = Value::Object(serde_json::Map::new());
        if let Some(constraints) = &constraints {
            merge::merge_json_values(&mut merged, constraints);
        }
        for layer in overlays {
            merge::merge_json_with_constraints(&mut merged, &layer.value, constraints.as_ref());
        }

        let config = config_from_value(merged, "effective")?;
        info!(
            "layered config loaded (layers={}, providers={})",
            layers.len(),
            config.providers.len()
        );
        Ok(LayeredConfig { config, layers })
    }

    /// Validate invariants that cannot be expressed in serde.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::Invalid(
                "sessions.max_sessions must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.max_tool_round_trips == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.max_tool_round_trips must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.tool_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.tool_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.sessions.save_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sessions.save_interval_secs must be at least 1".to_string(),
            ));
        }
        for (id, provider) in &self.providers {
            if !is_valid_provider_id(id) {
                return Err(ConfigError::InvalidField {
                    path: format!("providers.{id}"),
                    message: "provider ids may only contain letters, digits, '_' and '-'"
                        .to_string(),
                });
            }
            if provider.command.trim().is_empty() {
                return Err(ConfigError::InvalidField {
                    path: format!("providers.{id}.command"),
                    message: "command must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Internal representation of a loaded config layer.
#[derive(Debug, Clone)]
struct LoadedLayer {
    meta: ConfigLayer,
    value: Value,
}

fn is_valid_provider_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

/// Local layer candidates in precedence order.
fn local_layer_candidates(cwd: &Path, markers: &[String]) -> Vec<(ConfigLayerSource, PathBuf)> {
    let project_root = utils::find_project_root(cwd, markers);
    let mut candidates = Vec::new();
    match project_root.as_ref() {
        Some(root) => {
            debug!("resolved project root: {}", root.display());
            candidates.push((ConfigLayerSource::Project, root.join(DEFAULT_CONFIG_FILE)));
        }
        None => debug!("project root not found; skipping project/repo layers"),
    }
    candidates.push((ConfigLayerSource::Cwd, cwd.join(DEFAULT_CONFIG_FILE)));
    if let Some(root) = project_root {
        candidates.push((
            ConfigLayerSource::Repo,
            root.join(DEFAULT_CONFIG_DIR).join(DEFAULT_CONFIG_FILE),
        ));
    }
    candidates
}

fn config_from_value(value: Value, label: &str) -> Result<ParleyConfig, ConfigError> {
    schema::validate_layer_schema(&value, SchemaMode::Full, label)?;
    let config: ParleyConfig = serde_json::from_value(value)?;
    config.validate()?;
    Ok(config)
}
