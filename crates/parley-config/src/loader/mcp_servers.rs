//! Import of `mcpServers` provider files.
//!
//! Many provider-protocol clients share a JSON file of the form
//! `{ "mcpServers": { "<id>": { "command": "...", "args": [...] } } }`.
//! Such a file becomes a layer that only touches `providers`.

use super::{ConfigLayer, ConfigLayerSource, LoadedLayer, SchemaMode, layer_io, schema};
use crate::ConfigError;
use log::debug;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

const SERVERS_KEY: &str = "mcpServers";

/// Load a provider file and translate it into a `providers` layer.
pub(super) fn load_provider_file(path: &Path) -> Result<LoadedLayer, ConfigError> {
    debug!("loading provider file (path={})", path.display());
    let contents = fs::read_to_string(path)?;
    let raw: Value = json5::from_str(&contents)?;
    let label = layer_io::layer_label(ConfigLayerSource::ProviderFile, path);
    let value = translate(raw, &label)?;
    schema::validate_layer_schema(&value, SchemaMode::Partial, &label)?;
    Ok(LoadedLayer {
        meta: ConfigLayer {
            source: ConfigLayerSource::ProviderFile,
            path: path.to_path_buf(),
        },
        value,
    })
}

fn translate(raw: Value, label: &str) -> Result<Value, ConfigError> {
    let servers = match raw {
        Value::Object(mut root) => root.remove(SERVERS_KEY),
        _ => None,
    };
    let Some(Value::Object(servers)) = servers else {
        return Err(ConfigError::InvalidField {
            path: format!("{label}:{SERVERS_KEY}"),
            message: "expected an object of servers".to_string(),
        });
    };

    let mut providers = Map::new();
    for (id, server) in servers {
        let Value::Object(server) = server else {
            return Err(ConfigError::InvalidField {
                path: format!("{label}:{SERVERS_KEY}.{id}"),
                message: "expected object".to_string(),
            });
        };
        // Only launch fields carry over; client-specific extras are dropped.
        let entry: Map<String, Value> = server
            .into_iter()
            .filter(|(key, _)| matches!(key.as_str(), "command" | "args" | "cwd" | "env"))
            .collect();
        providers.insert(id, Value::Object(entry));
    }

    let mut layer = Map::new();
    layer.insert("providers".to_string(), Value::Object(providers));
    Ok(Value::Object(layer))
}
