//! Schema validation helpers for Parley JSON5 configuration.

use super::SchemaMode;
use crate::ConfigError;
use serde_json::{Map, Value};

/// Validate a single config layer against the schema.
pub(super) fn validate_layer_schema(
    value: &Value,
    mode: SchemaMode,
    layer: &str,
) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, "")?;
    ensure_allowed_keys(
        map,
        &[
            "$schema",
            "providers",
            "sessions",
            "orchestrator",
            "completion",
            "server",
        ],
        layer,
        "",
    )?;

    if let Some(value) = map.get("$schema") {
        expect_string(value, layer, "$schema")?;
    }
    if let Some(value) = map.get("providers") {
        validate_providers(value, mode, layer, "providers")?;
    }
    if let Some(value) = map.get("sessions") {
        validate_sessions(value, layer, "sessions")?;
    }
    if let Some(value) = map.get("orchestrator") {
        validate_orchestrator(value, layer, "orchestrator")?;
    }
    if let Some(value) = map.get("completion") {
        validate_completion(value, layer, "completion")?;
    }
    if let Some(value) = map.get("server") {
        validate_server(value, layer, "server")?;
    }
    Ok(())
}

/// Validate the "providers" map.
fn validate_providers(
    value: &Value,
    mode: SchemaMode,
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    for (id, entry) in map {
        validate_provider(entry, mode, layer, &join_path(path, id))?;
    }
    Ok(())
}

/// Validate a single provider launch spec.
fn validate_provider(
    value: &Value,
    mode: SchemaMode,
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["command", "args", "cwd", "env", "enabled"], layer, path)?;

    let command_path = join_path(path, "command");
    match map.get("command") {
        Some(value) => expect_string(value, layer, &command_path)?,
        None if mode == SchemaMode::Full => {
            return Err(invalid_field(layer, &command_path, "missing required field"));
        }
        None => {}
    }
    if let Some(value) = map.get("args") {
        validate_string_array(value, layer, &join_path(path, "args"))?;
    }
    if let Some(value) = map.get("cwd") {
        expect_string(value, layer, &join_path(path, "cwd"))?;
    }
    if let Some(value) = map.get("env") {
        let env_path = join_path(path, "env");
        let env = expect_object(value, layer, &env_path)?;
        for (key, value) in env {
            expect_string(value, layer, &join_path(&env_path, key))?;
        }
    }
    if let Some(value) = map.get("enabled") {
        expect_bool(value, layer, &join_path(path, "enabled"))?;
    }
    Ok(())
}

/// Validate session capacity and persistence settings.
fn validate_sessions(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(
        map,
        &[
            "max_sessions",
            "persist",
            "snapshot_path",
            "save_interval_secs",
            "save_after_mutations",
        ],
        layer,
        path,
    )?;

    for key in ["max_sessions", "save_interval_secs", "save_after_mutations"] {
        if let Some(value) = map.get(key) {
            expect_u64(value, layer, &join_path(path, key))?;
        }
    }
    if let Some(value) = map.get("persist") {
        expect_bool(value, layer, &join_path(path, "persist"))?;
    }
    if let Some(value) = map.get("snapshot_path") {
        expect_string(value, layer, &join_path(path, "snapshot_path"))?;
    }
    Ok(())
}

/// Validate the "orchestrator" block.
fn validate_orchestrator(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(
        map,
        &["max_tool_round_trips", "tool_timeout_secs"],
        layer,
        path,
    )?;
    for (key, value) in map {
        expect_u64(value, layer, &join_path(path, key))?;
    }
    Ok(())
}

/// Validate the completion backend block.
fn validate_completion(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(
        map,
        &[
            "base_url",
            "model",
            "api_key_env",
            "max_tokens",
            "history_window",
            "timeout_secs",
            "system_prompt",
        ],
        layer,
        path,
    )?;

    for key in ["base_url", "model", "api_key_env", "system_prompt"] {
        if let Some(value) = map.get(key) {
            expect_string(value, layer, &join_path(path, key))?;
        }
    }
    for key in ["max_tokens", "history_window", "timeout_secs"] {
        if let Some(value) = map.get(key) {
            expect_u64(value, layer, &join_path(path, key))?;
        }
    }
    Ok(())
}

/// Validate the HTTP listener block.
fn validate_server(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    ensure_allowed_keys(map, &["address", "port"], layer, path)?;

    if let Some(value) = map.get("address") {
        expect_string(value, layer, &join_path(path, "address"))?;
    }
    if let Some(value) = map.get("port") {
        let port_path = join_path(path, "port");
        match value.as_u64() {
            Some(port) if port <= u64::from(u16::MAX) => {}
            _ => return Err(invalid_field(layer, &port_path, "expected port number")),
        }
    }
    Ok(())
}

/// Expect a JSON object or return a typed error.
fn expect_object<'a>(
    value: &'a Value,
    layer: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    value
        .as_object()
        .ok_or_else(|| invalid_field(layer, path, "expected object"))
}

fn expect_string(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    match value {
        Value::String(_) => Ok(()),
        _ => Err(invalid_field(layer, path, "expected string")),
    }
}

fn expect_bool(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    match value {
        Value::Bool(_) => Ok(()),
        _ => Err(invalid_field(layer, path, "expected bool")),
    }
}

/// Expect a non-negative integer.
fn expect_u64(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.is_u64() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected non-negative integer"))
    }
}

/// Validate that a value is an array of strings.
fn validate_string_array(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    let Value::Array(entries) = value else {
        return Err(invalid_field(layer, path, "expected array"));
    };
    for (idx, entry) in entries.iter().enumerate() {
        expect_string(entry, layer, &format!("{path}[{idx}]"))?;
    }
    Ok(())
}

/// Ensure an object contains only allowed keys.
fn ensure_allowed_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    match map.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(invalid_field(layer, &join_path(path, key), "unknown key")),
        None => Ok(()),
    }
}

/// Join nested paths for better error messages.
fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Build a structured invalid-field error.
fn invalid_field(layer: &str, path: &str, message: &str) -> ConfigError {
    let normalized_path = if path.is_empty() { "root" } else { path };
    ConfigError::InvalidField {
        path: format!("{layer}:{normalized_path}"),
        message: message.to_string(),
    }
}
