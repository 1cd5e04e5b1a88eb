use crate::config::{load_settings as config_load_settings, Settings};
use crate::governance::GovernanceEngine;
use crate::shared::time::format_rfc3339;
use serde::Serialize;
use serde_json::Value;

pub fn load_settings() -> Result<Settings, String> {
    config_load_settings().map_err(|e| e.to_string())
}

/// Read-side engine: no catalog or execution engine is attached.
pub fn open_engine(settings: &Settings) -> Result<GovernanceEngine, String> {
    GovernanceEngine::open(settings).map_err(|e| e.to_string())
}

pub fn require_args(args: &[String], expected: usize, usage: &str) -> Result<(), String> {
    if args.len() != expected {
        return Err(format!("usage: {usage}"));
    }
    Ok(())
}

pub fn encode_json<T: Serialize>(value: &T, what: &str) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("failed to encode {what}: {e}"))
}

pub fn to_value<T: Serialize>(value: &T, what: &str) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| format!("failed to encode {what}: {e}"))
}

pub fn timestamp_value(secs: i64) -> Value {
    Value::String(format_rfc3339(secs))
}

/// Replaces the named integer fields of a JSON object with RFC 3339 strings.
pub fn render_timestamps(value: &mut Value, fields: &[&str]) {
    let Value::Object(map) = value else {
        return;
    };
    for field in fields {
        if let Some(secs) = map.get(*field).and_then(Value::as_i64) {
            map.insert((*field).to_string(), timestamp_value(secs));
        }
    }
}
