use crate::app::command_support::{
    encode_json, open_engine, render_timestamps, require_args, to_value,
};
use crate::config::Settings;

pub fn cmd_history(args: &[String], settings: &Settings) -> Result<String, String> {
    require_args(args, 1, "history <request_id>")?;
    let engine = open_engine(settings)?;
    let mut rows = Vec::new();
    for entry in engine.history(&args[0]).map_err(|e| e.to_string())? {
        let mut value = to_value(&entry, "audit entry")?;
        render_timestamps(&mut value, &["recordedAt"]);
        rows.push(value);
    }
    encode_json(&rows, "audit history")
}

/// Fails with a non-zero exit when the chain is broken.
pub fn cmd_verify_audit(args: &[String], settings: &Settings) -> Result<String, String> {
    require_args(args, 1, "verify-audit <request_id>")?;
    let engine = open_engine(settings)?;
    let verification = engine.verify_audit(&args[0]).map_err(|e| e.to_string())?;
    let encoded = encode_json(&verification, "audit verification")?;
    if verification.is_intact() {
        Ok(encoded)
    } else {
        Err(encoded)
    }
}
