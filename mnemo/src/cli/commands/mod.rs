// Command handlers; each prints its result as pretty JSON

pub mod adapt;
pub mod interaction;
pub mod knowledge;
pub mod maintenance;
pub mod validation;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", text);
    Ok(())
}

/// Split a `key=value` argument
pub fn parse_pair(arg: &str) -> Result<(String, String)> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.trim().to_string())),
        _ => bail!("expected key=value, got '{}'", arg),
    }
}

/// Context values are JSON when they parse as JSON, plain strings otherwise
pub fn parse_signal(value: &str) -> Value {
    serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()))
}
