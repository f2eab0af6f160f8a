use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Strategy;
use crate::error::{LearningError, Result};

pub const DETAIL_LEVEL: &str = "detail_level";
pub const TONE: &str = "tone";
pub const CODE_STYLE: &str = "code_style";
pub const EXPLANATION_DEPTH: &str = "explanation_depth";
pub const PROACTIVITY: &str = "proactivity";
pub const RESPONSE_FORMAT: &str = "response_format";

pub const BEHAVIOR_KEYS: [&str; 6] =
    [DETAIL_LEVEL, TONE, CODE_STYLE, EXPLANATION_DEPTH, PROACTIVITY, RESPONSE_FORMAT];

/// Ordered value scale for keys that can move gradually
pub fn ordinal_scale(key: &str) -> Option<&'static [&'static str]> {
    match key {
        DETAIL_LEVEL => Some(&["minimal", "concise", "moderate", "detailed", "comprehensive"]),
        EXPLANATION_DEPTH => Some(&["brief", "balanced", "thorough"]),
        PROACTIVITY => Some(&["low", "medium", "high"]),
        _ => None,
    }
}

/// Check a behavior key and normalize its value
pub fn validate_change(key: &str, value: &str) -> Result<String> {
    if !BEHAVIOR_KEYS.contains(&key) {
        return Err(LearningError::invalid("behavior_key", format!("unknown behavior key '{}'", key)));
    }
    let value = value.trim().to_lowercase();
    if value.is_empty() {
        return Err(LearningError::invalid(key, "behavior value is empty"));
    }
    if let Some(scale) = ordinal_scale(key) {
        if !scale.contains(&value.as_str()) {
            return Err(LearningError::invalid(
                key,
                format!("'{}' is not one of {}", value, scale.join(", ")),
            ));
        }
    }
    Ok(value)
}

/// Value `step` of `total` steps along the way from `from` to `to`
pub fn interpolate(key: &str, from: &str, to: &str, step: u32, total: u32) -> String {
    if step >= total || total == 0 {
        return to.to_string();
    }
    let fraction = step as f64 / total as f64;

    if let Some(scale) = ordinal_scale(key) {
        let position = |v: &str| scale.iter().position(|s| *s == v);
        if let (Some(a), Some(b)) = (position(from), position(to)) {
            let idx = (a as f64 + (b as f64 - a as f64) * fraction).round() as usize;
            return scale[idx.min(scale.len() - 1)].to_string();
        }
    }

    if let (Ok(a), Ok(b)) = (from.parse::<f64>(), to.parse::<f64>()) {
        let value = a + (b - a) * fraction;
        return format!("{:.2}", value);
    }

    // Categorical values cannot be blended
    to.to_string()
}

/// Live behavior mapping, versioned by committed history entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorConfig {
    pub version: u64,
    pub values: BTreeMap<String, String>,
}

impl BehaviorConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        let values = [
            (DETAIL_LEVEL, "moderate"),
            (TONE, "professional"),
            (CODE_STYLE, "clean"),
            (EXPLANATION_DEPTH, "balanced"),
            (PROACTIVITY, "medium"),
            (RESPONSE_FORMAT, "markdown"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { version: 0, values }
    }
}

/// One committed change in the append-only adaptation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: u64,
    pub changes: BTreeMap<String, String>,
    pub previous: BTreeMap<String, String>,
    pub strategy: Strategy,
    pub reason: String,
    pub committed_at: DateTime<Utc>,
}
