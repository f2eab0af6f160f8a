//! Per-category user preferences learned from observation and feedback

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{LearningError, Result};
use crate::storage::{read_json, remove_if_exists, write_json_atomic};

const STORE: &str = "preferences";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceCategory {
    ResponseStyle,
    DetailLevel,
    Format,
    Tone,
    Language,
    Domain,
    Interaction,
    Privacy,
}

impl PreferenceCategory {
    pub const ALL: [PreferenceCategory; 8] = [
        PreferenceCategory::ResponseStyle,
        PreferenceCategory::DetailLevel,
        PreferenceCategory::Format,
        PreferenceCategory::Tone,
        PreferenceCategory::Language,
        PreferenceCategory::Domain,
        PreferenceCategory::Interaction,
        PreferenceCategory::Privacy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PreferenceCategory::ResponseStyle => "response_style",
            PreferenceCategory::DetailLevel => "detail_level",
            PreferenceCategory::Format => "format",
            PreferenceCategory::Tone => "tone",
            PreferenceCategory::Language => "language",
            PreferenceCategory::Domain => "domain",
            PreferenceCategory::Interaction => "interaction",
            PreferenceCategory::Privacy => "privacy",
        }
    }
}

impl fmt::Display for PreferenceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PreferenceCategory {
    type Err = LearningError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        PreferenceCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| LearningError::invalid("category", format!("unknown category '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceSource {
    Observed,
    Explicit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    pub category: PreferenceCategory,
    pub value: String,
    pub confidence: f32,
    pub source: PreferenceSource,
    pub evidence_count: u32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferenceConfig {
    /// Confidence of a first observation or of a switched value
    pub initial_confidence: f32,
    /// Fraction of the remaining gap closed by an agreeing observation
    pub learning_rate: f32,
    /// Upper bound reachable through observation alone
    pub confidence_cap: f32,
    /// Confidence lost per contradicting observation
    pub contradiction_penalty: f32,
    /// Below this, a contradicting observation replaces the value
    pub switch_threshold: f32,
    /// Confidence floor set by explicit feedback
    pub explicit_floor: f32,
    /// Confidence needed before a preference is surfaced
    pub confident_threshold: f32,
}

impl Default for PreferenceConfig {
    fn default() -> Self {
        Self {
            initial_confidence: 0.3,
            learning_rate: 0.2,
            confidence_cap: 0.95,
            contradiction_penalty: 0.2,
            switch_threshold: 0.3,
            explicit_floor: 0.9,
            confident_threshold: 0.7,
        }
    }
}

/// Preference table persisted as a single JSON artifact
pub struct PreferenceStore {
    config: PreferenceConfig,
    path: PathBuf,
    table: RwLock<BTreeMap<PreferenceCategory, Preference>>,
}

impl PreferenceStore {
    pub fn open(path: &Path, config: PreferenceConfig) -> Result<Self> {
        let table: BTreeMap<PreferenceCategory, Preference> =
            read_json(STORE, path)?.unwrap_or_default();
        info!("Preference store loaded: {} categories", table.len());
        Ok(Self { config, path: path.to_path_buf(), table: RwLock::new(table) })
    }

    /// Fold an observed signal into the category's preference
    pub fn observe(&self, category: PreferenceCategory, signal: &str) -> Result<Preference> {
        let signal = normalize_value(signal)?;
        let mut table = self.table.write();
        let mut next = table.clone();
        let now = Utc::now();
        let config = &self.config;

        let updated = match next.get(&category).cloned() {
            None => Preference {
                category,
                value: signal,
                confidence: config.initial_confidence,
                source: PreferenceSource::Observed,
                evidence_count: 1,
                updated_at: now,
            },
            Some(mut current) if current.value == signal => {
                current.confidence +=
                    config.learning_rate * (config.confidence_cap - current.confidence).max(0.0);
                current.evidence_count = current.evidence_count.saturating_add(1);
                current.updated_at = now;
                current
            }
            Some(mut current) if current.source == PreferenceSource::Explicit => {
                debug!("Observed {}={} counted against explicit preference", category, signal);
                current.evidence_count = current.evidence_count.saturating_add(1);
                current.updated_at = now;
                current
            }
            Some(mut current) => {
                current.confidence -= config.contradiction_penalty;
                if current.confidence < config.switch_threshold {
                    debug!("Preference {} switched {} -> {}", category, current.value, signal);
                    current.value = signal;
                    current.confidence = config.initial_confidence;
                    current.evidence_count = 1;
                }
                current.updated_at = now;
                current
            }
        };

        next.insert(category, updated.clone());
        write_json_atomic(STORE, &self.path, &next)?;
        *table = next;
        Ok(updated)
    }

    /// Explicit feedback overrides any observed value immediately
    pub fn apply_feedback(&self, category: PreferenceCategory, explicit_value: &str) -> Result<Preference> {
        let value = normalize_value(explicit_value)?;
        let mut table = self.table.write();
        let mut next = table.clone();

        let (confidence, evidence_count) = match next.get(&category) {
            Some(current) if current.value == value => (
                current.confidence.max(self.config.explicit_floor),
                current.evidence_count.saturating_add(1),
            ),
            _ => (self.config.explicit_floor, 1),
        };
        let updated = Preference {
            category,
            value,
            confidence,
            source: PreferenceSource::Explicit,
            evidence_count,
            updated_at: Utc::now(),
        };

        next.insert(category, updated.clone());
        write_json_atomic(STORE, &self.path, &next)?;
        *table = next;
        info!("Explicit preference set: {}={}", category, updated.value);
        Ok(updated)
    }

    pub fn get(&self, category: PreferenceCategory) -> Option<Preference> {
        self.table.read().get(&category).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<PreferenceCategory, Preference> {
        self.table.read().clone()
    }

    pub fn is_confident(&self, category: PreferenceCategory) -> bool {
        self.get(category).is_some_and(|p| p.confidence >= self.config.confident_threshold)
    }

    /// Preferences confident enough to steer behavior
    pub fn confident(&self) -> BTreeMap<PreferenceCategory, Preference> {
        self.table
            .read()
            .iter()
            .filter(|(_, p)| p.confidence >= self.config.confident_threshold)
            .map(|(c, p)| (*c, p.clone()))
            .collect()
    }

    pub fn clear(&self) -> Result<()> {
        let mut table = self.table.write();
        remove_if_exists(STORE, &self.path)?;
        table.clear();
        Ok(())
    }
}

fn normalize_value(value: &str) -> Result<String> {
    let value = value.trim().to_lowercase();
    if value.is_empty() {
        return Err(LearningError::invalid("value", "preference value is empty"));
    }
    Ok(value)
}
