//! Vector-embedded memory of interactions, documents and experiences
//!
//! Memories are scored by a blend of semantic similarity, decayed importance
//! and recency. A type index and a tag index narrow the candidate set before
//! any similarity is computed.

pub mod index;
pub mod scoring;
pub mod store;

pub use index::MemoryIndex;
pub use store::{MemoryFilter, MemoryStats, MemoryStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::embeddings::Vector;
use crate::error::LearningError;

/// Tag that shields a memory from consolidation
pub const PINNED_TAG: &str = "pinned";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Conversation,
    Knowledge,
    Preference,
    Experience,
    Document,
    Feedback,
    Error,
    Success,
}

impl MemoryType {
    pub const ALL: [MemoryType; 8] = [
        MemoryType::Conversation,
        MemoryType::Knowledge,
        MemoryType::Preference,
        MemoryType::Experience,
        MemoryType::Document,
        MemoryType::Feedback,
        MemoryType::Error,
        MemoryType::Success,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Conversation => "conversation",
            MemoryType::Knowledge => "knowledge",
            MemoryType::Preference => "preference",
            MemoryType::Experience => "experience",
            MemoryType::Document => "document",
            MemoryType::Feedback => "feedback",
            MemoryType::Error => "error",
            MemoryType::Success => "success",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryType {
    type Err = LearningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        MemoryType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| LearningError::invalid("memory_type", format!("unknown type '{}'", s)))
    }
}

/// A stored, embedded, retrievable record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub memory_type: MemoryType,
    pub text: String,
    #[serde(default)]
    pub embedding: Vector,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Importance as of `last_accessed_at`; decays from there
    pub importance: f32,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u32,
}

impl Memory {
    pub fn new(memory_type: MemoryType, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            memory_type,
            text: text.into(),
            embedding: Vec::new(),
            tags: BTreeSet::new(),
            importance: 0.5,
            source: None,
            metadata: serde_json::Map::new(),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn pinned(self) -> Self {
        self.with_tag(PINNED_TAG)
    }

    pub fn is_pinned(&self) -> bool {
        self.tags.contains(PINNED_TAG)
    }
}

/// Scoring and consolidation constants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Weight of cosine similarity
    pub similarity_weight: f32,
    /// Weight of decayed importance
    pub importance_weight: f32,
    /// Weight of recency since last access
    pub recency_weight: f32,
    /// Half-life for importance and recency decay
    pub half_life_days: f64,
    /// Cosine distance from 1.0 still treated as an exact match
    pub exact_match_epsilon: f32,
    /// Importance gained by each retrieval
    pub retrieval_boost: f32,
    /// Consolidation drops memories whose decayed importance is below this
    pub consolidation_threshold: f32,
    /// ...and whose access count is below this
    pub min_access_count: u32,
    /// Repeated consolidation within this window reuses the previous instant
    pub consolidation_interval_hours: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            similarity_weight: 0.6,
            importance_weight: 0.25,
            recency_weight: 0.15,
            half_life_days: 30.0,
            exact_match_epsilon: 1e-4,
            retrieval_boost: 0.05,
            consolidation_threshold: 0.3,
            min_access_count: 2,
            consolidation_interval_hours: 24.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_type_parsing() {
        assert_eq!("Conversation".parse::<MemoryType>().unwrap(), MemoryType::Conversation);
        assert_eq!(" error ".parse::<MemoryType>().unwrap(), MemoryType::Error);
        assert!(matches!(
            "dream".parse::<MemoryType>(),
            Err(LearningError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_memory_builder() {
        let memory = Memory::new(MemoryType::Feedback, "too verbose")
            .with_tags(["style", "length"])
            .with_importance(1.7)
            .with_source("cli")
            .pinned();

        assert!(memory.is_pinned());
        assert_eq!(memory.importance, 1.0);
        assert_eq!(memory.tags.len(), 3);
        assert_eq!(memory.source.as_deref(), Some("cli"));
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let config = MemoryConfig::default();
        let sum = config.similarity_weight + config.importance_weight + config.recency_weight;
        assert!((sum - 1.0).abs() < 1e-6);
    }
}
