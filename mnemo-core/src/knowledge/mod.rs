//! Typed knowledge graph built from documents and corrections
//!
//! Extraction segments text, classifies each unit through a pluggable
//! [`KnowledgeClassifier`], and merges near-duplicate statements into existing
//! items instead of growing the graph.

pub mod classifier;
pub mod extractor;
pub mod graph;

pub use classifier::{Classification, HeuristicClassifier, KnowledgeClassifier};
pub use extractor::{Candidate, KnowledgeExtractor, Segment, SegmentShape};
pub use graph::KnowledgeGraph;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LearningError;

/// Relation label written from a correction to what it supersedes
pub const SUPERSEDES: &str = "supersedes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeKind {
    Fact,
    Concept,
    Procedure,
    Relationship,
    Example,
    Rule,
}

impl KnowledgeKind {
    pub const ALL: [KnowledgeKind; 6] = [
        KnowledgeKind::Fact,
        KnowledgeKind::Concept,
        KnowledgeKind::Procedure,
        KnowledgeKind::Relationship,
        KnowledgeKind::Example,
        KnowledgeKind::Rule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeKind::Fact => "fact",
            KnowledgeKind::Concept => "concept",
            KnowledgeKind::Procedure => "procedure",
            KnowledgeKind::Relationship => "relationship",
            KnowledgeKind::Example => "example",
            KnowledgeKind::Rule => "rule",
        }
    }
}

impl fmt::Display for KnowledgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnowledgeKind {
    type Err = LearningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        KnowledgeKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| LearningError::invalid("kind", format!("unknown knowledge kind '{}'", s)))
    }
}

/// Prior state of an item kept when a correction decays it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub statement: String,
    pub confidence: f32,
    pub note: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: Uuid,
    pub kind: KnowledgeKind,
    pub statement: String,
    pub confidence: f32,
    pub domain: String,
    pub source_ref: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub usage_count: u32,
    #[serde(default)]
    pub superseded_by: Option<Uuid>,
    #[serde(default)]
    pub revisions: Vec<Revision>,
}

impl KnowledgeItem {
    pub fn new(
        kind: KnowledgeKind,
        statement: impl Into<String>,
        confidence: f32,
        domain: impl Into<String>,
        source_ref: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            statement: statement.into(),
            confidence: confidence.clamp(0.0, 1.0),
            domain: domain.into(),
            source_ref: source_ref.into(),
            created_at: now,
            updated_at: now,
            usage_count: 0,
            superseded_by: None,
            revisions: Vec::new(),
        }
    }

    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KnowledgeEdge {
    pub from_id: Uuid,
    pub to_id: Uuid,
    pub relation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Same-kind statements at or above this cosine merge
    pub merge_threshold: f32,
    /// Confidence added to an item on each merge
    pub merge_boost: f32,
    /// Items this similar to a corrected statement are decayed
    pub correction_similarity: f32,
    /// Multiplier applied to a contradicted item's confidence
    pub correction_decay: f32,
    /// Confidence of the statement a correction introduces
    pub correction_confidence: f32,
    pub min_fact_chars: usize,
    pub max_fact_chars: usize,
    pub similarity_weight: f32,
    pub lexical_weight: f32,
    pub confidence_weight: f32,
    /// Score multiplier for superseded items
    pub superseded_penalty: f32,
    /// Results need at least this much similarity plus lexical relevance
    pub min_relevance: f32,
    pub default_domain: String,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            merge_threshold: 0.92,
            merge_boost: 0.1,
            correction_similarity: 0.75,
            correction_decay: 0.5,
            correction_confidence: 0.9,
            min_fact_chars: 20,
            max_fact_chars: 300,
            similarity_weight: 0.5,
            lexical_weight: 0.3,
            confidence_weight: 0.2,
            superseded_penalty: 0.5,
            min_relevance: 0.1,
            default_domain: "general".to_string(),
        }
    }
}
