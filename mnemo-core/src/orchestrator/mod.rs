//! The boundary the surrounding assistant calls into
//!
//! [`LearningCore`] composes the stores, fans interactions out to them and
//! routes every behavior or knowledge change through the validation gate.

pub mod learning_core;
pub mod export;

pub use learning_core::LearningCore;
pub use export::{ExportManifest, ExportedFile};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::adaptation::{Adjustment, BehaviorConfig};
use crate::knowledge::KnowledgeItem;
use crate::memory::{Memory, MemoryStats};
use crate::preferences::{Preference, PreferenceCategory};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackOutcome {
    pub feedback_id: Uuid,
    pub reward: f32,
    pub signature: String,
    /// Behavior changes suggested by a recurring negative pattern
    pub suggested_adaptations: Vec<Adjustment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Applied,
    Pending,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalOutcome {
    pub status: ProposalStatus,
    pub validation_id: Option<Uuid>,
    /// Behavior version after an applied change
    pub version: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub items_created: usize,
    /// Every item the document produced or reinforced
    pub item_ids: Vec<Uuid>,
}

/// Fused view of the latest committed state of each store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub memories: Vec<Memory>,
    pub knowledge: Vec<KnowledgeItem>,
    pub preferences: BTreeMap<PreferenceCategory, Preference>,
    pub behavior: Option<BehaviorConfig>,
    /// Stores that could not contribute
    pub unavailable: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreStats {
    pub memory: Option<MemoryStats>,
    pub knowledge_items: Option<usize>,
    pub knowledge_edges: Option<usize>,
    pub interactions: Option<usize>,
    pub feedback_events: Option<usize>,
    pub correction_rules: Option<usize>,
    pub behavior_version: Option<u64>,
    pub pending_validations: Option<usize>,
    pub unavailable: Vec<String>,
}

/// Proof that the caller asked for a destructive reset
///
/// Only constructible through [`ResetConfirmation::confirmed`], so a reset
/// can never happen by default or by accident of a derived value.
#[derive(Debug)]
pub struct ResetConfirmation {
    _private: (),
}

impl ResetConfirmation {
    pub fn confirmed() -> Self {
        Self { _private: () }
    }
}
