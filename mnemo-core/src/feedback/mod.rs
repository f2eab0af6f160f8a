//! Feedback events, reward signals and mined correction patterns

pub mod ledger;
pub mod signature;

pub use ledger::{FeedbackLedger, RecordOutcome};
pub use signature::SignatureBuilder;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LearningError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Positive,
    Negative,
    Correction,
    Suggestion,
    Error,
    Safety,
}

impl FeedbackKind {
    pub const ALL: [FeedbackKind; 6] = [
        FeedbackKind::Positive,
        FeedbackKind::Negative,
        FeedbackKind::Correction,
        FeedbackKind::Suggestion,
        FeedbackKind::Error,
        FeedbackKind::Safety,
    ];

    /// Fixed reward signal for the kind
    pub fn reward(&self) -> f32 {
        match self {
            FeedbackKind::Positive => 1.0,
            FeedbackKind::Negative => -1.0,
            FeedbackKind::Correction => -0.5,
            FeedbackKind::Suggestion => 0.0,
            FeedbackKind::Error => -1.0,
            FeedbackKind::Safety => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackKind::Positive => "positive",
            FeedbackKind::Negative => "negative",
            FeedbackKind::Correction => "correction",
            FeedbackKind::Suggestion => "suggestion",
            FeedbackKind::Error => "error",
            FeedbackKind::Safety => "safety",
        }
    }
}

impl fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackKind {
    type Err = LearningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        FeedbackKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| LearningError::invalid("kind", format!("unknown feedback kind '{}'", s)))
    }
}

/// A prompt/response exchange feedback can refer back to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Uuid,
    pub prompt: String,
    pub response: String,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Interaction {
    pub fn new(
        prompt: impl Into<String>,
        response: impl Into<String>,
        context: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            response: response.into(),
            context,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub id: Uuid,
    pub interaction_ref: Uuid,
    pub kind: FeedbackKind,
    pub reward: f32,
    pub comment: Option<String>,
    /// Structural signature; derived on record when empty
    #[serde(default)]
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

impl FeedbackEvent {
    pub fn new(interaction_ref: Uuid, kind: FeedbackKind, comment: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            interaction_ref,
            kind,
            reward: kind.reward(),
            comment: comment.filter(|c| !c.trim().is_empty()),
            signature: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// Aggregate over events sharing one signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub signature: String,
    pub occurrences: u32,
    pub total_reward: f32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub event_ids: BTreeSet<Uuid>,
}

impl Pattern {
    pub fn average_reward(&self) -> f32 {
        if self.occurrences == 0 { 0.0 } else { self.total_reward / self.occurrences as f32 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRule {
    pub trigger_signature: String,
    pub suggested_fix: String,
    pub derived_from: BTreeSet<Uuid>,
    /// Events folded in after the rule was created
    pub reinforcement: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Occurrences before a pattern yields a correction rule
    pub min_occurrences: u32,
    /// Responses shorter than this are bucketed `short`
    pub short_response_chars: usize,
    /// Responses longer than this are bucketed `long`
    pub long_response_chars: usize,
    /// Average reward below which a pattern counts as problematic
    pub problematic_reward: f32,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            min_occurrences: 3,
            short_response_chars: 100,
            long_response_chars: 2000,
            problematic_reward: -0.3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reward_mapping() {
        let rewards: Vec<f32> = FeedbackKind::ALL.iter().map(|k| k.reward()).collect();
        assert_eq!(rewards, vec![1.0, -1.0, -0.5, 0.0, -1.0, -1.0]);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Safety".parse::<FeedbackKind>().unwrap(), FeedbackKind::Safety);
        assert!("meh".parse::<FeedbackKind>().is_err());
    }

    #[test]
    fn test_blank_comment_dropped() {
        let event = FeedbackEvent::new(Uuid::new_v4(), FeedbackKind::Correction, Some("  ".into()));
        assert_eq!(event.comment, None);
        assert_eq!(event.reward, -0.5);
    }
}
