//! Behavior configuration and the rules that adapt it
//!
//! The live [`BehaviorConfig`] is owned by the [`AdaptationEngine`] and only
//! changes through its commit path, each change recorded in an append-only
//! history.

pub mod behavior;
pub mod engine;
pub mod rules;

pub use behavior::{BEHAVIOR_KEYS, BehaviorConfig, HistoryEntry};
pub use engine::{AdaptationEngine, Adjustment, CommitOutcome};
pub use rules::{AdaptationRule, Condition, Signals, default_rules};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LearningError;

/// How a committed adjustment reaches live behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Immediate,
    Gradual,
    Validated,
    Experimental,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Immediate => "immediate",
            Strategy::Gradual => "gradual",
            Strategy::Validated => "validated",
            Strategy::Experimental => "experimental",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = LearningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "immediate" => Ok(Strategy::Immediate),
            "gradual" => Ok(Strategy::Gradual),
            "validated" => Ok(Strategy::Validated),
            "experimental" => Ok(Strategy::Experimental),
            other => Err(LearningError::invalid("strategy", format!("unknown strategy '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationConfig {
    /// Advances a gradual change takes to reach its target
    pub gradual_steps: u32,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self { gradual_steps: 5 }
    }
}
