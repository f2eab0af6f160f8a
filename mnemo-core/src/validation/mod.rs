//! Risk-scored human validation for proposed changes
//!
//! Requests move `pending -> approved | rejected | expired` exactly once.
//! Every transition is written to an append-only audit trail.

pub mod audit_trail;
pub mod gate;
pub mod guardrails;
pub mod sweeper;

pub use audit_trail::{AuditAction, AuditEntry, AuditFilter, AuditTrail};
pub use gate::ValidationGate;
pub use guardrails::{Guardrail, GuardrailEffect, PayloadPredicate, default_guardrails};
pub use sweeper::ExpirySweeper;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::adaptation::Strategy;
use crate::adaptation::behavior::PROACTIVITY;
use crate::error::LearningError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Adaptation,
    Knowledge,
    Correction,
    Safety,
    Permission,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestKind::Adaptation => "adaptation",
            RequestKind::Knowledge => "knowledge",
            RequestKind::Correction => "correction",
            RequestKind::Safety => "safety",
            RequestKind::Permission => "permission",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A human decision on a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl FromStr for Decision {
    type Err = LearningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "approved" | "approve" | "yes" => Ok(Decision::Approved),
            "rejected" | "reject" | "no" => Ok(Decision::Rejected),
            other => Err(LearningError::invalid("decision", format!("unknown decision '{}'", other))),
        }
    }
}

/// Payload of a validation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProposedChange {
    Adaptation {
        changes: BTreeMap<String, String>,
        strategy: Strategy,
    },
    Knowledge {
        statement: String,
        domain: String,
        source_ref: String,
    },
    Correction {
        original: String,
        corrected: String,
        source_ref: String,
    },
    Safety {
        description: String,
    },
    Permission {
        action: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

impl ProposedChange {
    pub fn kind(&self) -> RequestKind {
        match self {
            ProposedChange::Adaptation { .. } => RequestKind::Adaptation,
            ProposedChange::Knowledge { .. } => RequestKind::Knowledge,
            ProposedChange::Correction { .. } => RequestKind::Correction,
            ProposedChange::Safety { .. } => RequestKind::Safety,
            ProposedChange::Permission { .. } => RequestKind::Permission,
        }
    }

    /// Risk inherent to the change before guardrails
    ///
    /// Adaptations that change proactivity alter how much the assistant acts
    /// on its own and count as system modification.
    pub fn base_risk(&self) -> RiskLevel {
        match self {
            ProposedChange::Safety { .. } => RiskLevel::Critical,
            ProposedChange::Permission { .. } => RiskLevel::High,
            ProposedChange::Adaptation { changes, .. } if changes.contains_key(PROACTIVITY) => {
                RiskLevel::Medium
            }
            _ => RiskLevel::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub id: Uuid,
    pub kind: RequestKind,
    pub change: ProposedChange,
    pub risk: RiskLevel,
    pub status: RequestStatus,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolver: Option<String>,
    pub rationale: Option<String>,
}

impl ValidationRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub auto_approve_low_risk: bool,
    /// Hours a request may stay pending before it expires
    pub timeout_hours: i64,
    pub sweep_interval_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self { auto_approve_low_risk: true, timeout_hours: 24, sweep_interval_secs: 60 }
    }
}
