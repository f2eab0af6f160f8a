use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

use super::{RequestKind, RequestStatus, RiskLevel, ValidationRequest};
use crate::error::Result;
use crate::storage::Journal;

const STORE: &str = "validation";

/// What happened to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Approved,
    Rejected,
    Expired,
    Blocked,
}

impl AuditAction {
    pub fn for_status(status: RequestStatus) -> Option<Self> {
        match status {
            RequestStatus::Pending => None,
            RequestStatus::Approved => Some(AuditAction::Approved),
            RequestStatus::Rejected => Some(AuditAction::Rejected),
            RequestStatus::Expired => Some(AuditAction::Expired),
        }
    }
}

/// Immutable record of one request transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the trail
    pub seq: u64,
    pub request_id: Uuid,
    pub kind: RequestKind,
    pub action: AuditAction,
    pub risk: RiskLevel,
    /// `auto`, `guardrail`, `timeout` or the resolving user
    pub actor: String,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub request_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    pub since: Option<DateTime<Utc>>,
}

impl AuditEntry {
    pub fn new(
        request: &ValidationRequest,
        action: AuditAction,
        actor: &str,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            seq: 0,
            request_id: request.id,
            kind: request.kind,
            action,
            risk: request.risk,
            actor: actor.to_string(),
            note,
            at,
        }
    }
}

impl AuditFilter {
    pub fn for_request(id: Uuid) -> Self {
        Self { request_id: Some(id), ..Self::default() }
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.request_id.is_none_or(|id| entry.request_id == id)
            && self.action.is_none_or(|action| entry.action == action)
            && self.since.is_none_or(|since| entry.at >= since)
    }
}

/// Append-only audit log with a request id -> positions index
///
/// Entries are never edited or removed once appended.
pub struct AuditTrail {
    journal: Journal<AuditEntry>,
    entries: Vec<AuditEntry>,
    by_request: HashMap<Uuid, Vec<usize>>,
}

impl AuditTrail {
    pub fn open(path: &Path) -> Result<Self> {
        let journal = Journal::open(STORE, path)?;
        let mut trail = Self { journal, entries: Vec::new(), by_request: HashMap::new() };
        for entry in trail.journal.replay()? {
            trail.index(entry);
        }
        debug!("Audit trail loaded with {} entries", trail.entries.len());
        Ok(trail)
    }

    fn index(&mut self, entry: AuditEntry) {
        self.by_request.entry(entry.request_id).or_default().push(self.entries.len());
        self.entries.push(entry);
    }

    /// Number entries, append them durably, then index them
    pub fn record(&mut self, mut entries: Vec<AuditEntry>) -> Result<()> {
        for (offset, entry) in entries.iter_mut().enumerate() {
            entry.seq = (self.entries.len() + offset) as u64;
        }
        self.journal.append_all(&entries)?;
        for entry in entries {
            self.index(entry);
        }
        Ok(())
    }

    pub fn for_request(&self, id: Uuid) -> Vec<AuditEntry> {
        self.by_request
            .get(&id)
            .map(|positions| positions.iter().map(|&p| self.entries[p].clone()).collect())
            .unwrap_or_default()
    }

    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        match filter.request_id {
            Some(id) => self.for_request(id).into_iter().filter(|e| filter.matches(e)).collect(),
            None => self.entries.iter().filter(|e| filter.matches(e)).cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.journal.clear()?;
        self.entries.clear();
        self.by_request.clear();
        Ok(())
    }
}
