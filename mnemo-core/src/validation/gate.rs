use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::audit_trail::{AuditAction, AuditEntry, AuditFilter, AuditTrail};
use super::guardrails::{Assessment, Guardrail, assess, default_guardrails};
use super::{Decision, ProposedChange, RequestStatus, RiskLevel, ValidationConfig, ValidationRequest};
use crate::error::{LearningError, Result};
use crate::storage::{Journal, read_json, remove_if_exists, write_json_atomic};

const STORE: &str = "validation";

const RESOLVER_AUTO: &str = "auto";
const RESOLVER_GUARDRAIL: &str = "guardrail";
const RESOLVER_TIMEOUT: &str = "timeout";
const RESOLVER_USER: &str = "user";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum RequestRecord {
    Submitted {
        request: ValidationRequest,
    },
    Transition {
        id: Uuid,
        status: RequestStatus,
        resolved_at: DateTime<Utc>,
        resolver: String,
        rationale: Option<String>,
    },
}

struct GateState {
    requests: HashMap<Uuid, ValidationRequest>,
    guardrails: Vec<Guardrail>,
    audit: AuditTrail,
}

/// Approval state machine for proposed changes
///
/// Status checks and transitions for one request happen under a single
/// write lock, so concurrent resolutions race to exactly one winner.
pub struct ValidationGate {
    config: ValidationConfig,
    guardrails_path: PathBuf,
    journal: Journal<RequestRecord>,
    state: RwLock<GateState>,
}

impl ValidationGate {
    pub fn open(dir: &Path, config: ValidationConfig) -> Result<Self> {
        let journal = Journal::open(STORE, dir.join("requests.jsonl"))?;
        let guardrails_path = dir.join("guardrails.json");
        let guardrails = read_json(STORE, &guardrails_path)?.unwrap_or_else(default_guardrails);
        let audit = AuditTrail::open(&dir.join("audit.jsonl"))?;

        let mut requests = HashMap::new();
        for record in journal.replay()? {
            match record {
                RequestRecord::Submitted { request } => {
                    requests.insert(request.id, request);
                }
                RequestRecord::Transition { id, status, resolved_at, resolver, rationale } => {
                    let Some(request) = requests.get_mut(&id) else {
                        warn!("Transition for unknown validation request {} ignored", id);
                        continue;
                    };
                    if request.status.is_terminal() {
                        warn!("Duplicate transition for validation request {} ignored", id);
                        continue;
                    }
                    request.status = status;
                    request.resolved_at = Some(resolved_at);
                    request.resolver = Some(resolver);
                    request.rationale = rationale;
                }
            }
        }

        let pending = requests.values().filter(|r| r.is_pending()).count();
        info!("Validation gate loaded: {} requests, {} pending", requests.len(), pending);
        Ok(Self {
            config,
            guardrails_path,
            journal,
            state: RwLock::new(GateState { requests, guardrails, audit }),
        })
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Score a change and open a request for it
    ///
    /// A blocking guardrail stores the request as rejected and fails with
    /// `RiskRejected`. Low risk is approved at once when auto-approval is on
    /// and the caller does not insist on validation.
    pub fn submit(
        &self,
        change: ProposedChange,
        reason: &str,
        require_validation: bool,
    ) -> Result<ValidationRequest> {
        self.submit_at(change, reason, require_validation, Utc::now())
    }

    pub fn submit_at(
        &self,
        change: ProposedChange,
        reason: &str,
        require_validation: bool,
        now: DateTime<Utc>,
    ) -> Result<ValidationRequest> {
        let payload = serde_json::to_value(&change).map_err(|e| LearningError::unavailable(STORE, e))?;
        let mut state = self.state.write();

        if let Some(existing) =
            state.requests.values().find(|r| r.is_pending() && r.change == change && now <= r.deadline)
        {
            debug!("Identical change already pending as {}", existing.id);
            return Ok(existing.clone());
        }

        let mut request = ValidationRequest {
            id: Uuid::new_v4(),
            kind: change.kind(),
            risk: change.base_risk(),
            change,
            status: RequestStatus::Pending,
            reason: reason.to_string(),
            created_at: now,
            deadline: now + Duration::hours(self.config.timeout_hours),
            resolved_at: None,
            resolver: None,
            rationale: None,
        };

        let mut audit = Vec::new();
        let blocked = match assess(&state.guardrails, &request.change, &payload) {
            Assessment::Blocked { guardrail } => {
                request.status = RequestStatus::Rejected;
                request.resolved_at = Some(now);
                request.resolver = Some(RESOLVER_GUARDRAIL.to_string());
                request.rationale = Some(format!("blocked by guardrail '{}'", guardrail));
                audit.push(created_entry(&request, now));
                audit.push(AuditEntry::new(
                    &request,
                    AuditAction::Blocked,
                    RESOLVER_GUARDRAIL,
                    Some(guardrail.clone()),
                    now,
                ));
                Some(guardrail)
            }
            Assessment::Risk { level, triggered } => {
                request.risk = level;
                if !triggered.is_empty() {
                    debug!("Guardrails {:?} raised request to {}", triggered, level);
                }
                audit.push(created_entry(&request, now));
                if self.config.auto_approve_low_risk && level == RiskLevel::Low && !require_validation {
                    request.status = RequestStatus::Approved;
                    request.resolved_at = Some(now);
                    request.resolver = Some(RESOLVER_AUTO.to_string());
                    audit.push(AuditEntry::new(&request, AuditAction::Approved, RESOLVER_AUTO, None, now));
                }
                None
            }
        };

        self.journal.append(&RequestRecord::Submitted { request: request.clone() })?;
        state.audit.record(audit)?;
        state.requests.insert(request.id, request.clone());

        if let Some(guardrail) = blocked {
            warn!("{} request {} blocked by guardrail '{}'", request.kind, request.id, guardrail);
            return Err(LearningError::RiskRejected { id: request.id, guardrail });
        }
        info!("{} request {} opened as {} ({} risk)", request.kind, request.id, request.status, request.risk);
        Ok(request)
    }

    /// Resolve a pending request
    pub fn resolve(&self, id: Uuid, decision: Decision, rationale: &str) -> Result<ValidationRequest> {
        self.resolve_at(id, decision, rationale, Utc::now())
    }

    pub fn resolve_at(
        &self,
        id: Uuid,
        decision: Decision,
        rationale: &str,
        now: DateTime<Utc>,
    ) -> Result<ValidationRequest> {
        let mut state = self.state.write();
        let request = state
            .requests
            .get(&id)
            .cloned()
            .ok_or_else(|| LearningError::not_found("validation_request", id))?;

        if request.status.is_terminal() {
            return Err(LearningError::AlreadyResolved { id, status: request.status.to_string() });
        }

        if now > request.deadline {
            self.transition(&mut state, request, RequestStatus::Expired, RESOLVER_TIMEOUT, None, now)?;
            return Err(LearningError::Expired { id });
        }

        let status = match decision {
            Decision::Approved => RequestStatus::Approved,
            Decision::Rejected => RequestStatus::Rejected,
        };
        let rationale = Some(rationale.to_string()).filter(|r| !r.trim().is_empty());
        self.transition(&mut state, request, status, RESOLVER_USER, rationale, now)
    }

    fn transition(
        &self,
        state: &mut GateState,
        mut request: ValidationRequest,
        status: RequestStatus,
        resolver: &str,
        rationale: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ValidationRequest> {
        self.journal.append(&RequestRecord::Transition {
            id: request.id,
            status,
            resolved_at: now,
            resolver: resolver.to_string(),
            rationale: rationale.clone(),
        })?;

        request.status = status;
        request.resolved_at = Some(now);
        request.resolver = Some(resolver.to_string());
        request.rationale = rationale.clone();

        if let Some(action) = AuditAction::for_status(status) {
            state.audit.record(vec![AuditEntry::new(&request, action, resolver, rationale, now)])?;
        }
        state.requests.insert(request.id, request.clone());
        info!("Validation request {} {} by {}", request.id, status, resolver);
        Ok(request)
    }

    /// Expire every pending request past its deadline
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut state = self.state.write();
        let overdue: Vec<ValidationRequest> =
            state.requests.values().filter(|r| r.is_pending() && now > r.deadline).cloned().collect();

        let mut expired = Vec::with_capacity(overdue.len());
        for request in overdue {
            let request = self.transition(&mut state, request, RequestStatus::Expired, RESOLVER_TIMEOUT, None, now)?;
            expired.push(request.id);
        }
        if !expired.is_empty() {
            info!("Expired {} validation requests", expired.len());
        }
        Ok(expired)
    }

    /// Pending requests, riskiest first, then oldest first
    pub fn pending(&self) -> Vec<ValidationRequest> {
        let state = self.state.read();
        let mut pending: Vec<ValidationRequest> =
            state.requests.values().filter(|r| r.is_pending()).cloned().collect();
        pending.sort_by(|a, b| b.risk.cmp(&a.risk).then(a.created_at.cmp(&b.created_at)));
        pending
    }

    pub fn get(&self, id: Uuid) -> Result<ValidationRequest> {
        self.state
            .read()
            .requests
            .get(&id)
            .cloned()
            .ok_or_else(|| LearningError::not_found("validation_request", id))
    }

    pub fn requests(&self) -> Vec<ValidationRequest> {
        let state = self.state.read();
        let mut all: Vec<ValidationRequest> = state.requests.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    pub fn audit_trail(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.state.read().audit.query(filter)
    }

    pub fn guardrails(&self) -> Vec<Guardrail> {
        self.state.read().guardrails.clone()
    }

    /// Add or replace (by name) a guardrail
    pub fn add_guardrail(&self, guardrail: Guardrail) -> Result<()> {
        let mut state = self.state.write();
        let mut guardrails = state.guardrails.clone();
        match guardrails.iter_mut().find(|g| g.name == guardrail.name) {
            Some(existing) => *existing = guardrail,
            None => guardrails.push(guardrail),
        }
        write_json_atomic(STORE, &self.guardrails_path, &guardrails)?;
        state.guardrails = guardrails;
        Ok(())
    }

    /// Drop every request, the audit trail and custom guardrails
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.write();
        self.journal.clear()?;
        state.audit.clear()?;
        remove_if_exists(STORE, &self.guardrails_path)?;
        state.requests.clear();
        state.guardrails = default_guardrails();
        Ok(())
    }
}

fn created_entry(request: &ValidationRequest, now: DateTime<Utc>) -> AuditEntry {
    AuditEntry::new(request, AuditAction::Created, "system", Some(request.reason.clone()), now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptation::Strategy;
    use crate::validation::guardrails::{GuardrailEffect, PayloadPredicate};
    use crate::validation::RequestKind;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn open_gate(dir: &TempDir) -> ValidationGate {
        ValidationGate::open(&dir.path().join("validation"), ValidationConfig::default()).unwrap()
    }

    fn knowledge(statement: &str) -> ProposedChange {
        ProposedChange::Knowledge {
            statement: statement.to_string(),
            domain: "general".to_string(),
            source_ref: "test".to_string(),
        }
    }

    fn adaptation(key: &str, value: &str) -> ProposedChange {
        let mut changes = BTreeMap::new();
        changes.insert(key.to_string(), value.to_string());
        ProposedChange::Adaptation { changes, strategy: Strategy::Validated }
    }

    #[test]
    fn test_low_risk_auto_approved() {
        let dir = TempDir::new().unwrap();
        let gate = open_gate(&dir);

        let request = gate.submit(knowledge("Tea is brewed with hot water."), "suggestion", false).unwrap();
        assert_eq!(request.status, RequestStatus::Approved);
        assert_eq!(request.resolver.as_deref(), Some("auto"));
        assert!(gate.pending().is_empty());

        let trail = gate.audit_trail(&AuditFilter::for_request(request.id));
        assert_eq!(trail.iter().map(|e| e.action).collect::<Vec<_>>(), vec![
            AuditAction::Created,
            AuditAction::Approved
        ]);
    }

    #[test]
    fn test_required_validation_stays_pending() {
        let dir = TempDir::new().unwrap();
        let gate = open_gate(&dir);

        let request = gate.submit(knowledge("Tea is brewed with hot water."), "check it", true).unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.deadline - request.created_at, Duration::hours(24));

        let approved = gate.resolve(request.id, Decision::Approved, "fine").unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(approved.resolver.as_deref(), Some("user"));

        let again = gate.resolve(request.id, Decision::Rejected, "changed my mind");
        assert!(matches!(again, Err(LearningError::AlreadyResolved { ref status, .. }) if status == "approved"));
        assert_eq!(gate.get(request.id).unwrap().status, RequestStatus::Approved);
    }

    #[test]
    fn test_guardrail_block_is_stored_rejected() {
        let dir = TempDir::new().unwrap();
        let gate = open_gate(&dir);

        let change =
            ProposedChange::Permission { action: "read".into(), payload: json!({"target": "password vault"}) };
        let err = gate.submit(change, "wants access", false).unwrap_err();
        let LearningError::RiskRejected { id, guardrail } = err else {
            panic!("expected RiskRejected");
        };
        assert_eq!(guardrail, "credential_access");

        let stored = gate.get(id).unwrap();
        assert_eq!(stored.status, RequestStatus::Rejected);
        assert_eq!(stored.resolver.as_deref(), Some("guardrail"));
        let actions: Vec<AuditAction> =
            gate.audit_trail(&AuditFilter::for_request(id)).iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::Created, AuditAction::Blocked]);
    }

    #[test]
    fn test_pending_sorted_by_risk_then_age() {
        let dir = TempDir::new().unwrap();
        let gate = open_gate(&dir);
        let t0 = Utc::now();

        let medium = gate.submit_at(adaptation("detail_level", "detailed"), "a", false, t0).unwrap();
        let safety = ProposedChange::Safety { description: "bad advice".into() };
        let critical = gate.submit_at(safety, "b", false, t0 + Duration::seconds(1)).unwrap();
        let medium_later =
            gate.submit_at(adaptation("proactivity", "high"), "c", false, t0 + Duration::seconds(2)).unwrap();

        assert_eq!(medium.risk, RiskLevel::Medium);
        assert_eq!(critical.risk, RiskLevel::Critical);
        let order: Vec<Uuid> = gate.pending().iter().map(|r| r.id).collect();
        assert_eq!(order, vec![critical.id, medium.id, medium_later.id]);
    }

    #[test]
    fn test_identical_pending_change_is_deduplicated() {
        let dir = TempDir::new().unwrap();
        let gate = open_gate(&dir);

        let first = gate.submit(adaptation("detail_level", "detailed"), "a", true).unwrap();
        let second = gate.submit(adaptation("detail_level", "detailed"), "b", true).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(gate.pending().len(), 1);
    }

    #[test]
    fn test_resolve_after_deadline_expires() {
        let dir = TempDir::new().unwrap();
        let gate = open_gate(&dir);
        let t0 = Utc::now();

        let request = gate.submit_at(adaptation("detail_level", "concise"), "r", true, t0).unwrap();
        let late = t0 + Duration::hours(25);
        let err = gate.resolve_at(request.id, Decision::Approved, "ok", late).unwrap_err();
        assert!(matches!(err, LearningError::Expired { id } if id == request.id));
        assert_eq!(gate.get(request.id).unwrap().status, RequestStatus::Expired);

        let err = gate.resolve_at(request.id, Decision::Approved, "ok", late).unwrap_err();
        assert!(matches!(err, LearningError::AlreadyResolved { .. }));
    }

    #[test]
    fn test_sweep_expires_only_overdue() {
        let dir = TempDir::new().unwrap();
        let gate = open_gate(&dir);
        let t0 = Utc::now();

        let old = gate.submit_at(adaptation("detail_level", "concise"), "old", true, t0).unwrap();
        let fresh = gate.submit_at(adaptation("tone", "casual"), "fresh", true, t0 + Duration::hours(20)).unwrap();

        let expired = gate.sweep_expired(t0 + Duration::hours(30)).unwrap();
        assert_eq!(expired, vec![old.id]);
        assert_eq!(gate.get(fresh.id).unwrap().status, RequestStatus::Pending);
        assert!(gate.sweep_expired(t0 + Duration::hours(30)).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_resolve_has_one_winner() {
        let dir = TempDir::new().unwrap();
        let gate = Arc::new(open_gate(&dir));
        let request = gate.submit(ProposedChange::Safety { description: "unsafe".into() }, "r", false).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || {
                    let decision = if i % 2 == 0 { Decision::Approved } else { Decision::Rejected };
                    gate.resolve(request.id, decision, "race")
                })
            })
            .collect();
        let results: Vec<Result<ValidationRequest>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| matches!(e, LearningError::AlreadyResolved { .. }))
        );
        assert_eq!(gate.audit_trail(&AuditFilter::for_request(request.id)).len(), 2);
    }

    #[test]
    fn test_state_and_guardrails_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let gate = open_gate(&dir);
            gate.add_guardrail(
                Guardrail::new(
                    "no_tone_changes",
                    PayloadPredicate::TouchesKey { key: "tone".into() },
                    GuardrailEffect::Elevate { risk: RiskLevel::High },
                )
                .for_kinds(&[RequestKind::Adaptation]),
            )
            .unwrap();
            let request = gate.submit(adaptation("tone", "casual"), "r", false).unwrap();
            assert_eq!(request.risk, RiskLevel::High);
            gate.resolve(request.id, Decision::Rejected, "no").unwrap();
            request.id
        };

        let gate = open_gate(&dir);
        assert_eq!(gate.get(id).unwrap().status, RequestStatus::Rejected);
        assert!(gate.guardrails().iter().any(|g| g.name == "no_tone_changes"));
        assert_eq!(gate.audit_trail(&AuditFilter::default()).len(), 2);

        gate.clear().unwrap();
        assert!(gate.requests().is_empty());
        assert_eq!(gate.guardrails(), default_guardrails());
    }
}
