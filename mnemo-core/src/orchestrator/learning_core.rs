use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    ContextBundle, CoreStats, FeedbackOutcome, IngestOutcome, ProposalOutcome, ProposalStatus,
    ResetConfirmation,
};
use crate::adaptation::behavior::validate_change;
use crate::adaptation::{AdaptationEngine, Adjustment, CommitOutcome, Signals, Strategy};
use crate::config::CoreConfig;
use crate::embeddings::{Embedder, HashingEmbedder};
use crate::error::{LearningError, Result};
use crate::feedback::{FeedbackEvent, FeedbackKind, FeedbackLedger, Interaction};
use crate::knowledge::{HeuristicClassifier, KnowledgeClassifier, KnowledgeGraph};
use crate::memory::{Memory, MemoryFilter, MemoryStore, MemoryType};
use crate::preferences::{Preference, PreferenceCategory, PreferenceStore};
use crate::validation::{
    Decision, ExpirySweeper, ProposedChange, RequestStatus, ValidationGate, ValidationRequest,
};

const MEMORY: &str = "memory";
const PREFERENCES: &str = "preferences";
const KNOWLEDGE: &str = "knowledge";
const FEEDBACK: &str = "feedback";
const ADAPTATION: &str = "adaptation";
const VALIDATION: &str = "validation";

/// A store that either loaded or failed closed
enum Slot<T> {
    Ready(Arc<T>),
    Unavailable(String),
}

impl<T> Slot<T> {
    fn open(store: &'static str, open: impl FnOnce() -> Result<T>) -> Self {
        match open() {
            Ok(value) => Slot::Ready(Arc::new(value)),
            Err(e) => {
                error!("Store '{}' failed to load and is unavailable: {}", store, e);
                let reason = match e {
                    LearningError::Unavailable { reason, .. } => reason,
                    other => other.to_string(),
                };
                Slot::Unavailable(reason)
            }
        }
    }

    fn get(&self, store: &'static str) -> Result<&Arc<T>> {
        match self {
            Slot::Ready(value) => Ok(value),
            Slot::Unavailable(reason) => Err(LearningError::unavailable(store, reason)),
        }
    }

    fn ready(&self) -> Option<&Arc<T>> {
        match self {
            Slot::Ready(value) => Some(value),
            Slot::Unavailable(_) => None,
        }
    }
}

/// The adaptive learning core
///
/// Each store loads independently from its own artifact under the data
/// directory. A store whose artifact is corrupt answers `Unavailable` while
/// the rest keep working.
pub struct LearningCore {
    data_dir: PathBuf,
    config: CoreConfig,
    memory: Slot<MemoryStore>,
    preferences: Slot<PreferenceStore>,
    knowledge: Slot<KnowledgeGraph>,
    feedback: Slot<FeedbackLedger>,
    adaptation: Slot<AdaptationEngine>,
    validation: Slot<ValidationGate>,
}

impl LearningCore {
    /// Open the core with the default hashing embedder and heuristic classifier
    pub fn open(data_dir: impl Into<PathBuf>, config: CoreConfig) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(config.embedding_dimension));
        let classifier: Arc<dyn KnowledgeClassifier> = Arc::new(HeuristicClassifier::new(&config.knowledge));
        Self::open_with(data_dir, config, embedder, classifier)
    }

    pub fn open_with(
        data_dir: impl Into<PathBuf>,
        config: CoreConfig,
        embedder: Arc<dyn Embedder>,
        classifier: Arc<dyn KnowledgeClassifier>,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|e| LearningError::unavailable("core", e))?;
        info!("Opening learning core at {}", data_dir.display());

        let memory = Slot::open(MEMORY, || {
            MemoryStore::open(&data_dir.join("memory.jsonl"), config.memory.clone(), Arc::clone(&embedder))
        });
        let preferences = Slot::open(PREFERENCES, || {
            PreferenceStore::open(&data_dir.join("preferences.json"), config.preferences.clone())
        });
        let knowledge = Slot::open(KNOWLEDGE, || {
            KnowledgeGraph::open(
                &data_dir.join("knowledge.jsonl"),
                config.knowledge.clone(),
                Arc::clone(&embedder),
                classifier,
            )
        });
        let feedback = Slot::open(FEEDBACK, || {
            FeedbackLedger::open(&data_dir.join("feedback.jsonl"), config.feedback.clone())
        });
        let adaptation = Slot::open(ADAPTATION, || {
            AdaptationEngine::open(&data_dir.join("adaptation"), config.adaptation.clone())
        });
        let validation = Slot::open(VALIDATION, || {
            ValidationGate::open(&data_dir.join("validation"), config.validation.clone())
        });

        Ok(Self { data_dir, config, memory, preferences, knowledge, feedback, adaptation, validation })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn memory(&self) -> Result<&MemoryStore> {
        self.memory.get(MEMORY).map(|s| s.as_ref())
    }

    pub fn preferences(&self) -> Result<&PreferenceStore> {
        self.preferences.get(PREFERENCES).map(|s| s.as_ref())
    }

    pub fn knowledge(&self) -> Result<&KnowledgeGraph> {
        self.knowledge.get(KNOWLEDGE).map(|s| s.as_ref())
    }

    pub fn feedback(&self) -> Result<&FeedbackLedger> {
        self.feedback.get(FEEDBACK).map(|s| s.as_ref())
    }

    pub fn adaptation(&self) -> Result<&AdaptationEngine> {
        self.adaptation.get(ADAPTATION).map(|s| s.as_ref())
    }

    pub fn validation(&self) -> Result<&ValidationGate> {
        self.validation.get(VALIDATION).map(|s| s.as_ref())
    }

    /// Names of stores that failed to load
    pub fn unavailable_stores(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.memory.ready().is_none() {
            names.push(MEMORY.to_string());
        }
        if self.preferences.ready().is_none() {
            names.push(PREFERENCES.to_string());
        }
        if self.knowledge.ready().is_none() {
            names.push(KNOWLEDGE.to_string());
        }
        if self.feedback.ready().is_none() {
            names.push(FEEDBACK.to_string());
        }
        if self.adaptation.ready().is_none() {
            names.push(ADAPTATION.to_string());
        }
        if self.validation.ready().is_none() {
            names.push(VALIDATION.to_string());
        }
        names
    }

    /// Record an exchange and fan it out to the ledger, memory, preferences
    /// and knowledge
    ///
    /// The stores are independent; a failure in one is logged and does not
    /// undo the others. An interaction the ledger could not record cannot
    /// receive feedback later. Context signals also advance gradual changes
    /// and may trigger adaptation rules.
    pub fn record_interaction(
        &self,
        prompt: &str,
        response: &str,
        context: BTreeMap<String, Value>,
    ) -> Result<Uuid> {
        let interaction = Interaction::new(prompt, response, context);
        let id = interaction.id;
        if let Err(e) = self.feedback().and_then(|ledger| ledger.record_interaction(interaction.clone())) {
            warn!("Interaction {} not recorded in {}: {}", id, FEEDBACK, e);
        }

        let (stored, (observed, extracted)) = rayon::join(
            || self.remember_interaction(&interaction),
            || rayon::join(|| self.observe_preferences(&interaction.context), || self.extract_knowledge(&interaction)),
        );
        for (store, result) in [(MEMORY, stored), (PREFERENCES, observed), (KNOWLEDGE, extracted)] {
            if let Err(e) = result {
                warn!("Interaction {} not applied to {}: {}", id, store, e);
            }
        }

        if let Some(engine) = self.adaptation.ready() {
            if let Err(e) = engine.advance() {
                warn!("Gradual adaptation step failed: {}", e);
            }
            let proposed = engine.propose(&interaction.context);
            if !proposed.is_empty() {
                self.route_adjustments(&proposed, &format!("context of interaction {}", id));
            }
        }

        debug!("Recorded interaction {}", id);
        Ok(id)
    }

    fn remember_interaction(&self, interaction: &Interaction) -> Result<()> {
        let memory = Memory::new(
            MemoryType::Conversation,
            format!("User: {}\nAssistant: {}", interaction.prompt, interaction.response),
        )
        .with_source("interaction")
        .with_metadata("interaction_id", json!(interaction.id));
        self.memory()?.store(memory).map(|_| ())
    }

    /// Context keys named after a preference category are observations
    fn observe_preferences(&self, context: &BTreeMap<String, Value>) -> Result<()> {
        let store = self.preferences()?;
        for category in PreferenceCategory::ALL {
            if let Some(signal) = context.get(category.as_str()).and_then(Value::as_str) {
                store.observe(category, signal)?;
            }
        }
        Ok(())
    }

    fn extract_knowledge(&self, interaction: &Interaction) -> Result<()> {
        let domain = interaction.context.get("domain").and_then(Value::as_str).unwrap_or_default();
        let source_ref = format!("interaction:{}", interaction.id);
        self.knowledge()?.ingest_document(&interaction.response, &source_ref, domain).map(|_| ())
    }

    /// Submit rule adjustments to the gate, one request per strategy
    ///
    /// Approved requests are committed at once; the rest wait for a human.
    fn route_adjustments(&self, adjustments: &[Adjustment], reason: &str) {
        let (Some(gate), Some(engine)) = (self.validation.ready(), self.adaptation.ready()) else {
            return;
        };

        let mut groups: BTreeMap<&'static str, (Strategy, BTreeMap<String, String>)> = BTreeMap::new();
        for adjustment in adjustments {
            groups
                .entry(adjustment.strategy.as_str())
                .or_insert_with(|| (adjustment.strategy, BTreeMap::new()))
                .1
                .insert(adjustment.key.clone(), adjustment.value.clone());
        }

        for (strategy, changes) in groups.into_values() {
            let change = ProposedChange::Adaptation { changes: changes.clone(), strategy };
            match gate.submit(change, reason, strategy == Strategy::Validated) {
                Ok(request) if request.status == RequestStatus::Approved => {
                    if let Err(e) = engine.commit(&changes, strategy, reason) {
                        warn!("Approved adaptation {} failed to commit: {}", request.id, e);
                    }
                }
                Ok(request) => info!("Adaptation {:?} awaiting validation as {}", changes, request.id),
                Err(e) => warn!("Adaptation {:?} not submitted: {}", changes, e),
            }
        }
    }

    /// Record feedback on an earlier interaction
    pub fn submit_feedback(
        &self,
        interaction_id: Uuid,
        kind: FeedbackKind,
        comment: Option<String>,
    ) -> Result<FeedbackOutcome> {
        let ledger = self.feedback()?;
        let interaction = ledger.interaction(interaction_id)?;
        let outcome = ledger.record_detailed(FeedbackEvent::new(interaction_id, kind, comment))?;
        let event = &outcome.event;

        if let Err(e) = self.remember_feedback(&interaction, &outcome.event) {
            warn!("Feedback {} not stored as memory: {}", event.id, e);
        }

        match (kind, event.comment.as_deref()) {
            (FeedbackKind::Correction, Some(corrected)) => {
                let change = ProposedChange::Correction {
                    original: interaction.response.clone(),
                    corrected: corrected.to_string(),
                    source_ref: format!("feedback:{}", event.id),
                };
                self.submit_and_apply(change, "user correction");
            }
            (FeedbackKind::Safety, comment) => {
                let description = comment
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("safety concern raised on interaction {}", interaction_id));
                self.submit_and_apply(ProposedChange::Safety { description }, "safety feedback");
            }
            _ => {}
        }

        let mut suggested_adaptations = Vec::new();
        if let (Some(rule), Some(engine)) = (&outcome.rule, self.adaptation.ready()) {
            suggested_adaptations = engine.propose(&signature_signals(&rule.trigger_signature));
            if outcome.rule_created && !suggested_adaptations.is_empty() {
                info!("Pattern {} suggests: {}", rule.trigger_signature, rule.suggested_fix);
                self.route_adjustments(&suggested_adaptations, &rule.suggested_fix);
            }
        }

        Ok(FeedbackOutcome {
            feedback_id: event.id,
            reward: event.reward,
            signature: event.signature.clone(),
            suggested_adaptations,
        })
    }

    fn remember_feedback(&self, interaction: &Interaction, event: &FeedbackEvent) -> Result<()> {
        let memory_type = match event.kind {
            FeedbackKind::Positive => MemoryType::Success,
            FeedbackKind::Error => MemoryType::Error,
            _ => MemoryType::Feedback,
        };
        let text = match &event.comment {
            Some(comment) => format!("{} feedback on \"{}\": {}", event.kind, interaction.prompt, comment),
            None => format!("{} feedback on \"{}\"", event.kind, interaction.prompt),
        };
        let mut memory = Memory::new(memory_type, text)
            .with_importance(0.5 + 0.4 * event.reward.abs())
            .with_source("feedback")
            .with_tags([event.kind.as_str().to_string(), event.signature.clone()])
            .with_metadata("interaction_id", json!(interaction.id))
            .with_metadata("feedback_id", json!(event.id));
        if event.kind == FeedbackKind::Safety {
            memory = memory.pinned();
        }
        self.memory()?.store(memory).map(|_| ())
    }

    /// Gate a change and apply it if approved on submission
    fn submit_and_apply(&self, change: ProposedChange, reason: &str) {
        let Some(gate) = self.validation.ready() else {
            warn!("Validation gate unavailable; {} dropped", change.kind());
            return;
        };
        match gate.submit(change, reason, false) {
            Ok(request) if request.status == RequestStatus::Approved => {
                if let Err(e) = self.apply_approved(&request) {
                    warn!("Approved request {} failed to apply: {}", request.id, e);
                }
            }
            Ok(request) => info!("{} request {} awaiting validation", request.kind, request.id),
            Err(e) => warn!("Change not submitted: {}", e),
        }
    }

    /// Propose explicit behavior changes
    pub fn propose_adaptation(
        &self,
        adjustments: &BTreeMap<String, String>,
        reason: &str,
        require_validation: bool,
    ) -> Result<ProposalOutcome> {
        if adjustments.is_empty() {
            return Err(LearningError::invalid("adjustments", "no behavior changes given"));
        }
        let changes = adjustments
            .iter()
            .map(|(k, v)| validate_change(k, v).map(|value| (k.clone(), value)))
            .collect::<Result<BTreeMap<String, String>>>()?;

        let engine = self.adaptation()?;
        let gate = self.validation()?;
        let strategy = if require_validation { Strategy::Validated } else { Strategy::Immediate };

        let request =
            gate.submit(ProposedChange::Adaptation { changes: changes.clone(), strategy }, reason, require_validation)?;
        if request.status != RequestStatus::Approved {
            return Ok(ProposalOutcome {
                status: ProposalStatus::Pending,
                validation_id: Some(request.id),
                version: None,
            });
        }

        let outcome = match engine.commit(&changes, Strategy::Immediate, reason)? {
            CommitOutcome::Applied { version } => ProposalOutcome {
                status: ProposalStatus::Applied,
                validation_id: Some(request.id),
                version: Some(version),
            },
            _ => ProposalOutcome { status: ProposalStatus::Unchanged, validation_id: Some(request.id), version: None },
        };
        Ok(outcome)
    }

    /// Extract knowledge from a document and remember the document itself
    pub fn ingest_document(&self, content: &str, source_ref: &str, domain: &str) -> Result<IngestOutcome> {
        let graph = self.knowledge()?;
        let before = graph.len();
        let item_ids = graph.ingest_document(content, source_ref, domain)?;
        let items_created = graph.len().saturating_sub(before);

        if !content.trim().is_empty() {
            let memory = Memory::new(MemoryType::Document, content)
                .with_source(source_ref)
                .with_metadata("domain", json!(domain))
                .with_metadata("knowledge_items", json!(item_ids.len()));
            if let Err(e) = self.memory().and_then(|store| store.store(memory)) {
                warn!("Document {} not stored as memory: {}", source_ref, e);
            }
        }

        Ok(IngestOutcome { items_created, item_ids })
    }

    /// Fuse memories, knowledge, preferences and behavior for a query
    pub fn query_context(&self, query: &str, max_memories: usize, max_knowledge: usize) -> ContextBundle {
        let memories = self
            .memory
            .ready()
            .map(|store| store.retrieve(query, &MemoryFilter::default(), max_memories))
            .unwrap_or_default();
        let knowledge = self
            .knowledge
            .ready()
            .map(|graph| graph.search(query, None, max_knowledge))
            .unwrap_or_default();
        let preferences = self.preferences.ready().map(|store| store.confident()).unwrap_or_default();
        let behavior = self.adaptation.ready().map(|engine| engine.current());

        ContextBundle { memories, knowledge, preferences, behavior, unavailable: self.unavailable_stores() }
    }

    /// Set a preference the user stated outright
    pub fn set_preference(&self, category: PreferenceCategory, value: &str) -> Result<Preference> {
        self.preferences()?.apply_feedback(category, value)
    }

    pub fn list_pending_validations(&self) -> Result<Vec<ValidationRequest>> {
        Ok(self.validation()?.pending())
    }

    /// Resolve a pending request; approval applies its change
    pub fn resolve_validation(&self, id: Uuid, decision: Decision, rationale: &str) -> Result<ValidationRequest> {
        let request = self.validation()?.resolve(id, decision, rationale)?;
        if request.status == RequestStatus::Approved {
            self.apply_approved(&request)?;
        }
        Ok(request)
    }

    fn apply_approved(&self, request: &ValidationRequest) -> Result<()> {
        match &request.change {
            ProposedChange::Adaptation { changes, strategy } => {
                let engine = self.adaptation()?;
                match strategy {
                    Strategy::Immediate | Strategy::Validated => {
                        engine.apply_validated(changes, &request.reason)?;
                    }
                    Strategy::Gradual | Strategy::Experimental => {
                        engine.commit(changes, *strategy, &request.reason)?;
                    }
                }
            }
            ProposedChange::Knowledge { statement, domain, source_ref } => {
                self.knowledge()?.ingest_document(statement, source_ref, domain)?;
            }
            ProposedChange::Correction { original, corrected, source_ref } => {
                self.knowledge()?.ingest_correction(original, corrected, source_ref)?;
            }
            ProposedChange::Safety { description } => {
                let memory = Memory::new(MemoryType::Error, description.clone())
                    .with_importance(1.0)
                    .with_source("validation")
                    .with_tag("safety")
                    .with_metadata("validation_id", json!(request.id))
                    .pinned();
                self.memory()?.store(memory)?;
            }
            ProposedChange::Permission { action, .. } => {
                info!("Permission for '{}' granted by request {}", action, request.id);
            }
        }
        Ok(())
    }

    /// Apply the experimental shadow behavior to live behavior
    pub fn promote_experiment(&self, reason: &str) -> Result<CommitOutcome> {
        self.adaptation()?.promote_shadow(reason)
    }

    pub fn discard_experiment(&self) -> Result<bool> {
        self.adaptation()?.discard_shadow()
    }

    /// Prune low-value memories
    pub fn consolidate(&self) -> Result<usize> {
        self.memory()?.consolidate()
    }

    pub fn stats(&self) -> CoreStats {
        let knowledge = self.knowledge.ready();
        let ledger = self.feedback.ready();
        CoreStats {
            memory: self.memory.ready().map(|s| s.stats()),
            knowledge_items: knowledge.map(|g| g.len()),
            knowledge_edges: knowledge.map(|g| g.edge_count()),
            interactions: ledger.map(|l| l.interaction_count()),
            feedback_events: ledger.map(|l| l.event_count()),
            correction_rules: ledger.map(|l| l.rules().len()),
            behavior_version: self.adaptation.ready().map(|e| e.current().version),
            pending_validations: self.validation.ready().map(|g| g.pending().len()),
            unavailable: self.unavailable_stores(),
        }
    }

    /// Start the background expiry sweep on the current tokio runtime
    pub fn spawn_expiry_sweeper(&self) -> Result<(JoinHandle<()>, CancellationToken)> {
        let gate = Arc::clone(self.validation.get(VALIDATION)?);
        let period = Duration::from_secs(self.config.validation.sweep_interval_secs.max(1));
        let sweeper = ExpirySweeper::new(gate, period);
        let token = sweeper.shutdown_token();
        Ok((sweeper.start(), token))
    }

    /// Erase all learned state and history
    ///
    /// Stores that failed to load have their artifacts removed so they start
    /// empty on the next open.
    pub fn reset_to_default(&self, _confirm: ResetConfirmation) -> Result<()> {
        warn!("Resetting learning core at {}", self.data_dir.display());

        match &self.memory {
            Slot::Ready(store) => store.clear()?,
            Slot::Unavailable(_) => self.remove_artifact(MEMORY, "memory.jsonl")?,
        }
        match &self.preferences {
            Slot::Ready(store) => store.clear()?,
            Slot::Unavailable(_) => self.remove_artifact(PREFERENCES, "preferences.json")?,
        }
        match &self.knowledge {
            Slot::Ready(graph) => graph.clear()?,
            Slot::Unavailable(_) => self.remove_artifact(KNOWLEDGE, "knowledge.jsonl")?,
        }
        match &self.feedback {
            Slot::Ready(ledger) => ledger.clear()?,
            Slot::Unavailable(_) => self.remove_artifact(FEEDBACK, "feedback.jsonl")?,
        }
        match &self.adaptation {
            Slot::Ready(engine) => engine.reset()?,
            Slot::Unavailable(_) => self.remove_artifact(ADAPTATION, "adaptation")?,
        }
        match &self.validation {
            Slot::Ready(gate) => gate.clear()?,
            Slot::Unavailable(_) => self.remove_artifact(VALIDATION, "validation")?,
        }

        info!("Learning core reset to defaults");
        Ok(())
    }

    fn remove_artifact(&self, store: &'static str, name: &str) -> Result<()> {
        let path = self.data_dir.join(name);
        let result = if path.is_dir() { fs::remove_dir_all(&path) } else { fs::remove_file(&path) };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LearningError::unavailable(store, e)),
        }
    }
}

/// Signals a feedback signature contributes to rule matching
fn signature_signals(signature: &str) -> Signals {
    let mut parts = signature.split(':');
    let kind = parts.next().unwrap_or_default();
    let bucket = parts.next().unwrap_or("unknown");
    let facet = parts.next().unwrap_or("general");

    let mut signals = Signals::new();
    signals.insert("feedback_signature".to_string(), json!(signature));
    signals.insert("feedback_kind".to_string(), json!(kind));
    signals.insert("response_length".to_string(), json!(bucket));
    signals.insert("feedback_facet".to_string(), json!(facet));
    signals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_signals() {
        let signals = signature_signals("negative:short:detail");
        assert_eq!(signals["feedback_kind"], json!("negative"));
        assert_eq!(signals["response_length"], json!("short"));
        assert_eq!(signals["feedback_facet"], json!("detail"));
    }
}
