use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use super::signature::{SignatureBuilder, suggested_fix};
use super::{CorrectionRule, FeedbackConfig, FeedbackEvent, Interaction, Pattern};
use crate::error::{LearningError, Result};
use crate::storage::Journal;

const STORE: &str = "feedback";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LedgerRecord {
    Interaction { interaction: Interaction },
    Event { event: FeedbackEvent },
}

/// What recording one event changed
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub event: FeedbackEvent,
    pub pattern: Pattern,
    /// Rule for the event's signature, if the pattern has crossed the threshold
    pub rule: Option<CorrectionRule>,
    /// True only for the event that first created the rule
    pub rule_created: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    interactions: HashMap<Uuid, Interaction>,
    events: Vec<FeedbackEvent>,
    patterns: HashMap<String, Pattern>,
    rules: HashMap<String, CorrectionRule>,
}

impl LedgerState {
    /// Fold one event into its pattern and, past the threshold, its rule
    fn mine(&mut self, event: &FeedbackEvent, min_occurrences: u32) -> (Pattern, Option<CorrectionRule>, bool) {
        let pattern = self.patterns.entry(event.signature.clone()).or_insert_with(|| Pattern {
            signature: event.signature.clone(),
            occurrences: 0,
            total_reward: 0.0,
            first_seen: event.created_at,
            last_seen: event.created_at,
            event_ids: BTreeSet::new(),
        });
        pattern.occurrences += 1;
        pattern.total_reward += event.reward;
        pattern.first_seen = pattern.first_seen.min(event.created_at);
        pattern.last_seen = pattern.last_seen.max(event.created_at);
        pattern.event_ids.insert(event.id);
        let pattern = pattern.clone();

        if pattern.occurrences < min_occurrences || pattern.average_reward() >= 0.0 {
            return (pattern, self.rules.get(&event.signature).cloned(), false);
        }

        let mut created = false;
        let rule = self
            .rules
            .entry(event.signature.clone())
            .and_modify(|rule| {
                rule.derived_from.insert(event.id);
                rule.reinforcement += 1;
                rule.updated_at = event.created_at;
            })
            .or_insert_with(|| {
                created = true;
                CorrectionRule {
                    trigger_signature: event.signature.clone(),
                    suggested_fix: suggested_fix(&event.signature),
                    derived_from: pattern.event_ids.clone(),
                    reinforcement: 0,
                    created_at: event.created_at,
                    updated_at: event.created_at,
                }
            })
            .clone();

        (pattern, Some(rule), created)
    }
}

/// Ledger of interactions and the feedback given on them
///
/// Patterns and rules are derived state: they are maintained incrementally
/// as events arrive and rebuilt from the event journal at load.
pub struct FeedbackLedger {
    config: FeedbackConfig,
    signatures: SignatureBuilder,
    journal: Journal<LedgerRecord>,
    state: RwLock<LedgerState>,
}

impl FeedbackLedger {
    pub fn open(path: &Path, config: FeedbackConfig) -> Result<Self> {
        let journal = Journal::open(STORE, path)?;
        let mut state = LedgerState::default();

        for record in journal.replay()? {
            match record {
                LedgerRecord::Interaction { interaction } => {
                    state.interactions.insert(interaction.id, interaction);
                }
                LedgerRecord::Event { event } => {
                    state.mine(&event, config.min_occurrences);
                    state.events.push(event);
                }
            }
        }

        info!(
            "Feedback ledger loaded: {} interactions, {} events, {} rules",
            state.interactions.len(),
            state.events.len(),
            state.rules.len()
        );
        Ok(Self {
            signatures: SignatureBuilder::new(&config),
            config,
            journal,
            state: RwLock::new(state),
        })
    }

    pub fn record_interaction(&self, interaction: Interaction) -> Result<Uuid> {
        let id = interaction.id;
        let mut state = self.state.write();
        self.journal.append(&LedgerRecord::Interaction { interaction: interaction.clone() })?;
        state.interactions.insert(id, interaction);
        Ok(id)
    }

    pub fn interaction(&self, id: Uuid) -> Result<Interaction> {
        self.state
            .read()
            .interactions
            .get(&id)
            .cloned()
            .ok_or_else(|| LearningError::not_found("interaction", id))
    }

    pub fn record(&self, event: FeedbackEvent) -> Result<Uuid> {
        self.record_detailed(event).map(|outcome| outcome.event.id)
    }

    /// Record an event, deriving its reward and signature
    pub fn record_detailed(&self, mut event: FeedbackEvent) -> Result<RecordOutcome> {
        event.reward = event.kind.reward();

        let mut state = self.state.write();
        if event.signature.is_empty() {
            let response = state.interactions.get(&event.interaction_ref).map(|i| i.response.as_str());
            event.signature = self.signatures.build(event.kind, response, event.comment.as_deref());
        }

        self.journal.append(&LedgerRecord::Event { event: event.clone() })?;
        let (pattern, rule, rule_created) = state.mine(&event, self.config.min_occurrences);
        state.events.push(event.clone());

        debug!(
            "Feedback {} recorded: {} ({} occurrences)",
            event.id, event.signature, pattern.occurrences
        );
        if rule_created {
            info!("Correction rule created for {}", event.signature);
        }
        Ok(RecordOutcome { event, pattern, rule, rule_created })
    }

    /// Patterns seen at least `min_occurrences` times, most frequent first
    pub fn patterns(&self, min_occurrences: u32) -> Vec<Pattern> {
        let state = self.state.read();
        let mut patterns: Vec<Pattern> = state
            .patterns
            .values()
            .filter(|p| p.occurrences >= min_occurrences)
            .cloned()
            .collect();
        patterns.sort_by(|a, b| b.occurrences.cmp(&a.occurrences).then(a.signature.cmp(&b.signature)));
        patterns
    }

    /// Frequent patterns whose average reward is clearly negative
    pub fn problematic_patterns(&self) -> Vec<Pattern> {
        self.patterns(self.config.min_occurrences)
            .into_iter()
            .filter(|p| p.average_reward() < self.config.problematic_reward)
            .collect()
    }

    pub fn suggest_correction(&self, signature: &str) -> Option<CorrectionRule> {
        self.state.read().rules.get(signature).cloned()
    }

    pub fn rules(&self) -> Vec<CorrectionRule> {
        let state = self.state.read();
        let mut rules: Vec<CorrectionRule> = state.rules.values().cloned().collect();
        rules.sort_by(|a, b| a.trigger_signature.cmp(&b.trigger_signature));
        rules
    }

    pub fn events(&self) -> Vec<FeedbackEvent> {
        self.state.read().events.clone()
    }

    pub fn event_count(&self) -> usize {
        self.state.read().events.len()
    }

    pub fn interaction_count(&self) -> usize {
        self.state.read().interactions.len()
    }

    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.write();
        self.journal.clear()?;
        *state = LedgerState::default();
        Ok(())
    }
}
