use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::behavior::{BehaviorConfig, HistoryEntry, interpolate, ordinal_scale, validate_change};
use super::rules::{AdaptationRule, Signals, default_rules};
use super::{AdaptationConfig, Strategy};
use crate::error::{LearningError, Result};
use crate::storage::{Journal, read_json, remove_if_exists, write_json_atomic};

const STORE: &str = "adaptation";

/// A behavior change proposed by a matching rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub key: String,
    pub value: String,
    pub strategy: Strategy,
    pub priority: i32,
    /// Name of the rule that proposed it
    pub rule: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommitOutcome {
    Applied { version: u64 },
    Scheduled { keys: Vec<String> },
    Shadowed,
    /// Must pass the validation gate before it can be applied
    RequiresValidation,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GradualChange {
    from: String,
    to: String,
    step: u32,
    reason: String,
}

/// Engine state that is not derivable from history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PendingState {
    #[serde(default)]
    gradual: BTreeMap<String, GradualChange>,
    #[serde(default)]
    shadow: Option<BehaviorConfig>,
}

#[derive(Debug)]
struct EngineInner {
    current: BehaviorConfig,
    history: Vec<HistoryEntry>,
    rules: Vec<AdaptationRule>,
    pending: PendingState,
}

impl EngineInner {
    /// Target a key is heading to, counting scheduled gradual moves
    fn effective(&self, key: &str) -> Option<&str> {
        self.pending.gradual.get(key).map(|g| g.to.as_str()).or_else(|| self.current.get(key))
    }
}

/// Owns the live behavior configuration and its adaptation rules
pub struct AdaptationEngine {
    config: AdaptationConfig,
    rules_path: PathBuf,
    state_path: PathBuf,
    history: Journal<HistoryEntry>,
    inner: RwLock<EngineInner>,
}

impl AdaptationEngine {
    /// Open the engine rooted at `dir`
    ///
    /// The current behavior is rebuilt by replaying history onto the defaults.
    pub fn open(dir: &Path, config: AdaptationConfig) -> Result<Self> {
        let rules_path = dir.join("rules.json");
        let state_path = dir.join("state.json");
        let history: Journal<HistoryEntry> = Journal::open(STORE, dir.join("history.jsonl"))?;

        let rules = read_json::<Vec<AdaptationRule>>(STORE, &rules_path)?.unwrap_or_else(default_rules);
        let entries = history.replay()?;

        let mut current = BehaviorConfig::default();
        for entry in &entries {
            if entry.version != current.version + 1 {
                return Err(LearningError::unavailable(
                    STORE,
                    format!("history version {} follows {}", entry.version, current.version),
                ));
            }
            current.values.extend(entry.changes.clone());
            current.version = entry.version;
        }

        let pending = read_json::<PendingState>(STORE, &state_path)?.unwrap_or_default();

        info!(
            "Adaptation engine loaded: version {}, {} rules, {} gradual changes in flight",
            current.version,
            rules.len(),
            pending.gradual.len()
        );
        Ok(Self {
            config,
            rules_path,
            state_path,
            history,
            inner: RwLock::new(EngineInner { current, history: entries, rules, pending }),
        })
    }

    /// Adjustments the matching rules suggest for these signals
    ///
    /// Higher-priority rules claim keys first. Adjustments that would not
    /// change the effective value are dropped.
    pub fn propose(&self, signals: &Signals) -> Vec<Adjustment> {
        let inner = self.inner.read();
        let mut matching: Vec<&AdaptationRule> =
            inner.rules.iter().filter(|r| r.condition.matches(signals)).collect();
        matching.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut claimed = BTreeSet::new();
        let mut adjustments = Vec::new();
        for rule in matching {
            for (key, value) in &rule.adjustment {
                if !claimed.insert(key.clone()) {
                    continue;
                }
                if inner.effective(key) == Some(value.as_str()) {
                    continue;
                }
                adjustments.push(Adjustment {
                    key: key.clone(),
                    value: value.clone(),
                    strategy: rule.strategy,
                    priority: rule.priority,
                    rule: rule.name.clone(),
                });
            }
        }
        debug!("{} adjustments proposed", adjustments.len());
        adjustments
    }

    /// Commit changes under `strategy`
    pub fn commit(
        &self,
        changes: &BTreeMap<String, String>,
        strategy: Strategy,
        reason: &str,
    ) -> Result<CommitOutcome> {
        let changes = normalize(changes)?;
        match strategy {
            Strategy::Validated => Ok(CommitOutcome::RequiresValidation),
            Strategy::Immediate => self.apply_now(changes, Strategy::Immediate, reason),
            Strategy::Gradual => self.schedule(changes, reason),
            Strategy::Experimental => self.shadow_changes(changes),
        }
    }

    /// Apply changes that passed validation
    pub fn apply_validated(&self, changes: &BTreeMap<String, String>, reason: &str) -> Result<CommitOutcome> {
        let changes = normalize(changes)?;
        self.apply_now(changes, Strategy::Validated, reason)
    }

    fn apply_now(
        &self,
        changes: BTreeMap<String, String>,
        strategy: Strategy,
        reason: &str,
    ) -> Result<CommitOutcome> {
        let mut inner = self.inner.write();

        let mut pending = inner.pending.clone();
        let cancelled: Vec<String> =
            changes.keys().filter(|k| pending.gradual.remove(*k).is_some()).cloned().collect();
        if !cancelled.is_empty() {
            debug!("Immediate change supersedes gradual schedule for {:?}", cancelled);
            write_json_atomic(STORE, &self.state_path, &pending)?;
            inner.pending = pending;
        }

        match self.append_entry(&mut inner, changes, strategy, reason)? {
            Some(version) => Ok(CommitOutcome::Applied { version }),
            None => Ok(CommitOutcome::Unchanged),
        }
    }

    fn schedule(&self, changes: BTreeMap<String, String>, reason: &str) -> Result<CommitOutcome> {
        let mut inner = self.inner.write();
        let mut pending = inner.pending.clone();
        let mut keys = Vec::new();

        for (key, to) in changes {
            let from = inner.current.get(&key).unwrap_or_default().to_string();
            if from == to {
                pending.gradual.remove(&key);
                continue;
            }
            pending.gradual.insert(key.clone(), GradualChange { from, to, step: 0, reason: reason.to_string() });
            keys.push(key);
        }

        if keys.is_empty() {
            return Ok(CommitOutcome::Unchanged);
        }
        write_json_atomic(STORE, &self.state_path, &pending)?;
        inner.pending = pending;
        info!("Scheduled gradual change for {:?}", keys);
        Ok(CommitOutcome::Scheduled { keys })
    }

    fn shadow_changes(&self, changes: BTreeMap<String, String>) -> Result<CommitOutcome> {
        let mut inner = self.inner.write();
        let mut pending = inner.pending.clone();
        let shadow = pending.shadow.get_or_insert_with(|| inner.current.clone());
        shadow.values.extend(changes);

        write_json_atomic(STORE, &self.state_path, &pending)?;
        inner.pending = pending;
        debug!("Experimental changes written to shadow config");
        Ok(CommitOutcome::Shadowed)
    }

    /// Move every in-flight gradual change one step
    ///
    /// Returns the new version when a step changed live behavior.
    pub fn advance(&self) -> Result<Option<u64>> {
        let mut inner = self.inner.write();
        if inner.pending.gradual.is_empty() {
            return Ok(None);
        }

        let total = self.config.gradual_steps.max(1);
        let mut pending = inner.pending.clone();
        let mut changes = BTreeMap::new();
        let mut reasons = BTreeSet::new();

        for (key, change) in pending.gradual.iter_mut() {
            change.step += 1;
            let current = inner.current.get(key).unwrap_or_default();
            let next = next_value(key, current, change, total);
            if next != current {
                changes.insert(key.clone(), next);
                reasons.insert(change.reason.clone());
            }
        }
        pending.gradual.retain(|key, change| {
            let reached =
                changes.get(key).map(String::as_str).or(inner.current.get(key)) == Some(change.to.as_str());
            !reached && change.step < total
        });

        let reason = reasons.into_iter().collect::<Vec<_>>().join("; ");
        let version = self.append_entry(&mut inner, changes, Strategy::Gradual, &reason)?;
        write_json_atomic(STORE, &self.state_path, &pending)?;
        inner.pending = pending;
        Ok(version)
    }

    /// Append one history entry and apply it; `None` if nothing changes
    fn append_entry(
        &self,
        inner: &mut EngineInner,
        changes: BTreeMap<String, String>,
        strategy: Strategy,
        reason: &str,
    ) -> Result<Option<u64>> {
        let changes: BTreeMap<String, String> =
            changes.into_iter().filter(|(k, v)| inner.current.get(k) != Some(v.as_str())).collect();
        if changes.is_empty() {
            return Ok(None);
        }

        let previous = changes
            .keys()
            .filter_map(|k| inner.current.get(k).map(|v| (k.clone(), v.to_string())))
            .collect();
        let entry = HistoryEntry {
            version: inner.current.version + 1,
            changes,
            previous,
            strategy,
            reason: reason.to_string(),
            committed_at: Utc::now(),
        };

        self.history.append(&entry)?;
        inner.current.values.extend(entry.changes.clone());
        inner.current.version = entry.version;
        info!("Behavior v{} committed ({}): {:?}", entry.version, strategy, entry.changes);
        inner.history.push(entry);
        Ok(Some(inner.current.version))
    }

    pub fn current(&self) -> BehaviorConfig {
        self.inner.read().current.clone()
    }

    pub fn shadow(&self) -> Option<BehaviorConfig> {
        self.inner.read().pending.shadow.clone()
    }

    /// Apply the shadow configuration to live behavior
    pub fn promote_shadow(&self, reason: &str) -> Result<CommitOutcome> {
        let mut inner = self.inner.write();
        let Some(shadow) = inner.pending.shadow.clone() else {
            return Ok(CommitOutcome::Unchanged);
        };

        let version = self.append_entry(&mut inner, shadow.values, Strategy::Experimental, reason)?;
        let mut pending = inner.pending.clone();
        pending.shadow = None;
        write_json_atomic(STORE, &self.state_path, &pending)?;
        inner.pending = pending;

        Ok(match version {
            Some(version) => CommitOutcome::Applied { version },
            None => CommitOutcome::Unchanged,
        })
    }

    /// Drop the shadow configuration; false when there was none
    pub fn discard_shadow(&self) -> Result<bool> {
        let mut inner = self.inner.write();
        if inner.pending.shadow.is_none() {
            return Ok(false);
        }
        let mut pending = inner.pending.clone();
        pending.shadow = None;
        write_json_atomic(STORE, &self.state_path, &pending)?;
        inner.pending = pending;
        Ok(true)
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.read().history.clone()
    }

    /// History entry that produced `version`
    pub fn entry(&self, version: u64) -> Option<HistoryEntry> {
        let inner = self.inner.read();
        let idx = usize::try_from(version).ok()?.checked_sub(1)?;
        inner.history.get(idx).cloned()
    }

    /// Keys with a gradual change still in flight
    pub fn scheduled(&self) -> Vec<String> {
        self.inner.read().pending.gradual.keys().cloned().collect()
    }

    /// Add or replace (by name) a rule
    pub fn add_rule(&self, mut rule: AdaptationRule) -> Result<()> {
        rule.adjustment = normalize(&rule.adjustment)?;

        let mut inner = self.inner.write();
        let mut rules = inner.rules.clone();
        match rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
        write_json_atomic(STORE, &self.rules_path, &rules)?;
        inner.rules = rules;
        Ok(())
    }

    pub fn rules(&self) -> Vec<AdaptationRule> {
        self.inner.read().rules.clone()
    }

    /// Back to default behavior and rules, with no history
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.inner.write();
        self.history.clear()?;
        remove_if_exists(STORE, &self.state_path)?;
        remove_if_exists(STORE, &self.rules_path)?;
        *inner = EngineInner {
            current: BehaviorConfig::default(),
            history: Vec::new(),
            rules: default_rules(),
            pending: PendingState::default(),
        };
        warn!("Adaptation engine reset to defaults");
        Ok(())
    }
}

fn normalize(changes: &BTreeMap<String, String>) -> Result<BTreeMap<String, String>> {
    changes.iter().map(|(k, v)| Ok((k.clone(), validate_change(k, v)?))).collect()
}

/// Next value of a gradual change
///
/// Ordinal keys move one position per step; other keys interpolate from the
/// starting value. The last allowed step always lands on the target.
fn next_value(key: &str, current: &str, change: &GradualChange, total: u32) -> String {
    if change.step >= total {
        return change.to.clone();
    }
    if let Some(scale) = ordinal_scale(key) {
        let position = |v: &str| scale.iter().position(|s| *s == v);
        if let (Some(at), Some(target)) = (position(current), position(&change.to)) {
            let next = match at.cmp(&target) {
                std::cmp::Ordering::Less => at + 1,
                std::cmp::Ordering::Greater => at - 1,
                std::cmp::Ordering::Equal => at,
            };
            return scale[next].to_string();
        }
    }
    interpolate(key, &change.from, &change.to, change.step, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptation::behavior::{DETAIL_LEVEL, PROACTIVITY, TONE};
    use crate::adaptation::rules::Condition;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_engine(dir: &TempDir) -> AdaptationEngine {
        AdaptationEngine::open(&dir.path().join("adaptation"), AdaptationConfig::default()).unwrap()
    }

    fn changes(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_propose_respects_priority() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        let signals: Signals =
            [("expertise".to_string(), json!("beginner")), ("sentiment".to_string(), json!("frustrated"))]
                .into_iter()
                .collect();
        let proposed = engine.propose(&signals);

        // frustrated_user (100) claims detail_level before beginner_user (80)
        assert_eq!(proposed[0].rule, "frustrated_user");
        let detail: Vec<&Adjustment> = proposed.iter().filter(|a| a.key == DETAIL_LEVEL).collect();
        assert_eq!(detail.len(), 1);
        assert_eq!(detail[0].rule, "frustrated_user");
        assert!(proposed.iter().any(|a| a.key == "code_style" && a.value == "commented"));
        assert!(proposed.windows(2).all(|w| w[0].priority >= w[1].priority));
    }

    #[test]
    fn test_propose_drops_current_values() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);
        engine.commit(&changes(&[(DETAIL_LEVEL, "detailed")]), Strategy::Immediate, "test").unwrap();

        let signals: Signals = [("task_type".to_string(), json!("debugging"))].into_iter().collect();
        let proposed = engine.propose(&signals);
        assert!(proposed.iter().all(|a| a.key != DETAIL_LEVEL));
        assert!(!proposed.is_empty());
    }

    #[test]
    fn test_immediate_commit_versions_history() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        let outcome = engine.commit(&changes(&[(TONE, "Casual")]), Strategy::Immediate, "user asked").unwrap();
        assert_eq!(outcome, CommitOutcome::Applied { version: 1 });
        assert_eq!(engine.current().get(TONE), Some("casual"));

        let again = engine.commit(&changes(&[(TONE, "casual")]), Strategy::Immediate, "repeat").unwrap();
        assert_eq!(again, CommitOutcome::Unchanged);

        let entry = engine.entry(1).unwrap();
        assert_eq!(entry.previous.get(TONE).map(String::as_str), Some("professional"));
        assert!(engine.entry(2).is_none());

        assert!(matches!(
            engine.commit(&changes(&[("volume", "loud")]), Strategy::Immediate, "bad"),
            Err(LearningError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_validated_requires_gate() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        let wanted = changes(&[(DETAIL_LEVEL, "detailed")]);
        assert_eq!(engine.commit(&wanted, Strategy::Validated, "r").unwrap(), CommitOutcome::RequiresValidation);
        assert_eq!(engine.current().get(DETAIL_LEVEL), Some("moderate"));

        engine.apply_validated(&wanted, "approved").unwrap();
        assert_eq!(engine.current().get(DETAIL_LEVEL), Some("detailed"));
        assert_eq!(engine.history()[0].strategy, Strategy::Validated);
    }

    #[test]
    fn test_gradual_moves_one_step_per_advance() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        let outcome = engine
            .commit(&changes(&[(DETAIL_LEVEL, "minimal"), (TONE, "friendly")]), Strategy::Gradual, "long chat")
            .unwrap();
        assert!(matches!(outcome, CommitOutcome::Scheduled { ref keys } if keys.len() == 2));
        assert_eq!(engine.current().get(DETAIL_LEVEL), Some("moderate"));

        engine.advance().unwrap();
        assert_eq!(engine.current().get(DETAIL_LEVEL), Some("concise"));
        assert_eq!(engine.current().get(TONE), Some("friendly"));

        engine.advance().unwrap();
        assert_eq!(engine.current().get(DETAIL_LEVEL), Some("minimal"));
        assert!(engine.scheduled().is_empty());
        assert_eq!(engine.advance().unwrap(), None);
        assert_eq!(engine.history().len(), 2);
        assert!(engine.history().iter().all(|e| e.strategy == Strategy::Gradual));
    }

    #[test]
    fn test_gradual_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let engine = open_engine(&dir);
            engine.commit(&changes(&[(PROACTIVITY, "high")]), Strategy::Gradual, "r").unwrap();
        }
        let engine = open_engine(&dir);
        assert_eq!(engine.scheduled(), vec![PROACTIVITY.to_string()]);
        assert_eq!(engine.advance().unwrap(), Some(1));
        assert_eq!(engine.current().get(PROACTIVITY), Some("high"));
    }

    #[test]
    fn test_experimental_shadow_promotion() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        let outcome = engine.commit(&changes(&[(TONE, "playful")]), Strategy::Experimental, "try").unwrap();
        assert_eq!(outcome, CommitOutcome::Shadowed);
        assert_eq!(engine.current().get(TONE), Some("professional"));
        assert_eq!(engine.shadow().unwrap().get(TONE), Some("playful"));

        assert_eq!(engine.promote_shadow("looked good").unwrap(), CommitOutcome::Applied { version: 1 });
        assert_eq!(engine.current().get(TONE), Some("playful"));
        assert!(engine.shadow().is_none());
        assert!(!engine.discard_shadow().unwrap());
    }

    #[test]
    fn test_history_replay_and_reset() {
        let dir = TempDir::new().unwrap();
        {
            let engine = open_engine(&dir);
            engine.commit(&changes(&[(TONE, "casual")]), Strategy::Immediate, "a").unwrap();
            engine.commit(&changes(&[(DETAIL_LEVEL, "concise")]), Strategy::Immediate, "b").unwrap();
            let rule = AdaptationRule::new("night_owl", Condition::equals("hour", "late"), Strategy::Immediate, 10)
                .set(TONE, "calm");
            engine.add_rule(rule).unwrap();
        }

        let engine = open_engine(&dir);
        let current = engine.current();
        assert_eq!(current.version, 2);
        assert_eq!(current.get(TONE), Some("casual"));
        assert!(engine.rules().iter().any(|r| r.name == "night_owl"));

        engine.reset().unwrap();
        assert_eq!(engine.current(), BehaviorConfig::default());
        assert!(engine.history().is_empty());
        assert!(open_engine(&dir).rules().iter().all(|r| r.name != "night_owl"));
    }
}
