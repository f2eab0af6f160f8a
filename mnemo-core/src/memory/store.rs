use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::index::MemoryIndex;
use super::scoring::{ScoredMemory, effective_importance, rank, score_memory};
use super::{Memory, MemoryConfig, MemoryType};
use crate::embeddings::{Embedder, cosine_similarity};
use crate::error::{LearningError, Result};
use crate::storage::Journal;

const STORE: &str = "memory";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum MemoryRecord {
    Put { memory: Memory },
    Accessed { id: Uuid, at: DateTime<Utc>, importance: f32, access_count: u32 },
    Remove { id: Uuid },
    Consolidated { at: DateTime<Utc> },
}

/// Type and tag narrowing applied before scoring
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub types: Vec<MemoryType>,
    pub tags: Vec<String>,
}

impl MemoryFilter {
    pub fn of_type(mut self, memory_type: MemoryType) -> Self {
        self.types.push(memory_type);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryStats {
    pub total: usize,
    pub pinned: usize,
    pub by_type: BTreeMap<String, usize>,
    pub distinct_tags: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    memories: HashMap<Uuid, Memory>,
    index: MemoryIndex,
    consolidated_at: Option<DateTime<Utc>>,
}

impl MemoryState {
    fn put(&mut self, memory: Memory) {
        if let Some(previous) = self.memories.remove(&memory.id) {
            self.index.remove(&previous);
        }
        self.index.insert(&memory);
        self.memories.insert(memory.id, memory);
    }

    fn remove(&mut self, id: &Uuid) -> Option<Memory> {
        let memory = self.memories.remove(id)?;
        self.index.remove(&memory);
        Some(memory)
    }
}

/// Persistent, embedded memory store
///
/// Mutations hold the write lock across journal append and index update.
/// Readers only ever observe committed records.
pub struct MemoryStore {
    config: MemoryConfig,
    embedder: Arc<dyn Embedder>,
    journal: Journal<MemoryRecord>,
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Open the store at `path`, rebuilding indexes from the journal
    pub fn open(path: &Path, config: MemoryConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let journal = Journal::open(STORE, path)?;
        let records = journal.replay()?;
        let replayed = records.len();
        let dimension = embedder.dimension();

        let mut state = MemoryState::default();
        let mut dropped = 0usize;
        for record in records {
            match record {
                MemoryRecord::Put { memory } if memory.embedding.len() != dimension => {
                    warn!(
                        "Dropping memory {} with embedding dimension {} (expected {})",
                        memory.id,
                        memory.embedding.len(),
                        dimension
                    );
                    dropped += 1;
                }
                MemoryRecord::Put { memory } => state.put(memory),
                MemoryRecord::Accessed { id, at, importance, access_count } => {
                    if let Some(memory) = state.memories.get_mut(&id) {
                        memory.last_accessed_at = at;
                        memory.importance = importance;
                        memory.access_count = access_count;
                    }
                }
                MemoryRecord::Remove { id } => {
                    state.remove(&id);
                }
                MemoryRecord::Consolidated { at } => {
                    state.consolidated_at = state.consolidated_at.max(Some(at));
                }
            }
        }

        let store = Self { config, embedder, journal, state: RwLock::new(state) };

        // Rebuild the log when it carries invalid or superseded records
        let live = store.state.read().memories.len();
        if dropped > 0 || replayed > live * 2 + 64 {
            store.compact()?;
        }

        info!("Memory store loaded: {} memories", live);
        Ok(store)
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Persist a memory, embedding its text when no embedding is supplied
    pub fn store(&self, mut memory: Memory) -> Result<Uuid> {
        if memory.embedding.is_empty() {
            memory.embedding = self.embedder.embed(&memory.text);
        }
        if memory.embedding.len() != self.dimension() {
            return Err(LearningError::invalid(
                "embedding",
                format!(
                    "dimension {} does not match store dimension {}",
                    memory.embedding.len(),
                    self.dimension()
                ),
            ));
        }
        memory.importance = memory.importance.clamp(0.0, 1.0);

        let id = memory.id;
        let mut state = self.state.write();
        self.journal.append(&MemoryRecord::Put { memory: memory.clone() })?;
        state.put(memory);
        debug!("Stored memory {}", id);
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Result<Memory> {
        self.state
            .read()
            .memories
            .get(&id)
            .cloned()
            .ok_or_else(|| LearningError::not_found("memory", id))
    }

    pub fn remove(&self, id: Uuid) -> Result<Memory> {
        let mut state = self.state.write();
        if !state.memories.contains_key(&id) {
            return Err(LearningError::not_found("memory", id));
        }
        self.journal.append(&MemoryRecord::Remove { id })?;
        state.remove(&id).ok_or_else(|| LearningError::not_found("memory", id))
    }

    pub fn retrieve(&self, query_text: &str, filter: &MemoryFilter, top_k: usize) -> Vec<Memory> {
        self.retrieve_at(query_text, filter, top_k, Utc::now())
    }

    /// Rank in-scope memories for `query_text` and record the access
    pub fn retrieve_at(
        &self,
        query_text: &str,
        filter: &MemoryFilter,
        top_k: usize,
        now: DateTime<Utc>,
    ) -> Vec<Memory> {
        if top_k == 0 {
            return Vec::new();
        }
        let query_embedding = self.embedder.embed(query_text);

        let selected: Vec<Uuid> = {
            let state = self.state.read();
            let candidates: Vec<&Memory> =
                match state.index.candidates(&filter.types, &filter.tags) {
                    Some(ids) => ids.iter().filter_map(|id| state.memories.get(id)).collect(),
                    None => state.memories.values().collect(),
                };
            let mut scored: Vec<(Uuid, ScoredMemory)> = candidates
                .into_iter()
                .map(|m| (m.id, score_memory(m, query_text, &query_embedding, now, &self.config)))
                .collect();

            scored.sort_by(|a, b| rank(&a.1, &b.1));
            scored.into_iter().take(top_k).map(|(id, _)| id).collect()
        };

        if selected.is_empty() {
            return Vec::new();
        }
        self.record_access(&selected, now)
    }

    fn record_access(&self, ids: &[Uuid], now: DateTime<Utc>) -> Vec<Memory> {
        let mut state = self.state.write();
        let mut results = Vec::with_capacity(ids.len());

        for id in ids {
            let Some((importance, access_count)) = state.memories.get(id).map(|memory| {
                let importance = (effective_importance(memory, now, self.config.half_life_days)
                    + self.config.retrieval_boost)
                    .min(1.0);
                (importance, memory.access_count.saturating_add(1))
            }) else {
                continue;
            };
            let record = MemoryRecord::Accessed { id: *id, at: now, importance, access_count };

            match self.journal.append(&record) {
                Ok(()) => {
                    if let Some(memory) = state.memories.get_mut(id) {
                        memory.last_accessed_at = now;
                        memory.importance = importance;
                        memory.access_count = access_count;
                        results.push(memory.clone());
                    }
                }
                Err(e) => {
                    warn!("Failed to persist access for memory {}: {}", id, e);
                    results.extend(state.memories.get(id).cloned());
                }
            }
        }

        results
    }

    /// Consolidate against the wall clock
    ///
    /// Decay is evaluated at the last consolidation instant until
    /// `consolidation_interval_hours` have passed, so back-to-back calls
    /// remove nothing further.
    pub fn consolidate(&self) -> Result<usize> {
        self.consolidate_from(Utc::now())
    }

    fn consolidate_from(&self, wall_clock: DateTime<Utc>) -> Result<usize> {
        let interval = Duration::milliseconds((self.config.consolidation_interval_hours * 3_600_000.0) as i64);
        let at = self
            .state
            .read()
            .consolidated_at
            .filter(|last| *last <= wall_clock && wall_clock - *last < interval)
            .unwrap_or(wall_clock);
        self.consolidate_at(at)
    }

    /// Remove low-value memories and compact the journal
    ///
    /// Retained memories are not modified, so repeating the call at the same
    /// instant removes nothing further.
    pub fn consolidate_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.write();
        let marker = MemoryRecord::Consolidated { at: now };
        let doomed: Vec<Uuid> = state
            .memories
            .values()
            .filter(|m| !m.is_pinned())
            .filter(|m| m.access_count < self.config.min_access_count)
            .filter(|m| {
                effective_importance(m, now, self.config.half_life_days)
                    < self.config.consolidation_threshold
            })
            .map(|m| m.id)
            .collect();

        if doomed.is_empty() {
            if state.consolidated_at < Some(now) {
                self.journal.append(&marker)?;
                state.consolidated_at = Some(now);
            }
            return Ok(0);
        }

        let records: Vec<MemoryRecord> =
            doomed.iter().map(|id| MemoryRecord::Remove { id: *id }).chain([marker]).collect();
        self.journal.append_all(&records)?;
        for id in &doomed {
            state.remove(id);
        }
        state.consolidated_at = state.consolidated_at.max(Some(now));

        let retained: Vec<MemoryRecord> = state
            .memories
            .values()
            .map(|m| MemoryRecord::Put { memory: m.clone() })
            .chain(state.consolidated_at.map(|at| MemoryRecord::Consolidated { at }))
            .collect();
        if let Err(e) = self.journal.compact(&retained) {
            warn!("Memory journal compaction failed, will retry: {}", e);
        }

        info!("Consolidated memory store: removed {}", doomed.len());
        Ok(doomed.len())
    }

    fn compact(&self) -> Result<()> {
        let state = self.state.read();
        let mut memories: Vec<&Memory> = state.memories.values().collect();
        memories.sort_by_key(|m| m.created_at);
        let records: Vec<MemoryRecord> = memories
            .into_iter()
            .map(|m| MemoryRecord::Put { memory: m.clone() })
            .chain(state.consolidated_at.map(|at| MemoryRecord::Consolidated { at }))
            .collect();
        self.journal.compact(&records)
    }

    /// Memories most similar to `id`, excluding the memory itself
    ///
    /// Read-only: access counts are left alone.
    pub fn related(&self, id: Uuid, top_k: usize, min_similarity: f32) -> Result<Vec<Memory>> {
        let state = self.state.read();
        let source = state.memories.get(&id).ok_or_else(|| LearningError::not_found("memory", id))?;

        let mut scored: Vec<(f32, &Memory)> = state
            .memories
            .values()
            .filter(|m| m.id != id)
            .map(|m| (cosine_similarity(&source.embedding, &m.embedding), m))
            .filter(|(similarity, _)| *similarity >= min_similarity)
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal).then(b.1.created_at.cmp(&a.1.created_at))
        });
        Ok(scored.into_iter().take(top_k).map(|(_, m)| m.clone()).collect())
    }

    /// Every memory, oldest first
    pub fn all(&self) -> Vec<Memory> {
        let state = self.state.read();
        let mut memories: Vec<Memory> = state.memories.values().cloned().collect();
        memories.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        memories
    }

    pub fn len(&self) -> usize {
        self.state.read().memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MemoryStats {
        let state = self.state.read();
        let by_type = MemoryType::ALL
            .iter()
            .map(|t| (t.to_string(), state.index.count_by_type(*t)))
            .filter(|(_, n)| *n > 0)
            .collect();
        MemoryStats {
            total: state.memories.len(),
            pinned: state.memories.values().filter(|m| m.is_pinned()).count(),
            by_type,
            distinct_tags: state.index.tag_count(),
        }
    }

    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.write();
        self.journal.clear()?;
        state.memories.clear();
        state.index.clear();
        state.consolidated_at = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> MemoryStore {
        MemoryStore::open(
            &dir.path().join("memory.jsonl"),
            MemoryConfig::default(),
            Arc::new(HashingEmbedder::new(256)),
        )
        .unwrap()
    }

    #[test]
    fn test_store_and_get() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let id = store.store(Memory::new(MemoryType::Conversation, "hello there")).unwrap();
        let memory = store.get(id).unwrap();
        assert_eq!(memory.text, "hello there");
        assert_eq!(memory.embedding.len(), 256);

        let missing = Uuid::new_v4();
        assert!(matches!(store.get(missing), Err(LearningError::NotFound { .. })));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let mut memory = Memory::new(MemoryType::Document, "short vector");
        memory.embedding = vec![1.0; 3];
        assert!(matches!(
            store.store(memory),
            Err(LearningError::InvalidInput { ref field, .. }) if field == "embedding"
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_retrieve_ranks_relevant_first() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.store(Memory::new(MemoryType::Knowledge, "postgres connection pool tuning")).unwrap();
        store.store(Memory::new(MemoryType::Knowledge, "favourite pizza toppings")).unwrap();

        let results = store.retrieve("tuning the postgres pool", &MemoryFilter::default(), 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "postgres connection pool tuning");
    }

    #[test]
    fn test_retrieve_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(store.retrieve("anything", &MemoryFilter::default(), 5).is_empty());
    }

    #[test]
    fn test_filters_narrow_candidates() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.store(Memory::new(MemoryType::Error, "timeout talking to db").with_tag("db")).unwrap();
        store.store(Memory::new(MemoryType::Success, "db migration ran").with_tag("db")).unwrap();
        store.store(Memory::new(MemoryType::Error, "button misaligned").with_tag("ui")).unwrap();

        let filter = MemoryFilter::default().of_type(MemoryType::Error).with_tag("db");
        let results = store.retrieve("db", &filter, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "timeout talking to db");

        let filter = MemoryFilter::default().with_tag("missing");
        assert!(store.retrieve("db", &filter, 10).is_empty());
    }

    #[test]
    fn test_retrieval_updates_access_for_returned_only() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let hit = store.store(Memory::new(MemoryType::Experience, "deploy went fine")).unwrap();
        let miss = store.store(Memory::new(MemoryType::Experience, "lunch order")).unwrap();

        let later = Utc::now() + Duration::seconds(10);
        let results = store.retrieve_at("deploy went fine", &MemoryFilter::default(), 1, later);
        assert_eq!(results[0].id, hit);

        let hit = store.get(hit).unwrap();
        assert_eq!(hit.access_count, 1);
        assert_eq!(hit.last_accessed_at, later);
        assert!(hit.importance > 0.5);
        assert_eq!(store.get(miss).unwrap().access_count, 0);
    }

    #[test]
    fn test_ties_prefer_newest() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let now = Utc::now();

        let mut old = Memory::new(MemoryType::Conversation, "same words here");
        old.created_at = now - Duration::seconds(30);
        old.last_accessed_at = now;
        let mut new = Memory::new(MemoryType::Conversation, "same words here");
        new.created_at = now;
        new.last_accessed_at = now;
        store.store(old).unwrap();
        let new_id = store.store(new).unwrap();

        let results = store.retrieve_at("same words here", &MemoryFilter::default(), 1, now);
        assert_eq!(results[0].id, new_id);
    }

    #[test]
    fn test_consolidation_respects_pins_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let now = Utc::now();
        let stale = now - Duration::days(120);

        let mut low = Memory::new(MemoryType::Conversation, "small talk").with_importance(0.4);
        low.last_accessed_at = stale;
        let mut pinned = Memory::new(MemoryType::Feedback, "never store passwords")
            .with_importance(0.4)
            .pinned();
        pinned.last_accessed_at = stale;
        let mut used = Memory::new(MemoryType::Experience, "popular").with_importance(0.4);
        used.last_accessed_at = stale;
        used.access_count = 5;
        let fresh = Memory::new(MemoryType::Knowledge, "important").with_importance(0.9);

        let low_id = store.store(low).unwrap();
        for m in [pinned, used, fresh] {
            store.store(m).unwrap();
        }

        assert_eq!(store.consolidate_at(now).unwrap(), 1);
        assert!(store.get(low_id).is_err());
        let after_first = store.all();

        assert_eq!(store.consolidate_at(now).unwrap(), 0);
        assert_eq!(store.all(), after_first);
        assert_eq!(after_first.len(), 3);
    }

    #[test]
    fn test_repeated_consolidation_reuses_last_instant() {
        let dir = TempDir::new().unwrap();
        let config = MemoryConfig { half_life_days: 1.0, ..MemoryConfig::default() };
        let path = dir.path().join("memory.jsonl");
        let store = MemoryStore::open(&path, config.clone(), Arc::new(HashingEmbedder::new(256))).unwrap();
        let t0 = Utc::now();

        // 0.62 decays to 0.31 after one day, under 0.3 two hours later
        let mut fading = Memory::new(MemoryType::Conversation, "weather chat").with_importance(0.62);
        fading.last_accessed_at = t0 - Duration::days(1);
        let id = store.store(fading).unwrap();

        assert_eq!(store.consolidate_at(t0).unwrap(), 0);
        assert_eq!(store.consolidate_from(t0 + Duration::hours(2)).unwrap(), 0);
        assert!(store.get(id).is_ok());
        drop(store);

        let store = MemoryStore::open(&path, config, Arc::new(HashingEmbedder::new(256))).unwrap();
        assert_eq!(store.consolidate_from(t0 + Duration::hours(3)).unwrap(), 0);
        assert_eq!(store.consolidate_from(t0 + Duration::hours(25)).unwrap(), 1);
        assert!(store.get(id).is_err());
    }

    #[test]
    fn test_related_excludes_source() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let source = store.store(Memory::new(MemoryType::Error, "postgres connection pool exhausted")).unwrap();
        let near = store.store(Memory::new(MemoryType::Success, "raised the postgres connection pool size")).unwrap();
        store.store(Memory::new(MemoryType::Conversation, "favourite pizza toppings")).unwrap();

        let related = store.related(source, 5, 0.3).unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id, near);
        assert!(store.related(source, 5, -1.0).unwrap().iter().all(|m| m.id != source));
        assert_eq!(store.related(source, 1, -1.0).unwrap().len(), 1);
        assert_eq!(store.get(near).unwrap().access_count, 0);

        assert!(matches!(store.related(Uuid::new_v4(), 5, 0.0), Err(LearningError::NotFound { .. })));
    }

    #[test]
    fn test_reload_rebuilds_indexes() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = open_store(&dir);
            let id = store.store(Memory::new(MemoryType::Error, "disk full").with_tag("ops")).unwrap();
            store.store(Memory::new(MemoryType::Success, "tests green")).unwrap();
            store.retrieve("disk full", &MemoryFilter::default(), 1);
            id
        };

        let store = open_store(&dir);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(id).unwrap().access_count, 1);
        let results = store.retrieve("disk", &MemoryFilter::default().with_tag("ops"), 5);
        assert_eq!(results.len(), 1);
        assert_eq!(store.stats().by_type.get("error"), Some(&1));
    }

    #[test]
    fn test_remove_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let id = store.store(Memory::new(MemoryType::Document, "readme")).unwrap();

        store.remove(id).unwrap();
        assert!(matches!(store.remove(id), Err(LearningError::NotFound { .. })));

        store.store(Memory::new(MemoryType::Document, "changelog")).unwrap();
        store.clear().unwrap();
        assert!(store.is_empty());
        assert!(open_store(&dir).is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_own_text_is_top_result(
            texts in proptest::collection::btree_set("[a-z]{1,8}( [a-z]{1,8}){0,5}", 1..8),
            pick in any::<prop::sample::Index>(),
            k in 1usize..4,
        ) {
            let dir = TempDir::new().unwrap();
            let store = open_store(&dir);
            let texts: Vec<String> = texts.into_iter().collect();
            let ids: Vec<Uuid> = texts
                .iter()
                .map(|t| store.store(Memory::new(MemoryType::Conversation, t.clone())).unwrap())
                .collect();

            let i = pick.index(texts.len());
            let results = store.retrieve(&texts[i], &MemoryFilter::default(), k);
            prop_assert!(results.iter().any(|m| m.id == ids[i]));
        }
    }
}
