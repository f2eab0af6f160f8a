use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::classifier::KnowledgeClassifier;
use super::extractor::{Candidate, KnowledgeExtractor};
use super::{KnowledgeConfig, KnowledgeEdge, KnowledgeItem, KnowledgeKind, Revision, SUPERSEDES};
use crate::embeddings::{Embedder, Vector, cosine_similarity, lexical_overlap};
use crate::error::{LearningError, Result};
use crate::storage::Journal;

const STORE: &str = "knowledge";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum KnowledgeRecord {
    Put { item: KnowledgeItem },
    Link { edge: KnowledgeEdge },
    Used { id: Uuid, usage_count: u32 },
    Remove { id: Uuid },
}

#[derive(Default)]
struct GraphState {
    items: HashMap<Uuid, KnowledgeItem>,
    embeddings: HashMap<Uuid, Vector>,
    graph: StableDiGraph<Uuid, String>,
    node_map: HashMap<Uuid, NodeIndex>,
}

impl GraphState {
    fn put(&mut self, item: KnowledgeItem, embedding: Vector) {
        if !self.node_map.contains_key(&item.id) {
            let node = self.graph.add_node(item.id);
            self.node_map.insert(item.id, node);
        }
        self.embeddings.insert(item.id, embedding);
        self.items.insert(item.id, item);
    }

    fn has_edge(&self, edge: &KnowledgeEdge) -> bool {
        match (self.node_map.get(&edge.from_id), self.node_map.get(&edge.to_id)) {
            (Some(from), Some(to)) => self
                .graph
                .edges_directed(*from, Direction::Outgoing)
                .any(|e| e.target() == *to && e.weight() == &edge.relation),
            _ => false,
        }
    }

    /// Returns false when either endpoint is missing
    fn link(&mut self, edge: &KnowledgeEdge) -> bool {
        let (Some(from), Some(to)) =
            (self.node_map.get(&edge.from_id).copied(), self.node_map.get(&edge.to_id).copied())
        else {
            return false;
        };
        if !self.has_edge(edge) {
            self.graph.add_edge(from, to, edge.relation.clone());
        }
        true
    }

    /// Drop the item with every incident edge
    fn remove(&mut self, id: &Uuid) -> Option<KnowledgeItem> {
        let item = self.items.remove(id)?;
        self.embeddings.remove(id);
        if let Some(node) = self.node_map.remove(id) {
            self.graph.remove_node(node);
        }
        for other in self.items.values_mut() {
            if other.superseded_by == Some(*id) {
                other.superseded_by = None;
            }
        }
        Some(item)
    }

    fn edges(&self) -> Vec<KnowledgeEdge> {
        self.graph
            .edge_indices()
            .filter_map(|e| {
                let (from, to) = self.graph.edge_endpoints(e)?;
                Some(KnowledgeEdge {
                    from_id: self.graph[from],
                    to_id: self.graph[to],
                    relation: self.graph[e].clone(),
                })
            })
            .collect()
    }

    /// Most similar same-kind item at or above `threshold`
    fn find_duplicate(&self, kind: KnowledgeKind, embedding: &[f32], threshold: f32) -> Option<Uuid> {
        self.items
            .values()
            .filter(|item| item.kind == kind)
            .filter_map(|item| {
                let similarity = cosine_similarity(self.embeddings.get(&item.id)?, embedding);
                (similarity >= threshold).then_some((item.id, similarity))
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(id, _)| id)
    }
}

fn normalize_statement(statement: &str) -> String {
    statement.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Knowledge items plus a directed relation graph
///
/// Every mutation appends to the journal before touching the in-memory
/// graph, and holds the write lock for the whole operation.
pub struct KnowledgeGraph {
    config: KnowledgeConfig,
    embedder: Arc<dyn Embedder>,
    extractor: KnowledgeExtractor,
    journal: Journal<KnowledgeRecord>,
    state: RwLock<GraphState>,
}

impl KnowledgeGraph {
    pub fn open(
        path: &Path,
        config: KnowledgeConfig,
        embedder: Arc<dyn Embedder>,
        classifier: Arc<dyn KnowledgeClassifier>,
    ) -> Result<Self> {
        let journal = Journal::open(STORE, path)?;
        let records = journal.replay()?;
        let replayed = records.len();

        let mut state = GraphState::default();
        let mut dangling = 0usize;
        for record in records {
            match record {
                KnowledgeRecord::Put { item } => {
                    let embedding = embedder.embed(&item.statement);
                    state.put(item, embedding);
                }
                KnowledgeRecord::Link { edge } => {
                    if !state.link(&edge) {
                        dangling += 1;
                    }
                }
                KnowledgeRecord::Used { id, usage_count } => {
                    if let Some(item) = state.items.get_mut(&id) {
                        item.usage_count = usage_count;
                    }
                }
                KnowledgeRecord::Remove { id } => {
                    state.remove(&id);
                }
            }
        }

        let graph = Self {
            config,
            embedder,
            extractor: KnowledgeExtractor::new(classifier),
            journal,
            state: RwLock::new(state),
        };

        let live = graph.len() + graph.edge_count();
        if dangling > 0 {
            warn!("Dropped {} edges with missing endpoints while loading knowledge", dangling);
        }
        if dangling > 0 || replayed > live * 2 + 64 {
            graph.compact()?;
        }

        info!("Knowledge graph loaded: {} items, {} edges", graph.len(), graph.edge_count());
        Ok(graph)
    }

    /// Extract and store knowledge from a document
    ///
    /// Returns the ids of created or merged items, in document order.
    pub fn ingest_document(&self, text: &str, source_ref: &str, domain: &str) -> Result<Vec<Uuid>> {
        let candidates = self.extractor.extract(text);
        if candidates.is_empty() {
            debug!("No knowledge extracted from {}", source_ref);
            return Ok(Vec::new());
        }
        let domain = if domain.trim().is_empty() { self.config.default_domain.as_str() } else { domain.trim() };

        let mut state = self.state.write();
        let mut ids: Vec<Uuid> = Vec::with_capacity(candidates.len());
        let mut concepts: Vec<(String, Uuid)> = Vec::new();

        for candidate in &candidates {
            let id = self.upsert_candidate(&mut state, candidate, domain, source_ref)?;
            if let Some(term) = &candidate.term {
                concepts.push((term.clone(), id));
            }
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        // Link items that mention a concept defined in the same document
        for (term, concept_id) in &concepts {
            for id in &ids {
                if id == concept_id {
                    continue;
                }
                let mentions = state
                    .items
                    .get(id)
                    .is_some_and(|item| item.statement.to_lowercase().contains(term.as_str()));
                if mentions {
                    let edge = KnowledgeEdge {
                        from_id: *id,
                        to_id: *concept_id,
                        relation: "refers_to".to_string(),
                    };
                    if !state.has_edge(&edge) {
                        self.journal.append(&KnowledgeRecord::Link { edge: edge.clone() })?;
                        state.link(&edge);
                    }
                }
            }
        }

        info!("Ingested {} knowledge items from {}", ids.len(), source_ref);
        Ok(ids)
    }

    fn upsert_candidate(
        &self,
        state: &mut GraphState,
        candidate: &Candidate,
        domain: &str,
        source_ref: &str,
    ) -> Result<Uuid> {
        let embedding = self.embedder.embed(&candidate.statement);

        if let Some(existing_id) =
            state.find_duplicate(candidate.kind, &embedding, self.config.merge_threshold)
        {
            let Some(existing) = state.items.get(&existing_id) else {
                return Err(LearningError::not_found("knowledge item", existing_id));
            };
            let mut merged = existing.clone();
            merged.confidence = (merged.confidence + self.config.merge_boost).min(1.0);
            merged.updated_at = Utc::now();
            self.journal.append(&KnowledgeRecord::Put { item: merged.clone() })?;
            let existing_embedding = state.embeddings.remove(&existing_id).unwrap_or(embedding);
            state.put(merged, existing_embedding);
            debug!("Merged duplicate {} into {}", candidate.kind, existing_id);
            return Ok(existing_id);
        }

        let item = KnowledgeItem::new(
            candidate.kind,
            candidate.statement.clone(),
            candidate.confidence,
            domain,
            source_ref,
        );
        let id = item.id;
        self.journal.append(&KnowledgeRecord::Put { item: item.clone() })?;
        state.put(item, embedding);
        Ok(id)
    }

    /// Record a user correction
    ///
    /// Items resembling `original` keep their history but lose confidence and
    /// point at the corrected statement through a `supersedes` edge.
    pub fn ingest_correction(&self, original: &str, corrected: &str, source_ref: &str) -> Result<Uuid> {
        let corrected = normalize_statement(corrected);
        if corrected.is_empty() {
            return Err(LearningError::invalid("corrected", "correction text is empty"));
        }
        let now = Utc::now();
        let original_embedding = self.embedder.embed(original);
        let corrected_embedding = self.embedder.embed(&corrected);

        let mut state = self.state.write();

        // A near-duplicate of the corrected text is only reused when it is not
        // itself the statement being corrected
        let target = state
            .find_duplicate(KnowledgeKind::Fact, &corrected_embedding, self.config.merge_threshold)
            .and_then(|id| state.items.get(&id))
            .filter(|item| {
                normalize_statement(&item.statement) == corrected
                    || state.embeddings.get(&item.id).is_none_or(|e| {
                        cosine_similarity(e, &original_embedding) < self.config.correction_similarity
                    })
            })
            .cloned();

        let contradicted: Vec<KnowledgeItem> = state
            .items
            .values()
            .filter(|item| Some(item.id) != target.as_ref().map(|t| t.id))
            .filter(|item| normalize_statement(&item.statement) != corrected)
            .filter(|item| {
                state.embeddings.get(&item.id).is_some_and(|e| {
                    cosine_similarity(e, &original_embedding) >= self.config.correction_similarity
                })
            })
            .cloned()
            .collect();

        let mut corrected_item = match target {
            Some(mut existing) => {
                existing.confidence = existing.confidence.max(self.config.correction_confidence);
                existing.updated_at = now;
                existing
            }
            None => {
                let domain = contradicted
                    .first()
                    .map(|item| item.domain.clone())
                    .unwrap_or_else(|| self.config.default_domain.clone());
                KnowledgeItem::new(
                    KnowledgeKind::Fact,
                    corrected.clone(),
                    self.config.correction_confidence,
                    domain,
                    source_ref,
                )
            }
        };
        corrected_item.superseded_by = None;
        let corrected_id = corrected_item.id;

        let mut records = vec![KnowledgeRecord::Put { item: corrected_item.clone() }];
        let mut decayed = Vec::with_capacity(contradicted.len());
        for mut item in contradicted {
            item.revisions.push(Revision {
                statement: item.statement.clone(),
                confidence: item.confidence,
                note: format!("contradicted by correction from {}", source_ref),
                at: now,
            });
            item.confidence *= self.config.correction_decay;
            item.superseded_by = Some(corrected_id);
            item.updated_at = now;
            records.push(KnowledgeRecord::Put { item: item.clone() });
            decayed.push(item);
        }
        let edges: Vec<KnowledgeEdge> = decayed
            .iter()
            .map(|item| KnowledgeEdge {
                from_id: corrected_id,
                to_id: item.id,
                relation: SUPERSEDES.to_string(),
            })
            .collect();
        records.extend(edges.iter().cloned().map(|edge| KnowledgeRecord::Link { edge }));

        self.journal.append_all(&records)?;

        state.put(corrected_item, corrected_embedding);
        for item in decayed {
            let embedding = match state.embeddings.remove(&item.id) {
                Some(e) => e,
                None => self.embedder.embed(&item.statement),
            };
            state.put(item, embedding);
        }
        for edge in &edges {
            state.link(edge);
        }

        info!("Correction recorded as {} superseding {} items", corrected_id, edges.len());
        Ok(corrected_id)
    }

    /// Items one edge away from `id` in either direction, most confident first
    pub fn related(&self, id: Uuid, max: usize) -> Result<Vec<KnowledgeItem>> {
        let state = self.state.read();
        let node = *state.node_map.get(&id).ok_or_else(|| LearningError::not_found("knowledge item", id))?;

        let mut neighbours: Vec<Uuid> = state
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| e.target())
            .chain(state.graph.edges_directed(node, Direction::Incoming).map(|e| e.source()))
            .map(|n| state.graph[n])
            .filter(|other| *other != id)
            .collect();
        neighbours.sort();
        neighbours.dedup();

        let mut items: Vec<KnowledgeItem> =
            neighbours.iter().filter_map(|other| state.items.get(other).cloned()).collect();
        items.sort_by(|a, b| {
            b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal).then(a.id.cmp(&b.id))
        });
        items.truncate(max);
        Ok(items)
    }

    /// Rank items by relevance blended with confidence
    pub fn search(&self, query: &str, domain_filter: Option<&str>, top_k: usize) -> Vec<KnowledgeItem> {
        if top_k == 0 {
            return Vec::new();
        }
        let query_embedding = self.embedder.embed(query);
        let config = &self.config;

        let selected: Vec<Uuid> = {
            let state = self.state.read();
            let mut scored: Vec<(f32, DateTime<Utc>, Uuid)> = state
                .items
                .values()
                .filter(|item| domain_filter.is_none_or(|d| item.domain == d))
                .filter_map(|item| {
                    let similarity = state
                        .embeddings
                        .get(&item.id)
                        .map_or(0.0, |e| cosine_similarity(e, &query_embedding));
                    let lexical = lexical_overlap(query, &item.statement);
                    let relevance = config.similarity_weight * similarity + config.lexical_weight * lexical;
                    if relevance < config.min_relevance {
                        return None;
                    }
                    let mut score = relevance + config.confidence_weight * item.confidence;
                    if item.is_superseded() {
                        score *= config.superseded_penalty;
                    }
                    Some((score, item.updated_at, item.id))
                })
                .collect();

            scored.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.1.cmp(&a.1))
            });
            scored.into_iter().take(top_k).map(|(_, _, id)| id).collect()
        };

        if selected.is_empty() {
            return Vec::new();
        }

        let mut state = self.state.write();
        let mut results = Vec::with_capacity(selected.len());
        for id in selected {
            let Some(usage_count) = state.items.get(&id).map(|i| i.usage_count.saturating_add(1))
            else {
                continue;
            };
            match self.journal.append(&KnowledgeRecord::Used { id, usage_count }) {
                Ok(()) => {
                    if let Some(item) = state.items.get_mut(&id) {
                        item.usage_count = usage_count;
                    }
                }
                Err(e) => warn!("Failed to persist usage for knowledge item {}: {}", id, e),
            }
            results.extend(state.items.get(&id).cloned());
        }
        results
    }

    pub fn link(&self, from_id: Uuid, to_id: Uuid, relation: &str) -> Result<()> {
        let relation = relation.trim();
        if relation.is_empty() {
            return Err(LearningError::invalid("relation", "relation label is empty"));
        }
        let edge = KnowledgeEdge { from_id, to_id, relation: relation.to_string() };

        let mut state = self.state.write();
        for id in [from_id, to_id] {
            if !state.items.contains_key(&id) {
                return Err(LearningError::not_found("knowledge item", id));
            }
        }
        if state.has_edge(&edge) {
            return Ok(());
        }
        self.journal.append(&KnowledgeRecord::Link { edge: edge.clone() })?;
        state.link(&edge);
        Ok(())
    }

    pub fn item(&self, id: Uuid) -> Result<KnowledgeItem> {
        self.state
            .read()
            .items
            .get(&id)
            .cloned()
            .ok_or_else(|| LearningError::not_found("knowledge item", id))
    }

    /// Delete an item and all of its incident edges
    pub fn remove(&self, id: Uuid) -> Result<KnowledgeItem> {
        let mut state = self.state.write();
        if !state.items.contains_key(&id) {
            return Err(LearningError::not_found("knowledge item", id));
        }
        self.journal.append(&KnowledgeRecord::Remove { id })?;
        state.remove(&id).ok_or_else(|| LearningError::not_found("knowledge item", id))
    }

    /// Outgoing and incoming edges of an item
    pub fn edges(&self, id: Uuid) -> Result<Vec<KnowledgeEdge>> {
        let state = self.state.read();
        let node = *state
            .node_map
            .get(&id)
            .ok_or_else(|| LearningError::not_found("knowledge item", id))?;

        let outgoing = state.graph.edges_directed(node, Direction::Outgoing);
        let incoming = state.graph.edges_directed(node, Direction::Incoming);
        Ok(outgoing
            .chain(incoming)
            .map(|e| KnowledgeEdge {
                from_id: state.graph[e.source()],
                to_id: state.graph[e.target()],
                relation: e.weight().clone(),
            })
            .collect())
    }

    pub fn all_edges(&self) -> Vec<KnowledgeEdge> {
        self.state.read().edges()
    }

    /// Every item, oldest first
    pub fn items(&self) -> Vec<KnowledgeItem> {
        let state = self.state.read();
        let mut items: Vec<KnowledgeItem> = state.items.values().cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        items
    }

    pub fn len(&self) -> usize {
        self.state.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.state.read().graph.edge_count()
    }

    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.write();
        self.journal.clear()?;
        *state = GraphState::default();
        Ok(())
    }

    fn compact(&self) -> Result<()> {
        let items = self.items();
        let edges = self.all_edges();
        let records: Vec<KnowledgeRecord> = items
            .into_iter()
            .map(|item| KnowledgeRecord::Put { item })
            .chain(edges.into_iter().map(|edge| KnowledgeRecord::Link { edge }))
            .collect();
        self.journal.compact(&records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::knowledge::HeuristicClassifier;
    use std::fs;
    use tempfile::TempDir;

    const DOC: &str = "A lifetime is a region of code where a reference is valid.\n\
        The borrow checker depends on lifetime annotations.\n\
        You should prefer borrowing over cloning large values.\n\
        Rust 1.0 was released in May 2015.\n";

    fn open_graph(dir: &TempDir) -> KnowledgeGraph {
        let config = KnowledgeConfig::default();
        KnowledgeGraph::open(
            &dir.path().join("knowledge.jsonl"),
            config.clone(),
            Arc::new(HashingEmbedder::default()),
            Arc::new(HeuristicClassifier::new(&config)),
        )
        .unwrap()
    }

    #[test]
    fn test_ingest_classifies_items() {
        let dir = TempDir::new().unwrap();
        let graph = open_graph(&dir);

        let ids = graph.ingest_document(DOC, "rust-notes.md", "rust").unwrap();
        assert_eq!(ids.len(), 4);

        let kinds: Vec<KnowledgeKind> = ids.iter().map(|id| graph.item(*id).unwrap().kind).collect();
        assert_eq!(
            kinds,
            vec![KnowledgeKind::Concept, KnowledgeKind::Relationship, KnowledgeKind::Rule, KnowledgeKind::Fact]
        );
        assert!(ids.iter().all(|id| graph.item(*id).unwrap().domain == "rust"));
    }

    #[test]
    fn test_concept_mentions_are_linked() {
        let dir = TempDir::new().unwrap();
        let graph = open_graph(&dir);

        let ids = graph.ingest_document(DOC, "rust-notes.md", "rust").unwrap();
        let edges = graph.edges(ids[0]).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from_id, ids[1]);
        assert_eq!(edges[0].relation, "refers_to");
    }

    #[test]
    fn test_reingest_merges_duplicates() {
        let dir = TempDir::new().unwrap();
        let graph = open_graph(&dir);

        let first = graph.ingest_document(DOC, "a.md", "rust").unwrap();
        let before = graph.item(first[3]).unwrap().confidence;
        let count = graph.len();

        let second = graph.ingest_document(DOC, "a.md", "rust").unwrap();
        assert_eq!(first, second);
        assert_eq!(graph.len(), count);
        assert!(graph.item(first[3]).unwrap().confidence > before);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_remove_drops_incident_edges() {
        let dir = TempDir::new().unwrap();
        let graph = open_graph(&dir);

        let ids = graph.ingest_document(DOC, "a.md", "rust").unwrap();
        graph.link(ids[2], ids[0], "applies_to").unwrap();
        graph.link(ids[0], ids[3], "context").unwrap();
        assert_eq!(graph.edge_count(), 3);

        graph.remove(ids[0]).unwrap();
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.all_edges().iter().all(|e| e.from_id != ids[0] && e.to_id != ids[0]));
        assert!(matches!(graph.item(ids[0]), Err(LearningError::NotFound { .. })));

        // the removal survives a reload
        drop(graph);
        let graph = open_graph(&dir);
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_link_requires_existing_items() {
        let dir = TempDir::new().unwrap();
        let graph = open_graph(&dir);
        let ids = graph.ingest_document(DOC, "a.md", "rust").unwrap();

        let missing = Uuid::new_v4();
        assert!(matches!(graph.link(ids[0], missing, "x"), Err(LearningError::NotFound { .. })));
        assert!(matches!(graph.link(ids[0], ids[1], " "), Err(LearningError::InvalidInput { .. })));

        graph.link(ids[2], ids[3], "related").unwrap();
        graph.link(ids[2], ids[3], "related").unwrap();
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_correction_supersedes_without_deleting() {
        let dir = TempDir::new().unwrap();
        let graph = open_graph(&dir);

        let ids = graph.ingest_document("The API rate limit is 100 requests per minute.", "docs", "api").unwrap();
        let old = graph.item(ids[0]).unwrap();

        let new_id = graph
            .ingest_correction(
                "The API rate limit is 100 requests per minute.",
                "The API rate limit is 500 requests per minute.",
                "user",
            )
            .unwrap();

        let decayed = graph.item(old.id).unwrap();
        assert!(decayed.confidence < old.confidence);
        assert_eq!(decayed.superseded_by, Some(new_id));
        assert_eq!(decayed.revisions.len(), 1);
        assert_eq!(decayed.revisions[0].statement, old.statement);

        let corrected = graph.item(new_id).unwrap();
        assert_eq!(corrected.kind, KnowledgeKind::Fact);
        assert!((corrected.confidence - 0.9).abs() < 1e-6);
        assert_eq!(corrected.domain, "api");

        let edges = graph.edges(new_id).unwrap();
        assert_eq!(edges, vec![KnowledgeEdge { from_id: new_id, to_id: old.id, relation: SUPERSEDES.to_string() }]);

        let results = graph.search("API rate limit requests per minute", None, 2);
        assert_eq!(results[0].id, new_id);
    }

    #[test]
    fn test_correction_of_long_statement_creates_new_fact() {
        let dir = TempDir::new().unwrap();
        let graph = open_graph(&dir);

        let original = "The production gateway accepts at most 100 concurrent client connections per node \
            before it starts rejecting new sessions with a retry hint.";
        graph.ingest_document(original, "runbook", "ops").unwrap();
        let old = graph.items().into_iter().find(|item| item.statement.contains("100")).unwrap();

        let corrected = old.statement.replace("100", "500");
        let new_id = graph.ingest_correction(&old.statement, &corrected, "feedback:1").unwrap();
        assert_ne!(new_id, old.id);

        let stale = graph.item(old.id).unwrap();
        assert!(stale.confidence < old.confidence);
        assert_eq!(stale.superseded_by, Some(new_id));
        assert!(stale.statement.contains("100"));

        let fresh = graph.item(new_id).unwrap();
        assert!(fresh.statement.contains("500"));
        assert!(!fresh.is_superseded());
        assert!(graph.edges(old.id).unwrap().iter().any(|e| e.from_id == new_id && e.relation == SUPERSEDES));

        // Repeating the same correction reuses the corrected fact
        assert_eq!(graph.ingest_correction(&old.statement, &corrected, "feedback:2").unwrap(), new_id);
    }

    #[test]
    fn test_related_walks_both_directions() {
        let dir = TempDir::new().unwrap();
        let graph = open_graph(&dir);

        let ids = graph.ingest_document(DOC, "a.md", "rust").unwrap();
        graph.link(ids[2], ids[0], "applies_to").unwrap();
        graph.link(ids[0], ids[3], "context").unwrap();

        let related = graph.related(ids[0], 10).unwrap();
        let mut found: Vec<Uuid> = related.iter().map(|item| item.id).collect();
        found.sort();
        let mut expected = vec![ids[1], ids[2], ids[3]];
        expected.sort();
        assert_eq!(found, expected);
        assert!(related.windows(2).all(|w| w[0].confidence >= w[1].confidence));

        assert_eq!(graph.related(ids[0], 1).unwrap(), related[..1].to_vec());
        assert_eq!(graph.related(ids[3], 10).unwrap().iter().map(|i| i.id).collect::<Vec<_>>(), vec![ids[0]]);
        assert!(matches!(graph.related(Uuid::new_v4(), 5), Err(LearningError::NotFound { .. })));
    }

    #[test]
    fn test_search_domain_and_usage() {
        let dir = TempDir::new().unwrap();
        let graph = open_graph(&dir);

        graph.ingest_document(DOC, "a.md", "rust").unwrap();
        graph.ingest_document("Python lists are dynamic arrays under the hood.", "b.md", "python").unwrap();

        let results = graph.search("borrow checker lifetime", Some("python"), 5);
        assert!(results.iter().all(|i| i.domain == "python"));

        let results = graph.search("borrow checker lifetime annotations", Some("rust"), 1);
        assert_eq!(results.len(), 1);
        assert!(results[0].statement.contains("borrow checker"));
        assert_eq!(results[0].usage_count, 1);

        assert!(graph.search("zzzz qqqq", None, 5).is_empty());
    }

    #[test]
    fn test_dangling_edges_are_dropped_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("knowledge.jsonl");
        let ghost = KnowledgeEdge { from_id: Uuid::new_v4(), to_id: Uuid::new_v4(), relation: "x".into() };
        let line = serde_json::to_string(&KnowledgeRecord::Link { edge: ghost }).unwrap();
        fs::write(&path, format!("{}\n", line)).unwrap();

        let graph = open_graph(&dir);
        assert_eq!(graph.edge_count(), 0);
        assert!(fs::read_to_string(&path).unwrap().trim().is_empty());
    }
}
