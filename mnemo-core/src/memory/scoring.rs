use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use super::{Memory, MemoryConfig};
use crate::embeddings::cosine_similarity;

/// Half-life decay factor in (0, 1] for the time elapsed since `since`
pub fn recency_decay(since: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f32 {
    let age_days = (now - since).num_milliseconds().max(0) as f64 / 86_400_000.0;
    if half_life_days <= 0.0 {
        return if age_days > 0.0 { 0.0 } else { 1.0 };
    }
    0.5f64.powf(age_days / half_life_days) as f32
}

/// Importance after decay since the last access
pub fn effective_importance(memory: &Memory, now: DateTime<Utc>, half_life_days: f64) -> f32 {
    memory.importance * recency_decay(memory.last_accessed_at, now, half_life_days)
}

#[derive(Debug, Clone)]
pub struct ScoredMemory {
    /// 2 for identical text, 1 for an identical embedding, else 0
    pub exact: u8,
    pub similarity: f32,
    pub score: f32,
    pub created_at: DateTime<Utc>,
}

pub fn score_memory(
    memory: &Memory,
    query_text: &str,
    query_embedding: &[f32],
    now: DateTime<Utc>,
    config: &MemoryConfig,
) -> ScoredMemory {
    let similarity = cosine_similarity(&memory.embedding, query_embedding);
    let recency = recency_decay(memory.last_accessed_at, now, config.half_life_days);
    let importance = memory.importance * recency;
    let score = config.similarity_weight * similarity
        + config.importance_weight * importance
        + config.recency_weight * recency;
    let exact = if memory.text.trim() == query_text.trim() {
        2
    } else if similarity >= 1.0 - config.exact_match_epsilon {
        1
    } else {
        0
    };

    ScoredMemory { exact, similarity, score, created_at: memory.created_at }
}

/// Exact matches first, then score, then newest
pub fn rank(a: &ScoredMemory, b: &ScoredMemory) -> Ordering {
    b.exact
        .cmp(&a.exact)
        .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
        .then_with(|| b.created_at.cmp(&a.created_at))
}
