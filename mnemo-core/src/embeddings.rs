use regex_utils::tokens;

pub type Vector = Vec<f32>;

pub const DEFAULT_DIMENSION: usize = 384;

/// Maps text to a fixed-length vector
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vector;

    fn dimension(&self) -> usize;
}

/// Deterministic feature-hashing embedder
///
/// Features are lowercase words, adjacent word pairs and character trigrams,
/// each hashed with md5 into a signed bucket. Output is L2-normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }

    fn add_feature(&self, embedding: &mut [f32], feature: &str, weight: f32) {
        let d = md5::compute(feature.as_bytes()).0;
        let hash = u64::from_le_bytes([d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]]);
        let idx = (hash % self.dimension as u64) as usize;
        let sign = if d[8] & 1 == 0 { 1.0 } else { -1.0 };
        embedding[idx] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Vector {
        let mut embedding = vec![0.0f32; self.dimension];
        let words = tokens::words(text);

        for word in &words {
            self.add_feature(&mut embedding, word, 1.0);

            let chars: Vec<char> = format!("#{}#", word).chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                self.add_feature(&mut embedding, &format!("3:{}", trigram), 0.25);
            }
        }

        for pair in words.windows(2) {
            self.add_feature(&mut embedding, &format!("2:{} {}", pair[0], pair[1]), 0.5);
        }

        normalize(&mut embedding);
        embedding
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Scale to unit length; an all-zero vector becomes the first basis vector
pub fn normalize(embedding: &mut [f32]) {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in embedding.iter_mut() {
            *val /= norm;
        }
    } else if let Some(first) = embedding.first_mut() {
        *first = 1.0;
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 { dot_product / (norm_a * norm_b) } else { 0.0 }
}

/// Fraction of query words present in the candidate
pub fn lexical_overlap(query: &str, candidate: &str) -> f32 {
    let query_words: std::collections::BTreeSet<String> = tokens::words(query).into_iter().collect();
    if query_words.is_empty() {
        return 0.0;
    }
    let candidate_words: std::collections::BTreeSet<String> =
        tokens::words(candidate).into_iter().collect();

    let shared = query_words.intersection(&candidate_words).count();
    shared as f32 / query_words.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_generation() {
        let embedder = HashingEmbedder::default();
        let embedding = embedder.embed("fn main() { println!(\"Hello, world!\"); }");

        assert_eq!(embedding.len(), 384);

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_embedding_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        assert_eq!(embedder.embed("The cache is warm"), embedder.embed("The cache is warm"));
    }

    #[test]
    fn test_empty_text_has_unit_vector() {
        let embedder = HashingEmbedder::new(16);
        let embedding = embedder.embed("   ");
        assert_eq!(embedding[0], 1.0);
        assert!((cosine_similarity(&embedding, &embedding) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similar_texts_score_higher() {
        let embedder = HashingEmbedder::default();
        let base = embedder.embed("how do I configure the database connection pool");
        let close = embedder.embed("configure the database connection pool size");
        let far = embedder.embed("my favourite colour is green");

        assert!(cosine_similarity(&base, &close) > cosine_similarity(&base, &far));
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 0.001);

        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
    }

    #[test]
    fn test_lexical_overlap() {
        assert_eq!(lexical_overlap("rust traits", "Traits in Rust"), 1.0);
        assert_eq!(lexical_overlap("rust traits", "python classes"), 0.0);
        assert_eq!(lexical_overlap("", "anything"), 0.0);
    }
}
