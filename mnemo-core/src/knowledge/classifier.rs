use regex_utils::knowledge;

use super::extractor::{Segment, SegmentShape};
use super::{KnowledgeConfig, KnowledgeKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub kind: KnowledgeKind,
    pub confidence: f32,
}

impl Classification {
    pub fn new(kind: KnowledgeKind, confidence: f32) -> Self {
        Self { kind, confidence }
    }
}

/// Maps a segmented unit of text to a knowledge kind
///
/// `None` means the unit carries no extractable knowledge.
pub trait KnowledgeClassifier: Send + Sync {
    fn classify(&self, segment: &Segment) -> Option<Classification>;
}

/// Structural and lexical rules over a segment
#[derive(Debug, Clone)]
pub struct HeuristicClassifier {
    min_fact_chars: usize,
    max_fact_chars: usize,
}

impl HeuristicClassifier {
    pub fn new(config: &KnowledgeConfig) -> Self {
        Self { min_fact_chars: config.min_fact_chars, max_fact_chars: config.max_fact_chars }
    }

    fn classify_prose(&self, text: &str) -> Option<Classification> {
        if knowledge::is_question(text) {
            return None;
        }

        if knowledge::defined_term(text).is_some() {
            return Some(Classification::new(KnowledgeKind::Concept, 0.75));
        }
        if knowledge::is_definition(text) {
            return Some(Classification::new(KnowledgeKind::Concept, 0.65));
        }
        if knowledge::is_relation(text) {
            return Some(Classification::new(KnowledgeKind::Relationship, 0.65));
        }
        if knowledge::is_rule(text) {
            return Some(Classification::new(KnowledgeKind::Rule, 0.7));
        }
        if knowledge::is_imperative(text) {
            return Some(Classification::new(KnowledgeKind::Procedure, 0.6));
        }

        let len = text.chars().count();
        if (self.min_fact_chars..=self.max_fact_chars).contains(&len) {
            let confidence = if text.chars().any(|c| c.is_ascii_digit()) { 0.6 } else { 0.5 };
            return Some(Classification::new(KnowledgeKind::Fact, confidence));
        }

        None
    }
}

impl Default for HeuristicClassifier {
    fn default() -> Self {
        Self::new(&KnowledgeConfig::default())
    }
}

impl KnowledgeClassifier for HeuristicClassifier {
    fn classify(&self, segment: &Segment) -> Option<Classification> {
        match segment.shape {
            SegmentShape::CodeBlock => Some(Classification::new(KnowledgeKind::Example, 0.8)),
            SegmentShape::StepList => Some(Classification::new(KnowledgeKind::Procedure, 0.85)),
            SegmentShape::Prose => self.classify_prose(&segment.text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prose(text: &str) -> Option<KnowledgeKind> {
        HeuristicClassifier::default().classify(&Segment::prose(text)).map(|c| c.kind)
    }

    #[test]
    fn test_prose_kinds() {
        assert_eq!(prose("A borrow checker is a compiler pass that validates references."), Some(KnowledgeKind::Concept));
        assert_eq!(prose("The scheduler depends on the timer wheel."), Some(KnowledgeKind::Relationship));
        assert_eq!(prose("You should rotate credentials every quarter."), Some(KnowledgeKind::Rule));
        assert_eq!(prose("Install the toolchain with rustup."), Some(KnowledgeKind::Procedure));
        assert_eq!(prose("The office moved to Berlin in 2019."), Some(KnowledgeKind::Fact));
    }

    #[test]
    fn test_questions_and_fragments_are_skipped() {
        assert_eq!(prose("Why does the build fail?"), None);
        assert_eq!(prose("Okay."), None);
    }

    #[test]
    fn test_structural_shapes() {
        let classifier = HeuristicClassifier::default();
        let code = Segment { text: "let x = 1;".to_string(), shape: SegmentShape::CodeBlock };
        let steps = Segment { text: "1. a\n2. b".to_string(), shape: SegmentShape::StepList };

        assert_eq!(classifier.classify(&code).map(|c| c.kind), Some(KnowledgeKind::Example));
        assert_eq!(classifier.classify(&steps).map(|c| c.kind), Some(KnowledgeKind::Procedure));
    }
}
