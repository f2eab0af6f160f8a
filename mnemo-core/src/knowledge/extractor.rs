use regex_utils::{knowledge, segment};
use std::sync::Arc;

use super::KnowledgeKind;
use super::classifier::KnowledgeClassifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentShape {
    Prose,
    StepList,
    CodeBlock,
}

/// A candidate unit of knowledge cut from a document
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub shape: SegmentShape,
}

impl Segment {
    pub fn prose(text: impl Into<String>) -> Self {
        Self { text: text.into(), shape: SegmentShape::Prose }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub kind: KnowledgeKind,
    pub statement: String,
    pub confidence: f32,
    /// Term a concept defines, used to link later mentions
    pub term: Option<String>,
}

/// Split a document into code blocks, step lists and sentences
pub fn segment_document(text: &str) -> Vec<Segment> {
    let mut segments: Vec<Segment> = segment::code_blocks(text)
        .into_iter()
        .map(|body| Segment { text: body, shape: SegmentShape::CodeBlock })
        .collect();

    let prose = segment::strip_code_blocks(text);
    let mut paragraph = String::new();
    let mut steps: Vec<String> = Vec::new();

    let flush_paragraph = |paragraph: &mut String, segments: &mut Vec<Segment>| {
        for sentence in segment::sentences(paragraph) {
            segments.push(Segment::prose(sentence));
        }
        paragraph.clear();
    };
    let flush_steps = |steps: &mut Vec<String>, segments: &mut Vec<Segment>| {
        match steps.len() {
            0 => {}
            1 => segments.push(Segment::prose(steps[0].clone())),
            _ => {
                let text = steps
                    .iter()
                    .enumerate()
                    .map(|(i, step)| format!("{}. {}", i + 1, step))
                    .collect::<Vec<_>>()
                    .join("\n");
                segments.push(Segment { text, shape: SegmentShape::StepList });
            }
        }
        steps.clear();
    };

    for line in prose.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            flush_paragraph(&mut paragraph, &mut segments);
            flush_steps(&mut steps, &mut segments);
            continue;
        }

        if let Some(caps) = segment::NUMBERED_ITEM.captures(trimmed) {
            flush_paragraph(&mut paragraph, &mut segments);
            if let Some(step) = caps.get(1) {
                steps.push(step.as_str().trim().to_string());
            }
            continue;
        }

        flush_steps(&mut steps, &mut segments);
        if let Some(caps) = segment::LIST_ITEM.captures(trimmed) {
            flush_paragraph(&mut paragraph, &mut segments);
            if let Some(item) = caps.get(1) {
                segments.push(Segment::prose(item.as_str().trim()));
            }
            continue;
        }

        if !paragraph.is_empty() {
            paragraph.push(' ');
        }
        paragraph.push_str(trimmed);
    }
    flush_paragraph(&mut paragraph, &mut segments);
    flush_steps(&mut steps, &mut segments);

    segments
}

/// Turns raw text into classified knowledge candidates
#[derive(Clone)]
pub struct KnowledgeExtractor {
    classifier: Arc<dyn KnowledgeClassifier>,
}

impl KnowledgeExtractor {
    pub fn new(classifier: Arc<dyn KnowledgeClassifier>) -> Self {
        Self { classifier }
    }

    pub fn extract(&self, text: &str) -> Vec<Candidate> {
        segment_document(text)
            .into_iter()
            .filter_map(|segment| {
                let classification = self.classifier.classify(&segment)?;
                let statement = match segment.shape {
                    SegmentShape::CodeBlock | SegmentShape::StepList => segment.text.clone(),
                    SegmentShape::Prose => collapse_whitespace(&segment.text),
                };
                let term = (classification.kind == KnowledgeKind::Concept)
                    .then(|| knowledge::defined_term(&statement))
                    .flatten()
                    .map(|t| t.to_lowercase());
                Some(Candidate {
                    kind: classification.kind,
                    statement,
                    confidence: classification.confidence.clamp(0.0, 1.0),
                    term,
                })
            })
            .collect()
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::HeuristicClassifier;

    const DOC: &str = "# Deploying\n\
        A canary is a small release cut to a subset of hosts.\n\
        The rollout depends on the health checker.\n\
        \n\
        1. Build the release artifact\n\
        2. Upload it to the registry\n\
        3. Restart the canary hosts\n\
        \n\
        ```sh\n\
        deploy --canary\n\
        ```\n\
        - You must never deploy on Fridays.\n\
        Is this automated?\n";

    #[test]
    fn test_segmentation_shapes() {
        let segments = segment_document(DOC);

        let code: Vec<_> = segments.iter().filter(|s| s.shape == SegmentShape::CodeBlock).collect();
        assert_eq!(code.len(), 1);
        assert_eq!(code[0].text, "deploy --canary");

        let steps: Vec<_> = segments.iter().filter(|s| s.shape == SegmentShape::StepList).collect();
        assert_eq!(steps.len(), 1);
        assert!(steps[0].text.starts_with("1. Build the release artifact\n2. Upload"));

        assert!(segments.iter().any(|s| s.text == "You must never deploy on Fridays."));
        assert!(!segments.iter().any(|s| s.text.contains("Deploying")));
    }

    #[test]
    fn test_extraction_kinds() {
        let extractor = KnowledgeExtractor::new(Arc::new(HeuristicClassifier::default()));
        let candidates = extractor.extract(DOC);

        let kinds: Vec<KnowledgeKind> = candidates.iter().map(|c| c.kind).collect();
        assert!(kinds.contains(&KnowledgeKind::Concept));
        assert!(kinds.contains(&KnowledgeKind::Relationship));
        assert!(kinds.contains(&KnowledgeKind::Procedure));
        assert!(kinds.contains(&KnowledgeKind::Example));
        assert!(kinds.contains(&KnowledgeKind::Rule));
        assert_eq!(candidates.len(), 5);

        let concept = candidates.iter().find(|c| c.kind == KnowledgeKind::Concept).unwrap();
        assert_eq!(concept.term.as_deref(), Some("canary"));
    }

    #[test]
    fn test_empty_document_yields_nothing() {
        let extractor = KnowledgeExtractor::new(Arc::new(HeuristicClassifier::default()));
        assert!(extractor.extract("").is_empty());
        assert!(extractor.extract("ok? fine.").is_empty());
    }
}
