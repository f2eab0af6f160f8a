//! Regex utilities for mnemo
//! Extracted to a separate crate for compilation optimization

use once_cell::sync::Lazy;
use regex::Regex;

/// Document segmentation patterns
pub mod segment {
    use super::*;

    pub static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?s)```[^\n]*\n(.*?)```").expect("Invalid regex pattern")
    });

    pub static LIST_ITEM: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+(.+)$").expect("Invalid regex pattern")
    });

    pub static NUMBERED_ITEM: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^\s*\d+[.)]\s+(.+)$").expect("Invalid regex pattern")
    });

    pub static SENTENCE_END: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"[.!?]+(?:\s+|$)").expect("Invalid regex pattern")
    });

    /// Bodies of fenced code blocks, in document order
    pub fn code_blocks(text: &str) -> Vec<String> {
        CODE_FENCE
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim_end().to_string())
            .filter(|body| !body.trim().is_empty())
            .collect()
    }

    /// Text with every fenced code block removed
    pub fn strip_code_blocks(text: &str) -> String {
        CODE_FENCE.replace_all(text, "\n").into_owned()
    }

    /// Split prose into trimmed sentences, terminal punctuation kept
    pub fn sentences(text: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut start = 0;
        for m in SENTENCE_END.find_iter(text) {
            let sentence = text[start..m.end()].trim();
            if !sentence.is_empty() {
                out.push(sentence.to_string());
            }
            start = m.end();
        }
        let tail = text[start..].trim();
        if !tail.is_empty() {
            out.push(tail.to_string());
        }
        out
    }
}

/// Lexical heuristics used to classify knowledge statements
pub mod knowledge {
    use super::*;

    pub static DEFINITION: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)^\s*([\w][\w\s\-]{0,60}?)\s+(?:is|are)\s+(?:a|an|the)\s+(.+)$")
            .expect("Invalid regex pattern")
    });

    pub static COLON_DEFINITION: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^\s*([A-Z][\w\s\-]{0,40}):\s+(.{10,})$").expect("Invalid regex pattern")
    });

    pub static MEANS: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)\b(?:means|refers to|is defined as|stands for)\b")
            .expect("Invalid regex pattern")
    });

    pub static IMPERATIVE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"(?i)^\s*(?:first,?\s+|then,?\s+|next,?\s+|finally,?\s+)?(?:run|install|open|create|add|remove|click|type|set|configure|use|call|start|stop|build|copy|move|enter|select|navigate|download|restart|check|ensure|make)\b",
        )
        .expect("Invalid regex pattern")
    });

    pub static RELATION: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"(?i)\b(?:depends on|is part of|belongs to|causes|leads to|is related to|consists of|contains|requires|inherits from)\b",
        )
        .expect("Invalid regex pattern")
    });

    pub static RULE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)\b(?:must|should|never|always|shall|do not|don't)\b")
            .expect("Invalid regex pattern")
    });

    pub static QUESTION: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)(?:\?\s*$|^\s*(?:who|what|when|where|why|how)\b)")
            .expect("Invalid regex pattern")
    });

    pub static LEADING_ARTICLE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)^(?:a|an|the)\s+").expect("Invalid regex pattern"));

    /// Subject of a definitional sentence, if it is one, without its article
    pub fn defined_term(text: &str) -> Option<String> {
        let term = DEFINITION
            .captures(text)
            .or_else(|| COLON_DEFINITION.captures(text))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())?;

        let term = LEADING_ARTICLE.replace(term, "").trim().to_string();
        if term.is_empty() { None } else { Some(term) }
    }

    pub fn is_definition(text: &str) -> bool {
        defined_term(text).is_some() || MEANS.is_match(text)
    }

    pub fn is_imperative(text: &str) -> bool {
        IMPERATIVE.is_match(text)
    }

    pub fn is_relation(text: &str) -> bool {
        RELATION.is_match(text)
    }

    pub fn is_rule(text: &str) -> bool {
        RULE.is_match(text)
    }

    pub fn is_question(text: &str) -> bool {
        QUESTION.is_match(text)
    }
}

/// Word tokenization shared by embedding and lexical scoring
pub mod tokens {
    use super::*;

    pub static WORD: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[\p{L}\p{N}_]+").expect("Invalid regex pattern"));

    /// Lowercased word tokens
    pub fn words(text: &str) -> Vec<String> {
        WORD.find_iter(text).map(|m| m.as_str().to_lowercase()).collect()
    }
}

/// Feedback comment facets
pub mod facets {
    const FACETS: &[(&str, &[&str])] = &[
        ("factual", &["wrong", "incorrect", "not true", "false", "inaccurate"]),
        ("clarity", &["confusing", "unclear", "hard to understand", "not clear"]),
        ("incomplete", &["incomplete", "missing", "left out", "didn't finish"]),
        ("detail", &["more detail", "more details", "too short", "elaborate", "expand"]),
        ("verbosity", &["too long", "verbose", "shorter", "too much", "concise"]),
        ("format", &["format", "formatting", "bullet", "table", "markdown"]),
    ];

    pub struct FacetMatcher {
        facets: &'static [(&'static str, &'static [&'static str])],
    }

    impl FacetMatcher {
        pub fn new() -> Self {
            Self { facets: FACETS }
        }

        /// First facet whose keywords appear in the comment
        pub fn detect(&self, comment: &str) -> Option<&'static str> {
            let comment_lower = comment.to_lowercase();

            for (facet, keywords) in self.facets {
                if keywords.iter().any(|k| comment_lower.contains(k)) {
                    return Some(*facet);
                }
            }

            None
        }
    }

    impl Default for FacetMatcher {
        fn default() -> Self {
            Self::new()
        }
    }
}

/// Sensitive-content patterns for guardrails
pub mod sensitive {
    use super::*;

    pub static CREDENTIAL: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)\b(?:password|passwd|secret|token|api[_\s-]?key|private[_\s-]?key|credential)s?\b")
            .expect("Invalid regex pattern")
    });

    pub fn mentions_credentials(text: &str) -> bool {
        CREDENTIAL.is_match(text)
    }
}
