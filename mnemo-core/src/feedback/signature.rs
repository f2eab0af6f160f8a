use regex_utils::facets::FacetMatcher;

use super::{FeedbackConfig, FeedbackKind};

/// Derives the structural signature events are grouped by
///
/// Format: `kind:length_bucket:facet`, e.g. `negative:short:detail`.
pub struct SignatureBuilder {
    short_chars: usize,
    long_chars: usize,
    facets: FacetMatcher,
}

impl SignatureBuilder {
    pub fn new(config: &FeedbackConfig) -> Self {
        Self {
            short_chars: config.short_response_chars,
            long_chars: config.long_response_chars,
            facets: FacetMatcher::new(),
        }
    }

    pub fn length_bucket(&self, response: Option<&str>) -> &'static str {
        match response.map(|r| r.chars().count()) {
            None => "unknown",
            Some(n) if n < self.short_chars => "short",
            Some(n) if n > self.long_chars => "long",
            Some(_) => "medium",
        }
    }

    pub fn facet(&self, comment: Option<&str>) -> &'static str {
        comment.and_then(|c| self.facets.detect(c)).unwrap_or("general")
    }

    pub fn build(&self, kind: FeedbackKind, response: Option<&str>, comment: Option<&str>) -> String {
        format!("{}:{}:{}", kind, self.length_bucket(response), self.facet(comment))
    }
}

impl Default for SignatureBuilder {
    fn default() -> Self {
        Self::new(&FeedbackConfig::default())
    }
}

/// Human-readable fix for a recurring signature
pub fn suggested_fix(signature: &str) -> String {
    let mut parts = signature.split(':');
    let _kind = parts.next();
    let bucket = parts.next().unwrap_or("unknown");
    let facet = parts.next().unwrap_or("general");

    match (facet, bucket) {
        ("detail", _) | ("general", "short") => "Give more detailed and complete responses".to_string(),
        ("verbosity", _) | ("general", "long") => "Keep responses concise and to the point".to_string(),
        ("factual", _) => "Verify factual claims before answering".to_string(),
        ("clarity", _) => "Explain more clearly, with concrete examples".to_string(),
        ("incomplete", _) => "Address every part of the request".to_string(),
        ("format", _) => "Adjust response formatting to the user's preference".to_string(),
        _ => format!("Review responses matching '{}' for a recurring problem", signature),
    }
}
