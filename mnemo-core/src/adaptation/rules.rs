use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::Strategy;
use super::behavior::{CODE_STYLE, DETAIL_LEVEL, EXPLANATION_DEPTH, PROACTIVITY, TONE};

pub type Signals = BTreeMap<String, Value>;

/// Predicate over context signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Always,
    /// Signal equals value; strings compare case-insensitively
    Equals { signal: String, value: Value },
    /// Numeric signal at or above threshold
    AtLeast { signal: String, threshold: f64 },
    /// String signal contains the needle
    Contains { signal: String, needle: String },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
}

impl Condition {
    pub fn equals(signal: &str, value: impl Into<Value>) -> Self {
        Condition::Equals { signal: signal.to_string(), value: value.into() }
    }

    pub fn at_least(signal: &str, threshold: f64) -> Self {
        Condition::AtLeast { signal: signal.to_string(), threshold }
    }

    pub fn matches(&self, signals: &Signals) -> bool {
        match self {
            Condition::Always => true,
            Condition::Equals { signal, value } => match (signals.get(signal), value) {
                (Some(Value::String(a)), Value::String(b)) => a.eq_ignore_ascii_case(b),
                (Some(actual), expected) => actual == expected,
                (None, _) => false,
            },
            Condition::AtLeast { signal, threshold } => {
                signals.get(signal).and_then(Value::as_f64).is_some_and(|v| v >= *threshold)
            }
            Condition::Contains { signal, needle } => signals
                .get(signal)
                .and_then(Value::as_str)
                .is_some_and(|s| s.to_lowercase().contains(&needle.to_lowercase())),
            Condition::All { conditions } => conditions.iter().all(|c| c.matches(signals)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.matches(signals)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationRule {
    pub id: Uuid,
    pub name: String,
    pub condition: Condition,
    pub adjustment: BTreeMap<String, String>,
    pub strategy: Strategy,
    pub priority: i32,
}

impl AdaptationRule {
    pub fn new(name: &str, condition: Condition, strategy: Strategy, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            condition,
            adjustment: BTreeMap::new(),
            strategy,
            priority,
        }
    }

    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.adjustment.insert(key.to_string(), value.to_string());
        self
    }
}

/// Built-in rules for common contexts and recurring feedback
pub fn default_rules() -> Vec<AdaptationRule> {
    vec![
        AdaptationRule::new("beginner_user", Condition::equals("expertise", "beginner"), Strategy::Immediate, 80)
            .set(DETAIL_LEVEL, "detailed")
            .set(EXPLANATION_DEPTH, "thorough")
            .set(CODE_STYLE, "commented"),
        AdaptationRule::new("expert_user", Condition::equals("expertise", "expert"), Strategy::Immediate, 80)
            .set(DETAIL_LEVEL, "concise")
            .set(EXPLANATION_DEPTH, "brief")
            .set(CODE_STYLE, "minimal"),
        AdaptationRule::new(
            "frustrated_user",
            Condition::equals("sentiment", "frustrated"),
            Strategy::Immediate,
            100,
        )
        .set(TONE, "empathetic")
        .set(DETAIL_LEVEL, "detailed")
        .set(PROACTIVITY, "high"),
        AdaptationRule::new("long_conversation", Condition::at_least("conversation_depth", 10.0), Strategy::Gradual, 40)
            .set(DETAIL_LEVEL, "concise")
            .set(PROACTIVITY, "high"),
        AdaptationRule::new("debugging_task", Condition::equals("task_type", "debugging"), Strategy::Immediate, 60)
            .set(DETAIL_LEVEL, "detailed")
            .set(EXPLANATION_DEPTH, "thorough")
            .set(PROACTIVITY, "high"),
        AdaptationRule::new(
            "feedback_wants_detail",
            Condition::Any {
                conditions: vec![
                    Condition::equals("feedback_facet", "detail"),
                    Condition::All {
                        conditions: vec![
                            Condition::equals("response_length", "short"),
                            Condition::equals("feedback_facet", "general"),
                        ],
                    },
                ],
            },
            Strategy::Validated,
            50,
        )
        .set(DETAIL_LEVEL, "detailed"),
        AdaptationRule::new(
            "feedback_wants_brevity",
            Condition::Any {
                conditions: vec![
                    Condition::equals("feedback_facet", "verbosity"),
                    Condition::All {
                        conditions: vec![
                            Condition::equals("response_length", "long"),
                            Condition::equals("feedback_facet", "general"),
                        ],
                    },
                ],
            },
            Strategy::Validated,
            50,
        )
        .set(DETAIL_LEVEL, "concise"),
        AdaptationRule::new("feedback_wants_clarity", Condition::equals("feedback_facet", "clarity"), Strategy::Validated, 50)
            .set(EXPLANATION_DEPTH, "thorough"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signals(pairs: &[(&str, Value)]) -> Signals {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_condition_matching() {
        let s = signals(&[("expertise", json!("Beginner")), ("conversation_depth", json!(12))]);

        assert!(Condition::equals("expertise", "beginner").matches(&s));
        assert!(Condition::at_least("conversation_depth", 10.0).matches(&s));
        assert!(!Condition::at_least("missing", 0.0).matches(&s));
        assert!(
            Condition::All {
                conditions: vec![Condition::Always, Condition::equals("expertise", "beginner")]
            }
            .matches(&s)
        );
        assert!(
            !Condition::Any { conditions: vec![Condition::equals("expertise", "expert")] }.matches(&s)
        );
        assert!(
            Condition::Contains { signal: "expertise".into(), needle: "GIN".into() }.matches(&s)
        );
    }

    #[test]
    fn test_condition_serialization_shape() {
        let condition = Condition::at_least("conversation_depth", 10.0);
        let value = serde_json::to_value(&condition).unwrap();
        assert_eq!(value, json!({"type": "at_least", "signal": "conversation_depth", "threshold": 10.0}));
        let back: Condition = serde_json::from_value(value).unwrap();
        assert_eq!(back, condition);
    }

    #[test]
    fn test_default_rules_use_known_keys() {
        for rule in default_rules() {
            assert!(!rule.adjustment.is_empty(), "{} has no adjustment", rule.name);
            for (key, value) in &rule.adjustment {
                crate::adaptation::behavior::validate_change(key, value).unwrap();
            }
        }
    }
}
