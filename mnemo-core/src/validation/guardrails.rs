use regex_utils::sensitive::mentions_credentials;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ProposedChange, RequestKind, RiskLevel};
use crate::adaptation::behavior::DETAIL_LEVEL;

/// Predicate over a request's JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayloadPredicate {
    Always,
    /// Any string in the payload names a credential
    MentionsCredentials,
    /// A key with this name is `true` anywhere in the payload
    Flag { name: String },
    /// An adaptation changes this behavior key
    TouchesKey { key: String },
    /// Any string in the payload contains one of the needles
    ContainsText { needles: Vec<String> },
    Any { predicates: Vec<PayloadPredicate> },
}

impl PayloadPredicate {
    pub fn holds(&self, payload: &Value) -> bool {
        match self {
            PayloadPredicate::Always => true,
            PayloadPredicate::MentionsCredentials => any_string(payload, &|s| mentions_credentials(s)),
            PayloadPredicate::Flag { name } => has_flag(payload, name),
            PayloadPredicate::TouchesKey { key } => {
                payload.get("changes").and_then(Value::as_object).is_some_and(|c| c.contains_key(key))
            }
            PayloadPredicate::ContainsText { needles } => {
                let needles: Vec<String> = needles.iter().map(|n| n.to_lowercase()).collect();
                any_string(payload, &|s| {
                    let s = s.to_lowercase();
                    needles.iter().any(|n| s.contains(n.as_str()))
                })
            }
            PayloadPredicate::Any { predicates } => predicates.iter().any(|p| p.holds(payload)),
        }
    }
}

fn any_string(value: &Value, test: &dyn Fn(&str) -> bool) -> bool {
    match value {
        Value::String(s) => test(s),
        Value::Array(items) => items.iter().any(|v| any_string(v, test)),
        Value::Object(map) => map.iter().any(|(k, v)| test(k) || any_string(v, test)),
        _ => false,
    }
}

fn has_flag(value: &Value, name: &str) -> bool {
    match value {
        Value::Object(map) => map.iter().any(|(k, v)| (k == name && v == &Value::Bool(true)) || has_flag(v, name)),
        Value::Array(items) => items.iter().any(|v| has_flag(v, name)),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum GuardrailEffect {
    Elevate { risk: RiskLevel },
    Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guardrail {
    pub name: String,
    pub applies_to: PayloadPredicate,
    /// Request kinds the guardrail watches; empty means all
    #[serde(default)]
    pub kinds: Vec<RequestKind>,
    pub min_risk_to_trigger: RiskLevel,
    pub effect: GuardrailEffect,
}

impl Guardrail {
    pub fn new(name: &str, applies_to: PayloadPredicate, effect: GuardrailEffect) -> Self {
        Self {
            name: name.to_string(),
            applies_to,
            kinds: Vec::new(),
            min_risk_to_trigger: RiskLevel::Low,
            effect,
        }
    }

    pub fn for_kinds(mut self, kinds: &[RequestKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    pub fn triggers(&self, change: &ProposedChange, payload: &Value, base_risk: RiskLevel) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&change.kind()))
            && base_risk >= self.min_risk_to_trigger
            && self.applies_to.holds(payload)
    }
}

/// Outcome of running every guardrail over one change
#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
    Risk { level: RiskLevel, triggered: Vec<String> },
    Blocked { guardrail: String },
}

/// Risk is the maximum of the base risk and every triggered elevation
pub fn assess(guardrails: &[Guardrail], change: &ProposedChange, payload: &Value) -> Assessment {
    let base = change.base_risk();
    let mut level = base;
    let mut triggered = Vec::new();

    for guardrail in guardrails.iter().filter(|g| g.triggers(change, payload, base)) {
        match guardrail.effect {
            GuardrailEffect::Block => return Assessment::Blocked { guardrail: guardrail.name.clone() },
            GuardrailEffect::Elevate { risk } => {
                level = level.max(risk);
                triggered.push(guardrail.name.clone());
            }
        }
    }
    Assessment::Risk { level, triggered }
}

pub fn default_guardrails() -> Vec<Guardrail> {
    vec![
        Guardrail::new("credential_access", PayloadPredicate::MentionsCredentials, GuardrailEffect::Block)
            .for_kinds(&[RequestKind::Permission]),
        Guardrail::new(
            "system_modification",
            PayloadPredicate::Flag { name: "system_modification".into() },
            GuardrailEffect::Elevate { risk: RiskLevel::High },
        ),
        Guardrail::new(
            "external_access",
            PayloadPredicate::Flag { name: "external_access".into() },
            GuardrailEffect::Elevate { risk: RiskLevel::High },
        ),
        Guardrail::new(
            "code_execution",
            PayloadPredicate::Flag { name: "executes_code".into() },
            GuardrailEffect::Elevate { risk: RiskLevel::Medium },
        ),
        Guardrail::new(
            "detail_level_change",
            PayloadPredicate::TouchesKey { key: DETAIL_LEVEL.into() },
            GuardrailEffect::Elevate { risk: RiskLevel::Medium },
        )
        .for_kinds(&[RequestKind::Adaptation]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptation::Strategy;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn payload(change: &ProposedChange) -> Value {
        serde_json::to_value(change).unwrap()
    }

    fn adaptation(key: &str, value: &str) -> ProposedChange {
        let mut changes = BTreeMap::new();
        changes.insert(key.to_string(), value.to_string());
        ProposedChange::Adaptation { changes, strategy: Strategy::Immediate }
    }

    #[test]
    fn test_predicates() {
        let value = json!({"action": "deploy", "payload": {"nested": {"executes_code": true}, "note": "Uses an API key"}});
        assert!(PayloadPredicate::Flag { name: "executes_code".into() }.holds(&value));
        assert!(!PayloadPredicate::Flag { name: "external_access".into() }.holds(&value));
        assert!(PayloadPredicate::MentionsCredentials.holds(&value));
        assert!(PayloadPredicate::ContainsText { needles: vec!["DEPLOY".into()] }.holds(&value));
        assert!(!PayloadPredicate::TouchesKey { key: "tone".into() }.holds(&value));
    }

    #[test]
    fn test_credential_permission_blocked() {
        let change = ProposedChange::Permission {
            action: "read_file".into(),
            payload: json!({"path": "~/.ssh/private key"}),
        };
        let outcome = assess(&default_guardrails(), &change, &payload(&change));
        assert_eq!(outcome, Assessment::Blocked { guardrail: "credential_access".into() });
    }

    #[test]
    fn test_elevation_takes_maximum() {
        let change = ProposedChange::Permission {
            action: "fetch".into(),
            payload: json!({"external_access": true, "executes_code": true}),
        };
        match assess(&default_guardrails(), &change, &payload(&change)) {
            Assessment::Risk { level, triggered } => {
                assert_eq!(level, RiskLevel::High);
                assert_eq!(triggered, vec!["external_access".to_string(), "code_execution".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_detail_level_adaptation_is_medium() {
        let change = adaptation(DETAIL_LEVEL, "detailed");
        assert!(matches!(
            assess(&default_guardrails(), &change, &payload(&change)),
            Assessment::Risk { level: RiskLevel::Medium, .. }
        ));

        let tone = adaptation("tone", "casual");
        assert!(matches!(
            assess(&default_guardrails(), &tone, &payload(&tone)),
            Assessment::Risk { level: RiskLevel::Low, .. }
        ));
    }

    #[test]
    fn test_min_risk_gates_trigger() {
        let mut guardrail = Guardrail::new("strict", PayloadPredicate::Always, GuardrailEffect::Block);
        guardrail.min_risk_to_trigger = RiskLevel::High;

        let knowledge = ProposedChange::Knowledge {
            statement: "water boils at 100C".into(),
            domain: "physics".into(),
            source_ref: "doc".into(),
        };
        assert!(!guardrail.triggers(&knowledge, &payload(&knowledge), knowledge.base_risk()));

        let safety = ProposedChange::Safety { description: "x".into() };
        assert!(guardrail.triggers(&safety, &payload(&safety), safety.base_risk()));
    }
}
