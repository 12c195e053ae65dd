//! Typed predicates over a single payload field.
//!
//! A [`Rule`] names a payload key, the type its value should be read as, a
//! comparison operator and a literal operand. Rules are pure: evaluating one
//! never mutates anything, so they are safe to share across pipeline passes.
//!
//! # Semantics
//!
//! ```text
//! field absent or null  -> true only for notEquals
//! boolean               -> equality only
//! string                -> equals / notEquals
//! number                -> equals (bit-exact f64) / greaterThan / lessThan
//! ```
//!
//! Type/operator combinations are checked when a rule is built; literal and
//! field values are parsed at evaluation time and surface as
//! [`RuleError::InvalidLiteral`] / [`RuleError::InvalidField`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

use crate::event::Payload;

/// Errors raised while building or evaluating a rule.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuleError {
    #[error("unknown rule operator '{0}'")]
    UnknownOperator(String),

    #[error("operator {operator} is not defined for {rule_type} rules")]
    UnsupportedOperator {
        rule_type: RuleType,
        operator: Operator,
    },

    #[error("rule key must not be empty")]
    EmptyKey,

    #[error("rule value must be a scalar, got {0}")]
    NonScalarValue(String),

    #[error("cannot parse '{literal}' as {rule_type}")]
    InvalidLiteral { literal: String, rule_type: RuleType },

    #[error("field '{key}' holds {found}, which cannot be read as {rule_type}")]
    InvalidField {
        key: String,
        found: String,
        rule_type: RuleType,
    },
}

/// How the rule operand and field value are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    #[serde(alias = "bool")]
    Boolean,
    String,
    Number,
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleType::Boolean => write!(f, "boolean"),
            RuleType::String => write!(f, "string"),
            RuleType::Number => write!(f, "number"),
        }
    }
}

/// Comparison operator. Defaults to [`Operator::Equals`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Operator {
    #[default]
    #[serde(rename = "equals")]
    Equals,
    #[serde(rename = "notEquals")]
    NotEquals,
    #[serde(rename = "greaterThan")]
    GreaterThan,
    #[serde(rename = "lessThan")]
    LessThan,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Equals => write!(f, "equals"),
            Operator::NotEquals => write!(f, "notEquals"),
            Operator::GreaterThan => write!(f, "greaterThan"),
            Operator::LessThan => write!(f, "lessThan"),
        }
    }
}

impl FromStr for Operator {
    type Err = RuleError;

    /// Accepts the long names plus the short `eq`/`ne`/`gt`/`lt` settings.
    /// An empty string means "unspecified" and maps to equals.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "equals" | "eq" => Ok(Operator::Equals),
            "notEquals" | "not_equals" | "ne" => Ok(Operator::NotEquals),
            "greaterThan" | "greater_than" | "gt" => Ok(Operator::GreaterThan),
            "lessThan" | "less_than" | "lt" => Ok(Operator::LessThan),
            other => Err(RuleError::UnknownOperator(other.to_string())),
        }
    }
}

/// Reject operator/type pairs that have no defined meaning.
fn check_operator(rule_type: RuleType, operator: Operator) -> Result<(), RuleError> {
    let allowed = match rule_type {
        RuleType::Boolean => matches!(operator, Operator::Equals),
        RuleType::String => matches!(operator, Operator::Equals | Operator::NotEquals),
        RuleType::Number => matches!(
            operator,
            Operator::Equals | Operator::GreaterThan | Operator::LessThan
        ),
    };

    if allowed {
        Ok(())
    } else {
        Err(RuleError::UnsupportedOperator {
            rule_type,
            operator,
        })
    }
}

/// Rule as it appears in configuration or the admin API.
#[derive(Debug, Deserialize)]
struct RawRule {
    key: String,
    #[serde(rename = "type")]
    rule_type: RuleType,
    #[serde(default, alias = "setting")]
    operator: Option<String>,
    value: Value,
}

/// A single typed predicate over one payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRule")]
pub struct Rule {
    key: String,
    #[serde(rename = "type")]
    rule_type: RuleType,
    operator: Operator,
    value: String,
}

impl TryFrom<RawRule> for Rule {
    type Error = RuleError;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        let operator = match raw.operator.as_deref() {
            None => Operator::default(),
            Some(s) => s.parse()?,
        };

        let value = match raw.value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => return Err(RuleError::NonScalarValue(describe(&other))),
        };

        Rule::new(raw.key, raw.rule_type, operator, value)
    }
}

impl Rule {
    /// Build a rule, rejecting combinations the evaluator cannot interpret.
    pub fn new(
        key: impl Into<String>,
        rule_type: RuleType,
        operator: Operator,
        value: impl Into<String>,
    ) -> Result<Self, RuleError> {
        let key = key.into();
        if key.is_empty() {
            return Err(RuleError::EmptyKey);
        }
        check_operator(rule_type, operator)?;

        Ok(Self {
            key,
            rule_type,
            operator,
            value: value.into(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn rule_type(&self) -> RuleType {
        self.rule_type
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Evaluate the rule against a payload.
    ///
    /// A missing or `null` field is "not equal to anything": the result is
    /// `true` only for [`Operator::NotEquals`]. Parse failures are returned
    /// rather than treated as a match either way.
    pub fn evaluate(&self, payload: &Payload) -> Result<bool, RuleError> {
        let Some(field) = payload.field(&self.key) else {
            return Ok(self.operator == Operator::NotEquals);
        };

        // Type/operator pairs were checked when the rule was built.

        match self.rule_type {
            RuleType::Boolean => {
                let expected = parse_bool(&self.value).ok_or_else(|| self.invalid_literal())?;
                let actual = self.field_bool(field)?;
                Ok(actual == expected)
            }
            RuleType::String => {
                let actual = self.field_string(field)?;
                let equal = actual == self.value;
                Ok(match self.operator {
                    Operator::NotEquals => !equal,
                    _ => equal,
                })
            }
            RuleType::Number => {
                let expected: f64 = self.value.parse().map_err(|_| self.invalid_literal())?;
                let actual = self.field_number(field)?;
                Ok(match self.operator {
                    Operator::GreaterThan => actual > expected,
                    Operator::LessThan => actual < expected,
                    _ => actual.to_bits() == expected.to_bits(),
                })
            }
        }
    }

    /// Evaluate, logging and treating any error as an unmet rule.
    pub fn is_met(&self, payload: &Payload) -> bool {
        match self.evaluate(payload) {
            Ok(met) => met,
            Err(e) => {
                warn!(
                    key = %self.key,
                    rule_type = %self.rule_type,
                    error = %e,
                    "Rule could not be evaluated, treating as unmet"
                );
                false
            }
        }
    }

    fn invalid_literal(&self) -> RuleError {
        RuleError::InvalidLiteral {
            literal: self.value.clone(),
            rule_type: self.rule_type,
        }
    }

    fn invalid_field(&self, found: &Value) -> RuleError {
        RuleError::InvalidField {
            key: self.key.clone(),
            found: describe(found),
            rule_type: self.rule_type,
        }
    }

    fn field_bool(&self, field: &Value) -> Result<bool, RuleError> {
        match field {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => parse_bool(s).ok_or_else(|| self.invalid_field(field)),
            _ => Err(self.invalid_field(field)),
        }
    }

    fn field_string(&self, field: &Value) -> Result<String, RuleError> {
        match field {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(self.invalid_field(field)),
        }
    }

    fn field_number(&self, field: &Value) -> Result<f64, RuleError> {
        match field {
            Value::Number(n) => n.as_f64().ok_or_else(|| self.invalid_field(field)),
            Value::String(s) => s.parse().map_err(|_| self.invalid_field(field)),
            _ => Err(self.invalid_field(field)),
        }
    }
}

/// Boolean literals: `1 t T TRUE true True` and `0 f F FALSE false False`.
fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "a boolean".to_string(),
        Value::Number(_) => "a number".to_string(),
        Value::String(_) => "a string".to_string(),
        Value::Array(_) => "an array".to_string(),
        Value::Object(_) => "an object".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        Payload::from_value(value).unwrap()
    }

    fn rule(key: &str, rule_type: RuleType, operator: Operator, value: &str) -> Rule {
        Rule::new(key, rule_type, operator, value).unwrap()
    }

    #[test]
    fn test_number_equals_string_field() {
        let r = rule("number", RuleType::Number, Operator::Equals, "12");
        assert!(r.evaluate(&payload(json!({"number": "12"}))).unwrap());
        assert!(!r.evaluate(&payload(json!({"number": "13"}))).unwrap());
    }

    #[test]
    fn test_number_equals_numeric_field() {
        let r = rule("number", RuleType::Number, Operator::Equals, "12");
        assert!(r.evaluate(&payload(json!({"number": 12}))).unwrap());
        assert!(r.evaluate(&payload(json!({"number": 12.0}))).unwrap());
    }

    #[test]
    fn test_number_equality_has_no_tolerance() {
        let r = rule("ratio", RuleType::Number, Operator::Equals, "0.3");
        assert!(!r.evaluate(&payload(json!({"ratio": 0.1 + 0.2}))).unwrap());
        assert!(r.evaluate(&payload(json!({"ratio": "0.30"}))).unwrap());
    }

    #[test]
    fn test_number_equality_is_bitwise() {
        // 0.0 == -0.0 numerically, but the bit patterns differ.
        let zero = rule("n", RuleType::Number, Operator::Equals, "0");
        assert!(!zero.evaluate(&payload(json!({"n": "-0"}))).unwrap());
        assert!(!zero.evaluate(&payload(json!({"n": -0.0}))).unwrap());
        assert!(zero.evaluate(&payload(json!({"n": "0.0"}))).unwrap());

        let nan = rule("n", RuleType::Number, Operator::Equals, "NaN");
        assert!(nan.evaluate(&payload(json!({"n": "NaN"}))).unwrap());
    }

    #[test]
    fn test_number_greater_and_less_than() {
        let gt = rule("number", RuleType::Number, Operator::GreaterThan, "1");
        assert!(!gt.evaluate(&payload(json!({"number": "0"}))).unwrap());
        assert!(!gt.evaluate(&payload(json!({"number": "1"}))).unwrap());
        assert!(gt.evaluate(&payload(json!({"number": "1.5"}))).unwrap());

        let lt = rule("number", RuleType::Number, Operator::LessThan, "-2");
        assert!(lt.evaluate(&payload(json!({"number": -3}))).unwrap());
        assert!(!lt.evaluate(&payload(json!({"number": -2}))).unwrap());
    }

    #[test]
    fn test_string_equals_and_not_equals() {
        let eq = rule("name", RuleType::String, Operator::Equals, "Go");
        assert!(eq.evaluate(&payload(json!({"name": "Go"}))).unwrap());
        assert!(!eq.evaluate(&payload(json!({"name": "go"}))).unwrap());

        let ne = rule("name", RuleType::String, Operator::NotEquals, "Go");
        assert!(!ne.evaluate(&payload(json!({"name": "Go"}))).unwrap());
        assert!(ne.evaluate(&payload(json!({"name": "Rust"}))).unwrap());
    }

    #[test]
    fn test_missing_key_only_satisfies_not_equals() {
        let empty = payload(json!({}));

        let ne = rule("name", RuleType::String, Operator::NotEquals, "Go");
        assert!(ne.evaluate(&empty).unwrap());

        for (rule_type, operator) in [
            (RuleType::String, Operator::Equals),
            (RuleType::Boolean, Operator::Equals),
            (RuleType::Number, Operator::Equals),
            (RuleType::Number, Operator::GreaterThan),
            (RuleType::Number, Operator::LessThan),
        ] {
            let r = rule("name", rule_type, operator, "1");
            assert!(!r.evaluate(&empty).unwrap(), "{rule_type} {operator}");
        }
    }

    #[test]
    fn test_null_field_is_treated_as_missing() {
        let p = payload(json!({"name": null}));

        let ne = rule("name", RuleType::String, Operator::NotEquals, "Go");
        assert!(ne.evaluate(&p).unwrap());

        let eq = rule("name", RuleType::String, Operator::Equals, "Go");
        assert!(!eq.evaluate(&p).unwrap());
    }

    #[test]
    fn test_boolean_rules() {
        let r = rule("active", RuleType::Boolean, Operator::Equals, "true");
        assert!(r.evaluate(&payload(json!({"active": true}))).unwrap());
        assert!(!r.evaluate(&payload(json!({"active": false}))).unwrap());
        assert!(r.evaluate(&payload(json!({"active": "T"}))).unwrap());

        let r = rule("active", RuleType::Boolean, Operator::Equals, "0");
        assert!(r.evaluate(&payload(json!({"active": false}))).unwrap());
    }

    #[test]
    fn test_unsupported_operators_rejected_at_construction() {
        let err = Rule::new("a", RuleType::Boolean, Operator::NotEquals, "true").unwrap_err();
        assert!(matches!(err, RuleError::UnsupportedOperator { .. }));

        assert!(Rule::new("a", RuleType::String, Operator::GreaterThan, "x").is_err());
        assert!(Rule::new("a", RuleType::Number, Operator::NotEquals, "1").is_err());
        assert!(matches!(
            Rule::new("", RuleType::String, Operator::Equals, "x"),
            Err(RuleError::EmptyKey)
        ));
    }

    #[test]
    fn test_malformed_literal_is_parse_error_and_unmet() {
        let r = rule("number", RuleType::Number, Operator::Equals, "twelve");
        let p = payload(json!({"number": 12}));

        assert!(matches!(
            r.evaluate(&p),
            Err(RuleError::InvalidLiteral { .. })
        ));
        assert!(!r.is_met(&p));

        let r = rule("active", RuleType::Boolean, Operator::Equals, "yes");
        assert!(r.evaluate(&payload(json!({"active": true}))).is_err());
    }

    #[test]
    fn test_non_scalar_field_is_parse_error() {
        let r = rule("number", RuleType::Number, Operator::Equals, "1");
        let p = payload(json!({"number": [1]}));
        assert!(matches!(r.evaluate(&p), Err(RuleError::InvalidField { .. })));
        assert!(!r.is_met(&p));

        let r = rule("name", RuleType::String, Operator::Equals, "Go");
        assert!(r.evaluate(&payload(json!({"name": {"first": "Go"}}))).is_err());
    }

    #[test]
    fn test_deserialize_with_setting_alias() {
        let rules: Vec<Rule> = serde_json::from_str(
            r#"[
                {"key": "number", "type": "number", "setting": "eq", "value": "12"},
                {"key": "name", "type": "string", "setting": null, "value": "Go"},
                {"key": "name", "type": "string", "setting": "", "value": "Go"},
                {"key": "count", "type": "number", "operator": "greaterThan", "value": 3}
            ]"#,
        )
        .unwrap();

        assert_eq!(rules[0].operator(), Operator::Equals);
        assert_eq!(rules[1].operator(), Operator::Equals);
        assert_eq!(rules[2].operator(), Operator::Equals);
        assert_eq!(rules[3].operator(), Operator::GreaterThan);
        assert_eq!(rules[3].value(), "3");
    }

    #[test]
    fn test_deserialize_rejects_bad_rules() {
        let unknown_op = r#"{"key": "a", "type": "number", "operator": "between", "value": "1"}"#;
        assert!(serde_json::from_str::<Rule>(unknown_op).is_err());

        let bad_combo = r#"{"key": "a", "type": "boolean", "operator": "ne", "value": "true"}"#;
        assert!(serde_json::from_str::<Rule>(bad_combo).is_err());

        let unknown_type = r#"{"key": "a", "type": "date", "value": "x"}"#;
        assert!(serde_json::from_str::<Rule>(unknown_type).is_err());
    }

    #[test]
    fn test_serialize_round_trips_through_config_shape() {
        let r = rule("number", RuleType::Number, Operator::GreaterThan, "1");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(
            json,
            json!({"key": "number", "type": "number", "operator": "greaterThan", "value": "1"})
        );
        let back: Rule = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }
}
