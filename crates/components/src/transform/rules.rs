use common::types::value_key;
use common::Record;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Comparison a [`ValidationRule`] applies to one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RuleCheck {
    Required,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Equals,
    NotEquals,
    MinLength,
    MaxLength,
    Pattern,
    OneOf,
    /// A check registered by name on the transformer.
    Custom(String),
}

impl From<String> for RuleCheck {
    fn from(value: String) -> Self {
        match value.as_str() {
            "required" => RuleCheck::Required,
            "greater_than" | "gt" => RuleCheck::GreaterThan,
            "greater_or_equal" | "gte" => RuleCheck::GreaterOrEqual,
            "less_than" | "lt" => RuleCheck::LessThan,
            "less_or_equal" | "lte" => RuleCheck::LessOrEqual,
            "equals" | "eq" => RuleCheck::Equals,
            "not_equals" | "ne" => RuleCheck::NotEquals,
            "min_length" => RuleCheck::MinLength,
            "max_length" => RuleCheck::MaxLength,
            "pattern" => RuleCheck::Pattern,
            "one_of" => RuleCheck::OneOf,
            _ => RuleCheck::Custom(value),
        }
    }
}

impl From<RuleCheck> for String {
    fn from(check: RuleCheck) -> Self {
        check.to_string()
    }
}

impl fmt::Display for RuleCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleCheck::Required => "required",
            RuleCheck::GreaterThan => "greater_than",
            RuleCheck::GreaterOrEqual => "greater_or_equal",
            RuleCheck::LessThan => "less_than",
            RuleCheck::LessOrEqual => "less_or_equal",
            RuleCheck::Equals => "equals",
            RuleCheck::NotEquals => "not_equals",
            RuleCheck::MinLength => "min_length",
            RuleCheck::MaxLength => "max_length",
            RuleCheck::Pattern => "pattern",
            RuleCheck::OneOf => "one_of",
            RuleCheck::Custom(name) => name.as_str(),
        };
        f.write_str(name)
    }
}

/// `{field, check, value, message}` as written in a mapping's
/// `validation_rules` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub field: String,
    pub check: RuleCheck,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub message: Option<String>,
}

impl ValidationRule {
    pub fn new(field: impl Into<String>, check: RuleCheck, value: Value) -> Self {
        Self {
            field: field.into(),
            check,
            value,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// A named check: `(field value, rule value) -> passed`.
pub type CustomCheck = Arc<dyn Fn(Option<&Value>, &Value) -> bool + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// A rule with its pattern compiled once.
#[derive(Debug, Clone)]
pub(crate) struct CompiledRule {
    pub(crate) rule: ValidationRule,
    pattern: Option<Regex>,
}

impl CompiledRule {
    pub(crate) fn compile(rule: ValidationRule) -> Result<Self, regex::Error> {
        let pattern = match (&rule.check, &rule.value) {
            (RuleCheck::Pattern, Value::String(p)) => Some(Regex::new(p)?),
            _ => None,
        };
        Ok(Self { rule, pattern })
    }

    /// `None` when the record passes.
    pub(crate) fn check(
        &self,
        record: &Record,
        custom: &HashMap<String, CustomCheck>,
    ) -> Option<ValidationError> {
        let rule = &self.rule;
        let actual = record.get(&rule.field).filter(|v| !v.is_null());
        let outcome: Result<(), String> = match &rule.check {
            RuleCheck::Required => match actual {
                Some(Value::String(s)) if s.trim().is_empty() => Err("is required".into()),
                Some(_) => Ok(()),
                None => Err("is required".into()),
            },
            // Absent values are only the `required` check's business.
            _ if actual.is_none() && !matches!(rule.check, RuleCheck::Custom(_)) => Ok(()),
            RuleCheck::GreaterThan => compare(actual, &rule.value, |o| o.is_gt(), "greater than"),
            RuleCheck::GreaterOrEqual => {
                compare(actual, &rule.value, |o| o.is_ge(), "greater than or equal to")
            }
            RuleCheck::LessThan => compare(actual, &rule.value, |o| o.is_lt(), "less than"),
            RuleCheck::LessOrEqual => {
                compare(actual, &rule.value, |o| o.is_le(), "less than or equal to")
            }
            RuleCheck::Equals => match actual == Some(&rule.value) {
                true => Ok(()),
                false => Err(format!("must equal {}", rule.value)),
            },
            RuleCheck::NotEquals => match actual != Some(&rule.value) {
                true => Ok(()),
                false => Err(format!("must not equal {}", rule.value)),
            },
            RuleCheck::MinLength => length_check(actual, &rule.value, |len, n| len >= n, "at least"),
            RuleCheck::MaxLength => length_check(actual, &rule.value, |len, n| len <= n, "at most"),
            RuleCheck::Pattern => match (actual, &self.pattern) {
                (Some(Value::String(s)), Some(re)) if re.is_match(s) => Ok(()),
                _ => Err(format!("does not match pattern {}", rule.value)),
            },
            RuleCheck::OneOf => {
                let allowed = rule.value.as_array().map(Vec::as_slice).unwrap_or(&[]);
                let hit = actual.is_some_and(|a| {
                    allowed
                        .iter()
                        .any(|v| v == a || (value_key(v).is_some() && value_key(v) == value_key(a)))
                });
                match hit {
                    true => Ok(()),
                    false => Err(format!("must be one of {}", rule.value)),
                }
            }
            RuleCheck::Custom(name) => match custom.get(name) {
                Some(check) if check(actual, &rule.value) => Ok(()),
                Some(_) => Err(format!("failed check '{name}'")),
                None => Err(format!("unknown check '{name}'")),
            },
        };

        outcome.err().map(|default| ValidationError {
            field: rule.field.clone(),
            message: rule.message.clone().unwrap_or(default),
        })
    }
}

fn compare(
    actual: Option<&Value>,
    expected: &Value,
    accept: impl Fn(Ordering) -> bool,
    label: &str,
) -> Result<(), String> {
    let ordering = match (actual, expected) {
        (Some(a), b) if a.is_number() && b.is_number() => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b)),
        // ISO dates and other lexically ordered strings.
        (Some(Value::String(a)), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        (Some(Value::String(a)), b) if b.is_number() => a
            .trim()
            .parse::<f64>()
            .ok()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b)),
        _ => None,
    };
    match ordering {
        Some(o) if accept(o) => Ok(()),
        Some(_) => Err(format!("must be {label} {expected}")),
        None => Err(format!("cannot be compared with {expected}")),
    }
}

fn length_check(
    actual: Option<&Value>,
    expected: &Value,
    accept: impl Fn(usize, usize) -> bool,
    label: &str,
) -> Result<(), String> {
    let len = match actual {
        Some(Value::String(s)) => s.chars().count(),
        Some(Value::Array(a)) => a.len(),
        _ => return Err("has no length".into()),
    };
    let Some(limit) = expected.as_u64().map(|n| n as usize) else {
        return Err(format!("invalid length limit {expected}"));
    };
    if accept(len, limit) {
        Ok(())
    } else {
        Err(format!("must have {label} {limit} characters"))
    }
}
