// vigil-core/src/domain/evaluation/predicate.rs

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::error::DomainError;
use crate::ports::Record;

const EMAIL_REGEX: &str = r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$";

/// The check a rule applies. Record-level checks produce one verdict per row;
/// `unique` needs the whole batch.
///
/// NULL (or a missing column) only fails `not_null`; every other check lets it
/// through, the same way SQL constraints do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RulePredicate {
    NotNull {
        column: String,
    },
    Email {
        column: String,
    },
    Pattern {
        column: String,
        regex: String,
    },
    Range {
        column: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    AcceptedValues {
        column: String,
        values: Vec<String>,
    },
    MaxLength {
        column: String,
        max: usize,
    },
    Unique {
        column: String,
    },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PredicateError {
    #[error("column '{column}' holds {found} where {expected} was expected")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassCounts {
    pub passed: u64,
    pub failed: u64,
}

impl PassCounts {
    pub fn evaluated(&self) -> u64 {
        self.passed + self.failed
    }

    /// Zero evaluated records count as a full pass.
    pub fn ratio(&self) -> f64 {
        match self.evaluated() {
            0 => 1.0,
            n => self.passed as f64 / n as f64,
        }
    }
}

impl RulePredicate {
    pub fn column(&self) -> &str {
        match self {
            RulePredicate::NotNull { column }
            | RulePredicate::Email { column }
            | RulePredicate::Pattern { column, .. }
            | RulePredicate::Range { column, .. }
            | RulePredicate::AcceptedValues { column, .. }
            | RulePredicate::MaxLength { column, .. }
            | RulePredicate::Unique { column } => column,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            RulePredicate::NotNull { .. } => "not_null",
            RulePredicate::Email { .. } => "email",
            RulePredicate::Pattern { .. } => "pattern",
            RulePredicate::Range { .. } => "range",
            RulePredicate::AcceptedValues { .. } => "accepted_values",
            RulePredicate::MaxLength { .. } => "max_length",
            RulePredicate::Unique { .. } => "unique",
        }
    }

    pub fn compile(&self) -> Result<CompiledPredicate, DomainError> {
        if self.column().trim().is_empty() {
            return Err(DomainError::InvalidDefinition(format!(
                "{} check needs a column",
                self.kind_name()
            )));
        }
        let regex = match self {
            RulePredicate::Email { .. } => Some(compile_regex(EMAIL_REGEX)?),
            RulePredicate::Pattern { regex, .. } => Some(compile_regex(regex)?),
            RulePredicate::Range { min, max, .. } => {
                if let (Some(lo), Some(hi)) = (min, max)
                    && lo > hi
                {
                    return Err(DomainError::InvalidDefinition(format!(
                        "range min {} is greater than max {}",
                        lo, hi
                    )));
                }
                if min.is_none() && max.is_none() {
                    return Err(DomainError::InvalidDefinition(
                        "range check needs at least one bound".into(),
                    ));
                }
                None
            }
            RulePredicate::AcceptedValues { values, .. } if values.is_empty() => {
                return Err(DomainError::InvalidDefinition(
                    "accepted_values check needs at least one value".into(),
                ));
            }
            _ => None,
        };
        Ok(CompiledPredicate {
            predicate: self.clone(),
            regex,
        })
    }
}

fn compile_regex(pattern: &str) -> Result<Regex, DomainError> {
    Regex::new(pattern)
        .map_err(|e| DomainError::InvalidDefinition(format!("bad regex '{}': {}", pattern, e)))
}

/// A predicate ready to run: regexes are built once per evaluation, not per row.
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    predicate: RulePredicate,
    regex: Option<Regex>,
}

impl CompiledPredicate {
    pub fn predicate(&self) -> &RulePredicate {
        &self.predicate
    }

    /// Verdict for a single record. `unique` cannot fail on one row alone.
    pub fn check_record(&self, record: &Record) -> Result<bool, PredicateError> {
        let column = self.predicate.column();
        let value = match record.get(column) {
            None | Some(Value::Null) => {
                return Ok(!matches!(self.predicate, RulePredicate::NotNull { .. }));
            }
            Some(v) => v,
        };

        match &self.predicate {
            RulePredicate::NotNull { .. } | RulePredicate::Unique { .. } => Ok(true),
            RulePredicate::Email { .. } | RulePredicate::Pattern { .. } => {
                let text = as_text(column, value)?;
                Ok(self.regex.as_ref().is_some_and(|re| re.is_match(&text)))
            }
            RulePredicate::Range { min, max, .. } => {
                let n = as_number(column, value)?;
                Ok(min.is_none_or(|lo| n >= lo) && max.is_none_or(|hi| n <= hi))
            }
            RulePredicate::AcceptedValues { values, .. } => {
                let text = as_text(column, value)?;
                Ok(values.iter().any(|v| *v == text))
            }
            RulePredicate::MaxLength { max, .. } => {
                let text = as_text(column, value)?;
                Ok(text.chars().count() <= *max)
            }
        }
    }

    /// Run the check over a whole batch and count verdicts.
    /// The first malformed value aborts the rule: the caller records it as a rule-level failure.
    pub fn check_batch(&self, records: &[Record]) -> Result<PassCounts, PredicateError> {
        let mut counts = PassCounts::default();

        if let RulePredicate::Unique { column } = &self.predicate {
            let mut seen: HashMap<String, u64> = HashMap::new();
            let mut keys = Vec::with_capacity(records.len());
            for record in records {
                let key = match record.get(column) {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(as_text(column, v)?),
                };
                if let Some(k) = &key {
                    *seen.entry(k.clone()).or_insert(0) += 1;
                }
                keys.push(key);
            }
            for key in keys {
                match key {
                    Some(k) if seen.get(&k).copied().unwrap_or(0) > 1 => counts.failed += 1,
                    _ => counts.passed += 1,
                }
            }
            return Ok(counts);
        }

        for record in records {
            if self.check_record(record)? {
                counts.passed += 1;
            } else {
                counts.failed += 1;
            }
        }
        Ok(counts)
    }
}

fn as_text(column: &str, value: &Value) -> Result<String, PredicateError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(PredicateError::TypeMismatch {
            column: column.to_string(),
            expected: "a scalar",
            found: type_name(other).to_string(),
        }),
    }
}

fn as_number(column: &str, value: &Value) -> Result<f64, PredicateError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| PredicateError::TypeMismatch {
        column: column.to_string(),
        expected: "a number",
        found: match value {
            Value::String(s) => format!("'{}'", s),
            other => type_name(other).to_string(),
        },
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        let mut r = Record::new();
        r.insert("col".into(), value);
        r
    }

    fn email() -> CompiledPredicate {
        RulePredicate::Email {
            column: "col".into(),
        }
        .compile()
        .unwrap()
    }

    #[test]
    fn test_email_accepts_and_rejects() {
        let p = email();
        assert!(p.check_record(&rec(json!("user@example.com"))).unwrap());
        assert!(!p.check_record(&rec(json!("not-an-email"))).unwrap());
    }

    #[test]
    fn test_null_only_fails_not_null() {
        let not_null = RulePredicate::NotNull {
            column: "col".into(),
        }
        .compile()
        .unwrap();
        assert!(!not_null.check_record(&rec(Value::Null)).unwrap());
        assert!(!not_null.check_record(&Record::new()).unwrap());
        assert!(email().check_record(&rec(Value::Null)).unwrap());
    }

    #[test]
    fn test_range_parses_numeric_strings() {
        let p = RulePredicate::Range {
            column: "col".into(),
            min: Some(0.0),
            max: Some(10.0),
        }
        .compile()
        .unwrap();
        assert!(p.check_record(&rec(json!("5"))).unwrap());
        assert!(!p.check_record(&rec(json!(11))).unwrap());
    }

    #[test]
    fn test_range_on_text_is_type_mismatch() {
        let p = RulePredicate::Range {
            column: "col".into(),
            min: Some(0.0),
            max: None,
        }
        .compile()
        .unwrap();
        let res = p.check_batch(&[rec(json!(1)), rec(json!("abc"))]);
        assert!(matches!(res, Err(PredicateError::TypeMismatch { .. })));
    }

    #[test]
    fn test_unique_flags_every_duplicate_row() {
        let p = RulePredicate::Unique {
            column: "col".into(),
        }
        .compile()
        .unwrap();
        let counts = p
            .check_batch(&[rec(json!(1)), rec(json!(1)), rec(json!(2)), rec(Value::Null)])
            .unwrap();
        assert_eq!(counts, PassCounts { passed: 2, failed: 2 });
    }

    #[test]
    fn test_invalid_definitions_rejected() {
        let bad_regex = RulePredicate::Pattern {
            column: "col".into(),
            regex: "([".into(),
        };
        assert!(matches!(
            bad_regex.compile(),
            Err(DomainError::InvalidDefinition(_))
        ));

        let inverted = RulePredicate::Range {
            column: "col".into(),
            min: Some(5.0),
            max: Some(1.0),
        };
        assert!(inverted.compile().is_err());

        let no_column = RulePredicate::NotNull { column: " ".into() };
        assert!(no_column.compile().is_err());
    }

    #[test]
    fn test_empty_batch_ratio_is_one() {
        assert_eq!(PassCounts::default().ratio(), 1.0);
    }
}
