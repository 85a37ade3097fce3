//! Predicate evaluation over a JSON context.
//!
//! A predicate is either a single comparison
//! `{ "field": "a.b", "op": "equals", "value": ... }` or a logical combination
//! `{ "all_of": [...] }` / `{ "any_of": [...] }`.
//!
//! Missing-field rule: a comparison whose field does not resolve is `false`,
//! except `not_equals`, which is `true` (absence counts as different).
//! `greater_than` / `less_than` coerce numeric strings; anything else that is
//! not a number is a [`ConditionError`], never a silent `false`.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConditionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Dotted path into the context.
    pub field: String,
    pub op: Operator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predicate {
    AllOf { all_of: Vec<Predicate> },
    AnyOf { any_of: Vec<Predicate> },
    Compare(Comparison),
}

impl Predicate {
    pub fn compare(field: impl Into<String>, op: Operator, value: Value) -> Self {
        Self::Compare(Comparison {
            field: field.into(),
            op,
            value,
        })
    }

    pub fn equals(field: impl Into<String>, value: Value) -> Self {
        Self::compare(field, Operator::Equals, value)
    }

    /// Every field path this predicate reads.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::AllOf { all_of: preds } | Self::AnyOf { any_of: preds } => {
                for p in preds {
                    p.collect_fields(out);
                }
            }
            Self::Compare(c) => out.push(c.field.as_str()),
        }
    }
}

/// Something a dotted field path can be looked up in.
pub trait FieldResolver {
    fn resolve(&self, path: &str) -> Option<Cow<'_, Value>>;
}

impl FieldResolver for Value {
    fn resolve(&self, path: &str) -> Option<Cow<'_, Value>> {
        lookup_path(self, path)
    }
}

/// Walk `path` (`a.b.0.c`) from `root`.
///
/// Numeric segments index arrays; a trailing `length` segment on an array
/// yields its length.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<Cow<'a, Value>> {
    let mut current = root;
    let mut segments = path.split('.').map(str::trim).peekable();

    while let Some(segment) = segments.next() {
        if segment.is_empty() {
            return None;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => match segment.parse::<usize>() {
                Ok(index) => items.get(index)?,
                Err(_) if segment == "length" && segments.peek().is_none() => {
                    return Some(Cow::Owned(Value::from(items.len())));
                }
                Err(_) => return None,
            },
            _ => return None,
        };
    }

    Some(Cow::Borrowed(current))
}

/// Evaluate `predicate` against `ctx`. Pure.
pub fn evaluate<R>(predicate: &Predicate, ctx: &R) -> Result<bool, ConditionError>
where
    R: FieldResolver + ?Sized,
{
    match predicate {
        Predicate::AllOf { all_of } => {
            for p in all_of {
                if !evaluate(p, ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Predicate::AnyOf { any_of } => {
            for p in any_of {
                if evaluate(p, ctx)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Predicate::Compare(c) => compare(c, ctx),
    }
}

fn compare<R>(c: &Comparison, ctx: &R) -> Result<bool, ConditionError>
where
    R: FieldResolver + ?Sized,
{
    let Some(actual) = ctx.resolve(&c.field) else {
        return Ok(c.op == Operator::NotEquals);
    };
    let actual = actual.as_ref();

    match c.op {
        Operator::Equals => Ok(loosely_equal(actual, &c.value)),
        Operator::NotEquals => Ok(!loosely_equal(actual, &c.value)),
        Operator::Contains => Ok(contains(actual, &c.value)),
        Operator::GreaterThan | Operator::LessThan => {
            let (Some(left), Some(right)) = (as_number(actual), as_number(&c.value)) else {
                return Err(ConditionError {
                    field: c.field.clone(),
                    op: c.op.as_str(),
                    left: display(actual),
                    right: display(&c.value),
                });
            };
            Ok(if c.op == Operator::GreaterThan {
                left > right
            } else {
                left < right
            })
        }
    }
}

/// Best-effort numeric coercion: numbers, and strings that parse as numbers.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// JSON equality, widened so `5`, `5.0` and `"5"` compare equal when one side is a number.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    if a.is_number() || b.is_number() {
        if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
            return x == y;
        }
    }
    false
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => match needle {
            Value::String(n) => s.contains(n.as_str()),
            Value::Number(_) | Value::Bool(_) => s.contains(&needle.to_string()),
            _ => false,
        },
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, needle)),
        _ => false,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
