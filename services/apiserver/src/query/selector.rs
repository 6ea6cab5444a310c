//! Label and field selector parsing and in-process evaluation.
//!
//! A selector is a comma-separated conjunction of requirements:
//! `k=v`, `k==v`, `k!=v`, `k in (a,b)`, `k notin (a,b)`, `k` and `!k`.
//! Label selectors address keys of `metadata.labels`; field selectors
//! address dotted paths into the object (`metadata.name`, `status.phase`).
use crate::store::{StoreError, StoreResult};
use serde_json::{Map, Value};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    pub values: Vec<String>,
}

impl Requirement {
    /// Evaluate against the resolved value of `key` (`None` when absent).
    /// Absent keys satisfy the negative operators.
    pub fn matches(&self, value: Option<&str>) -> bool {
        match self.operator {
            Operator::Equals => value == self.values.first().map(String::as_str),
            Operator::NotEquals => value != self.values.first().map(String::as_str),
            Operator::In => value.is_some_and(|v| self.values.iter().any(|c| c == v)),
            Operator::NotIn => !value.is_some_and(|v| self.values.iter().any(|c| c == v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }

    /// The JSON path segments of a field requirement's key.
    pub fn field_path(&self) -> Vec<&str> {
        self.key.split('.').collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn everything() -> Self {
        Self::default()
    }

    /// # Errors
    /// - [`StoreError::Invalid`] for syntax errors, naming the offending term.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::everything());
        }
        let requirements = split_terms(raw)?
            .into_iter()
            .map(parse_term)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn matches_labels(&self, labels: Option<&Map<String, Value>>) -> bool {
        self.requirements.iter().all(|req| {
            let value = labels
                .and_then(|l| l.get(&req.key))
                .and_then(Value::as_str);
            req.matches(value)
        })
    }

    pub fn matches_fields(&self, object: &Value) -> bool {
        self.requirements.iter().all(|req| {
            let value = resolve_field(object, &req.field_path());
            req.matches(value.as_deref())
        })
    }
}

impl FromStr for Selector {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Resolve a dotted path to its scalar text. Objects, arrays and nulls do not
/// resolve.
pub fn resolve_field(object: &Value, path: &[&str]) -> Option<String> {
    let mut current = object;
    for segment in path {
        current = current.as_object()?.get(*segment)?;
    }
    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn split_terms(raw: &str) -> StoreResult<Vec<&str>> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in raw.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid(raw, "unbalanced parenthesis"))?;
            }
            ',' if depth == 0 => {
                terms.push(raw[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(invalid(raw, "unbalanced parenthesis"));
    }
    terms.push(raw[start..].trim());
    Ok(terms)
}

fn parse_term(term: &str) -> StoreResult<Requirement> {
    if term.is_empty() {
        return Err(invalid(term, "empty requirement"));
    }

    if let Some(rest) = term.strip_prefix('!') {
        let key = validate_key(rest.trim(), term)?;
        return Ok(Requirement {
            key,
            operator: Operator::DoesNotExist,
            values: Vec::new(),
        });
    }

    if let Some(open) = term.find('(') {
        let inner = term[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| invalid(term, "expected closing parenthesis"))?;
        let mut head = term[..open].split_whitespace();
        let (Some(key), Some(op), None) = (head.next(), head.next(), head.next()) else {
            return Err(invalid(term, "expected `key in (...)` or `key notin (...)`"));
        };
        let operator = match op {
            "in" => Operator::In,
            "notin" => Operator::NotIn,
            other => return Err(invalid(term, &format!("unknown operator {other:?}"))),
        };
        let values = inner
            .split(',')
            .map(|v| validate_value(v.trim(), term))
            .collect::<StoreResult<Vec<_>>>()?;
        if values.iter().all(String::is_empty) {
            return Err(invalid(term, "set requires at least one value"));
        }
        return Ok(Requirement {
            key: validate_key(key, term)?,
            operator,
            values,
        });
    }

    let (key, operator, value) = if let Some((k, v)) = term.split_once("!=") {
        (k, Operator::NotEquals, v)
    } else if let Some((k, v)) = term.split_once("==") {
        (k, Operator::Equals, v)
    } else if let Some((k, v)) = term.split_once('=') {
        (k, Operator::Equals, v)
    } else {
        return Ok(Requirement {
            key: validate_key(term, term)?,
            operator: Operator::Exists,
            values: Vec::new(),
        });
    };
    Ok(Requirement {
        key: validate_key(key.trim(), term)?,
        operator,
        values: vec![validate_value(value.trim(), term)?],
    })
}

fn validate_key(key: &str, term: &str) -> StoreResult<String> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    if ok {
        Ok(key.to_string())
    } else {
        Err(invalid(term, &format!("invalid key {key:?}")))
    }
}

fn validate_value(value: &str, term: &str) -> StoreResult<String> {
    if value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, ',' | '(' | ')' | '=' | '!'))
    {
        return Err(invalid(term, &format!("invalid value {value:?}")));
    }
    Ok(value.to_string())
}

fn invalid(term: &str, reason: &str) -> StoreError {
    StoreError::Invalid(format!("selector {term:?}: {reason}"))
}
