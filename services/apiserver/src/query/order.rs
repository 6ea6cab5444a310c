//! Result ordering for lists.
use crate::model::ResourceRecord;
use crate::store::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortField {
    Cluster,
    Namespace,
    Name,
    ResourceVersion,
}

impl SortField {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "cluster" => Some(SortField::Cluster),
            "namespace" | "metadata.namespace" => Some(SortField::Namespace),
            "name" | "metadata.name" => Some(SortField::Name),
            "resourceVersion" | "metadata.resourceVersion" => Some(SortField::ResourceVersion),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortField::Cluster => "cluster",
            SortField::Namespace => "namespace",
            SortField::Name => "name",
            SortField::ResourceVersion => "resourceVersion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub field: SortField,
    pub descending: bool,
}

/// One component of a record's position in a sort order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortValue {
    Version(u64),
    Text(String),
}

impl PartialOrd for SortValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortValue::Version(a), SortValue::Version(b)) => a.cmp(b),
            (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
            (SortValue::Version(_), SortValue::Text(_)) => Ordering::Less,
            (SortValue::Text(_), SortValue::Version(_)) => Ordering::Greater,
        }
    }
}

/// A total order over records: the requested keys followed by whichever of
/// cluster, namespace and name were not requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOrder {
    keys: Vec<OrderBy>,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::from_keys(Vec::new())
    }
}

impl SortOrder {
    /// Parse `orderBy`, e.g. `"namespace desc,name"`.
    ///
    /// # Errors
    /// - [`StoreError::Invalid`] for unknown fields, directions or duplicates.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let mut keys: Vec<OrderBy> = Vec::new();
        for term in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let mut parts = term.split_whitespace();
            let name = parts.next().unwrap_or_default();
            let field = SortField::parse(name)
                .ok_or_else(|| StoreError::Invalid(format!("cannot order by {name:?}")))?;
            let descending = match parts.next() {
                None | Some("asc") => false,
                Some("desc") => true,
                Some(other) => {
                    return Err(StoreError::Invalid(format!(
                        "unknown sort direction {other:?}"
                    )));
                }
            };
            if parts.next().is_some() {
                return Err(StoreError::Invalid(format!("malformed orderBy term {term:?}")));
            }
            if keys.iter().any(|k| k.field == field) {
                return Err(StoreError::Invalid(format!(
                    "{} listed twice in orderBy",
                    field.as_str()
                )));
            }
            keys.push(OrderBy { field, descending });
        }
        Ok(Self::from_keys(keys))
    }

    fn from_keys(mut keys: Vec<OrderBy>) -> Self {
        for field in [SortField::Cluster, SortField::Namespace, SortField::Name] {
            if !keys.iter().any(|k| k.field == field) {
                keys.push(OrderBy {
                    field,
                    descending: false,
                });
            }
        }
        Self { keys }
    }

    pub fn keys(&self) -> &[OrderBy] {
        &self.keys
    }

    /// Stable description carried in continue tokens.
    pub fn fingerprint(&self) -> String {
        self.keys
            .iter()
            .map(|k| {
                format!(
                    "{}:{}",
                    k.field.as_str(),
                    if k.descending { "desc" } else { "asc" }
                )
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Whether `key` has one value of the right type per sort key.
    pub fn accepts_key(&self, key: &[SortValue]) -> bool {
        key.len() == self.keys.len()
            && self.keys.iter().zip(key).all(|(k, value)| match (k.field, value) {
                (SortField::ResourceVersion, SortValue::Version(v)) => *v <= i64::MAX as u64,
                (SortField::ResourceVersion, SortValue::Text(_)) => false,
                (_, SortValue::Text(_)) => true,
                (_, SortValue::Version(_)) => false,
            })
    }

    pub fn sort_key(&self, record: &ResourceRecord) -> Vec<SortValue> {
        self.keys
            .iter()
            .map(|k| match k.field {
                SortField::Cluster => SortValue::Text(record.key.cluster.clone()),
                SortField::Namespace => SortValue::Text(record.key.namespace.clone()),
                SortField::Name => SortValue::Text(record.key.name.clone()),
                SortField::ResourceVersion => {
                    SortValue::Version(record.resource_version.as_raw())
                }
            })
            .collect()
    }

    /// Compare two sort keys under this order's directions.
    pub fn compare(&self, a: &[SortValue], b: &[SortValue]) -> Ordering {
        for ((key, left), right) in self.keys.iter().zip(a).zip(b) {
            let ord = left.cmp(right);
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}
