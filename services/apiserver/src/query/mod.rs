//! Query translation.
//!
//! # Purpose
//! Turns Kubernetes list options into a [`QuerySpec`] and decides which
//! version a list is served at. The memory backend evaluates a `QuerySpec`
//! in-process through [`QuerySpec::matches`] and [`paginate`]; the Postgres
//! backend renders it to SQL through [`sql`].
//!
//! # Resource version rules
//! - No version (or `"0"`) reads the latest state.
//! - `NotOlderThan V`, or a bare `V`, reads the latest state; `V` newer than
//!   anything issued is a `Conflict`.
//! - `Exact V` reads the state as of `V`; `V` not yet issued or already
//!   compacted is a `Conflict`.
//! - Later pages are read as of the version pinned in the continue token;
//!   once that version is compacted the token is `Expired`.
pub mod continue_token;
pub mod order;
pub mod selector;
pub mod sql;

pub use continue_token::ContinueToken;
pub use order::{OrderBy, SortField, SortOrder, SortValue};
pub use selector::{Operator, Requirement, Selector};

use crate::model::ResourceRecord;
use crate::store::{ListPage, StoreError, StoreResult};
use crate::version::ResourceVersion;
use serde::Deserialize;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResourceVersionMatch {
    #[default]
    Unset,
    Exact,
    NotOlderThan,
}

impl ResourceVersionMatch {
    pub fn parse(raw: &str) -> StoreResult<Self> {
        match raw {
            "" => Ok(ResourceVersionMatch::Unset),
            "Exact" => Ok(ResourceVersionMatch::Exact),
            "NotOlderThan" => Ok(ResourceVersionMatch::NotOlderThan),
            other => Err(StoreError::Invalid(format!(
                "unsupported resourceVersionMatch {other:?}"
            ))),
        }
    }
}

/// Kubernetes list/watch query parameters as they arrive on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOptions {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub limit: Option<u64>,
    #[serde(rename = "continue")]
    pub continue_token: Option<String>,
    pub resource_version: Option<String>,
    pub resource_version_match: Option<String>,
    pub order_by: Option<String>,
    #[serde(default)]
    pub watch: bool,
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub allow_watch_bookmarks: bool,
}

/// Largest page size a backend can bind (Postgres `BIGINT`).
pub const MAX_LIMIT: u64 = i64::MAX as u64;

/// Which state a list reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAt {
    Latest,
    AsOf(ResourceVersion),
}

/// A validated, immutable list query.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    /// `None` lists across all namespaces.
    pub namespace: Option<String>,
    pub label_selector: Selector,
    pub field_selector: Selector,
    /// `None` returns everything in one page.
    pub limit: Option<u64>,
    pub continue_token: Option<ContinueToken>,
    pub resource_version: Option<ResourceVersion>,
    pub resource_version_match: ResourceVersionMatch,
    pub order: SortOrder,
}

impl QuerySpec {
    /// # Errors
    /// - [`StoreError::Invalid`] for malformed selectors, orders or tokens, and
    ///   for combinations Kubernetes rejects.
    pub fn from_options(namespace: Option<String>, opts: &ListOptions) -> StoreResult<Self> {
        let order = SortOrder::parse(opts.order_by.as_deref().unwrap_or_default())?;
        let resource_version = match opts.resource_version.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(ResourceVersion::parse(raw)?),
        };
        let resource_version_match =
            ResourceVersionMatch::parse(opts.resource_version_match.as_deref().unwrap_or_default())?;
        let continue_token = match opts.continue_token.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(ContinueToken::decode(raw, &order)?),
        };

        if continue_token.is_some()
            && (resource_version.is_some()
                || resource_version_match != ResourceVersionMatch::Unset)
        {
            return Err(StoreError::Invalid(
                "continue may not be combined with resourceVersion or resourceVersionMatch"
                    .to_string(),
            ));
        }
        match (resource_version_match, resource_version) {
            (ResourceVersionMatch::Unset, _) => {}
            (_, None) => {
                return Err(StoreError::Invalid(
                    "resourceVersionMatch requires resourceVersion".to_string(),
                ));
            }
            (ResourceVersionMatch::Exact, Some(rv)) if rv.is_zero() => {
                return Err(StoreError::Invalid(
                    "resourceVersionMatch=Exact is forbidden for resourceVersion \"0\"".to_string(),
                ));
            }
            _ => {}
        }

        if let Some(limit) = opts.limit
            && limit > MAX_LIMIT
        {
            return Err(StoreError::Invalid(format!(
                "limit {limit} exceeds the maximum of {MAX_LIMIT}"
            )));
        }

        Ok(Self {
            namespace: namespace.filter(|ns| !ns.is_empty()),
            label_selector: Selector::parse(opts.label_selector.as_deref().unwrap_or_default())?,
            field_selector: Selector::parse(opts.field_selector.as_deref().unwrap_or_default())?,
            limit: opts.limit.filter(|l| *l > 0),
            continue_token,
            resource_version,
            resource_version_match,
            order,
        })
    }

    /// Namespace, label and field predicates. Cluster scoping is the caller's.
    pub fn matches(&self, record: &ResourceRecord) -> bool {
        if let Some(ns) = &self.namespace
            && &record.key.namespace != ns
        {
            return false;
        }
        self.label_selector.matches_labels(record.labels())
            && self.field_selector.matches_fields(&record.object)
    }

    /// Decide which state to read given the newest issued version and the
    /// compaction floor of the GVK's change log.
    pub fn resolve_read(
        &self,
        newest: ResourceVersion,
        compacted_through: ResourceVersion,
    ) -> StoreResult<ReadAt> {
        if let Some(token) = &self.continue_token {
            let rv = token.resource_version;
            if rv < compacted_through {
                return Err(StoreError::Expired(format!(
                    "continue token at resourceVersion {rv} is older than retained history"
                )));
            }
            return Ok(if rv >= newest {
                ReadAt::Latest
            } else {
                ReadAt::AsOf(rv)
            });
        }

        let Some(rv) = self.resource_version.filter(|rv| !rv.is_zero()) else {
            return Ok(ReadAt::Latest);
        };
        if rv > newest {
            return Err(StoreError::Conflict(format!(
                "resourceVersion {rv} is newer than the latest issued version {newest}"
            )));
        }
        match self.resource_version_match {
            ResourceVersionMatch::Exact if rv < compacted_through => {
                Err(StoreError::Conflict(format!(
                    "resourceVersion {rv} has been compacted"
                )))
            }
            ResourceVersionMatch::Exact if rv < newest => Ok(ReadAt::AsOf(rv)),
            _ => Ok(ReadAt::Latest),
        }
    }
}

/// Sort, resume after the continue token, and cut one page out of records
/// that already passed [`QuerySpec::matches`].
pub fn paginate(
    records: Vec<ResourceRecord>,
    query: &QuerySpec,
    resource_version: ResourceVersion,
) -> StoreResult<ListPage> {
    let order = &query.order;
    let mut keyed: Vec<(Vec<SortValue>, ResourceRecord)> = records
        .into_iter()
        .map(|r| (order.sort_key(&r), r))
        .collect();
    keyed.sort_by(|a, b| order.compare(&a.0, &b.0));
    if let Some(token) = &query.continue_token {
        keyed.retain(|(key, _)| order.compare(key, &token.last_key) == Ordering::Greater);
    }

    let total = keyed.len() as u64;
    let take = query.limit.unwrap_or(total).min(total);
    keyed.truncate(take as usize);
    let remaining = total - take;
    let continue_token = match keyed.last() {
        Some((last_key, _)) if remaining > 0 => Some(
            ContinueToken {
                resource_version,
                last_key: last_key.clone(),
                order: order.fingerprint(),
            }
            .encode()?,
        ),
        _ => None,
    };
    Ok(ListPage {
        items: keyed.into_iter().map(|(_, r)| r).collect(),
        continue_token,
        resource_version,
        remaining_item_count: (remaining > 0).then_some(remaining),
    })
}

impl ReadAt {
    /// The version a list served at this point reports.
    pub fn list_version(self, newest: ResourceVersion) -> ResourceVersion {
        match self {
            ReadAt::Latest => newest,
            ReadAt::AsOf(rv) => rv,
        }
    }
}
