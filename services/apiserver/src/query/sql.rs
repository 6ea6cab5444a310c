//! Rendering of a [`QuerySpec`] to parameterised Postgres SQL.
//!
//! Every user-supplied value is bound; only column names from a fixed
//! allowlist are spliced into the statement text.
use super::{Operator, QuerySpec, ReadAt, Requirement, SortField, SortOrder, SortValue};
use crate::model::KindSelector;
use sqlx::{Postgres, QueryBuilder};

/// Columns every list query projects, in `ListRow` order.
const LIST_COLUMNS: &str =
    "r.cluster, r.namespace, r.name, r.resource_version, r.object, r.synced_at, COUNT(*) OVER () AS total";

fn column(field: SortField) -> &'static str {
    match field {
        SortField::Cluster => "r.cluster",
        SortField::Namespace => "r.namespace",
        SortField::Name => "r.name",
        SortField::ResourceVersion => "r.resource_version",
    }
}

/// Build the full list statement for `kind` at `read_at`.
///
/// Rows are `(cluster, namespace, name, resource_version, object, synced_at,
/// total)` where `total` counts matching rows past the continue position.
pub fn list_query(
    kind: &KindSelector,
    query: &QuerySpec,
    read_at: ReadAt,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("");
    match read_at {
        ReadAt::Latest => {
            qb.push("SELECT ");
            qb.push(LIST_COLUMNS);
            qb.push(" FROM resources r WHERE ");
            push_kind(&mut qb, kind, "r");
        }
        ReadAt::AsOf(rv) => {
            // The earliest change after `rv` to each key carries its state at `rv`.
            qb.push(
                "WITH touched AS (SELECT DISTINCT ON (c.cluster, c.namespace, c.name) \
                 c.cluster, c.namespace, c.name, c.prev_object, c.prev_resource_version, c.prev_synced_at \
                 FROM resource_changes c WHERE ",
            );
            push_kind(&mut qb, kind, "c");
            qb.push(" AND c.resource_version > ");
            qb.push_bind(rv.as_raw() as i64);
            qb.push(
                " ORDER BY c.cluster, c.namespace, c.name, c.resource_version ASC), \
                 snapshot AS (SELECT s.cluster, s.namespace, s.name, s.resource_version, s.object, s.synced_at \
                 FROM resources s WHERE ",
            );
            push_kind(&mut qb, kind, "s");
            qb.push(
                " AND NOT EXISTS (SELECT 1 FROM touched t \
                 WHERE t.cluster = s.cluster AND t.namespace = s.namespace AND t.name = s.name) \
                 UNION ALL SELECT t.cluster, t.namespace, t.name, t.prev_resource_version, t.prev_object, t.prev_synced_at \
                 FROM touched t WHERE t.prev_object IS NOT NULL) SELECT ",
            );
            qb.push(LIST_COLUMNS);
            qb.push(" FROM snapshot r WHERE TRUE");
        }
    }

    if let Some(ns) = &query.namespace {
        qb.push(" AND r.namespace = ");
        qb.push_bind(ns.clone());
    }
    for req in query.label_selector.requirements() {
        let path = vec![
            "metadata".to_string(),
            "labels".to_string(),
            req.key.clone(),
        ];
        push_requirement(&mut qb, req, path);
    }
    for req in query.field_selector.requirements() {
        let path = req.field_path().into_iter().map(str::to_string).collect();
        push_requirement(&mut qb, req, path);
    }
    if let Some(token) = &query.continue_token {
        push_keyset(&mut qb, &query.order, &token.last_key);
    }
    push_order(&mut qb, &query.order);
    if let Some(limit) = query.limit {
        qb.push(" LIMIT ");
        qb.push_bind(limit as i64);
    }
    qb
}

fn push_kind(qb: &mut QueryBuilder<'static, Postgres>, kind: &KindSelector, alias: &str) {
    qb.push(format!("{alias}.api_group = "));
    qb.push_bind(kind.gvk.group.clone());
    qb.push(format!(" AND {alias}.api_version = "));
    qb.push_bind(kind.gvk.version.clone());
    qb.push(format!(" AND {alias}.kind = "));
    qb.push_bind(kind.gvk.kind.clone());
    qb.push(format!(" AND {alias}.cluster = "));
    qb.push_bind(kind.cluster.clone());
}

fn push_path(qb: &mut QueryBuilder<'static, Postgres>, path: &[String]) {
    qb.push("(r.object #>> ");
    qb.push_bind(path.to_vec());
    qb.push("::text[])");
}

fn push_requirement(qb: &mut QueryBuilder<'static, Postgres>, req: &Requirement, path: Vec<String>) {
    qb.push(" AND ");
    match req.operator {
        Operator::Equals => {
            push_path(qb, &path);
            qb.push(" = ");
            qb.push_bind(req.values.first().cloned().unwrap_or_default());
        }
        Operator::NotEquals => {
            push_path(qb, &path);
            qb.push(" IS DISTINCT FROM ");
            qb.push_bind(req.values.first().cloned().unwrap_or_default());
        }
        Operator::In => {
            push_path(qb, &path);
            qb.push(" = ANY(");
            qb.push_bind(req.values.clone());
            qb.push(")");
        }
        Operator::NotIn => {
            qb.push("(");
            push_path(qb, &path);
            qb.push(" IS NULL OR NOT (");
            push_path(qb, &path);
            qb.push(" = ANY(");
            qb.push_bind(req.values.clone());
            qb.push(")))");
        }
        Operator::Exists => {
            push_path(qb, &path);
            qb.push(" IS NOT NULL");
        }
        Operator::DoesNotExist => {
            push_path(qb, &path);
            qb.push(" IS NULL");
        }
    }
}

/// Rows strictly after `last` under `order`, as an OR-expansion of the
/// lexicographic comparison so mixed directions are honoured.
fn push_keyset(qb: &mut QueryBuilder<'static, Postgres>, order: &SortOrder, last: &[SortValue]) {
    let keys = order.keys();
    if last.len() != keys.len() {
        return;
    }
    qb.push(" AND (");
    for i in 0..keys.len() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push("(");
        for (key, value) in keys[..i].iter().zip(last) {
            qb.push(column(key.field));
            qb.push(" = ");
            push_sort_value(qb, value);
            qb.push(" AND ");
        }
        qb.push(column(keys[i].field));
        qb.push(if keys[i].descending { " < " } else { " > " });
        push_sort_value(qb, &last[i]);
        qb.push(")");
    }
    qb.push(")");
}

fn push_sort_value(qb: &mut QueryBuilder<'static, Postgres>, value: &SortValue) {
    match value {
        SortValue::Text(text) => qb.push_bind(text.clone()),
        SortValue::Version(rv) => qb.push_bind(*rv as i64),
    };
}

fn push_order(qb: &mut QueryBuilder<'static, Postgres>, order: &SortOrder) {
    qb.push(" ORDER BY ");
    let mut separated = qb.separated(", ");
    for key in order.keys() {
        separated.push(format!(
            "{} {}",
            column(key.field),
            if key.descending { "DESC" } else { "ASC" }
        ));
    }
}
