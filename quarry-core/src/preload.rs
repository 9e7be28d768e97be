//! Batched, recursive eager loading of declared relations.
//!
//! Every relation named by a preload path is resolved with one query per batch of
//! parent rows (two for many-to-many), never per row. Nested paths recurse through a
//! builder scoped to the related model, sharing one [`PreloadState`] so that a
//! `(model, relation)` pair is queried at most once per top-level `get`.

use std::collections::{HashMap, HashSet};

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::QuarryResult;
use crate::executor::Execute;
use crate::query::{Operator, QueryBuilder, record_query_metrics};
use crate::row::{Row, lookup_key, normalize_booleans, remove_excluded_from_row};
use crate::schema::{ModelSchema, Ownership, RelationDescriptor, RelationKind};

/// Related rows of one relation, grouped by the parent-side lookup key.
type Groups = HashMap<String, Vec<Row>>;

/// The rows one visit fetched, and the parent keys it asked for.
#[derive(Debug, Default)]
struct Visit {
    queried: HashSet<String>,
    groups: Groups,
}

/// Per-call preload state: the visited set, with the rows fetched on each visit.
#[derive(Debug, Default)]
pub struct PreloadState {
    resolved: HashMap<String, Visit>,
}

impl PreloadState {
    /// Returns true if `"<model>:<field>"` was already resolved in this call chain.
    pub fn is_visited(&self, key: &str) -> bool {
        self.resolved.contains_key(key)
    }

    /// Iterates over the visited `"<model>:<field>"` keys.
    pub fn visited(&self) -> impl Iterator<Item = &str> {
        self.resolved.keys().map(String::as_str)
    }
}

/// Splits preload paths into roots (first-seen order) and their nested remainders.
pub fn group_paths(paths: &[String]) -> IndexMap<String, Vec<String>> {
    let mut roots: IndexMap<String, Vec<String>> = IndexMap::new();
    for path in paths {
        let (root, rest) = match path.split_once('.') {
            Some((root, rest)) => (root, Some(rest)),
            None => (path.as_str(), None),
        };
        if root.is_empty() {
            continue;
        }
        let nested = roots.entry(root.to_owned()).or_default();
        if let Some(rest) = rest.filter(|r| !r.is_empty()) {
            if !nested.iter().any(|n| n == rest) {
                nested.push(rest.to_owned());
            }
        }
    }
    roots
}

/// Returns the exclude paths under `root`, with the `root.` prefix stripped.
pub fn scoped_paths(paths: &[String], root: &str) -> Vec<String> {
    paths
        .iter()
        .filter_map(|path| path.strip_prefix(root)?.strip_prefix('.'))
        .filter(|rest| !rest.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Distinct non-null values of `column` across `rows`, in first-seen order.
fn collect_keys<'r>(rows: impl IntoIterator<Item = &'r Row>, column: &str) -> Vec<Value> {
    let mut keys: IndexMap<String, Value> = IndexMap::new();
    for row in rows {
        if let Some(value) = row.get(column) {
            if let Some(key) = lookup_key(value) {
                keys.entry(key).or_insert_with(|| value.clone());
            }
        }
    }
    keys.into_values().collect()
}

/// How the related rows of one relation are matched to parents.
struct Plan<'r> {
    relation: &'r RelationDescriptor,
    target: &'r ModelSchema,
    /// Column read on parent rows to find their group.
    parent_column: String,
    /// Column on the target rows matched against the batch keys.
    target_column: String,
}

impl<'r> Plan<'r> {
    fn new(parent: &'r ModelSchema, relation: &'r RelationDescriptor, target: &'r ModelSchema) -> Self {
        let fk = relation.foreign_key().to_owned();
        let parent_pk = parent.primary_key().to_owned();
        let target_pk = target.primary_key().to_owned();
        let (parent_column, target_column) = match relation.kind {
            RelationKind::OneToMany => (parent_pk, fk),
            RelationKind::ManyToMany => (parent_pk, target_pk),
            RelationKind::ManyToOne | RelationKind::OneToOne => {
                match parent.ownership(relation, target) {
                    Ownership::Parent => (fk, target_pk),
                    Ownership::Child => (parent_pk, fk),
                }
            }
        };
        Self {
            relation,
            target,
            parent_column,
            target_column,
        }
    }
}

fn group_rows(keys: &[Option<String>], rows: Vec<Row>, pairs: Option<&[(String, String)]>) -> Groups {
    let mut groups = Groups::new();
    match pairs {
        None => {
            for (key, row) in keys.iter().zip(rows) {
                if let Some(key) = key {
                    groups.entry(key.clone()).or_default().push(row);
                }
            }
        }
        Some(pairs) => {
            let mut by_key: HashMap<&str, &Row> = HashMap::new();
            for (key, row) in keys.iter().zip(&rows) {
                if let Some(key) = key {
                    by_key.entry(key.as_str()).or_insert(row);
                }
            }
            let mut seen: HashSet<(&str, &str)> = HashSet::new();
            for (parent, related) in pairs {
                if !seen.insert((parent.as_str(), related.as_str())) {
                    continue;
                }
                if let Some(row) = by_key.get(related.as_str()) {
                    groups.entry(parent.clone()).or_default().push((*row).clone());
                }
            }
        }
    }
    groups
}

/// Attaches each parent's group under `field`.
///
/// With `queried` set, parents whose key is outside it are left untouched: the
/// visit that filled `groups` never asked for them.
fn assign(
    rows: &mut [Row],
    field: &str,
    kind: RelationKind,
    parent_column: &str,
    groups: &Groups,
    queried: Option<&HashSet<String>>,
) {
    for row in rows {
        let key = row.get(parent_column).and_then(lookup_key);
        if let (Some(queried), Some(key)) = (queried, key.as_ref()) {
            if !queried.contains(key) {
                continue;
            }
        }
        let related = key.and_then(|key| groups.get(&key));
        let value = match related {
            Some(list) if kind.is_many() => {
                Value::Array(list.iter().cloned().map(Value::Object).collect())
            }
            Some(list) => list.first().cloned().map_or(Value::Null, Value::Object),
            None => kind.empty_value(),
        };
        row.insert(field.to_owned(), value);
    }
}

impl<'a, E: Execute> QueryBuilder<'a, E> {
    /// Resolves this builder's preload paths onto `rows` in place.
    pub(crate) fn apply_preloads<'s>(
        &'s self,
        rows: &'s mut [Row],
        state: &'s mut PreloadState,
    ) -> BoxFuture<'s, QuarryResult<()>> {
        Box::pin(async move {
            for (root, nested) in group_paths(&self.intent.preloads) {
                let Some(relation) = self.model.relation_named(&root) else {
                    tracing::debug!(model = %self.model_name, relation = %root, "quarry preload: undeclared relation skipped");
                    continue;
                };
                let Some(target) = self.schema.get(&relation.target_model) else {
                    tracing::debug!(
                        model = %self.model_name,
                        relation = %root,
                        target = %relation.target_model,
                        "quarry preload: target model missing, skipped"
                    );
                    continue;
                };
                let plan = Plan::new(self.model, relation, target);
                let visit_key = relation.visit_key();

                if let Some(visit) = state.resolved.get(&visit_key) {
                    tracing::debug!(relation = %visit_key, "quarry preload: revisit served from cache");
                    assign(
                        rows,
                        &root,
                        relation.kind,
                        &plan.parent_column,
                        &visit.groups,
                        Some(&visit.queried),
                    );
                    continue;
                }
                let excludes = scoped_paths(&self.intent.excludes, &root);
                let groups = self.resolve(&plan, rows, nested, excludes, state).await?;
                assign(rows, &root, relation.kind, &plan.parent_column, &groups, None);
            }
            Ok(())
        })
    }

    async fn resolve(
        &self,
        plan: &Plan<'_>,
        rows: &[Row],
        nested: Vec<String>,
        excludes: Vec<String>,
        state: &mut PreloadState,
    ) -> QuarryResult<Groups> {
        let relation = plan.relation;
        let visit_key = relation.visit_key();
        let keys = collect_keys(rows, &plan.parent_column);
        let queried: HashSet<String> = keys.iter().filter_map(lookup_key).collect();
        if keys.is_empty() {
            state.resolved.insert(visit_key, Visit::default());
            return Ok(Groups::new());
        }

        let (match_keys, pairs) = if relation.kind == RelationKind::ManyToMany {
            let pairs = self.junction_pairs(relation, keys).await?;
            let mut related: IndexMap<String, Value> = IndexMap::new();
            for (_, key, value) in &pairs {
                related.entry(key.clone()).or_insert_with(|| value.clone());
            }
            let pairs: Vec<(String, String)> = pairs.into_iter().map(|(p, r, _)| (p, r)).collect();
            (related.into_values().collect(), Some(pairs))
        } else {
            (keys, None)
        };
        if match_keys.is_empty() {
            state.resolved.insert(
                visit_key,
                Visit {
                    queried,
                    groups: Groups::new(),
                },
            );
            return Ok(Groups::new());
        }

        let builder = QueryBuilder::scoped(
            self.executor,
            self.schema,
            relation.target_model.clone(),
            plan.target,
        )
        .r#where(plan.target_column.clone(), Operator::In, Value::Array(match_keys))
        .exclude(excludes.iter().cloned())
        .with_preloads(nested);

        let mut related = builder.fetch_base().await?;
        for row in &mut related {
            normalize_booleans(plan.target, row);
        }
        let row_keys: Vec<Option<String>> = related
            .iter()
            .map(|row| row.get(&plan.target_column).and_then(lookup_key))
            .collect();

        let snapshot = related
            .iter()
            .cloned()
            .map(|mut row| {
                remove_excluded_from_row(&mut row, &excludes);
                row
            })
            .collect();
        state.resolved.insert(
            visit_key,
            Visit {
                queried,
                groups: group_rows(&row_keys, snapshot, pairs.as_deref()),
            },
        );

        if !builder.intent.preloads.is_empty() && !related.is_empty() {
            builder.apply_preloads(&mut related, state).await?;
        }
        for row in &mut related {
            remove_excluded_from_row(row, &excludes);
        }
        Ok(group_rows(&row_keys, related, pairs.as_deref()))
    }

    /// Reads `(parent key, related key, related value)` triples from the junction table.
    async fn junction_pairs(
        &self,
        relation: &RelationDescriptor,
        keys: Vec<Value>,
    ) -> QuarryResult<Vec<(String, String, Value)>> {
        let dialect = self.executor.dialect();
        let through = relation.through.as_deref().unwrap_or_default();
        let fk = relation.foreign_key();
        let rk = relation.related_key.as_deref().unwrap_or_default();
        let placeholders = (0..keys.len())
            .map(|i| dialect.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {fk_q}, {rk_q} FROM {table} WHERE {fk_q} IN ({placeholders})",
            fk_q = dialect.quote_identifier(fk),
            rk_q = dialect.quote_identifier(rk),
            table = dialect.quote_identifier(through),
        );
        tracing::debug!(operation = "select", sql = %sql, params = keys.len(), "quarry query");
        let start = std::time::Instant::now();
        let out = self.executor.execute(&sql, &keys).await?;
        record_query_metrics("select", through, start.elapsed());

        Ok(out
            .rows
            .into_iter()
            .filter_map(|row| {
                let parent = row.get(fk).and_then(lookup_key)?;
                let value = row.get(rk)?.clone();
                let related = lookup_key(&value)?;
                Some((parent, related, value))
            })
            .collect())
    }
}
