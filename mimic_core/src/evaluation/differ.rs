//! Snapshot creation and set-algebra diffing of replica namespaces.
//!
//! A snapshot is one side-table per user table (`{t}_snapshot_{suffix}`),
//! created as a full copy inside a single transaction. Diffing two snapshots
//! is pure SQL over the side-tables keyed by each table's primary key; rows
//! come back as `row_to_json` so no table or column name is ever hard-coded.

use crate::store::reflect::{snapshot_table, SchemaReflector, SNAPSHOT_MARKER};
use crate::store::{qualified, validate_ident};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::collections::BTreeSet;

/// Label naming the origin table on every diff row.
pub const ENTITY_KEY: &str = "__entity__";

/// Row-level difference between two snapshots. Pure value; tree-shaped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub inserts: Vec<Value>,
    pub updates: Vec<RowUpdate>,
    pub deletes: Vec<Value>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// One row present in both snapshots whose non-ignored columns differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowUpdate {
    #[serde(rename = "__entity__")]
    pub entity: String,
    pub pk: Value,
    pub before: Value,
    pub after: Value,
    pub changed_fields: Vec<String>,
}

#[derive(Clone)]
pub struct Differ {
    pool: PgPool,
    reflector: SchemaReflector,
}

impl Differ {
    pub fn new(pool: PgPool, reflector: SchemaReflector) -> Self {
        Self { pool, reflector }
    }

    /// Snapshot every user table of `namespace` under `suffix`.
    ///
    /// All side-tables are created in one transaction: either the whole
    /// snapshot exists afterwards or none of it does. Reusing a suffix is a
    /// conflict.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn snapshot(&self, namespace: &str, suffix: &str) -> Result<()> {
        validate_ident(namespace)?;
        validate_suffix(suffix)?;

        let existing = self.reflector.snapshot_origins(namespace, suffix).await?;
        if !existing.is_empty() {
            return Err(Error::Conflict(format!(
                "snapshot suffix {suffix:?} already in use in {namespace}"
            )));
        }

        let tables = self.reflector.refresh(namespace).await?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::backend("begin snapshot", e))?;
        for t in tables.iter() {
            let stmt = format!(
                "CREATE TABLE {} AS SELECT * FROM {}",
                qualified(namespace, &snapshot_table(&t.name, suffix)),
                qualified(namespace, &t.name),
            );
            sqlx::query(&stmt)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::backend(format!("snapshot table {}", t.name), e))?;
        }
        tx.commit()
            .await
            .map_err(|e| Error::backend("commit snapshot", e))?;
        Ok(())
    }

    /// Whether any side-table exists for `suffix` in `namespace`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn snapshot_exists(&self, namespace: &str, suffix: &str) -> Result<bool> {
        Ok(!self
            .reflector
            .snapshot_origins(namespace, suffix)
            .await?
            .is_empty())
    }

    /// Drop every side-table carrying `suffix`.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn drop_snapshot(&self, namespace: &str, suffix: &str) -> Result<()> {
        validate_ident(namespace)?;
        validate_suffix(suffix)?;
        let origins = self.reflector.snapshot_origins(namespace, suffix).await?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::backend("begin drop snapshot", e))?;
        for t in &origins {
            let stmt = format!(
                "DROP TABLE IF EXISTS {}",
                qualified(namespace, &snapshot_table(t, suffix)),
            );
            sqlx::query(&stmt)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::backend(format!("drop snapshot table {t}"), e))?;
        }
        tx.commit()
            .await
            .map_err(|e| Error::backend("commit drop snapshot", e))?;
        Ok(())
    }

    /// Inserts/updates/deletes from snapshot `before` to snapshot `after`.
    ///
    /// The table set is the union of tables present on either side: a table
    /// dropped between snapshots reports all rows as deletes, a created one
    /// all rows as inserts. `ignore` columns participate in neither update
    /// detection nor synthetic keys. No wall-clock order is assumed between
    /// the two suffixes.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn diff(
        &self,
        namespace: &str,
        before: &str,
        after: &str,
        ignore: &[String],
    ) -> Result<Diff> {
        validate_ident(namespace)?;
        validate_suffix(before)?;
        validate_suffix(after)?;

        let before_tables: BTreeSet<String> = self
            .reflector
            .snapshot_origins(namespace, before)
            .await?
            .into_iter()
            .collect();
        let after_tables: BTreeSet<String> = self
            .reflector
            .snapshot_origins(namespace, after)
            .await?
            .into_iter()
            .collect();

        let mut diff = Diff::default();
        for table in before_tables.union(&after_tables) {
            let in_before = before_tables.contains(table);
            let in_after = after_tables.contains(table);
            self.diff_table(namespace, table, before, after, in_before, in_after, ignore, &mut diff)
                .await?;
        }
        Ok(diff)
    }

    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(level = "debug", skip(self, diff))]
    async fn diff_table(
        &self,
        namespace: &str,
        table: &str,
        before: &str,
        after: &str,
        in_before: bool,
        in_after: bool,
        ignore: &[String],
        diff: &mut Diff,
    ) -> Result<()> {
        let side = if in_after {
            snapshot_table(table, after)
        } else {
            snapshot_table(table, before)
        };
        let columns = self.reflector.columns(namespace, &side).await?;
        let column_names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();

        // Primary key comes from the live table; a dropped table has none
        // and falls back to the synthetic key.
        let pk = if in_before && in_after {
            self.reflector.primary_key(namespace, table).await?
        } else {
            Vec::new()
        };
        let key = if pk.is_empty() {
            KeyExpr::synthetic(&column_names, ignore)
        } else {
            KeyExpr::primary(&pk)
        };

        let bt = qualified(namespace, &snapshot_table(table, before));
        let at = qualified(namespace, &snapshot_table(table, after));

        if in_after {
            let sql = if in_before {
                absent_rows_sql(&at, &bt, &key)
            } else {
                all_rows_sql(&at, &key)
            };
            for row in self.fetch_rows(&sql).await? {
                diff.inserts.push(with_entity(row, table));
            }
        }

        if in_before {
            let sql = if in_after {
                absent_rows_sql(&bt, &at, &key)
            } else {
                all_rows_sql(&bt, &key)
            };
            for row in self.fetch_rows(&sql).await? {
                diff.deletes.push(with_entity(row, table));
            }
        }

        // Updates only make sense with a declared primary key.
        if in_before && in_after && !pk.is_empty() {
            let compare: Vec<String> = column_names
                .iter()
                .filter(|c| !ignore.contains(c) && !pk.contains(c))
                .cloned()
                .collect();
            if compare.is_empty() {
                return Ok(());
            }
            let sql = updates_sql(&at, &bt, &pk, &compare);
            let rows = sqlx::query(&sql)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| Error::backend(format!("diff updates for {table}"), e))?;
            for row in rows {
                let before_row: Value = row
                    .try_get("before_row")
                    .map_err(|e| Error::backend("before_row", e))?;
                let after_row: Value = row
                    .try_get("after_row")
                    .map_err(|e| Error::backend("after_row", e))?;
                let pk_value: Value = row.try_get("pk").map_err(|e| Error::backend("pk", e))?;
                let changed_fields = changed_fields(&before_row, &after_row, ignore, &pk);
                diff.updates.push(RowUpdate {
                    entity: table.to_string(),
                    pk: pk_value,
                    before: before_row,
                    after: after_row,
                    changed_fields,
                });
            }
        }
        Ok(())
    }

    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Value>> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::backend("diff rows", e))?;
        rows.into_iter()
            .map(|r| r.try_get::<Value, _>("row").map_err(|e| Error::backend("row", e)))
            .collect()
    }
}

/// Join/order key for one table: either its primary-key columns or a hash
/// over the non-ignored columns when no key is declared.
enum KeyExpr {
    Primary(Vec<String>),
    Synthetic(String),
}

impl KeyExpr {
    fn primary(pk: &[String]) -> Self {
        KeyExpr::Primary(pk.to_vec())
    }

    fn synthetic(columns: &[String], ignore: &[String]) -> Self {
        KeyExpr::Synthetic(synthetic_key_expr("%A%", columns, ignore))
    }

    fn for_alias(&self, alias: &str) -> String {
        match self {
            KeyExpr::Primary(_) => unreachable!("primary keys render per-column"),
            KeyExpr::Synthetic(template) => template.replace("%A%", alias),
        }
    }
}

fn column_ref(alias: &str, column: &str) -> String {
    format!("{alias}.{}", crate::store::quote_ident(column))
}

/// `md5(concat_ws('|', coalesce(a."c1"::text, '<null>'), …))` over the
/// non-ignored columns, NULL-coalesced so NULLs key consistently.
fn synthetic_key_expr(alias: &str, columns: &[String], ignore: &[String]) -> String {
    let parts: Vec<String> = columns
        .iter()
        .filter(|c| !ignore.contains(c))
        .map(|c| format!("coalesce({}::text, '<null>')", column_ref(alias, c)))
        .collect();
    format!("md5(concat_ws('|', {}))", parts.join(", "))
}

fn key_match_clause(present: &str, other: &str, key: &KeyExpr) -> String {
    match key {
        KeyExpr::Primary(pk) => pk
            .iter()
            .map(|k| format!("{} = {}", column_ref(other, k), column_ref(present, k)))
            .collect::<Vec<_>>()
            .join(" AND "),
        KeyExpr::Synthetic(_) => {
            format!("{} = {}", key.for_alias(other), key.for_alias(present))
        }
    }
}

fn order_by_clause(alias: &str, key: &KeyExpr) -> String {
    match key {
        KeyExpr::Primary(pk) => pk
            .iter()
            .map(|k| column_ref(alias, k))
            .collect::<Vec<_>>()
            .join(", "),
        KeyExpr::Synthetic(_) => key.for_alias(alias),
    }
}

/// Rows of `present` whose key is absent from `missing`.
fn absent_rows_sql(present: &str, missing: &str, key: &KeyExpr) -> String {
    format!(
        "SELECT row_to_json(a) AS row FROM {present} a \
         WHERE NOT EXISTS (SELECT 1 FROM {missing} b WHERE {cond}) \
         ORDER BY {order}",
        cond = key_match_clause("a", "b", key),
        order = order_by_clause("a", key),
    )
}

fn all_rows_sql(table: &str, key: &KeyExpr) -> String {
    format!(
        "SELECT row_to_json(a) AS row FROM {table} a ORDER BY {order}",
        order = order_by_clause("a", key),
    )
}

/// Rows present on both sides whose compared columns differ, with before and
/// after projections plus the key as JSON. `IS DISTINCT FROM` keeps NULL
/// comparisons honest.
fn updates_sql(after: &str, before: &str, pk: &[String], compare: &[String]) -> String {
    let join = pk
        .iter()
        .map(|k| format!("{} = {}", column_ref("a", k), column_ref("b", k)))
        .collect::<Vec<_>>()
        .join(" AND ");
    let distinct = compare
        .iter()
        .map(|c| {
            format!(
                "{} IS DISTINCT FROM {}",
                column_ref("a", c),
                column_ref("b", c)
            )
        })
        .collect::<Vec<_>>()
        .join(" OR ");
    let pk_json = pk
        .iter()
        .map(|k| format!("'{}', {}", k.replace('\'', "''"), column_ref("a", k)))
        .collect::<Vec<_>>()
        .join(", ");
    let order = pk
        .iter()
        .map(|k| column_ref("a", k))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT row_to_json(a) AS after_row, row_to_json(b) AS before_row, \
         json_build_object({pk_json}) AS pk \
         FROM {after} a JOIN {before} b ON {join} \
         WHERE {distinct} \
         ORDER BY {order}"
    )
}

/// Fields whose before/after JSON values differ, ignore and key columns
/// excluded, sorted for determinism. JSON null equals JSON null, so NULLs
/// compare NULL-safely by construction.
fn changed_fields(before: &Value, after: &Value, ignore: &[String], pk: &[String]) -> Vec<String> {
    let empty = serde_json::Map::new();
    let b = before.as_object().unwrap_or(&empty);
    let a = after.as_object().unwrap_or(&empty);
    let mut keys: BTreeSet<&String> = b.keys().collect();
    keys.extend(a.keys());
    keys.into_iter()
        .filter(|k| !ignore.contains(k) && !pk.contains(k))
        .filter(|k| b.get(*k) != a.get(*k))
        .cloned()
        .collect()
}

fn with_entity(row: Value, table: &str) -> Value {
    match row {
        Value::Object(mut map) => {
            map.insert(ENTITY_KEY.to_string(), Value::String(table.to_string()));
            Value::Object(map)
        }
        other => other,
    }
}

/// Snapshot suffixes are generated (`before_<hex>`); anything that could
/// collide with the side-table naming scheme is rejected.
pub fn validate_suffix(suffix: &str) -> Result<&str> {
    validate_ident(suffix)?;
    if suffix.len() > 32 {
        return Err(Error::InvalidInput(format!(
            "snapshot suffix too long: {suffix:?}"
        )));
    }
    if suffix.contains(SNAPSHOT_MARKER) {
        return Err(Error::InvalidInput(format!(
            "snapshot suffix may not embed the snapshot marker: {suffix:?}"
        )));
    }
    Ok(suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn suffix_validation() {
        assert!(validate_suffix("before_1a2b3c4d").is_ok());
        assert!(validate_suffix("x_snapshot_y").is_err());
        assert!(validate_suffix("UPPER").is_err());
        assert!(validate_suffix(&"a".repeat(33)).is_err());
    }

    #[test]
    fn absent_rows_sql_composite_pk() {
        let key = KeyExpr::primary(&["user_id".to_string(), "channel_id".to_string()]);
        let sql = absent_rows_sql("\"ns\".\"t_snapshot_a\"", "\"ns\".\"t_snapshot_b\"", &key);
        assert!(sql.contains("b.\"user_id\" = a.\"user_id\" AND b.\"channel_id\" = a.\"channel_id\""));
        assert!(sql.contains("ORDER BY a.\"user_id\", a.\"channel_id\""));
        assert!(sql.contains("NOT EXISTS"));
    }

    #[test]
    fn synthetic_key_skips_ignored_columns() {
        let cols = vec!["id".to_string(), "payload".to_string(), "updated_at".to_string()];
        let expr = synthetic_key_expr("a", &cols, &["updated_at".to_string()]);
        assert!(expr.contains("a.\"id\""));
        assert!(expr.contains("a.\"payload\""));
        assert!(!expr.contains("updated_at"));
        assert!(expr.starts_with("md5(concat_ws('|'"));
    }

    #[test]
    fn updates_sql_is_null_safe_and_excludes_keys() {
        let sql = updates_sql(
            "\"ns\".\"issues_snapshot_after\"",
            "\"ns\".\"issues_snapshot_before\"",
            &["id".to_string()],
            &["status".to_string(), "title".to_string()],
        );
        assert!(sql.contains("a.\"status\" IS DISTINCT FROM b.\"status\""));
        assert!(sql.contains("a.\"title\" IS DISTINCT FROM b.\"title\""));
        assert!(!sql.contains("a.\"id\" IS DISTINCT FROM"));
        assert!(sql.contains("json_build_object('id', a.\"id\")"));
    }

    #[test]
    fn changed_fields_null_safe_and_sorted() {
        let before = json!({"id": 1, "status": "Todo", "note": null, "updated_at": "t0"});
        let after = json!({"id": 1, "status": "Done", "note": null, "updated_at": "t1"});
        let fields = changed_fields(&before, &after, &[], &["id".to_string()]);
        assert_eq!(fields, vec!["status".to_string(), "updated_at".to_string()]);

        let masked = changed_fields(&before, &after, &["updated_at".to_string()], &["id".into()]);
        assert_eq!(masked, vec!["status".to_string()]);
    }

    #[test]
    fn changed_fields_sees_added_and_dropped_keys() {
        let before = json!({"id": 1, "legacy": "x"});
        let after = json!({"id": 1, "fresh": "y"});
        let fields = changed_fields(&before, &after, &[], &["id".to_string()]);
        assert_eq!(fields, vec!["fresh".to_string(), "legacy".to_string()]);
    }

    #[test]
    fn entity_label_injected() {
        let row = with_entity(json!({"id": "m1"}), "messages");
        assert_eq!(row[ENTITY_KEY], "messages");
    }
}
