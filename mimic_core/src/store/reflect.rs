//! Runtime schema reflection: user tables, columns, primary keys.
//!
//! The differ and the isolation engine never hard-code table names; they
//! describe whatever a namespace holds at the moment of use.

use crate::{Error, Result};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Marker embedded in snapshot side-table names. Tables matching
/// `%_snapshot_%` are never enumerated as user tables.
pub const SNAPSHOT_MARKER: &str = "_snapshot_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    /// Primary-key columns in constraint order; empty when none declared.
    pub pk: Vec<String>,
}

impl TableInfo {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn has_pk(&self) -> bool {
        !self.pk.is_empty()
    }
}

/// Reflects namespaces over the shared pool, with a per-namespace cache.
///
/// The cache is read-mostly; it is populated on first use of a namespace and
/// invalidated when the environment is deleted. A fresh clone always reflects
/// correctly because misses go straight to `information_schema`.
#[derive(Clone)]
pub struct SchemaReflector {
    pool: PgPool,
    cache: Arc<RwLock<HashMap<String, Arc<Vec<TableInfo>>>>>,
}

impl SchemaReflector {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// User tables of a namespace (snapshot side-tables excluded), cached.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn tables(&self, namespace: &str) -> Result<Arc<Vec<TableInfo>>> {
        if let Some(hit) = self
            .cache
            .read()
            .expect("reflector cache poisoned")
            .get(namespace)
        {
            return Ok(hit.clone());
        }
        let fresh = Arc::new(self.reflect(namespace).await?);
        self.cache
            .write()
            .expect("reflector cache poisoned")
            .insert(namespace.to_string(), fresh.clone());
        Ok(fresh)
    }

    /// Re-reflect a namespace, replacing any cached entry. Snapshots use
    /// this so tables created after the cache was primed are still copied.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn refresh(&self, namespace: &str) -> Result<Arc<Vec<TableInfo>>> {
        let fresh = Arc::new(self.reflect(namespace).await?);
        self.cache
            .write()
            .expect("reflector cache poisoned")
            .insert(namespace.to_string(), fresh.clone());
        Ok(fresh)
    }

    /// Drop cached reflection for a namespace (environment deleted).
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn invalidate(&self, namespace: &str) {
        self.cache
            .write()
            .expect("reflector cache poisoned")
            .remove(namespace);
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn reflect(&self, namespace: &str) -> Result<Vec<TableInfo>> {
        let names: Vec<String> = sqlx::query(
            r#"
            SELECT table_name
              FROM information_schema.tables
             WHERE table_schema = $1
               AND table_type = 'BASE TABLE'
               AND table_name NOT LIKE '%\_snapshot\_%'
             ORDER BY table_name
            "#,
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("list tables", e))?
        .into_iter()
        .map(|r| r.get::<String, _>("table_name"))
        .collect();

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let columns = self.columns(namespace, &name).await?;
            let pk = self.primary_key(namespace, &name).await?;
            out.push(TableInfo { name, columns, pk });
        }
        Ok(out)
    }

    /// Columns of one table, in ordinal order. Works on snapshot side-tables
    /// too (they carry the copied structure, not the constraints).
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn columns(&self, namespace: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT column_name, data_type, is_nullable
              FROM information_schema.columns
             WHERE table_schema = $1 AND table_name = $2
             ORDER BY ordinal_position
            "#,
        )
        .bind(namespace)
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("list columns", e))?;

        Ok(rows
            .into_iter()
            .map(|r| ColumnInfo {
                name: r.get("column_name"),
                data_type: r.get("data_type"),
                nullable: r.get::<String, _>("is_nullable") == "YES",
            })
            .collect())
    }

    /// Primary-key column tuple of one table, in constraint order.
    /// Composite keys supported; empty when the table declares none.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn primary_key(&self, namespace: &str, table: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT kcu.column_name
              FROM information_schema.table_constraints tc
              JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
               AND tc.table_schema = kcu.table_schema
             WHERE tc.constraint_type = 'PRIMARY KEY'
               AND tc.table_schema = $1
               AND tc.table_name = $2
             ORDER BY kcu.ordinal_position
            "#,
        )
        .bind(namespace)
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("reflect primary key", e))?;

        Ok(rows
            .into_iter()
            .map(|r| r.get::<String, _>("column_name"))
            .collect())
    }

    /// Snapshot side-tables carrying the given suffix, mapped back to their
    /// origin table names.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn snapshot_origins(&self, namespace: &str, suffix: &str) -> Result<Vec<String>> {
        let pattern = format!("%{SNAPSHOT_MARKER}{suffix}");
        let rows = sqlx::query(
            r#"
            SELECT table_name
              FROM information_schema.tables
             WHERE table_schema = $1
               AND table_type = 'BASE TABLE'
               AND table_name LIKE $2
             ORDER BY table_name
            "#,
        )
        .bind(namespace)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("list snapshot tables", e))?;

        let trailer = format!("{SNAPSHOT_MARKER}{suffix}");
        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let name: String = r.get("table_name");
                name.strip_suffix(&trailer).map(str::to_string)
            })
            .collect())
    }
}

/// Side-table name for one table under one snapshot suffix.
pub fn snapshot_table(table: &str, suffix: &str) -> String {
    format!("{table}{SNAPSHOT_MARKER}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_table_naming() {
        assert_eq!(
            snapshot_table("messages", "before_1a2b3c4d"),
            "messages_snapshot_before_1a2b3c4d"
        );
    }

    #[test]
    fn table_info_pk_flags() {
        let t = TableInfo {
            name: "memberships".into(),
            columns: vec![],
            pk: vec!["user_id".into(), "channel_id".into()],
        };
        assert!(t.has_pk());
        let t2 = TableInfo {
            name: "audit_log".into(),
            columns: vec![],
            pk: vec![],
        };
        assert!(!t2.has_pk());
    }
}
