//! Relational store access: shared pool plus namespace-bound sessions.
//!
//! Platform tables live in `public`; every replica gets its own schema. A
//! session binds a transaction to one replica's schema via
//! `SET LOCAL search_path`, so the binding can never leak back into the
//! pool with the connection.

pub mod platform;
pub mod reflect;

use crate::config::PostgresConfig;
use crate::{Error, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres, Transaction};

/// Maximum identifier length Postgres accepts (NAMEDATALEN - 1).
const MAX_IDENT_LEN: usize = 63;

/// Validate a schema/table identifier we interpolate into DDL.
///
/// Everything we generate (namespaces, snapshot suffixes) is lowercase
/// alphanumeric + underscore; anything else is rejected rather than quoted
/// around.
pub fn validate_ident(ident: &str) -> Result<&str> {
    if ident.is_empty() || ident.len() > MAX_IDENT_LEN {
        return Err(Error::InvalidInput(format!(
            "invalid identifier length: {:?}",
            ident
        )));
    }
    let ok = ident
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !ok {
        return Err(Error::InvalidInput(format!(
            "invalid identifier: {:?}",
            ident
        )));
    }
    Ok(ident)
}

/// Double-quote an identifier for interpolation into SQL text.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Schema-qualified, quoted table reference.
pub fn qualified(namespace: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(namespace), quote_ident(table))
}

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    #[tracing::instrument(level = "debug", skip(cfg))]
    pub async fn connect(cfg: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(cfg.acquire_timeout)
            .connect(&cfg.url)
            .await
            .map_err(|e| Error::backend("connect postgres", e))?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Open a session whose unqualified table names resolve inside
    /// `namespace`. The binding lives and dies with the transaction.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn session_for_namespace(&self, namespace: &str) -> Result<EnvSession> {
        validate_ident(namespace)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::backend("begin session", e))?;
        let stmt = format!(
            "SET LOCAL search_path TO {}, public",
            quote_ident(namespace)
        );
        sqlx::query(&stmt)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::backend("bind search_path", e))?;
        Ok(EnvSession {
            tx,
            namespace: namespace.to_string(),
        })
    }
}

/// A namespace-bound unit of work. Rolls back on drop; `commit` publishes.
pub struct EnvSession {
    tx: Transaction<'static, Postgres>,
    namespace: String,
}

impl EnvSession {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The underlying connection, for executing queries within the session.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    #[tracing::instrument(level = "debug", skip(self), fields(namespace = %self.namespace))]
    pub async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| Error::backend("commit session", e))
    }

    #[tracing::instrument(level = "debug", skip(self), fields(namespace = %self.namespace))]
    pub async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| Error::backend("rollback session", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_generated_identifiers() {
        assert!(validate_ident("state_0af3c2d1e4b5a6978899aabbccddeeff").is_ok());
        assert!(validate_ident("messages_snapshot_before_1a2b3c4d").is_ok());
    }

    #[test]
    fn rejects_quoting_tricks() {
        assert!(validate_ident("").is_err());
        assert!(validate_ident("Bad").is_err());
        assert!(validate_ident("a\"; DROP SCHEMA public; --").is_err());
        assert!(validate_ident(&"x".repeat(64)).is_err());
    }

    #[test]
    fn qualified_quotes_both_parts() {
        assert_eq!(qualified("state_ab", "messages"), "\"state_ab\".\"messages\"");
    }
}
