//! Replica lifecycle: clone a template namespace, seed it, route sessions
//! into it, tear it down on TTL or request.

use crate::models::{
    EnvironmentId, EnvironmentRecord, EnvironmentStatus, Impersonation, TemplateId, TemplateRecord,
    Visibility,
};
use crate::store::platform::PlatformDb;
use crate::store::reflect::SchemaReflector;
use crate::store::{qualified, quote_ident, EnvSession, Store};
use crate::{Error, Resource, Result};
use chrono::Utc;
use sqlx::{PgConnection, Row};
use std::time::Duration;

pub struct CreateEnvironment {
    pub template: TemplateRecord,
    pub ttl: Duration,
    pub owner: String,
    pub impersonation: Impersonation,
}

pub struct FreezeEnvironment {
    pub environment_id: EnvironmentId,
    pub service: String,
    pub name: String,
    pub description: Option<String>,
    pub visibility: Visibility,
    pub version: String,
    pub owner: String,
}

#[derive(Clone)]
pub struct IsolationEngine {
    store: Store,
    platform: PlatformDb,
    reflector: SchemaReflector,
}

impl IsolationEngine {
    pub fn new(store: Store, platform: PlatformDb, reflector: SchemaReflector) -> Self {
        Self {
            store,
            platform,
            reflector,
        }
    }

    pub fn platform(&self) -> &PlatformDb {
        &self.platform
    }

    pub fn reflector(&self) -> &SchemaReflector {
        &self.reflector
    }

    /// Stamp a fresh replica from a template.
    ///
    /// Namespace creation, structure clone, seeding, and the environment row
    /// all happen in one transaction; any failure rolls the whole thing back
    /// and leaves no trace.
    #[tracing::instrument(level = "info", skip(self, req), fields(template_id = %req.template.id))]
    pub async fn create_environment(&self, req: CreateEnvironment) -> Result<EnvironmentRecord> {
        if req.ttl.is_zero() {
            return Err(Error::InvalidInput("ttl must be > 0".to_string()));
        }
        let ttl = chrono::Duration::from_std(req.ttl)
            .map_err(|e| Error::InvalidInput(format!("ttl out of range: {e}")))?;

        let environment_id = EnvironmentId::new();
        let namespace = environment_id.namespace();
        let now = Utc::now();
        let env = EnvironmentRecord {
            environment_id,
            schema_name: namespace.clone(),
            template_id: req.template.id,
            owner: req.owner,
            impersonation: req.impersonation,
            status: EnvironmentStatus::Ready,
            created_at: now,
            expires_at: now + ttl,
            last_used_at: Some(now),
        };

        let mut tx = self
            .store
            .pool()
            .begin()
            .await
            .map_err(|e| Error::backend("begin create environment", e))?;
        clone_namespace(&mut tx, &self.reflector, &req.template.schema_name, &namespace).await?;
        PlatformDb::insert_environment_on(&mut *tx, &env).await?;
        tx.commit()
            .await
            .map_err(|e| Error::backend("commit create environment", e))?;

        tracing::info!(environment_id = %environment_id, namespace = %namespace, "environment ready");
        Ok(env)
    }

    /// Drop a replica. Idempotent: a missing or already-deleted environment
    /// reports `deleted`, and a missing namespace is success.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn delete_environment(&self, id: EnvironmentId) -> Result<EnvironmentStatus> {
        let Some(env) = self.platform.get_environment(id).await? else {
            return Ok(EnvironmentStatus::Deleted);
        };
        if env.status == EnvironmentStatus::Deleted {
            return Ok(EnvironmentStatus::Deleted);
        }

        // Losing the claim to a concurrent deleter is fine; both finish the
        // same teardown.
        let _ = self.platform.claim_environment_for_delete(id).await?;
        self.drop_namespace(&env.schema_name).await?;
        self.platform
            .mark_environment_status(id, EnvironmentStatus::Deleted)
            .await?;
        self.reflector.invalidate(&env.schema_name);
        Ok(EnvironmentStatus::Deleted)
    }

    /// Reap every environment past its `expires_at`. Claims rows atomically,
    /// so concurrent passes never double-delete. Returns the reaped ids.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn expire_pass(&self) -> Result<Vec<EnvironmentId>> {
        let claimed = self.platform.claim_expired_environments(Utc::now()).await?;
        let mut reaped = Vec::with_capacity(claimed.len());
        for env in claimed {
            if let Err(e) = self.drop_namespace(&env.schema_name).await {
                tracing::warn!(environment_id = %env.environment_id, error = %e,
                    "failed dropping expired namespace; will retry next pass");
                continue;
            }
            self.platform
                .mark_environment_status(env.environment_id, EnvironmentStatus::Deleted)
                .await?;
            self.reflector.invalidate(&env.schema_name);
            reaped.push(env.environment_id);
        }
        if !reaped.is_empty() {
            tracing::info!(count = reaped.len(), "expired environments reaped");
        }
        Ok(reaped)
    }

    /// The environment, provided it is `ready` and unexpired. An expired
    /// environment is already gone from the caller's perspective, even
    /// before the reaper runs.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn lookup_ready(&self, id: EnvironmentId) -> Result<EnvironmentRecord> {
        let env = self
            .platform
            .get_environment(id)
            .await?
            .ok_or_else(|| Error::NotFound(Resource::Environment, id.to_string()))?;
        if env.status != EnvironmentStatus::Ready || env.expired(Utc::now()) {
            return Err(Error::NotFound(Resource::Environment, id.to_string()));
        }
        let _ = self
            .platform
            .touch_environment_last_used(id, Utc::now())
            .await;
        Ok(env)
    }

    /// A session bound to the environment's namespace.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn session_for_environment(&self, id: EnvironmentId) -> Result<EnvSession> {
        let env = self.lookup_ready(id).await?;
        self.store.session_for_namespace(&env.schema_name).await
    }

    /// Freeze a live environment's namespace into a new template.
    #[tracing::instrument(level = "info", skip(self, req), fields(environment_id = %req.environment_id))]
    pub async fn freeze_environment(&self, req: FreezeEnvironment) -> Result<TemplateRecord> {
        let env = self.lookup_ready(req.environment_id).await?;
        let template_id = TemplateId::new();
        let schema_name = format!("template_{}", template_id.0.simple());
        let template = TemplateRecord {
            id: template_id,
            service: req.service,
            name: req.name,
            version: req.version,
            description: req.description,
            visibility: req.visibility,
            owner: Some(req.owner),
            schema_name: schema_name.clone(),
            created_at: Utc::now(),
        };

        let mut tx = self
            .store
            .pool()
            .begin()
            .await
            .map_err(|e| Error::backend("begin freeze environment", e))?;
        clone_namespace(&mut tx, &self.reflector, &env.schema_name, &schema_name).await?;
        PlatformDb::insert_template_on(&mut *tx, &template).await?;
        tx.commit()
            .await
            .map_err(|e| Error::backend("commit freeze environment", e))?;

        Ok(template)
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<()> {
        crate::store::validate_ident(namespace)?;
        let stmt = format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(namespace));
        sqlx::query(&stmt)
            .execute(self.store.pool())
            .await
            .map_err(|e| Error::backend("drop namespace", e))?;
        Ok(())
    }
}

/// Clone `source`'s user tables (structure + rows) into a brand-new schema
/// `target`, inside the caller's transaction.
///
/// Structure first (`LIKE … INCLUDING ALL`), then rows, then foreign keys.
/// Re-attaching FKs after seeding means insert order never matters.
async fn clone_namespace(
    tx: &mut PgConnection,
    reflector: &SchemaReflector,
    source: &str,
    target: &str,
) -> Result<()> {
    crate::store::validate_ident(source)?;
    crate::store::validate_ident(target)?;
    let tables = reflector.refresh(source).await?;

    let stmt = format!("CREATE SCHEMA {}", quote_ident(target));
    sqlx::query(&stmt)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::backend("create namespace", e))?;

    for t in tables.iter() {
        let stmt = format!(
            "CREATE TABLE {} (LIKE {} INCLUDING ALL)",
            qualified(target, &t.name),
            qualified(source, &t.name),
        );
        sqlx::query(&stmt)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::backend(format!("clone structure of {}", t.name), e))?;
    }

    for t in tables.iter() {
        let stmt = format!(
            "INSERT INTO {} SELECT * FROM {}",
            qualified(target, &t.name),
            qualified(source, &t.name),
        );
        sqlx::query(&stmt)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::backend(format!("seed {}", t.name), e))?;
    }

    for t in tables.iter() {
        attach_foreign_keys(tx, source, target, &t.name).await?;
    }

    for t in tables.iter() {
        if t.columns.iter().any(|c| c.name == "id") {
            reset_id_sequence(tx, target, &t.name).await?;
        }
    }

    Ok(())
}

/// Copy `source.table`'s foreign-key constraints onto the target clone,
/// rewriting references so they stay inside the target namespace.
async fn attach_foreign_keys(
    tx: &mut PgConnection,
    source: &str,
    target: &str,
    table: &str,
) -> Result<()> {
    let rows = sqlx::query(
        r#"
        SELECT conname, pg_get_constraintdef(oid) AS def
          FROM pg_constraint
         WHERE contype = 'f'
           AND conrelid = ($1::text || '.' || quote_ident($2))::regclass
         ORDER BY conname
        "#,
    )
    .bind(quote_ident(source))
    .bind(table)
    .fetch_all(&mut *tx)
    .await
    .map_err(|e| Error::backend(format!("reflect foreign keys of {table}"), e))?;

    for row in rows {
        let name: String = row.get("conname");
        let def: String = row.get("def");
        let stmt = format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {}",
            qualified(target, table),
            quote_ident(&name),
            rewrite_fk_def(&def, source, target),
        );
        sqlx::query(&stmt)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::backend(format!("attach foreign key {name} on {table}"), e))?;
    }
    Ok(())
}

/// `pg_get_constraintdef` qualifies referenced tables with the source
/// schema; point them at the target instead.
fn rewrite_fk_def(def: &str, source: &str, target: &str) -> String {
    def.replace(
        &format!("{}.", quote_ident(source)),
        &format!("{}.", quote_ident(target)),
    )
    .replace(&format!("{source}."), &format!("{target}."))
}

/// Bump a cloned table's id sequence past the seeded rows so fresh inserts
/// do not collide. Only touches sequences owned by the target namespace.
async fn reset_id_sequence(tx: &mut PgConnection, target: &str, table: &str) -> Result<()> {
    let row = sqlx::query("SELECT pg_get_serial_sequence($1, 'id') AS seq")
        .bind(format!("{}.{}", quote_ident(target), quote_ident(table)))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::backend(format!("find id sequence of {table}"), e))?;
    let Some(seq) = row.get::<Option<String>, _>("seq") else {
        return Ok(());
    };
    if !seq.starts_with(&format!("{target}.")) && !seq.starts_with(&quote_ident(target)) {
        // Serial default still pointing at the source's sequence; leave it.
        return Ok(());
    }
    let stmt = format!(
        "SELECT setval($1, COALESCE((SELECT MAX(id) FROM {}), 0) + 1, false)",
        qualified(target, table),
    );
    sqlx::query(&stmt)
        .bind(&seq)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::backend(format!("reset id sequence of {table}"), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fk_defs_rewritten_to_target_namespace() {
        let def = "FOREIGN KEY (channel_id) REFERENCES template_slack.channels(id)";
        assert_eq!(
            rewrite_fk_def(def, "template_slack", "state_abc"),
            "FOREIGN KEY (channel_id) REFERENCES state_abc.channels(id)"
        );

        let quoted = "FOREIGN KEY (user_id) REFERENCES \"template_slack\".\"users\"(id)";
        assert_eq!(
            rewrite_fk_def(quoted, "template_slack", "state_abc"),
            "FOREIGN KEY (user_id) REFERENCES \"state_abc\".\"users\"(id)"
        );
    }

    #[test]
    fn fk_defs_without_schema_untouched() {
        let def = "FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE";
        assert_eq!(rewrite_fk_def(def, "tpl", "state_x"), def);
    }
}
