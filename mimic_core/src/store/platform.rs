//! Platform metadata store: templates, environments, runs, tests, suites,
//! API keys, persisted diffs. All rows live in the `public` schema.

use crate::models::{
    ApiKeyId, ApiKeyRecord, EnvironmentId, EnvironmentRecord, EnvironmentStatus, Impersonation,
    RunId, RunRecord, RunStatus, TemplateId, TemplateRecord, TestId, TestRecord, TestSuiteId,
    TestSuiteRecord, Visibility,
};
use crate::{Error, Resource, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use std::collections::HashSet;
use uuid::Uuid;

const MIGRATION_0001: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone)]
pub struct PlatformDb {
    pool: PgPool,
}

impl PlatformDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply platform schema migrations.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        // Single-file migration keeps self-hosted setup simple.
        sqlx::raw_sql(MIGRATION_0001)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::backend("apply migrations", e))?;
        Ok(())
    }

    fn template_from_row(row: &PgRow) -> Result<TemplateRecord> {
        let visibility_str: String = row
            .try_get("visibility")
            .map_err(|e| Error::backend("visibility", e))?;
        let visibility = Visibility::parse_str(&visibility_str).ok_or_else(|| {
            Error::BackendMessage(format!("invalid template visibility: {visibility_str}"))
        })?;
        Ok(TemplateRecord {
            id: row.try_get("id").map_err(|e| Error::backend("id", e))?,
            service: row
                .try_get("service")
                .map_err(|e| Error::backend("service", e))?,
            name: row.try_get("name").map_err(|e| Error::backend("name", e))?,
            version: row
                .try_get("version")
                .map_err(|e| Error::backend("version", e))?,
            description: row
                .try_get("description")
                .map_err(|e| Error::backend("description", e))?,
            visibility,
            owner: row
                .try_get("owner")
                .map_err(|e| Error::backend("owner", e))?,
            schema_name: row
                .try_get("schema_name")
                .map_err(|e| Error::backend("schema_name", e))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| Error::backend("created_at", e))?,
        })
    }

    fn environment_from_row(row: &PgRow) -> Result<EnvironmentRecord> {
        let status_str: String = row
            .try_get("status")
            .map_err(|e| Error::backend("status", e))?;
        let status = EnvironmentStatus::parse_str(&status_str).ok_or_else(|| {
            Error::BackendMessage(format!("invalid environment status: {status_str}"))
        })?;
        Ok(EnvironmentRecord {
            environment_id: row
                .try_get("environment_id")
                .map_err(|e| Error::backend("environment_id", e))?,
            schema_name: row
                .try_get("schema_name")
                .map_err(|e| Error::backend("schema_name", e))?,
            template_id: row
                .try_get("template_id")
                .map_err(|e| Error::backend("template_id", e))?,
            owner: row
                .try_get("owner")
                .map_err(|e| Error::backend("owner", e))?,
            impersonation: Impersonation {
                user_id: row
                    .try_get("impersonate_user_id")
                    .map_err(|e| Error::backend("impersonate_user_id", e))?,
                email: row
                    .try_get("impersonate_email")
                    .map_err(|e| Error::backend("impersonate_email", e))?,
            },
            status,
            created_at: row
                .try_get("created_at")
                .map_err(|e| Error::backend("created_at", e))?,
            expires_at: row
                .try_get("expires_at")
                .map_err(|e| Error::backend("expires_at", e))?,
            last_used_at: row
                .try_get("last_used_at")
                .map_err(|e| Error::backend("last_used_at", e))?,
        })
    }

    fn run_from_row(row: &PgRow) -> Result<RunRecord> {
        let status_str: String = row
            .try_get("status")
            .map_err(|e| Error::backend("status", e))?;
        let status = RunStatus::parse_str(&status_str)
            .ok_or_else(|| Error::BackendMessage(format!("invalid run status: {status_str}")))?;
        Ok(RunRecord {
            run_id: row
                .try_get("run_id")
                .map_err(|e| Error::backend("run_id", e))?,
            environment_id: row
                .try_get("environment_id")
                .map_err(|e| Error::backend("environment_id", e))?,
            test_id: row
                .try_get("test_id")
                .map_err(|e| Error::backend("test_id", e))?,
            suite_id: row
                .try_get("suite_id")
                .map_err(|e| Error::backend("suite_id", e))?,
            status,
            before_suffix: row
                .try_get("before_suffix")
                .map_err(|e| Error::backend("before_suffix", e))?,
            after_suffix: row
                .try_get("after_suffix")
                .map_err(|e| Error::backend("after_suffix", e))?,
            passed: row
                .try_get("passed")
                .map_err(|e| Error::backend("passed", e))?,
            result: row
                .try_get("result")
                .map_err(|e| Error::backend("result", e))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| Error::backend("created_at", e))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| Error::backend("updated_at", e))?,
        })
    }

    fn test_from_row(row: &PgRow) -> Result<TestRecord> {
        Ok(TestRecord {
            id: row.try_get("id").map_err(|e| Error::backend("id", e))?,
            name: row.try_get("name").map_err(|e| Error::backend("name", e))?,
            prompt: row
                .try_get("prompt")
                .map_err(|e| Error::backend("prompt", e))?,
            template_id: row
                .try_get("template_id")
                .map_err(|e| Error::backend("template_id", e))?,
            spec: row.try_get("spec").map_err(|e| Error::backend("spec", e))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| Error::backend("created_at", e))?,
        })
    }

    fn suite_from_row(row: &PgRow) -> Result<TestSuiteRecord> {
        let visibility_str: String = row
            .try_get("visibility")
            .map_err(|e| Error::backend("visibility", e))?;
        let visibility = Visibility::parse_str(&visibility_str).ok_or_else(|| {
            Error::BackendMessage(format!("invalid suite visibility: {visibility_str}"))
        })?;
        Ok(TestSuiteRecord {
            id: row.try_get("id").map_err(|e| Error::backend("id", e))?,
            name: row.try_get("name").map_err(|e| Error::backend("name", e))?,
            description: row
                .try_get("description")
                .map_err(|e| Error::backend("description", e))?,
            owner: row
                .try_get("owner")
                .map_err(|e| Error::backend("owner", e))?,
            visibility,
            created_at: row
                .try_get("created_at")
                .map_err(|e| Error::backend("created_at", e))?,
        })
    }

    fn api_key_from_row(row: &PgRow) -> Result<ApiKeyRecord> {
        Ok(ApiKeyRecord {
            id: row.try_get("id").map_err(|e| Error::backend("id", e))?,
            secret_hash: row
                .try_get("secret_hash")
                .map_err(|e| Error::backend("secret_hash", e))?,
            owner: row
                .try_get("owner")
                .map_err(|e| Error::backend("owner", e))?,
            expires_at: row
                .try_get("expires_at")
                .map_err(|e| Error::backend("expires_at", e))?,
            revoked_at: row
                .try_get("revoked_at")
                .map_err(|e| Error::backend("revoked_at", e))?,
            last_used_at: row
                .try_get("last_used_at")
                .map_err(|e| Error::backend("last_used_at", e))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| Error::backend("created_at", e))?,
        })
    }

    // ---- templates ----

    /// Insert within the caller's transaction (template freezing clones the
    /// namespace and registers the record atomically).
    #[tracing::instrument(level = "debug", skip(conn, template))]
    pub async fn insert_template_on(
        conn: &mut PgConnection,
        template: &TemplateRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO templates
                (id, service, name, version, description, visibility, owner, schema_name, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(template.id)
        .bind(&template.service)
        .bind(&template.name)
        .bind(&template.version)
        .bind(&template.description)
        .bind(template.visibility.as_str())
        .bind(&template.owner)
        .bind(&template.schema_name)
        .bind(template.created_at)
        .execute(conn)
        .await
        .map_err(|e| Error::backend("insert template", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, template))]
    pub async fn insert_template(&self, template: &TemplateRecord) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Error::backend("acquire connection", e))?;
        Self::insert_template_on(&mut conn, template).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_template(&self, id: TemplateId) -> Result<TemplateRecord> {
        let row = sqlx::query("SELECT * FROM templates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::backend("get template", e))?
            .ok_or_else(|| Error::NotFound(Resource::Template, id.to_string()))?;
        Self::template_from_row(&row)
    }

    /// Newest template for `(service, name)` visible to `owner`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn find_template(
        &self,
        service: &str,
        name: &str,
        owner: &str,
    ) -> Result<TemplateRecord> {
        let row = sqlx::query(
            r#"
            SELECT * FROM templates
             WHERE service = $1 AND name = $2
               AND (visibility = 'public' OR owner = $3)
             ORDER BY created_at DESC
             LIMIT 1
            "#,
        )
        .bind(service)
        .bind(name)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::backend("find template", e))?
        .ok_or_else(|| Error::NotFound(Resource::Template, format!("{service}:{name}")))?;
        Self::template_from_row(&row)
    }

    /// Templates visible to `owner`, newest first, deduplicated by
    /// `(service, name)` keeping the most recent.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_templates(&self, owner: &str) -> Result<Vec<TemplateRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM templates
             WHERE visibility = 'public' OR owner = $1
             ORDER BY created_at DESC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("list templates", e))?;

        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut out = Vec::new();
        for row in &rows {
            let t = Self::template_from_row(row)?;
            if seen.insert((t.service.clone(), t.name.clone())) {
                out.push(t);
            }
        }
        Ok(out)
    }

    // ---- environments ----

    /// Insert within the caller's transaction so environment creation stays
    /// all-or-nothing with the namespace DDL.
    #[tracing::instrument(level = "debug", skip(conn, env))]
    pub async fn insert_environment_on(
        conn: &mut PgConnection,
        env: &EnvironmentRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO environments
                (environment_id, schema_name, template_id, owner,
                 impersonate_user_id, impersonate_email, status,
                 created_at, expires_at, last_used_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(env.environment_id)
        .bind(&env.schema_name)
        .bind(env.template_id)
        .bind(&env.owner)
        .bind(&env.impersonation.user_id)
        .bind(&env.impersonation.email)
        .bind(env.status.as_str())
        .bind(env.created_at)
        .bind(env.expires_at)
        .bind(env.last_used_at)
        .execute(conn)
        .await
        .map_err(|e| Error::backend("insert environment", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_environment(&self, id: EnvironmentId) -> Result<Option<EnvironmentRecord>> {
        let row = sqlx::query("SELECT * FROM environments WHERE environment_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::backend("get environment", e))?;
        row.as_ref().map(Self::environment_from_row).transpose()
    }

    /// Best-effort usage tracking; failures are the caller's to ignore.
    pub async fn touch_environment_last_used(
        &self,
        id: EnvironmentId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE environments SET last_used_at = $2 WHERE environment_id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::backend("touch environment", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn mark_environment_status(
        &self,
        id: EnvironmentId,
        status: EnvironmentStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE environments SET status = $2 WHERE environment_id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::backend("mark environment status", e))?;
        Ok(())
    }

    /// Atomically claim an environment for deletion. Returns the record when
    /// this caller won the claim; `None` when the row is missing, already
    /// deleted, or being deleted by someone else.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn claim_environment_for_delete(
        &self,
        id: EnvironmentId,
    ) -> Result<Option<EnvironmentRecord>> {
        let row = sqlx::query(
            r#"
            UPDATE environments
               SET status = 'deleting'
             WHERE environment_id = $1 AND status = 'ready'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::backend("claim environment for delete", e))?;
        row.as_ref().map(Self::environment_from_row).transpose()
    }

    /// Atomically claim all expired environments. Rows already in
    /// `deleting` are re-claimed so an interrupted teardown finishes on a
    /// later pass; teardown itself is idempotent.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn claim_expired_environments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<EnvironmentRecord>> {
        let rows = sqlx::query(
            r#"
            UPDATE environments
               SET status = 'deleting'
             WHERE status IN ('ready', 'deleting') AND expires_at < $1
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("claim expired environments", e))?;
        rows.iter().map(Self::environment_from_row).collect()
    }

    // ---- runs ----

    #[tracing::instrument(level = "debug", skip(self, run))]
    pub async fn insert_run(&self, run: &RunRecord) -> Result<()> {
        let res = sqlx::query(
            r#"
            INSERT INTO runs
                (run_id, environment_id, test_id, suite_id, status,
                 before_suffix, after_suffix, passed, result, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(run.run_id)
        .bind(run.environment_id)
        .bind(run.test_id)
        .bind(run.suite_id)
        .bind(run.status.as_str())
        .bind(&run.before_suffix)
        .bind(&run.after_suffix)
        .bind(run.passed)
        .bind(&run.result)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            // The partial unique index enforces one running run per env.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(Error::Conflict(
                format!("environment {} already has a running run", run.environment_id),
            )),
            Err(e) => Err(Error::backend("insert run", e)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_run(&self, id: RunId) -> Result<RunRecord> {
        let row = sqlx::query("SELECT * FROM runs WHERE run_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::backend("get run", e))?
            .ok_or_else(|| Error::NotFound(Resource::Run, id.to_string()))?;
        Self::run_from_row(&row)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn find_running_run(&self, env: EnvironmentId) -> Result<Option<RunRecord>> {
        let row = sqlx::query(
            "SELECT * FROM runs WHERE environment_id = $1 AND status = 'running' LIMIT 1",
        )
        .bind(env)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::backend("find running run", e))?;
        row.as_ref().map(Self::run_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn set_run_after_suffix(
        &self,
        id: RunId,
        after_suffix: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE runs SET after_suffix = $2, updated_at = $3 WHERE run_id = $1")
            .bind(id)
            .bind(after_suffix)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::backend("set run after suffix", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, result))]
    pub async fn finish_run(
        &self,
        id: RunId,
        passed: bool,
        result: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE runs
               SET status = 'evaluated', passed = $2, result = $3, updated_at = $4
             WHERE run_id = $1
            "#,
        )
        .bind(id)
        .bind(passed)
        .bind(result)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("finish run", e))?;
        Ok(())
    }

    // ---- tests & suites ----

    #[tracing::instrument(level = "debug", skip(self, test))]
    pub async fn insert_test(&self, test: &TestRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tests (id, name, prompt, template_id, spec, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(test.id)
        .bind(&test.name)
        .bind(&test.prompt)
        .bind(test.template_id)
        .bind(&test.spec)
        .bind(test.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("insert test", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_test(&self, id: TestId) -> Result<TestRecord> {
        let row = sqlx::query("SELECT * FROM tests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::backend("get test", e))?
            .ok_or_else(|| Error::NotFound(Resource::Test, id.to_string()))?;
        Self::test_from_row(&row)
    }

    #[tracing::instrument(level = "debug", skip(self, suite))]
    pub async fn insert_test_suite(&self, suite: &TestSuiteRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO test_suites (id, name, description, owner, visibility, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(suite.id)
        .bind(&suite.name)
        .bind(&suite.description)
        .bind(&suite.owner)
        .bind(suite.visibility.as_str())
        .bind(suite.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("insert test suite", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_test_suite(&self, id: TestSuiteId) -> Result<TestSuiteRecord> {
        let row = sqlx::query("SELECT * FROM test_suites WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::backend("get test suite", e))?
            .ok_or_else(|| Error::NotFound(Resource::TestSuite, id.to_string()))?;
        Self::suite_from_row(&row)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_test_suites(&self, owner: &str) -> Result<Vec<TestSuiteRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM test_suites
             WHERE visibility = 'public' OR owner = $1
             ORDER BY created_at DESC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("list test suites", e))?;
        rows.iter().map(Self::suite_from_row).collect()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn add_test_to_suite(
        &self,
        test: TestId,
        suite: TestSuiteId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO test_memberships (test_id, test_suite_id, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (test_id, test_suite_id) DO NOTHING
            "#,
        )
        .bind(test)
        .bind(suite)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("add test to suite", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_tests_for_suite(&self, suite: TestSuiteId) -> Result<Vec<TestRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT t.*
              FROM tests t
              JOIN test_memberships m ON m.test_id = t.id
             WHERE m.test_suite_id = $1
             ORDER BY t.created_at
            "#,
        )
        .bind(suite)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("list tests for suite", e))?;
        rows.iter().map(Self::test_from_row).collect()
    }

    // ---- api keys ----

    #[tracing::instrument(level = "debug", skip(self, key))]
    pub async fn insert_api_key(&self, key: &ApiKeyRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO api_keys
                (id, secret_hash, owner, expires_at, revoked_at, last_used_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(key.id)
        .bind(&key.secret_hash)
        .bind(&key.owner)
        .bind(key.expires_at)
        .bind(key.revoked_at)
        .bind(key.last_used_at)
        .bind(key.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("insert api key", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_api_key(&self, id: ApiKeyId) -> Result<Option<ApiKeyRecord>> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::backend("get api key", e))?;
        row.as_ref().map(Self::api_key_from_row).transpose()
    }

    pub async fn touch_api_key_last_used(&self, id: ApiKeyId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::backend("touch api key", e))?;
        Ok(())
    }

    // ---- persisted diffs ----

    #[tracing::instrument(level = "debug", skip(self, diff))]
    pub async fn insert_diff(
        &self,
        environment_id: EnvironmentId,
        before_suffix: &str,
        after_suffix: &str,
        diff: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO diffs (id, environment_id, before_suffix, after_suffix, diff, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(environment_id)
        .bind(before_suffix)
        .bind(after_suffix)
        .bind(diff)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("insert diff", e))?;
        Ok(())
    }
}
