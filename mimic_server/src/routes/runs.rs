use crate::auth::Principal;
use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use mimic_core::evaluation::{Diff, Score};
use mimic_core::models::{EnvironmentId, RunId, RunRecord, RunStatus, TestId, TestSuiteId};
use mimic_core::{Error as CoreError, Resource};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    pub env_id: EnvironmentId,
    #[serde(default)]
    pub test_id: Option<TestId>,
    #[serde(default)]
    pub suite_id: Option<TestSuiteId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunResponse {
    pub run_id: RunId,
    pub status: &'static str,
    pub before_snapshot: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffRunRequest {
    #[serde(default)]
    pub run_id: Option<RunId>,
    #[serde(default)]
    pub env_id: Option<EnvironmentId>,
    #[serde(default)]
    pub before_suffix: Option<String>,
    /// Re-snapshot the `after` side even when one already exists.
    #[serde(default)]
    pub recompute: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffRunResponse {
    pub before_snapshot: String,
    pub after_snapshot: String,
    pub diff: Diff,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRunRequest {
    pub run_id: RunId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRunResponse {
    pub run_id: RunId,
    pub status: &'static str,
    pub passed: bool,
    pub score: Score,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResultResponse {
    pub run_id: RunId,
    pub status: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<serde_json::Value>,
    pub failures: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> Router {
    Router::new()
        .route("/startRun", post(start_run))
        .route("/diffRun", post(diff_run))
        .route("/evaluateRun", post(evaluate_run))
        .route("/results/{run_id}", get(get_results))
}

#[tracing::instrument(level = "info", skip_all, fields(env_id = %req.env_id))]
pub async fn start_run(
    _principal: Principal,
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<StartRunResponse>), ApiError> {
    let env = state.isolation.lookup_ready(req.env_id).await?;

    if let Some(test_id) = req.test_id {
        state.platform.get_test(test_id).await?;
    }
    if let Some(running) = state.platform.find_running_run(req.env_id).await? {
        return Err(CoreError::Conflict(format!(
            "environment {} already has running run {}",
            req.env_id, running.run_id
        ))
        .into());
    }

    let before = state.evaluation.take_before(&env.schema_name).await?;
    let now = Utc::now();
    let run = RunRecord {
        run_id: RunId::new(),
        environment_id: req.env_id,
        test_id: req.test_id,
        suite_id: req.suite_id,
        status: RunStatus::Running,
        before_suffix: before.suffix.clone(),
        after_suffix: None,
        passed: None,
        result: None,
        created_at: now,
        updated_at: now,
    };
    state.platform.insert_run(&run).await?;

    Ok((
        StatusCode::CREATED,
        Json(StartRunResponse {
            run_id: run.run_id,
            status: "running",
            before_snapshot: before.suffix,
        }),
    ))
}

/// Snapshot the `after` side and compute the diff. Never touches
/// assertions. Re-diffing an existing run reuses its `after` snapshot
/// unless `recompute` is set.
#[tracing::instrument(level = "info", skip_all)]
pub async fn diff_run(
    _principal: Principal,
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<DiffRunRequest>,
) -> Result<Json<DiffRunResponse>, ApiError> {
    let run = match (req.run_id, req.env_id) {
        (Some(run_id), _) => Some(state.platform.get_run(run_id).await?),
        (None, Some(env_id)) => state.platform.find_running_run(env_id).await?,
        (None, None) => {
            return Err(ApiError::InvalidInput(
                "one of runId or envId is required".to_string(),
            ));
        }
    };

    let (env_id, before_suffix) = match (&run, &req.before_suffix) {
        (_, Some(explicit)) => {
            let env_id = run
                .as_ref()
                .map(|r| r.environment_id)
                .or(req.env_id)
                .ok_or_else(|| {
                    ApiError::InvalidInput("envId is required with beforeSuffix".to_string())
                })?;
            (env_id, explicit.clone())
        }
        (Some(run), None) => (run.environment_id, run.before_suffix.clone()),
        (None, None) => {
            return Err(CoreError::NotFound(
                Resource::Run,
                "no running run for environment".to_string(),
            )
            .into());
        }
    };

    let env = state.isolation.lookup_ready(env_id).await?;

    let after_suffix = match run
        .as_ref()
        .and_then(|r| r.after_suffix.clone())
        .filter(|_| !req.recompute)
    {
        Some(existing) => existing,
        None => {
            let after = state.evaluation.take_after(&env.schema_name).await?;
            if let Some(run) = &run {
                state
                    .platform
                    .set_run_after_suffix(run.run_id, &after.suffix, Utc::now())
                    .await?;
            }
            after.suffix
        }
    };

    let diff = state
        .evaluation
        .compute_diff(&env.schema_name, &before_suffix, &after_suffix)
        .await?;

    // Persisted off the hot path; survives environment teardown.
    let diff_value = serde_json::to_value(&diff)
        .map_err(|e| CoreError::backend("serialize diff", e))?;
    state
        .platform
        .insert_diff(env_id, &before_suffix, &after_suffix, &diff_value, Utc::now())
        .await?;

    Ok(Json(DiffRunResponse {
        before_snapshot: before_suffix,
        after_snapshot: after_suffix,
        diff,
    }))
}

/// Diff (taking the `after` snapshot if the run has none yet), compile the
/// run's test spec, evaluate, and persist the outcome on the run.
#[tracing::instrument(level = "info", skip_all, fields(run_id = %req.run_id))]
pub async fn evaluate_run(
    _principal: Principal,
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<EvaluateRunRequest>,
) -> Result<Json<EvaluateRunResponse>, ApiError> {
    let run = state.platform.get_run(req.run_id).await?;
    if run.status == RunStatus::Evaluated {
        return Err(CoreError::PreconditionFailed(format!(
            "run {} already evaluated",
            run.run_id
        ))
        .into());
    }
    let test_id = run.test_id.ok_or_else(|| {
        CoreError::PreconditionFailed(format!("run {} has no test to evaluate", run.run_id))
    })?;
    let test = state.platform.get_test(test_id).await?;
    let env = state.isolation.lookup_ready(run.environment_id).await?;

    let after_suffix = match &run.after_suffix {
        Some(existing) => existing.clone(),
        None => {
            let after = state.evaluation.take_after(&env.schema_name).await?;
            state
                .platform
                .set_run_after_suffix(run.run_id, &after.suffix, Utc::now())
                .await?;
            after.suffix
        }
    };

    let diff = state
        .evaluation
        .compute_diff(&env.schema_name, &run.before_suffix, &after_suffix)
        .await?;
    let report = state.evaluation.evaluate_spec(&test.spec, &diff)?;

    let result = json!({
        "passed": report.passed,
        "score": report.score,
        "failures": report.failures,
        "diff": diff,
    });
    state
        .platform
        .finish_run(run.run_id, report.passed, &result, Utc::now())
        .await?;

    Ok(Json(EvaluateRunResponse {
        run_id: run.run_id,
        status: "evaluated",
        passed: report.passed,
        score: report.score,
    }))
}

#[tracing::instrument(level = "debug", skip_all, fields(run_id = %run_id))]
pub async fn get_results(
    _principal: Principal,
    Extension(state): Extension<Arc<AppState>>,
    Path(run_id): Path<RunId>,
) -> Result<Json<RunResultResponse>, ApiError> {
    let run = state.platform.get_run(run_id).await?;
    let result = run.result.unwrap_or(serde_json::Value::Null);
    Ok(Json(RunResultResponse {
        run_id: run.run_id,
        status: run.status.as_str().to_string(),
        passed: run.passed.unwrap_or(false),
        score: result.get("score").cloned(),
        failures: result
            .get("failures")
            .cloned()
            .unwrap_or_else(|| json!([])),
        diff: result.get("diff").cloned(),
        created_at: run.created_at,
    }))
}
