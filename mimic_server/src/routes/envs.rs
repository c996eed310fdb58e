use crate::auth::Principal;
use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use mimic_core::isolation::CreateEnvironment;
use mimic_core::models::{EnvironmentId, Impersonation, TemplateId, TestId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitEnvRequest {
    #[serde(default)]
    pub template_service: Option<String>,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    #[serde(default)]
    pub test_id: Option<TestId>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub impersonate_user_id: Option<String>,
    #[serde(default)]
    pub impersonate_email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitEnvResponse {
    pub environment_id: EnvironmentId,
    pub environment_url: String,
    pub expires_at: DateTime<Utc>,
    pub schema_name: String,
    pub service: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteEnvResponse {
    pub environment_id: EnvironmentId,
    pub status: &'static str,
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> Router {
    Router::new()
        .route("/initEnv", post(init_env))
        .route("/env/{env_id}", delete(delete_env))
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn init_env(
    principal: Principal,
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<InitEnvRequest>,
) -> Result<(StatusCode, Json<InitEnvResponse>), ApiError> {
    let template = resolve_template(&state, &principal, &req).await?;
    let ttl = req
        .ttl_seconds
        .map(Duration::from_secs)
        .unwrap_or(state.default_ttl);

    let env = state
        .isolation
        .create_environment(CreateEnvironment {
            template: template.clone(),
            ttl,
            owner: principal.owner.clone(),
            impersonation: Impersonation {
                user_id: req.impersonate_user_id,
                email: req.impersonate_email,
            },
        })
        .await?;

    let token = state.tokens.issue(&env, &principal.owner)?;

    Ok((
        StatusCode::CREATED,
        Json(InitEnvResponse {
            environment_id: env.environment_id,
            environment_url: format!("/api/env/{}", env.environment_id),
            expires_at: env.expires_at,
            schema_name: env.schema_name,
            service: template.service,
            token,
        }),
    ))
}

/// Resolution order: explicit template id, then `(service, name)`, then the
/// template of the referenced test.
async fn resolve_template(
    state: &AppState,
    principal: &Principal,
    req: &InitEnvRequest,
) -> Result<mimic_core::TemplateRecord, ApiError> {
    if let Some(id) = req.template_id {
        return Ok(state.platform.get_template(id).await?);
    }
    if let (Some(service), Some(name)) = (&req.template_service, &req.template_name) {
        return Ok(state
            .platform
            .find_template(service, name, &principal.owner)
            .await?);
    }
    if let Some(test_id) = req.test_id {
        let test = state.platform.get_test(test_id).await?;
        return Ok(state.platform.get_template(test.template_id).await?);
    }
    Err(ApiError::InvalidInput(
        "one of templateId, (templateService + templateName), or testId is required".to_string(),
    ))
}

#[tracing::instrument(level = "info", skip_all, fields(env_id = %env_id))]
pub async fn delete_env(
    _principal: Principal,
    Extension(state): Extension<Arc<AppState>>,
    Path(env_id): Path<String>,
) -> Result<Json<DeleteEnvResponse>, ApiError> {
    let env_id: EnvironmentId = env_id
        .parse()
        .map_err(|_| ApiError::InvalidEnvironmentPath(env_id))?;
    state.isolation.delete_environment(env_id).await?;
    Ok(Json(DeleteEnvResponse {
        environment_id: env_id,
        status: "deleted",
    }))
}
