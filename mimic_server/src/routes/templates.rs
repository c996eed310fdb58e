use crate::auth::Principal;
use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use mimic_core::isolation::FreezeEnvironment;
use mimic_core::models::{EnvironmentId, TemplateId, Visibility};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct TemplateSummary {
    pub id: TemplateId,
    pub service: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListTemplatesResponse {
    pub templates: Vec<TemplateSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateFromEnvRequest {
    pub environment_id: EnvironmentId,
    pub service: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateTemplateResponse {
    pub id: TemplateId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub service: String,
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> Router {
    Router::new()
        .route("/templates", get(list_templates))
        .route("/templates/fromEnv", post(create_template_from_env))
        .route("/templates/{template_id}", get(get_template))
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn list_templates(
    principal: Principal,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ListTemplatesResponse>, ApiError> {
    let templates = state.platform.list_templates(&principal.owner).await?;
    Ok(Json(ListTemplatesResponse {
        templates: templates
            .into_iter()
            .map(|t| TemplateSummary {
                id: t.id,
                service: t.service,
                name: t.name,
                description: t.description,
            })
            .collect(),
    }))
}

#[tracing::instrument(level = "debug", skip_all, fields(template_id = %template_id))]
pub async fn get_template(
    _principal: Principal,
    Extension(state): Extension<Arc<AppState>>,
    Path(template_id): Path<TemplateId>,
) -> Result<Json<TemplateSummary>, ApiError> {
    let t = state.platform.get_template(template_id).await?;
    Ok(Json(TemplateSummary {
        id: t.id,
        service: t.service,
        name: t.name,
        description: t.description,
    }))
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn create_template_from_env(
    principal: Principal,
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<CreateTemplateFromEnvRequest>,
) -> Result<(StatusCode, Json<CreateTemplateResponse>), ApiError> {
    let template = state
        .isolation
        .freeze_environment(FreezeEnvironment {
            environment_id: req.environment_id,
            service: req.service,
            name: req.name,
            description: req.description,
            visibility: req.visibility.unwrap_or(Visibility::Private),
            version: req.version.unwrap_or_else(|| "v1".to_string()),
            owner: principal.owner,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateTemplateResponse {
            id: template.id,
            name: template.name,
            description: template.description,
            service: template.service,
        }),
    ))
}
