use crate::auth::Principal;
use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use mimic_core::models::{TemplateId, TestId, TestRecord, TestSuiteId, TestSuiteRecord, Visibility};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct TestSuiteSummary {
    pub id: TestSuiteId,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTestSuitesResponse {
    pub test_suites: Vec<TestSuiteSummary>,
}

#[derive(Debug, Serialize)]
pub struct TestSummary {
    pub id: TestId,
    pub name: String,
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct TestSuiteDetail {
    pub id: TestSuiteId,
    pub name: String,
    pub description: String,
    pub tests: Vec<TestSummary>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTestSuiteRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTestRequest {
    pub name: String,
    pub prompt: String,
    pub template_id: TemplateId,
    /// Assertion DSL document; compiled here so bad specs fail at creation,
    /// never at evaluation.
    pub spec: serde_json::Value,
    #[serde(default)]
    pub suite_id: Option<TestSuiteId>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTestsRequest {
    pub tests: Vec<CreateTestRequest>,
}

#[derive(Debug, Serialize)]
pub struct CreateTestsResponse {
    pub tests: Vec<TestSummary>,
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> Router {
    Router::new()
        .route("/testSuites", get(list_test_suites).post(create_test_suite))
        .route("/testSuites/{suite_id}", get(get_test_suite))
        .route("/tests", post(create_tests))
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn list_test_suites(
    principal: Principal,
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<ListTestSuitesResponse>, ApiError> {
    let suites = state.platform.list_test_suites(&principal.owner).await?;
    Ok(Json(ListTestSuitesResponse {
        test_suites: suites
            .into_iter()
            .map(|s| TestSuiteSummary {
                id: s.id,
                name: s.name,
                description: s.description,
            })
            .collect(),
    }))
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn create_test_suite(
    principal: Principal,
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<CreateTestSuiteRequest>,
) -> Result<(StatusCode, Json<TestSuiteSummary>), ApiError> {
    let suite = TestSuiteRecord {
        id: TestSuiteId::new(),
        name: req.name,
        description: req.description.unwrap_or_default(),
        owner: principal.owner,
        visibility: req.visibility.unwrap_or(Visibility::Private),
        created_at: Utc::now(),
    };
    state.platform.insert_test_suite(&suite).await?;
    Ok((
        StatusCode::CREATED,
        Json(TestSuiteSummary {
            id: suite.id,
            name: suite.name,
            description: suite.description,
        }),
    ))
}

#[tracing::instrument(level = "debug", skip_all, fields(suite_id = %suite_id))]
pub async fn get_test_suite(
    _principal: Principal,
    Extension(state): Extension<Arc<AppState>>,
    Path(suite_id): Path<TestSuiteId>,
) -> Result<Json<TestSuiteDetail>, ApiError> {
    let suite = state.platform.get_test_suite(suite_id).await?;
    let tests = state.platform.list_tests_for_suite(suite_id).await?;
    Ok(Json(TestSuiteDetail {
        id: suite.id,
        name: suite.name,
        description: suite.description,
        tests: tests
            .into_iter()
            .map(|t| TestSummary {
                id: t.id,
                name: t.name,
                prompt: t.prompt,
            })
            .collect(),
    }))
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn create_tests(
    _principal: Principal,
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<CreateTestsRequest>,
) -> Result<(StatusCode, Json<CreateTestsResponse>), ApiError> {
    let mut created = Vec::with_capacity(req.tests.len());
    for test_req in req.tests {
        // Reject bad DSL up front; the stored spec stays in wire form.
        mimic_core::evaluation::compile(&test_req.spec)?;

        // Template must exist before tests can point at it.
        state.platform.get_template(test_req.template_id).await?;

        let test = TestRecord {
            id: TestId::new(),
            name: test_req.name,
            prompt: test_req.prompt,
            template_id: test_req.template_id,
            spec: test_req.spec,
            created_at: Utc::now(),
        };
        state.platform.insert_test(&test).await?;
        if let Some(suite_id) = test_req.suite_id {
            state
                .platform
                .add_test_to_suite(test.id, suite_id, Utc::now())
                .await?;
        }
        created.push(TestSummary {
            id: test.id,
            name: test.name,
            prompt: test.prompt,
        });
    }
    Ok((StatusCode::CREATED, Json(CreateTestsResponse { tests: created })))
}
