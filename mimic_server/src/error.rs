use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mimic_core::{Error as CoreError, Resource};
use serde::Serialize;

/// Wire envelope for every platform-level error.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: &'static str,
    pub detail: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Core(#[from] CoreError),

    #[error("invalid environment path: {0}")]
    InvalidEnvironmentPath(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ApiError {
    /// Stable machine-readable code for the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidEnvironmentPath(_) => "invalid_environment_path",
            ApiError::InvalidInput(_) => "invalid_request",
            ApiError::Core(err) => match err {
                CoreError::Unauthorized(_) => "not_authed",
                CoreError::NotFound(Resource::Environment, _) => "environment_not_found",
                CoreError::NotFound(Resource::Template, _) => "template_not_found",
                CoreError::NotFound(Resource::Run, _) => "run_not_found",
                CoreError::NotFound(Resource::Test, _) => "test_not_found",
                CoreError::NotFound(Resource::TestSuite, _) => "suite_not_found",
                CoreError::NotFound(Resource::Service, _) => "service_not_found",
                CoreError::Dsl { .. } => "invalid_dsl",
                CoreError::InvalidInput(_) => "invalid_request",
                CoreError::Conflict(_) => "conflict",
                CoreError::PreconditionFailed(_) => "precondition_failed",
                CoreError::Timeout(_) => "timeout",
                CoreError::Backend { .. } | CoreError::BackendMessage(_) => "internal_error",
            },
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidEnvironmentPath(_) | ApiError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Core(err) => match err {
                CoreError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                CoreError::NotFound(_, _) => StatusCode::NOT_FOUND,
                CoreError::Dsl { .. } | CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                CoreError::Conflict(_) => StatusCode::CONFLICT,
                CoreError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
                CoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                CoreError::Backend { .. } | CoreError::BackendMessage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            ok: false,
            error: self.code(),
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_envelope_codes() {
        let cases: Vec<(ApiError, &str)> = vec![
            (
                CoreError::Unauthorized("missing key".into()).into(),
                "not_authed",
            ),
            (
                CoreError::NotFound(Resource::Environment, "e".into()).into(),
                "environment_not_found",
            ),
            (
                CoreError::NotFound(Resource::Template, "t".into()).into(),
                "template_not_found",
            ),
            (
                CoreError::NotFound(Resource::Run, "r".into()).into(),
                "run_not_found",
            ),
            (
                CoreError::dsl("assertions/0", "bad").into(),
                "invalid_dsl",
            ),
            (
                CoreError::Conflict("suffix in use".into()).into(),
                "conflict",
            ),
            (
                CoreError::PreconditionFailed("already evaluated".into()).into(),
                "precondition_failed",
            ),
            (
                CoreError::BackendMessage("boom".into()).into(),
                "internal_error",
            ),
            (
                ApiError::InvalidEnvironmentPath("nope".into()),
                "invalid_environment_path",
            ),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn status_codes_match_semantics() {
        let unauthorized: ApiError = CoreError::Unauthorized("x".into()).into();
        assert_eq!(unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        let missing: ApiError = CoreError::NotFound(Resource::Run, "x".into()).into();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        let conflict: ApiError = CoreError::Conflict("x".into()).into();
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);
    }
}
