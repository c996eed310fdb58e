//! Agent-facing dispatcher: `…/env/{env_id}/services/{service}/{*rest}`.
//!
//! Each request authenticates with the environment token, gets a session
//! bound to the replica's namespace, and is handed to the registered fake
//! service. The session commits only when the service responds success;
//! every other exit path rolls back and releases it.

use crate::error::ApiError;
use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::Path;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use axum::routing::any;
use axum::{Extension, Router};
use mimic_core::models::EnvironmentId;
use mimic_core::{Error as CoreError, ServiceRequest};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const DEADLINE_HEADER: &str = "x-request-deadline-ms";

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> Router {
    Router::new()
        .route("/{env_id}/services/{service}", any(dispatch_root))
        .route("/{env_id}/services/{service}/{*rest}", any(dispatch))
}

async fn dispatch_root(
    method: Method,
    Path((env_id, service)): Path<(String, String)>,
    headers: HeaderMap,
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    dispatch_inner(state, method, env_id, service, String::new(), headers, body).await
}

async fn dispatch(
    method: Method,
    Path((env_id, service, rest)): Path<(String, String, String)>,
    headers: HeaderMap,
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    dispatch_inner(state, method, env_id, service, rest, headers, body).await
}

#[tracing::instrument(level = "info", skip(state, headers, body), fields(env_id = %env_id, service = %service))]
async fn dispatch_inner(
    state: Arc<AppState>,
    method: Method,
    env_id: String,
    service: String,
    rest: String,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let env_id: EnvironmentId = env_id
        .parse()
        .map_err(|_| ApiError::InvalidEnvironmentPath(env_id))?;

    let token = bearer_token(&headers)?;
    let claims = state.tokens.decode(token)?;
    if claims.environment_id != env_id {
        return Err(CoreError::Unauthorized(
            "token is not bound to this environment".to_string(),
        )
        .into());
    }

    // Ready + unexpired, or the environment is gone from the agent's
    // point of view.
    let mut session = state.isolation.session_for_environment(env_id).await?;
    let handler = state.services.get(&service)?;

    let request = ServiceRequest {
        method: method.to_string(),
        path: format!("/{rest}"),
        headers: plain_headers(&headers),
        body,
        impersonation: claims.impersonation(),
    };

    let outcome = match request_deadline(&headers) {
        Some(deadline) => {
            match tokio::time::timeout(deadline, handler.handle(&mut session, request)).await {
                Ok(res) => res,
                Err(_) => {
                    // Drop aborts the in-flight query and releases the session.
                    drop(session);
                    return Err(CoreError::Timeout(format!(
                        "service {service} exceeded request deadline"
                    ))
                    .into());
                }
            }
        }
        None => handler.handle(&mut session, request).await,
    };

    match outcome {
        Ok(resp) => {
            if resp.is_success() {
                session.commit().await?;
            } else {
                session.rollback().await?;
            }
            let mut builder = Response::builder()
                .status(StatusCode::from_u16(resp.status).unwrap_or(StatusCode::OK));
            if !resp.content_type.is_empty() {
                builder = builder.header(CONTENT_TYPE, resp.content_type.as_str());
            }
            builder
                .body(axum::body::Body::from(resp.body))
                .map_err(|e| CoreError::backend("build service response", e).into())
        }
        Err(e) => {
            session.rollback().await?;
            Err(e.into())
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let raw = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| ApiError::Core(CoreError::Unauthorized("missing bearer token".to_string())))?
        .to_str()
        .map_err(|_| {
            ApiError::Core(CoreError::Unauthorized(
                "invalid authorization header".to_string(),
            ))
        })?;
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .map(str::trim)
        .ok_or_else(|| {
            ApiError::Core(CoreError::Unauthorized(
                "unsupported authorization scheme".to_string(),
            ))
        })
}

fn plain_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn request_deadline(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(DEADLINE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def");

        headers.insert(AUTHORIZATION, "bearer  xyz ".parse().unwrap());
        assert_eq!(bearer_token(&headers).unwrap(), "xyz");

        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(bearer_token(&headers).is_err());

        assert!(bearer_token(&HeaderMap::new()).is_err());
    }

    #[test]
    fn deadline_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_deadline(&headers), None);
        headers.insert(DEADLINE_HEADER, "2500".parse().unwrap());
        assert_eq!(request_deadline(&headers), Some(Duration::from_millis(2500)));
        headers.insert(DEADLINE_HEADER, "soon".parse().unwrap());
        assert_eq!(request_deadline(&headers), None);
    }
}
