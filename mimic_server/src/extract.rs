use crate::auth::Principal;
use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use mimic_core::Error as CoreError;
use std::future::Future;
use std::sync::Arc;

/// Extracts and authenticates the platform caller. Every platform route
/// takes this; missing or bad keys reject before the handler runs.
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let state = parts.extensions.get::<Arc<AppState>>().cloned();
        let headers = parts.headers.clone();
        async move {
            let state = state.ok_or_else(|| {
                ApiError::Core(CoreError::BackendMessage(
                    "app state missing from request extensions".to_string(),
                ))
            })?;
            state.auth.authenticate(&headers).await
        }
    }
}
