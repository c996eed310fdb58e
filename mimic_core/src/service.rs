//! The seam between the platform and fake-service implementations.
//!
//! A fake service receives a namespace-bound session plus the request and
//! may mutate rows; its business logic is its own concern. Handlers must
//! not retain the session past the request boundary: the dispatcher
//! commits or rolls it back when the handler returns.

use crate::models::Impersonation;
use crate::store::EnvSession;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub method: String,
    /// Path suffix after `/services/{name}`, passed through verbatim.
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    /// Identity the agent assumes inside the replica, from the token.
    pub impersonation: Impersonation,
}

#[derive(Debug, Clone)]
pub struct ServiceResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Bytes,
}

impl ServiceResponse {
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            body: Bytes::from(body.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// One fake service (Slack Web API, Linear GraphQL, …).
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// Registry key, also the `{service}` path segment.
    fn name(&self) -> &str;

    /// Process one request against the replica the session is bound to.
    async fn handle(
        &self,
        session: &mut EnvSession,
        request: ServiceRequest,
    ) -> Result<ServiceResponse>;
}
