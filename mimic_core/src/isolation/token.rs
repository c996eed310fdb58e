//! Environment tokens: short-lived HS256 credentials binding an agent to
//! one replica.
//!
//! The token carries everything the service dispatcher needs on the hot
//! path (environment id, impersonation identity); expiry equals the
//! environment's `expires_at`, so platform-side revocation is implicit in
//! environment deletion.

use crate::config::TokenConfig;
use crate::models::{EnvironmentId, EnvironmentRecord, Impersonation};
use crate::{Error, Result};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvTokenClaims {
    /// Caller the token was issued to (api-key owner).
    pub sub: String,
    pub environment_id: EnvironmentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonate_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonate_email: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub aud: String,
    pub jti: String,
}

impl EnvTokenClaims {
    pub fn impersonation(&self) -> Impersonation {
        Impersonation {
            user_id: self.impersonate_user_id.clone(),
            email: self.impersonate_email.clone(),
        }
    }
}

#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    audience: String,
}

impl TokenService {
    pub fn new(cfg: &TokenConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            audience: cfg.audience.clone(),
        }
    }

    /// Issue a token for an environment; expiry tracks the environment's.
    #[tracing::instrument(level = "debug", skip(self, env), fields(environment_id = %env.environment_id))]
    pub fn issue(&self, env: &EnvironmentRecord, subject: &str) -> Result<String> {
        let claims = EnvTokenClaims {
            sub: subject.to_string(),
            environment_id: env.environment_id,
            impersonate_user_id: env.impersonation.user_id.clone(),
            impersonate_email: env.impersonation.email.clone(),
            iat: env.created_at.timestamp(),
            exp: env.expires_at.timestamp(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4().simple().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::backend("encode environment token", e))
    }

    /// Verify signature, expiry, and audience.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn decode(&self, token: &str) -> Result<EnvTokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "aud"]);

        let data = decode::<EnvTokenClaims>(token, &self.decoding, &validation).map_err(|e| {
            if e.kind() == &jsonwebtoken::errors::ErrorKind::ExpiredSignature {
                Error::Unauthorized("environment token expired".to_string())
            } else {
                Error::Unauthorized(format!("invalid environment token: {e}"))
            }
        })?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnvironmentStatus, TemplateId};
    use chrono::{Duration, Utc};

    fn service() -> TokenService {
        TokenService::new(&TokenConfig {
            secret: "unit-test-secret-unit-test-secret".to_string(),
            audience: "mimic".to_string(),
        })
    }

    fn env(expires_in: Duration) -> EnvironmentRecord {
        let now = Utc::now();
        EnvironmentRecord {
            environment_id: EnvironmentId::new(),
            schema_name: "state_test".into(),
            template_id: TemplateId::new(),
            owner: "tester".into(),
            impersonation: Impersonation {
                user_id: Some("U123".into()),
                email: Some("agent@example.com".into()),
            },
            status: EnvironmentStatus::Ready,
            created_at: now,
            expires_at: now + expires_in,
            last_used_at: None,
        }
    }

    #[test]
    fn issue_decode_round_trip() {
        let svc = service();
        let env = env(Duration::hours(1));
        let token = svc.issue(&env, "key-owner").unwrap();
        let claims = svc.decode(&token).unwrap();
        assert_eq!(claims.environment_id, env.environment_id);
        assert_eq!(claims.sub, "key-owner");
        assert_eq!(claims.impersonation().user_id.as_deref(), Some("U123"));
        assert_eq!(claims.exp, env.expires_at.timestamp());
    }

    #[test]
    fn expired_token_rejected() {
        let svc = service();
        let env = env(Duration::hours(-1));
        let token = svc.issue(&env, "key-owner").unwrap();
        let err = svc.decode(&token).unwrap_err();
        assert!(matches!(err, Error::Unauthorized(msg) if msg.contains("expired")));
    }

    #[test]
    fn wrong_audience_rejected() {
        let svc = service();
        let env = env(Duration::hours(1));
        let token = svc.issue(&env, "key-owner").unwrap();

        let other = TokenService::new(&TokenConfig {
            secret: "unit-test-secret-unit-test-secret".to_string(),
            audience: "someone-else".to_string(),
        });
        assert!(other.decode(&token).is_err());
    }

    #[test]
    fn tampered_token_rejected() {
        let svc = service();
        let env = env(Duration::hours(1));
        let mut token = svc.issue(&env, "key-owner").unwrap();
        token.push('x');
        assert!(svc.decode(&token).is_err());
    }
}
