use crate::error::ApiError;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use chrono::Utc;
use mimic_core::models::{ApiKeyId, ApiKeyRecord};
use mimic_core::{Error as CoreError, PlatformDb};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Every presentable key starts with this, so keys are recognizable in
/// logs and support tickets without revealing anything.
pub const KEY_PREFIX: &str = "mmc_";

/// Authenticated platform caller.
#[derive(Debug, Clone)]
pub struct Principal {
    pub key_id: ApiKeyId,
    pub owner: String,
}

/// The presentation form of a platform key: `mmc_<uuid>.<secret>`.
///
/// The id half addresses the stored record; the secret half never touches
/// the database in the clear.
#[derive(Debug, Clone)]
pub struct PresentedKey {
    pub id: ApiKeyId,
    secret: String,
}

impl PresentedKey {
    /// Parse a presented token. The prefix is mandatory and the secret
    /// must be non-empty; anything else is indistinguishable from garbage.
    pub fn parse(token: &str) -> Option<Self> {
        let body = token.trim().strip_prefix(KEY_PREFIX)?;
        let (id, secret) = body.split_once('.')?;
        let id: ApiKeyId = id.parse().ok()?;
        let secret = secret.trim();
        (!secret.is_empty()).then(|| Self {
            id,
            secret: secret.to_string(),
        })
    }

    pub fn render(id: ApiKeyId, secret: &str) -> String {
        format!("{KEY_PREFIX}{id}.{secret}")
    }

    pub fn secret_hash(&self) -> String {
        hash_secret(&self.secret)
    }
}

/// Lowercase hex sha256 of the secret; the only form the store sees.
fn hash_secret(secret: &str) -> String {
    Sha256::digest(secret.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Validates `X-API-Key` / `Authorization` keys against the platform store.
#[derive(Clone)]
pub struct ApiKeyAuth {
    platform: PlatformDb,
}

impl ApiKeyAuth {
    pub fn new(platform: PlatformDb) -> Self {
        Self { platform }
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, ApiError> {
        let raw = headers
            .get("x-api-key")
            .or_else(|| headers.get(AUTHORIZATION))
            .ok_or_else(|| {
                ApiError::Core(CoreError::Unauthorized("missing api key".to_string()))
            })?
            .to_str()
            .map_err(|_| {
                ApiError::Core(CoreError::Unauthorized("invalid api key header".to_string()))
            })?;

        let token = raw
            .strip_prefix("Bearer ")
            .or_else(|| raw.strip_prefix("bearer "))
            .unwrap_or(raw)
            .trim();

        let presented = PresentedKey::parse(token).ok_or_else(|| {
            ApiError::Core(CoreError::Unauthorized("invalid api key format".to_string()))
        })?;

        let Some(rec) = self.platform.get_api_key(presented.id).await? else {
            return Err(ApiError::Core(CoreError::Unauthorized(
                "invalid api key".to_string(),
            )));
        };

        if rec.revoked_at.is_some() {
            return Err(ApiError::Core(CoreError::Unauthorized(
                "api key revoked".to_string(),
            )));
        }
        if let Some(exp) = rec.expires_at {
            if exp < Utc::now() {
                return Err(ApiError::Core(CoreError::Unauthorized(
                    "api key expired".to_string(),
                )));
            }
        }

        if presented.secret_hash() != rec.secret_hash {
            return Err(ApiError::Core(CoreError::Unauthorized(
                "invalid api key".to_string(),
            )));
        }

        // Failures recording last use never block the request.
        let _ = self
            .platform
            .touch_api_key_last_used(presented.id, Utc::now())
            .await;

        Ok(Principal {
            key_id: rec.id,
            owner: rec.owner,
        })
    }
}

/// Mint a fresh key record plus the one-time presentable token.
pub fn generate_api_key(
    owner: &str,
    expires_at: Option<chrono::DateTime<Utc>>,
) -> (ApiKeyRecord, String) {
    let secret: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(40)
        .map(char::from)
        .collect();
    let record = ApiKeyRecord {
        id: ApiKeyId::new(),
        secret_hash: hash_secret(&secret),
        owner: owner.to_string(),
        expires_at,
        revoked_at: None,
        last_used_at: None,
        created_at: Utc::now(),
    };
    let token = PresentedKey::render(record.id, &secret);
    (record, token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_format_round_trips() {
        let (record, token) = generate_api_key("tester", None);
        let presented = PresentedKey::parse(&token).unwrap();
        assert_eq!(presented.id, record.id);
        assert_eq!(presented.secret_hash(), record.secret_hash);
    }

    #[test]
    fn prefix_is_mandatory() {
        let id = ApiKeyId::new();
        assert!(PresentedKey::parse(&format!("{id}.topsecret")).is_none());
        assert!(PresentedKey::parse(&PresentedKey::render(id, "topsecret")).is_some());
    }

    #[test]
    fn malformed_tokens_rejected() {
        assert!(PresentedKey::parse("mmc_not-a-uuid.secret").is_none());
        assert!(PresentedKey::parse("mmc_nosecret").is_none());
        let id = ApiKeyId::new();
        assert!(PresentedKey::parse(&format!("mmc_{id}.")).is_none());
        assert!(PresentedKey::parse("").is_none());
    }

    #[test]
    fn secret_hash_is_stable() {
        assert_eq!(
            hash_secret("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
