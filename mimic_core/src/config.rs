use crate::{Error, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// HS256 signing secret. Must be at least 32 bytes.
    pub secret: String,
    pub audience: String,
}

/// Top-level service configuration, sourced from `MIMIC_*` env vars.
#[derive(Debug, Clone)]
pub struct MimicConfig {
    pub postgres: PostgresConfig,
    pub token: TokenConfig,
    pub default_ttl: Duration,
    pub reaper_interval: Duration,
}

const MIN_SECRET_LEN: usize = 32;

impl MimicConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("MIMIC_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| Error::InvalidInput("MIMIC_DATABASE_URL is required".to_string()))?;
        let max_connections = std::env::var("MIMIC_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);
        let acquire_timeout_ms = std::env::var("MIMIC_DB_ACQUIRE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5_000);

        let secret = std::env::var("MIMIC_TOKEN_SECRET")
            .map_err(|_| Error::InvalidInput("MIMIC_TOKEN_SECRET is required".to_string()))?;
        let audience =
            std::env::var("MIMIC_TOKEN_AUDIENCE").unwrap_or_else(|_| "mimic".to_string());

        let default_ttl_seconds = std::env::var("MIMIC_DEFAULT_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(1_800);
        let reaper_interval_ms = std::env::var("MIMIC_REAPER_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30_000);

        let cfg = Self {
            postgres: PostgresConfig {
                url,
                max_connections,
                acquire_timeout: Duration::from_millis(acquire_timeout_ms),
            },
            token: TokenConfig { secret, audience },
            default_ttl: Duration::from_secs(default_ttl_seconds),
            reaper_interval: Duration::from_millis(reaper_interval_ms),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn validate(&self) -> Result<()> {
        if self.postgres.url.trim().is_empty() {
            return Err(Error::InvalidInput("postgres.url is empty".to_string()));
        }
        if self.postgres.max_connections == 0 {
            return Err(Error::InvalidInput(
                "postgres.max_connections must be > 0".to_string(),
            ));
        }
        if self.postgres.acquire_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "postgres.acquire_timeout must be > 0".to_string(),
            ));
        }
        if self.token.secret.len() < MIN_SECRET_LEN {
            return Err(Error::InvalidInput(format!(
                "token.secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        if self.token.audience.trim().is_empty() {
            return Err(Error::InvalidInput("token.audience is empty".to_string()));
        }
        if self.default_ttl.is_zero() {
            return Err(Error::InvalidInput("default_ttl must be > 0".to_string()));
        }
        if self.reaper_interval.is_zero() {
            return Err(Error::InvalidInput(
                "reaper_interval must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> MimicConfig {
        MimicConfig {
            postgres: PostgresConfig {
                url: "postgres://localhost/mimic".into(),
                max_connections: 10,
                acquire_timeout: Duration::from_secs(5),
            },
            token: TokenConfig {
                secret: "0123456789abcdef0123456789abcdef".into(),
                audience: "mimic".into(),
            },
            default_ttl: Duration::from_secs(1800),
            reaper_interval: Duration::from_secs(30),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn short_secret_rejected() {
        let mut cfg = valid();
        cfg.token.secret = "short".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_pool_rejected() {
        let mut cfg = valid();
        cfg.postgres.max_connections = 0;
        assert!(cfg.validate().is_err());
    }
}
