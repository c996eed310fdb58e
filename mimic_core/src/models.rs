use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdParseError {
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let id =
                    Uuid::parse_str(s).map_err(|_| IdParseError::InvalidUuid(s.to_string()))?;
                Ok(Self(id))
            }
        }
    };
}

uuid_id!(
    /// A live replica environment.
    EnvironmentId
);
uuid_id!(
    /// A registered template (frozen namespace + seed data).
    TemplateId
);
uuid_id!(
    /// A start→mutate→diff→evaluate cycle anchored to an environment.
    RunId
);
uuid_id!(
    /// A single test: prompt + template + expected-diff spec.
    TestId
);
uuid_id!(
    /// A named collection of tests.
    TestSuiteId
);
uuid_id!(
    /// A platform API key.
    ApiKeyId
);

impl EnvironmentId {
    /// Namespace derived from the id, e.g. `state_4f1c…` (32 hex chars).
    pub fn namespace(&self) -> String {
        format!("state_{}", self.0.simple())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentStatus {
    Ready,
    Deleting,
    Deleted,
}

impl EnvironmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentStatus::Ready => "ready",
            EnvironmentStatus::Deleting => "deleting",
            EnvironmentStatus::Deleted => "deleted",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(EnvironmentStatus::Ready),
            "deleting" => Some(EnvironmentStatus::Deleting),
            "deleted" => Some(EnvironmentStatus::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Evaluated,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Evaluated => "evaluated",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "evaluated" => Some(RunStatus::Evaluated),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Visibility::Public),
            "private" => Some(Visibility::Private),
            _ => None,
        }
    }
}

/// Identity an agent assumes inside a replica. Propagated opaquely from
/// environment creation through the token into service handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Impersonation {
    pub user_id: Option<String>,
    pub email: Option<String>,
}

impl Impersonation {
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.email.is_none()
    }
}

/// A registered template: a frozen namespace whose structure + rows stamp
/// new environments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub id: TemplateId,
    /// Service the template replicates ("slack", "linear", …).
    pub service: String,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub visibility: Visibility,
    pub owner: Option<String>,
    /// Namespace holding the frozen structure + seed rows.
    pub schema_name: String,
    pub created_at: DateTime<Utc>,
}

/// Mutable record of a live replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub environment_id: EnvironmentId,
    pub schema_name: String,
    pub template_id: TemplateId,
    pub owner: String,
    pub impersonation: Impersonation,
    pub status: EnvironmentStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl EnvironmentRecord {
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub environment_id: EnvironmentId,
    pub test_id: Option<TestId>,
    pub suite_id: Option<TestSuiteId>,
    pub status: RunStatus,
    pub before_suffix: String,
    pub after_suffix: Option<String>,
    pub passed: Option<bool>,
    /// Persisted evaluation result: `{passed, score, failures, diff}`.
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub id: TestId,
    pub name: String,
    pub prompt: String,
    pub template_id: TemplateId,
    /// Assertion DSL document evaluated against the run's diff.
    pub spec: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuiteRecord {
    pub id: TestSuiteId,
    pub name: String,
    pub description: String,
    pub owner: String,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: ApiKeyId,
    pub secret_hash: String,
    pub owner: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_namespace_uses_simple_hex() {
        let id = EnvironmentId(Uuid::nil());
        assert_eq!(id.namespace(), format!("state_{}", "0".repeat(32)));
    }

    #[test]
    fn id_round_trips_through_str() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!(RunId::from_str("not-a-uuid").is_err());
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [
            EnvironmentStatus::Ready,
            EnvironmentStatus::Deleting,
            EnvironmentStatus::Deleted,
        ] {
            assert_eq!(EnvironmentStatus::parse_str(s.as_str()), Some(s));
        }
        assert_eq!(EnvironmentStatus::parse_str("bogus"), None);
        for s in [RunStatus::Running, RunStatus::Evaluated] {
            assert_eq!(RunStatus::parse_str(s.as_str()), Some(s));
        }
    }

    #[test]
    fn expiry_is_strict() {
        let now = Utc::now();
        let mut env = EnvironmentRecord {
            environment_id: EnvironmentId::new(),
            schema_name: "state_x".into(),
            template_id: TemplateId::new(),
            owner: "tester".into(),
            impersonation: Impersonation::default(),
            status: EnvironmentStatus::Ready,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(60),
            last_used_at: None,
        };
        assert!(!env.expired(now));
        env.expires_at = now - chrono::Duration::seconds(1);
        assert!(env.expired(now));
    }
}
