use std::error::Error as StdError;
use std::fmt;

/// Platform resources that can fail lookup. Carried on `Error::NotFound` so
/// the HTTP layer can emit resource-specific error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Template,
    Environment,
    Run,
    Test,
    TestSuite,
    Service,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resource::Template => "template",
            Resource::Environment => "environment",
            Resource::Run => "run",
            Resource::Test => "test",
            Resource::TestSuite => "test suite",
            Resource::Service => "service",
        };
        f.write_str(s)
    }
}

/// Common error type for `mimic_core`.
///
/// Store-backed implementations should preserve the underlying error chain
/// where possible via `Error::backend`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} not found: {1}")]
    NotFound(Resource, String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("invalid dsl at {path}: {reason}")]
    Dsl { path: String, reason: String },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {0}")]
    BackendMessage(String),
}

impl Error {
    pub fn backend(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Convenience: wrap a sqlx error with query context.
    pub fn backend_sqlx(context: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn dsl(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Dsl {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
