//! Mimic core library: replica isolation, snapshot diffing, and the
//! assertion DSL, shared by the HTTP surface and the CLI.

pub mod config;
pub mod error;
pub mod evaluation;
pub mod isolation;
pub mod models;
pub mod o11y;
pub mod service;
pub mod store;

pub use error::{Error, Resource, Result};
pub use evaluation::{Diff, EvalReport, EvaluationEngine, RowUpdate};
pub use isolation::{EnvTokenClaims, IsolationEngine, TokenService};
pub use models::{
    ApiKeyId, ApiKeyRecord, EnvironmentId, EnvironmentRecord, EnvironmentStatus, Impersonation,
    RunId, RunRecord, RunStatus, TemplateId, TemplateRecord, TestId, TestRecord, TestSuiteId,
    TestSuiteRecord, Visibility,
};
pub use service::{ServiceHandler, ServiceRequest, ServiceResponse};
pub use store::platform::PlatformDb;
pub use store::reflect::SchemaReflector;
pub use store::{EnvSession, Store};
