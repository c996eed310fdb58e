//! Snapshot/diff/assert pipeline: take tagged snapshots of a replica,
//! compute the row-level diff, and score it against a compiled spec.

pub mod assertion;
pub mod differ;
pub mod dsl;

pub use assertion::{evaluate, AssertionFailure, EvalReport, Score};
pub use differ::{Diff, Differ, RowUpdate, ENTITY_KEY};
pub use dsl::{compile, CompiledSpec};

use crate::Result;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotTag {
    pub namespace: String,
    pub suffix: String,
}

/// Facade tying the differ, DSL compiler, and assertion engine together.
#[derive(Clone)]
pub struct EvaluationEngine {
    differ: Differ,
}

impl EvaluationEngine {
    pub fn new(differ: Differ) -> Self {
        Self { differ }
    }

    pub fn differ(&self) -> &Differ {
        &self.differ
    }

    /// Fresh suffix under a role prefix, e.g. `before_1a2b3c4d`.
    pub fn generate_suffix(prefix: &str) -> String {
        let tail = Uuid::new_v4().simple().to_string();
        format!("{prefix}_{}", &tail[..8])
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn take_before(&self, namespace: &str) -> Result<SnapshotTag> {
        self.take_snapshot(namespace, "before").await
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn take_after(&self, namespace: &str) -> Result<SnapshotTag> {
        self.take_snapshot(namespace, "after").await
    }

    async fn take_snapshot(&self, namespace: &str, prefix: &str) -> Result<SnapshotTag> {
        let suffix = Self::generate_suffix(prefix);
        self.differ.snapshot(namespace, &suffix).await?;
        Ok(SnapshotTag {
            namespace: namespace.to_string(),
            suffix,
        })
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn compute_diff(
        &self,
        namespace: &str,
        before_suffix: &str,
        after_suffix: &str,
    ) -> Result<Diff> {
        self.differ
            .diff(namespace, before_suffix, after_suffix, &[])
            .await
    }

    /// Compile the stored document, then evaluate. A malformed document
    /// fails with `dsl_invalid`; assertion mismatches are failures in the
    /// report, never errors.
    #[tracing::instrument(level = "info", skip(self, spec, diff))]
    pub fn evaluate_spec(&self, spec: &serde_json::Value, diff: &Diff) -> Result<EvalReport> {
        let compiled = dsl::compile(spec)?;
        Ok(assertion::evaluate(&compiled, diff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_suffixes_are_valid_and_distinct() {
        let a = EvaluationEngine::generate_suffix("before");
        let b = EvaluationEngine::generate_suffix("before");
        assert_ne!(a, b);
        assert!(a.starts_with("before_"));
        assert!(differ::validate_suffix(&a).is_ok());
        assert!(differ::validate_suffix(&b).is_ok());
    }
}
