//! Evaluate a compiled assertion spec against a computed diff.
//!
//! Evaluation is a pure function of `(compiled_spec, diff)`: no store
//! access, no clock. Semantic mismatches become failures in the report,
//! never errors.

use super::differ::{Diff, RowUpdate, ENTITY_KEY};
use super::dsl::{json_get, Assertion, CompiledSpec, DiffType};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionFailure {
    pub assertion_index: usize,
    pub reason: String,
    pub observed: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub passed: u32,
    pub total: u32,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub passed: bool,
    pub failures: Vec<AssertionFailure>,
    pub score: Score,
}

/// Evaluate every assertion; `passed` iff no failures.
#[tracing::instrument(level = "debug", skip_all)]
pub fn evaluate(spec: &CompiledSpec, diff: &Diff) -> EvalReport {
    let mut failures = Vec::new();
    for (index, assertion) in spec.assertions.iter().enumerate() {
        match assertion.diff_type {
            DiffType::Added => check_presence(assertion, index, &diff.inserts, &mut failures),
            DiffType::Removed => check_presence(assertion, index, &diff.deletes, &mut failures),
            DiffType::Changed => check_changed(spec, assertion, index, diff, &mut failures),
            DiffType::Unchanged => check_unchanged(assertion, index, diff, &mut failures),
        }
    }

    let total = spec.assertions.len() as u32;
    let failed: BTreeSet<usize> = failures.iter().map(|f| f.assertion_index).collect();
    let passed_count = total - failed.len() as u32;
    let percent = if total == 0 {
        100.0
    } else {
        f64::from(passed_count) / f64::from(total) * 100.0
    };

    EvalReport {
        passed: failures.is_empty(),
        failures,
        score: Score {
            passed: passed_count,
            total,
            percent,
        },
    }
}

fn entity_of(row: &Value) -> Option<&str> {
    row.get(ENTITY_KEY).and_then(Value::as_str)
}

/// added/removed: filter the bucket by entity + where, then check counts.
fn check_presence(
    assertion: &Assertion,
    index: usize,
    bucket: &[Value],
    failures: &mut Vec<AssertionFailure>,
) {
    let matched = bucket
        .iter()
        .filter(|row| entity_of(row) == Some(assertion.entity.as_str()))
        .filter(|row| assertion.where_.matches(row))
        .count() as u64;
    check_count(assertion, index, matched, failures);
}

/// Count bounds; absent bounds default to "at least one match".
fn check_count(
    assertion: &Assertion,
    index: usize,
    matched: u64,
    failures: &mut Vec<AssertionFailure>,
) {
    match &assertion.expected_count {
        Some(bounds) => {
            if !bounds.satisfied_by(matched) {
                failures.push(AssertionFailure {
                    assertion_index: index,
                    reason: format!(
                        "{} {} rows matching filter: expected count {}..{}, got {matched}",
                        assertion.entity,
                        assertion.diff_type.as_str(),
                        bounds.min.map_or("".to_string(), |m| m.to_string()),
                        bounds.max.map_or("".to_string(), |m| m.to_string()),
                    ),
                    observed: json!({ "matched_count": matched }),
                });
            }
        }
        None => {
            if matched < 1 {
                failures.push(AssertionFailure {
                    assertion_index: index,
                    reason: format!(
                        "{} {}: expected at least one matching row, got none",
                        assertion.entity,
                        assertion.diff_type.as_str(),
                    ),
                    observed: json!({ "matched_count": 0 }),
                });
            }
        }
    }
}

/// changed: filter updates by entity + where over the after projection,
/// check counts, then verify every expected field transition and (in strict
/// mode) that nothing outside masks/ignores/expectations changed.
fn check_changed(
    spec: &CompiledSpec,
    assertion: &Assertion,
    index: usize,
    diff: &Diff,
    failures: &mut Vec<AssertionFailure>,
) {
    let matched: Vec<&RowUpdate> = diff
        .updates
        .iter()
        .filter(|u| u.entity == assertion.entity)
        .filter(|u| assertion.where_.matches(&u.after))
        .collect();

    check_count(assertion, index, matched.len() as u64, failures);

    for update in matched {
        // Masks and per-assertion ignores come off `changed_fields` first,
        // regardless of strict mode; every later check sees only the
        // remaining set. A masked field is invisible to the assertion even
        // when its expected_changes name it.
        let changed: BTreeSet<&String> = update
            .changed_fields
            .iter()
            .filter(|f| !spec.masks.contains(f) && !assertion.local_ignore.contains(f))
            .collect();

        for (field, change) in &assertion.expected_changes {
            if !changed.contains(field) {
                failures.push(AssertionFailure {
                    assertion_index: index,
                    reason: format!(
                        "{} row {}: expected {field:?} to change but it did not",
                        assertion.entity, update.pk
                    ),
                    observed: json!({ "changed_fields": &changed }),
                });
                continue;
            }
            if let Some(from) = &change.from {
                let before_value = json_get(&update.before, field);
                if !from.matches(&before_value) {
                    failures.push(AssertionFailure {
                        assertion_index: index,
                        reason: format!(
                            "{} row {}: {field:?} before-value did not satisfy `from`",
                            assertion.entity, update.pk
                        ),
                        observed: json!({ "field": field, "before": before_value }),
                    });
                }
            }
            if let Some(to) = &change.to {
                let after_value = json_get(&update.after, field);
                if !to.matches(&after_value) {
                    failures.push(AssertionFailure {
                        assertion_index: index,
                        reason: format!(
                            "{} row {}: {field:?} after-value did not satisfy `to`",
                            assertion.entity, update.pk
                        ),
                        observed: json!({ "field": field, "after": after_value }),
                    });
                }
            }
        }

        if spec.strict {
            let extras: Vec<&String> = changed
                .iter()
                .filter(|f| !assertion.expected_changes.contains_key(f.as_str()))
                .copied()
                .collect();
            if !extras.is_empty() {
                failures.push(AssertionFailure {
                    assertion_index: index,
                    reason: format!(
                        "{} row {}: unexpected changed fields {extras:?}",
                        assertion.entity, update.pk
                    ),
                    observed: json!({ "unexpected_fields": extras }),
                });
            }
        }
    }
}

/// unchanged: the entity must contribute nothing to the diff (or, when a
/// count is given, a bounded amount).
fn check_unchanged(
    assertion: &Assertion,
    index: usize,
    diff: &Diff,
    failures: &mut Vec<AssertionFailure>,
) {
    let inserts = diff
        .inserts
        .iter()
        .filter(|r| entity_of(r) == Some(assertion.entity.as_str()))
        .filter(|r| assertion.where_.matches(r))
        .count();
    let deletes = diff
        .deletes
        .iter()
        .filter(|r| entity_of(r) == Some(assertion.entity.as_str()))
        .filter(|r| assertion.where_.matches(r))
        .count();
    let updates = diff
        .updates
        .iter()
        .filter(|u| u.entity == assertion.entity)
        .filter(|u| assertion.where_.matches(&u.after) || assertion.where_.matches(&u.before))
        .count();
    let total = (inserts + deletes + updates) as u64;

    match &assertion.expected_count {
        None => {
            if total != 0 {
                failures.push(AssertionFailure {
                    assertion_index: index,
                    reason: format!(
                        "{}: expected no changes but found {total}",
                        assertion.entity
                    ),
                    observed: json!({
                        "inserts": inserts, "deletes": deletes, "updates": updates
                    }),
                });
            }
        }
        Some(bounds) => {
            if !bounds.satisfied_by(total) {
                failures.push(AssertionFailure {
                    assertion_index: index,
                    reason: format!(
                        "{}: change count {total} outside expected bounds",
                        assertion.entity
                    ),
                    observed: json!({ "total": total }),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::dsl::compile;

    fn update(
        entity: &str,
        pk: Value,
        before: Value,
        after: Value,
        changed: &[&str],
    ) -> RowUpdate {
        RowUpdate {
            entity: entity.to_string(),
            pk,
            before,
            after,
            changed_fields: changed.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn insert_scenario_passes() {
        // Agent posts one message into C1.
        let diff = Diff {
            inserts: vec![json!({
                "__entity__": "messages",
                "id": "m1", "channel": "C1", "text": "hello there", "user": "U1"
            })],
            updates: vec![],
            deletes: vec![],
        };
        let spec = compile(&json!({
            "assertions": [{
                "diff_type": "added", "entity": "messages",
                "where": {"channel": "C1", "text": {"contains": "hello"}},
                "expected_count": 1
            }]
        }))
        .unwrap();
        let report = evaluate(&spec, &diff);
        assert!(report.passed, "failures: {:?}", report.failures);
        assert_eq!(report.score.passed, 1);
        assert_eq!(report.score.total, 1);
        assert_eq!(report.score.percent, 100.0);
    }

    #[test]
    fn update_with_mask_passes_and_without_mask_fails_strict() {
        let diff = Diff {
            inserts: vec![],
            updates: vec![update(
                "issues",
                json!({"id": 42}),
                json!({"id": 42, "status": "Todo", "updated_at": "T0"}),
                json!({"id": 42, "status": "Done", "updated_at": "T1"}),
                &["status", "updated_at"],
            )],
            deletes: vec![],
        };

        let masked = compile(&json!({
            "masks": ["updated_at"], "strict": true,
            "assertions": [{
                "diff_type": "changed", "entity": "issues",
                "where": {"id": 42},
                "expected_changes": {"status": {"from": "Todo", "to": "Done"}}
            }]
        }))
        .unwrap();
        let report = evaluate(&masked, &diff);
        assert!(report.passed, "failures: {:?}", report.failures);

        let unmasked = compile(&json!({
            "strict": true,
            "assertions": [{
                "diff_type": "changed", "entity": "issues",
                "where": {"id": 42},
                "expected_changes": {"status": {"from": "Todo", "to": "Done"}}
            }]
        }))
        .unwrap();
        let report = evaluate(&unmasked, &diff);
        assert!(!report.passed);
        assert!(
            report.failures[0].reason.contains("updated_at"),
            "reason should cite the unexpected field: {}",
            report.failures[0].reason
        );
    }

    #[test]
    fn masked_field_is_invisible_to_expected_changes() {
        // Masking removes the field from the effective changed set before
        // any step-4 check runs, so an assertion expecting that very field
        // to change can no longer observe it.
        let diff = Diff {
            inserts: vec![],
            updates: vec![update(
                "issues",
                json!({"id": 42}),
                json!({"id": 42, "status": "Todo"}),
                json!({"id": 42, "status": "Done"}),
                &["status"],
            )],
            deletes: vec![],
        };
        for strict in [true, false] {
            let spec = compile(&json!({
                "masks": ["status"], "strict": strict,
                "assertions": [{
                    "diff_type": "changed", "entity": "issues",
                    "where": {"id": 42},
                    "expected_changes": {"status": {"from": "Todo", "to": "Done"}}
                }]
            }))
            .unwrap();
            let report = evaluate(&spec, &diff);
            assert!(!report.passed, "strict={strict} should fail");
            assert!(report.failures[0].reason.contains("status"));
        }
    }

    #[test]
    fn non_strict_allows_extra_changes() {
        let diff = Diff {
            inserts: vec![],
            updates: vec![update(
                "issues",
                json!({"id": 42}),
                json!({"id": 42, "status": "Todo", "updated_at": "T0"}),
                json!({"id": 42, "status": "Done", "updated_at": "T1"}),
                &["status", "updated_at"],
            )],
            deletes: vec![],
        };
        let spec = compile(&json!({
            "strict": false,
            "assertions": [{
                "diff_type": "changed", "entity": "issues",
                "where": {"id": 42},
                "expected_changes": {"status": "Done"}
            }]
        }))
        .unwrap();
        assert!(evaluate(&spec, &diff).passed);
    }

    #[test]
    fn delete_count_range() {
        let reaction = |id: &str| {
            json!({"__entity__": "reactions", "id": id, "message_id": "m1", "emoji": "+1"})
        };
        let diff = Diff {
            inserts: vec![],
            updates: vec![],
            deletes: vec![reaction("r1"), reaction("r2"), reaction("r3")],
        };
        let spec = compile(&json!({
            "assertions": [{
                "diff_type": "removed", "entity": "reactions",
                "where": {"message_id": "m1"},
                "expected_count": {"min": 2, "max": 5}
            }]
        }))
        .unwrap();
        assert!(evaluate(&spec, &diff).passed);

        let too_strict = compile(&json!({
            "assertions": [{
                "diff_type": "removed", "entity": "reactions",
                "where": {"message_id": "m1"},
                "expected_count": {"min": 4}
            }]
        }))
        .unwrap();
        assert!(!evaluate(&too_strict, &diff).passed);
    }

    #[test]
    fn unchanged_entity() {
        let spec = compile(&json!({
            "assertions": [{"diff_type": "unchanged", "entity": "users"}]
        }))
        .unwrap();
        assert!(evaluate(&spec, &Diff::default()).passed);

        let dirty = Diff {
            inserts: vec![json!({"__entity__": "users", "id": "u3"})],
            updates: vec![],
            deletes: vec![],
        };
        let report = evaluate(&spec, &dirty);
        assert!(!report.passed);
        assert_eq!(report.score.passed, 0);
    }

    #[test]
    fn missing_expected_change_fails() {
        let diff = Diff {
            inserts: vec![],
            updates: vec![update(
                "issues",
                json!({"id": 1}),
                json!({"id": 1, "title": "a", "status": "Todo"}),
                json!({"id": 1, "title": "b", "status": "Todo"}),
                &["title"],
            )],
            deletes: vec![],
        };
        let spec = compile(&json!({
            "strict": false,
            "assertions": [{
                "diff_type": "changed", "entity": "issues",
                "expected_changes": {"status": "Done"}
            }]
        }))
        .unwrap();
        let report = evaluate(&spec, &diff);
        assert!(!report.passed);
        assert!(report.failures[0].reason.contains("status"));
    }

    #[test]
    fn default_count_requires_at_least_one_match() {
        let spec = compile(&json!({
            "assertions": [{"diff_type": "added", "entity": "messages"}]
        }))
        .unwrap();
        let report = evaluate(&spec, &Diff::default());
        assert!(!report.passed);
    }

    #[test]
    fn entity_filter_separates_tables() {
        let diff = Diff {
            inserts: vec![
                json!({"__entity__": "messages", "id": "m1"}),
                json!({"__entity__": "reactions", "id": "r1"}),
            ],
            updates: vec![],
            deletes: vec![],
        };
        let spec = compile(&json!({
            "assertions": [
                {"diff_type": "added", "entity": "messages", "expected_count": 1},
                {"diff_type": "added", "entity": "reactions", "expected_count": 1},
                {"diff_type": "added", "entity": "channels", "expected_count": 0}
            ]
        }))
        .unwrap();
        let report = evaluate(&spec, &diff);
        assert!(report.passed, "failures: {:?}", report.failures);
        assert_eq!(report.score.total, 3);
    }

    #[test]
    fn evaluation_is_pure() {
        let diff = Diff {
            inserts: vec![json!({"__entity__": "messages", "id": "m1", "channel": "C1"})],
            updates: vec![],
            deletes: vec![],
        };
        let spec = compile(&json!({
            "assertions": [
                {"diff_type": "added", "entity": "messages", "where": {"channel": "C9"}}
            ]
        }))
        .unwrap();
        let a = evaluate(&spec, &diff);
        let b = evaluate(&spec, &diff);
        assert_eq!(a, b);
    }

    #[test]
    fn score_partial() {
        let diff = Diff {
            inserts: vec![json!({"__entity__": "messages", "id": "m1"})],
            updates: vec![],
            deletes: vec![],
        };
        let spec = compile(&json!({
            "assertions": [
                {"diff_type": "added", "entity": "messages", "expected_count": 1},
                {"diff_type": "added", "entity": "channels", "expected_count": 1}
            ]
        }))
        .unwrap();
        let report = evaluate(&spec, &diff);
        assert!(!report.passed);
        assert_eq!(report.score.passed, 1);
        assert_eq!(report.score.total, 2);
        assert_eq!(report.score.percent, 50.0);
    }
}
