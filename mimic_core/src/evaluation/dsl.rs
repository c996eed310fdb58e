//! Assertion DSL: parse + validate a JSON spec of expected diffs into an
//! operator-normalized form the evaluator can dispatch on.
//!
//! Compilation walks the raw `serde_json::Value` so every error carries a
//! path to the offending node (`assertions/2/where/status`). Shorthands are
//! expanded here, never at evaluation time:
//! - `{field: scalar}` in `where` becomes `{field: {eq: scalar}}`
//! - `expected_count: N` becomes `{min: N, max: N}`
//! - `expected_changes: {field: scalar}` becomes `{field: {to: {eq: scalar}}}`
//!
//! The compiled tree serializes back to the normalized wire form, so
//! compiling a compiled spec is the identity.

use crate::{Error, Result};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Wire version this compiler understands.
pub const DSL_VERSION: &str = "1";

const TOP_LEVEL_KEYS: [&str; 4] = ["dsl_version", "strict", "masks", "assertions"];
const ASSERTION_KEYS: [&str; 6] = [
    "diff_type",
    "entity",
    "where",
    "expected_count",
    "expected_changes",
    "local_ignore",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    Added,
    Removed,
    Changed,
    Unchanged,
}

impl DiffType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffType::Added => "added",
            DiffType::Removed => "removed",
            DiffType::Changed => "changed",
            DiffType::Unchanged => "unchanged",
        }
    }

    fn parse_str(s: &str) -> Option<Self> {
        match s {
            "added" => Some(DiffType::Added),
            "removed" => Some(DiffType::Removed),
            "changed" => Some(DiffType::Changed),
            "unchanged" => Some(DiffType::Unchanged),
            _ => None,
        }
    }
}

/// A single operator application, operand validated at compile time.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(Value),
    Neq(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Contains(String),
    NotContains(String),
    StartsWith(String),
    EndsWith(String),
    HasAny(Vec<Value>),
    HasAll(Vec<Value>),
    IsNull(bool),
    NotNull(bool),
}

impl Predicate {
    fn compile(op: &str, operand: &Value, path: &str) -> Result<Self> {
        let want_array = |v: &Value| -> Result<Vec<Value>> {
            v.as_array()
                .cloned()
                .ok_or_else(|| Error::dsl(path, format!("operator {op:?} expects an array")))
        };
        let want_string = |v: &Value| -> Result<String> {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::dsl(path, format!("operator {op:?} expects a string")))
        };
        let want_bool = |v: &Value| -> Result<bool> {
            v.as_bool()
                .ok_or_else(|| Error::dsl(path, format!("operator {op:?} expects a boolean")))
        };

        Ok(match op {
            "eq" => Predicate::Eq(operand.clone()),
            "neq" => Predicate::Neq(operand.clone()),
            "gt" => Predicate::Gt(operand.clone()),
            "gte" => Predicate::Gte(operand.clone()),
            "lt" => Predicate::Lt(operand.clone()),
            "lte" => Predicate::Lte(operand.clone()),
            "in" => Predicate::In(want_array(operand)?),
            "not_in" => Predicate::NotIn(want_array(operand)?),
            "contains" => Predicate::Contains(want_string(operand)?),
            "not_contains" => Predicate::NotContains(want_string(operand)?),
            "starts_with" => Predicate::StartsWith(want_string(operand)?),
            "ends_with" => Predicate::EndsWith(want_string(operand)?),
            "has_any" => Predicate::HasAny(want_array(operand)?),
            "has_all" => Predicate::HasAll(want_array(operand)?),
            "is_null" => Predicate::IsNull(want_bool(operand)?),
            "not_null" => Predicate::NotNull(want_bool(operand)?),
            other => return Err(Error::dsl(path, format!("unknown operator: {other:?}"))),
        })
    }

    fn op_name(&self) -> &'static str {
        match self {
            Predicate::Eq(_) => "eq",
            Predicate::Neq(_) => "neq",
            Predicate::Gt(_) => "gt",
            Predicate::Gte(_) => "gte",
            Predicate::Lt(_) => "lt",
            Predicate::Lte(_) => "lte",
            Predicate::In(_) => "in",
            Predicate::NotIn(_) => "not_in",
            Predicate::Contains(_) => "contains",
            Predicate::NotContains(_) => "not_contains",
            Predicate::StartsWith(_) => "starts_with",
            Predicate::EndsWith(_) => "ends_with",
            Predicate::HasAny(_) => "has_any",
            Predicate::HasAll(_) => "has_all",
            Predicate::IsNull(_) => "is_null",
            Predicate::NotNull(_) => "not_null",
        }
    }

    fn operand_value(&self) -> Value {
        match self {
            Predicate::Eq(v)
            | Predicate::Neq(v)
            | Predicate::Gt(v)
            | Predicate::Gte(v)
            | Predicate::Lt(v)
            | Predicate::Lte(v) => v.clone(),
            Predicate::In(vs)
            | Predicate::NotIn(vs)
            | Predicate::HasAny(vs)
            | Predicate::HasAll(vs) => Value::Array(vs.clone()),
            Predicate::Contains(s)
            | Predicate::NotContains(s)
            | Predicate::StartsWith(s)
            | Predicate::EndsWith(s) => Value::String(s.clone()),
            Predicate::IsNull(b) | Predicate::NotNull(b) => Value::Bool(*b),
        }
    }

    /// Whether `value` satisfies this predicate. Missing fields are handed
    /// in as JSON null.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Predicate::Eq(expected) => json_eq(value, expected),
            Predicate::Neq(expected) => !json_eq(value, expected),
            Predicate::Gt(expected) => json_cmp(value, expected)
                .map(std::cmp::Ordering::is_gt)
                .unwrap_or(false),
            Predicate::Gte(expected) => json_cmp(value, expected)
                .map(std::cmp::Ordering::is_ge)
                .unwrap_or(false),
            Predicate::Lt(expected) => json_cmp(value, expected)
                .map(std::cmp::Ordering::is_lt)
                .unwrap_or(false),
            Predicate::Lte(expected) => json_cmp(value, expected)
                .map(std::cmp::Ordering::is_le)
                .unwrap_or(false),
            Predicate::In(allowed) => allowed.iter().any(|v| json_eq(value, v)),
            Predicate::NotIn(denied) => !denied.iter().any(|v| json_eq(value, v)),
            Predicate::Contains(needle) => {
                value.as_str().is_some_and(|s| s.contains(needle.as_str()))
            }
            Predicate::NotContains(needle) => {
                value.as_str().is_some_and(|s| !s.contains(needle.as_str()))
            }
            Predicate::StartsWith(prefix) => {
                value.as_str().is_some_and(|s| s.starts_with(prefix.as_str()))
            }
            Predicate::EndsWith(suffix) => {
                value.as_str().is_some_and(|s| s.ends_with(suffix.as_str()))
            }
            Predicate::HasAny(items) => value.as_array().is_some_and(|arr| {
                items.iter().any(|i| arr.iter().any(|v| json_eq(v, i)))
            }),
            Predicate::HasAll(items) => value.as_array().is_some_and(|arr| {
                items.iter().all(|i| arr.iter().any(|v| json_eq(v, i)))
            }),
            Predicate::IsNull(expected) => value.is_null() == *expected,
            Predicate::NotNull(expected) => !value.is_null() == *expected,
        }
    }
}

/// Conjunction of operator applications against one field, e.g.
/// `{gte: 1, lt: 10}`.
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateSet(pub Vec<Predicate>);

impl PredicateSet {
    fn compile(raw: &Value, path: &str) -> Result<Self> {
        match raw {
            Value::Object(map) => {
                let mut preds = Vec::with_capacity(map.len());
                for (op, operand) in map {
                    preds.push(Predicate::compile(op, operand, &format!("{path}/{op}"))?);
                }
                Ok(Self(preds))
            }
            // Scalar shorthand: `{field: value}` means equality.
            scalar => Ok(Self(vec![Predicate::Eq(scalar.clone())])),
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        self.0.iter().all(|p| p.matches(value))
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        for p in &self.0 {
            map.insert(p.op_name().to_string(), p.operand_value());
        }
        Value::Object(map)
    }
}

/// Row filter: field predicates plus `and` / `or` / `not` combinators.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateTree {
    /// Matches every row (empty `where`).
    True,
    And(Vec<PredicateTree>),
    Or(Vec<PredicateTree>),
    Not(Box<PredicateTree>),
    Field { field: String, predicates: PredicateSet },
}

impl PredicateTree {
    fn compile(raw: &Value, path: &str) -> Result<Self> {
        let Value::Object(map) = raw else {
            return Err(Error::dsl(path, "where clause must be an object"));
        };

        let mut nodes = Vec::with_capacity(map.len());
        for (key, val) in map {
            let child_path = format!("{path}/{key}");
            match key.as_str() {
                "and" | "or" => {
                    let items = val.as_array().ok_or_else(|| {
                        Error::dsl(&child_path, format!("{key:?} expects an array"))
                    })?;
                    let mut children = Vec::with_capacity(items.len());
                    for (i, item) in items.iter().enumerate() {
                        children.push(Self::compile(item, &format!("{child_path}/{i}"))?);
                    }
                    nodes.push(if key == "and" {
                        PredicateTree::And(children)
                    } else {
                        PredicateTree::Or(children)
                    });
                }
                "not" => {
                    nodes.push(PredicateTree::Not(Box::new(Self::compile(
                        val,
                        &child_path,
                    )?)));
                }
                field => {
                    nodes.push(PredicateTree::Field {
                        field: field.to_string(),
                        predicates: PredicateSet::compile(val, &child_path)?,
                    });
                }
            }
        }

        Ok(match nodes.len() {
            0 => PredicateTree::True,
            1 => nodes.into_iter().next().expect("one node"),
            _ => PredicateTree::And(nodes),
        })
    }

    /// Whether `row` (a JSON object) satisfies the filter. Field lookups
    /// follow dotted paths into nested objects; absent fields read as null.
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            PredicateTree::True => true,
            PredicateTree::And(children) => children.iter().all(|c| c.matches(row)),
            PredicateTree::Or(children) => children.iter().any(|c| c.matches(row)),
            PredicateTree::Not(child) => !child.matches(row),
            PredicateTree::Field { field, predicates } => {
                predicates.matches(&json_get(row, field))
            }
        }
    }

    fn to_value(&self) -> Value {
        match self {
            PredicateTree::True => json!({}),
            PredicateTree::And(children) => {
                json!({"and": children.iter().map(Self::to_value).collect::<Vec<_>>()})
            }
            PredicateTree::Or(children) => {
                json!({"or": children.iter().map(Self::to_value).collect::<Vec<_>>()})
            }
            PredicateTree::Not(child) => json!({"not": child.to_value()}),
            PredicateTree::Field { field, predicates } => {
                let mut map = Map::new();
                map.insert(field.clone(), predicates.to_value());
                Value::Object(map)
            }
        }
    }
}

/// Normalized count bounds; either side may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountBounds {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl CountBounds {
    fn compile(raw: &Value, path: &str) -> Result<Self> {
        match raw {
            Value::Number(n) => {
                let exact = n
                    .as_u64()
                    .ok_or_else(|| Error::dsl(path, "expected_count must be a non-negative integer"))?;
                Ok(Self {
                    min: Some(exact),
                    max: Some(exact),
                })
            }
            Value::Object(map) => {
                let bound = |key: &str| -> Result<Option<u64>> {
                    match map.get(key) {
                        None => Ok(None),
                        Some(v) => v
                            .as_u64()
                            .map(Some)
                            .ok_or_else(|| {
                                Error::dsl(
                                    format!("{path}/{key}"),
                                    format!("{key} must be a non-negative integer"),
                                )
                            }),
                    }
                };
                for key in map.keys() {
                    if key != "min" && key != "max" {
                        return Err(Error::dsl(
                            format!("{path}/{key}"),
                            "expected_count accepts only min/max",
                        ));
                    }
                }
                Ok(Self {
                    min: bound("min")?,
                    max: bound("max")?,
                })
            }
            _ => Err(Error::dsl(
                path,
                "expected_count must be an integer or {min, max}",
            )),
        }
    }

    pub fn satisfied_by(&self, actual: u64) -> bool {
        if let Some(min) = self.min {
            if actual < min {
                return false;
            }
        }
        if let Some(max) = self.max {
            if actual > max {
                return false;
            }
        }
        true
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(min) = self.min {
            map.insert("min".into(), json!(min));
        }
        if let Some(max) = self.max {
            map.insert("max".into(), json!(max));
        }
        Value::Object(map)
    }
}

/// Expected transition of one field in a `changed` assertion.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub from: Option<PredicateSet>,
    pub to: Option<PredicateSet>,
}

impl FieldChange {
    fn compile(raw: &Value, path: &str) -> Result<Self> {
        match raw {
            Value::Object(map) if map.contains_key("from") || map.contains_key("to") => {
                for key in map.keys() {
                    if key != "from" && key != "to" {
                        return Err(Error::dsl(
                            format!("{path}/{key}"),
                            "expected_changes accepts only from/to",
                        ));
                    }
                }
                let from = map
                    .get("from")
                    .map(|v| PredicateSet::compile(v, &format!("{path}/from")))
                    .transpose()?;
                let to = map
                    .get("to")
                    .map(|v| PredicateSet::compile(v, &format!("{path}/to")))
                    .transpose()?;
                Ok(Self { from, to })
            }
            // Shorthand: `{field: scalar}` means "became scalar".
            scalar => Ok(Self {
                from: None,
                to: Some(PredicateSet::compile(scalar, &format!("{path}/to"))?),
            }),
        }
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(from) = &self.from {
            map.insert("from".into(), from.to_value());
        }
        if let Some(to) = &self.to {
            map.insert("to".into(), to.to_value());
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    pub diff_type: DiffType,
    pub entity: String,
    pub where_: PredicateTree,
    pub expected_count: Option<CountBounds>,
    pub expected_changes: BTreeMap<String, FieldChange>,
    pub local_ignore: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSpec {
    pub strict: bool,
    pub masks: Vec<String>,
    pub assertions: Vec<Assertion>,
}

impl CompiledSpec {
    /// Normalized wire form. Compiling this value again yields an identical
    /// `CompiledSpec`.
    pub fn to_value(&self) -> Value {
        let assertions: Vec<Value> = self
            .assertions
            .iter()
            .map(|a| {
                let mut map = Map::new();
                map.insert("diff_type".into(), json!(a.diff_type.as_str()));
                map.insert("entity".into(), json!(a.entity));
                map.insert("where".into(), a.where_.to_value());
                if let Some(count) = &a.expected_count {
                    map.insert("expected_count".into(), count.to_value());
                }
                if !a.expected_changes.is_empty() {
                    let changes: Map<String, Value> = a
                        .expected_changes
                        .iter()
                        .map(|(field, change)| (field.clone(), change.to_value()))
                        .collect();
                    map.insert("expected_changes".into(), Value::Object(changes));
                }
                if !a.local_ignore.is_empty() {
                    map.insert("local_ignore".into(), json!(a.local_ignore));
                }
                Value::Object(map)
            })
            .collect();

        json!({
            "dsl_version": DSL_VERSION,
            "strict": self.strict,
            "masks": self.masks,
            "assertions": assertions,
        })
    }
}

/// Compile a raw DSL document. All structural problems surface here with a
/// path pointer; evaluation never re-validates.
#[tracing::instrument(level = "debug", skip(raw))]
pub fn compile(raw: &Value) -> Result<CompiledSpec> {
    let Value::Object(top) = raw else {
        return Err(Error::dsl("", "spec must be a JSON object"));
    };

    for key in top.keys() {
        if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
            return Err(Error::dsl(
                key.as_str(),
                format!("unknown top-level key: {key:?}"),
            ));
        }
    }

    if let Some(version) = top.get("dsl_version") {
        let v = version
            .as_str()
            .ok_or_else(|| Error::dsl("dsl_version", "dsl_version must be a string"))?;
        if v != DSL_VERSION {
            return Err(Error::dsl(
                "dsl_version",
                format!("unsupported dsl_version: {v:?}"),
            ));
        }
    }

    let strict = match top.get("strict") {
        None => true,
        Some(v) => v
            .as_bool()
            .ok_or_else(|| Error::dsl("strict", "strict must be a boolean"))?,
    };

    let masks = match top.get("masks") {
        None => Vec::new(),
        Some(v) => string_array(v, "masks")?,
    };

    let raw_assertions = top
        .get("assertions")
        .ok_or_else(|| Error::dsl("assertions", "assertions is required"))?
        .as_array()
        .ok_or_else(|| Error::dsl("assertions", "assertions must be an array"))?;

    let mut assertions = Vec::with_capacity(raw_assertions.len());
    for (i, raw_assertion) in raw_assertions.iter().enumerate() {
        assertions.push(compile_assertion(raw_assertion, &format!("assertions/{i}"))?);
    }

    Ok(CompiledSpec {
        strict,
        masks,
        assertions,
    })
}

fn compile_assertion(raw: &Value, path: &str) -> Result<Assertion> {
    let Value::Object(map) = raw else {
        return Err(Error::dsl(path, "assertion must be an object"));
    };

    for key in map.keys() {
        // `ignore` is accepted as an alias for `local_ignore`.
        if !ASSERTION_KEYS.contains(&key.as_str()) && key != "ignore" {
            return Err(Error::dsl(
                format!("{path}/{key}"),
                format!("unknown assertion key: {key:?}"),
            ));
        }
    }

    let diff_type_str = map
        .get("diff_type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::dsl(format!("{path}/diff_type"), "diff_type is required"))?;
    let diff_type = DiffType::parse_str(diff_type_str).ok_or_else(|| {
        Error::dsl(
            format!("{path}/diff_type"),
            format!("unknown diff_type: {diff_type_str:?}"),
        )
    })?;

    let entity = map
        .get("entity")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::dsl(format!("{path}/entity"), "entity is required"))?
        .to_string();

    let where_ = match map.get("where") {
        None => PredicateTree::True,
        Some(v) => PredicateTree::compile(v, &format!("{path}/where"))?,
    };

    let expected_count = map
        .get("expected_count")
        .map(|v| CountBounds::compile(v, &format!("{path}/expected_count")))
        .transpose()?;

    let expected_changes = match map.get("expected_changes") {
        None => BTreeMap::new(),
        Some(_) if diff_type != DiffType::Changed => {
            return Err(Error::dsl(
                format!("{path}/expected_changes"),
                "expected_changes only applies to diff_type \"changed\"",
            ));
        }
        Some(Value::Object(changes)) => {
            let mut out = BTreeMap::new();
            for (field, change) in changes {
                out.insert(
                    field.clone(),
                    FieldChange::compile(change, &format!("{path}/expected_changes/{field}"))?,
                );
            }
            out
        }
        Some(_) => {
            return Err(Error::dsl(
                format!("{path}/expected_changes"),
                "expected_changes must be an object",
            ));
        }
    };

    let local_ignore = match map.get("local_ignore").or_else(|| map.get("ignore")) {
        None => Vec::new(),
        Some(v) => string_array(v, &format!("{path}/local_ignore"))?,
    };

    Ok(Assertion {
        diff_type,
        entity,
        where_,
        expected_count,
        expected_changes,
        local_ignore,
    })
}

fn string_array(raw: &Value, path: &str) -> Result<Vec<String>> {
    let items = raw
        .as_array()
        .ok_or_else(|| Error::dsl(path, "expected an array of strings"))?;
    items
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::dsl(format!("{path}/{i}"), "expected a string"))
        })
        .collect()
}

/// Fetch `row[field]` following dotted paths; absent reads as null.
pub fn json_get(row: &Value, field: &str) -> Value {
    let mut cur = row;
    for part in field.split('.') {
        match cur.get(part) {
            Some(next) => cur = next,
            None => return Value::Null,
        }
    }
    cur.clone()
}

/// Equality with numeric coercion so `1` and `1.0` compare equal.
pub fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering for gt/gte/lt/lte: numbers numerically, strings
/// lexicographically, anything else incomparable.
pub fn json_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Some(x.cmp(y));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_where_expands_to_eq() {
        let spec = compile(&json!({
            "assertions": [
                {"diff_type": "added", "entity": "messages", "where": {"channel": "C1"}}
            ]
        }))
        .unwrap();
        let a = &spec.assertions[0];
        assert_eq!(
            a.where_,
            PredicateTree::Field {
                field: "channel".into(),
                predicates: PredicateSet(vec![Predicate::Eq(json!("C1"))]),
            }
        );
    }

    #[test]
    fn exact_count_expands_to_bounds() {
        let spec = compile(&json!({
            "assertions": [
                {"diff_type": "added", "entity": "messages", "expected_count": 3}
            ]
        }))
        .unwrap();
        assert_eq!(
            spec.assertions[0].expected_count,
            Some(CountBounds {
                min: Some(3),
                max: Some(3)
            })
        );
    }

    #[test]
    fn expected_changes_scalar_becomes_to_eq() {
        let spec = compile(&json!({
            "assertions": [
                {"diff_type": "changed", "entity": "issues",
                 "expected_changes": {"status": "Done"}}
            ]
        }))
        .unwrap();
        let change = &spec.assertions[0].expected_changes["status"];
        assert!(change.from.is_none());
        assert_eq!(
            change.to,
            Some(PredicateSet(vec![Predicate::Eq(json!("Done"))]))
        );
    }

    #[test]
    fn unknown_operator_fails_at_compile_with_path() {
        let err = compile(&json!({
            "assertions": [
                {"diff_type": "added", "entity": "messages",
                 "where": {"text": {"fuzzy": "x"}}}
            ]
        }))
        .unwrap_err();
        match err {
            Error::Dsl { path, reason } => {
                assert_eq!(path, "assertions/0/where/text/fuzzy");
                assert!(reason.contains("unknown operator"));
            }
            other => panic!("expected dsl error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_top_level_key_rejected() {
        let err = compile(&json!({"assertions": [], "extra": 1})).unwrap_err();
        assert!(matches!(err, Error::Dsl { .. }));
    }

    #[test]
    fn expected_changes_on_added_rejected() {
        let err = compile(&json!({
            "assertions": [
                {"diff_type": "added", "entity": "m", "expected_changes": {"x": 1}}
            ]
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Dsl { .. }));
    }

    #[test]
    fn unsupported_version_rejected() {
        let err = compile(&json!({"dsl_version": "2", "assertions": []})).unwrap_err();
        assert!(matches!(err, Error::Dsl { .. }));
    }

    #[test]
    fn combinators_compile_and_match() {
        let spec = compile(&json!({
            "assertions": [{
                "diff_type": "added", "entity": "messages",
                "where": {
                    "or": [
                        {"channel": "C1"},
                        {"and": [{"channel": "C2"}, {"not": {"user": "bot"}}]}
                    ]
                }
            }]
        }))
        .unwrap();
        let w = &spec.assertions[0].where_;
        assert!(w.matches(&json!({"channel": "C1", "user": "bot"})));
        assert!(w.matches(&json!({"channel": "C2", "user": "alice"})));
        assert!(!w.matches(&json!({"channel": "C2", "user": "bot"})));
        assert!(!w.matches(&json!({"channel": "C3"})));
    }

    #[test]
    fn operator_semantics() {
        let row = json!({
            "n": 5, "s": "hello world", "tags": ["a", "b"],
            "missing_is_null": null, "nested": {"deep": 7}
        });
        let get = |f: &str| json_get(&row, f);

        assert!(Predicate::Gt(json!(4)).matches(&get("n")));
        assert!(!Predicate::Gt(json!(5)).matches(&get("n")));
        assert!(Predicate::Gte(json!(5)).matches(&get("n")));
        assert!(Predicate::Lt(json!(6)).matches(&get("n")));
        assert!(Predicate::Lte(json!(5)).matches(&get("n")));
        assert!(Predicate::In(vec![json!(5), json!(9)]).matches(&get("n")));
        assert!(Predicate::NotIn(vec![json!(9)]).matches(&get("n")));
        assert!(Predicate::Contains("lo wo".into()).matches(&get("s")));
        assert!(Predicate::NotContains("xyz".into()).matches(&get("s")));
        assert!(!Predicate::Contains("x".into()).matches(&get("n")));
        assert!(Predicate::StartsWith("hell".into()).matches(&get("s")));
        assert!(Predicate::EndsWith("world".into()).matches(&get("s")));
        assert!(Predicate::HasAny(vec![json!("b"), json!("z")]).matches(&get("tags")));
        assert!(!Predicate::HasAll(vec![json!("b"), json!("z")]).matches(&get("tags")));
        assert!(Predicate::HasAll(vec![json!("a"), json!("b")]).matches(&get("tags")));
        assert!(Predicate::IsNull(true).matches(&get("missing_is_null")));
        assert!(Predicate::IsNull(true).matches(&get("absent_field")));
        assert!(Predicate::NotNull(true).matches(&get("n")));
        assert!(Predicate::Eq(json!(7)).matches(&get("nested.deep")));
    }

    #[test]
    fn numeric_coercion_in_eq() {
        assert!(json_eq(&json!(1), &json!(1.0)));
        assert!(!json_eq(&json!(1), &json!("1")));
    }

    #[test]
    fn compile_is_idempotent() {
        let raw = json!({
            "strict": true,
            "masks": ["updated_at"],
            "assertions": [
                {"diff_type": "added", "entity": "messages",
                 "where": {"channel": "C1", "text": {"contains": "hello"}},
                 "expected_count": 1},
                {"diff_type": "changed", "entity": "issues",
                 "where": {"id": 42},
                 "expected_changes": {"status": {"from": "Todo", "to": "Done"}},
                 "ignore": ["noise"]},
                {"diff_type": "removed", "entity": "reactions",
                 "expected_count": {"min": 2, "max": 5}},
                {"diff_type": "unchanged", "entity": "users"}
            ]
        });
        let once = compile(&raw).unwrap();
        let twice = compile(&once.to_value()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.to_value(), twice.to_value());
    }
}
