//! Transform rules as pipeline stages.
//!
//! Each rule becomes one `Stage`; the `PipelineRunner` executes them in
//! declared order and records their lineage.

mod aggregate;
mod filter;
mod join;
mod reshape;

pub use aggregate::AggregateStage;
pub use filter::FilterStage;
pub use join::JoinStage;
pub use reshape::{LimitStage, SelectStage, SortStage};

use reportgen_core::{PipelineRunner, Stage, StageError, Table, TableSet, TransformRule};
use serde_json::Value;
use std::cmp::Ordering;

/// Stage for one rule. The match is exhaustive over rule kinds.
pub fn stage_for(rule: &TransformRule) -> Box<dyn Stage> {
    match rule.clone() {
        TransformRule::Filter {
            table,
            column,
            operator,
            value,
        } => Box::new(FilterStage::new(table, column, operator, value)),
        TransformRule::Select { table, columns } => Box::new(SelectStage { table, columns }),
        TransformRule::Sort {
            table,
            by,
            descending,
        } => Box::new(SortStage {
            table,
            by,
            descending,
        }),
        TransformRule::Limit { table, count } => Box::new(LimitStage { table, count }),
        TransformRule::Aggregate {
            table,
            group_by,
            aggregations,
            into,
        } => Box::new(AggregateStage {
            output: into.unwrap_or_else(|| table.clone()),
            table,
            group_by,
            aggregations,
        }),
        TransformRule::Join {
            left,
            right,
            left_on,
            right_on,
            kind,
            into,
        } => Box::new(JoinStage {
            left,
            right,
            left_on,
            right_on,
            kind,
            into,
        }),
    }
}

pub fn build_pipeline(rules: &[TransformRule]) -> PipelineRunner {
    PipelineRunner::new(rules.iter().map(stage_for).collect())
}

pub(crate) fn table<'a>(tables: &'a TableSet, name: &str) -> Result<&'a Table, StageError> {
    tables
        .get(name)
        .ok_or_else(|| StageError::MissingTable(name.to_string()))
}

pub(crate) fn column(table: &Table, table_name: &str, column: &str) -> Result<usize, StageError> {
    table
        .column_index(column)
        .ok_or_else(|| StageError::MissingColumn {
            table: table_name.to_string(),
            column: column.to_string(),
        })
}

/// Equality with `1 == 1.0`.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

/// Ordering for values of the same kind; `None` when not comparable.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => Some(i.cmp(&j)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order used for sorting: numbers, then text, then booleans, then
/// anything else; nulls are handled by the caller.
pub(crate) fn total_cmp(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Number(_) => 0,
            Value::String(_) => 1,
            Value::Bool(_) => 2,
            Value::Array(_) | Value::Object(_) => 3,
            Value::Null => 4,
        }
    }
    compare(a, b).unwrap_or_else(|| {
        rank(a)
            .cmp(&rank(b))
            .then_with(|| a.to_string().cmp(&b.to_string()))
    })
}

/// Hashable key for grouping and join lookups; `1` and `1.0` collide.
pub(crate) fn key_of(value: &Value) -> String {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => format!("n:{}", f as i64),
            Some(f) => format!("n:{}", f),
            None => format!("n:{}", n),
        },
        other => other.to_string(),
    }
}
