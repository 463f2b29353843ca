use reportgen_core::{
    AggregateFunction, Aggregation, ExecutionContext, Stage, StageError, Table, TableSet,
};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;

use super::{column, compare, key_of, table};

/// Group-by aggregation. Groups keep first-appearance order. Without
/// `group_by` the whole table is one group, so an empty input still yields
/// one row (count 0).
pub struct AggregateStage {
    pub table: String,
    pub output: String,
    pub group_by: Vec<String>,
    pub aggregations: Vec<Aggregation>,
}

impl Stage for AggregateStage {
    fn id(&self) -> String {
        format!("aggregate.{}", self.table)
    }

    fn inputs(&self) -> Vec<String> {
        vec![self.table.clone()]
    }

    fn output(&self) -> String {
        self.output.clone()
    }

    fn run(&self, tables: &mut TableSet, _ctx: &ExecutionContext) -> Result<(), StageError> {
        let input = table(tables, &self.table)?;
        let group_idx = self
            .group_by
            .iter()
            .map(|c| column(input, &self.table, c))
            .collect::<Result<Vec<_>, _>>()?;
        // `None` stands for `count(*)`.
        let agg_idx = self
            .aggregations
            .iter()
            .map(|a| match (a.function, a.column.as_str()) {
                (AggregateFunction::Count, "*") => Ok(None),
                _ => column(input, &self.table, &a.column).map(Some),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut order: Vec<Vec<usize>> = Vec::new();
        let mut index: HashMap<Vec<String>, usize> = HashMap::new();
        for (row_no, row) in input.rows.iter().enumerate() {
            let key: Vec<String> = group_idx.iter().map(|&i| key_of(&row[i])).collect();
            let slot = *index.entry(key).or_insert_with(|| {
                order.push(Vec::new());
                order.len() - 1
            });
            order[slot].push(row_no);
        }
        if order.is_empty() && group_idx.is_empty() {
            order.push(Vec::new());
        }

        let mut names = self.group_by.clone();
        names.extend(self.aggregations.iter().map(Aggregation::output_name));

        let marker = Value::Bool(true);
        let mut rows = Vec::with_capacity(order.len());
        for members in &order {
            let mut out: Vec<Value> = match members.first() {
                Some(&first) => group_idx.iter().map(|&i| input.rows[first][i].clone()).collect(),
                None => Vec::new(),
            };
            for (agg, idx) in self.aggregations.iter().zip(&agg_idx) {
                let cells: Vec<&Value> = match idx {
                    Some(i) => members.iter().map(|&r| &input.rows[r][*i]).collect(),
                    None => members.iter().map(|_| &marker).collect(),
                };
                out.push(apply(agg, &cells).map_err(|msg| {
                    StageError::ExecutionFailed(format!("{}.{}: {}", self.table, agg.column, msg))
                })?);
            }
            rows.push(out);
        }

        tables.insert(self.output.clone(), Table::new(names, rows));
        Ok(())
    }
}

fn apply(agg: &Aggregation, cells: &[&Value]) -> Result<Value, String> {
    let present: Vec<&Value> = cells.iter().copied().filter(|v| !v.is_null()).collect();
    match agg.function {
        AggregateFunction::Count => Ok(Value::from(present.len() as u64)),
        AggregateFunction::Sum => sum(&present),
        AggregateFunction::Avg => {
            if present.is_empty() {
                return Ok(Value::Null);
            }
            let total = numbers(&present)?.iter().sum::<f64>();
            Ok(Value::from(total / present.len() as f64))
        }
        AggregateFunction::Min => extreme(&present, Ordering::Less),
        AggregateFunction::Max => extreme(&present, Ordering::Greater),
    }
}

fn numbers(values: &[&Value]) -> Result<Vec<f64>, String> {
    values
        .iter()
        .map(|v| v.as_f64().ok_or_else(|| format!("non-numeric value {}", v)))
        .collect()
}

/// Integer sum stays integral unless it overflows or a float is present.
fn sum(values: &[&Value]) -> Result<Value, String> {
    if values.iter().all(|v| v.is_i64()) {
        let total = values
            .iter()
            .filter_map(|v| v.as_i64())
            .try_fold(0i64, |acc, x| acc.checked_add(x));
        if let Some(total) = total {
            return Ok(Value::from(total));
        }
    }
    Ok(Value::from(numbers(values)?.iter().sum::<f64>()))
}

fn extreme(values: &[&Value], wanted: Ordering) -> Result<Value, String> {
    let mut best: Option<&Value> = None;
    for &v in values {
        best = match best {
            None => Some(v),
            Some(b) => match compare(v, b) {
                Some(ord) if ord == wanted => Some(v),
                Some(_) => Some(b),
                None => return Err(format!("cannot compare {} with {}", v, b)),
            },
        };
    }
    Ok(best.cloned().unwrap_or(Value::Null))
}
