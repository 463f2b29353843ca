use reportgen_core::{ExecutionContext, FilterOperator, Stage, StageError, TableSet};
use serde_json::Value;
use std::cmp::Ordering;

use super::{column, compare, values_equal};

/// Keeps the rows whose `column` satisfies `operator value`.
pub struct FilterStage {
    table: String,
    column: String,
    operator: FilterOperator,
    value: Value,
}

impl FilterStage {
    pub fn new(table: String, column: String, operator: FilterOperator, value: Value) -> Self {
        Self {
            table,
            column,
            operator,
            value,
        }
    }

    fn matches(&self, cell: &Value) -> Result<bool, StageError> {
        let ord = || compare(cell, &self.value);
        Ok(match self.operator {
            FilterOperator::IsNull => cell.is_null(),
            FilterOperator::NotNull => !cell.is_null(),
            // Nulls never satisfy a comparison.
            _ if cell.is_null() => false,
            FilterOperator::Eq => values_equal(cell, &self.value),
            FilterOperator::Ne => !values_equal(cell, &self.value),
            FilterOperator::Gt => ord() == Some(Ordering::Greater),
            FilterOperator::Gte => matches!(ord(), Some(Ordering::Greater | Ordering::Equal)),
            FilterOperator::Lt => ord() == Some(Ordering::Less),
            FilterOperator::Lte => matches!(ord(), Some(Ordering::Less | Ordering::Equal)),
            FilterOperator::Contains => match (cell, &self.value) {
                (Value::String(hay), Value::String(needle)) => hay.contains(needle.as_str()),
                (Value::Array(items), needle) => items.iter().any(|i| values_equal(i, needle)),
                _ => false,
            },
            FilterOperator::In => match &self.value {
                Value::Array(options) => options.iter().any(|o| values_equal(cell, o)),
                _ => {
                    return Err(StageError::ValidationFailed(format!(
                        "filter on '{}.{}': operator 'in' needs an array value",
                        self.table, self.column
                    )))
                }
            },
        })
    }
}

impl Stage for FilterStage {
    fn id(&self) -> String {
        format!("filter.{}", self.table)
    }

    fn inputs(&self) -> Vec<String> {
        vec![self.table.clone()]
    }

    fn output(&self) -> String {
        self.table.clone()
    }

    fn run(&self, tables: &mut TableSet, _ctx: &ExecutionContext) -> Result<(), StageError> {
        let table = tables
            .get_mut(&self.table)
            .ok_or_else(|| StageError::MissingTable(self.table.clone()))?;
        let idx = column(table, &self.table, &self.column)?;

        let mut kept = Vec::with_capacity(table.rows.len());
        for row in table.rows.drain(..) {
            if self.matches(&row[idx])? {
                kept.push(row);
            }
        }
        table.rows = kept;
        table.refresh_types();
        Ok(())
    }
}
