//! Column projection, ordering and truncation.
use reportgen_core::{ExecutionContext, Stage, StageError, TableSet};
use std::cmp::Ordering;

use super::{column, total_cmp};

pub struct SelectStage {
    pub table: String,
    pub columns: Vec<String>,
}

impl Stage for SelectStage {
    fn id(&self) -> String {
        format!("select.{}", self.table)
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
        let indices = self
            .columns
            .iter()
            .map(|c| column(table, &self.table, c))
            .collect::<Result<Vec<_>, _>>()?;

        table.columns = indices.iter().map(|&i| table.columns[i].clone()).collect();
        for row in &mut table.rows {
            *row = indices.iter().map(|&i| row[i].clone()).collect();
        }
        Ok(())
    }
}

/// Stable sort on one column; nulls always sort last.
pub struct SortStage {
    pub table: String,
    pub by: String,
    pub descending: bool,
}

impl Stage for SortStage {
    fn id(&self) -> String {
        format!("sort.{}", self.table)
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
        let idx = column(table, &self.table, &self.by)?;

        table.rows.sort_by(|a, b| match (a[idx].is_null(), b[idx].is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let ord = total_cmp(&a[idx], &b[idx]);
                if self.descending {
                    ord.reverse()
                } else {
                    ord
                }
            }
        });
        Ok(())
    }
}

pub struct LimitStage {
    pub table: String,
    pub count: usize,
}

impl Stage for LimitStage {
    fn id(&self) -> String {
        format!("limit.{}", self.table)
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
        table.rows.truncate(self.count);
        table.refresh_types();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportgen_core::{ReportId, Table};
    use serde_json::{json, Map, Value};

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(ReportId::new(), Map::new())
    }

    fn scores() -> TableSet {
        let mut set = TableSet::new();
        set.insert(
            "t".into(),
            Table::new(
                vec!["name".into(), "score".into()],
                vec![
                    vec![json!("a"), json!(3)],
                    vec![json!("b"), Value::Null],
                    vec![json!("c"), json!(7.5)],
                    vec![json!("d"), json!(3)],
                ],
            ),
        );
        set
    }

    fn names(tables: &TableSet) -> Vec<Value> {
        tables["t"].rows.iter().map(|r| r[0].clone()).collect()
    }

    #[test]
    fn test_sort_is_stable_with_nulls_last() {
        let mut tables = scores();
        SortStage {
            table: "t".into(),
            by: "score".into(),
            descending: false,
        }
        .run(&mut tables, &ctx())
        .unwrap();
        assert_eq!(names(&tables), vec![json!("a"), json!("d"), json!("c"), json!("b")]);

        SortStage {
            table: "t".into(),
            by: "score".into(),
            descending: true,
        }
        .run(&mut tables, &ctx())
        .unwrap();
        assert_eq!(names(&tables), vec![json!("c"), json!("a"), json!("d"), json!("b")]);
    }

    #[test]
    fn test_select_reorders_columns() {
        let mut tables = scores();
        SelectStage {
            table: "t".into(),
            columns: vec!["score".into(), "name".into()],
        }
        .run(&mut tables, &ctx())
        .unwrap();
        assert_eq!(tables["t"].column_names(), vec!["score", "name"]);
        assert_eq!(tables["t"].rows[0], vec![json!(3), json!("a")]);
    }

    #[test]
    fn test_limit() {
        let mut tables = scores();
        LimitStage {
            table: "t".into(),
            count: 2,
        }
        .run(&mut tables, &ctx())
        .unwrap();
        assert_eq!(tables["t"].row_count(), 2);
    }
}
