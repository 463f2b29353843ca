use reportgen_core::{Column, ExecutionContext, JoinKind, Stage, StageError, Table, TableSet};
use serde_json::Value;
use std::collections::HashMap;

use super::{column, key_of, table};

/// Equi-join of two tables into a new one. Right columns that clash with a
/// left column name are prefixed with `<right>_`. Null keys never match.
pub struct JoinStage {
    pub left: String,
    pub right: String,
    pub left_on: String,
    pub right_on: String,
    pub kind: JoinKind,
    pub into: String,
}

impl Stage for JoinStage {
    fn id(&self) -> String {
        format!("join.{}", self.into)
    }

    fn inputs(&self) -> Vec<String> {
        vec![self.left.clone(), self.right.clone()]
    }

    fn output(&self) -> String {
        self.into.clone()
    }

    fn run(&self, tables: &mut TableSet, _ctx: &ExecutionContext) -> Result<(), StageError> {
        let left = table(tables, &self.left)?;
        let right = table(tables, &self.right)?;
        let l_key = column(left, &self.left, &self.left_on)?;
        let r_key = column(right, &self.right, &self.right_on)?;

        let right_keep: Vec<usize> = (0..right.columns.len()).filter(|&i| i != r_key).collect();
        let mut names: Vec<String> = left.columns.iter().map(|c| c.name.clone()).collect();
        for &i in &right_keep {
            let name = &right.columns[i].name;
            if names.contains(name) {
                names.push(format!("{}_{}", self.right, name));
            } else {
                names.push(name.clone());
            }
        }

        let mut lookup: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, row) in right.rows.iter().enumerate() {
            if !row[r_key].is_null() {
                lookup.entry(key_of(&row[r_key])).or_default().push(idx);
            }
        }

        let mut rows = Vec::new();
        for l_row in &left.rows {
            let matches = if l_row[l_key].is_null() {
                None
            } else {
                lookup.get(&key_of(&l_row[l_key]))
            };
            match matches {
                Some(found) => {
                    for &r in found {
                        let mut row = l_row.clone();
                        row.extend(right_keep.iter().map(|&i| right.rows[r][i].clone()));
                        rows.push(row);
                    }
                }
                None if self.kind == JoinKind::Left => {
                    let mut row = l_row.clone();
                    row.extend(right_keep.iter().map(|_| Value::Null));
                    rows.push(row);
                }
                None => {}
            }
        }

        let mut joined = Table::new(names, rows);
        // Keep declared types from the inputs where inference saw only nulls.
        let declared: Vec<&Column> = left
            .columns
            .iter()
            .chain(right_keep.iter().map(|&i| &right.columns[i]))
            .collect();
        for (col, source) in joined.columns.iter_mut().zip(declared) {
            if col.dtype == reportgen_core::ColumnType::Null {
                col.dtype = source.dtype;
            }
        }
        tables.insert(self.into.clone(), joined);
        Ok(())
    }
}
