//! Schema validation. Every violation is collected, not just the first.
use reportgen_core::{
    ReportError, Result, Table, TableSchema, TableSet, ValidationPolicy, Violation, ViolationKind,
};
use std::collections::BTreeMap;

/// Check `table` against `schema`. Returns all violations found.
pub fn validate(name: &str, table: &Table, schema: &TableSchema) -> std::result::Result<(), Vec<Violation>> {
    let mut violations = Vec::new();

    for declared in &schema.columns {
        let Some(idx) = table.column_index(&declared.name) else {
            violations.push(Violation {
                table: name.to_string(),
                column: declared.name.clone(),
                row: None,
                kind: ViolationKind::MissingColumn,
                message: format!("column '{}' is missing", declared.name),
            });
            continue;
        };

        for (row_no, row) in table.rows.iter().enumerate() {
            let cell = &row[idx];
            if cell.is_null() {
                if !declared.nullable {
                    violations.push(Violation {
                        table: name.to_string(),
                        column: declared.name.clone(),
                        row: Some(row_no),
                        kind: ViolationKind::NullValue,
                        message: format!("row {}: '{}' must not be null", row_no, declared.name),
                    });
                }
            } else if !declared.dtype.accepts(cell) {
                violations.push(Violation {
                    table: name.to_string(),
                    column: declared.name.clone(),
                    row: Some(row_no),
                    kind: ViolationKind::TypeMismatch,
                    message: format!(
                        "row {}: '{}' expected {}, found {}",
                        row_no, declared.name, declared.dtype, cell
                    ),
                });
            }
        }
    }

    if !schema.allow_extra_columns {
        for col in &table.columns {
            if !schema.columns.iter().any(|c| c.name == col.name) {
                violations.push(Violation {
                    table: name.to_string(),
                    column: col.name.clone(),
                    row: None,
                    kind: ViolationKind::UnexpectedColumn,
                    message: format!("column '{}' is not declared", col.name),
                });
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// Validate every table that has a schema. Tables absent from `tables`
/// (failed optional sources) are skipped.
///
/// Under `Fatal` any violation fails with a processing error carrying all of
/// them; under `Warn` they are returned for the artifact metadata.
pub fn check_schemas(
    tables: &TableSet,
    schemas: &BTreeMap<String, TableSchema>,
    policy: ValidationPolicy,
) -> Result<Vec<Violation>> {
    let mut all = Vec::new();
    for (name, schema) in schemas {
        if let Some(table) = tables.get(name) {
            if let Err(found) = validate(name, table, schema) {
                all.extend(found);
            }
        }
    }

    match policy {
        ValidationPolicy::Fatal if !all.is_empty() => Err(ReportError::Processing {
            stage: "validate".to_string(),
            message: format!("{} schema violation(s)", all.len()),
            violations: all,
        }),
        _ => Ok(all),
    }
}
