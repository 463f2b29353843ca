//! JSON output: one table renders as an array of records, several as an
//! object keyed by table name.
use reportgen_core::{ReportError, Result, TableSet};
use serde_json::{Map, Value};

pub fn tables_to_value(tables: &TableSet) -> Value {
    match tables.values().next() {
        Some(only) if tables.len() == 1 => Value::Array(only.to_records()),
        _ => Value::Object(
            tables
                .iter()
                .map(|(name, table)| (name.clone(), Value::Array(table.to_records())))
                .collect::<Map<_, _>>(),
        ),
    }
}

pub fn write_json(tables: &TableSet) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(&tables_to_value(tables))
        .map_err(|e| ReportError::render("json", e.to_string()))
}
