//! Render context: the only data a template can see.
use chrono::{DateTime, SecondsFormat, Utc};
use reportgen_core::{ReportId, Table, TableSet};
use serde_json::{json, Map, Value};

/// Everything the renderer needs about one report run.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub report_id: ReportId,
    pub generated_at: DateTime<Utc>,
    pub parameters: Map<String, Value>,
    pub tables: TableSet,
    /// Optional sources that failed; exposed as `null` under `tables`.
    pub missing: Vec<String>,
}

impl RenderContext {
    pub fn new(report_id: ReportId, parameters: Map<String, Value>, tables: TableSet) -> Self {
        Self {
            report_id,
            generated_at: Utc::now(),
            parameters,
            tables,
            missing: Vec::new(),
        }
    }

    pub fn with_missing(mut self, missing: Vec<String>) -> Self {
        self.missing = missing;
        self
    }

    pub fn with_generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = at;
        self
    }

    /// JSON value handed to Handlebars.
    ///
    /// Parameters sit at the top level; `tables`, `data` and `report` are
    /// reserved and always win over a parameter of the same name.
    pub fn to_value(&self) -> Value {
        let mut root = self.parameters.clone();

        let mut tables = Map::new();
        for (name, table) in &self.tables {
            tables.insert(name.clone(), table_value(table));
        }
        for name in &self.missing {
            tables.entry(name.clone()).or_insert(Value::Null);
        }

        let data = match self.tables.values().next() {
            Some(only) if self.tables.len() == 1 => Value::Array(only.to_records()),
            _ => Value::Object(tables.clone()),
        };

        root.insert("tables".to_string(), Value::Object(tables));
        root.insert("data".to_string(), data);
        root.insert(
            "report".to_string(),
            json!({
                "id": self.report_id.to_string(),
                "generated_at": self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                "sources": self.tables.keys().collect::<Vec<_>>(),
                "missing": self.missing,
            }),
        );
        Value::Object(root)
    }
}

fn table_value(table: &Table) -> Value {
    json!({
        "columns": table.column_names(),
        "rows": table.to_records(),
        "row_count": table.row_count(),
    })
}
