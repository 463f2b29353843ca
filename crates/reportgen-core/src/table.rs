//! Tabular values exchanged between sources, processor stages and renderers.
//!
//! Cells are plain `serde_json::Value`s; column types are inferred from the
//! cells they hold so every source produces the same shape.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Boolean,
    /// Every cell is null.
    Null,
    /// Cells of incompatible types.
    Mixed,
}

impl ColumnType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            Value::Number(_) => Self::Float,
            Value::String(_) => Self::Text,
            Value::Array(_) | Value::Object(_) => Self::Mixed,
        }
    }

    /// Combine two observed types into the narrowest common type.
    fn widen(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Null, b) => b,
            (a, Self::Null) => a,
            (Self::Integer, Self::Float) | (Self::Float, Self::Integer) => Self::Float,
            _ => Self::Mixed,
        }
    }

    /// Whether `value` conforms to a column declared with this type.
    /// Nulls always conform; nullability is checked separately.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, ColumnType::of(value)) {
            (_, ColumnType::Null) => true,
            (Self::Mixed, _) => true,
            (Self::Float, ColumnType::Integer) => true,
            (expected, found) => *expected == found,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Null => "null",
            Self::Mixed => "mixed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub dtype: ColumnType,
}

/// Ordered rows with named, typed columns.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build a table and infer column types. Short rows are padded with nulls.
    pub fn new(names: Vec<String>, mut rows: Vec<Vec<Value>>) -> Self {
        let width = names.len();
        for row in &mut rows {
            row.resize(width, Value::Null);
        }
        let columns = names
            .into_iter()
            .enumerate()
            .map(|(idx, name)| Column {
                dtype: infer_type(rows.iter().map(|r| &r[idx])),
                name,
            })
            .collect();
        Self { columns, rows }
    }

    /// Build a table from JSON records. Column order follows first appearance.
    pub fn from_records(records: &[Value]) -> Result<Self, String> {
        let mut names: Vec<String> = Vec::new();
        for (idx, record) in records.iter().enumerate() {
            let obj = record
                .as_object()
                .ok_or_else(|| format!("record {} is not an object", idx))?;
            for key in obj.keys() {
                if !names.iter().any(|n| n == key) {
                    names.push(key.clone());
                }
            }
        }
        let rows = records
            .iter()
            .filter_map(|r| r.as_object())
            .map(|obj| {
                names
                    .iter()
                    .map(|n| obj.get(n).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Ok(Self::new(names, rows))
    }

    /// Build a table from text cells, parsing numbers and booleans.
    /// Empty cells become nulls.
    pub fn from_text_rows(names: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = names.len();
        let mut typed: Vec<Vec<Value>> = rows
            .into_iter()
            .map(|r| r.into_iter().map(Value::String).collect())
            .collect();

        for col in 0..width {
            let cells = typed.iter().filter_map(|r| r.get(col)).filter_map(|v| v.as_str());
            let parse = TextParse::detect(cells);
            for row in &mut typed {
                if let Some(cell) = row.get_mut(col) {
                    *cell = parse.apply(cell);
                }
            }
        }
        Self::new(names, typed)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let mut obj = Map::new();
                for (col, cell) in self.columns.iter().zip(row) {
                    obj.insert(col.name.clone(), cell.clone());
                }
                Value::Object(obj)
            })
            .collect()
    }

    /// Re-derive column types after rows were rewritten.
    pub fn refresh_types(&mut self) {
        for (idx, col) in self.columns.iter_mut().enumerate() {
            col.dtype = infer_type(self.rows.iter().filter_map(|r| r.get(idx)));
        }
    }

    /// Stable content hash, `blake3:<hex>`.
    pub fn content_hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        format!("blake3:{}", blake3::hash(&bytes))
    }
}

fn infer_type<'a>(cells: impl Iterator<Item = &'a Value>) -> ColumnType {
    cells.fold(ColumnType::Null, |acc, v| acc.widen(ColumnType::of(v)))
}

#[derive(Debug, Clone, Copy)]
enum TextParse {
    Integer,
    Float,
    Boolean,
    Text,
}

impl TextParse {
    fn detect<'a>(cells: impl Iterator<Item = &'a str>) -> Self {
        let mut seen = false;
        let (mut int, mut float, mut boolean) = (true, true, true);
        for cell in cells.map(str::trim).filter(|c| !c.is_empty()) {
            seen = true;
            int &= cell.parse::<i64>().is_ok();
            float &= cell.parse::<f64>().map(|f| f.is_finite()).unwrap_or(false);
            boolean &= matches!(cell.to_ascii_lowercase().as_str(), "true" | "false");
        }
        match (seen, int, float, boolean) {
            (false, ..) => Self::Text,
            (_, true, _, _) => Self::Integer,
            (_, _, true, _) => Self::Float,
            (_, _, _, true) => Self::Boolean,
            _ => Self::Text,
        }
    }

    fn apply(&self, cell: &Value) -> Value {
        let raw = match cell.as_str() {
            Some(s) => s,
            None => return cell.clone(),
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        match self {
            Self::Integer => trimmed.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
            Self::Float => trimmed.parse::<f64>().map(Value::from).unwrap_or(Value::Null),
            Self::Boolean => Value::Bool(trimmed.eq_ignore_ascii_case("true")),
            Self::Text => Value::String(raw.to_string()),
        }
    }
}

/// Tables keyed by logical name; iteration order is deterministic.
pub type TableSet = BTreeMap<String, Table>;

/// Declared column for schema validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub dtype: ColumnType,
    #[serde(default = "default_true")]
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
    #[serde(default = "default_true")]
    pub allow_extra_columns: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MissingColumn,
    UnexpectedColumn,
    NullValue,
    TypeMismatch,
}

/// One schema problem found during validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub table: String,
    pub column: String,
    pub row: Option<usize>,
    pub kind: ViolationKind,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_text_rows_infers_types() {
        let table = Table::from_text_rows(
            vec!["product".into(), "units".into(), "price".into(), "active".into()],
            vec![
                vec!["Widget A".into(), "150".into(), "9.5".into(), "true".into()],
                vec!["Widget B".into(), "".into(), "10".into(), "FALSE".into()],
            ],
        );
        let types: Vec<ColumnType> = table.columns.iter().map(|c| c.dtype).collect();
        assert_eq!(
            types,
            vec![ColumnType::Text, ColumnType::Integer, ColumnType::Float, ColumnType::Boolean]
        );
        assert_eq!(table.rows[1][1], Value::Null);
        assert_eq!(table.rows[1][3], json!(false));
    }

    #[test]
    fn test_from_records_keeps_source_key_order() {
        let records: Vec<Value> =
            serde_json::from_str(r#"[{"zeta": 1, "alpha": "a", "mid": true}]"#).unwrap();
        let table = Table::from_records(&records).unwrap();
        assert_eq!(table.column_names(), vec!["zeta", "alpha", "mid"]);
        let record = &table.to_records()[0];
        let keys: Vec<&String> = record.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_from_records_unions_keys() {
        let table = Table::from_records(&[json!({"a": 1}), json!({"a": 2, "b": "x"})]).unwrap();
        assert_eq!(table.column_names(), vec!["a", "b"]);
        assert_eq!(table.rows[0][1], Value::Null);
        assert_eq!(table.columns[1].dtype, ColumnType::Text);
    }

    #[test]
    fn test_from_records_rejects_scalars() {
        assert!(Table::from_records(&[json!(1)]).is_err());
    }

    #[test]
    fn test_float_accepts_integer() {
        assert!(ColumnType::Float.accepts(&json!(3)));
        assert!(!ColumnType::Integer.accepts(&json!(3.5)));
        assert!(ColumnType::Text.accepts(&Value::Null));
    }

    #[test]
    fn test_to_records_round_trips_names() {
        let table = Table::new(vec!["x".into()], vec![vec![json!(1)], vec![json!(2)]]);
        assert_eq!(table.to_records(), vec![json!({"x": 1}), json!({"x": 2})]);
    }
}
