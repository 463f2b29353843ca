//! Local CSV, JSON and Excel files.
//!
//! A file is parsed completely or rejected; partial tables are never returned.
use async_trait::async_trait;
use calamine::{open_workbook_auto, Data, Reader};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use reportgen_core::{
    FetchErrorKind, FileConfig, FileFormat, ReportError, Result, SourceConfig, SourceKind, Table,
};

use crate::DataSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Utf8,
    Latin1,
}

impl Encoding {
    fn parse(label: Option<&str>) -> Option<Self> {
        match label.map(|l| l.trim().to_ascii_lowercase()) {
            None => Some(Self::Utf8),
            Some(l) => match l.as_str() {
                "utf-8" | "utf8" => Some(Self::Utf8),
                "latin-1" | "latin1" | "iso-8859-1" => Some(Self::Latin1),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct FileSource;

impl FileSource {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(name: &str, config: &FileConfig) -> Result<()> {
        if config.path.as_os_str().is_empty() {
            return Err(ReportError::config(format!("source '{}': path is empty", name)));
        }
        if config.resolved_format().is_none() {
            return Err(ReportError::config(format!(
                "source '{}': cannot infer format of {}, declare one of csv, json, excel",
                name,
                config.path.display()
            )));
        }
        if Encoding::parse(config.encoding.as_deref()).is_none() {
            return Err(ReportError::config(format!(
                "source '{}': unsupported encoding '{}'",
                name,
                config.encoding.as_deref().unwrap_or_default()
            )));
        }
        if let Some(d) = config.delimiter {
            if !d.is_ascii() || d == '"' || d == '\n' {
                return Err(ReportError::config(format!(
                    "source '{}': delimiter must be a single ASCII character other than quote or newline",
                    name
                )));
            }
        }
        Ok(())
    }

    fn config<'a>(config: &'a SourceConfig) -> Result<&'a FileConfig> {
        match &config.kind {
            SourceKind::File(file) => Ok(file),
            _ => Err(ReportError::config(format!(
                "source '{}' is not a file source",
                config.name
            ))),
        }
    }
}

#[async_trait]
impl DataSource for FileSource {
    async fn fetch(&self, config: &SourceConfig) -> Result<Table> {
        let file = Self::config(config)?.clone();
        Self::validate(&config.name, &file)?;
        let name = config.name.clone();

        let table = tokio::task::spawn_blocking(move || read_file(&name, &file))
            .await
            .map_err(|e| {
                ReportError::fetch(&config.name, FetchErrorKind::Parse, format!("reader task failed: {}", e))
            })??;
        debug!(source = %config.name, rows = table.row_count(), "file parsed");
        Ok(table)
    }

    async fn test_connection(&self, config: &SourceConfig) -> Result<bool> {
        let file = Self::config(config)?;
        Self::validate(&config.name, file)?;
        Ok(tokio::fs::metadata(&file.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }
}

fn read_file(name: &str, config: &FileConfig) -> Result<Table> {
    let parse_err = |msg: String| ReportError::fetch(name, FetchErrorKind::Parse, msg);
    let format = config
        .resolved_format()
        .ok_or_else(|| ReportError::config(format!("source '{}': unknown file format", name)))?;

    if !config.path.exists() {
        return Err(ReportError::fetch(
            name,
            FetchErrorKind::NotFound,
            format!("file not found: {}", config.path.display()),
        ));
    }

    match format {
        FileFormat::Excel => read_excel(&config.path, config.sheet.as_deref()).map_err(parse_err),
        FileFormat::Csv | FileFormat::Json => {
            let bytes = std::fs::read(&config.path).map_err(|e| {
                ReportError::fetch(
                    name,
                    FetchErrorKind::Connection,
                    format!("failed to read {}: {}", config.path.display(), e),
                )
            })?;
            let encoding = Encoding::parse(config.encoding.as_deref()).unwrap_or(Encoding::Utf8);
            let text = decode(&bytes, encoding).map_err(parse_err)?;
            if format == FileFormat::Csv {
                read_csv(&text, config.delimiter.unwrap_or(',')).map_err(parse_err)
            } else {
                read_json(&text).map_err(parse_err)
            }
        }
    }
}

fn decode(bytes: &[u8], encoding: Encoding) -> std::result::Result<String, String> {
    match encoding {
        Encoding::Utf8 => {
            let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
            String::from_utf8(body.to_vec())
                .map_err(|e| format!("file is not valid utf-8 (byte {}), try encoding latin-1", e.utf8_error().valid_up_to()))
        }
        Encoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
    }
}

fn read_csv(text: &str, delimiter: char) -> std::result::Result<Table, String> {
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Err("declared csv but the file is empty".to_string());
    }
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        return Err("declared csv but the content looks like JSON".to_string());
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .flexible(false)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| format!("invalid csv header: {}", e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if let Some(pos) = headers.iter().position(|h| h.is_empty()) {
        return Err(format!("csv header column {} is blank", pos + 1));
    }
    for (idx, header) in headers.iter().enumerate() {
        if headers[..idx].contains(header) {
            return Err(format!("csv header '{}' appears more than once", header));
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| format!("invalid csv record: {}", e))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(Table::from_text_rows(headers, rows))
}

fn read_json(text: &str) -> std::result::Result<Table, String> {
    let payload: Value = serde_json::from_str(text)
        .map_err(|e| format!("declared json but the content is not valid JSON: {}", e))?;
    match payload {
        Value::Array(items) => Table::from_records(&items),
        Value::Object(mut obj) => match obj.remove("data").or_else(|| obj.remove("results")) {
            Some(Value::Array(items)) => Table::from_records(&items),
            _ => Err("json object must hold a 'data' or 'results' array of records".to_string()),
        },
        _ => Err("json content must be an array of records".to_string()),
    }
}

fn read_excel(path: &Path, sheet: Option<&str>) -> std::result::Result<Table, String> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| format!("declared excel but the workbook cannot be opened: {}", e))?;

    let sheet_name = match sheet {
        Some(s) => s.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| "workbook has no sheets".to_string())?,
    };
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| format!("cannot read sheet '{}': {}", sheet_name, e))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header) => header.iter().map(|c| c.to_string().trim().to_string()).collect(),
        None => return Ok(Table::default()),
    };
    if let Some(pos) = headers.iter().position(|h| h.is_empty()) {
        return Err(format!("sheet '{}' header column {} is blank", sheet_name, pos + 1));
    }

    let data = rows
        .map(|row| row.iter().map(cell_value).collect())
        .collect();
    Ok(Table::new(headers, data))
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::Int(i) => Value::from(*i),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Value::from(*f as i64),
        Data::Float(f) => Value::from(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}
