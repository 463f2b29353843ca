//! Excel output: one worksheet per table plus a `parameters` sheet.
use reportgen_core::{ReportError, Result, Table, TableSet};
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use serde_json::{Map, Value};
use std::collections::HashSet;

const MAX_SHEET_NAME: usize = 31;

pub fn write_workbook(tables: &TableSet, parameters: &Map<String, Value>) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let mut used = HashSet::new();

    for (name, table) in tables {
        let sheet = workbook.add_worksheet();
        sheet.set_name(unique_sheet_name(name, &mut used)).map_err(xlsx_error)?;
        write_table(sheet, table, &header)?;
    }

    if !parameters.is_empty() {
        let sheet = workbook.add_worksheet();
        sheet.set_name(unique_sheet_name("parameters", &mut used)).map_err(xlsx_error)?;
        sheet.write_string_with_format(0, 0, "parameter", &header).map_err(xlsx_error)?;
        sheet.write_string_with_format(0, 1, "value", &header).map_err(xlsx_error)?;
        for (idx, (key, value)) in parameters.iter().enumerate() {
            let row = row_index(idx + 1)?;
            sheet.write_string(row, 0, key.as_str()).map_err(xlsx_error)?;
            write_cell(sheet, row, 1, value)?;
        }
        sheet.autofit();
    }

    workbook.save_to_buffer().map_err(xlsx_error)
}

fn write_table(sheet: &mut Worksheet, table: &Table, header: &Format) -> Result<()> {
    for (idx, column) in table.columns.iter().enumerate() {
        sheet
            .write_string_with_format(0, col_index(idx)?, column.name.as_str(), header)
            .map_err(xlsx_error)?;
    }
    for (r, row) in table.rows.iter().enumerate() {
        let row_no = row_index(r + 1)?;
        for (c, cell) in row.iter().enumerate() {
            write_cell(sheet, row_no, col_index(c)?, cell)?;
        }
    }
    if !table.columns.is_empty() {
        sheet.set_freeze_panes(1, 0).map_err(xlsx_error)?;
    }
    sheet.autofit();
    Ok(())
}

fn write_cell(sheet: &mut Worksheet, row: u32, col: u16, value: &Value) -> Result<()> {
    let written = match value {
        Value::Null => return Ok(()),
        Value::Bool(b) => sheet.write_boolean(row, col, *b),
        Value::Number(n) => match n.as_f64() {
            Some(f) => sheet.write_number(row, col, f),
            None => sheet.write_string(row, col, n.to_string()),
        },
        Value::String(s) => sheet.write_string(row, col, s.as_str()),
        other => sheet.write_string(row, col, other.to_string()),
    };
    written.map(|_| ()).map_err(xlsx_error)
}

fn row_index(idx: usize) -> Result<u32> {
    u32::try_from(idx).map_err(|_| ReportError::render("excel", format!("row {} out of range", idx)))
}

fn col_index(idx: usize) -> Result<u16> {
    u16::try_from(idx)
        .map_err(|_| ReportError::render("excel", format!("column {} out of range", idx)))
}

fn xlsx_error(e: XlsxError) -> ReportError {
    ReportError::render("excel", e.to_string())
}

/// Excel sheet names: at most 31 characters, none of `[]:*?/\`, no
/// leading or trailing apostrophe, unique ignoring case.
pub fn sheet_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim_matches('\'');
    let name: String = trimmed.chars().take(MAX_SHEET_NAME).collect();
    if name.trim().is_empty() {
        "Sheet".to_string()
    } else {
        name
    }
}

fn unique_sheet_name(raw: &str, used: &mut HashSet<String>) -> String {
    let base = sheet_name(raw);
    let mut candidate = base.clone();
    let mut n = 2;
    while used.contains(&candidate.to_lowercase()) {
        let suffix = format!("_{}", n);
        let keep = MAX_SHEET_NAME - suffix.len();
        candidate = format!("{}{}", base.chars().take(keep).collect::<String>(), suffix);
        n += 1;
    }
    used.insert(candidate.to_lowercase());
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::{Data, Reader, Xlsx};
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_sheet_name_sanitizing() {
        assert_eq!(sheet_name("sales/2024:q1"), "sales_2024_q1");
        assert_eq!(sheet_name("'quoted'"), "quoted");
        assert_eq!(sheet_name(""), "Sheet");
        assert_eq!(sheet_name(&"x".repeat(40)).len(), 31);
    }

    #[test]
    fn test_unique_names() {
        let mut used = HashSet::new();
        let long = "a".repeat(40);
        let first = unique_sheet_name(&long, &mut used);
        let second = unique_sheet_name(&long, &mut used);
        assert_ne!(first, second);
        assert_eq!(second.chars().count(), 31);
        assert!(second.ends_with("_2"));
        assert_eq!(unique_sheet_name("Params", &mut used), "Params");
        assert_eq!(unique_sheet_name("params", &mut used), "params_2");
    }

    #[test]
    fn test_workbook_round_trip() {
        let mut tables = TableSet::new();
        tables.insert(
            "sales".into(),
            Table::new(
                vec!["product".into(), "units".into(), "ok".into()],
                vec![
                    vec![json!("A"), json!(150), json!(true)],
                    vec![json!("B"), Value::Null, json!(false)],
                ],
            ),
        );
        let mut params = Map::new();
        params.insert("title".into(), json!("Weekly"));

        let bytes = write_workbook(&tables, &params).unwrap();
        let mut book: Xlsx<_> = Xlsx::new(Cursor::new(bytes)).unwrap();
        assert_eq!(book.sheet_names(), vec!["sales".to_string(), "parameters".to_string()]);

        let sales = book.worksheet_range("sales").unwrap();
        assert_eq!(sales.get_size(), (3, 3));
        assert_eq!(sales.get((0, 0)), Some(&Data::String("product".into())));
        assert_eq!(sales.get((1, 1)), Some(&Data::Float(150.0)));
        assert_eq!(sales.get((1, 2)), Some(&Data::Bool(true)));

        let params = book.worksheet_range("parameters").unwrap();
        assert_eq!(params.get((1, 1)), Some(&Data::String("Weekly".into())));
    }
}
