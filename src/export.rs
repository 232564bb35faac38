//! Tabular export to CSV, XLSX and JSON.
//!
//! API records are flattened (see [`crate::flatten`]) into a [`Table`]
//! whose columns are the union of every record's keys, in first-seen
//! order. Records missing a column get an empty cell.
//!
//! Output files are written once. When timestamping is enabled the file
//! name carries a `YYYYmmdd-HHMMSS` suffix so repeated runs never
//! overwrite earlier exports.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::Result;
use crate::flatten::{Flattener, scalar_text};

/// Output file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
    Xlsx,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Xlsx => "xlsx",
        }
    }
}

/// Builds `{dir}/{stem}.{ext}` or `{dir}/{stem}-{YYYYmmdd-HHMMSS}.{ext}`.
pub fn output_path(
    dir: &Path,
    stem: &str,
    format: ExportFormat,
    timestamp: Option<NaiveDateTime>,
) -> PathBuf {
    let name = match timestamp {
        Some(ts) => format!("{stem}-{}.{}", ts.format("%Y%m%d-%H%M%S"), format.extension()),
        None => format!("{stem}.{}", format.extension()),
    };
    dir.join(name)
}

/// Flattened rows with a stable column order.
///
/// The table remembers the separator its keys were joined with, so that
/// [`Table::drop_columns`] can find the children of a nested column.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Map<String, Value>>,
    separator: String,
}

impl Default for Table {
    fn default() -> Self {
        Table {
            columns: Vec::new(),
            rows: Vec::new(),
            separator: Flattener::default().separator().to_string(),
        }
    }
}

impl Table {
    /// Flattens each record and collects the union of their keys.
    pub fn from_records(records: &[Value], flattener: &Flattener) -> Result<Self> {
        let rows = records
            .iter()
            .map(|record| flattener.flatten(record))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_flat_rows(rows).with_separator(flattener.separator()))
    }

    /// Builds a table from rows that are already flat, joined with the
    /// default `.` separator.
    pub fn from_flat_rows(rows: Vec<Map<String, Value>>) -> Self {
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if seen.insert(key.clone()) {
                    columns.push(key.clone());
                }
            }
        }
        Table {
            columns,
            rows,
            ..Table::default()
        }
    }

    /// Sets the separator nested keys were joined with.
    pub fn with_separator(mut self, separator: &str) -> Self {
        self.separator = separator.to_string();
        self
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Map<String, Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Removes the named columns and any nested columns under them. With
    /// the `.` separator, dropping `stats` also drops `stats.count`; with
    /// `_` it drops `stats_count`.
    pub fn drop_columns(&mut self, names: &[&str]) {
        let sep = self.separator.as_str();
        let doomed = |col: &str| {
            names.iter().any(|n| {
                col == *n
                    || (!sep.is_empty()
                        && col.strip_prefix(n).is_some_and(|rest| rest.starts_with(sep)))
            })
        };
        self.columns.retain(|c| !doomed(c.as_str()));
        for row in &mut self.rows {
            row.retain(|k, _| !doomed(k.as_str()));
        }
    }

    /// Keeps only `names`, in that order. Names no row has are skipped.
    pub fn select(&mut self, names: &[&str]) {
        self.columns = names
            .iter()
            .filter(|n| self.columns.iter().any(|c| c == *n))
            .map(|n| n.to_string())
            .collect();
        let keep: HashSet<&str> = self.columns.iter().map(String::as_str).collect();
        for row in &mut self.rows {
            row.retain(|k, _| keep.contains(k.as_str()));
        }
    }

    /// Renames a column in place, keeping its position.
    pub fn rename_column(&mut self, from: &str, to: &str) {
        let Some(idx) = self.column_index(from) else {
            return;
        };
        self.columns[idx] = to.to_string();
        for row in &mut self.rows {
            if let Some(v) = row.remove(from) {
                row.insert(to.to_string(), v);
            }
        }
    }

    /// Rewrites every value of one column.
    pub fn map_column(&mut self, name: &str, f: impl Fn(&Value) -> Value) {
        for row in &mut self.rows {
            if let Some(v) = row.get_mut(name) {
                *v = f(v);
            }
        }
    }

    /// Appends a column, filling it from `f(row)`.
    pub fn add_column(&mut self, name: &str, f: impl Fn(&Map<String, Value>) -> Value) {
        if self.column_index(name).is_none() {
            self.columns.push(name.to_string());
        }
        for row in &mut self.rows {
            let v = f(row);
            row.insert(name.to_string(), v);
        }
    }

    /// Text of one cell; missing cells are empty.
    pub fn cell_text(&self, row: usize, column: &str) -> String {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(scalar_text)
            .unwrap_or_default()
    }
}

/// Writes `table` as CSV with a header row.
pub fn write_csv(table: &Table, path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    write_csv_to(table, &mut wtr)?;
    wtr.flush()?;
    info!(path = %path.display(), rows = table.len(), "wrote CSV");
    Ok(())
}

/// Writes `table` to an existing CSV writer.
pub fn write_csv_to<W: Write>(table: &Table, wtr: &mut csv::Writer<W>) -> Result<()> {
    wtr.write_record(table.columns())?;
    for row in table.rows() {
        let record = table
            .columns()
            .iter()
            .map(|col| row.get(col).map(scalar_text).unwrap_or_default());
        wtr.write_record(record)?;
    }
    Ok(())
}

/// Writes any serializable value as pretty-printed JSON.
pub fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, value)?;
    out.write_all(b"\n")?;
    out.flush()?;
    info!(path = %path.display(), "wrote JSON");
    Ok(())
}

/// Writes `table` in the requested format. JSON output is the array of
/// flattened rows.
pub fn write_table(table: &Table, format: ExportFormat, path: &Path, sheet: &str) -> Result<()> {
    match format {
        ExportFormat::Csv => write_csv(table, path),
        ExportFormat::Json => write_json(table.rows(), path),
        ExportFormat::Xlsx => {
            let mut workbook = Workbook::new();
            workbook.add_table_sheet(sheet, table)?;
            workbook.save(path)
        }
    }
}

/// Excel forbids these in sheet names.
const FORBIDDEN_SHEET_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];
const MAX_SHEET_NAME: usize = 31;

/// Makes `name` a legal Excel sheet name.
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if FORBIDDEN_SHEET_CHARS.contains(&c) { '_' } else { c })
        .take(MAX_SHEET_NAME)
        .collect();
    let trimmed = cleaned.trim_matches('\'').to_string();
    if trimmed.is_empty() {
        "Sheet".to_string()
    } else {
        trimmed
    }
}

/// Multi-sheet XLSX workbook.
pub struct Workbook {
    inner: rust_xlsxwriter::Workbook,
    used_names: HashSet<String>,
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

impl Workbook {
    pub fn new() -> Self {
        Workbook {
            inner: rust_xlsxwriter::Workbook::new(),
            used_names: HashSet::new(),
        }
    }

    /// Excel compares sheet names case-insensitively; clashes get a `~N` suffix.
    fn unique_name(&mut self, name: &str) -> String {
        let base = sanitize_sheet_name(name);
        let mut candidate = base.clone();
        let mut n = 2;
        while self.used_names.contains(&candidate.to_lowercase()) {
            let suffix = format!("~{n}");
            let keep = MAX_SHEET_NAME.saturating_sub(suffix.len());
            candidate = format!("{}{suffix}", base.chars().take(keep).collect::<String>());
            n += 1;
        }
        self.used_names.insert(candidate.to_lowercase());
        candidate
    }

    /// Adds a sheet with a header row and one row per table row.
    /// Returns the sheet name actually used.
    pub fn add_table_sheet(&mut self, name: &str, table: &Table) -> Result<String> {
        let name = self.unique_name(name);
        let sheet = self.inner.add_worksheet();
        sheet.set_name(&name)?;
        for (c, col) in table.columns().iter().enumerate() {
            sheet.write_string(0, col_num(c), col)?;
        }
        for (r, row) in table.rows().iter().enumerate() {
            let r = row_num(r + 1);
            for (c, col) in table.columns().iter().enumerate() {
                if let Some(v) = row.get(col) {
                    write_cell(sheet, r, col_num(c), v)?;
                }
            }
        }
        Ok(name)
    }

    /// Adds a two-column sheet (`key`, `value_header`) from a flat map.
    pub fn add_key_value_sheet(
        &mut self,
        name: &str,
        map: &Map<String, Value>,
        value_header: &str,
    ) -> Result<String> {
        let name = self.unique_name(name);
        let sheet = self.inner.add_worksheet();
        sheet.set_name(&name)?;
        sheet.write_string(0, 0, "key")?;
        sheet.write_string(0, 1, value_header)?;
        for (r, (key, value)) in map.iter().enumerate() {
            let r = row_num(r + 1);
            sheet.write_string(r, 0, key)?;
            write_cell(sheet, r, 1, value)?;
        }
        Ok(name)
    }

    pub fn sheet_count(&self) -> usize {
        self.used_names.len()
    }

    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.inner.save(path)?;
        info!(path = %path.display(), sheets = self.sheet_count(), "wrote XLSX");
        Ok(())
    }
}

fn row_num(i: usize) -> u32 {
    u32::try_from(i).unwrap_or(u32::MAX)
}

fn col_num(i: usize) -> u16 {
    u16::try_from(i).unwrap_or(u16::MAX)
}

fn write_cell(
    sheet: &mut rust_xlsxwriter::Worksheet,
    row: u32,
    col: u16,
    value: &Value,
) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Bool(b) => {
            sheet.write_boolean(row, col, *b)?;
        }
        Value::Number(n) => match n.as_f64() {
            Some(f) => {
                sheet.write_number(row, col, f)?;
            }
            None => {
                sheet.write_string(row, col, n.to_string())?;
            }
        },
        other => {
            sheet.write_string(row, col, scalar_text(other))?;
        }
    }
    Ok(())
}
