//! Source Reader: loads heterogeneous tabular ticket exports.
//!
//! Every regular file directly inside the input directory whose extension
//! is a known tabular format is parsed into a [`SourceTable`]. Files that
//! fail to parse are logged and skipped; the scan only fails when nothing
//! usable is left.
//!
//! | Extension | Reader |
//! |-----------|--------|
//! | `csv` | `csv` crate, comma-delimited, header row |
//! | `tsv` | `csv` crate, tab-delimited, header row |
//! | `json` | array of records or object of columns |
//! | `jsonl`, `ndjson` | one record object per line |
//! | `xlsx` | first worksheet, header row ([`xlsx`]) |
//! | `xls` | recognized, always reported unreadable |

mod xlsx;

use std::path::Path;

use serde_json::{Map, Value};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Tabular formats recognized by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Tsv,
    Json,
    JsonLines,
    Xlsx,
    LegacyXls,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            "json" => Some(Self::Json),
            "jsonl" | "ndjson" => Some(Self::JsonLines),
            "xlsx" => Some(Self::Xlsx),
            "xls" => Some(Self::LegacyXls),
            _ => None,
        }
    }
}

/// One successfully parsed source file.
///
/// `rows` are padded or truncated to `columns.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTable {
    pub source_file: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// A file the reader recognized but could not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSource {
    pub file: String,
    pub reason: String,
}

/// Outcome of scanning an input directory.
#[derive(Debug, Default)]
pub struct SourceScan {
    pub tables: Vec<SourceTable>,
    pub skipped: Vec<SkippedSource>,
}

impl SourceScan {
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }
}

/// Read every known tabular file directly inside `dir`, in file-name order.
///
/// # Errors
///
/// [`Error::NoUsableSources`] when the directory is missing or yields
/// zero tables. Individual file failures are recorded in
/// [`SourceScan::skipped`] and never abort the scan.
pub fn read_sources(dir: &Path) -> Result<SourceScan> {
    let mut scan = SourceScan::default();

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "cannot list source entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy().to_string();

        if SourceFormat::from_path(path).is_none() {
            tracing::debug!(file = %file_name, "ignoring file with unknown extension");
            continue;
        }

        match read_table(path) {
            Ok(table) => {
                tracing::info!(file = %file_name, rows = table.rows.len(), "loaded source");
                scan.tables.push(table);
            }
            Err(Error::SourceUnreadable { file, reason }) => {
                tracing::warn!(file = %file, reason = %reason, "skipping unreadable source");
                scan.skipped.push(SkippedSource { file, reason });
            }
            Err(e) => return Err(e),
        }
    }

    if scan.tables.is_empty() {
        return Err(Error::NoUsableSources {
            dir: dir.to_path_buf(),
        });
    }

    Ok(scan)
}

/// Parse a single source file.
///
/// Every parse failure is reported as [`Error::SourceUnreadable`].
pub fn read_table(path: &Path) -> Result<SourceTable> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let unreadable = |reason: String| Error::SourceUnreadable {
        file: file_name.clone(),
        reason,
    };

    let format = SourceFormat::from_path(path)
        .ok_or_else(|| unreadable("unsupported file extension".to_string()))?;

    let (columns, rows) = match format {
        SourceFormat::Csv => read_delimited(path, b','),
        SourceFormat::Tsv => read_delimited(path, b'\t'),
        SourceFormat::Json => std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|s| parse_json_table(&s)),
        SourceFormat::JsonLines => std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|s| parse_json_lines(&s)),
        SourceFormat::Xlsx => std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| xlsx::read_first_sheet(&bytes).map_err(|e| e.to_string())),
        SourceFormat::LegacyXls => Err("legacy .xls workbooks are not supported".to_string()),
    }
    .map_err(unreadable)?;

    if columns.is_empty() {
        return Err(unreadable("no header row".to_string()));
    }

    let width = columns.len();
    let rows = rows
        .into_iter()
        .map(|mut row| {
            row.resize(width, String::new());
            row
        })
        .collect();

    Ok(SourceTable {
        source_file: file_name,
        columns,
        rows,
    })
}

type RawTable = (Vec<String>, Vec<Vec<String>>);

fn read_delimited(path: &Path, delimiter: u8) -> Result<RawTable, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .has_headers(true)
        .from_path(path)
        .map_err(|e| e.to_string())?;

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| e.to_string())?
        .iter()
        .enumerate()
        .map(|(i, h)| {
            if i == 0 {
                h.trim_start_matches('\u{feff}').to_string()
            } else {
                h.to_string()
            }
        })
        .collect();

    if columns.len() == 1 && columns[0].is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok((columns, rows))
}

/// Parse a JSON document holding either a list of records or an object of
/// columns (`{"col": {"0": v, ...}}` or `{"col": [v, ...]}`).
pub(crate) fn parse_json_table(text: &str) -> Result<RawTable, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    match value {
        Value::Array(items) => {
            let mut records = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Object(map) => records.push(map),
                    other => {
                        return Err(format!(
                            "expected an array of objects, found {}",
                            json_kind(&other)
                        ))
                    }
                }
            }
            Ok(records_to_table(records))
        }
        Value::Object(map) => {
            if map.values().all(|v| v.is_object() || v.is_array()) && !map.is_empty() {
                columns_to_table(map)
            } else {
                Ok(records_to_table(vec![map]))
            }
        }
        other => Err(format!(
            "expected an array or object at top level, found {}",
            json_kind(&other)
        )),
    }
}

pub(crate) fn parse_json_lines(text: &str) -> Result<RawTable, String> {
    let mut records = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => records.push(map),
            Ok(other) => {
                return Err(format!(
                    "line {}: expected an object, found {}",
                    n + 1,
                    json_kind(&other)
                ))
            }
            Err(e) => return Err(format!("line {}: {}", n + 1, e)),
        }
    }
    Ok(records_to_table(records))
}

fn records_to_table(records: Vec<Map<String, Value>>) -> RawTable {
    let mut columns: Vec<String> = Vec::new();
    for record in &records {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let rows = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|c| record.get(c).map(json_cell).unwrap_or_default())
                .collect()
        })
        .collect();

    (columns, rows)
}

fn columns_to_table(map: Map<String, Value>) -> Result<RawTable, String> {
    let columns: Vec<String> = map.keys().cloned().collect();

    let mut row_keys: Vec<String> = Vec::new();
    for value in map.values() {
        match value {
            Value::Object(cells) => {
                for key in cells.keys() {
                    if !row_keys.contains(key) {
                        row_keys.push(key.clone());
                    }
                }
            }
            Value::Array(cells) => {
                for i in row_keys.len()..cells.len() {
                    row_keys.push(i.to_string());
                }
            }
            _ => return Err("column-oriented JSON must map columns to objects or arrays".into()),
        }
    }

    // Numeric row labels are positions, not strings.
    if row_keys.iter().all(|k| k.parse::<usize>().is_ok()) {
        row_keys.sort_by_key(|k| k.parse::<usize>().unwrap_or(usize::MAX));
    }

    let rows = row_keys
        .iter()
        .map(|key| {
            map.values()
                .map(|column| {
                    let cell = match column {
                        Value::Object(cells) => cells.get(key),
                        Value::Array(cells) => key.parse::<usize>().ok().and_then(|i| cells.get(i)),
                        _ => None,
                    };
                    cell.map(json_cell).unwrap_or_default()
                })
                .collect()
        })
        .collect();

    Ok((columns, rows))
}

/// Stringify a JSON cell the way it would appear in a text export.
fn json_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
