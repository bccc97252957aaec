//! Normalizer: reconciles heterogeneous source tables into [`TicketRecord`]s.
//!
//! Applied in order over the combined rows of every source table:
//!
//! 1. **Columns**: names are trimmed, lowercased, and spaces become
//!    underscores, then mapped onto the fixed record fields. Absent
//!    required fields stay empty strings.
//! 2. **Ticket IDs**: `TCKT-<first digit run>`, or
//!    `TCKT-<100000 + row_index>` when the raw id has no digits.
//! 3. **Dates**: parsed leniently into `YYYY-MM-DD`; anything
//!    unparseable becomes the empty string.
//! 4. **Embedding text**: `"Issue: {issue} - Description: {description}"`.
//!
//! The result is persisted to a CSV snapshot ([`write_snapshot`]) that the
//! document builder can re-read without rerunning ingestion.

use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use regex::Regex;

use crate::error::{Error, Result};
use crate::models::TicketRecord;
use crate::sources::SourceTable;

/// Prefix of every canonical ticket identifier.
pub const TICKET_ID_PREFIX: &str = "TCKT-";

/// Base added to the row position when a raw id carries no digits.
pub const FALLBACK_ID_BASE: usize = 100_000;

/// Column order of the unified snapshot, before any extra columns.
pub const SNAPSHOT_COLUMNS: [&str; 10] = [
    "ticket_id",
    "issue",
    "description",
    "resolution",
    "category",
    "resolved",
    "date",
    "agent_name",
    "source_file",
    "embedding_text",
];

static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").expect("valid regex"));

/// Lowercase, trim, and replace spaces with underscores.
pub fn normalize_column_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Canonical ticket id for a raw identifier at `row_index` in the combined table.
pub fn normalize_ticket_id(raw: &str, row_index: usize) -> String {
    match DIGIT_RUN.find(raw.trim()) {
        Some(m) => format!("{}{}", TICKET_ID_PREFIX, m.as_str()),
        None => format!("{}{}", TICKET_ID_PREFIX, FALLBACK_ID_BASE + row_index),
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M %p",
    "%d.%m.%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m/%d/%y",
    "%m-%d-%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%Y%m%d",
];

/// Parse a free-form date leniently.
///
/// Returns `None` for anything that is not recognizably a calendar date;
/// callers treat that as an empty date, never as an error.
pub fn parse_date_lenient(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.date_naive());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }

    spreadsheet_serial_date(s)
}

/// Spreadsheet exports store dates as day counts in the 1900 date system.
fn spreadsheet_serial_date(s: &str) -> Option<NaiveDate> {
    let serial: f64 = s.parse().ok()?;
    if !(10_000.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.trunc() as i64))
}

/// Canonical `YYYY-MM-DD` form, or empty when unparseable.
pub fn normalize_date(raw: &str) -> String {
    parse_date_lenient(raw)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

pub fn embedding_text(issue: &str, description: &str) -> String {
    format!("Issue: {} - Description: {}", issue, description)
}

/// Map normalized column names onto a record's fixed fields.
///
/// Duplicate columns resolve to the first non-empty value.
fn assign(record: &mut TicketRecord, column: &str, value: &str) {
    let slot = match column {
        "ticket_id" => &mut record.ticket_id,
        "issue" => &mut record.issue,
        "description" => &mut record.description,
        "resolution" => &mut record.resolution,
        "category" => &mut record.category,
        "resolved" => &mut record.resolved,
        "date" => &mut record.date,
        "agent_name" => &mut record.agent_name,
        "source_file" => &mut record.source_file,
        "embedding_text" => &mut record.embedding_text,
        _ => {
            match record.extra.iter_mut().find(|(k, _)| k == column) {
                Some((_, existing)) if existing.is_empty() => *existing = value.to_string(),
                Some(_) => {}
                None => record.extra.push((column.to_string(), value.to_string())),
            }
            return;
        }
    };
    if slot.is_empty() {
        *slot = value.to_string();
    }
}

/// Project one table row onto the fixed schema without normalizing values.
fn project_row(columns: &[String], row: &[String]) -> TicketRecord {
    let mut record = TicketRecord::default();
    for (column, value) in columns.iter().zip(row.iter()) {
        assign(&mut record, column, value);
    }
    record
}

/// Combine source tables and apply every normalization step.
///
/// Rows are numbered across all tables in the order given; that position
/// seeds fallback ids, so the same inputs always produce the same ids.
/// A row that already carries a `source_file` value keeps it; otherwise it
/// is tagged with the file it was read from.
pub fn unify_tables(tables: &[SourceTable]) -> Vec<TicketRecord> {
    let mut records = Vec::with_capacity(tables.iter().map(|t| t.rows.len()).sum());

    for table in tables {
        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|c| normalize_column_name(c))
            .collect();

        for row in &table.rows {
            let mut record = project_row(&columns, row);
            if record.source_file.trim().is_empty() {
                record.source_file = table.source_file.clone();
            }
            records.push(record);
        }
    }

    normalize_records(&mut records);
    records
}

/// Apply id, date, and embedding-text normalization in place.
///
/// Idempotent: running it over its own output changes nothing.
pub fn normalize_records(records: &mut [TicketRecord]) {
    for (row_index, record) in records.iter_mut().enumerate() {
        record.ticket_id = normalize_ticket_id(&record.ticket_id, row_index);
        record.date = normalize_date(&record.date);
        record.embedding_text = embedding_text(&record.issue, &record.description);
    }
}

/// Persist the unified table as CSV, fixed columns first, then every extra
/// column in first-seen order. Written to a temporary file and renamed.
pub fn write_snapshot(path: &Path, records: &[TicketRecord]) -> Result<()> {
    let mut extra_columns: Vec<&str> = Vec::new();
    for record in records {
        for (key, _) in &record.extra {
            if !extra_columns.contains(&key.as_str()) {
                extra_columns.push(key);
            }
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("csv.tmp");

    {
        let mut writer = csv::Writer::from_path(&tmp)?;
        let header: Vec<&str> = SNAPSHOT_COLUMNS
            .iter()
            .copied()
            .chain(extra_columns.iter().copied())
            .collect();
        writer.write_record(&header)?;

        for record in records {
            let mut row: Vec<&str> = vec![
                record.ticket_id.as_str(),
                record.issue.as_str(),
                record.description.as_str(),
                record.resolution.as_str(),
                record.category.as_str(),
                record.resolved.as_str(),
                record.date.as_str(),
                record.agent_name.as_str(),
                record.source_file.as_str(),
                record.embedding_text.as_str(),
            ];
            for column in &extra_columns {
                let value = record
                    .extra
                    .iter()
                    .find(|(k, _)| k == column)
                    .map(|(_, v)| v.as_str())
                    .unwrap_or("");
                row.push(value);
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
    }

    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a snapshot back verbatim: fields are taken as written, with no
/// re-normalization. Missing columns read as empty strings.
pub fn read_snapshot(path: &Path) -> Result<Vec<TicketRecord>> {
    if !path.exists() {
        return Err(Error::SnapshotNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let columns: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| normalize_column_name(h.trim_start_matches('\u{feff}')))
        .collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let values: Vec<String> = row.iter().map(str::to_string).collect();
        records.push(project_row(&columns, &values));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table(file: &str, columns: &[&str], rows: &[&[&str]]) -> SourceTable {
        SourceTable {
            source_file: file.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn column_names_are_folded() {
        assert_eq!(normalize_column_name("  Ticket ID "), "ticket_id");
        assert_eq!(normalize_column_name("Agent Name"), "agent_name");
        assert_eq!(normalize_column_name("resolved"), "resolved");
    }

    #[test]
    fn ticket_id_uses_first_digit_run() {
        assert_eq!(normalize_ticket_id("Ticket #4412-b", 0), "TCKT-4412");
        assert_eq!(normalize_ticket_id("INC0012 / 77", 3), "TCKT-0012");
        assert_eq!(normalize_ticket_id("4412.0", 9), "TCKT-4412");
    }

    #[test]
    fn ticket_id_falls_back_to_position() {
        assert_eq!(normalize_ticket_id("", 0), "TCKT-100000");
        assert_eq!(normalize_ticket_id("no digits", 42), "TCKT-100042");
        assert_eq!(normalize_ticket_id("   ", 7), "TCKT-100007");
    }

    #[test]
    fn dates_are_coerced_or_blanked() {
        assert_eq!(normalize_date("2024-01-15"), "2024-01-15");
        assert_eq!(normalize_date("01/15/2024"), "2024-01-15");
        assert_eq!(normalize_date("2024-01-15 09:30:00"), "2024-01-15");
        assert_eq!(normalize_date("2024-01-15T09:30:00Z"), "2024-01-15");
        assert_eq!(normalize_date("Jan 15, 2024"), "2024-01-15");
        assert_eq!(normalize_date("20240115"), "2024-01-15");
        assert_eq!(normalize_date("45306"), "2024-01-15");
        assert_eq!(normalize_date("not a date"), "");
        assert_eq!(normalize_date(""), "");
        assert_eq!(normalize_date("13/45/2024"), "");
        assert_eq!(normalize_date("2024"), "");
    }

    #[test]
    fn missing_columns_are_backfilled() {
        let records = unify_tables(&[table(
            "a.csv",
            &["Ticket ID", "Issue", "Description"],
            &[&["1", "VPN drops", "disconnects"], &["2", "Printer", "offline"]],
        )]);

        assert_eq!(records.len(), 2);
        for r in &records {
            assert_eq!(r.resolution, "");
            assert_eq!(r.category, "");
            assert_eq!(r.resolved, "");
            assert_eq!(r.date, "");
            assert_eq!(r.source_file, "a.csv");
        }
        assert_eq!(
            records[0].embedding_text,
            "Issue: VPN drops - Description: disconnects"
        );
    }

    #[test]
    fn row_positions_span_all_tables() {
        let records = unify_tables(&[
            table("a.csv", &["id", "issue"], &[&["x", "one"], &["7", "two"]]),
            table("b.csv", &["ticket_id", "issue"], &[&["", "three"]]),
        ]);
        let ids: Vec<&str> = records.iter().map(|r| r.ticket_id.as_str()).collect();
        // "id" is not "ticket_id": the first table has no id column at all.
        assert_eq!(ids, vec!["TCKT-100000", "TCKT-100001", "TCKT-100002"]);
        assert_eq!(records[0].extra, vec![("id".to_string(), "x".to_string())]);
        assert_eq!(records[2].source_file, "b.csv");
    }

    #[test]
    fn duplicate_columns_keep_first_non_empty() {
        let records = unify_tables(&[table(
            "a.csv",
            &["Ticket ID", "ticket_id"],
            &[&["", "55"], &["9", "55"]],
        )]);
        assert_eq!(records[0].ticket_id, "TCKT-55");
        assert_eq!(records[1].ticket_id, "TCKT-9");
    }

    #[test]
    fn normalizing_twice_is_a_no_op() {
        let mut records = unify_tables(&[table(
            "a.csv",
            &["Ticket ID", "Issue", "Description", "Date", "Priority"],
            &[
                &["Ticket #4412-b", "VPN", "drops", "01/15/2024", "high"],
                &["none", "Mail", "bounces", "garbage", ""],
            ],
        )]);
        let first = records.clone();
        normalize_records(&mut records);
        assert_eq!(records, first);
    }

    #[test]
    fn snapshot_round_trip_is_verbatim_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/unified.csv");

        let records = unify_tables(&[table(
            "a.json",
            &["Ticket ID", "Issue", "Description", "Resolved", "Priority"],
            &[
                &["Ticket #4412-b", "VPN, again", "drops\nhourly", "True", "high"],
                &["", "Printer", "offline", "0", ""],
            ],
        )]);
        write_snapshot(&path, &records).unwrap();

        let back = read_snapshot(&path).unwrap();
        assert_eq!(back, records);

        // Re-ingesting the snapshot as a source table changes nothing.
        let reread = crate::sources::read_table(&path).unwrap();
        assert_eq!(unify_tables(&[reread]), records);
    }

    #[test]
    fn missing_snapshot_is_reported() {
        let err = read_snapshot(Path::new("/no/such/unified.csv")).unwrap_err();
        assert!(matches!(err, Error::SnapshotNotFound { .. }));
    }
}
