//! Minimal OOXML spreadsheet reader.
//!
//! Reads the first worksheet of an `.xlsx` workbook into a header row plus
//! data rows. Cells are placed by their `r` reference so sparse rows keep
//! their column alignment.

use std::io::Read;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 200 * 1024 * 1024;

/// Zero-based index of column `XFD`, the last one a worksheet can address.
const MAX_COLUMN: usize = 16_383;

#[derive(Debug)]
pub enum XlsxError {
    Zip(String),
    Xml(String),
    NoWorksheet,
}

impl std::fmt::Display for XlsxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            XlsxError::Zip(e) => write!(f, "invalid workbook archive: {}", e),
            XlsxError::Xml(e) => write!(f, "invalid worksheet XML: {}", e),
            XlsxError::NoWorksheet => write!(f, "workbook has no worksheets"),
        }
    }
}

impl std::error::Error for XlsxError {}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

/// Returns `(header, rows)` for the lowest-numbered worksheet.
pub fn read_first_sheet(bytes: &[u8]) -> Result<(Vec<String>, Vec<Vec<String>>), XlsxError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| XlsxError::Zip(e.to_string()))?;

    let shared_strings = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml")?;
        parse_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let sheet = first_worksheet_name(&archive).ok_or(XlsxError::NoWorksheet)?;
    let xml = read_zip_entry_bounded(&mut archive, &sheet)?;
    let mut grid = parse_sheet(&xml, &shared_strings)?.into_iter();

    let header: Vec<String> = match grid.next() {
        Some(row) => {
            let mut header: Vec<String> = row.into_iter().map(|h| h.trim().to_string()).collect();
            while header.last().is_some_and(|h| h.is_empty()) {
                header.pop();
            }
            header
        }
        None => return Ok((Vec::new(), Vec::new())),
    };

    let rows = grid
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .map(|mut row| {
            row.truncate(header.len());
            row
        })
        .collect();

    Ok((header, rows))
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, XlsxError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| XlsxError::Zip(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| XlsxError::Zip(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(XlsxError::Zip(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn first_worksheet_name(archive: &Archive<'_>) -> Option<String> {
    archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .min_by_key(|name| {
            name.trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        })
        .map(str::to_string)
}

/// Each `<si>` becomes one string; rich-text runs are concatenated.
fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, XlsxError> {
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = current.is_some(),
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.push(current.take().unwrap_or_default()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Eof) => break,
            Err(e) => return Err(XlsxError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

#[derive(Default)]
struct CellState {
    column: usize,
    kind: Option<String>,
    value: String,
}

fn parse_sheet(xml: &[u8], shared_strings: &[String]) -> Result<Vec<Vec<String>>, XlsxError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut row: Option<Vec<String>> = None;
    let mut cell: Option<CellState> = None;
    let mut next_column = 0usize;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row = Some(Vec::new());
                    next_column = 0;
                }
                b"c" => {
                    let column = cell_column(&e, next_column)?;
                    cell = Some(CellState {
                        column,
                        kind: attr(&e, b"t"),
                        value: String::new(),
                    });
                }
                b"v" | b"t" => in_value = cell.is_some(),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"c" => {
                next_column = cell_column(&e, next_column)? + 1;
            }
            Ok(Event::Text(te)) if in_value => {
                if let Some(c) = cell.as_mut() {
                    c.value.push_str(&te.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let (Some(c), Some(r)) = (cell.take(), row.as_mut()) {
                        next_column = c.column + 1;
                        let text = resolve_cell(&c, shared_strings);
                        if r.len() <= c.column {
                            r.resize(c.column + 1, String::new());
                        }
                        r[c.column] = text;
                    }
                }
                b"row" => {
                    if let Some(r) = row.take() {
                        rows.push(r);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(XlsxError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(rows)
}

fn resolve_cell(cell: &CellState, shared_strings: &[String]) -> String {
    let raw = cell.value.trim();
    match cell.kind.as_deref() {
        Some("s") => raw
            .parse::<usize>()
            .ok()
            .and_then(|i| shared_strings.get(i))
            .cloned()
            .unwrap_or_default(),
        Some("b") => match raw {
            "1" => "true".to_string(),
            "0" => "false".to_string(),
            other => other.to_string(),
        },
        Some("inlineStr") | Some("str") => cell.value.clone(),
        _ => raw.to_string(),
    }
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(a.value.as_ref()).into_owned())
}

/// Column of a `<c>` element, falling back to `next` when it carries no
/// usable `r` reference.
fn cell_column(e: &BytesStart<'_>, next: usize) -> Result<usize, XlsxError> {
    match attr(e, b"r") {
        Some(r) => Ok(column_index(&r)?.unwrap_or(next)),
        None if next > MAX_COLUMN => Err(XlsxError::Xml(format!(
            "row has more than {} columns",
            MAX_COLUMN + 1
        ))),
        None => Ok(next),
    }
}

/// `"C7"` → `2`, `"AA1"` → `26`. References past `XFD` are rejected.
fn column_index(reference: &str) -> Result<Option<usize>, XlsxError> {
    let letters: Vec<u8> = reference
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return Ok(None);
    }
    let out_of_range = || XlsxError::Xml(format!("cell reference {} is out of range", reference));
    let mut index = 0usize;
    for b in letters {
        index = index
            .checked_mul(26)
            .and_then(|i| i.checked_add((b.to_ascii_uppercase() - b'A') as usize + 1))
            .filter(|i| *i <= MAX_COLUMN + 1)
            .ok_or_else(out_of_range)?;
    }
    Ok(Some(index - 1))
}
