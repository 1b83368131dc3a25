//! Document decomposition
//!
//! Flattens the active worksheet into the storable collections: cells with
//! their optional styles, merge ranges, and explicit column widths and row
//! heights.

use super::reader::{read_workbook, CellRange, NumberFormat, RawValue, SheetCell, Workbook};
use super::style::{extract_style, CellStyle};
use crate::error::Result;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;

/// One non-empty or styled cell position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellRecord {
    pub row: u32,
    pub col: u32,
    pub value: Option<String>,
    pub style: Option<CellStyle>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecomposedSheet {
    pub cells: Vec<CellRecord>,
    pub merges: Vec<CellRange>,
    pub column_dimensions: BTreeMap<u32, f64>,
    pub row_dimensions: BTreeMap<u32, f64>,
}

/// Parse workbook bytes and decompose the active sheet.
pub fn decompose_bytes(bytes: &[u8]) -> Result<DecomposedSheet> {
    let workbook = read_workbook(bytes)?;
    Ok(decompose(&workbook))
}

pub fn decompose(workbook: &Workbook) -> DecomposedSheet {
    let sheet = &workbook.sheet;

    // Keyed by position so a repeated reference keeps only its last occurrence
    let mut cells: BTreeMap<(u32, u32), CellRecord> = BTreeMap::new();
    for cell in &sheet.cells {
        let value = cell_text(workbook, cell);
        let style = extract_style(&workbook.handle(cell));

        if value.is_none() && style.is_none() {
            continue;
        }

        cells.insert(
            (cell.row, cell.col),
            CellRecord {
                row: cell.row,
                col: cell.col,
                value,
                style,
            },
        );
    }

    let decomposed = DecomposedSheet {
        cells: cells.into_values().collect(),
        merges: sheet.merges.clone(),
        column_dimensions: sheet.column_widths.clone(),
        row_dimensions: sheet.row_heights.clone(),
    };

    tracing::debug!(
        "Decomposed sheet '{}': {} cells, {} merges, {} column widths, {} row heights",
        sheet.name,
        decomposed.cells.len(),
        decomposed.merges.len(),
        decomposed.column_dimensions.len(),
        decomposed.row_dimensions.len()
    );

    decomposed
}

/// Coerce a cell value to text.
fn cell_text(workbook: &Workbook, cell: &SheetCell) -> Option<String> {
    match &cell.value {
        RawValue::Empty => None,
        RawValue::Text(text) => Some(text.clone()),
        RawValue::Bool(true) => Some("TRUE".to_string()),
        RawValue::Bool(false) => Some("FALSE".to_string()),
        RawValue::Error(code) => Some(code.clone()),
        RawValue::Number(number) => {
            let rendered = workbook
                .number_format(cell)
                .and_then(temporal_kind)
                .and_then(|kind| render_serial(number, kind));
            Some(rendered.unwrap_or_else(|| number.clone()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TemporalKind {
    Date,
    DateTime,
    Time,
}

fn temporal_kind(format: NumberFormat<'_>) -> Option<TemporalKind> {
    match format {
        NumberFormat::Builtin(14..=17) => Some(TemporalKind::Date),
        NumberFormat::Builtin(22) => Some(TemporalKind::DateTime),
        NumberFormat::Builtin(18..=21) | NumberFormat::Builtin(45..=47) => Some(TemporalKind::Time),
        NumberFormat::Builtin(_) => None,
        NumberFormat::Custom(code) => classify_format_code(code),
    }
}

/// Classify a custom format code by the date and time tokens it contains.
fn classify_format_code(code: &str) -> Option<TemporalKind> {
    // Only the first section applies to positive numbers
    let section = code.split(';').next().unwrap_or_default();

    let mut stripped = String::with_capacity(section.len());
    let mut chars = section.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                for inner in chars.by_ref() {
                    if inner == '"' {
                        break;
                    }
                }
            }
            '[' => {
                let mut bracket = String::new();
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    bracket.push(inner);
                }
                // Elapsed time such as [h] still counts as time
                if matches!(bracket.to_ascii_lowercase().as_str(), "h" | "hh" | "m" | "mm" | "s" | "ss") {
                    stripped.push('h');
                }
            }
            '\\' => {
                chars.next();
            }
            other => stripped.push(other.to_ascii_lowercase()),
        }
    }

    let has_date = stripped.contains('d') || stripped.contains('y');
    let has_time = stripped.contains('h') || stripped.contains('s');

    match (has_date, has_time) {
        (true, true) => Some(TemporalKind::DateTime),
        (true, false) => Some(TemporalKind::Date),
        (false, true) => Some(TemporalKind::Time),
        (false, false) => None,
    }
}

/// Convert a serial number in the 1900 date system.
fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 || serial > 2_958_465.0 {
        return None;
    }

    // Serial 60 is the nonexistent 1900-02-29; later serials are offset by it
    let epoch = if serial < 61.0 {
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    };

    let days = serial.trunc() as i64;
    let seconds = ((serial - serial.trunc()) * 86_400.0).round() as i64;

    epoch
        .and_hms_opt(0, 0, 0)?
        .checked_add_signed(Duration::days(days))?
        .checked_add_signed(Duration::seconds(seconds))
}

fn render_serial(number: &str, kind: TemporalKind) -> Option<String> {
    let serial: f64 = number.parse().ok()?;
    let datetime = serial_to_datetime(serial)?;

    let pattern = match kind {
        TemporalKind::Date => "%Y-%m-%d",
        TemporalKind::DateTime => "%Y-%m-%d %H:%M:%S",
        TemporalKind::Time => "%H:%M:%S",
    };
    Some(datetime.format(pattern).to_string())
}
