//! Document composition
//!
//! Rebuilds a single-sheet workbook from stored cells, styles, merges and
//! dimensions, and derives the filename it is offered under.

use super::color::{argb_to_rgb, normalize_argb};
use super::decompose::{CellRecord, DecomposedSheet};
use super::reader::{open_archive, xml_err, STYLES_PART};
use super::style::{BorderLineStyle, CellStyle, HorizontalAlignment, VerticalAlignment};
use crate::config::{COLUMN_WIDTH_PADDING_PIXELS, COLUMN_WIDTH_TO_PIXELS, MAX_COLUMN, MAX_ROW};
use crate::error::{AppError, Result};
use chrono::NaiveDateTime;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, FormatPattern, Workbook, Worksheet};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::{Cursor, Read, Write};
use unicode_normalization::UnicodeNormalization;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const DEFAULT_EXTENSION: &str = "xlsx";
const FALLBACK_STEM: &str = "document";

/// Run every color of a stored style back through normalization.
pub fn normalized_style(style: &CellStyle) -> CellStyle {
    let mut style = style.clone();

    style.font.color = normalize_argb(style.font.color.as_deref());
    style.fill.bg_color = normalize_argb(style.fill.bg_color.as_deref());

    for side in [
        &mut style.border.top,
        &mut style.border.right,
        &mut style.border.bottom,
        &mut style.border.left,
    ]
    .into_iter()
    .flatten()
    {
        side.color = normalize_argb(side.color.as_deref());
    }

    style
}

fn style_colors(style: &CellStyle) -> impl Iterator<Item = &String> {
    let border = &style.border;
    [style.font.color.as_ref(), style.fill.bg_color.as_ref()]
        .into_iter()
        .chain(
            [&border.top, &border.right, &border.bottom, &border.left]
                .into_iter()
                .map(|side| side.as_ref().and_then(|side| side.color.as_ref())),
        )
        .flatten()
}

/// Writer colors for one sheet.
///
/// The writer emits every color as opaque `FFRRGGBB`. Colors with any other
/// alpha byte are written under a stand-in RGB value that no other color in
/// the sheet uses, and patched back into the style part after saving.
#[derive(Debug, Default)]
struct ColorTable {
    stand_ins: HashMap<String, u32>,
}

impl ColorTable {
    fn for_sheet(sheet: &DecomposedSheet) -> Self {
        let colors: BTreeSet<String> = sheet
            .cells
            .iter()
            .filter_map(|cell| cell.style.as_ref())
            .flat_map(|style| {
                style_colors(&normalized_style(style))
                    .map(|color| color.to_ascii_uppercase())
                    .collect::<Vec<_>>()
            })
            .filter(|color| argb_to_rgb(color).is_some())
            .collect();

        let taken: HashSet<u32> = colors.iter().filter_map(|color| argb_to_rgb(color)).collect();
        let mut free = (1..=0x00FF_FFFF_u32).filter(|rgb| !taken.contains(rgb));

        let stand_ins = colors
            .into_iter()
            .filter(|color| !color.starts_with("FF"))
            .filter_map(|color| free.next().map(|rgb| (color, rgb)))
            .collect();

        Self { stand_ins }
    }

    fn color(&self, argb: Option<&str>) -> Option<Color> {
        let argb = argb?.to_ascii_uppercase();
        let rgb = match self.stand_ins.get(&argb) {
            Some(&stand_in) => stand_in,
            None => argb_to_rgb(&argb)?,
        };
        Some(Color::RGB(rgb))
    }

    /// Writer output value to the stored color it stands in for
    fn restorations(&self) -> HashMap<String, String> {
        self.stand_ins
            .iter()
            .map(|(argb, rgb)| (format!("FF{:06X}", rgb), argb.clone()))
            .collect()
    }
}

fn border_line(style: BorderLineStyle) -> FormatBorder {
    match style {
        BorderLineStyle::Thin => FormatBorder::Thin,
        BorderLineStyle::Medium => FormatBorder::Medium,
        BorderLineStyle::Thick => FormatBorder::Thick,
        BorderLineStyle::Dashed => FormatBorder::Dashed,
        BorderLineStyle::Dotted => FormatBorder::Dotted,
        BorderLineStyle::Double => FormatBorder::Double,
        BorderLineStyle::Hair => FormatBorder::Hair,
        BorderLineStyle::MediumDashed => FormatBorder::MediumDashed,
        BorderLineStyle::DashDot => FormatBorder::DashDot,
        BorderLineStyle::MediumDashDot => FormatBorder::MediumDashDot,
        BorderLineStyle::DashDotDot => FormatBorder::DashDotDot,
        BorderLineStyle::MediumDashDotDot => FormatBorder::MediumDashDotDot,
        BorderLineStyle::SlantDashDot => FormatBorder::SlantDashDot,
    }
}

fn horizontal(alignment: HorizontalAlignment) -> FormatAlign {
    match alignment {
        HorizontalAlignment::General => FormatAlign::General,
        HorizontalAlignment::Left => FormatAlign::Left,
        HorizontalAlignment::Center => FormatAlign::Center,
        HorizontalAlignment::Right => FormatAlign::Right,
        HorizontalAlignment::Fill => FormatAlign::Fill,
        HorizontalAlignment::Justify => FormatAlign::Justify,
        HorizontalAlignment::CenterContinuous => FormatAlign::CenterAcross,
        HorizontalAlignment::Distributed => FormatAlign::Distributed,
    }
}

fn vertical(alignment: VerticalAlignment) -> FormatAlign {
    match alignment {
        VerticalAlignment::Top => FormatAlign::Top,
        VerticalAlignment::Center => FormatAlign::VerticalCenter,
        VerticalAlignment::Bottom => FormatAlign::Bottom,
        VerticalAlignment::Justify => FormatAlign::VerticalJustify,
        VerticalAlignment::Distributed => FormatAlign::VerticalDistributed,
    }
}

/// Apply one border side's line style and color.
macro_rules! apply_side {
    ($format:ident, $colors:ident, $side:expr, $set_style:ident, $set_color:ident) => {
        if let Some(side) = $side {
            if let Some(line) = side.style {
                $format = $format.$set_style(border_line(line));
            }
            if let Some(color) = $colors.color(side.color.as_deref()) {
                $format = $format.$set_color(color);
            }
        }
    };
}

/// Build the cell format for a normalized style.
fn to_format(style: &CellStyle, colors: &ColorTable) -> Format {
    let mut format = Format::new();

    if style.font.bold {
        format = format.set_bold();
    }
    if let Some(color) = colors.color(style.font.color.as_deref()) {
        format = format.set_font_color(color);
    }
    if let Some(size) = style.font.size {
        format = format.set_font_size(size);
    }
    if let Some(color) = colors.color(style.fill.bg_color.as_deref()) {
        format = format
            .set_pattern(FormatPattern::Solid)
            .set_background_color(color);
    }

    apply_side!(format, colors, &style.border.top, set_border_top, set_border_top_color);
    apply_side!(format, colors, &style.border.right, set_border_right, set_border_right_color);
    apply_side!(format, colors, &style.border.bottom, set_border_bottom, set_border_bottom_color);
    apply_side!(format, colors, &style.border.left, set_border_left, set_border_left_color);

    if let Some(alignment) = style.alignment.horizontal {
        format = format.set_align(horizontal(alignment));
    }
    if let Some(alignment) = style.alignment.vertical {
        format = format.set_align(vertical(alignment));
    }

    format
}

/// Convert a stored column width into the unit the writer expects.
///
/// Stored widths include the padding the writer adds back on save.
fn writer_column_width(stored: f64) -> f64 {
    if stored > 1.0 {
        (stored * COLUMN_WIDTH_TO_PIXELS - COLUMN_WIDTH_PADDING_PIXELS) / COLUMN_WIDTH_TO_PIXELS
    } else {
        stored
    }
}

/// Zero-based writer row for a stored 1-based row.
fn grid_row(row: u32) -> Result<u32> {
    if row == 0 || row > MAX_ROW {
        return Err(AppError::Storage(format!("row {} is outside the sheet", row)));
    }
    Ok(row - 1)
}

/// Zero-based writer column for a stored 1-based column.
fn grid_col(col: u32) -> Result<u16> {
    if col == 0 || col > MAX_COLUMN {
        return Err(AppError::Storage(format!("column {} is outside the sheet", col)));
    }
    u16::try_from(col - 1)
        .map_err(|_| AppError::Storage(format!("column {} is outside the sheet", col)))
}

fn write_cell(worksheet: &mut Worksheet, cell: &CellRecord, colors: &ColorTable) -> Result<()> {
    let row = grid_row(cell.row)?;
    let col = grid_col(cell.col)?;
    let format = cell
        .style
        .as_ref()
        .map(|style| to_format(&normalized_style(style), colors));

    match (&cell.value, &format) {
        (Some(value), Some(format)) => {
            worksheet.write_string_with_format(row, col, value, format)?;
        }
        (Some(value), None) => {
            worksheet.write_string(row, col, value)?;
        }
        (None, Some(format)) => {
            worksheet.write_blank(row, col, format)?;
        }
        (None, None) => {}
    }

    Ok(())
}

/// Serialize stored sheet content into workbook bytes.
pub fn compose(sheet: &DecomposedSheet) -> Result<Vec<u8>> {
    let colors = ColorTable::for_sheet(sheet);
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    // Merges first so cell values written afterwards land on top
    let blank = Format::new();
    for merge in &sheet.merges {
        if merge.start_row == merge.end_row && merge.start_col == merge.end_col {
            continue;
        }

        match worksheet.merge_range(
            grid_row(merge.start_row)?,
            grid_col(merge.start_col)?,
            grid_row(merge.end_row)?,
            grid_col(merge.end_col)?,
            "",
            &blank,
        ) {
            Ok(_) => {}
            Err(e) => tracing::warn!("Skipping merge {:?}: {}", merge, e),
        }
    }

    for cell in &sheet.cells {
        write_cell(worksheet, cell, &colors)?;
    }

    for (&col, &width) in &sheet.column_dimensions {
        worksheet.set_column_width(grid_col(col)?, writer_column_width(width))?;
    }
    for (&row, &height) in &sheet.row_dimensions {
        worksheet.set_row_height(grid_row(row)?, height)?;
    }

    let bytes = restore_alpha(workbook.save_to_buffer()?, &colors.restorations())?;
    tracing::debug!(
        "Composed workbook: {} cells, {} merges, {} bytes",
        sheet.cells.len(),
        sheet.merges.len(),
        bytes.len()
    );
    Ok(bytes)
}

/// Put stored alpha bytes back into the style part of a saved workbook.
fn restore_alpha(bytes: Vec<u8>, restorations: &HashMap<String, String>) -> Result<Vec<u8>> {
    if restorations.is_empty() {
        return Ok(bytes);
    }

    let mut archive = open_archive(&bytes)?;
    let mut output = ZipWriter::new(Cursor::new(Vec::new()));

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.name() != STYLES_PART {
            output.raw_copy_file(entry)?;
            continue;
        }

        let mut xml = String::new();
        entry.read_to_string(&mut xml)?;
        output.start_file(STYLES_PART, SimpleFileOptions::default())?;
        output.write_all(&restore_colors(&xml, restorations)?)?;
    }

    Ok(output.finish()?.into_inner())
}

fn restore_colors(xml: &str, restorations: &HashMap<String, String>) -> Result<Vec<u8>> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(e) => writer.write_event(Event::Start(restore_rgb(&e, restorations)?))?,
            Event::Empty(e) => writer.write_event(Event::Empty(restore_rgb(&e, restorations)?))?,
            event => writer.write_event(event)?,
        }
    }

    Ok(writer.into_inner())
}

/// Copy of `element` with a stand-in `rgb` attribute replaced.
fn restore_rgb(
    element: &BytesStart<'_>,
    restorations: &HashMap<String, String>,
) -> Result<BytesStart<'static>> {
    let name = std::str::from_utf8(element.name().as_ref())
        .map_err(xml_err)?
        .to_string();
    let mut restored = BytesStart::new(name);

    for attribute in element.attributes() {
        let attribute = attribute.map_err(xml_err)?;
        let key = attribute.key.as_ref();
        let value = attribute.value.as_ref();

        let original = if key == b"rgb" {
            std::str::from_utf8(value)
                .ok()
                .and_then(|rgb| restorations.get(&rgb.to_ascii_uppercase()))
        } else {
            None
        };

        match original {
            Some(argb) => restored.push_attribute((key, argb.as_bytes())),
            None => restored.push_attribute((key, value)),
        }
    }

    Ok(restored)
}

/// Reduce text to printable ASCII, replacing anything outside `[A-Za-z0-9_- ]`.
fn sanitize(text: &str) -> String {
    text.nfkd()
        .filter(char::is_ascii)
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Filename a composed document is offered under.
///
/// The original upload name is kept (sanitized, extension preserved) when
/// there is one; otherwise the title is suffixed with a timestamp.
pub fn export_filename(original_filename: Option<&str>, title: &str, now: NaiveDateTime) -> String {
    if let Some(original) = original_filename.map(str::trim).filter(|name| !name.is_empty()) {
        let (stem, extension) = match original.rsplit_once('.') {
            Some((stem, extension)) if !stem.is_empty() => (stem, sanitize(extension)),
            _ => (original, String::new()),
        };

        let stem = sanitize(stem);
        let stem = if stem.is_empty() { FALLBACK_STEM.to_string() } else { stem };
        let extension = if extension.is_empty() || extension.contains(|c: char| !c.is_ascii_alphanumeric()) {
            DEFAULT_EXTENSION.to_string()
        } else {
            extension
        };

        return format!("{}.{}", stem, extension);
    }

    let stem = sanitize(title);
    let stem = if stem.is_empty() { FALLBACK_STEM.to_string() } else { stem };
    format!("{}_{}.{}", stem, now.format("%Y%m%d_%H%M%S"), DEFAULT_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xlsx::decompose::decompose_bytes;
    use crate::xlsx::reader::CellRange;
    use crate::xlsx::style::{BorderSide, BorderStyle, FillStyle, FontStyle};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn styled_sheet() -> DecomposedSheet {
        let style = CellStyle {
            font: FontStyle {
                bold: true,
                color: Some("#FF0000".to_string()),
                size: Some(16.0),
            },
            border: BorderStyle {
                top: Some(BorderSide {
                    style: Some(BorderLineStyle::Thin),
                    color: Some("#00FF00FF".to_string()),
                }),
                ..Default::default()
            },
            ..Default::default()
        };

        DecomposedSheet {
            cells: vec![
                CellRecord {
                    row: 1,
                    col: 1,
                    value: Some("Title".to_string()),
                    style: Some(style),
                },
                CellRecord {
                    row: 3,
                    col: 2,
                    value: Some("42".to_string()),
                    style: None,
                },
            ],
            merges: vec![CellRange {
                start_row: 2,
                start_col: 2,
                end_row: 4,
                end_col: 5,
            }],
            column_dimensions: BTreeMap::from([(1, 20.0)]),
            row_dimensions: BTreeMap::from([(1, 30.0)]),
        }
    }

    #[test]
    fn test_normalized_style() {
        let sheet = styled_sheet();
        let style = normalized_style(sheet.cells[0].style.as_ref().unwrap());

        assert!(style.font.bold);
        assert_eq!(style.font.color.as_deref(), Some("FFFF0000"));
        assert_eq!(
            style.border.top.as_ref().and_then(|s| s.color.as_deref()),
            Some("00FF00FF")
        );
    }

    #[test]
    fn test_composed_workbook_reads_back() {
        let bytes = compose(&styled_sheet()).unwrap();
        let reread = decompose_bytes(&bytes).unwrap();

        let title = reread
            .cells
            .iter()
            .find(|c| c.row == 1 && c.col == 1)
            .unwrap();
        assert_eq!(title.value.as_deref(), Some("Title"));

        let style = title.style.as_ref().unwrap();
        assert!(style.font.bold);
        assert_eq!(style.font.size, Some(16.0));
        assert_eq!(style.font.color.as_deref(), Some("FFFF0000"));
        assert_eq!(
            style.border.top.as_ref().and_then(|s| s.style),
            Some(BorderLineStyle::Thin)
        );
        assert_eq!(
            style.border.top.as_ref().and_then(|s| s.color.as_deref()),
            Some("00FF00FF")
        );

        let value = reread.cells.iter().find(|c| c.row == 3 && c.col == 2).unwrap();
        assert_eq!(value.value.as_deref(), Some("42"));

        assert_eq!(
            reread.merges,
            vec![CellRange {
                start_row: 2,
                start_col: 2,
                end_row: 4,
                end_col: 5
            }]
        );
        assert_eq!(reread.column_dimensions.get(&1), Some(&20.0));
        assert_eq!(reread.row_dimensions.get(&1), Some(&30.0));
    }

    #[test]
    fn test_alpha_survives_next_to_same_rgb() {
        let mut sheet = styled_sheet();
        sheet.cells[1].style = Some(CellStyle {
            fill: FillStyle {
                bg_color: Some("FFFF00FF".to_string()),
            },
            border: BorderStyle {
                bottom: Some(BorderSide {
                    style: Some(BorderLineStyle::Thick),
                    color: Some("80000001".to_string()),
                }),
                ..Default::default()
            },
            ..Default::default()
        });

        let bytes = compose(&sheet).unwrap();
        let reread = decompose_bytes(&bytes).unwrap();

        let title = reread.cells.iter().find(|c| c.row == 1).unwrap();
        let top = title.style.as_ref().unwrap().border.top.clone().unwrap();
        assert_eq!(top.color.as_deref(), Some("00FF00FF"));

        let value = reread.cells.iter().find(|c| c.row == 3).unwrap();
        let style = value.style.as_ref().unwrap();
        assert_eq!(style.fill.bg_color.as_deref(), Some("FFFF00FF"));
        assert_eq!(
            style.border.bottom.as_ref().and_then(|s| s.color.as_deref()),
            Some("80000001")
        );
    }

    #[test]
    fn test_opaque_colors_need_no_rewrite() {
        let mut sheet = styled_sheet();
        sheet.cells[0].style.as_mut().unwrap().border.top = None;

        let colors = ColorTable::for_sheet(&sheet);
        assert!(colors.restorations().is_empty());
        assert!(matches!(
            colors.color(Some("FFFF0000")),
            Some(Color::RGB(0xFF0000))
        ));
    }

    #[test]
    fn test_positions_outside_the_sheet_are_rejected() {
        let mut sheet = styled_sheet();
        sheet.cells[1].col = 65_537;
        assert!(matches!(compose(&sheet), Err(AppError::Storage(_))));

        let mut sheet = styled_sheet();
        sheet.column_dimensions.insert(0, 12.0);
        assert!(matches!(compose(&sheet), Err(AppError::Storage(_))));

        let mut sheet = styled_sheet();
        sheet.row_dimensions.insert(MAX_ROW + 1, 12.0);
        assert!(matches!(compose(&sheet), Err(AppError::Storage(_))));

        assert_eq!(grid_col(MAX_COLUMN).unwrap(), 16_383);
        assert_eq!(grid_row(MAX_ROW).unwrap(), MAX_ROW - 1);
    }

    #[test]
    fn test_overlapping_merge_is_skipped() {
        let mut sheet = styled_sheet();
        sheet.merges.push(CellRange {
            start_row: 3,
            start_col: 3,
            end_row: 6,
            end_col: 6,
        });

        let bytes = compose(&sheet).unwrap();
        let reread = decompose_bytes(&bytes).unwrap();
        assert_eq!(reread.merges.len(), 1);
    }

    #[test]
    fn test_export_filename_keeps_original() {
        let now = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(9, 8, 7)
            .unwrap();

        assert_eq!(export_filename(Some("Report 2024.xlsm"), "ignored", now), "Report 2024.xlsm");
        assert_eq!(export_filename(Some("Café/plan.xlsx"), "ignored", now), "Cafe_plan.xlsx");
        assert_eq!(export_filename(Some("notes"), "ignored", now), "notes.xlsx");
        assert_eq!(export_filename(Some("日報.xlsx"), "ignored", now), "document.xlsx");
    }

    #[test]
    fn test_export_filename_from_title() {
        let now = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(9, 8, 7)
            .unwrap();

        assert_eq!(
            export_filename(None, "Weekly: Plan", now),
            "Weekly_ Plan_20240305_090807.xlsx"
        );
        assert_eq!(
            export_filename(Some("  "), "Über", now),
            "Uber_20240305_090807.xlsx"
        );
    }
}
