//! Workbook archive reader
//!
//! Opens an `.xlsx` archive with `zip` and walks its XML parts with
//! `quick-xml`, producing an in-memory model of the active worksheet: cell
//! values, the style tables those cells reference, merge ranges, explicit
//! column widths and row heights, and the anchors of embedded pictures.
//!
//! Only the parts needed for that model are read. Formulas, charts and
//! non-active sheets are ignored.

use crate::config::{MAX_COLUMN, MAX_ROW};
use crate::error::{AppError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::io::{Cursor, Read};
use zip::ZipArchive;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
pub(crate) const STYLES_PART: &str = "xl/styles.xml";

/// Column ranges wider than this are treated as "rest of sheet" defaults and
/// trimmed to the used extent of the sheet.
const MAX_EXPANDED_COLUMN_SPAN: u32 = 256;

pub(crate) type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

// ===== Style tables =====

/// A color reference as written in the style part
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawColor {
    pub rgb: Option<String>,
    pub theme: Option<String>,
    pub indexed: Option<String>,
    pub auto: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFont {
    pub bold: bool,
    pub size: Option<String>,
    pub color: Option<RawColor>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFill {
    pub pattern_type: Option<String>,
    pub fg_color: Option<RawColor>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBorderSide {
    pub style: Option<String>,
    pub color: Option<RawColor>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBorder {
    pub left: Option<RawBorderSide>,
    pub right: Option<RawBorderSide>,
    pub top: Option<RawBorderSide>,
    pub bottom: Option<RawBorderSide>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawAlignment {
    pub horizontal: Option<String>,
    pub vertical: Option<String>,
}

/// One entry of `cellXfs`, the table cells point into via their `s` attribute
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellFormat {
    pub font_id: Option<usize>,
    pub fill_id: Option<usize>,
    pub border_id: Option<usize>,
    pub num_fmt_id: u32,
    pub alignment: Option<RawAlignment>,
}

#[derive(Debug, Clone, Default)]
pub struct StyleSheet {
    pub fonts: Vec<RawFont>,
    pub fills: Vec<RawFill>,
    pub borders: Vec<RawBorder>,
    pub cell_formats: Vec<CellFormat>,
    /// Custom number formats keyed by id
    pub number_formats: HashMap<u32, String>,
}

// ===== Worksheet =====

/// Value of a cell as stored in the sheet part
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Empty,
    Text(String),
    Number(String),
    Bool(bool),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetCell {
    pub row: u32,
    pub col: u32,
    pub value: RawValue,
    /// Index into `StyleSheet::cell_formats`
    pub style_index: Option<usize>,
}

/// Inclusive rectangle, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub start_row: u32,
    pub start_col: u32,
    pub end_row: u32,
    pub end_col: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Worksheet {
    pub name: String,
    pub cells: Vec<SheetCell>,
    pub merges: Vec<CellRange>,
    pub column_widths: BTreeMap<u32, f64>,
    pub row_heights: BTreeMap<u32, f64>,
    /// Archive path of the drawing part attached to the sheet
    pub drawing_part: Option<String>,
}

/// Active worksheet plus the style tables its cells reference
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    pub sheet: Worksheet,
    pub styles: StyleSheet,
}

/// A cell together with the style records it resolves to
#[derive(Debug, Clone, Copy)]
pub struct CellHandle<'a> {
    pub cell: &'a SheetCell,
    pub format: Option<&'a CellFormat>,
    pub font: Option<&'a RawFont>,
    pub fill: Option<&'a RawFill>,
    pub border: Option<&'a RawBorder>,
}

impl Workbook {
    /// Resolve a cell's style index against the style tables.
    pub fn handle<'a>(&'a self, cell: &'a SheetCell) -> CellHandle<'a> {
        let format = cell
            .style_index
            .and_then(|index| self.styles.cell_formats.get(index));

        CellHandle {
            cell,
            format,
            font: format
                .and_then(|f| f.font_id)
                .and_then(|id| self.styles.fonts.get(id)),
            fill: format
                .and_then(|f| f.fill_id)
                .and_then(|id| self.styles.fills.get(id)),
            border: format
                .and_then(|f| f.border_id)
                .and_then(|id| self.styles.borders.get(id)),
        }
    }

    /// Number format code applied to a cell, if it has a non-general one.
    pub fn number_format(&self, cell: &SheetCell) -> Option<NumberFormat<'_>> {
        let format = cell
            .style_index
            .and_then(|index| self.styles.cell_formats.get(index))?;

        match self.styles.number_formats.get(&format.num_fmt_id) {
            Some(code) => Some(NumberFormat::Custom(code)),
            None if format.num_fmt_id != 0 => Some(NumberFormat::Builtin(format.num_fmt_id)),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberFormat<'a> {
    Builtin(u32),
    Custom(&'a str),
}

// ===== Drawing anchors =====

/// Zero-based cell position as written in a drawing part
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnchorPoint {
    pub row: u32,
    pub col: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnchorKind {
    TwoCell { from: AnchorPoint, to: AnchorPoint },
    OneCell { from: AnchorPoint },
    /// Absolute or otherwise unreadable placement
    Unplaced,
}

/// A picture declared in the sheet's drawing part
#[derive(Debug, Clone, PartialEq)]
pub struct DrawingAnchor {
    pub kind: AnchorKind,
    /// Archive path of the media the picture embeds
    pub media_part: Option<String>,
}

// ===== Entry points =====

/// Parse the active worksheet of a workbook archive.
pub fn read_workbook(bytes: &[u8]) -> Result<Workbook> {
    let mut archive = open_archive(bytes)?;

    let shared_strings = match read_part(&mut archive, SHARED_STRINGS_PART)? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let styles = match read_part(&mut archive, STYLES_PART)? {
        Some(xml) => parse_styles(&xml)?,
        None => StyleSheet::default(),
    };

    let (name, sheet_part) = locate_active_sheet(&mut archive)?;
    let sheet_xml = read_part(&mut archive, &sheet_part)?
        .ok_or_else(|| AppError::Parse(format!("worksheet part {} is missing", sheet_part)))?;

    let mut sheet = parse_worksheet(&sheet_xml, &shared_strings)?;
    sheet.name = name;

    if let Some(drawing_id) = sheet.drawing_part.take() {
        let rels = read_relationships(&mut archive, &rels_part_for(&sheet_part))?;
        sheet.drawing_part = rels
            .get(&drawing_id)
            .map(|target| resolve_target(&sheet_part, target));
    }

    tracing::debug!(
        "Read worksheet '{}': {} cells, {} merges",
        sheet.name,
        sheet.cells.len(),
        sheet.merges.len()
    );

    Ok(Workbook { sheet, styles })
}

/// List the pictures anchored in a drawing part.
pub fn read_drawing_anchors(bytes: &[u8], drawing_part: &str) -> Result<Vec<DrawingAnchor>> {
    let mut archive = open_archive(bytes)?;
    let xml = match read_part(&mut archive, drawing_part)? {
        Some(xml) => xml,
        None => return Ok(Vec::new()),
    };

    let rels = read_relationships(&mut archive, &rels_part_for(drawing_part))?;
    parse_drawing(&xml, |embed| {
        rels.get(embed)
            .map(|target| resolve_target(drawing_part, target))
    })
}

// ===== Archive helpers =====

pub(crate) fn open_archive(bytes: &[u8]) -> Result<Archive<'_>> {
    ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| AppError::Parse(format!("not a spreadsheet archive: {}", e)))
}

pub(crate) fn read_part(archive: &mut Archive<'_>, name: &str) -> Result<Option<String>> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(Some(contents))
}

pub(crate) fn xml_err<E: Display>(e: E) -> AppError {
    AppError::Parse(format!("malformed XML: {}", e))
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attribute in e.attributes() {
        let attribute = attribute.map_err(xml_err)?;
        if attribute.key.local_name().as_ref() == name {
            return Ok(Some(attribute.unescape_value().map_err(xml_err)?.into_owned()));
        }
    }
    Ok(None)
}

fn attr_parse<T: std::str::FromStr>(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<T>> {
    match attr(e, name)? {
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            AppError::Parse(format!(
                "attribute {} has unexpected value '{}'",
                String::from_utf8_lossy(name),
                raw
            ))
        }),
        None => Ok(None),
    }
}

/// OOXML boolean attribute: absent means `default`, "0"/"false" mean false.
fn attr_flag(e: &BytesStart<'_>, name: &[u8], default: bool) -> Result<bool> {
    Ok(match attr(e, name)? {
        Some(value) => !matches!(value.as_str(), "0" | "false"),
        None => default,
    })
}

/// Relationship part describing the targets of `part`.
fn rels_part_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part),
    }
}

/// Resolve a relationship target relative to the part that declares it.
pub(crate) fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }

    let mut segments: Vec<&str> = source_part.split('/').collect();
    segments.pop();

    for segment in target.split('/') {
        match segment {
            ".." => {
                segments.pop();
            }
            "." | "" => {}
            other => segments.push(other),
        }
    }

    segments.join("/")
}

fn read_relationships(archive: &mut Archive<'_>, part: &str) -> Result<HashMap<String, String>> {
    let xml = match read_part(archive, part)? {
        Some(xml) => xml,
        None => return Ok(HashMap::new()),
    };

    let mut reader = Reader::from_str(&xml);
    let mut rels = HashMap::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr(&e, b"Id")?, attr(&e, b"Target")?) {
                    rels.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(rels)
}

/// Find the name and archive path of the sheet selected in the workbook view.
fn locate_active_sheet(archive: &mut Archive<'_>) -> Result<(String, String)> {
    let xml = read_part(archive, WORKBOOK_PART)?
        .ok_or_else(|| AppError::Parse("workbook part is missing".to_string()))?;

    let mut reader = Reader::from_str(&xml);
    let mut active_tab = 0usize;
    let mut sheets: Vec<(String, String)> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"workbookView" => {
                    active_tab = attr_parse(&e, b"activeTab").unwrap_or(None).unwrap_or(0);
                }
                b"sheet" => {
                    let name = attr(&e, b"name")?.unwrap_or_default();
                    if let Some(rid) = attr(&e, b"id")? {
                        sheets.push((name, rid));
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let (name, rid) = sheets
        .get(active_tab)
        .or_else(|| sheets.first())
        .cloned()
        .ok_or_else(|| AppError::Parse("workbook declares no sheets".to_string()))?;

    let rels = read_relationships(archive, WORKBOOK_RELS_PART)?;
    let target = rels
        .get(&rid)
        .ok_or_else(|| AppError::Parse(format!("relationship {} for sheet '{}' is missing", rid, name)))?;

    Ok((name, resolve_target(WORKBOOK_PART, target)))
}

// ===== Cell references =====

/// Parse an A1-style reference into 1-based (row, col).
pub fn parse_cell_ref(reference: &str) -> Option<(u32, u32)> {
    let reference = reference.trim().replace('$', "");
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);

    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let col = letters.chars().try_fold(0u32, |acc, c| {
        let digit = c.to_ascii_uppercase() as u32 - 'A' as u32 + 1;
        acc.checked_mul(26)?.checked_add(digit)
    })?;
    let row: u32 = digits.parse().ok()?;

    if !on_sheet(row, col) {
        return None;
    }
    Some((row, col))
}

fn on_sheet(row: u32, col: u32) -> bool {
    (1..=MAX_ROW).contains(&row) && (1..=MAX_COLUMN).contains(&col)
}

fn off_sheet(row: u32, col: u32) -> AppError {
    AppError::Parse(format!("cell at row {}, column {} is outside the sheet", row, col))
}

/// Parse `A1:C3` (or a single `A1`) into an inclusive range.
pub fn parse_range(reference: &str) -> Option<CellRange> {
    let (start, end) = match reference.split_once(':') {
        Some((start, end)) => (parse_cell_ref(start)?, parse_cell_ref(end)?),
        None => {
            let single = parse_cell_ref(reference)?;
            (single, single)
        }
    };

    Some(CellRange {
        start_row: start.0.min(end.0),
        start_col: start.1.min(end.1),
        end_row: start.0.max(end.0),
        end_col: start.1.max(end.1),
    })
}

// ===== Part parsers =====

fn parse_shared_strings(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut in_phonetic = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => in_phonetic = true,
                b"t" => in_text = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_text && !in_phonetic => {
                if let Some(buffer) = current.as_mut() {
                    buffer.push_str(&t.unescape().map_err(xml_err)?);
                }
            }
            Event::CData(t) if in_text && !in_phonetic => {
                if let Some(buffer) = current.as_mut() {
                    buffer.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.push(current.take().unwrap_or_default()),
                b"rPh" => in_phonetic = false,
                b"t" => in_text = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(strings)
}

fn parse_color(e: &BytesStart<'_>) -> Result<RawColor> {
    Ok(RawColor {
        rgb: attr(e, b"rgb")?,
        theme: attr(e, b"theme")?,
        indexed: attr(e, b"indexed")?,
        auto: attr_flag(e, b"auto", false)?,
    })
}

#[derive(Clone, Copy, PartialEq)]
enum StyleSection {
    Other,
    NumFmts,
    Fonts,
    Fills,
    Borders,
    CellXfs,
}

#[derive(Clone, Copy, PartialEq)]
enum Side {
    Left,
    Right,
    Top,
    Bottom,
}

fn side_of(name: &[u8]) -> Option<Side> {
    match name {
        b"left" | b"start" => Some(Side::Left),
        b"right" | b"end" => Some(Side::Right),
        b"top" => Some(Side::Top),
        b"bottom" => Some(Side::Bottom),
        _ => None,
    }
}

fn assign_side(border: &mut RawBorder, side: Side, value: RawBorderSide) {
    match side {
        Side::Left => border.left = Some(value),
        Side::Right => border.right = Some(value),
        Side::Top => border.top = Some(value),
        Side::Bottom => border.bottom = Some(value),
    }
}

pub(crate) fn parse_styles(xml: &str) -> Result<StyleSheet> {
    let mut reader = Reader::from_str(xml);
    let mut styles = StyleSheet::default();
    let mut section = StyleSection::Other;

    let mut font: Option<RawFont> = None;
    let mut fill: Option<RawFill> = None;
    let mut border: Option<RawBorder> = None;
    let mut side: Option<(Side, RawBorderSide)> = None;
    let mut format: Option<CellFormat> = None;

    loop {
        let event = reader.read_event()?;
        let is_empty = matches!(event, Event::Empty(_));

        match event {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.local_name();
                let name = name.as_ref();

                match (section, name) {
                    (_, b"numFmts") if !is_empty => section = StyleSection::NumFmts,
                    (_, b"fonts") if !is_empty => section = StyleSection::Fonts,
                    (_, b"fills") if !is_empty => section = StyleSection::Fills,
                    (_, b"borders") if !is_empty => section = StyleSection::Borders,
                    (_, b"cellXfs") if !is_empty => section = StyleSection::CellXfs,

                    (StyleSection::NumFmts, b"numFmt") => {
                        if let (Some(id), Some(code)) =
                            (attr_parse::<u32>(&e, b"numFmtId")?, attr(&e, b"formatCode")?)
                        {
                            styles.number_formats.insert(id, code);
                        }
                    }

                    (StyleSection::Fonts, b"font") => {
                        if is_empty {
                            styles.fonts.push(RawFont::default());
                        } else {
                            font = Some(RawFont::default());
                        }
                    }
                    (StyleSection::Fonts, b"b") => {
                        if let Some(font) = font.as_mut() {
                            font.bold = attr_flag(&e, b"val", true)?;
                        }
                    }
                    (StyleSection::Fonts, b"sz") => {
                        if let Some(font) = font.as_mut() {
                            font.size = attr(&e, b"val")?;
                        }
                    }
                    (StyleSection::Fonts, b"color") => {
                        if let Some(font) = font.as_mut() {
                            font.color = Some(parse_color(&e)?);
                        }
                    }

                    (StyleSection::Fills, b"fill") => {
                        if is_empty {
                            styles.fills.push(RawFill::default());
                        } else {
                            fill = Some(RawFill::default());
                        }
                    }
                    (StyleSection::Fills, b"patternFill") => {
                        if let Some(fill) = fill.as_mut() {
                            fill.pattern_type = attr(&e, b"patternType")?;
                        }
                    }
                    (StyleSection::Fills, b"fgColor") => {
                        if let Some(fill) = fill.as_mut() {
                            fill.fg_color = Some(parse_color(&e)?);
                        }
                    }

                    (StyleSection::Borders, b"border") => {
                        if is_empty {
                            styles.borders.push(RawBorder::default());
                        } else {
                            border = Some(RawBorder::default());
                        }
                    }
                    (StyleSection::Borders, b"color") => {
                        if let Some((_, current)) = side.as_mut() {
                            current.color = Some(parse_color(&e)?);
                        }
                    }
                    (StyleSection::Borders, other) if border.is_some() => {
                        if let Some(which) = side_of(other) {
                            let value = RawBorderSide {
                                style: attr(&e, b"style")?,
                                color: None,
                            };
                            if is_empty {
                                if let Some(border) = border.as_mut() {
                                    assign_side(border, which, value);
                                }
                            } else {
                                side = Some((which, value));
                            }
                        }
                    }

                    (StyleSection::CellXfs, b"xf") => {
                        let parsed = CellFormat {
                            font_id: attr_parse(&e, b"fontId")?,
                            fill_id: attr_parse(&e, b"fillId")?,
                            border_id: attr_parse(&e, b"borderId")?,
                            num_fmt_id: attr_parse(&e, b"numFmtId")?.unwrap_or(0),
                            alignment: None,
                        };
                        if is_empty {
                            styles.cell_formats.push(parsed);
                        } else {
                            format = Some(parsed);
                        }
                    }
                    (StyleSection::CellXfs, b"alignment") => {
                        if let Some(format) = format.as_mut() {
                            format.alignment = Some(RawAlignment {
                                horizontal: attr(&e, b"horizontal")?,
                                vertical: attr(&e, b"vertical")?,
                            });
                        }
                    }
                    _ => {}
                }
            }
            Event::End(e) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"numFmts" | b"fonts" | b"fills" | b"borders" | b"cellXfs" => {
                        section = StyleSection::Other;
                    }
                    b"font" if section == StyleSection::Fonts => {
                        styles.fonts.extend(font.take());
                    }
                    b"fill" if section == StyleSection::Fills => {
                        styles.fills.extend(fill.take());
                    }
                    b"border" if section == StyleSection::Borders => {
                        styles.borders.extend(border.take());
                    }
                    b"xf" if section == StyleSection::CellXfs => {
                        styles.cell_formats.extend(format.take());
                    }
                    other if section == StyleSection::Borders => {
                        if side_of(other).is_some() {
                            if let (Some((which, value)), Some(border)) = (side.take(), border.as_mut()) {
                                assign_side(border, which, value);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(styles)
}

#[derive(Default)]
struct PendingCell {
    row: u32,
    col: u32,
    kind: Option<String>,
    style_index: Option<usize>,
    value: Option<String>,
    inline: Option<String>,
}

impl PendingCell {
    fn finish(self, shared_strings: &[String]) -> Result<SheetCell> {
        let value = match self.kind.as_deref() {
            Some("s") => match self.value {
                Some(index) => {
                    let index: usize = index.trim().parse().map_err(|_| {
                        AppError::Parse(format!("shared string index '{}' is not a number", index))
                    })?;
                    let text = shared_strings.get(index).ok_or_else(|| {
                        AppError::Parse(format!("shared string {} does not exist", index))
                    })?;
                    RawValue::Text(text.clone())
                }
                None => RawValue::Empty,
            },
            Some("inlineStr") => match self.inline.or(self.value) {
                Some(text) => RawValue::Text(text),
                None => RawValue::Empty,
            },
            Some("str") => self.value.map(RawValue::Text).unwrap_or(RawValue::Empty),
            Some("b") => match self.value.as_deref().map(str::trim) {
                Some(v) => RawValue::Bool(v == "1" || v.eq_ignore_ascii_case("true")),
                None => RawValue::Empty,
            },
            Some("e") => self.value.map(RawValue::Error).unwrap_or(RawValue::Empty),
            _ => match self.value {
                Some(number) if !number.trim().is_empty() => RawValue::Number(number.trim().to_string()),
                _ => RawValue::Empty,
            },
        };

        Ok(SheetCell {
            row: self.row,
            col: self.col,
            value,
            style_index: self.style_index,
        })
    }
}

#[derive(Clone, Copy, PartialEq)]
enum CellText {
    None,
    Value,
    Inline,
}

struct ColumnSpec {
    min: u32,
    max: u32,
    width: f64,
}

fn parse_worksheet(xml: &str, shared_strings: &[String]) -> Result<Worksheet> {
    let mut reader = Reader::from_str(xml);
    let mut sheet = Worksheet::default();
    let mut column_specs: Vec<ColumnSpec> = Vec::new();

    let mut current_row = 0u32;
    let mut last_col = 0u32;
    let mut pending: Option<PendingCell> = None;
    let mut text_target = CellText::None;

    loop {
        let event = reader.read_event()?;
        let is_empty = matches!(event, Event::Empty(_));

        match event {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"col" => {
                    if let (Some(min), Some(width)) =
                        (attr_parse::<u32>(&e, b"min")?, attr_parse::<f64>(&e, b"width")?)
                    {
                        let max = attr_parse::<u32>(&e, b"max")?.unwrap_or(min);
                        if !on_sheet(1, min) || !on_sheet(1, max) {
                            return Err(AppError::Parse(format!(
                                "column range {}..{} is outside the sheet",
                                min, max
                            )));
                        }
                        column_specs.push(ColumnSpec { min, max: max.max(min), width });
                    }
                }
                b"row" => {
                    current_row = attr_parse(&e, b"r")?.unwrap_or(current_row.saturating_add(1));
                    if !on_sheet(current_row, 1) {
                        return Err(off_sheet(current_row, 1));
                    }
                    last_col = 0;
                    if let Some(height) = attr_parse::<f64>(&e, b"ht")? {
                        sheet.row_heights.insert(current_row, height);
                    }
                }
                b"c" => {
                    let (row, col) = match attr(&e, b"r")? {
                        Some(reference) => parse_cell_ref(&reference).ok_or_else(|| {
                            AppError::Parse(format!("invalid cell reference '{}'", reference))
                        })?,
                        None => (current_row.max(1), last_col.saturating_add(1)),
                    };
                    if !on_sheet(row, col) {
                        return Err(off_sheet(row, col));
                    }
                    last_col = col;

                    let cell = PendingCell {
                        row,
                        col,
                        kind: attr(&e, b"t")?,
                        style_index: attr_parse(&e, b"s")?,
                        ..Default::default()
                    };

                    if is_empty {
                        sheet.cells.push(cell.finish(shared_strings)?);
                    } else {
                        pending = Some(cell);
                    }
                }
                b"v" if pending.is_some() && !is_empty => text_target = CellText::Value,
                b"t" if pending.is_some() && !is_empty => text_target = CellText::Inline,
                b"mergeCell" => {
                    if let Some(reference) = attr(&e, b"ref")? {
                        match parse_range(&reference) {
                            Some(range) => sheet.merges.push(range),
                            None => tracing::warn!("Skipping unreadable merge range '{}'", reference),
                        }
                    }
                }
                b"drawing" => sheet.drawing_part = attr(&e, b"id")?,
                _ => {}
            },
            Event::Text(t) if text_target != CellText::None => {
                let text = t.unescape().map_err(xml_err)?;
                if let Some(cell) = pending.as_mut() {
                    let slot = match text_target {
                        CellText::Value => &mut cell.value,
                        _ => &mut cell.inline,
                    };
                    slot.get_or_insert_with(String::new).push_str(&text);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => text_target = CellText::None,
                b"c" => {
                    if let Some(cell) = pending.take() {
                        sheet.cells.push(cell.finish(shared_strings)?);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let used_max_col = sheet
        .cells
        .iter()
        .map(|c| c.col)
        .chain(sheet.merges.iter().map(|m| m.end_col))
        .max()
        .unwrap_or(1);

    for spec in column_specs {
        let upper = if spec.max - spec.min < MAX_EXPANDED_COLUMN_SPAN {
            spec.max
        } else {
            spec.min.max(used_max_col)
        };
        for col in spec.min..=upper.min(MAX_COLUMN) {
            sheet.column_widths.insert(col, spec.width);
        }
    }

    Ok(sheet)
}

#[derive(Clone, Copy, PartialEq)]
enum Marker {
    None,
    From,
    To,
}

#[derive(Clone, Copy, PartialEq)]
enum MarkerField {
    None,
    Row,
    Col,
}

#[derive(Default)]
struct PendingAnchor {
    two_cell: bool,
    one_cell: bool,
    from: AnchorPoint,
    to: AnchorPoint,
    embed: Option<String>,
    unreadable: bool,
}

fn parse_drawing<F>(xml: &str, resolve_embed: F) -> Result<Vec<DrawingAnchor>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut reader = Reader::from_str(xml);
    let mut anchors = Vec::new();
    let mut pending: Option<PendingAnchor> = None;
    let mut marker = Marker::None;
    let mut field = MarkerField::None;

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"twoCellAnchor" => {
                    pending = Some(PendingAnchor {
                        two_cell: true,
                        ..Default::default()
                    })
                }
                b"oneCellAnchor" => {
                    pending = Some(PendingAnchor {
                        one_cell: true,
                        ..Default::default()
                    })
                }
                b"absoluteAnchor" => pending = Some(PendingAnchor::default()),
                b"from" => marker = Marker::From,
                b"to" => marker = Marker::To,
                b"row" if marker != Marker::None => field = MarkerField::Row,
                b"col" if marker != Marker::None => field = MarkerField::Col,
                b"blip" => {
                    if let Some(anchor) = pending.as_mut() {
                        anchor.embed = attr(&e, b"embed")?;
                    }
                }
                _ => {}
            },
            Event::Text(t) if field != MarkerField::None => {
                if let Some(anchor) = pending.as_mut() {
                    let raw = t.unescape().map_err(xml_err)?;
                    match raw.trim().parse::<u32>() {
                        Ok(value) => {
                            let point = match marker {
                                Marker::To => &mut anchor.to,
                                _ => &mut anchor.from,
                            };
                            match field {
                                MarkerField::Row => point.row = value,
                                _ => point.col = value,
                            }
                        }
                        Err(_) => anchor.unreadable = true,
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"row" | b"col" => field = MarkerField::None,
                b"from" | b"to" => marker = Marker::None,
                b"twoCellAnchor" | b"oneCellAnchor" | b"absoluteAnchor" => {
                    if let Some(anchor) = pending.take() {
                        // Shapes and charts carry no picture.
                        let embed = match anchor.embed {
                            Some(embed) => embed,
                            None => continue,
                        };

                        let kind = if anchor.unreadable {
                            AnchorKind::Unplaced
                        } else if anchor.two_cell {
                            AnchorKind::TwoCell {
                                from: anchor.from,
                                to: anchor.to,
                            }
                        } else if anchor.one_cell {
                            AnchorKind::OneCell { from: anchor.from }
                        } else {
                            AnchorKind::Unplaced
                        };

                        anchors.push(DrawingAnchor {
                            kind,
                            media_part: resolve_embed(&embed),
                        });
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(anchors)
}
