//! Database models
//!
//! Rust structs representing stored rows and the shapes handed to HTTP
//! clients. All models use serde for serialization.

use crate::xlsx::style::{
    AlignmentStyle, BorderSide, BorderStyle, CellStyle, FillStyle, FontStyle,
};
use crate::xlsx::{CellRange, CellRecord, DecomposedSheet, ExtractedImage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::str::FromStr;

/// A spreadsheet-backed bulletin post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub owner_id: i64,
    pub original_filename: Option<String>,
    /// SHA-256 of the uploaded workbook in the blob store
    pub source_hash: Option<String>,
    pub source_size: i64,
    pub parsed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata written on upload or re-upload
#[derive(Debug, Clone)]
pub struct DocumentMetadata {
    pub title: String,
    pub body: String,
    pub original_filename: Option<String>,
    pub source_hash: Option<String>,
    pub source_size: i64,
}

/// Everything extracted from one upload
#[derive(Debug, Clone, Default)]
pub struct DocumentContent {
    pub sheet: DecomposedSheet,
    pub images: Vec<ExtractedImage>,
}

/// A stored image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DocumentImage {
    pub id: i64,
    pub document_id: i64,
    /// Base64 of the raw image bytes
    pub image_data: String,
    pub image_type: String,
    pub content_hash: String,
    pub from_row: i64,
    pub from_col: i64,
    pub to_row: i64,
    pub to_col: i64,
    pub width: i64,
    pub height: i64,
    pub anchor_resolved: bool,
}

/// A cell joined with its optional style row
#[derive(Debug, Clone, FromRow)]
pub struct CellRow {
    pub row_num: i64,
    pub col_num: i64,
    pub value: Option<String>,
    pub style_id: Option<i64>,
    pub bold: Option<bool>,
    pub font_color: Option<String>,
    pub font_size: Option<f64>,
    pub fill_color: Option<String>,
    pub border_top_style: Option<String>,
    pub border_top_color: Option<String>,
    pub border_right_style: Option<String>,
    pub border_right_color: Option<String>,
    pub border_bottom_style: Option<String>,
    pub border_bottom_color: Option<String>,
    pub border_left_style: Option<String>,
    pub border_left_color: Option<String>,
    pub align_horizontal: Option<String>,
    pub align_vertical: Option<String>,
}

/// Parse a stored enum name. Names are written from the same enums, so a
/// mismatch means the row was edited outside the application.
fn stored_enum<T: FromStr>(column: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unknown {} value '{}'", column, raw);
            None
        }
    }
}

fn stored_side(column: &str, style: Option<String>, color: Option<String>) -> Option<BorderSide> {
    if style.is_none() && color.is_none() {
        return None;
    }
    Some(BorderSide {
        style: stored_enum(column, style),
        color,
    })
}

impl From<CellRow> for CellRecord {
    fn from(row: CellRow) -> Self {
        let style = row.style_id.map(|_| CellStyle {
            font: FontStyle {
                bold: row.bold.unwrap_or(false),
                color: row.font_color,
                size: row.font_size,
            },
            fill: FillStyle {
                bg_color: row.fill_color,
            },
            border: BorderStyle {
                top: stored_side("border_top_style", row.border_top_style, row.border_top_color),
                right: stored_side(
                    "border_right_style",
                    row.border_right_style,
                    row.border_right_color,
                ),
                bottom: stored_side(
                    "border_bottom_style",
                    row.border_bottom_style,
                    row.border_bottom_color,
                ),
                left: stored_side("border_left_style", row.border_left_style, row.border_left_color),
            },
            alignment: AlignmentStyle {
                horizontal: stored_enum("align_horizontal", row.align_horizontal),
                vertical: stored_enum("align_vertical", row.align_vertical),
            },
        });

        CellRecord {
            row: row.row_num as u32,
            col: row.col_num as u32,
            value: row.value,
            style,
        }
    }
}

#[derive(Debug, Clone, Copy, FromRow)]
pub struct MergeRow {
    pub start_row: i64,
    pub start_col: i64,
    pub end_row: i64,
    pub end_col: i64,
}

impl From<MergeRow> for CellRange {
    fn from(row: MergeRow) -> Self {
        CellRange {
            start_row: row.start_row as u32,
            start_col: row.start_col as u32,
            end_row: row.end_row as u32,
            end_col: row.end_col as u32,
        }
    }
}

/// One end of a merge range in responses
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellPosition {
    pub row: u32,
    pub col: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeResponse {
    pub start: CellPosition,
    pub end: CellPosition,
}

impl From<&CellRange> for MergeResponse {
    fn from(range: &CellRange) -> Self {
        MergeResponse {
            start: CellPosition {
                row: range.start_row,
                col: range.start_col,
            },
            end: CellPosition {
                row: range.end_row,
                col: range.end_col,
            },
        }
    }
}

/// Full document as returned by the detail endpoint
#[derive(Debug, Clone, Serialize)]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub document: Document,
    pub cells: Vec<CellRecord>,
    pub merges: Vec<MergeResponse>,
    /// Column number (as a string key) to width
    pub column_dimensions: BTreeMap<String, f64>,
    /// Row number (as a string key) to height
    pub row_dimensions: BTreeMap<String, f64>,
    pub images: Vec<DocumentImage>,
    pub exists: bool,
}

/// One page of documents
#[derive(Debug, Clone, Serialize)]
pub struct DocumentList {
    pub posts: Vec<Document>,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xlsx::style::{BorderLineStyle, HorizontalAlignment};

    fn bare_row() -> CellRow {
        CellRow {
            row_num: 2,
            col_num: 3,
            value: Some("x".to_string()),
            style_id: None,
            bold: None,
            font_color: None,
            font_size: None,
            fill_color: None,
            border_top_style: None,
            border_top_color: None,
            border_right_style: None,
            border_right_color: None,
            border_bottom_style: None,
            border_bottom_color: None,
            border_left_style: None,
            border_left_color: None,
            align_horizontal: None,
            align_vertical: None,
        }
    }

    #[test]
    fn test_unstyled_row() {
        let record = CellRecord::from(bare_row());
        assert_eq!((record.row, record.col), (2, 3));
        assert!(record.style.is_none());
    }

    #[test]
    fn test_styled_row() {
        let mut row = bare_row();
        row.style_id = Some(1);
        row.bold = Some(true);
        row.border_left_style = Some("thin".to_string());
        row.align_horizontal = Some("center".to_string());
        row.align_vertical = Some("sideways".to_string());

        let style = CellRecord::from(row).style.unwrap();
        assert!(style.font.bold);
        assert_eq!(
            style.border.left.and_then(|s| s.style),
            Some(BorderLineStyle::Thin)
        );
        assert!(style.border.top.is_none());
        assert_eq!(style.alignment.horizontal, Some(HorizontalAlignment::Center));
        assert_eq!(style.alignment.vertical, None);
    }

    #[test]
    fn test_merge_response_shape() {
        let range = CellRange {
            start_row: 2,
            start_col: 1,
            end_row: 2,
            end_col: 2,
        };
        let json = serde_json::to_value(MergeResponse::from(&range)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"start": {"row": 2, "col": 1}, "end": {"row": 2, "col": 2}})
        );
    }
}
