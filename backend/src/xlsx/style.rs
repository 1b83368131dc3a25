//! Cell style extraction
//!
//! Turns the style records a cell resolves to into a flat [`CellStyle`].
//! Every attribute is read independently: a malformed value degrades that
//! one field to `None` and never aborts extraction of the rest.

use super::color::normalize_argb;
use super::reader::{CellHandle, RawBorderSide, RawColor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest font size a spreadsheet accepts, in points
const MAX_FONT_SIZE: f64 = 409.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FontStyle {
    pub bold: bool,
    /// Normalized `AARRGGBB`
    pub color: Option<String>,
    pub size: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FillStyle {
    #[serde(rename = "bgColor")]
    pub bg_color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BorderSide {
    pub style: Option<BorderLineStyle>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BorderStyle {
    pub top: Option<BorderSide>,
    pub right: Option<BorderSide>,
    pub bottom: Option<BorderSide>,
    pub left: Option<BorderSide>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentStyle {
    pub horizontal: Option<HorizontalAlignment>,
    pub vertical: Option<VerticalAlignment>,
}

/// Style of one cell. Absent fields inherit the sheet default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellStyle {
    pub font: FontStyle,
    pub fill: FillStyle,
    pub border: BorderStyle,
    pub alignment: AlignmentStyle,
}

impl CellStyle {
    /// True when the style carries nothing beyond the sheet defaults.
    pub fn is_default(&self) -> bool {
        self == &CellStyle::default()
    }
}

/// Declares a string-backed enum with its OOXML names.
macro_rules! ooxml_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(other.to_string()),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

ooxml_enum!(
    /// Line style of a border side
    BorderLineStyle {
        Thin => "thin",
        Medium => "medium",
        Thick => "thick",
        Dashed => "dashed",
        Dotted => "dotted",
        Double => "double",
        Hair => "hair",
        MediumDashed => "mediumDashed",
        DashDot => "dashDot",
        MediumDashDot => "mediumDashDot",
        DashDotDot => "dashDotDot",
        MediumDashDotDot => "mediumDashDotDot",
        SlantDashDot => "slantDashDot",
    }
);

ooxml_enum!(
    HorizontalAlignment {
        General => "general",
        Left => "left",
        Center => "center",
        Right => "right",
        Fill => "fill",
        Justify => "justify",
        CenterContinuous => "centerContinuous",
        Distributed => "distributed",
    }
);

ooxml_enum!(
    VerticalAlignment {
        Top => "top",
        Center => "center",
        Bottom => "bottom",
        Justify => "justify",
        Distributed => "distributed",
    }
);

/// A single style attribute that could not be read
#[derive(Debug, Error)]
enum StyleFieldError {
    #[error("color '{0}' is not hexadecimal")]
    Color(String),

    #[error("font size '{0}' is not a usable number")]
    Size(String),

    #[error("unknown border style '{0}'")]
    BorderLine(String),

    #[error("unknown alignment '{0}'")]
    Alignment(String),
}

type FieldResult<T> = std::result::Result<Option<T>, StyleFieldError>;

/// Keep a field's value, or log the failure and drop the field.
fn recover<T>(cell: &CellHandle<'_>, field: &str, result: FieldResult<T>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(
                "Dropping {} of cell ({}, {}): {}",
                field,
                cell.cell.row,
                cell.cell.col,
                e
            );
            None
        }
    }
}

/// Read an explicit RGB color. Theme and indexed colors have no fixed value
/// and are treated as absent.
fn read_color(color: Option<&RawColor>) -> FieldResult<String> {
    let rgb = match color.and_then(|c| c.rgb.as_deref()) {
        Some(rgb) => rgb.trim(),
        None => return Ok(None),
    };

    let digits = rgb.strip_prefix('#').unwrap_or(rgb);
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(StyleFieldError::Color(rgb.to_string()));
    }

    Ok(normalize_argb(Some(rgb)).map(|argb| argb.to_ascii_uppercase()))
}

fn read_size(size: Option<&str>) -> FieldResult<f64> {
    let raw = match size {
        Some(raw) => raw.trim(),
        None => return Ok(None),
    };

    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 && value <= MAX_FONT_SIZE => Ok(Some(value)),
        _ => Err(StyleFieldError::Size(raw.to_string())),
    }
}

fn read_enum<T: FromStr>(raw: Option<&str>, error: fn(String) -> StyleFieldError) -> FieldResult<T> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| error(value.to_string())),
    }
}

fn read_side(cell: &CellHandle<'_>, name: &str, side: Option<&RawBorderSide>) -> Option<BorderSide> {
    let side = side?;

    let style = match side.style.as_deref() {
        Some("none") => None,
        other => recover(
            cell,
            &format!("{} border style", name),
            read_enum(other, StyleFieldError::BorderLine),
        ),
    };
    let color = recover(
        cell,
        &format!("{} border color", name),
        read_color(side.color.as_ref()),
    );

    if style.is_none() && color.is_none() {
        return None;
    }
    Some(BorderSide { style, color })
}

/// Extract the style of one cell.
///
/// Returns `None` when the cell carries nothing beyond the sheet defaults.
pub fn extract_style(cell: &CellHandle<'_>) -> Option<CellStyle> {
    // Format 0 is the workbook's default style.
    if cell.format.is_none() || cell.cell.style_index.unwrap_or(0) == 0 {
        return None;
    }

    let font = cell
        .font
        .map(|font| FontStyle {
            bold: font.bold,
            color: recover(cell, "font color", read_color(font.color.as_ref())),
            size: recover(cell, "font size", read_size(font.size.as_deref())),
        })
        .unwrap_or_default();

    let fill = FillStyle {
        bg_color: cell
            .fill
            .filter(|fill| fill.pattern_type.as_deref() != Some("none"))
            .and_then(|fill| recover(cell, "fill color", read_color(fill.fg_color.as_ref()))),
    };

    let border = cell
        .border
        .map(|border| BorderStyle {
            top: read_side(cell, "top", border.top.as_ref()),
            right: read_side(cell, "right", border.right.as_ref()),
            bottom: read_side(cell, "bottom", border.bottom.as_ref()),
            left: read_side(cell, "left", border.left.as_ref()),
        })
        .unwrap_or_default();

    let alignment = cell
        .format
        .and_then(|format| format.alignment.as_ref())
        .map(|alignment| AlignmentStyle {
            horizontal: recover(
                cell,
                "horizontal alignment",
                read_enum(alignment.horizontal.as_deref(), StyleFieldError::Alignment),
            ),
            vertical: recover(
                cell,
                "vertical alignment",
                read_enum(alignment.vertical.as_deref(), StyleFieldError::Alignment),
            ),
        })
        .unwrap_or_default();

    let style = CellStyle {
        font,
        fill,
        border,
        alignment,
    };

    if style.is_default() {
        None
    } else {
        Some(style)
    }
}
