//! Embedded image extraction
//!
//! Scans the archive's media directory for JPEG pictures, places each one on
//! the cell grid using the sheet's drawing anchors, and computes a display
//! size from the column widths and row heights it spans.
//!
//! Extraction is best effort. A picture that cannot be read is logged and
//! skipped; nothing here fails the surrounding upload.

use super::reader::{
    open_archive, read_drawing_anchors, read_workbook, AnchorKind, DrawingAnchor,
};
use crate::config::{
    COLUMN_WIDTH_TO_PIXELS, DEFAULT_COLUMN_WIDTH, DEFAULT_ROW_HEIGHT, MEDIA_PREFIX,
    MIN_IMAGE_HEIGHT_PX, MIN_IMAGE_WIDTH_PX, PLACEHOLDER_COL_SPAN, PLACEHOLDER_ROW_SPAN,
    PLACEHOLDER_ROW_STRIDE, ROW_HEIGHT_TO_PIXELS,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use thiserror::Error;

const JPEG_SIGNATURE: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// Image format tag stored with every extracted picture
pub const JPEG_IMAGE_TYPE: &str = "jpeg";

/// A picture ready to persist
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedImage {
    /// Base64 of the raw JPEG bytes
    pub data: String,
    pub image_type: String,
    /// Hex SHA-256 of the raw bytes
    pub content_hash: String,
    pub from_row: u32,
    pub from_col: u32,
    pub to_row: u32,
    pub to_col: u32,
    pub width: u32,
    pub height: u32,
    /// False when the position is a placeholder rather than the picture's anchor
    pub anchor_resolved: bool,
}

#[derive(Debug, Error)]
enum ImageFieldError {
    #[error("failed to read {0}: {1}")]
    Read(String, String),

    #[error("{0} does not carry a JPEG signature")]
    Signature(String),
}

/// Cell rectangle, 1-based, `to_*` exclusive
#[derive(Debug, Clone, Copy, PartialEq)]
struct Placement {
    from_row: u32,
    from_col: u32,
    to_row: u32,
    to_col: u32,
    resolved: bool,
}

impl Placement {
    /// Fixed-size region stacked down column A by image index.
    fn placeholder(index: usize) -> Self {
        let from_row = 1 + index as u32 * PLACEHOLDER_ROW_STRIDE;
        let from_col = 1;
        Self {
            from_row,
            from_col,
            to_row: from_row + PLACEHOLDER_ROW_SPAN,
            to_col: from_col + PLACEHOLDER_COL_SPAN,
            resolved: false,
        }
    }

    fn from_anchor(kind: &AnchorKind, index: usize) -> Self {
        match kind {
            AnchorKind::TwoCell { from, to } => Self {
                from_row: from.row + 1,
                from_col: from.col + 1,
                to_row: to.row + 1,
                to_col: to.col + 1,
                resolved: true,
            },
            AnchorKind::OneCell { from } => Self {
                from_row: from.row + 1,
                from_col: from.col + 1,
                to_row: from.row + 1 + PLACEHOLDER_ROW_SPAN,
                to_col: from.col + 1 + PLACEHOLDER_COL_SPAN,
                resolved: true,
            },
            AnchorKind::Unplaced => Self::placeholder(index),
        }
    }
}

/// Column widths and row heights used to size pictures
#[derive(Debug, Default)]
struct Geometry {
    column_widths: BTreeMap<u32, f64>,
    row_heights: BTreeMap<u32, f64>,
}

impl Geometry {
    /// Pixel size of a placement, floored at the minimum display size.
    fn pixel_size(&self, placement: &Placement) -> (u32, u32) {
        let to_col = placement.to_col.max(placement.from_col + 1);
        let to_row = placement.to_row.max(placement.from_row + 1);

        let width: f64 = (placement.from_col..to_col)
            .map(|col| {
                self.column_widths
                    .get(&col)
                    .copied()
                    .unwrap_or(DEFAULT_COLUMN_WIDTH)
                    * COLUMN_WIDTH_TO_PIXELS
            })
            .sum();
        let height: f64 = (placement.from_row..to_row)
            .map(|row| {
                self.row_heights
                    .get(&row)
                    .copied()
                    .unwrap_or(DEFAULT_ROW_HEIGHT)
                    * ROW_HEIGHT_TO_PIXELS
            })
            .sum();

        (
            width.max(MIN_IMAGE_WIDTH_PX).round() as u32,
            height.max(MIN_IMAGE_HEIGHT_PX).round() as u32,
        )
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_jpeg_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with(MEDIA_PREFIX) && (lower.ends_with(".jpg") || lower.ends_with(".jpeg"))
}

/// Find the anchor that embeds `media_name`, by exact name first and then by
/// containment.
fn match_anchor<'a>(anchors: &'a [DrawingAnchor], media_name: &str) -> Option<&'a DrawingAnchor> {
    fn anchor_name(anchor: &DrawingAnchor) -> Option<&str> {
        anchor.media_part.as_deref().map(basename)
    }

    anchors
        .iter()
        .find(|anchor| anchor_name(anchor) == Some(media_name))
        .or_else(|| {
            anchors.iter().find(|anchor| match anchor_name(anchor) {
                Some(name) if !name.is_empty() => {
                    name.contains(media_name) || media_name.contains(name)
                }
                _ => false,
            })
        })
}

fn load_geometry(bytes: &[u8]) -> (Geometry, Option<String>) {
    match read_workbook(bytes) {
        Ok(workbook) => (
            Geometry {
                column_widths: workbook.sheet.column_widths,
                row_heights: workbook.sheet.row_heights,
            },
            workbook.sheet.drawing_part,
        ),
        Err(e) => {
            tracing::warn!("Sizing images with default dimensions: {}", e);
            (Geometry::default(), None)
        }
    }
}

fn load_anchors(bytes: &[u8], drawing_part: Option<&str>) -> Vec<DrawingAnchor> {
    let drawing_part = match drawing_part {
        Some(part) => part,
        None => return Vec::new(),
    };

    read_drawing_anchors(bytes, drawing_part).unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable drawing {}: {}", drawing_part, e);
        Vec::new()
    })
}

fn read_jpeg(archive: &mut super::reader::Archive<'_>, index: usize) -> Result<Option<(String, Vec<u8>)>, ImageFieldError> {
    let mut file = archive
        .by_index(index)
        .map_err(|e| ImageFieldError::Read(format!("entry {}", index), e.to_string()))?;

    let name = file.name().to_string();
    if file.is_dir() || !is_jpeg_name(&name) {
        return Ok(None);
    }

    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .map_err(|e| ImageFieldError::Read(name.clone(), e.to_string()))?;

    if !data.starts_with(&JPEG_SIGNATURE) {
        return Err(ImageFieldError::Signature(name));
    }

    Ok(Some((name, data)))
}

/// Extract every distinct JPEG embedded in a workbook.
pub fn extract_images(bytes: &[u8]) -> Vec<ExtractedImage> {
    let (geometry, drawing_part) = load_geometry(bytes);
    let anchors = load_anchors(bytes, drawing_part.as_deref());

    let mut archive = match open_archive(bytes) {
        Ok(archive) => archive,
        Err(e) => {
            tracing::warn!("Skipping image extraction: {}", e);
            return Vec::new();
        }
    };

    let mut seen_hashes = HashSet::new();
    let mut images = Vec::new();

    for index in 0..archive.len() {
        let (name, data) = match read_jpeg(&mut archive, index) {
            Ok(Some(entry)) => entry,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("Skipping image: {}", e);
                continue;
            }
        };

        let content_hash = format!("{:x}", Sha256::digest(&data));
        if !seen_hashes.insert(content_hash.clone()) {
            tracing::debug!("Skipping duplicate image {} ({})", name, content_hash);
            continue;
        }

        let media_name = basename(&name);
        let image_index = images.len();
        let placement = match match_anchor(&anchors, media_name) {
            Some(anchor) => Placement::from_anchor(&anchor.kind, image_index),
            None => Placement::placeholder(image_index),
        };

        if !placement.resolved {
            tracing::warn!(
                "Image {} has no usable anchor, placed at rows {}..{}",
                media_name,
                placement.from_row,
                placement.to_row
            );
        }

        let (width, height) = geometry.pixel_size(&placement);

        images.push(ExtractedImage {
            data: STANDARD.encode(&data),
            image_type: JPEG_IMAGE_TYPE.to_string(),
            content_hash,
            from_row: placement.from_row,
            from_col: placement.from_col,
            to_row: placement.to_row,
            to_col: placement.to_col,
            width,
            height,
            anchor_resolved: placement.resolved,
        });
    }

    tracing::debug!("Extracted {} images", images.len());
    images
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xlsx::reader::tests::build_xlsx;
    use crate::xlsx::reader::AnchorPoint;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0xFF, 0xD9];

    const SHEET: &str = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<cols><col min="2" max="2" width="50"/></cols>
<sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>x</t></is></c></row></sheetData>
<drawing r:id="rId1"/>
</worksheet>"#;

    const SHEET_RELS: &[u8] = br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="drawing" Target="../drawings/drawing1.xml"/></Relationships>"#;

    const DRAWING: &[u8] = br#"<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<xdr:twoCellAnchor><xdr:from><xdr:col>1</xdr:col><xdr:row>3</xdr:row></xdr:from><xdr:to><xdr:col>3</xdr:col><xdr:row>20</xdr:row></xdr:to><xdr:pic><xdr:blipFill><a:blip r:embed="rId1"/></xdr:blipFill></xdr:pic></xdr:twoCellAnchor>
</xdr:wsDr>"#;

    const DRAWING_RELS: &[u8] = br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="image" Target="../media/image1.jpeg"/></Relationships>"#;

    #[test]
    fn test_anchored_image() {
        let bytes = build_xlsx(
            SHEET,
            &[
                ("xl/worksheets/_rels/sheet1.xml.rels", SHEET_RELS),
                ("xl/drawings/drawing1.xml", DRAWING),
                ("xl/drawings/_rels/drawing1.xml.rels", DRAWING_RELS),
                ("xl/media/image1.jpeg", JPEG),
            ],
        );

        let images = extract_images(&bytes);
        assert_eq!(images.len(), 1);

        let image = &images[0];
        assert!(image.anchor_resolved);
        assert_eq!((image.from_row, image.from_col), (4, 2));
        assert_eq!((image.to_row, image.to_col), (21, 4));
        assert_eq!(image.image_type, "jpeg");
        assert_eq!(STANDARD.decode(&image.data).unwrap(), JPEG);

        // Columns 2 and 3: 50 + 8.43 width units
        assert_eq!(image.width, ((50.0 + 8.43) * 7.0_f64).round() as u32);
        // 17 default rows
        assert_eq!(image.height, (17.0_f64 * 15.0 * 96.0 / 72.0).round() as u32);
    }

    #[test]
    fn test_duplicate_bytes_yield_one_image() {
        let sheet = r#"<worksheet><sheetData/></worksheet>"#;
        let bytes = build_xlsx(
            sheet,
            &[("xl/media/image1.jpeg", JPEG), ("xl/media/image2.JPG", JPEG)],
        );

        let images = extract_images(&bytes);
        assert_eq!(images.len(), 1);
        assert!(!images[0].anchor_resolved);
        assert_eq!((images[0].from_row, images[0].from_col), (1, 1));
        // Placeholder area is below the floor
        assert_eq!((images[0].width, images[0].height), (300, 200));
    }

    #[test]
    fn test_non_jpeg_entries_are_skipped() {
        let sheet = r#"<worksheet><sheetData/></worksheet>"#;
        let png: &[u8] = &[0x89, b'P', b'N', b'G'];
        let bytes = build_xlsx(
            sheet,
            &[
                ("xl/media/image1.png", png),
                ("xl/media/fake.jpeg", png),
                ("xl/media/real.jpg", JPEG),
            ],
        );

        let images = extract_images(&bytes);
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn test_unreadable_archive_yields_nothing() {
        assert!(extract_images(b"not an archive").is_empty());
    }

    #[test]
    fn test_placeholders_are_stacked_by_index() {
        let second = Placement::placeholder(1);
        assert_eq!(second.from_row, 13);
        assert_eq!(second.to_row, 23);
        assert_eq!(second.to_col, 6);
    }

    #[test]
    fn test_one_cell_anchor_uses_placeholder_span() {
        let placement = Placement::from_anchor(
            &AnchorKind::OneCell {
                from: AnchorPoint { row: 4, col: 2 },
            },
            0,
        );
        assert!(placement.resolved);
        assert_eq!((placement.from_row, placement.from_col), (5, 3));
        assert_eq!((placement.to_row, placement.to_col), (15, 8));
    }

    #[test]
    fn test_match_by_containment() {
        let anchors = vec![DrawingAnchor {
            kind: AnchorKind::Unplaced,
            media_part: Some("xl/media/image1".to_string()),
        }];
        assert!(match_anchor(&anchors, "image1.jpeg").is_some());
        assert!(match_anchor(&anchors, "photo.jpeg").is_none());
    }
}
