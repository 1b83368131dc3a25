//! Shared fixtures for integration tests
//!
//! Builds `.xlsx` archives in memory with just the parts the reader needs.

#![allow(dead_code)]

use bulletin_board::database::{create_memory_pool, Repository};
use bulletin_board::services::{DocumentsService, Principal, WorkerPool};
use bulletin_board::storage::BlobStore;
use std::io::{Cursor, Write};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const OWNER: Principal = Principal {
    user_id: 1,
    is_admin: false,
};

pub const STRANGER: Principal = Principal {
    user_id: 2,
    is_admin: false,
};

/// Minimal JPEG: SOI, APP0 marker, EOI
pub const JPEG: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0xFF, 0xD9,
];

const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

/// Builder for a single-sheet workbook
#[derive(Default)]
pub struct WorkbookFixture {
    rows: Vec<(u32, String)>,
    cols: Vec<String>,
    merges: Vec<String>,
    styles: Option<String>,
    drawing: Option<String>,
    media: Vec<(String, Vec<u8>)>,
}

impl WorkbookFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inline-string cell with an optional `cellXfs` index.
    pub fn text(mut self, reference: &str, text: &str, style: Option<u32>) -> Self {
        let style = style.map(|s| format!(r#" s="{}""#, s)).unwrap_or_default();
        let cell = format!(
            r#"<c r="{}"{} t="inlineStr"><is><t>{}</t></is></c>"#,
            reference, style, text
        );
        self.push_cell(reference, cell);
        self
    }

    pub fn number(mut self, reference: &str, value: f64) -> Self {
        let cell = format!(r#"<c r="{}"><v>{}</v></c>"#, reference, value);
        self.push_cell(reference, cell);
        self
    }

    pub fn column_width(mut self, col: u32, width: f64) -> Self {
        self.cols.push(format!(
            r#"<col min="{0}" max="{0}" width="{1}" customWidth="1"/>"#,
            col, width
        ));
        self
    }

    pub fn merge(mut self, range: &str) -> Self {
        self.merges.push(format!(r#"<mergeCell ref="{}"/>"#, range));
        self
    }

    /// Raw `xl/styles.xml` content.
    pub fn styles(mut self, xml: &str) -> Self {
        self.styles = Some(xml.to_string());
        self
    }

    /// Embed a JPEG with a two-cell anchor; coordinates are zero-based.
    pub fn anchored_image(mut self, name: &str, from: (u32, u32), to: (u32, u32), data: &[u8]) -> Self {
        let rel_id = format!("rId{}", self.media.len() + 1);
        let anchor = format!(
            r#"<xdr:twoCellAnchor><xdr:from><xdr:col>{}</xdr:col><xdr:row>{}</xdr:row></xdr:from><xdr:to><xdr:col>{}</xdr:col><xdr:row>{}</xdr:row></xdr:to><xdr:pic><xdr:blipFill><a:blip r:embed="{}"/></xdr:blipFill></xdr:pic></xdr:twoCellAnchor>"#,
            from.1, from.0, to.1, to.0, rel_id
        );
        self.drawing.get_or_insert_with(String::new).push_str(&anchor);
        self.media.push((name.to_string(), data.to_vec()));
        self
    }

    /// Add a media entry no drawing refers to.
    pub fn loose_media(mut self, name: &str, data: &[u8]) -> Self {
        self.media.push((name.to_string(), data.to_vec()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut buffer);
            let options = SimpleFileOptions::default();
            let mut add = |name: &str, data: &[u8]| {
                zip.start_file(name, options).unwrap();
                zip.write_all(data).unwrap();
            };

            add("xl/workbook.xml", WORKBOOK.as_bytes());
            add("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.as_bytes());
            add("xl/worksheets/sheet1.xml", self.sheet_xml().as_bytes());

            if let Some(styles) = &self.styles {
                add("xl/styles.xml", styles.as_bytes());
            }

            if let Some(anchors) = &self.drawing {
                add(
                    "xl/worksheets/_rels/sheet1.xml.rels",
                    br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing" Target="../drawings/drawing1.xml"/></Relationships>"#,
                );
                let drawing = format!(
                    r#"<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">{}</xdr:wsDr>"#,
                    anchors
                );
                add("xl/drawings/drawing1.xml", drawing.as_bytes());

                let relationships: String = self
                    .media
                    .iter()
                    .enumerate()
                    .map(|(i, (name, _))| {
                        format!(
                            r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="../media/{}"/>"#,
                            i + 1,
                            name
                        )
                    })
                    .collect();
                let rels = format!(
                    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{}</Relationships>"#,
                    relationships
                );
                add("xl/drawings/_rels/drawing1.xml.rels", rels.as_bytes());
            }

            for (name, data) in &self.media {
                add(&format!("xl/media/{}", name), data);
            }

            drop(add);
            zip.finish().unwrap();
        }
        buffer.into_inner()
    }

    fn push_cell(&mut self, reference: &str, cell: String) {
        let row: u32 = reference
            .trim_start_matches(|c: char| c.is_ascii_alphabetic())
            .parse()
            .unwrap();
        self.rows.push((row, cell));
    }

    fn sheet_xml(&self) -> String {
        let mut rows = self.rows.clone();
        rows.sort_by_key(|(row, _)| *row);

        let mut sheet_data = String::new();
        let mut current: Option<u32> = None;
        for (row, cell) in rows {
            if current != Some(row) {
                if current.is_some() {
                    sheet_data.push_str("</row>");
                }
                sheet_data.push_str(&format!(r#"<row r="{}">"#, row));
                current = Some(row);
            }
            sheet_data.push_str(&cell);
        }
        if current.is_some() {
            sheet_data.push_str("</row>");
        }

        let cols = if self.cols.is_empty() {
            String::new()
        } else {
            format!("<cols>{}</cols>", self.cols.concat())
        };
        let merges = if self.merges.is_empty() {
            String::new()
        } else {
            format!(
                r#"<mergeCells count="{}">{}</mergeCells>"#,
                self.merges.len(),
                self.merges.concat()
            )
        };
        let drawing = if self.drawing.is_some() {
            r#"<drawing r:id="rId1"/>"#
        } else {
            ""
        };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">{}<sheetData>{}</sheetData>{}{}</worksheet>"#,
            cols, sheet_data, merges, drawing
        )
    }
}

/// A populated `rows` x `cols` sheet of inline strings.
pub fn grid(rows: u32, cols: u32) -> Vec<u8> {
    let mut fixture = WorkbookFixture::new();
    for row in 1..=rows {
        for col in 1..=cols {
            let reference = format!("{}{}", column_letters(col), row);
            fixture = fixture.text(&reference, &format!("r{}c{}", row, col), None);
        }
    }
    fixture.build()
}

pub fn column_letters(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap()
}

/// Helper to create a documents service over an in-memory database
pub async fn create_test_service() -> (DocumentsService, TempDir) {
    let pool = create_memory_pool().await.unwrap();
    let repo = Repository::new(pool);

    let temp_dir = TempDir::new().unwrap();
    let blob_store = BlobStore::new(temp_dir.path().join("blobs"));
    blob_store.initialize().await.unwrap();

    let workers = WorkerPool::new(2).unwrap();

    (DocumentsService::new(repo, blob_store, workers), temp_dir)
}
