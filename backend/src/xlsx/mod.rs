//! Spreadsheet module
//!
//! Reading uploaded workbooks into storable collections and writing stored
//! collections back out as workbooks.

pub mod color;
pub mod compose;
pub mod decompose;
pub mod images;
pub mod reader;
pub mod style;

pub use compose::{compose, export_filename};
pub use decompose::{decompose_bytes, CellRecord, DecomposedSheet};
pub use images::{extract_images, ExtractedImage};
pub use reader::CellRange;
pub use style::CellStyle;
