//! Storage module
//!
//! Provides blob storage for original workbook uploads.

pub mod blob_store;

pub use blob_store::{calculate_hash, BlobStore};
