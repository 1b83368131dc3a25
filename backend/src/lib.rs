//! Bulletin board library
//!
//! Posts backed by uploaded spreadsheets: workbooks are decomposed into
//! cells, styles, merges, dimensions and images, stored relationally, and
//! composed back into a workbook on download.

pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod services;
pub mod storage;
pub mod xlsx;
