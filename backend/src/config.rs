//! Application configuration
//!
//! Central location for spreadsheet geometry constants, resource limits and
//! validation boundaries, plus the JSON settings file read at startup.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ===== Sheet Geometry =====

/// Column width Excel assumes when a column carries no explicit width (character units)
pub const DEFAULT_COLUMN_WIDTH: f64 = 8.43;
/// Row height Excel assumes when a row carries no explicit height (points)
pub const DEFAULT_ROW_HEIGHT: f64 = 15.0;

/// Pixels per column width unit (maximum digit width of the default Calibri 11 font)
pub const COLUMN_WIDTH_TO_PIXELS: f64 = 7.0;
/// Pixels per point at 96 DPI
pub const ROW_HEIGHT_TO_PIXELS: f64 = 96.0 / 72.0;

/// Padding, in pixels, Excel adds to every stored column width
pub const COLUMN_WIDTH_PADDING_PIXELS: f64 = 5.0;

/// Highest column number addressable in a worksheet (XFD)
pub const MAX_COLUMN: u32 = 16_384;
/// Highest row number addressable in a worksheet
pub const MAX_ROW: u32 = 1_048_576;

// ===== Image Placement =====

/// Smallest width an extracted image is displayed with
pub const MIN_IMAGE_WIDTH_PX: f64 = 300.0;
/// Smallest height an extracted image is displayed with
pub const MIN_IMAGE_HEIGHT_PX: f64 = 200.0;

/// Rows spanned by an image whose anchor could not be read
pub const PLACEHOLDER_ROW_SPAN: u32 = 10;
/// Columns spanned by an image whose anchor could not be read
pub const PLACEHOLDER_COL_SPAN: u32 = 5;
/// Vertical distance between consecutive placeholder regions
pub const PLACEHOLDER_ROW_STRIDE: u32 = 12;

/// Archive directory holding embedded media
pub const MEDIA_PREFIX: &str = "xl/media/";

// ===== Worker Pool Limits =====

pub const DEFAULT_WORKER_THREADS: usize = 4;
pub const MIN_WORKER_THREADS: usize = 1;
pub const MAX_WORKER_THREADS: usize = 64;

// ===== Upload Limits =====

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
pub const MIN_MAX_UPLOAD_BYTES: usize = 1024;
pub const MAX_MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Maximum length of a document title
pub const MAX_TITLE_LENGTH: usize = 255;

/// Workbook extensions accepted on upload
pub const ACCEPTED_EXTENSIONS: &[&str] = &["xlsx", "xlsm"];

// ===== Paging =====

pub const DEFAULT_PAGE_LIMIT: i64 = 10;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Environment variable naming the JSON settings file
pub const CONFIG_ENV_VAR: &str = "BULLETIN_BOARD_CONFIG";

/// Identity bound to a static bearer token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenGrant {
    pub user_id: i64,
    #[serde(default)]
    pub is_admin: bool,
}

/// Server settings loaded from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Bearer token to identity map
    #[serde(default)]
    pub tokens: HashMap<String, TokenGrant>,
}

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_worker_threads() -> usize {
    DEFAULT_WORKER_THREADS
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            data_dir: default_data_dir(),
            worker_threads: default_worker_threads(),
            max_upload_bytes: default_max_upload_bytes(),
            tokens: HashMap::new(),
        }
    }
}

impl ServerSettings {
    /// Load settings from the file named by `BULLETIN_BOARD_CONFIG`, or defaults.
    pub fn load_from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load(Path::new(&path)),
            None => {
                tracing::info!("{} not set, using default settings", CONFIG_ENV_VAR);
                Ok(Self::default())
            }
        }
    }

    /// Load settings from a JSON file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Settings file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let settings: ServerSettings = serde_json::from_str(&raw)?;
        settings.validate()?;

        tracing::info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_WORKER_THREADS..=MAX_WORKER_THREADS).contains(&self.worker_threads) {
            return Err(AppError::validation(
                "worker_threads",
                format!(
                    "must be between {} and {}, got {}",
                    MIN_WORKER_THREADS, MAX_WORKER_THREADS, self.worker_threads
                ),
            ));
        }

        if !(MIN_MAX_UPLOAD_BYTES..=MAX_MAX_UPLOAD_BYTES).contains(&self.max_upload_bytes) {
            return Err(AppError::validation(
                "max_upload_bytes",
                format!(
                    "must be between {} and {}, got {}",
                    MIN_MAX_UPLOAD_BYTES, MAX_MAX_UPLOAD_BYTES, self.max_upload_bytes
                ),
            ));
        }

        if self.bind_address.trim().is_empty() {
            return Err(AppError::validation("bind_address", "must not be empty"));
        }

        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("db.sqlite")
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let settings = ServerSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.worker_threads, 4);
        assert_eq!(settings.database_path(), PathBuf::from("./data/db.sqlite"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"worker_threads": 2, "tokens": {"secret": {"user_id": 7, "is_admin": true}}}"#,
        )
        .unwrap();

        let settings = ServerSettings::load(&path).unwrap();
        assert_eq!(settings.worker_threads, 2);
        assert_eq!(settings.bind_address, "127.0.0.1:8080");
        assert_eq!(
            settings.tokens.get("secret"),
            Some(&TokenGrant {
                user_id: 7,
                is_admin: true
            })
        );
    }

    #[test]
    fn test_rejects_out_of_range_workers() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(&path, r#"{"worker_threads": 0}"#).unwrap();

        let err = ServerSettings::load(&path).unwrap_err();
        assert_eq!(err.field(), Some("worker_threads"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let settings = ServerSettings::load(&temp.path().join("absent.json")).unwrap();
        assert_eq!(settings.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }
}
