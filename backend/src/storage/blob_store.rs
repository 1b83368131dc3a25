//! Content-addressed blob storage
//!
//! Keeps the original bytes of every uploaded workbook, keyed by SHA-256.
//! Files are organized in a two-level directory structure.
//!
//! Example: hash "abcd1234..." is stored at "blobs/ab/cd/abcd1234..."

use crate::error::{AppError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Content-addressed blob store
#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Create a store rooted at `root`. Call `initialize` before use.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create the root directory if needed
    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        tracing::info!("Blob store initialized at: {:?}", self.root);
        Ok(())
    }

    /// Write data to the store, returning its SHA-256 hash
    pub async fn write(&self, data: &[u8]) -> Result<String> {
        let hash = calculate_hash(data);
        let path = self.get_path(&hash)?;

        if fs::try_exists(&path).await? {
            tracing::debug!("Blob already exists: {}", hash);
            return Ok(hash);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a temp file and rename so readers never see partial blobs
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;

        fs::rename(temp_path, &path).await?;

        tracing::debug!("Wrote blob: {} ({} bytes)", hash, data.len());

        Ok(hash)
    }

    /// Read a blob's bytes by hash
    pub async fn read(&self, hash: &str) -> Result<Vec<u8>> {
        let path = self.get_path(hash)?;

        if !fs::try_exists(&path).await? {
            return Err(AppError::BlobStore(format!("Blob not found: {}", hash)));
        }

        let mut file = fs::File::open(&path).await?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).await?;

        tracing::debug!("Read blob: {} ({} bytes)", hash, data.len());

        Ok(data)
    }

    /// Check if a blob exists. Malformed hashes never exist.
    pub async fn exists(&self, hash: &str) -> Result<bool> {
        match self.get_path(hash) {
            Ok(path) => Ok(fs::try_exists(&path).await?),
            Err(_) => Ok(false),
        }
    }

    /// Delete a blob. Deleting a missing blob is not an error.
    pub async fn delete(&self, hash: &str) -> Result<()> {
        let path = self.get_path(hash)?;

        if !fs::try_exists(&path).await? {
            return Ok(());
        }

        fs::remove_file(&path).await?;

        tracing::debug!("Deleted blob: {}", hash);

        Ok(())
    }

    /// Path for a hash: blobs/ab/cd/abcd1234...
    fn get_path(&self, hash: &str) -> Result<PathBuf> {
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AppError::BlobStore(format!("Invalid blob hash: {}", hash)));
        }

        Ok(self.root.join(&hash[0..2]).join(&hash[2..4]).join(hash))
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// SHA-256 of data as lowercase hex
pub fn calculate_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_store() -> (BlobStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = BlobStore::new(temp_dir.path().join("blobs"));
        store.initialize().await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (store, _temp) = create_test_store().await;

        let data = b"PK\x03\x04 workbook bytes";
        let hash = store.write(data).await.unwrap();

        let read_data = store.read(&hash).await.unwrap();
        assert_eq!(data, read_data.as_slice());
        assert_eq!(hash, calculate_hash(data));
    }

    #[tokio::test]
    async fn test_hash_consistency() {
        let (store, _temp) = create_test_store().await;

        let hash1 = store.write(b"same upload").await.unwrap();
        let hash2 = store.write(b"same upload").await.unwrap();

        assert_eq!(hash1, hash2);
    }

    #[tokio::test]
    async fn test_exists_and_delete() {
        let (store, _temp) = create_test_store().await;

        let hash = store.write(b"Delete test").await.unwrap();
        assert!(store.exists(&hash).await.unwrap());
        assert!(!store.exists("nonexistent").await.unwrap());

        store.delete(&hash).await.unwrap();
        assert!(!store.exists(&hash).await.unwrap());

        // Second delete is a no-op
        store.delete(&hash).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_malformed_hash() {
        let (store, _temp) = create_test_store().await;

        assert!(matches!(
            store.read("../../etc/passwd").await,
            Err(AppError::BlobStore(_))
        ));
        assert!(store.delete("ab").await.is_err());
    }

    #[tokio::test]
    async fn test_directory_structure() {
        let (store, _temp) = create_test_store().await;

        let hash = store.write(b"Directory test").await.unwrap();

        let path = store.get_path(&hash).unwrap();
        assert!(path.exists());

        let parent = path.parent().unwrap();
        let grandparent = parent.parent().unwrap();

        assert_eq!(parent.file_name().unwrap(), &hash[2..4]);
        assert_eq!(grandparent.file_name().unwrap(), &hash[0..2]);
        assert!(path.starts_with(store.root()));
    }
}
