//! Documents service
//!
//! The boundary operations on spreadsheet-backed posts: ingest, replace,
//! compose, detail and list reads, delete, and original-source download.
//! Integrates the Repository, the BlobStore and the WorkerPool.

use super::auth::Principal;
use super::worker_pool::WorkerPool;
use crate::config::{ACCEPTED_EXTENSIONS, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT, MAX_TITLE_LENGTH};
use crate::database::{
    Document, DocumentContent, DocumentDetail, DocumentList, DocumentMetadata, MergeResponse,
    Repository,
};
use crate::error::{AppError, Result};
use crate::storage::{calculate_hash, BlobStore};
use crate::xlsx::{self, DecomposedSheet};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// An uploaded workbook with its post metadata
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub title: String,
    pub body: String,
}

/// Service for managing spreadsheet documents
#[derive(Clone)]
pub struct DocumentsService {
    repo: Repository,
    blob_store: BlobStore,
    workers: WorkerPool,
    /// Uploads written to the blob store whose document row is not committed
    /// yet, by hash, with the number of writers holding each one.
    pending_sources: Arc<Mutex<HashMap<String, usize>>>,
}

impl DocumentsService {
    pub fn new(repo: Repository, blob_store: BlobStore, workers: WorkerPool) -> Self {
        Self {
            repo,
            blob_store,
            workers,
            pending_sources: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Parse and store a new document owned by `principal`.
    pub async fn ingest(&self, principal: &Principal, upload: DocumentUpload) -> Result<Document> {
        tracing::info!(
            "Ingesting {} for user {} ({} bytes)",
            upload.filename,
            principal.user_id,
            upload.bytes.len()
        );

        let title = validate_upload(&upload)?;
        let bytes = Arc::new(upload.bytes);
        let content = self.parse(bytes.clone()).await?;

        let source_hash = calculate_hash(&bytes);
        self.hold_source(&source_hash).await;

        let metadata = DocumentMetadata {
            title,
            body: upload.body,
            original_filename: Some(upload.filename),
            source_hash: Some(source_hash.clone()),
            source_size: bytes.len() as i64,
        };

        let stored = async {
            self.blob_store.write(&bytes).await?;
            self.repo
                .create_document(principal.user_id, &metadata, &content)
                .await
        }
        .await;
        self.release_source(&source_hash, true).await;

        let document = stored.map_err(|e| {
            tracing::error!("Failed to store document: {}", e);
            e
        })?;

        tracing::info!(
            "Document {} ingested: {} cells, {} merges, {} images",
            document.id,
            content.sheet.cells.len(),
            content.sheet.merges.len(),
            content.images.len()
        );

        Ok(document)
    }

    /// Replace a document's metadata and entire content.
    pub async fn replace(
        &self,
        principal: &Principal,
        id: i64,
        upload: DocumentUpload,
    ) -> Result<Document> {
        tracing::info!("Replacing document {} for user {}", id, principal.user_id);

        let existing = self.repo.get_document(id).await?;
        principal.authorize_change(&existing)?;

        let title = validate_upload(&upload)?;
        let bytes = Arc::new(upload.bytes);
        let content = self.parse(bytes.clone()).await?;

        let source_hash = calculate_hash(&bytes);
        self.hold_source(&source_hash).await;

        let metadata = DocumentMetadata {
            title,
            body: upload.body,
            original_filename: Some(upload.filename),
            source_hash: Some(source_hash.clone()),
            source_size: bytes.len() as i64,
        };

        let stored = async {
            self.blob_store.write(&bytes).await?;
            self.repo.replace_document(id, &metadata, &content).await
        }
        .await;
        self.release_source(&source_hash, true).await;

        let document = stored.map_err(|e| {
            tracing::error!("Failed to replace document {}: {}", id, e);
            e
        })?;

        if let Some(previous) = existing.source_hash.filter(|hash| *hash != source_hash) {
            self.release_source(&previous, false).await;
        }

        tracing::info!(
            "Document {} replaced: {} cells",
            id,
            content.sheet.cells.len()
        );

        Ok(document)
    }

    /// Rebuild a document as workbook bytes, with the filename to offer it under.
    pub async fn compose(&self, id: i64) -> Result<(Vec<u8>, String)> {
        let document = self.repo.get_document(id).await?;
        let sheet = self.load_sheet(id).await?;

        let bytes = self.workers.run(move || xlsx::compose(&sheet)).await??;
        let filename = xlsx::export_filename(
            document.original_filename.as_deref(),
            &document.title,
            Utc::now().naive_utc(),
        );

        tracing::debug!("Composed document {} as {}", id, filename);
        Ok((bytes, filename))
    }

    /// Document metadata with all of its collections.
    pub async fn read_detail(&self, id: i64) -> Result<DocumentDetail> {
        let document = self.repo.get_document(id).await?;

        let (cells, merges, columns, rows, images) = tokio::try_join!(
            self.repo.list_cells(id),
            self.repo.list_merges(id),
            self.repo.list_column_dimensions(id),
            self.repo.list_row_dimensions(id),
            self.repo.list_images(id),
        )?;

        Ok(DocumentDetail {
            document,
            cells,
            merges: merges.iter().map(MergeResponse::from).collect(),
            column_dimensions: columns
                .into_iter()
                .map(|(col, width)| (col.to_string(), width))
                .collect(),
            row_dimensions: rows
                .into_iter()
                .map(|(row, height)| (row.to_string(), height))
                .collect(),
            images,
            exists: true,
        })
    }

    /// One page of documents, newest first, with the total count.
    pub async fn read_list(&self, skip: Option<i64>, limit: Option<i64>) -> Result<DocumentList> {
        let skip = skip.unwrap_or(0).max(0);
        let limit = limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);

        let (posts, total) = tokio::try_join!(
            self.repo.list_documents(skip, limit),
            self.repo.count_documents(),
        )?;

        Ok(DocumentList { posts, total })
    }

    /// Delete a document with all of its collections.
    pub async fn delete(&self, principal: &Principal, id: i64) -> Result<()> {
        tracing::info!("Deleting document {} for user {}", id, principal.user_id);

        let existing = self.repo.get_document(id).await?;
        principal.authorize_change(&existing)?;

        let deleted = self.repo.delete_document(id).await?;
        if let Some(hash) = deleted.source_hash {
            self.release_source(&hash, false).await;
        }

        tracing::info!("Document {} deleted", id);
        Ok(())
    }

    /// The workbook exactly as it was uploaded.
    pub async fn read_source(&self, id: i64) -> Result<(Vec<u8>, String)> {
        let document = self.repo.get_document(id).await?;
        let hash = document.source_hash.as_deref().ok_or_else(|| {
            AppError::BlobStore(format!("document {} has no stored upload", id))
        })?;

        let bytes = self.blob_store.read(hash).await?;
        let filename = xlsx::export_filename(
            document.original_filename.as_deref(),
            &document.title,
            document.created_at.naive_utc(),
        );

        Ok((bytes, filename))
    }

    /// Decompose the sheet and extract images on the worker pool concurrently.
    async fn parse(&self, bytes: Arc<Vec<u8>>) -> Result<DocumentContent> {
        let sheet_bytes = bytes.clone();
        let decompose_job = self
            .workers
            .run(move || xlsx::decompose_bytes(&sheet_bytes));
        let image_job = self.workers.run(move || xlsx::extract_images(&bytes));

        let (sheet, images) = tokio::try_join!(
            async { decompose_job.await?.map_err(as_parse_error) },
            image_job
        )?;

        Ok(DocumentContent { sheet, images })
    }

    async fn load_sheet(&self, id: i64) -> Result<DecomposedSheet> {
        let (cells, merges, column_dimensions, row_dimensions) = tokio::try_join!(
            self.repo.list_cells(id),
            self.repo.list_merges(id),
            self.repo.list_column_dimensions(id),
            self.repo.list_row_dimensions(id),
        )?;

        Ok(DecomposedSheet {
            cells,
            merges,
            column_dimensions,
            row_dimensions,
        })
    }

    /// Keep an upload from being released until its document is committed.
    async fn hold_source(&self, hash: &str) {
        *self
            .pending_sources
            .lock()
            .await
            .entry(hash.to_string())
            .or_default() += 1;
    }

    /// Remove a stored upload once no document refers to it and no write of
    /// the same bytes is in flight. `held` drops a hold taken by `hold_source`.
    ///
    /// The pending map stays locked through the reference count and delete,
    /// so a concurrent writer either holds the hash first or writes it after.
    async fn release_source(&self, hash: &str, held: bool) {
        let mut pending = self.pending_sources.lock().await;

        if held {
            if let Some(holders) = pending.get_mut(hash) {
                *holders -= 1;
                if *holders == 0 {
                    pending.remove(hash);
                }
            }
        }
        if pending.contains_key(hash) {
            tracing::debug!("Keeping stored upload {}; a write is in flight", hash);
            return;
        }

        let result = async {
            if self.repo.count_source_references(hash).await? == 0 {
                self.blob_store.delete(hash).await?;
            }
            Ok::<_, AppError>(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!("Failed to release stored upload {}: {}", hash, e);
        }
    }
}

/// Archive and XML failures while reading an upload are parse failures.
fn as_parse_error(e: AppError) -> AppError {
    match e {
        AppError::Zip(e) => AppError::Parse(e.to_string()),
        AppError::Xml(e) => AppError::Parse(e.to_string()),
        AppError::Io(e) => AppError::Parse(e.to_string()),
        other => other,
    }
}

/// Check an upload's filename and title, returning the trimmed title.
fn validate_upload(upload: &DocumentUpload) -> Result<String> {
    let extension = upload
        .filename
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase());

    if !extension
        .as_deref()
        .is_some_and(|extension| ACCEPTED_EXTENSIONS.contains(&extension))
    {
        return Err(AppError::validation(
            "file",
            format!("only {} workbooks are accepted", ACCEPTED_EXTENSIONS.join(", ")),
        ));
    }

    if upload.bytes.is_empty() {
        return Err(AppError::validation("file", "upload is empty"));
    }

    let title = upload.title.trim();
    if title.is_empty() {
        return Err(AppError::validation("title", "must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(AppError::validation(
            "title",
            format!("must be at most {} characters", MAX_TITLE_LENGTH),
        ));
    }

    Ok(title.to_string())
}
