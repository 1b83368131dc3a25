//! Application state and initialization
//!
//! This module manages the central application state and lifecycle.
//! All services are initialized here and made available through AppState.

use crate::config::ServerSettings;
use crate::database::{create_pool, Repository};
use crate::error::Result;
use crate::services::{Authenticator, DocumentsService, StaticTokenAuthenticator, WorkerPool};
use crate::storage::BlobStore;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub documents: DocumentsService,
    pub authenticator: Arc<dyn Authenticator>,
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Wire services over an existing pool and blob store.
    pub fn new(
        pool: SqlitePool,
        blob_store: BlobStore,
        workers: WorkerPool,
        authenticator: Arc<dyn Authenticator>,
        max_upload_bytes: usize,
    ) -> Self {
        let repo = Repository::new(pool);
        let documents = DocumentsService::new(repo, blob_store, workers);

        Self {
            documents,
            authenticator,
            max_upload_bytes,
        }
    }
}

/// Application setup - called once on startup
pub async fn setup(settings: &ServerSettings) -> Result<AppState> {
    tracing::info!("Initializing application");
    tracing::info!("Data directory: {:?}", settings.data_dir);

    std::fs::create_dir_all(&settings.data_dir)?;

    let pool = create_pool(&settings.database_path()).await?;

    let blob_store = BlobStore::new(settings.blobs_dir());
    blob_store.initialize().await?;

    let workers = WorkerPool::new(settings.worker_threads)?;

    if settings.tokens.is_empty() {
        tracing::warn!("No tokens configured; every document request will be refused");
    }
    let authenticator = Arc::new(StaticTokenAuthenticator::new(&settings.tokens));

    let state = AppState::new(
        pool,
        blob_store,
        workers,
        authenticator,
        settings.max_upload_bytes,
    );

    tracing::info!("Application initialized successfully");

    Ok(state)
}
