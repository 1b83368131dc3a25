//! Services module
//!
//! Business logic services that coordinate between the HTTP handlers,
//! the repository and the worker pool.

pub mod auth;
pub mod documents;
pub mod worker_pool;

pub use auth::{Authenticator, Principal, StaticTokenAuthenticator};
pub use documents::{DocumentUpload, DocumentsService};
pub use worker_pool::WorkerPool;
