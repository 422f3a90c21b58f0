//! Document backend collaborator: entity listing, document search,
//! binary download and the processed-tag write.

pub mod client;
pub mod snapshot;
pub mod types;

pub use client::BackendClient;
pub use snapshot::Snapshot;

use async_trait::async_trait;

use crate::error::BackendError;
use types::{Correspondent, Document, DocumentType, StoragePath, Tag, User};

/// Operations the relay needs from the document backend. Implemented by
/// [`BackendClient`] over HTTP; orchestrator tests substitute an in-memory
/// fake.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    async fn list_tags(&self) -> Result<Vec<Tag>, BackendError>;
    async fn list_correspondents(&self) -> Result<Vec<Correspondent>, BackendError>;
    async fn list_document_types(&self) -> Result<Vec<DocumentType>, BackendError>;
    async fn list_storage_paths(&self) -> Result<Vec<StoragePath>, BackendError>;
    async fn list_users(&self) -> Result<Vec<User>, BackendError>;

    /// List documents carrying all of `with_tag` and none of `without_tag`,
    /// with per-document metadata already merged in.
    async fn documents_tagged(
        &self,
        with_tag: i64,
        without_tag: i64,
    ) -> Result<Vec<Document>, BackendError>;

    /// Download the document binary; `original` requests the pre-processing
    /// rendition instead of the archived one.
    async fn download(&self, document_id: i64, original: bool) -> Result<Vec<u8>, BackendError>;

    /// Bulk-edit write: add `tag_id` to every document in `document_ids`.
    async fn add_tag(&self, document_ids: &[i64], tag_id: i64) -> Result<(), BackendError>;
}
