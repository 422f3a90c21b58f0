//! HTTP client for the document backend's REST API.
//!
//! All list endpoints are cursor-paginated (`{results, next}`); the client
//! walks pages until the cursor runs out. Every request carries the
//! `Authorization: Token <secret>` header and a 30 s deadline so an
//! unresponsive backend cannot stall a cycle indefinitely.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::backend::types::{
    Correspondent, Document, DocumentMetadata, DocumentType, Page, StoragePath, Tag, User,
};
use crate::backend::DocumentBackend;
use crate::error::BackendError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bearer-token client for one backend instance.
pub struct BackendClient {
    client: reqwest::Client,
    instance_url: String,
    token: SecretString,
}

impl BackendClient {
    /// Build a client for `instance_url` (trailing slash required, enforced
    /// at config validation).
    pub fn new(instance_url: String, token: SecretString) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| BackendError::Request {
                endpoint: instance_url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            instance_url,
            token,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}api/{path}", self.instance_url)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, BackendError> {
        let response = self
            .client
            .get(url)
            .header(
                "Authorization",
                format!("Token {}", self.token.expose_secret()),
            )
            .send()
            .await
            .map_err(|source| BackendError::Request {
                endpoint: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(BackendError::Status {
                endpoint: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, BackendError> {
        self.get(url)
            .await?
            .json()
            .await
            .map_err(|source| BackendError::Decode {
                endpoint: url.to_string(),
                source,
            })
    }

    /// Walk a paginated list endpoint to exhaustion. `query` is appended to
    /// the page parameter (e.g. `&tags__id__all=3`).
    async fn list_all<T: DeserializeOwned>(
        &self,
        resource: &str,
        query: &str,
    ) -> Result<Vec<T>, BackendError> {
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let url = self.api_url(&format!("{resource}/?page={page}{query}"));
            let batch: Page<T> = self.get_json(&url).await?;
            // Decide continuation before the results are moved out.
            let more = batch.has_next();
            items.extend(batch.results);
            if !more {
                break;
            }
            page += 1;
        }
        debug!(resource, count = items.len(), "Fetched backend list");
        Ok(items)
    }

    /// Merge the metadata endpoint's fields into a listed document.
    /// A metadata failure is non-fatal for the cycle; the document keeps
    /// its listing-level fields.
    async fn merge_metadata(&self, document: &mut Document) {
        let url = self.api_url(&format!("documents/{}/metadata/", document.id));
        match self.get_json::<DocumentMetadata>(&url).await {
            Ok(metadata) => {
                if metadata.media_filename.is_some() {
                    document.media_filename = metadata.media_filename;
                }
                if metadata.original_size.is_some() {
                    document.size = metadata.original_size;
                }
            }
            Err(e) => {
                warn!(document_id = document.id, error = %e, "Metadata fetch failed");
            }
        }
    }
}

#[async_trait]
impl DocumentBackend for BackendClient {
    async fn list_tags(&self) -> Result<Vec<Tag>, BackendError> {
        self.list_all("tags", "").await
    }

    async fn list_correspondents(&self) -> Result<Vec<Correspondent>, BackendError> {
        self.list_all("correspondents", "").await
    }

    async fn list_document_types(&self) -> Result<Vec<DocumentType>, BackendError> {
        self.list_all("document_types", "").await
    }

    async fn list_storage_paths(&self) -> Result<Vec<StoragePath>, BackendError> {
        self.list_all("storage_paths", "").await
    }

    async fn list_users(&self) -> Result<Vec<User>, BackendError> {
        self.list_all("users", "").await
    }

    async fn documents_tagged(
        &self,
        with_tag: i64,
        without_tag: i64,
    ) -> Result<Vec<Document>, BackendError> {
        let query = format!("&tags__id__all={with_tag}&tags__id__none={without_tag}");
        let mut documents: Vec<Document> = self.list_all("documents", &query).await?;
        for document in &mut documents {
            self.merge_metadata(document).await;
        }
        Ok(documents)
    }

    async fn download(&self, document_id: i64, original: bool) -> Result<Vec<u8>, BackendError> {
        let suffix = if original { "?original=true" } else { "" };
        let url = self.api_url(&format!("documents/{document_id}/download/{suffix}"));
        let response = self.get(&url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|source| BackendError::Decode {
                endpoint: url,
                source,
            })?;
        Ok(bytes.to_vec())
    }

    async fn add_tag(&self, document_ids: &[i64], tag_id: i64) -> Result<(), BackendError> {
        let url = self.api_url("documents/bulk_edit/");
        let payload = serde_json::json!({
            "documents": document_ids,
            "method": "add_tag",
            "parameters": { "tag": tag_id },
        });

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Token {}", self.token.expose_secret()),
            )
            .json(&payload)
            .send()
            .await
            .map_err(|source| BackendError::Request {
                endpoint: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(BackendError::Status {
                endpoint: url,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}
