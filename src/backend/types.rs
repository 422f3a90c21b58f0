//! Entity types mirrored from the document backend's REST API.

use serde::Deserialize;

/// One page of a cursor-paginated list endpoint.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    /// URL of the next page, absent or empty on the last page.
    #[serde(default)]
    pub next: Option<String>,
}

impl<T> Page<T> {
    /// Whether another page follows this one.
    pub fn has_next(&self) -> bool {
        self.next.as_deref().is_some_and(|n| !n.is_empty())
    }
}

/// A document snapshot as listed by the backend. Immutable once fetched;
/// `media_filename` and `size` are merged in from the metadata endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub archived_file_name: Option<String>,
    #[serde(default)]
    pub original_file_name: Option<String>,
    /// Tag ids in backend order.
    #[serde(default, rename = "tags")]
    pub tag_ids: Vec<i64>,
    #[serde(default, rename = "created")]
    pub created_at: Option<String>,
    #[serde(default, rename = "modified")]
    pub modified_at: Option<String>,
    #[serde(default, rename = "correspondent")]
    pub correspondent_id: Option<i64>,
    #[serde(default, rename = "document_type")]
    pub document_type_id: Option<i64>,
    #[serde(default, rename = "storage_path")]
    pub storage_path_id: Option<i64>,
    #[serde(default, rename = "owner")]
    pub owner_id: Option<i64>,
    #[serde(default)]
    pub media_filename: Option<String>,
    #[serde(default, rename = "original_size")]
    pub size: Option<i64>,
}

impl Document {
    /// Resolve the attachment filename: the backend's media filename when
    /// custom naming is enabled, otherwise the archived name with the
    /// original name as fallback for unarchived (e.g. encrypted) files.
    pub fn file_name(&self, use_custom_filename: bool) -> String {
        if use_custom_filename {
            if let Some(media) = self.media_filename.as_deref().filter(|m| !m.is_empty()) {
                return media.to_string();
            }
        }
        if let Some(archived) = self.archived_file_name.as_deref().filter(|a| !a.is_empty()) {
            return archived.to_string();
        }
        self.original_file_name.clone().unwrap_or_default()
    }

    /// Web URL of the document's detail view on the backend.
    pub fn details_url(&self, instance_url: &str) -> String {
        format!("{instance_url}documents/{}/details", self.id)
    }
}

/// Fields of the per-document metadata endpoint that the relay consumes.
#[derive(Debug, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub media_filename: Option<String>,
    #[serde(default)]
    pub original_size: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Correspondent {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentType {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoragePath {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}
