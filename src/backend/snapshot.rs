//! Per-cycle lookup indexes over the backend's reference entities.

use std::collections::HashMap;

use crate::backend::types::{Correspondent, DocumentType, StoragePath, Tag, User};
use crate::backend::DocumentBackend;
use crate::error::BackendError;

/// Id-indexed reference entities, built once per processing cycle and
/// treated as an immutable snapshot afterwards. A lookup miss is never
/// fatal; callers surface it as a warning and keep going.
#[derive(Debug, Default)]
pub struct Snapshot {
    tags: HashMap<i64, Tag>,
    correspondents: HashMap<i64, Correspondent>,
    document_types: HashMap<i64, DocumentType>,
    storage_paths: HashMap<i64, StoragePath>,
    users: HashMap<i64, User>,
}

impl Snapshot {
    pub fn new(
        tags: Vec<Tag>,
        correspondents: Vec<Correspondent>,
        document_types: Vec<DocumentType>,
        storage_paths: Vec<StoragePath>,
        users: Vec<User>,
    ) -> Self {
        Self {
            tags: tags.into_iter().map(|t| (t.id, t)).collect(),
            correspondents: correspondents.into_iter().map(|c| (c.id, c)).collect(),
            document_types: document_types.into_iter().map(|d| (d.id, d)).collect(),
            storage_paths: storage_paths.into_iter().map(|s| (s.id, s)).collect(),
            users: users.into_iter().map(|u| (u.id, u)).collect(),
        }
    }

    /// Fetch all reference entities from the backend.
    pub async fn load(backend: &dyn DocumentBackend) -> Result<Self, BackendError> {
        Ok(Self::new(
            backend.list_tags().await?,
            backend.list_correspondents().await?,
            backend.list_document_types().await?,
            backend.list_storage_paths().await?,
            backend.list_users().await?,
        ))
    }

    pub fn tag_by_name(&self, name: &str) -> Option<&Tag> {
        self.tags.values().find(|t| t.name == name)
    }

    /// Resolve tag ids to names, silently skipping unknown ids (the document
    /// listing already scoped the ids to this snapshot's backend).
    pub fn tag_names(&self, ids: &[i64]) -> Vec<&str> {
        ids.iter()
            .filter_map(|id| self.tags.get(id).map(|t| t.name.as_str()))
            .collect()
    }

    pub fn correspondent(&self, id: i64) -> Option<&Correspondent> {
        self.correspondents.get(&id)
    }

    pub fn document_type(&self, id: i64) -> Option<&DocumentType> {
        self.document_types.get(&id)
    }

    pub fn storage_path(&self, id: i64) -> Option<&StoragePath> {
        self.storage_paths.get(&id)
    }

    pub fn user(&self, id: i64) -> Option<&User> {
        self.users.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(id: i64, name: &str) -> Tag {
        Tag {
            id,
            name: name.into(),
        }
    }

    #[test]
    fn indexes_tags_by_id_and_name() {
        let snapshot = Snapshot::new(
            vec![tag(1, "invoice"), tag(2, "outbox")],
            vec![],
            vec![],
            vec![],
            vec![],
        );
        assert_eq!(snapshot.tag_names(&[2]), vec!["outbox"]);
        assert_eq!(snapshot.tag_by_name("invoice").unwrap().id, 1);
        assert!(snapshot.tag_by_name("missing").is_none());
    }

    #[test]
    fn tag_names_skips_unknown_ids() {
        let snapshot = Snapshot::new(vec![tag(1, "invoice")], vec![], vec![], vec![], vec![]);
        assert_eq!(snapshot.tag_names(&[1, 99]), vec!["invoice"]);
    }

    #[test]
    fn lookup_miss_returns_none() {
        let snapshot = Snapshot::default();
        assert!(snapshot.correspondent(7).is_none());
        assert!(snapshot.user(7).is_none());
    }
}
