use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, StoreError};
use crate::record::{ContentDraft, ContentRecord, ListFilter, ResourceType};

/// Body shape of every remote store response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

/// Authoritative content backend.
///
/// Every failure is classified as transport or application at this seam,
/// so callers decide fallback on the variant, never on message text.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Returns the backend identifier (e.g., "http", "memory").
    fn backend_name(&self) -> &'static str;

    async fn list(
        &self,
        resource: ResourceType,
        filter: &ListFilter,
    ) -> Result<Vec<ContentRecord>, RemoteError>;

    async fn get(&self, resource: ResourceType, id: &str) -> Result<ContentRecord, RemoteError>;

    /// Create a record; the store assigns id and timestamps.
    async fn create(
        &self,
        resource: ResourceType,
        draft: &ContentDraft,
    ) -> Result<ContentRecord, RemoteError>;

    async fn update(
        &self,
        resource: ResourceType,
        id: &str,
        draft: &ContentDraft,
    ) -> Result<ContentRecord, RemoteError>;

    async fn delete(&self, resource: ResourceType, id: &str) -> Result<(), RemoteError>;
}

/// Per-device persistent store holding one ordered list per resource type.
#[async_trait]
pub trait FallbackStore: Send + Sync {
    /// Returns the backend identifier (e.g., "file", "memory").
    fn backend_name(&self) -> &'static str;

    /// Load a resource's list. A missing list is empty.
    async fn load(&self, resource: ResourceType) -> Result<Vec<ContentRecord>, StoreError>;

    /// Replace a resource's list.
    async fn save(
        &self,
        resource: ResourceType,
        records: &[ContentRecord],
    ) -> Result<(), StoreError>;
}

/// Ordered list of records with id-based editing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordList {
    pub records: Vec<ContentRecord>,
}

impl RecordList {
    pub fn new(records: Vec<ContentRecord>) -> Self {
        Self { records }
    }

    pub fn get(&self, id: &str) -> Option<&ContentRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ContentRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    /// Replace the record with the same id in place, or append it.
    pub fn upsert(&mut self, record: ContentRecord) {
        if let Some(existing) = self.get_mut(&record.id) {
            *existing = record;
        } else {
            self.records.push(record);
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<ContentRecord> {
        let pos = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ArticleFields, ContentPayload, ContentStatus};

    fn record(id: &str, title: &str) -> ContentRecord {
        let draft = ContentDraft::new(
            ContentStatus::Draft,
            ContentPayload::Article(ArticleFields {
                title: title.to_string(),
                slug: "s".to_string(),
                summary: None,
                body: "b".to_string(),
                author: None,
                tags: vec![],
            }),
        );
        ContentRecord::from_draft(id, draft, chrono::Utc::now())
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut list = RecordList::new(vec![record("1", "a"), record("2", "b")]);
        list.upsert(record("1", "changed"));
        list.upsert(record("3", "c"));

        let ids: Vec<&str> = list.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(list.get("1").unwrap().payload.title(), "changed");
    }

    #[test]
    fn test_remove() {
        let mut list = RecordList::new(vec![record("1", "a")]);
        assert!(list.remove("1").is_some());
        assert!(list.remove("1").is_none());
        assert!(list.get("1").is_none());
    }

    #[test]
    fn test_error_envelope_omits_data() {
        let json = serde_json::to_value(ApiEnvelope::<()>::error("not found")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "not found");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_envelope_without_data_parses() {
        let env: ApiEnvelope<Vec<ContentRecord>> =
            serde_json::from_str(r#"{"success":false,"message":"nope"}"#).unwrap();
        assert!(env.data.is_none());
    }
}
