use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use content_sync_core::{ContentDraft, ContentRecord, ListFilter, RecordList, ResourceType};
use dashmap::DashMap;
use tracing::debug;

use crate::error::{ApiError, Result};

/// Authoritative in-memory content store.
///
/// Ids are assigned from one counter shared by all resource types, so they
/// never collide with the `local-` ids of provisional records.
#[derive(Debug)]
pub struct ContentRepository {
    lists: DashMap<ResourceType, RecordList>,
    next_id: AtomicU64,
}

impl ContentRepository {
    pub fn new() -> Self {
        Self {
            lists: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn list(&self, resource: ResourceType, filter: &ListFilter) -> Vec<ContentRecord> {
        self.lists
            .get(&resource)
            .map(|list| filter.apply(list.records.clone()))
            .unwrap_or_default()
    }

    pub fn get(&self, resource: ResourceType, id: &str) -> Result<ContentRecord> {
        self.lists
            .get(&resource)
            .and_then(|list| list.value().get(id).cloned())
            .ok_or_else(|| not_found(resource, id))
    }

    pub fn create(&self, resource: ResourceType, draft: ContentDraft) -> Result<ContentRecord> {
        check_draft(resource, &draft)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let record = ContentRecord::from_draft(id, draft, Utc::now());
        self.lists
            .entry(resource)
            .or_default()
            .upsert(record.clone());

        debug!("Created {} {}", resource, record.id);
        Ok(record)
    }

    pub fn update(
        &self,
        resource: ResourceType,
        id: &str,
        draft: ContentDraft,
    ) -> Result<ContentRecord> {
        check_draft(resource, &draft)?;

        let mut list = self
            .lists
            .get_mut(&resource)
            .ok_or_else(|| not_found(resource, id))?;
        let record = list
            .value_mut()
            .get_mut(id)
            .ok_or_else(|| not_found(resource, id))?;
        record.apply(draft, Utc::now());

        debug!("Updated {} {}", resource, id);
        Ok(record.clone())
    }

    pub fn delete(&self, resource: ResourceType, id: &str) -> Result<()> {
        let removed = self
            .lists
            .get_mut(&resource)
            .and_then(|mut list| list.value_mut().remove(id));
        match removed {
            Some(_) => {
                debug!("Deleted {} {}", resource, id);
                Ok(())
            }
            None => Err(not_found(resource, id)),
        }
    }
}

impl Default for ContentRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(resource: ResourceType, id: &str) -> ApiError {
    ApiError::NotFound {
        resource,
        id: id.to_string(),
    }
}

fn check_draft(resource: ResourceType, draft: &ContentDraft) -> Result<()> {
    let found = draft.resource_type();
    if found != resource {
        return Err(ApiError::TypeMismatch {
            expected: resource,
            found,
        });
    }
    draft.payload.validate()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use content_sync_core::{ContentPayload, ContentStatus, EventFields};

    fn event(title: &str, status: ContentStatus) -> ContentDraft {
        ContentDraft::new(
            status,
            ContentPayload::Event(EventFields {
                title: title.to_string(),
                description: None,
                starts_at: Utc::now(),
                ends_at: None,
                location: Some("Main hall".to_string()),
                registration_url: None,
            }),
        )
    }

    #[test]
    fn test_ids_are_sequential_across_resources() {
        let repo = ContentRepository::new();
        let a = repo.create(ResourceType::Event, event("A", ContentStatus::Draft)).unwrap();
        let b = repo.create(ResourceType::Event, event("B", ContentStatus::Draft)).unwrap();
        assert_eq!(a.id, "1");
        assert_eq!(b.id, "2");
        assert!(!a.is_provisional());
    }

    #[test]
    fn test_list_keeps_insertion_order_and_filters() {
        let repo = ContentRepository::new();
        repo.create(ResourceType::Event, event("A", ContentStatus::Published)).unwrap();
        repo.create(ResourceType::Event, event("B", ContentStatus::Draft)).unwrap();
        repo.create(ResourceType::Event, event("C", ContentStatus::Published)).unwrap();

        let titles: Vec<String> = repo
            .list(ResourceType::Event, &ListFilter::published())
            .into_iter()
            .map(|r| r.payload.title().to_string())
            .collect();
        assert_eq!(titles, vec!["A", "C"]);
        assert!(repo.list(ResourceType::Article, &ListFilter::default()).is_empty());
    }

    #[test]
    fn test_update_and_delete_missing() {
        let repo = ContentRepository::new();
        assert!(matches!(
            repo.update(ResourceType::Event, "7", event("X", ContentStatus::Draft)),
            Err(ApiError::NotFound { .. })
        ));
        assert!(matches!(
            repo.delete(ResourceType::Event, "7"),
            Err(ApiError::NotFound { .. })
        ));
    }

    #[test]
    fn test_rejects_wrong_payload_type() {
        let repo = ContentRepository::new();
        let err = repo
            .create(ResourceType::Article, event("X", ContentStatus::Draft))
            .unwrap_err();
        assert!(matches!(err, ApiError::TypeMismatch { .. }));
        assert!(repo.list(ResourceType::Article, &ListFilter::default()).is_empty());
    }
}
