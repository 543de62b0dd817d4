use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use content_sync_core::{ContentRecord, FallbackStore, ResourceType, StoreError};
use dashmap::DashMap;

/// In-memory fallback store.
///
/// Counts writes and can be switched unavailable, which lets callers verify
/// that a code path did or did not touch the fallback store.
#[derive(Debug, Default)]
pub struct MemoryFallbackStore {
    lists: DashMap<ResourceType, Vec<ContentRecord>>,
    saves: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryFallbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail with an I/O error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Io("fallback store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl FallbackStore for MemoryFallbackStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, resource: ResourceType) -> Result<Vec<ContentRecord>, StoreError> {
        self.check_available()?;
        Ok(self
            .lists
            .get(&resource)
            .map(|list| list.clone())
            .unwrap_or_default())
    }

    async fn save(
        &self,
        resource: ResourceType,
        records: &[ContentRecord],
    ) -> Result<(), StoreError> {
        self.check_available()?;
        self.lists.insert(resource, records.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
