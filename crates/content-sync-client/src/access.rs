use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use content_sync_core::{
    ContentDraft, ContentRecord, FallbackStore, ListFilter, RecordList, RemoteError, RemoteStore,
    ResourceType, SignalOrigin, SyncAction, SyncSignal, TransportError, LOCAL_ID_PREFIX,
};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::bus::ChangePropagationBus;
use crate::error::SyncError;

/// Routing switches of a [`DataAccessLayer`].
#[derive(Debug, Clone)]
pub struct AccessConfig {
    /// Try the remote store first. When off, every call routes as if the
    /// remote were unreachable.
    pub remote_enabled: bool,
    /// Serve and accept changes locally when the remote is unreachable.
    pub fallback_enabled: bool,
    /// Publish a signal for every accepted write.
    pub propagate_changes: bool,
    /// Upper bound on each remote call.
    pub request_timeout: Duration,
    /// Copy remote write results into the fallback store.
    pub mirror_remote_writes: bool,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            remote_enabled: true,
            fallback_enabled: true,
            propagate_changes: true,
            request_timeout: Duration::from_millis(5000),
            mirror_remote_writes: true,
        }
    }
}

/// Which store answered a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Remote,
    Fallback,
}

/// A result tagged with the store that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: DataSource,
}

impl<T> Sourced<T> {
    fn remote(value: T) -> Self {
        Self {
            value,
            source: DataSource::Remote,
        }
    }

    fn fallback(value: T) -> Self {
        Self {
            value,
            source: DataSource::Fallback,
        }
    }

    /// Served from the fallback store, possibly behind the remote.
    pub fn is_stale(&self) -> bool {
        self.source == DataSource::Fallback
    }
}

/// An offline change refused because the record exists remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Divergence {
    pub resource: ResourceType,
    pub item_id: String,
    /// Replacement content for an update, `None` for a removal.
    pub attempted: Option<ContentDraft>,
    /// Last state the remote store confirmed this session.
    pub remote: ContentRecord,
    pub detected_at: DateTime<Utc>,
}

/// Single entry point for content reads and writes.
///
/// Calls go to the remote store first. Transport failures (and only those)
/// are served by the fallback store when enabled. Records the remote has
/// confirmed during this session are never edited offline: such attempts
/// land on a review queue instead.
pub struct DataAccessLayer {
    remote: Arc<dyn RemoteStore>,
    fallback: Arc<dyn FallbackStore>,
    bus: Arc<ChangePropagationBus>,
    config: AccessConfig,
    confirmed: DashMap<(ResourceType, String), ContentRecord>,
    divergences: Mutex<Vec<Divergence>>,
}

impl DataAccessLayer {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        fallback: Arc<dyn FallbackStore>,
        bus: Arc<ChangePropagationBus>,
        config: AccessConfig,
    ) -> Self {
        info!(
            "Data access layer: remote={} ({}), fallback={} ({}), propagate={}",
            remote.backend_name(),
            config.remote_enabled,
            fallback.backend_name(),
            config.fallback_enabled,
            config.propagate_changes
        );
        Self {
            remote,
            fallback,
            bus,
            config,
            confirmed: DashMap::new(),
            divergences: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<ChangePropagationBus> {
        &self.bus
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// List a resource. Never writes to either store.
    #[instrument(skip(self), level = "debug")]
    pub async fn read_all(
        &self,
        resource: ResourceType,
        filter: &ListFilter,
    ) -> Result<Sourced<Vec<ContentRecord>>, SyncError> {
        match self.bounded(self.remote.list(resource, filter)).await {
            Ok(records) => {
                for record in &records {
                    self.refresh_confirmed(resource, record);
                }
                Ok(Sourced::remote(records))
            }
            Err(RemoteError::Transport(cause)) if self.config.fallback_enabled => {
                debug!("Listing {} from fallback: {}", resource, cause);
                let records = match self.fallback.load(resource).await {
                    Ok(records) => filter.apply(records),
                    Err(e) => {
                        warn!("Fallback list of {} unavailable: {}", resource, e);
                        Vec::new()
                    }
                };
                Ok(Sourced::fallback(records))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch one record. Never writes to either store.
    #[instrument(skip(self), level = "debug")]
    pub async fn read_one(
        &self,
        resource: ResourceType,
        id: &str,
    ) -> Result<Sourced<Option<ContentRecord>>, SyncError> {
        match self.bounded(self.remote.get(resource, id)).await {
            Ok(record) => {
                self.refresh_confirmed(resource, &record);
                Ok(Sourced::remote(Some(record)))
            }
            Err(RemoteError::Transport(cause)) if self.config.fallback_enabled => {
                debug!("Reading {} {} from fallback: {}", resource, id, cause);
                let record = match self.fallback.load(resource).await {
                    Ok(records) => RecordList::new(records).get(id).cloned(),
                    Err(e) => {
                        warn!("Fallback read of {} {} unavailable: {}", resource, id, e);
                        None
                    }
                };
                Ok(Sourced::fallback(record))
            }
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    #[instrument(skip(self, draft), level = "debug")]
    pub async fn create(
        &self,
        resource: ResourceType,
        draft: &ContentDraft,
    ) -> Result<Sourced<ContentRecord>, SyncError> {
        check_draft(resource, draft)?;

        match self.bounded(self.remote.create(resource, draft)).await {
            Ok(record) => {
                self.mirror_upsert(resource, &record).await;
                self.confirm(resource, &record);
                self.emit(
                    resource,
                    SyncAction::Create,
                    &record.id,
                    Some(&record),
                    SignalOrigin::Remote,
                )
                .await;
                Ok(Sourced::remote(record))
            }
            Err(RemoteError::Transport(cause)) if self.config.fallback_enabled => {
                let id = format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4());
                let record = ContentRecord::from_draft(id, draft.clone(), Utc::now());

                let mut list = RecordList::new(self.fallback.load(resource).await?);
                list.upsert(record.clone());
                self.fallback.save(resource, &list.records).await?;

                info!("Created provisional {} {} ({})", resource, record.id, cause);
                self.emit(
                    resource,
                    SyncAction::Create,
                    &record.id,
                    Some(&record),
                    SignalOrigin::Fallback,
                )
                .await;
                Ok(Sourced::fallback(record))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace a record's content.
    #[instrument(skip(self, draft), level = "debug")]
    pub async fn update(
        &self,
        resource: ResourceType,
        id: &str,
        draft: &ContentDraft,
    ) -> Result<Sourced<ContentRecord>, SyncError> {
        check_draft(resource, draft)?;

        match self.bounded(self.remote.update(resource, id, draft)).await {
            Ok(record) => {
                self.mirror_upsert(resource, &record).await;
                self.confirm(resource, &record);
                self.emit(
                    resource,
                    SyncAction::Update,
                    &record.id,
                    Some(&record),
                    SignalOrigin::Remote,
                )
                .await;
                Ok(Sourced::remote(record))
            }
            Err(RemoteError::Transport(cause)) if self.config.fallback_enabled => {
                if let Some(remote) = self.confirmed_record(resource, id) {
                    self.queue_divergence(resource, id, Some(draft.clone()), remote, &cause);
                    return Err(RemoteError::Transport(cause).into());
                }

                let mut list = RecordList::new(self.fallback.load(resource).await?);
                let record = match list.get_mut(id) {
                    Some(existing) => {
                        existing.apply(draft.clone(), Utc::now());
                        existing.clone()
                    }
                    None => {
                        return Err(SyncError::NotFound {
                            resource,
                            id: id.to_string(),
                        })
                    }
                };
                self.fallback.save(resource, &list.records).await?;

                info!("Updated {} {} in fallback ({})", resource, id, cause);
                self.emit(resource, SyncAction::Update, id, Some(&record), SignalOrigin::Fallback)
                    .await;
                Ok(Sourced::fallback(record))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn remove(&self, resource: ResourceType, id: &str) -> Result<Sourced<()>, SyncError> {
        match self.bounded(self.remote.delete(resource, id)).await {
            Ok(()) => {
                self.mirror_remove(resource, id).await;
                self.confirmed.remove(&(resource, id.to_string()));
                self.emit(resource, SyncAction::Delete, id, None, SignalOrigin::Remote)
                    .await;
                Ok(Sourced::remote(()))
            }
            Err(RemoteError::Transport(cause)) if self.config.fallback_enabled => {
                if let Some(remote) = self.confirmed_record(resource, id) {
                    self.queue_divergence(resource, id, None, remote, &cause);
                    return Err(RemoteError::Transport(cause).into());
                }

                let mut list = RecordList::new(self.fallback.load(resource).await?);
                if list.remove(id).is_none() {
                    return Err(SyncError::NotFound {
                        resource,
                        id: id.to_string(),
                    });
                }
                self.fallback.save(resource, &list.records).await?;

                info!("Removed {} {} from fallback ({})", resource, id, cause);
                self.emit(resource, SyncAction::Delete, id, None, SignalOrigin::Fallback)
                    .await;
                Ok(Sourced::fallback(()))
            }
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Offline changes refused this session, oldest first.
    pub fn divergences(&self) -> Vec<Divergence> {
        self.queue().clone()
    }

    /// Drain the divergence queue.
    pub fn take_divergences(&self) -> Vec<Divergence> {
        std::mem::take(&mut *self.queue())
    }

    /// Records created offline that the remote store has never seen.
    pub async fn provisional_records(
        &self,
        resource: ResourceType,
    ) -> Result<Vec<ContentRecord>, SyncError> {
        let records = self.fallback.load(resource).await?;
        Ok(records.into_iter().filter(|r| r.is_provisional()).collect())
    }

    /// Forget what the remote confirmed and drop queued divergences.
    pub fn reset_session(&self) {
        self.confirmed.clear();
        self.queue().clear();
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn bounded<T, F>(&self, call: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        if !self.config.remote_enabled {
            return Err(TransportError::Disabled.into());
        }
        match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.config.request_timeout).into()),
        }
    }

    /// Record a successful remote mutation of `record`.
    fn confirm(&self, resource: ResourceType, record: &ContentRecord) {
        self.confirmed
            .insert((resource, record.id.clone()), record.clone());
    }

    /// Reads only refresh records this session already changed remotely.
    fn refresh_confirmed(&self, resource: ResourceType, record: &ContentRecord) {
        if let Some(mut entry) = self.confirmed.get_mut(&(resource, record.id.clone())) {
            *entry.value_mut() = record.clone();
        }
    }

    fn confirmed_record(&self, resource: ResourceType, id: &str) -> Option<ContentRecord> {
        self.confirmed
            .get(&(resource, id.to_string()))
            .map(|entry| entry.value().clone())
    }

    fn queue(&self) -> MutexGuard<'_, Vec<Divergence>> {
        self.divergences.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn queue_divergence(
        &self,
        resource: ResourceType,
        id: &str,
        attempted: Option<ContentDraft>,
        remote: ContentRecord,
        cause: &TransportError,
    ) {
        warn!(
            resource = %resource,
            item_id = %id,
            "Consistency warning: {} {} exists in the remote store; \
             offline {} queued for review ({})",
            resource,
            id,
            if attempted.is_some() { "update" } else { "removal" },
            cause
        );
        self.queue().push(Divergence {
            resource,
            item_id: id.to_string(),
            attempted,
            remote,
            detected_at: Utc::now(),
        });
    }

    async fn mirror_upsert(&self, resource: ResourceType, record: &ContentRecord) {
        if !self.config.mirror_remote_writes {
            return;
        }
        let result = match self.fallback.load(resource).await {
            Ok(records) => {
                let mut list = RecordList::new(records);
                list.upsert(record.clone());
                self.fallback.save(resource, &list.records).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Failed to mirror {} {}: {}", resource, record.id, e);
        }
    }

    async fn mirror_remove(&self, resource: ResourceType, id: &str) {
        if !self.config.mirror_remote_writes {
            return;
        }
        let result = match self.fallback.load(resource).await {
            Ok(records) => {
                let mut list = RecordList::new(records);
                if list.remove(id).is_some() {
                    self.fallback.save(resource, &list.records).await
                } else {
                    Ok(())
                }
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Failed to mirror removal of {} {}: {}", resource, id, e);
        }
    }

    async fn emit(
        &self,
        resource: ResourceType,
        action: SyncAction,
        id: &str,
        record: Option<&ContentRecord>,
        origin: SignalOrigin,
    ) {
        if !self.config.propagate_changes {
            return;
        }
        let mut signal = SyncSignal::new(resource, action, id, origin);
        if let Some(record) = record {
            signal = signal.with_payload(record.clone());
        }
        self.bus.publish(signal).await;
    }
}

fn check_draft(resource: ResourceType, draft: &ContentDraft) -> Result<(), SyncError> {
    let found = draft.resource_type();
    if found != resource {
        return Err(SyncError::TypeMismatch {
            expected: resource,
            found,
        });
    }
    draft.payload.validate()?;
    Ok(())
}
