use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::record::{ContentRecord, ResourceType};

/// Kind of change a signal describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

/// Which store accepted the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOrigin {
    Remote,
    Fallback,
}

/// Notification that a record changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSignal {
    pub resource_type: ResourceType,
    pub action: SyncAction,
    pub item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ContentRecord>,
    pub timestamp: DateTime<Utc>,
    pub origin: SignalOrigin,
}

impl SyncSignal {
    pub fn new(
        resource_type: ResourceType,
        action: SyncAction,
        item_id: impl Into<String>,
        origin: SignalOrigin,
    ) -> Self {
        Self {
            resource_type,
            action,
            item_id: item_id.into(),
            payload: None,
            timestamp: Utc::now(),
            origin,
        }
    }

    pub fn with_payload(mut self, record: ContentRecord) -> Self {
        self.payload = Some(record);
        self
    }
}

/// Subscription selector: one resource type or the `all` wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalTopic {
    All,
    Resource(ResourceType),
}

impl SignalTopic {
    pub fn matches(&self, resource: ResourceType) -> bool {
        match self {
            SignalTopic::All => true,
            SignalTopic::Resource(r) => *r == resource,
        }
    }
}

impl From<ResourceType> for SignalTopic {
    fn from(resource: ResourceType) -> Self {
        SignalTopic::Resource(resource)
    }
}

/// A signal as it travels between execution contexts.
///
/// `context_id` identifies the publisher so it can ignore its own echo.
/// `nonce` makes two publications of an identical signal distinct values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    pub context_id: String,
    pub nonce: String,
    pub signal: SyncSignal,
}

impl SignalEnvelope {
    pub fn new(context_id: impl Into<String>, signal: SyncSignal) -> Self {
        Self {
            context_id: context_id.into(),
            nonce: uuid::Uuid::new_v4().to_string(),
            signal,
        }
    }
}

/// Carrier of signals between execution contexts.
///
/// Implementations differ in mechanism:
/// - In-memory broadcast for contexts sharing one process
/// - A shared marker file observed through filesystem notifications
///
/// Delivery is best effort: unordered, possibly coalesced, possibly missed.
#[async_trait]
pub trait SignalTransport: Send + Sync {
    /// Returns the transport identifier (e.g., "memory", "marker-file").
    fn transport_name(&self) -> &'static str;

    /// Hand an envelope to every other context.
    async fn broadcast(&self, envelope: &SignalEnvelope) -> Result<(), StoreError>;

    /// Start receiving envelopes. Each call yields an independent receiver.
    ///
    /// Receivers may also see envelopes this context broadcast itself.
    fn listen(&self) -> Result<mpsc::Receiver<SignalEnvelope>, StoreError>;
}
