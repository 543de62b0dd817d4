//! Core traits and types for the content synchronization layer.
//!
//! This crate defines the abstractions shared by the client, the local stores and the server:
//! - `RemoteStore`: Authoritative list/get/create/update/delete per resource type
//! - `FallbackStore`: Per-device ordered lists used while the remote is unreachable
//! - `SignalTransport`: Cross-context delivery of change signals
//! - The transport/application error split that gates the fallback path

mod error;
mod record;
mod signal;
mod store;

pub use error::{
    ApplicationError, ApplicationErrorKind, RemoteError, StoreError, TransportError,
    ValidationError,
};
pub use record::{
    path_has_prefix, ArticleFields, ContentDraft, ContentPayload, ContentRecord, ContentStatus,
    EventFields, ListFilter, RecordingFields, ResourceType, LOCAL_ID_PREFIX,
};
pub use signal::{
    SignalEnvelope, SignalOrigin, SignalTopic, SignalTransport, SyncAction, SyncSignal,
};
pub use store::{ApiEnvelope, FallbackStore, RecordList, RemoteStore};
