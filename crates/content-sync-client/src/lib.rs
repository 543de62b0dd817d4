//! Client side of content-sync.
//!
//! - `DataAccessLayer`: Remote-first reads and writes with local fallback on transport failure
//! - `HttpRemoteStore`: `RemoteStore` over the content service REST API
//! - `ChangePropagationBus`: Change signals within and across execution contexts
//! - `MemoryTransport`: In-process `SignalTransport`

mod access;
mod bus;
mod error;
mod http;

pub use access::{AccessConfig, DataAccessLayer, DataSource, Divergence, Sourced};
pub use bus::{ChangePropagationBus, MemoryTransport, SignalHandler, SubscriptionId};
pub use error::SyncError;
pub use http::HttpRemoteStore;
