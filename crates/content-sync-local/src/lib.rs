//! Per-device building blocks for content-sync.
//!
//! - `FileFallbackStore`: JSON lists on disk, one file per resource type
//! - `MemoryFallbackStore`: Process-local lists with write accounting
//! - `MarkerFileTransport`: Signals between processes through a shared marker file

mod storage;
mod watch;

pub use storage::{FileFallbackStore, MemoryFallbackStore};
pub use watch::MarkerFileTransport;
