use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use content_sync_core::{SignalEnvelope, SignalTransport, StoreError};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

const LISTENER_CAPACITY: usize = 256;

/// Cross-context transport backed by a shared marker file.
///
/// Every broadcast atomically replaces the marker with the newest envelope,
/// and listeners are woken by filesystem notifications on its directory.
/// The marker only ever holds the latest envelope: two broadcasts landing
/// before a listener re-reads the file are observed as one.
pub struct MarkerFileTransport {
    path: PathBuf,
    /// Keep watchers alive (they stop when dropped)
    watchers: Arc<Mutex<Vec<RecommendedWatcher>>>,
}

impl MarkerFileTransport {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            watchers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Default per-device marker location.
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("content-sync")
            .join("sync-signal.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn marker_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Most recent envelope written to the marker, if any.
    pub async fn latest(&self) -> Result<Option<SignalEnvelope>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => parse_marker(&self.path, &data).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Number of listeners started on this transport.
    pub fn listener_count(&self) -> usize {
        self.watchers.lock().map(|w| w.len()).unwrap_or(0)
    }
}

fn parse_marker(path: &Path, data: &[u8]) -> Result<SignalEnvelope, StoreError> {
    serde_json::from_slice(data).map_err(|e| {
        StoreError::Serialization(format!("Failed to parse {}: {}", path.display(), e))
    })
}

fn read_marker_sync(path: &Path) -> Result<Option<SignalEnvelope>, StoreError> {
    match std::fs::read(path) {
        Ok(data) => parse_marker(path, &data).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Io(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

#[async_trait]
impl SignalTransport for MarkerFileTransport {
    fn transport_name(&self) -> &'static str {
        "marker-file"
    }

    #[instrument(skip(self, envelope), level = "debug", fields(nonce = %envelope.nonce))]
    async fn broadcast(&self, envelope: &SignalEnvelope) -> Result<(), StoreError> {
        let dir = self.marker_dir();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            StoreError::Io(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let data = serde_json::to_vec(envelope)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        // Temp name is unique per envelope so concurrent writers never share it
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sync-signal".to_string());
        let temp_path = dir.join(format!(".{}.{}.tmp", file_name, envelope.nonce));

        tokio::fs::write(&temp_path, &data).await.map_err(|e| {
            StoreError::Io(format!("Failed to write {}: {}", temp_path.display(), e))
        })?;
        tokio::fs::rename(&temp_path, &self.path).await.map_err(|e| {
            StoreError::Io(format!("Failed to rename to {}: {}", self.path.display(), e))
        })?;

        debug!("Wrote signal marker {}", self.path.display());
        Ok(())
    }

    fn listen(&self) -> Result<mpsc::Receiver<SignalEnvelope>, StoreError> {
        let dir = self.marker_dir();
        std::fs::create_dir_all(&dir).map_err(|e| {
            StoreError::Io(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let (tx, rx) = mpsc::channel::<SignalEnvelope>(LISTENER_CAPACITY);
        let marker = self.path.clone();
        let marker_name: Option<OsString> = marker.file_name().map(|n| n.to_os_string());
        let mut last_nonce: Option<String> = None;

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        return;
                    }
                    // Only process events for the marker itself, not temp files
                    if !event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == marker_name.as_deref())
                    {
                        return;
                    }

                    match read_marker_sync(&marker) {
                        Ok(Some(envelope)) => {
                            // One replacement can surface as several events
                            if last_nonce.as_deref() == Some(envelope.nonce.as_str()) {
                                return;
                            }
                            last_nonce = Some(envelope.nonce.clone());
                            if tx.blocking_send(envelope).is_err() {
                                debug!("Signal listener closed");
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Ignoring unreadable signal marker: {}", e),
                    }
                }
                Err(e) => {
                    warn!("Watch error: {}", e);
                }
            },
            Config::default(),
        )
        .map_err(|e| StoreError::Internal(format!("Failed to create watcher: {}", e)))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                StoreError::Internal(format!("Failed to watch {}: {}", dir.display(), e))
            })?;

        self.watchers
            .lock()
            .map_err(|_| StoreError::Internal("watcher registry poisoned".to_string()))?
            .push(watcher);

        info!("Listening for signals on {}", self.path.display());
        Ok(rx)
    }
}
