use std::path::{Path, PathBuf};

use async_trait::async_trait;
use content_sync_core::{ContentRecord, FallbackStore, ResourceType, StoreError};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, instrument};

/// On-disk form of one resource list.
#[derive(Debug, Serialize, Deserialize)]
struct StoredList {
    #[serde(default = "default_version")]
    version: u32,
    key: String,
    #[serde(default)]
    records: Vec<ContentRecord>,
}

fn default_version() -> u32 {
    1
}

/// Filesystem fallback store.
///
/// One JSON file per resource type:
/// ```text
/// {base_dir}/
///   article.json
///   event.json
///   recording.json
/// ```
#[derive(Debug, Clone)]
pub struct FileFallbackStore {
    base_dir: PathBuf,
}

impl FileFallbackStore {
    /// Create a new FileFallbackStore with the given base directory.
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// Default per-device location.
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("content-sync")
            .join("fallback")
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn list_path(&self, resource: ResourceType) -> PathBuf {
        self.base_dir.join(format!("{}.json", resource.as_str()))
    }

    async fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.base_dir).await.map_err(|e| {
            StoreError::Io(format!(
                "Failed to create fallback dir {}: {}",
                self.base_dir.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl FallbackStore for FileFallbackStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    #[instrument(skip(self), level = "debug")]
    async fn load(&self, resource: ResourceType) -> Result<Vec<ContentRecord>, StoreError> {
        let path = self.list_path(resource);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Io(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let stored: StoredList = serde_json::from_slice(&data).map_err(|e| {
            StoreError::Serialization(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        debug!("Loaded {} {} records from fallback", stored.records.len(), resource);
        Ok(stored.records)
    }

    #[instrument(skip(self, records), level = "debug", fields(count = records.len()))]
    async fn save(
        &self,
        resource: ResourceType,
        records: &[ContentRecord],
    ) -> Result<(), StoreError> {
        self.ensure_dir().await?;
        let path = self.list_path(resource);

        let stored = StoredList {
            version: default_version(),
            key: resource.store_key(),
            records: records.to_vec(),
        };
        let data = serde_json::to_vec_pretty(&stored)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        // Write atomically via temp file
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &data).await.map_err(|e| {
            StoreError::Io(format!("Failed to write {}: {}", temp_path.display(), e))
        })?;
        fs::rename(&temp_path, &path).await.map_err(|e| {
            StoreError::Io(format!("Failed to rename to {}: {}", path.display(), e))
        })?;

        debug!("Saved {} {} records to fallback", records.len(), resource);
        Ok(())
    }
}
