use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use content_sync_client::AccessConfig;
use content_sync_core::{ContentStatus, ResourceType};

/// Configuration for the content-sync CLI.
#[derive(Parser, Debug, Clone)]
#[command(name = "content-sync")]
#[command(about = "Read and edit site content, falling back to a local copy when offline")]
pub struct Config {
    /// Base URL of the content service
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "CONTENT_SYNC_REMOTE_URL")]
    pub remote_url: String,

    /// Use the content service at all
    #[arg(
        long,
        default_value = "true",
        env = "CONTENT_SYNC_REMOTE_ENABLED",
        action = ArgAction::Set
    )]
    pub remote_enabled: bool,

    /// Serve and accept changes locally when the service is unreachable
    #[arg(
        long,
        default_value = "true",
        env = "CONTENT_SYNC_FALLBACK_ENABLED",
        action = ArgAction::Set
    )]
    pub fallback_enabled: bool,

    /// Notify other contexts of accepted changes
    #[arg(
        long,
        default_value = "true",
        env = "CONTENT_SYNC_PROPAGATE",
        action = ArgAction::Set
    )]
    pub propagate: bool,

    /// Timeout for each service call (milliseconds)
    #[arg(long, default_value = "5000", env = "CONTENT_SYNC_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// Directory for the fallback store and signal marker
    #[arg(long, env = "CONTENT_SYNC_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List records of a resource type
    List {
        resource: ResourceType,
        #[arg(long)]
        status: Option<ContentStatus>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one record
    Get { resource: ResourceType, id: String },
    /// Create a record from a JSON draft file ("-" for stdin)
    Create { resource: ResourceType, file: PathBuf },
    /// Replace a record's content from a JSON draft file ("-" for stdin)
    Update {
        resource: ResourceType,
        id: String,
        file: PathBuf,
    },
    /// Delete a record
    Delete { resource: ResourceType, id: String },
    /// List records created offline and not yet known to the service
    Pending { resource: ResourceType },
    /// Print change signals from other contexts until interrupted
    Watch {
        /// Resource types to follow (all when omitted)
        resources: Vec<ResourceType>,
    },
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("content-sync")
        })
    }

    pub fn fallback_dir(&self) -> PathBuf {
        self.data_dir().join("fallback")
    }

    pub fn marker_path(&self) -> PathBuf {
        self.data_dir().join("sync-signal.json")
    }

    pub fn access_config(&self) -> AccessConfig {
        AccessConfig {
            remote_enabled: self.remote_enabled,
            fallback_enabled: self.fallback_enabled,
            propagate_changes: self.propagate,
            request_timeout: self.timeout(),
            ..AccessConfig::default()
        }
    }
}
