mod config;

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use content_sync_client::{
    ChangePropagationBus, DataAccessLayer, HttpRemoteStore, Sourced, SyncError,
};
use content_sync_core::{ContentDraft, ListFilter, ResourceType, SignalTopic, SyncSignal};
use content_sync_local::{FileFallbackStore, MarkerFileTransport};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{Command, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr, command output to stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    let remote = Arc::new(HttpRemoteStore::new(&config.remote_url).with_timeout(config.timeout()));
    let fallback = Arc::new(FileFallbackStore::new(config.fallback_dir()));
    let transport = Arc::new(MarkerFileTransport::new(config.marker_path()));
    let bus = Arc::new(ChangePropagationBus::new());

    match bus.attach(transport) {
        Ok(_listener) => {}
        Err(e) if matches!(config.command, Command::Watch { .. }) => {
            return Err(anyhow::Error::new(e).context("Failed to listen for change signals"));
        }
        Err(e) => warn!("Change signals will stay local: {}", e),
    }

    let layer = DataAccessLayer::new(remote, fallback, Arc::clone(&bus), config.access_config());
    run(&layer, config.command)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))
}

async fn run(layer: &DataAccessLayer, command: Command) -> Result<(), CliError> {
    match command {
        Command::List {
            resource,
            status,
            limit,
        } => {
            let filter = ListFilter { status, limit };
            let result = layer.read_all(resource, &filter).await?;
            print_sourced(&result)?;
        }
        Command::Get { resource, id } => {
            let result = layer.read_one(resource, &id).await?;
            if result.value.is_none() {
                return Err(CliError::Other(format!("{} {} not found", resource, id)));
            }
            print_sourced(&result)?;
        }
        Command::Create { resource, file } => {
            let draft = read_draft(&file)?;
            let result = layer.create(resource, &draft).await?;
            print_sourced(&result)?;
        }
        Command::Update { resource, id, file } => {
            let draft = read_draft(&file)?;
            let result = layer.update(resource, &id, &draft).await;
            for divergence in layer.divergences() {
                warn!(
                    "{} {} was not changed offline; it is queued for review",
                    divergence.resource, divergence.item_id
                );
            }
            print_sourced(&result?)?;
        }
        Command::Delete { resource, id } => {
            let result = layer.remove(resource, &id).await?;
            if result.is_stale() {
                eprintln!("Deleted {} {} locally; the service was unreachable", resource, id);
            } else {
                info!("Deleted {} {}", resource, id);
            }
        }
        Command::Pending { resource } => {
            let records = layer.provisional_records(resource).await?;
            print_json(&records)?;
        }
        Command::Watch { resources } => watch(layer.bus(), &resources).await?,
    }
    Ok(())
}

async fn watch(bus: &ChangePropagationBus, resources: &[ResourceType]) -> Result<(), CliError> {
    let topics: Vec<SignalTopic> = if resources.is_empty() {
        vec![SignalTopic::All]
    } else {
        resources.iter().copied().map(SignalTopic::from).collect()
    };

    bus.subscribe(topics, |signal: &SyncSignal| match serde_json::to_string(signal) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Failed to render signal: {}", e),
    });

    info!("Watching for changes, press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CliError::Other(format!("Failed to install Ctrl+C handler: {}", e)))?;
    Ok(())
}

fn read_draft(file: &Path) -> Result<ContentDraft, CliError> {
    let text = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| CliError::Other(format!("Failed to read stdin: {}", e)))?;
        buf
    } else {
        std::fs::read_to_string(file)
            .map_err(|e| CliError::Other(format!("Failed to read {}: {}", file.display(), e)))?
    };
    serde_json::from_str(&text).map_err(|e| CliError::Other(format!("Invalid draft: {}", e)))
}

fn print_sourced<T: Serialize>(result: &Sourced<T>) -> Result<(), CliError> {
    if result.is_stale() {
        eprintln!("(served from the local copy; the service was unreachable)");
    }
    print_json(&result.value)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::Other(format!("Failed to render output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

/// Failures of a CLI command.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("{0}")]
    Other(String),
}

impl CliError {
    fn user_message(&self) -> String {
        match self {
            CliError::Sync(e) => e.user_message(),
            CliError::Other(message) => message.clone(),
        }
    }
}
