mod cli;

use std::path::{Path, PathBuf};
use std::sync::PoisonError;
use std::thread;

use anyhow::{bail, Context};
use attachment_storage_core::{AttachmentStorage, MappedAttachment, PendingWrite, DEFAULT_STYLE};
use attachment_storage_sftp::{
    BackendConfig, ConnectionManager, Connector, MemoryConnector, MemoryState, SftpStorage,
    SharedConnections, Ssh2Connector,
};
use clap::Parser;
use serde::Deserialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

/// One line of work in a batch manifest.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ManifestEntry {
    Upload { path: String, file: PathBuf },
    Delete { path: String },
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.backend_config()?;

    info!(
        "attachment-sftp: {}@{} (fs_root {})",
        config.connection.user, config.connection.host, config.connection.fs_root
    );

    if cli.dry_run {
        let state = MemoryState::shared();
        state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_dir(&config.connection.fs_root);
        let result = run(&cli.command, &config, MemoryConnector::new(state.clone()));
        let state = state.lock().unwrap_or_else(PoisonError::into_inner);
        for call in &state.calls {
            info!("dry-run: {:?} {}", call.op, call.path);
        }
        return result;
    }

    run(&cli.command, &config, Ssh2Connector)
}

fn run<C>(command: &Command, config: &BackendConfig, connector: C) -> anyhow::Result<()>
where
    C: Connector + Clone + Send,
{
    match command {
        Command::Batch { manifest, workers } => run_batch(manifest, *workers, config, connector),
        other => {
            let connections = ConnectionManager::shared(connector);
            let result = run_single(other, config, &connections);
            let closed = connections.borrow_mut().close_all();
            debug!("Closed {} session(s)", closed);
            result
        }
    }
}

fn storage_for<C: Connector>(
    config: &BackendConfig,
    path: &str,
    connections: &SharedConnections<C>,
) -> SftpStorage<C> {
    SftpStorage::new(
        config.clone(),
        MappedAttachment::single(path),
        connections.clone(),
    )
}

fn run_single<C: Connector>(
    command: &Command,
    config: &BackendConfig,
    connections: &SharedConnections<C>,
) -> anyhow::Result<()> {
    match command {
        Command::Upload { path, file } => {
            if !file.is_file() {
                bail!("{} is not a file", file.display());
            }
            let mut storage = storage_for(config, path, connections);
            storage.queue_write(PendingWrite::new(DEFAULT_STYLE, file.clone()));
            storage.flush_writes()?;
            info!("Uploaded {} as {}", file.display(), path);
        }
        Command::Delete { path } => {
            let mut storage = SftpStorage::new(
                config.clone(),
                MappedAttachment::default(),
                connections.clone(),
            );
            for p in path {
                storage.queue_delete(p.clone());
            }
            storage.flush_deletes()?;
            info!("Processed {} delete(s)", path.len());
        }
        Command::Exists { path } => {
            let storage = storage_for(config, path, connections);
            println!("{}", storage.exists(DEFAULT_STYLE)?);
        }
        Command::Fetch { path, dest } => {
            let storage = storage_for(config, path, connections);
            if !storage.copy_to_local(DEFAULT_STYLE, dest)? {
                bail!("Could not fetch {}", path);
            }
            info!("Fetched {} to {}", path, dest.display());
        }
        Command::Url { path } => {
            let storage = storage_for(config, path, connections);
            println!("{}", storage.public_url(DEFAULT_STYLE));
        }
        Command::Batch { .. } => bail!("batch manifests are run by run_batch"),
    }
    Ok(())
}

fn read_manifest(path: &Path) -> anyhow::Result<Vec<ManifestEntry>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Invalid manifest {}", path.display()))
}

/// Spread the manifest over `workers` threads. Each thread owns its own
/// connection cache and therefore its own sessions.
fn run_batch<C>(
    manifest: &Path,
    workers: usize,
    config: &BackendConfig,
    connector: C,
) -> anyhow::Result<()>
where
    C: Connector + Clone + Send,
{
    let entries = read_manifest(manifest)?;
    let workers = workers.clamp(1, entries.len().max(1));

    let mut lanes: Vec<Vec<&ManifestEntry>> = vec![Vec::new(); workers];
    for (i, entry) in entries.iter().enumerate() {
        lanes[i % workers].push(entry);
    }

    let failed: usize = thread::scope(|s| {
        let handles: Vec<_> = lanes
            .into_iter()
            .enumerate()
            .map(|(worker, lane)| {
                let connector = connector.clone();
                s.spawn(move || run_lane(worker, lane, config, connector))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| {
                    warn!("Batch worker panicked");
                    1
                })
            })
            .sum()
    });

    info!(
        "Batch finished: {} entries, {} failed, {} worker(s)",
        entries.len(),
        failed,
        workers
    );
    if failed > 0 {
        bail!("{} of {} manifest entries failed", failed, entries.len());
    }
    Ok(())
}

/// Apply one worker's share of a manifest, returning the failure count.
fn run_lane<C: Connector>(
    worker: usize,
    lane: Vec<&ManifestEntry>,
    config: &BackendConfig,
    connector: C,
) -> usize {
    let connections = ConnectionManager::shared(connector);
    let total = lane.len();
    let mut failed = 0;

    for entry in lane {
        let result = match entry {
            ManifestEntry::Upload { path, file } => {
                let mut storage = storage_for(config, path, &connections);
                storage.queue_write(PendingWrite::new(DEFAULT_STYLE, file.clone()));
                storage.flush_writes()
            }
            ManifestEntry::Delete { path } => {
                let mut storage = storage_for(config, path, &connections);
                storage.queue_delete(path.clone());
                storage.flush_deletes()
            }
        };
        if let Err(e) = result {
            warn!(worker, "Manifest entry failed: {}", e);
            failed += 1;
        }
    }

    let sessions = connections.borrow_mut().close_all();
    debug!(worker, sessions, "Worker applied {} entries", total);
    failed
}
