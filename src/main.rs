//! `xapiand` node entry point: load config, start the manager, serve
//! until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpStream;
use tracing::{error, info, warn};

use xapiand::{ManagerConfig, XapiandManager};
use xapiand_core::backend::MemoryBackendFactory;
use xapiand_core::endpoint::{Endpoint, Endpoints};
use xapiand_discovery::{replication, PullRequest};
use xapiand_storage::WalLine;

/// Distributed full-text search and document store node.
#[derive(Parser, Debug)]
#[command(name = "xapiand", version, about)]
struct Cli {
    /// Path to a TOML config file. Missing fields fall back to defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the cluster name from the config file.
    #[arg(long)]
    cluster_name: Option<String>,
}

fn load_config(cli: &Cli) -> anyhow::Result<ManagerConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            ManagerConfig::from_toml_str(&text)?
        }
        None => ManagerConfig::default(),
    };
    if let Some(cluster_name) = &cli.cluster_name {
        config.cluster_name = cluster_name.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    info!(cluster_name = %config.cluster_name, data_path = ?config.data_path, "starting xapiand node");

    let (manager, mut pulls) = XapiandManager::start(config, Arc::new(MemoryBackendFactory)).await?;

    // Pull requests arrive from the gossip loop whenever a peer announces
    // DB_UPDATED for a path this node replicates; servicing them is the
    // connection pool's job, which this binary does not otherwise drive
    // (spec.md §4.G pull replication).
    let pull_manager = manager.clone();
    let pull_watcher = tokio::spawn(async move {
        while let Some(pull) = pulls.recv().await {
            let manager = pull_manager.clone();
            tokio::spawn(async move { service_pull_request(manager, pull).await });
        }
    });

    let discovery_manager = manager.clone();
    let discovery_task = tokio::spawn(async move {
        if let Err(err) = discovery_manager.run_discovery().await {
            error!(?err, "discovery loop exited");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    manager.shutdown(true);
    discovery_task.abort();
    pull_watcher.abort();

    Ok(())
}

/// Service one scheduled `PullRequest` end to end (spec.md §4.G step 3
/// onward): wait out the scatter delay, connect to `pull.source`'s
/// binary port, send `GET_CHANGESETS` from this node's current
/// revision, then replay and journal every returned WAL line through
/// the checked-out handle. A transient failure here just means the next
/// `DB_UPDATED` retries the pull; errors are logged, not propagated.
async fn service_pull_request(manager: Arc<XapiandManager>, pull: PullRequest) {
    tokio::time::sleep(Duration::from_millis(pull.delay_ms)).await;

    let endpoints = Endpoints::single(Endpoint::local(&pull.path));
    let handler = manager.handler_for(endpoints);
    let (uuid, from_revision) = match (handler.uuid(), handler.revision()) {
        (Ok(uuid), Ok(revision)) => (uuid, revision),
        (Err(err), _) | (_, Err(err)) => {
            warn!(?err, path = %pull.path, "pull skipped: could not check out local handle");
            return;
        }
    };

    let addr = format!("{}:{}", pull.source.host, pull.source.binary_port);
    let mut stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(?err, %addr, path = %pull.path, "pull connection failed");
            return;
        }
    };

    let request = replication::GetChangesetsRequest {
        uuid,
        from_revision,
        path: pull.path.clone(),
        requester_mastery: handler.endpoints().write_target().map(|e| e.mastery_level.unwrap_or(0)).unwrap_or(0),
    };
    if let Err(err) = request.write(&mut stream).await {
        warn!(?err, path = %pull.path, "failed to send GET_CHANGESETS");
        return;
    }

    let outcome = match replication::pull_changesets(&mut stream).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(?err, path = %pull.path, "pull replication failed");
            return;
        }
    };

    let mut applied = 0u64;
    for (revision, bytes) in &outcome.changesets {
        let line = match WalLine::decode(bytes) {
            Ok(line) => line,
            Err(err) => {
                warn!(?err, revision, path = %pull.path, "pulled WAL line failed to decode");
                break;
            }
        };
        if let Err(err) = handler.apply_remote_wal_line(*revision, &line) {
            warn!(?err, revision, path = %pull.path, "failed applying pulled WAL line");
            break;
        }
        applied += 1;
    }

    if applied > 0 {
        if let Err(err) = handler.commit() {
            warn!(?err, path = %pull.path, "commit after pull replication failed");
        }
    }

    info!(source = %pull.source.name, path = %pull.path, applied, "pull replication complete");
}
