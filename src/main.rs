// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Taskmap server entrypoint.
//!
//! Serves the HTTP API and the realtime WebSocket endpoint. Snapshots go to `--data-dir` when
//! given and stay in memory otherwise.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use taskmap::config::{SyncConfig, DEFAULT_SNAPSHOT_SCAN_LIMIT};
use taskmap::session::SessionRegistry;
use taskmap::store::{MemorySnapshotStore, SnapshotFolder, SnapshotStore, WriteDurability};
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_LOG_FILTER: &str = "taskmap=info,tower_http=info";
const EVICT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "taskmap", version, about = "Realtime collaboration server for task maps")]
struct CliOptions {
    /// Address to bind
    #[arg(long, env = "TASKMAP_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (falls back to `PORT`, then 8080)
    #[arg(long, env = "TASKMAP_PORT")]
    port: Option<u16>,

    /// Directory for snapshot files; omitted keeps snapshots in memory
    #[arg(long, env = "TASKMAP_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Sync snapshot files to disk before acknowledging them (slower)
    #[arg(long)]
    durable_writes: bool,

    /// Minimum time between storage refreshes of a live session
    #[arg(long, default_value_t = 2_000)]
    refresh_interval_ms: u64,

    /// How many recent snapshots to scan when loading a map
    #[arg(long, default_value_t = DEFAULT_SNAPSHOT_SCAN_LIMIT)]
    snapshot_scan_limit: usize,

    /// Tracing filter, e.g. `taskmap=debug`; `RUST_LOG` is used when omitted
    #[arg(long)]
    log: Option<String>,
}

impl CliOptions {
    fn port(&self) -> u16 {
        self.port
            .or_else(|| std::env::var("PORT").ok().and_then(|raw| raw.parse().ok()))
            .unwrap_or(DEFAULT_PORT)
    }

    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            refresh_interval: Duration::from_millis(self.refresh_interval_ms),
            snapshot_scan_limit: self.snapshot_scan_limit,
        }
    }

    fn store(&self) -> Arc<dyn SnapshotStore> {
        match &self.data_dir {
            Some(dir) => {
                let folder = SnapshotFolder::new(dir);
                if self.durable_writes {
                    Arc::new(folder.with_durability(WriteDurability::Durable))
                } else {
                    Arc::new(folder)
                }
            }
            None => Arc::new(
                MemorySnapshotStore::new().with_retention(self.snapshot_scan_limit.saturating_mul(4)),
            ),
        }
    }
}

fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

fn main() {
    let options = CliOptions::parse();
    init_tracing(options.log.as_deref());

    let result = (|| -> Result<(), Box<dyn Error>> {
        match &options.data_dir {
            Some(dir) => tracing::info!(dir = %dir.display(), durable = options.durable_writes, "snapshot folder"),
            None => tracing::warn!("no --data-dir; snapshots are kept in memory only"),
        }
        let registry = SessionRegistry::new(options.store(), options.sync_config());

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        runtime.block_on(async move {
            let listener =
                tokio::net::TcpListener::bind((options.host.as_str(), options.port())).await?;

            let evictor = {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(EVICT_INTERVAL);
                    ticker.tick().await;
                    loop {
                        ticker.tick().await;
                        let evicted = registry.evict_idle().await;
                        if evicted > 0 {
                            tracing::debug!(evicted, "evicted idle sessions");
                        }
                    }
                })
            };

            let served = taskmap::server::serve(listener, registry, shutdown_signal()).await;
            evictor.abort();
            served?;
            Ok::<(), Box<dyn Error>>(())
        })?;

        Ok(())
    })();

    if let Err(err) = result {
        eprintln!("taskmap: {err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::CliOptions;
    use clap::Parser;

    #[test]
    fn parses_defaults() {
        let options = CliOptions::try_parse_from(["taskmap"]).expect("parse options");
        assert_eq!(options.host, "0.0.0.0");
        assert!(options.data_dir.is_none());
        assert!(!options.durable_writes);
        assert_eq!(options.refresh_interval_ms, 2_000);
        assert_eq!(options.snapshot_scan_limit, 25);
        assert_eq!(options.sync_config(), taskmap::config::SyncConfig::default());
    }

    #[test]
    fn parses_data_dir_and_durability() {
        let options = CliOptions::try_parse_from([
            "taskmap",
            "--data-dir",
            "some/dir",
            "--durable-writes",
            "--port",
            "9000",
        ])
        .expect("parse options");
        assert_eq!(options.data_dir.as_deref(), Some(std::path::Path::new("some/dir")));
        assert!(options.durable_writes);
        assert_eq!(options.port(), 9000);
    }

    #[test]
    fn parses_tunables() {
        let options = CliOptions::try_parse_from([
            "taskmap",
            "--refresh-interval-ms",
            "250",
            "--snapshot-scan-limit",
            "5",
            "--log",
            "taskmap=debug",
        ])
        .expect("parse options");
        let config = options.sync_config();
        assert_eq!(config.refresh_interval, std::time::Duration::from_millis(250));
        assert_eq!(config.snapshot_scan_limit, 5);
        assert_eq!(options.log.as_deref(), Some("taskmap=debug"));
    }

    #[test]
    fn rejects_invalid_port() {
        assert!(CliOptions::try_parse_from(["taskmap", "--port", "nope"]).is_err());
    }
}
