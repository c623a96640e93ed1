// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Snapshot persistence.
//!
//! The store is an append-only collaborator: sessions write whole `{revision, graph}` records
//! and read back the most recent ones. Nothing is ever updated in place.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::model::{Graph, MapKey};
use crate::protocol::decode_graph;
use crate::sync::sanitize;

pub mod memory;
pub mod snapshot_folder;

pub use memory::MemorySnapshotStore;
pub use snapshot_folder::{SnapshotFolder, WriteDurability};

/// Current on-disk/on-wire version of [`SnapshotRecord`].
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("json error at {path:?}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("refusing to write through symlink at {path:?}")]
    SymlinkRefused { path: PathBuf },
    #[error("snapshot store unavailable: {0}")]
    Unavailable(String),
    #[error("snapshot store task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRecord {
    pub version: u32,
    pub revision: u64,
    pub graph: Graph,
}

impl SnapshotRecord {
    pub fn new(revision: u64, graph: Graph) -> Self {
        Self {
            version: SNAPSHOT_FORMAT_VERSION,
            revision,
            graph,
        }
    }

    /// Decodes a stored record.
    ///
    /// Accepts the current `{version, revision, graph}` shape, legacy `{rev, graph}` records,
    /// and bare graphs (revision 0). The graph comes back sanitized. Returns `None` for anything
    /// without a usable graph.
    pub fn from_value(value: &Value) -> Option<Self> {
        let wrapped = value.get("graph").filter(|graph| graph.is_object());
        let Some(graph_value) = wrapped else {
            let graph = sanitize(decode_graph(value).ok()?);
            return Some(Self {
                version: 0,
                revision: 0,
                graph,
            });
        };

        let revision = value
            .get("revision")
            .or_else(|| value.get("rev"))
            .and_then(stored_revision)
            .unwrap_or(0);
        let version = value
            .get("version")
            .and_then(Value::as_u64)
            .and_then(|version| u32::try_from(version).ok())
            .unwrap_or(0);
        let graph = sanitize(decode_graph(graph_value).ok()?);

        Some(Self {
            version,
            revision,
            graph,
        })
    }
}

/// Older writers stored revisions as JSON floats (`4.0`).
fn stored_revision(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|revision| revision.is_finite() && *revision >= 0.0)
            .map(|revision| revision as u64)
    })
}

#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    /// Appends a new snapshot for `key`.
    async fn create_snapshot(&self, key: &MapKey, record: &SnapshotRecord)
        -> Result<(), StoreError>;

    /// Returns up to `limit` of the most recent snapshots for `key`, newest first.
    async fn find_recent_snapshots(
        &self,
        key: &MapKey,
        limit: usize,
    ) -> Result<Vec<SnapshotRecord>, StoreError>;
}

/// Loads the snapshot a cold session should start from.
///
/// Prefers the newest record that has at least one task, so an accidental empty snapshot at the
/// head does not hide older real data; falls back to the newest record.
pub async fn load_latest_snapshot(
    store: &dyn SnapshotStore,
    key: &MapKey,
    scan_limit: usize,
) -> Result<Option<SnapshotRecord>, StoreError> {
    let mut records = store.find_recent_snapshots(key, scan_limit).await?;
    if let Some(index) = records.iter().position(|record| !record.graph.is_empty()) {
        return Ok(Some(records.swap_remove(index)));
    }
    Ok(records.into_iter().next())
}
