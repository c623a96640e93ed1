// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::fs;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::Value;

use super::{SnapshotRecord, SnapshotStore, StoreError};
use crate::model::MapKey;
use crate::sync::now_millis;

const SNAPSHOT_SUFFIX: &str = ".snapshot.json";

/// Snapshot store backed by a directory tree.
///
/// Layout: `<root>/<encoded map key>/<created millis>-<revision>.snapshot.json`. Both numbers are
/// zero-padded so lexical file name order is creation order.
#[derive(Debug, Clone)]
pub struct SnapshotFolder {
    root: PathBuf,
    durability: WriteDurability,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum WriteDurability {
    /// Writes a temp file and renames it into place, without fsync.
    #[default]
    BestEffort,

    /// Also syncs the file contents and, on unix, the containing directory.
    Durable,
}

impl SnapshotFolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            durability: WriteDurability::default(),
        }
    }

    pub fn with_durability(mut self, durability: WriteDurability) -> Self {
        self.durability = durability;
        self
    }

    pub fn durability(&self) -> WriteDurability {
        self.durability
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn map_dir(&self, key: &MapKey) -> PathBuf {
        self.root.join(encode_persisted_id_segment(key.as_str()))
    }

    pub fn snapshot_path(&self, key: &MapKey, created_millis: u64, revision: u64) -> PathBuf {
        self.map_dir(key)
            .join(format!("{created_millis:016}-{revision:016}{SNAPSHOT_SUFFIX}"))
    }

    /// Blocking write of one snapshot.
    pub fn write_snapshot(&self, key: &MapKey, record: &SnapshotRecord) -> Result<(), StoreError> {
        let path = self.snapshot_path(key, now_millis(), record.revision);
        let contents = serde_json::to_vec(record).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        write_atomic(&self.root, &path, &contents, self.durability)
    }

    /// Blocking read of up to `limit` snapshots, newest first.
    ///
    /// Files that fail to parse are skipped with a warning; they still count against `limit`.
    pub fn read_recent(&self, key: &MapKey, limit: usize) -> Result<Vec<SnapshotRecord>, StoreError> {
        let dir = self.map_dir(key);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path: dir, source }),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(SNAPSHOT_SUFFIX) && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort_unstable_by(|a, b| b.cmp(a));
        names.truncate(limit);

        let mut records = Vec::with_capacity(names.len());
        for name in names {
            let path = dir.join(&name);
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => return Err(StoreError::Io { path, source }),
            };
            let record = serde_json::from_slice::<Value>(&bytes)
                .ok()
                .and_then(|value| SnapshotRecord::from_value(&value));
            match record {
                Some(record) => records.push(record),
                None => tracing::warn!(path = %path.display(), "skipping unreadable snapshot"),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl SnapshotStore for SnapshotFolder {
    async fn create_snapshot(
        &self,
        key: &MapKey,
        record: &SnapshotRecord,
    ) -> Result<(), StoreError> {
        let folder = self.clone();
        let key = key.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || folder.write_snapshot(&key, &record))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))?
    }

    async fn find_recent_snapshots(
        &self,
        key: &MapKey,
        limit: usize,
    ) -> Result<Vec<SnapshotRecord>, StoreError> {
        let folder = self.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || folder.read_recent(&key, limit))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))?
    }
}

// File name and atomic write helpers for `SnapshotFolder`.
include!("snapshot_folder/helpers.rs");

#[cfg(test)]
mod tests;
