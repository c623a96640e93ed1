// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{SnapshotRecord, SnapshotStore, StoreError};
use crate::config::DEFAULT_SNAPSHOT_SCAN_LIMIT;
use crate::model::MapKey;

/// Records kept per key unless configured otherwise.
pub const DEFAULT_MEMORY_RETENTION: usize = 4 * DEFAULT_SNAPSHOT_SCAN_LIMIT;

/// In-process snapshot store. Used when no data directory is configured, and by tests.
///
/// Only the newest `retention` records of each key are kept. Writes and reads can be made to
/// fail on demand to exercise persistence-failure paths.
#[derive(Debug)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<MapKey, Vec<SnapshotRecord>>>,
    retention: usize,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    writes: AtomicUsize,
}

impl Default for MemorySnapshotStore {
    fn default() -> Self {
        Self {
            snapshots: Mutex::default(),
            retention: DEFAULT_MEMORY_RETENTION,
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the records kept per key; at least one is always kept.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Seeds a record as if it had been written earlier.
    pub fn insert(&self, key: MapKey, record: SnapshotRecord) {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(|err| err.into_inner());
        let records = snapshots.entry(key).or_default();
        records.push(record);
        if records.len() > self.retention {
            let excess = records.len() - self.retention;
            records.drain(..excess);
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// All records for `key`, oldest first.
    pub fn records(&self, key: &MapKey) -> Vec<SnapshotRecord> {
        let snapshots = self.snapshots.lock().unwrap_or_else(|err| err.into_inner());
        snapshots.get(key).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn create_snapshot(
        &self,
        key: &MapKey,
        record: &SnapshotRecord,
    ) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_owned()));
        }
        self.insert(key.clone(), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find_recent_snapshots(
        &self,
        key: &MapKey,
        limit: usize,
    ) -> Result<Vec<SnapshotRecord>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("reads disabled".to_owned()));
        }
        let snapshots = self.snapshots.lock().unwrap_or_else(|err| err.into_inner());
        Ok(snapshots
            .get(key)
            .map(|records| records.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
