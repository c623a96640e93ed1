// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{ConnectionId, MapSession};
use crate::config::SyncConfig;
use crate::model::MapKey;
use crate::store::SnapshotStore;

pub type SharedSession = Arc<Mutex<MapSession>>;

/// Sessions by document key, created on first access.
///
/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    store: Arc<dyn SnapshotStore>,
    config: SyncConfig,
    sessions: Mutex<HashMap<MapKey, SharedSession>>,
    next_connection_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SnapshotStore>, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                store,
                config,
                sessions: Mutex::new(HashMap::new()),
                next_connection_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> SyncConfig {
        self.inner.config
    }

    pub fn store(&self) -> Arc<dyn SnapshotStore> {
        self.inner.store.clone()
    }

    pub async fn get_or_create(&self, key: &MapKey) -> SharedSession {
        let mut sessions = self.inner.sessions.lock().await;
        if let Some(session) = sessions.get(key) {
            return session.clone();
        }

        tracing::info!(map = %key, "creating session");
        let session = Arc::new(Mutex::new(MapSession::new(
            key.clone(),
            self.inner.store.clone(),
            self.inner.config,
        )));
        sessions.insert(key.clone(), session.clone());
        session
    }

    pub async fn get(&self, key: &MapKey) -> Option<SharedSession> {
        self.inner.sessions.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Drops sessions without connections after flushing their pending snapshots.
    ///
    /// Sessions that a handler still holds are kept, even when idle.
    ///
    /// Returns the number of evicted sessions. An evicted document is reloaded from storage on
    /// next access.
    pub async fn evict_idle(&self) -> usize {
        let mut evicted = Vec::new();
        {
            let mut sessions = self.inner.sessions.lock().await;
            let keys = sessions.keys().cloned().collect::<Vec<_>>();
            for key in keys {
                // A handle outside the map means a handler is about to use the session.
                let idle = match sessions.get(&key) {
                    Some(session) if Arc::strong_count(session) == 1 => {
                        session.lock().await.is_idle()
                    }
                    _ => false,
                };
                if idle {
                    if let Some(session) = sessions.remove(&key) {
                        evicted.push((key, session));
                    }
                }
            }
        }

        for (key, session) in &evicted {
            session.lock().await.flush().await;
            tracing::info!(map = %key, "evicted idle session");
        }
        evicted.len()
    }

    /// Flushes the snapshot writers of all sessions.
    pub async fn flush_all(&self) {
        let sessions = self
            .inner
            .sessions
            .lock()
            .await
            .values()
            .cloned()
            .collect::<Vec<_>>();
        for session in sessions {
            session.lock().await.flush().await;
        }
    }
}
