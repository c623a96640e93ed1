// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Per-document collaboration sessions.
//!
//! A [`MapSession`] owns the authoritative graph and revision counter of one document, the
//! presence of connected clients, and the outboxes of their connections. Every mutation runs
//! under the session's lock, so the refresh/gate/merge/persist/broadcast sequence for one message
//! is atomic with respect to other messages handled by this process.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::config::SyncConfig;
use crate::model::{ClientId, Cursor, Graph, MapKey, PeerPresence, TaskId};
use crate::protocol::{PersistAdvisory, ServerMessage, FROM_HTTP, FROM_SERVER};
use crate::store::{load_latest_snapshot, SnapshotRecord, SnapshotStore};
use crate::sync::{now_millis, reconcile, sanitize};

mod registry;
mod writer;

pub use registry::{SessionRegistry, SharedSession};
pub use writer::SnapshotWriter;

pub type ConnectionId = u64;

/// Sending half of a connection's outbound frame queue.
pub type Outbox = mpsc::UnboundedSender<Arc<ServerMessage>>;

/// Where a state write came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Connection {
        client_id: ClientId,
        connection_id: ConnectionId,
    },
    Http {
        client_id: Option<ClientId>,
    },
}

impl Origin {
    /// Value of the `from` field on the resulting `state` broadcast.
    pub fn label(&self) -> String {
        match self {
            Self::Connection { client_id, .. } | Self::Http { client_id: Some(client_id) } => {
                client_id.to_string()
            }
            Self::Http { client_id: None } => FROM_HTTP.to_owned(),
        }
    }

    fn connection(&self) -> Option<(&ClientId, ConnectionId)> {
        match self {
            Self::Connection {
                client_id,
                connection_id,
            } => Some((client_id, *connection_id)),
            Self::Http { .. } => None,
        }
    }
}

/// A validated state write.
#[derive(Debug, Clone)]
pub struct IncomingState {
    /// Revision the writer last saw. `None` is treated as stale.
    pub revision: Option<u64>,
    pub graph: Graph,
    pub deleted: BTreeSet<TaskId>,
    pub origin: Origin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Accepted { revision: u64 },
    /// The write was older than the authoritative revision and was not merged.
    Rejected { revision: u64 },
}

impl UpdateOutcome {
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn revision(self) -> u64 {
        match self {
            Self::Accepted { revision } | Self::Rejected { revision } => revision,
        }
    }
}

/// What a reader of the document gets.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub revision: u64,
    pub graph: Graph,
    pub last_persist_error: Option<PersistAdvisory>,
}

pub struct MapSession {
    key: MapKey,
    config: SyncConfig,
    store: Arc<dyn SnapshotStore>,
    writer: SnapshotWriter,
    revision: u64,
    graph: Graph,
    peers: BTreeMap<ClientId, PeerPresence>,
    connections: BTreeMap<ClientId, BTreeMap<ConnectionId, Outbox>>,
    last_refresh: Option<Instant>,
}

impl MapSession {
    /// Creates an empty session at revision 0. The first refresh loads stored state.
    ///
    /// Must be called from within a tokio runtime; the snapshot writer task is spawned here.
    pub fn new(key: MapKey, store: Arc<dyn SnapshotStore>, config: SyncConfig) -> Self {
        let writer = SnapshotWriter::spawn(key.clone(), store.clone());
        Self {
            key,
            config,
            store,
            writer,
            revision: 0,
            graph: Graph::default(),
            peers: BTreeMap::new(),
            connections: BTreeMap::new(),
            last_refresh: None,
        }
    }

    pub fn key(&self) -> &MapKey {
        &self.key
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerPresence> {
        self.peers.values()
    }

    pub fn peer(&self, client_id: &ClientId) -> Option<&PeerPresence> {
        self.peers.get(client_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.values().map(BTreeMap::len).sum()
    }

    pub fn is_idle(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn last_persist_error(&self) -> Option<PersistAdvisory> {
        self.writer.last_error()
    }

    pub fn writer(&self) -> &SnapshotWriter {
        &self.writer
    }

    /// Waits for all queued snapshot writes.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    /// Catches up with snapshots written by other processes.
    ///
    /// Skipped when the last refresh is more recent than the refresh interval, unless `force` is
    /// set or the session has never been refreshed. A stored record replaces the in-memory graph
    /// when it is newer than the in-memory revision, or when memory is empty and storage is not.
    /// Replacing keeps deletions made by the writer of that record. The revision never
    /// decreases. Store failures are logged and leave the session untouched.
    pub async fn refresh(&mut self, force: bool) {
        let due = force
            || self
                .last_refresh
                .map_or(true, |at| at.elapsed() >= self.config.refresh_interval);
        if !due {
            return;
        }
        self.last_refresh = Some(Instant::now());

        let latest =
            load_latest_snapshot(self.store.as_ref(), &self.key, self.config.snapshot_scan_limit)
                .await;
        let record = match latest {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(map = %self.key, error = %err, "snapshot refresh failed");
                return;
            }
        };

        let newer = record.revision > self.revision;
        let fills_empty = self.graph.is_empty() && !record.graph.is_empty();
        if !newer && !fills_empty {
            return;
        }

        tracing::info!(
            map = %self.key,
            stored_revision = record.revision,
            revision = self.revision,
            tasks = record.graph.task_count(),
            "adopting stored snapshot"
        );
        self.graph = sanitize(record.graph);
        self.revision = self.revision.max(record.revision);
    }

    /// Current state for a reader, refreshed from storage if due.
    pub async fn view(&mut self) -> SessionView {
        self.refresh(false).await;
        SessionView {
            revision: self.revision,
            graph: self.graph.clone(),
            last_persist_error: self.last_persist_error(),
        }
    }

    /// Registers a connection and sends it `init`.
    ///
    /// The first connection of a client creates its presence entry and announces it to the other
    /// clients with `peer:join`; later connections only refresh name and color.
    pub async fn connect(
        &mut self,
        client_id: ClientId,
        name: String,
        color: String,
        connection_id: ConnectionId,
        outbox: Outbox,
    ) {
        self.refresh(false).await;

        let now = now_millis();
        let first_connection = !self.connections.contains_key(&client_id);
        let peer = self
            .peers
            .entry(client_id.clone())
            .and_modify(|peer| {
                peer.name.clone_from(&name);
                peer.color.clone_from(&color);
                peer.updated_at = now;
            })
            .or_insert_with(|| PeerPresence::new(client_id.clone(), name, color, now))
            .clone();

        self.connections
            .entry(client_id.clone())
            .or_default()
            .insert(connection_id, outbox);

        let init = ServerMessage::Init {
            revision: self.revision,
            graph: self.graph.clone(),
            peers: self.peers.values().cloned().collect(),
            last_persist_error: self.last_persist_error(),
        };
        self.send_to(&client_id, connection_id, Arc::new(init));

        tracing::info!(
            map = %self.key,
            client = %client_id,
            connection = connection_id,
            revision = self.revision,
            "connection joined"
        );
        if first_connection {
            self.broadcast_except_client(&client_id, Arc::new(ServerMessage::PeerJoin { peer }));
        }
    }

    /// Removes a connection. Returns `true` when it was the client's last one, in which case the
    /// presence entry is dropped and `peer:leave` is broadcast.
    pub fn disconnect(&mut self, client_id: &ClientId, connection_id: ConnectionId) -> bool {
        let Some(client_connections) = self.connections.get_mut(client_id) else {
            return false;
        };
        client_connections.remove(&connection_id);
        if !client_connections.is_empty() {
            tracing::debug!(map = %self.key, client = %client_id, connection = connection_id, "connection left");
            return false;
        }

        self.connections.remove(client_id);
        self.peers.remove(client_id);
        tracing::info!(map = %self.key, client = %client_id, "peer left");
        self.broadcast(
            Arc::new(ServerMessage::PeerLeave {
                client_id: client_id.clone(),
            }),
            None,
        );
        true
    }

    /// Applies a presence frame and relays it to the other clients.
    pub fn update_presence(
        &mut self,
        client_id: &ClientId,
        cursor: Option<Cursor>,
        selected_ids: Option<Vec<String>>,
    ) {
        let Some(peer) = self.peers.get_mut(client_id) else {
            return;
        };
        peer.apply_update(cursor, selected_ids, now_millis());
        let frame = Arc::new(ServerMessage::Presence { peer: peer.clone() });
        self.broadcast_except_client(client_id, frame);
    }

    /// Runs one state write through the gate and the reconcile pipeline.
    ///
    /// A write older than the current revision is rejected without touching the graph; a
    /// connection origin is sent the authoritative state (`from: "server"`) to resync. An
    /// accepted write bumps the revision past both sides, queues a snapshot, broadcasts the new
    /// state to every other connection, and acks the originating connection with the same frame.
    pub async fn apply_update(&mut self, update: IncomingState) -> UpdateOutcome {
        self.refresh(false).await;

        let IncomingState {
            revision,
            graph,
            deleted,
            origin,
        } = update;

        let Some(incoming_revision) = revision.filter(|incoming| *incoming >= self.revision) else {
            tracing::info!(
                map = %self.key,
                from = %origin.label(),
                incoming = ?revision,
                revision = self.revision,
                "rejecting stale state"
            );
            if let Some((client_id, connection_id)) = origin.connection() {
                let resync = ServerMessage::State {
                    revision: self.revision,
                    graph: self.graph.clone(),
                    from: FROM_SERVER.to_owned(),
                };
                self.send_to(client_id, connection_id, Arc::new(resync));
            }
            return UpdateOutcome::Rejected {
                revision: self.revision,
            };
        };

        self.revision = self.revision.max(incoming_revision).saturating_add(1);
        self.graph = reconcile(&self.graph, graph, &deleted, now_millis());
        self.writer
            .enqueue(SnapshotRecord::new(self.revision, self.graph.clone()));

        tracing::info!(
            map = %self.key,
            from = %origin.label(),
            revision = self.revision,
            tasks = self.graph.task_count(),
            deleted = deleted.len(),
            "accepted state"
        );

        let frame = Arc::new(ServerMessage::State {
            revision: self.revision,
            graph: self.graph.clone(),
            from: origin.label(),
        });
        match origin.connection() {
            Some((client_id, connection_id)) => {
                self.broadcast(frame.clone(), Some(connection_id));
                self.send_to(client_id, connection_id, frame);
            }
            None => self.broadcast(frame, None),
        }

        UpdateOutcome::Accepted {
            revision: self.revision,
        }
    }

    fn send_to(&self, client_id: &ClientId, connection_id: ConnectionId, frame: Arc<ServerMessage>) {
        let outbox = self
            .connections
            .get(client_id)
            .and_then(|client_connections| client_connections.get(&connection_id));
        if let Some(outbox) = outbox {
            if outbox.send(frame).is_err() {
                tracing::debug!(map = %self.key, connection = connection_id, "outbox closed");
            }
        }
    }

    fn broadcast(&self, frame: Arc<ServerMessage>, except: Option<ConnectionId>) {
        for client_connections in self.connections.values() {
            for (connection_id, outbox) in client_connections {
                if Some(*connection_id) == except {
                    continue;
                }
                let _ = outbox.send(frame.clone());
            }
        }
    }

    fn broadcast_except_client(&self, client_id: &ClientId, frame: Arc<ServerMessage>) {
        for (_, client_connections) in self.connections.iter().filter(|(id, _)| *id != client_id) {
            for outbox in client_connections.values() {
                let _ = outbox.send(frame.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests;
