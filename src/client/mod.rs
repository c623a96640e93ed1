// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Client side of the sync protocol as a deterministic state machine.
//!
//! [`SyncClient`] performs no I/O and reads no clock. The embedding application feeds it socket
//! events, inbound frames, local graph changes, and the current [`Instant`], and carries out the
//! returned [`ClientEffect`]s. [`SyncClient::next_deadline`] tells the driver when to call
//! [`SyncClient::poll`] next.
//!
//! Outbound writes move through [`Outbound`]: a local change makes the client `LocalOnly`, the
//! debounced send makes it `Sent`, and the server's echo of our own write makes it
//! `Acknowledged`. Remote state that arrives while local changes are unacknowledged is reconciled
//! with the same merge the server uses, then resent.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use crate::config::ClientConfig;
use crate::model::{ClientId, Cursor, Graph, PeerPresence, TaskId};
use crate::protocol::{
    encode_graph, parse_server_frame, ClientMessage, PersistAdvisory, ServerMessage, StateUpdate,
    FROM_SERVER,
};
use crate::sync::{now_millis, reconcile};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPeer {
    pub client_id: ClientId,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound {
    /// Local changes exist that the server has not seen.
    LocalOnly,
    /// The latest local graph was sent on top of `base_revision` and awaits its echo.
    Sent { base_revision: u64 },
    Acknowledged,
}

/// Conditions worth surfacing to the user or to logs. None of them stop syncing.
#[derive(Debug, Clone, PartialEq)]
pub enum Anomaly {
    /// The server offered an empty graph while local data exists; local data was kept.
    EmptyRemoteGraph { local_tasks: usize, revision: u64 },
    /// The server reported that its last snapshot write failed.
    PersistError(PersistAdvisory),
    /// The server answered a frame with `error`.
    ServerError(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEffect {
    /// Open a new socket to `/ws/{key}` with this client's identity.
    Connect,
    /// Close the current socket.
    CloseSocket,
    Send(ClientMessage),
    /// Deliver through `POST /api/maps/{key}/state`, for teardown when no socket is usable.
    SaveOverHttp(StateUpdate),
    /// Replace the application's graph.
    ApplyGraph(Graph),
    Anomaly(Anomaly),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientStatus {
    pub connected: bool,
    pub reconnecting: bool,
    pub offline_since: Option<Instant>,
    pub revision: u64,
    pub peers: Vec<PeerPresence>,
    /// Last persistence advisory from the server; drives a "changes may not be saved" hint.
    pub persist_advisory: Option<PersistAdvisory>,
}

pub struct SyncClient {
    config: ClientConfig,
    me: LocalPeer,
    epoch: Instant,
    epoch_millis: u64,

    connection: ConnectionState,
    attempt: u32,
    reconnect_at: Option<Instant>,
    offline_since: Option<Instant>,
    last_pong_at: Instant,
    next_ping_at: Option<Instant>,

    has_init: bool,
    server_empty_at_init: bool,
    bootstrapped: bool,
    revision: u64,
    peers: BTreeMap<ClientId, PeerPresence>,
    persist_advisory: Option<PersistAdvisory>,

    /// Latest local graph, without UI-only fields.
    local: Graph,
    /// Last graph both sides agree on; local tasks that differ from it are unacknowledged edits.
    acked: Graph,
    baseline_ids: BTreeSet<TaskId>,
    pending_deletions: BTreeSet<TaskId>,
    outbound: Outbound,
    send_due: Option<Instant>,
    /// Graph and deletions of the write awaiting its echo.
    in_flight: Option<(Graph, BTreeSet<TaskId>)>,
}

impl SyncClient {
    pub fn new(config: ClientConfig, me: LocalPeer, local: Graph, now: Instant) -> Self {
        let local = strip_ui_fields(local);
        Self {
            config,
            me,
            epoch: now,
            epoch_millis: now_millis(),
            connection: ConnectionState::Closed,
            attempt: 0,
            reconnect_at: None,
            offline_since: None,
            last_pong_at: now,
            next_ping_at: None,
            has_init: false,
            server_empty_at_init: false,
            bootstrapped: false,
            revision: 0,
            peers: BTreeMap::new(),
            persist_advisory: None,
            baseline_ids: task_ids(&local),
            acked: local.clone(),
            local,
            pending_deletions: BTreeSet::new(),
            outbound: Outbound::Acknowledged,
            send_due: None,
            in_flight: None,
        }
    }

    pub fn me(&self) -> &LocalPeer {
        &self.me
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn outbound(&self) -> Outbound {
        self.outbound
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn local(&self) -> &Graph {
        &self.local
    }

    pub fn pending_deletions(&self) -> &BTreeSet<TaskId> {
        &self.pending_deletions
    }

    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            connected: self.connection == ConnectionState::Open,
            reconnecting: self.connection != ConnectionState::Open && self.offline_since.is_some(),
            offline_since: self.offline_since,
            revision: self.revision,
            peers: self
                .peers
                .values()
                .filter(|peer| peer.client_id != self.me.client_id)
                .cloned()
                .collect(),
            persist_advisory: self.persist_advisory.clone(),
        }
    }

    /// Starts the first connection attempt.
    pub fn start(&mut self, now: Instant) -> Vec<ClientEffect> {
        self.begin_connect(now)
    }

    pub fn on_open(&mut self, now: Instant) {
        self.connection = ConnectionState::Open;
        self.attempt = 0;
        self.reconnect_at = None;
        self.offline_since = None;
        self.last_pong_at = now;
        self.next_ping_at = Some(now + self.config.heartbeat_interval);
    }

    /// Socket closed or failed. Schedules a reconnect with backoff.
    pub fn on_close(&mut self, now: Instant) {
        if self.connection == ConnectionState::Closed {
            return;
        }
        self.connection = ConnectionState::Closed;
        self.has_init = false;
        self.next_ping_at = None;
        self.offline_since.get_or_insert(now);
        if self.in_flight.take().is_some() && matches!(self.outbound, Outbound::Sent { .. }) {
            self.outbound = Outbound::LocalOnly;
        }

        self.attempt = (self.attempt + 1).min(self.config.backoff_attempt_cap);
        let delay = self.config.backoff_delay(self.attempt);
        self.reconnect_at = Some(now + delay);
        tracing::debug!(attempt = self.attempt, ?delay, "scheduling reconnect");
    }

    /// Connectivity restored: reconnect right away instead of waiting out the backoff.
    pub fn on_online(&mut self, now: Instant) -> Vec<ClientEffect> {
        if self.connection != ConnectionState::Closed {
            return Vec::new();
        }
        self.begin_connect(now)
    }

    /// The application became visible again; same as [`Self::on_online`].
    pub fn on_visible(&mut self, now: Instant) -> Vec<ClientEffect> {
        self.on_online(now)
    }

    pub fn on_frame(&mut self, text: &str, now: Instant) -> Vec<ClientEffect> {
        match parse_server_frame(text) {
            Some(message) => self.on_message(message, now),
            None => {
                tracing::debug!("dropping unparseable server frame");
                Vec::new()
            }
        }
    }

    pub fn on_message(&mut self, message: ServerMessage, now: Instant) -> Vec<ClientEffect> {
        match message {
            ServerMessage::Pong { .. } => {
                self.last_pong_at = now;
                Vec::new()
            }
            ServerMessage::Init {
                revision,
                graph,
                peers,
                last_persist_error,
            } => {
                self.peers = peers
                    .into_iter()
                    .map(|peer| (peer.client_id.clone(), peer))
                    .collect();
                let mut effects = self.note_advisory(last_persist_error);
                effects.extend(self.on_init(revision, graph, now));
                effects
            }
            ServerMessage::PeerJoin { peer } | ServerMessage::Presence { peer } => {
                self.peers.insert(peer.client_id.clone(), peer);
                Vec::new()
            }
            ServerMessage::PeerLeave { client_id } => {
                self.peers.remove(&client_id);
                Vec::new()
            }
            ServerMessage::State {
                revision,
                graph,
                from,
            } => self.on_state(revision, graph, &from, now),
            ServerMessage::Error { reason } => vec![ClientEffect::Anomaly(Anomaly::ServerError(reason))],
        }
    }

    /// Result of the initial `GET /api/maps/{key}`.
    pub fn on_loaded(
        &mut self,
        revision: u64,
        graph: Graph,
        last_persist_error: Option<PersistAdvisory>,
        now: Instant,
    ) -> Vec<ClientEffect> {
        let mut effects = self.note_advisory(last_persist_error);
        self.revision = revision;
        if let Some(anomaly) = self.empty_remote_anomaly(&graph, revision) {
            effects.push(anomaly);
            return effects;
        }
        effects.extend(self.adopt_remote(graph, now));
        effects
    }

    /// The application's graph changed.
    pub fn on_local_change(&mut self, graph: Graph, now: Instant) -> Vec<ClientEffect> {
        let graph = strip_ui_fields(graph);
        if graph == self.local {
            return Vec::new();
        }

        let next_ids = task_ids(&graph);
        for removed in self.baseline_ids.difference(&next_ids) {
            self.pending_deletions.insert(removed.clone());
        }
        self.pending_deletions.retain(|task_id| !next_ids.contains(task_id));
        self.baseline_ids = next_ids;

        self.local = graph;
        self.outbound = Outbound::LocalOnly;
        self.send_due = Some(now + self.config.debounce);

        self.maybe_bootstrap().into_iter().collect()
    }

    pub fn presence(
        &self,
        cursor: Option<Cursor>,
        selected_ids: Option<Vec<String>>,
    ) -> Option<ClientEffect> {
        (self.connection == ConnectionState::Open).then(|| {
            ClientEffect::Send(ClientMessage::Presence {
                cursor,
                selected_ids,
            })
        })
    }

    /// Drives timers: reconnect, heartbeat, pong timeout, and the debounced send.
    pub fn poll(&mut self, now: Instant) -> Vec<ClientEffect> {
        let mut effects = Vec::new();
        match self.connection {
            ConnectionState::Closed => {
                if self.reconnect_at.is_some_and(|at| at <= now) {
                    effects.extend(self.begin_connect(now));
                }
            }
            ConnectionState::Connecting => {}
            ConnectionState::Open => {
                if now.duration_since(self.last_pong_at) > self.config.pong_timeout {
                    tracing::warn!("no pong within timeout; closing connection");
                    effects.push(ClientEffect::CloseSocket);
                    self.on_close(now);
                    return effects;
                }
                if self.next_ping_at.is_some_and(|at| at <= now) {
                    effects.push(ClientEffect::Send(ClientMessage::Ping {
                        t: Some(self.wall_millis(now) as f64),
                    }));
                    self.next_ping_at = Some(now + self.config.heartbeat_interval);
                }
                let send_due = self.send_due.is_some_and(|at| at <= now);
                if send_due && self.can_send() && self.outbound == Outbound::LocalOnly {
                    effects.push(self.send_local());
                }
            }
        }
        effects
    }

    /// Earliest instant at which [`Self::poll`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut deadlines = Vec::new();
        match self.connection {
            ConnectionState::Closed => deadlines.extend(self.reconnect_at),
            ConnectionState::Connecting => {}
            ConnectionState::Open => {
                deadlines.extend(self.next_ping_at);
                deadlines.push(self.last_pong_at + self.config.pong_timeout + Duration::from_millis(1));
                if self.outbound == Outbound::LocalOnly && self.can_send() {
                    deadlines.extend(self.send_due);
                }
            }
        }
        deadlines.into_iter().min()
    }

    /// Pushes unsent local state immediately, for teardown.
    ///
    /// Uses the socket when it is open and initialized, otherwise falls back to the HTTP save
    /// endpoint. An HTTP save is assumed to land; pending deletions are cleared so they are not
    /// replayed forever.
    pub fn flush(&mut self) -> Vec<ClientEffect> {
        if self.outbound == Outbound::Acknowledged && self.pending_deletions.is_empty() {
            return Vec::new();
        }
        if self.connection == ConnectionState::Open && self.has_init {
            return vec![self.send_local()];
        }

        let update = StateUpdate {
            revision: Some(self.revision),
            graph: encode_graph(&self.local),
            deleted_task_ids: self.pending_deletions.iter().map(|id| id.to_string()).collect(),
            client_id: Some(self.me.client_id.to_string()),
        };
        self.pending_deletions.clear();
        self.in_flight = None;
        self.send_due = None;
        self.outbound = Outbound::Acknowledged;
        self.acked = self.local.clone();
        vec![ClientEffect::SaveOverHttp(update)]
    }

    fn begin_connect(&mut self, now: Instant) -> Vec<ClientEffect> {
        self.connection = ConnectionState::Connecting;
        self.reconnect_at = None;
        self.has_init = false;
        self.last_pong_at = now;
        vec![ClientEffect::Connect]
    }

    fn can_send(&self) -> bool {
        self.connection == ConnectionState::Open && self.has_init && self.in_flight.is_none()
    }

    fn send_local(&mut self) -> ClientEffect {
        let deleted = self.pending_deletions.clone();
        let message = ClientMessage::State(StateUpdate {
            revision: Some(self.revision),
            graph: encode_graph(&self.local),
            deleted_task_ids: deleted.iter().map(|id| id.to_string()).collect(),
            client_id: None,
        });
        self.in_flight = Some((self.local.clone(), deleted));
        self.outbound = Outbound::Sent {
            base_revision: self.revision,
        };
        self.send_due = None;
        ClientEffect::Send(message)
    }

    fn on_init(&mut self, revision: u64, graph: Graph, now: Instant) -> Vec<ClientEffect> {
        self.has_init = true;
        self.revision = revision;
        self.server_empty_at_init = graph.is_empty();

        if let Some(anomaly) = self.empty_remote_anomaly(&graph, revision) {
            let mut effects = vec![anomaly];
            effects.extend(self.maybe_bootstrap());
            return effects;
        }
        self.adopt_remote(graph, now)
    }

    fn on_state(&mut self, revision: u64, graph: Graph, from: &str, now: Instant) -> Vec<ClientEffect> {
        self.revision = revision;

        if from == self.me.client_id.as_str() && self.in_flight.is_some() {
            if let Some((sent, deleted)) = self.in_flight.take() {
                self.pending_deletions.retain(|task_id| !deleted.contains(task_id));
                self.acked = sent;
                if matches!(self.outbound, Outbound::Sent { .. }) {
                    self.outbound = Outbound::Acknowledged;
                }
            }
            return Vec::new();
        }

        if from == FROM_SERVER && self.in_flight.take().is_some() {
            tracing::debug!(revision, "write rejected as stale; rebasing");
            self.outbound = Outbound::LocalOnly;
            return self.rebase_onto(graph, now);
        }

        if let Some(anomaly) = self.empty_remote_anomaly(&graph, revision) {
            return vec![anomaly];
        }
        self.adopt_remote(graph, now)
    }

    /// Takes a remote graph, keeping unacknowledged local edits on top of it.
    fn adopt_remote(&mut self, graph: Graph, now: Instant) -> Vec<ClientEffect> {
        let unacknowledged = self.outbound != Outbound::Acknowledged
            || self.in_flight.is_some()
            || !self.pending_deletions.is_empty();
        if unacknowledged {
            return self.rebase_onto(graph, now);
        }

        self.local = strip_ui_fields(graph.clone());
        self.acked = self.local.clone();
        self.baseline_ids = task_ids(&self.local);
        self.pending_deletions.clear();
        vec![ClientEffect::ApplyGraph(graph)]
    }

    fn rebase_onto(&mut self, remote: Graph, now: Instant) -> Vec<ClientEffect> {
        let mut edits = Graph::default();
        for (task_id, task) in self.local.tasks() {
            if self.acked.tasks().get(task_id) != Some(task) {
                edits.insert_task(task.clone());
            }
        }
        for user in self.local.users().values() {
            edits.insert_user(user.clone());
        }

        let merged = reconcile(&remote, edits, &self.pending_deletions, self.wall_millis(now));
        self.acked = strip_ui_fields(remote);
        self.local = strip_ui_fields(merged.clone());
        self.baseline_ids = task_ids(&self.local);
        if self.local != self.acked || !self.pending_deletions.is_empty() {
            self.outbound = Outbound::LocalOnly;
            self.send_due = Some(now);
        } else if self.in_flight.is_none() {
            self.outbound = Outbound::Acknowledged;
        }
        vec![ClientEffect::ApplyGraph(merged)]
    }

    fn maybe_bootstrap(&mut self) -> Option<ClientEffect> {
        let ready = !self.bootstrapped
            && self.server_empty_at_init
            && self.connection == ConnectionState::Open
            && self.has_init
            && !self.local.is_empty();
        if !ready {
            return None;
        }
        self.bootstrapped = true;
        tracing::info!(tasks = self.local.task_count(), "bootstrapping empty server from local graph");
        Some(self.send_local())
    }

    fn empty_remote_anomaly(&self, graph: &Graph, revision: u64) -> Option<ClientEffect> {
        (graph.is_empty() && !self.local.is_empty()).then(|| {
            ClientEffect::Anomaly(Anomaly::EmptyRemoteGraph {
                local_tasks: self.local.task_count(),
                revision,
            })
        })
    }

    fn note_advisory(&mut self, advisory: Option<PersistAdvisory>) -> Vec<ClientEffect> {
        self.persist_advisory.clone_from(&advisory);
        advisory
            .map(|advisory| ClientEffect::Anomaly(Anomaly::PersistError(advisory)))
            .into_iter()
            .collect()
    }

    fn wall_millis(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.epoch).as_millis();
        self.epoch_millis
            .saturating_add(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }
}

/// Removes UI-only state so it never travels through sync.
pub fn strip_ui_fields(mut graph: Graph) -> Graph {
    for task in graph.tasks_mut().values_mut() {
        task.set_expanded(None);
    }
    graph
}

fn task_ids(graph: &Graph) -> BTreeSet<TaskId> {
    graph.tasks().keys().cloned().collect()
}
