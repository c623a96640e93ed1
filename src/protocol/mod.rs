// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Wire protocol shared by the server and the client engine.
//!
//! Frames are JSON objects tagged by `type`. Graph payloads inside client frames stay raw
//! [`serde_json::Value`]s until [`decode_graph`] validates them, so a malformed graph can be
//! answered with an `error` frame instead of being silently dropped with the rest of the frame.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::{ClientId, Cursor, Graph, IdError, PeerPresence, TaskId};

mod decode;

pub use decode::{decode_graph, task_id_list};

/// Close code sent when the handshake lacks a client identity.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

pub const REASON_MISSING_CLIENT_ID: &str = "missing_client_id";
pub const REASON_INVALID_GRAPH: &str = "invalid_graph";

/// `from` value of a `state` frame that answers a rejected (stale) write.
pub const FROM_SERVER: &str = "server";
/// `from` value of a `state` frame caused by an HTTP save without a client id.
pub const FROM_HTTP: &str = "http";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid graph: {0}")]
    InvalidGraph(&'static str),
    #[error("invalid map key: {0}")]
    InvalidMapKey(#[source] IdError),
    #[error("missing client id")]
    MissingClientId,
}

impl ProtocolError {
    /// Stable machine-readable code used in error frames and HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidGraph(_) => REASON_INVALID_GRAPH,
            Self::InvalidMapKey(_) => "invalid_map_key",
            Self::MissingClientId => REASON_MISSING_CLIENT_ID,
        }
    }
}

/// A client's proposed full-graph write. Also the body of `POST /api/maps/:key/state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    /// Revision the client last saw. Missing means "unknown" and is always stale.
    #[serde(default, alias = "rev", skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    pub graph: Value,
    #[serde(default)]
    pub deleted_task_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl StateUpdate {
    pub fn deleted_ids(&self) -> BTreeSet<TaskId> {
        self.deleted_task_ids.iter().filter_map(|raw| TaskId::new(raw.as_str()).ok()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "ping")]
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        t: Option<f64>,
    },
    #[serde(rename = "presence")]
    Presence {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cursor: Option<Cursor>,
        #[serde(default, rename = "selectedIds", skip_serializing_if = "Option::is_none")]
        selected_ids: Option<Vec<String>>,
    },
    #[serde(rename = "state")]
    State(StateUpdate),
}

/// Advisory about the last failed snapshot write. Cleared by the next successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistAdvisory {
    pub at: u64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "init")]
    Init {
        #[serde(alias = "rev")]
        revision: u64,
        graph: Graph,
        peers: Vec<PeerPresence>,
        #[serde(default, rename = "lastPersistError", skip_serializing_if = "Option::is_none")]
        last_persist_error: Option<PersistAdvisory>,
    },
    #[serde(rename = "pong")]
    Pong { t: f64 },
    #[serde(rename = "peer:join")]
    PeerJoin { peer: PeerPresence },
    #[serde(rename = "peer:leave")]
    PeerLeave {
        #[serde(rename = "clientId")]
        client_id: ClientId,
    },
    #[serde(rename = "presence")]
    Presence { peer: PeerPresence },
    #[serde(rename = "state")]
    State {
        #[serde(alias = "rev")]
        revision: u64,
        graph: Graph,
        from: String,
    },
    #[serde(rename = "error")]
    Error { reason: String },
}

/// Parses an inbound client frame. Unparseable frames yield `None` and are dropped.
pub fn parse_client_frame(text: &str) -> Option<ClientMessage> {
    serde_json::from_str(text).ok()
}

pub fn parse_server_frame(text: &str) -> Option<ServerMessage> {
    serde_json::from_str(text).ok()
}

/// Converts a graph into the raw payload carried by [`StateUpdate`].
pub fn encode_graph(graph: &Graph) -> Value {
    match serde_json::to_value(graph) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, "graph could not be encoded");
            Value::Null
        }
    }
}
