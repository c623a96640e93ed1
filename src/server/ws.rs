// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::{parse_map_key, AppState, ServerError};
use crate::model::{ClientId, MapKey};
use crate::protocol::{
    decode_graph, parse_client_frame, ClientMessage, ServerMessage, CLOSE_POLICY_VIOLATION,
    REASON_MISSING_CLIENT_ID,
};
use crate::session::{ConnectionId, IncomingState, Origin, Outbox, SessionRegistry, SharedSession};
use crate::sync::now_millis;

pub const DEFAULT_NAME: &str = "Anonymous";
pub const DEFAULT_COLOR: &str = "#0ea5e9";

const HEADER_CLIENT_ID: &str = "x-client-id";
const HEADER_CLIENT_NAME: &str = "x-client-name";
const HEADER_CLIENT_COLOR: &str = "x-client-color";

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub client_id: Option<String>,
    pub name: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub client_id: ClientId,
    pub name: String,
    pub color: String,
}

impl Identity {
    /// Resolves the handshake identity. Query parameters win over headers; empty values count
    /// as absent. `None` means the client id is missing.
    pub fn resolve(params: &ConnectParams, headers: &HeaderMap) -> Option<Self> {
        let pick = |query: &Option<String>, header: &str| {
            query
                .as_deref()
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
                .or_else(|| {
                    headers
                        .get(header)
                        .and_then(|value| value.to_str().ok())
                        .filter(|value| !value.is_empty())
                        .map(str::to_owned)
                })
        };

        let client_id = ClientId::new(pick(&params.client_id, HEADER_CLIENT_ID)?).ok()?;
        Some(Self {
            client_id,
            name: pick(&params.name, HEADER_CLIENT_NAME).unwrap_or_else(|| DEFAULT_NAME.to_owned()),
            color: pick(&params.color, HEADER_CLIENT_COLOR)
                .unwrap_or_else(|| DEFAULT_COLOR.to_owned()),
        })
    }
}

pub(super) async fn connect(
    State(state): State<AppState>,
    Path(raw_key): Path<String>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let key = parse_map_key(raw_key)?;
    let identity = Identity::resolve(&params, &headers);
    let registry = state.registry().clone();
    Ok(upgrade.on_upgrade(move |socket| run_connection(registry, key, identity, socket)))
}

async fn run_connection(
    registry: SessionRegistry,
    key: MapKey,
    identity: Option<Identity>,
    socket: WebSocket,
) {
    let (mut sink, mut stream) = socket.split();

    let Some(identity) = identity else {
        tracing::warn!(map = %key, "rejecting connection without client id");
        for message in missing_identity_messages() {
            if sink.send(message).await.is_err() {
                break;
            }
        }
        return;
    };

    let (outbox, mut inbox) = mpsc::unbounded_channel::<Arc<ServerMessage>>();
    let connection = Connection::open(&registry, &key, identity, outbox).await;

    let pump = tokio::spawn(async move {
        while let Some(frame) = inbox.recv().await {
            let Some(message) = encode_frame(frame.as_ref()) else {
                continue;
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => connection.handle_frame(text.as_str()).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    connection.close().await;
    let _ = pump.await;
}

/// Frames sent to a handshake without a client id, ending with a policy-violation close.
fn missing_identity_messages() -> Vec<Message> {
    let error = ServerMessage::Error {
        reason: REASON_MISSING_CLIENT_ID.to_owned(),
    };
    encode_frame(&error)
        .into_iter()
        .chain([Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: REASON_MISSING_CLIENT_ID.into(),
        }))])
        .collect()
}

fn encode_frame(frame: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(err) => {
            tracing::warn!(error = %err, "dropping unencodable frame");
            None
        }
    }
}

struct Connection {
    session: SharedSession,
    client_id: ClientId,
    connection_id: ConnectionId,
    outbox: Outbox,
}

impl Connection {
    /// Joins the map's session; the session sends `init` to `outbox`.
    async fn open(registry: &SessionRegistry, key: &MapKey, identity: Identity, outbox: Outbox) -> Self {
        let Identity {
            client_id,
            name,
            color,
        } = identity;
        let session = registry.get_or_create(key).await;
        let connection_id = registry.next_connection_id();
        session
            .lock()
            .await
            .connect(client_id.clone(), name, color, connection_id, outbox.clone())
            .await;
        Self {
            session,
            client_id,
            connection_id,
            outbox,
        }
    }

    /// Leaves the session. The outbox is dropped, which ends the writer pump.
    async fn close(self) {
        self.session
            .lock()
            .await
            .disconnect(&self.client_id, self.connection_id);
    }

    async fn handle_frame(&self, text: &str) {
        let Some(message) = parse_client_frame(text) else {
            tracing::debug!(connection = self.connection_id, "dropping unparseable frame");
            return;
        };

        match message {
            ClientMessage::Ping { t } => {
                let t = t.unwrap_or_else(|| now_millis() as f64);
                self.reply(ServerMessage::Pong { t });
            }
            ClientMessage::Presence {
                cursor,
                selected_ids,
            } => {
                self.session
                    .lock()
                    .await
                    .update_presence(&self.client_id, cursor, selected_ids);
            }
            ClientMessage::State(update) => {
                let graph = match decode_graph(&update.graph) {
                    Ok(graph) => graph,
                    Err(err) => {
                        tracing::warn!(client = %self.client_id, error = %err, "rejecting state frame");
                        self.reply(ServerMessage::Error {
                            reason: err.code().to_owned(),
                        });
                        return;
                    }
                };
                let incoming = IncomingState {
                    revision: update.revision,
                    graph,
                    deleted: update.deleted_ids(),
                    origin: Origin::Connection {
                        client_id: self.client_id.clone(),
                        connection_id: self.connection_id,
                    },
                };
                self.session.lock().await.apply_update(incoming).await;
            }
        }
    }

    fn reply(&self, frame: ServerMessage) {
        let _ = self.outbox.send(Arc::new(frame));
    }
}
