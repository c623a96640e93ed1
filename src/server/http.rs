// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use super::{parse_map_key, AppState, ServerError};
use crate::model::{ClientId, Graph};
use crate::protocol::{decode_graph, PersistAdvisory, StateUpdate};
use crate::session::{IncomingState, Origin};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MapResponse {
    ok: bool,
    revision: u64,
    graph: Graph,
    last_persist_error: Option<PersistAdvisory>,
}

#[derive(Debug, Serialize)]
pub(super) struct SaveResponse {
    ok: bool,
    accepted: bool,
    revision: u64,
}

pub(super) async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

pub(super) async fn get_map(
    State(state): State<AppState>,
    Path(raw_key): Path<String>,
) -> Result<Json<MapResponse>, ServerError> {
    let key = parse_map_key(raw_key)?;
    let session = state.registry().get_or_create(&key).await;
    let view = session.lock().await.view().await;
    Ok(Json(MapResponse {
        ok: true,
        revision: view.revision,
        graph: view.graph,
        last_persist_error: view.last_persist_error,
    }))
}

/// Same pipeline as a `state` frame; the outcome is the response instead of a resync frame.
pub(super) async fn post_state(
    State(state): State<AppState>,
    Path(raw_key): Path<String>,
    body: Result<Json<StateUpdate>, JsonRejection>,
) -> Result<Json<SaveResponse>, ServerError> {
    let key = parse_map_key(raw_key)?;
    let Json(update) = body.map_err(|rejection| ServerError::MalformedBody(rejection.body_text()))?;
    let graph = decode_graph(&update.graph)?;
    let client_id = update
        .client_id
        .as_deref()
        .and_then(|raw| ClientId::new(raw).ok());

    let session = state.registry().get_or_create(&key).await;
    let outcome = session
        .lock()
        .await
        .apply_update(IncomingState {
            revision: update.revision,
            graph,
            deleted: update.deleted_ids(),
            origin: Origin::Http { client_id },
        })
        .await;

    Ok(Json(SaveResponse {
        ok: true,
        accepted: outcome.is_accepted(),
        revision: outcome.revision(),
    }))
}
