// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Taskmap-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Taskmap and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! HTTP and WebSocket surface.
//!
//! Routes:
//! - `GET /healthz`
//! - `GET /api/maps/{key}`: current revision, graph, and persistence advisory
//! - `POST /api/maps/{key}/state`: request/response fallback for state writes
//! - `GET /ws/{key}?clientId&name&color`: realtime connection

use std::future::Future;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::model::MapKey;
use crate::protocol::ProtocolError;
use crate::session::SessionRegistry;

mod http;
mod ws;

pub use ws::{ConnectParams, Identity, DEFAULT_COLOR, DEFAULT_NAME};

#[derive(Clone)]
pub struct AppState {
    registry: SessionRegistry,
}

impl AppState {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("malformed request body: {0}")]
    MalformedBody(String),
}

impl ServerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Protocol(err) => err.code(),
            Self::MalformedBody(_) => "malformed_body",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        tracing::debug!(error = %self, "rejecting request");
        let body = Json(json!({ "ok": false, "error": self.code() }));
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}

pub(crate) fn parse_map_key(raw: String) -> Result<MapKey, ServerError> {
    MapKey::new(raw).map_err(|err| ServerError::Protocol(ProtocolError::InvalidMapKey(err)))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(http::healthz))
        .route("/api/maps/{key}", get(http::get_map))
        .route("/api/maps/{key}/state", post(http::post_state))
        .route("/ws/{key}", get(ws::connect))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until `shutdown` resolves, then flushes pending snapshots.
pub async fn serve(
    listener: TcpListener,
    registry: SessionRegistry,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(AppState::new(registry.clone()));
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "listening");
    }
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    registry.flush_all().await;
    tracing::info!("server shut down");
    Ok(())
}
