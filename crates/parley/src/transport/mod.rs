// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the chat service.

pub mod auth;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::ChatServer;

/// Build the axum `Router` with all chat routes.
pub fn build_router(server: Arc<ChatServer>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        .route("/api/v1/login", post(http::login))
        .route("/api/v1/logout", post(http::logout))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(server)
}

/// Whether a WebSocket error means the peer is simply gone.
pub fn is_peer_gone(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}
