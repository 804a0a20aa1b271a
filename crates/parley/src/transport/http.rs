// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for login, logout and health.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::service::{ChatServer, ChatService};

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
    pub streams: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutRequest {
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogoutResponse {}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<ChatServer>>) -> Json<HealthResponse> {
    let status = if s.ingress().is_closed() { "shutting_down" } else { "running" };
    Json(HealthResponse {
        status: status.to_owned(),
        sessions: s.sessions().len(),
        streams: s.streams().len(),
    })
}

/// `POST /api/v1/login`
pub async fn login(
    State(s): State<Arc<ChatServer>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ChatError> {
    let token = s.login(&req.name, &req.password).await?;
    Ok(Json(LoginResponse { token }))
}

/// `POST /api/v1/logout`
pub async fn logout(
    State(s): State<Arc<ChatServer>>,
    Json(req): Json<LogoutRequest>,
) -> Result<Json<LogoutResponse>, ChatError> {
    s.logout(&req.token).await?;
    Ok(Json(LogoutResponse {}))
}
