// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket adapter: one socket per chat stream.
//!
//! Outbound frames are JSON [`ChatEvent`](crate::event::ChatEvent)s, inbound
//! frames are JSON [`ClientFrame`]s.

use std::future;
use std::io;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::tungstenite;
use tracing::{debug, warn};

use crate::connection::StreamIdentity;
use crate::error::{ErrorCode, TransportError};
use crate::event::{ClientFrame, SharedEvent};
use crate::service::{ChatServer, ChatService};
use crate::transport::{auth, is_peer_gone};

/// Query parameters for the WS upgrade.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// `GET /ws`: authorize, then upgrade to a chat stream.
///
/// Authorization runs before the upgrade is validated, so a bad token is a
/// plain 401 and no frames are ever exchanged.
pub async fn ws_handler(
    State(s): State<Arc<ChatServer>>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let identity = match s.authorize(auth::extract_token(&headers, query.token.as_deref())) {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };
    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| handle_ws(s, identity, socket)).into_response(),
        Err(rejection) => rejection.into_response(),
    }
}

async fn handle_ws(server: Arc<ChatServer>, identity: StreamIdentity, socket: WebSocket) {
    let token = identity.token.clone();
    let (ws_tx, ws_rx) = socket.split();

    let sink = ws_tx
        .sink_map_err(transport_error)
        .with(|event: SharedEvent| future::ready(encode_event(&event)));
    let source = ws_rx
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| future::ready(decode_frame(msg)));

    match server.stream(identity, sink, source).await {
        Ok(()) => debug!(token = %token, "stream closed by client"),
        Err(e) if e.code == ErrorCode::Cancelled => debug!(token = %token, "stream cancelled"),
        Err(e) if e.code == ErrorCode::Unavailable => {
            debug!(token = %token, "stream refused, server is shutting down");
        }
        Err(e) => warn!(token = %token, err = %e, "stream ended with error"),
    }
}

fn encode_event(event: &SharedEvent) -> Result<Message, TransportError> {
    serde_json::to_string(event.as_ref())
        .map(|text| Message::Text(text.into()))
        .map_err(|e| TransportError::Failed(format!("encode event: {e}")))
}

/// Map one inbound WS message to the message text it carries.
///
/// Control frames yield nothing; a frame that is not a valid
/// [`ClientFrame`] is a terminal error for the stream.
fn decode_frame(msg: Result<Message, axum::Error>) -> Option<Result<String, TransportError>> {
    let parsed = match msg {
        Ok(Message::Text(text)) => serde_json::from_str::<ClientFrame>(text.as_str()),
        Ok(Message::Binary(bytes)) => serde_json::from_slice::<ClientFrame>(&bytes),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_)) => return None,
        Err(e) => return Some(Err(transport_error(e))),
    };
    Some(
        parsed
            .map(|frame| frame.message)
            .map_err(|e| TransportError::Failed(format!("malformed frame: {e}"))),
    )
}

fn is_disconnect_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// Classify a socket error as the peer going away or a real failure.
fn transport_error(err: axum::Error) -> TransportError {
    let inner = err.into_inner();
    let detail = inner.to_string();

    let root: &(dyn std::error::Error + 'static) = &*inner;
    let mut source = Some(root);
    while let Some(e) = source {
        let gone = if let Some(ws_err) = e.downcast_ref::<tungstenite::Error>() {
            is_peer_gone(ws_err)
        } else if let Some(io_err) = e.downcast_ref::<io::Error>() {
            is_disconnect_kind(io_err.kind())
        } else {
            false
        };
        if gone {
            return TransportError::Disconnected(detail);
        }
        source = e.source();
    }
    TransportError::Failed(detail)
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
