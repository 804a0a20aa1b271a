// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// What happened, as seen by every connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ClientLogin { name: String },
    ClientLogout { name: String },
    ClientMessage { name: String, message: String },
    ServerShutdown,
}

/// A timestamped event travelling from the ingress queue to client queues.
///
/// Serialized flat on the wire, e.g.
/// `{"timestamp":1700000000000,"type":"client_message","name":"alice","message":"hi"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Events are immutable once built, so the hub shares one allocation
/// between every client queue.
pub type SharedEvent = Arc<ChatEvent>;

impl ChatEvent {
    pub fn now(kind: EventKind) -> Self {
        Self { timestamp: epoch_ms(), kind }
    }

    pub fn login(name: impl Into<String>) -> Self {
        Self::now(EventKind::ClientLogin { name: name.into() })
    }

    pub fn logout(name: impl Into<String>) -> Self {
        Self::now(EventKind::ClientLogout { name: name.into() })
    }

    pub fn message(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::now(EventKind::ClientMessage { name: name.into(), message: message.into() })
    }

    pub fn shutdown() -> Self {
        Self::now(EventKind::ServerShutdown)
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self.kind, EventKind::ServerShutdown)
    }
}

/// Frame sent by a client over its stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub message: String,
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
