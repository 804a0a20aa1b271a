// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The chat service contract and the server that implements it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, Stream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::connection::{ConnectionHandler, StreamIdentity};
use crate::error::{ChatError, TransportError};
use crate::event::SharedEvent;
use crate::gate::AuthGate;
use crate::hub::{BroadcastHub, Ingress};
use crate::session::SessionRegistry;
use crate::stream::StreamRegistry;

/// Operations a transport exposes to chat clients.
///
/// Transports call these and never touch the registries directly.
pub trait ChatService: Send + Sync {
    /// Authenticate and return a fresh session token.
    fn login(
        &self,
        name: &str,
        password: &str,
    ) -> impl Future<Output = Result<String, ChatError>> + Send;

    /// End the session for `token`.
    fn logout(&self, token: &str) -> impl Future<Output = Result<(), ChatError>> + Send;

    /// Check the credential presented when opening a stream.
    ///
    /// Transports call this before exchanging any frames. Fails with
    /// `Unavailable` once shutdown has begun.
    fn authorize(&self, token: Option<&str>) -> Result<StreamIdentity, ChatError>;

    /// Serve an authorized bidirectional stream until either side ends it.
    fn stream<S, R>(
        &self,
        identity: StreamIdentity,
        sink: S,
        source: R,
    ) -> impl Future<Output = Result<(), ChatError>> + Send
    where
        S: Sink<SharedEvent, Error = TransportError> + Send + 'static,
        R: Stream<Item = Result<String, TransportError>> + Send;
}

/// In-process chat server: registries, ingress queue, and per-stream
/// bookkeeping shared by every transport connection.
pub struct ChatServer {
    sessions: Arc<SessionRegistry>,
    streams: Arc<StreamRegistry>,
    ingress: Arc<Ingress>,
    gate: AuthGate,
    connections: ConnectionHandler,
    /// Parent of every session scope. Cancelled last during shutdown.
    teardown: CancellationToken,
    live: TaskTracker,
}

impl ChatServer {
    /// Build the server and the hub that must be spawned alongside it.
    pub fn new(config: &ServerConfig) -> (Self, BroadcastHub) {
        let sessions = Arc::new(SessionRegistry::new());
        let streams = Arc::new(StreamRegistry::new(config.client_queue_capacity));
        let (ingress, ingress_rx) = Ingress::channel(config.ingress_capacity);
        let ingress = Arc::new(ingress);

        let gate = AuthGate::new(
            config.password.clone(),
            config.token_bytes,
            Arc::clone(&sessions),
            Arc::clone(&ingress),
        );
        let connections = ConnectionHandler::new(Arc::clone(&streams), Arc::clone(&ingress));
        let hub = BroadcastHub::new(ingress_rx, Arc::clone(&streams));

        let server = Self {
            sessions,
            streams,
            ingress,
            gate,
            connections,
            teardown: CancellationToken::new(),
            live: TaskTracker::new(),
        };
        (server, hub)
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    pub fn ingress(&self) -> &Ingress {
        &self.ingress
    }

    /// Number of streams currently being served.
    pub fn live_streams(&self) -> usize {
        self.live.len()
    }

    /// Wait up to `timeout` for every stream to finish, then cancel the
    /// stragglers. Returns `false` if any had to be cancelled.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.live.close();
        let finished = tokio::time::timeout(timeout, self.live.wait()).await.is_ok();
        if !finished {
            warn!(remaining = self.live.len(), "streams still open after drain timeout");
        }
        self.teardown.cancel();
        self.live.wait().await;
        finished
    }
}

impl ChatService for ChatServer {
    async fn login(&self, name: &str, password: &str) -> Result<String, ChatError> {
        self.gate.login(name, password).await
    }

    async fn logout(&self, token: &str) -> Result<(), ChatError> {
        self.gate.logout(token).await
    }

    fn authorize(&self, token: Option<&str>) -> Result<StreamIdentity, ChatError> {
        if self.ingress.is_closed() {
            return Err(ChatError::shutting_down());
        }
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ChatError::unauthenticated("missing token header"))?;
        let name =
            self.sessions.get(token).ok_or_else(|| ChatError::unauthenticated("invalid token"))?;
        Ok(StreamIdentity { token: token.to_owned(), name })
    }

    async fn stream<S, R>(
        &self,
        identity: StreamIdentity,
        sink: S,
        source: R,
    ) -> Result<(), ChatError>
    where
        S: Sink<SharedEvent, Error = TransportError> + Send + 'static,
        R: Stream<Item = Result<String, TransportError>> + Send,
    {
        let _live = self.live.token();
        let scope = self.teardown.child_token();
        debug!(token = %identity.token, name = %identity.name, "stream started");
        self.connections.serve(identity, sink, source, scope).await
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
