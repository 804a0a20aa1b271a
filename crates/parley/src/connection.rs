// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One live chat stream: a send loop draining the client's queue onto the
//! wire and a receive loop feeding the client's messages into the ingress.

use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ChatError, TransportError};
use crate::event::{ChatEvent, SharedEvent};
use crate::hub::Ingress;
use crate::stream::{ClientQueue, StreamGuard, StreamRegistry};

/// An authorized stream: the token it was opened with and the display
/// name resolved at authorization time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamIdentity {
    pub token: String,
    pub name: String,
}

/// How the send loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The queue was closed and everything in it was written.
    Drained,
    /// The session scope was cancelled.
    Cancelled,
    /// The peer went away mid-write.
    Disconnected,
    /// Any other write failure.
    Failed,
}

/// Serves authorized streams against the shared registries.
#[derive(Clone)]
pub struct ConnectionHandler {
    streams: Arc<StreamRegistry>,
    ingress: Arc<Ingress>,
}

impl ConnectionHandler {
    pub fn new(streams: Arc<StreamRegistry>, ingress: Arc<Ingress>) -> Self {
        Self { streams, ingress }
    }

    /// Run one stream to completion.
    ///
    /// `sink` receives every event fanned out to this client; `source` yields
    /// the text of each inbound message. Returns `Err(Cancelled)` when
    /// `scope` was cancelled, `Unavailable` if the server is shutting down,
    /// `Internal` if the send loop died, or the read error that ended the
    /// stream.
    pub async fn serve<S, R>(
        &self,
        identity: StreamIdentity,
        sink: S,
        source: R,
        scope: CancellationToken,
    ) -> Result<(), ChatError>
    where
        S: Sink<SharedEvent, Error = TransportError> + Send + 'static,
        R: Stream<Item = Result<String, TransportError>> + Send,
    {
        let queue = self.streams.open(&identity.token)?;
        let _registration = StreamGuard::new(&self.streams, queue.ticket().clone());

        let sender = tokio::spawn(send_loop(identity.token.clone(), queue, sink, scope.clone()));
        let result = self.receive_loop(&identity, source, &scope).await;

        scope.cancel();
        match sender.await {
            Ok(outcome) => debug!(token = %identity.token, ?outcome, "send loop finished"),
            Err(e) => {
                warn!(token = %identity.token, err = %e, "send loop aborted");
                return Err(ChatError::internal(format!("send loop aborted: {e}")));
            }
        }
        result
    }

    async fn receive_loop<R>(
        &self,
        identity: &StreamIdentity,
        source: R,
        scope: &CancellationToken,
    ) -> Result<(), ChatError>
    where
        R: Stream<Item = Result<String, TransportError>> + Send,
    {
        tokio::pin!(source);
        loop {
            let frame = tokio::select! {
                _ = scope.cancelled() => return Err(ChatError::cancelled()),
                frame = source.next() => frame,
            };

            let text = match frame {
                None => return Ok(()),
                Some(Ok(text)) => text,
                Some(Err(e)) if e.is_disconnect() => {
                    debug!(token = %identity.token, err = %e, "client terminated connection");
                    return Ok(());
                }
                Some(Err(e)) => return Err(e.into()),
            };

            let event = ChatEvent::message(identity.name.as_str(), text);
            tokio::select! {
                _ = scope.cancelled() => return Err(ChatError::cancelled()),
                pushed = self.ingress.push(event) => {
                    if let Err(e) = pushed {
                        debug!(token = %identity.token, err = %e, "message not accepted");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Write queued events to `sink` until the queue closes or `scope` fires.
///
/// Cancels `scope` on the way out so the receive loop stops with it.
pub async fn send_loop<S>(
    token: String,
    mut queue: ClientQueue,
    sink: S,
    scope: CancellationToken,
) -> SendOutcome
where
    S: Sink<SharedEvent, Error = TransportError>,
{
    let _stop_receiving = scope.clone().drop_guard();
    tokio::pin!(sink);

    loop {
        let event = tokio::select! {
            _ = scope.cancelled() => return SendOutcome::Cancelled,
            next = queue.recv() => next,
        };

        let Some(event) = event else {
            if let Err(e) = sink.close().await {
                debug!(token = %token, err = %e, "failed to close stream after drain");
            }
            return SendOutcome::Drained;
        };

        let written = tokio::select! {
            _ = scope.cancelled() => return SendOutcome::Cancelled,
            written = sink.send(event) => written,
        };

        match written {
            Ok(()) => {}
            Err(e) if e.is_disconnect() => {
                debug!(token = %token, err = %e, "client terminated connection");
                return SendOutcome::Disconnected;
            }
            Err(e) => {
                warn!(token = %token, err = %e, "failed to send to client");
                return SendOutcome::Failed;
            }
        }
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
