// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-client outbound queues, keyed by session token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::event::SharedEvent;

/// Identifies one registration of a queue under a token.
///
/// A token can be re-opened while an older stream is still unwinding; the
/// ticket id lets `close` tell the two apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTicket {
    pub token: String,
    id: u64,
}

/// Receiving half of a client's bounded outbound queue.
#[derive(Debug)]
pub struct ClientQueue {
    ticket: StreamTicket,
    rx: mpsc::Receiver<SharedEvent>,
}

impl ClientQueue {
    pub fn ticket(&self) -> &StreamTicket {
        &self.ticket
    }

    /// Next queued event, or `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<SharedEvent> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<SharedEvent> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug)]
struct QueueEntry {
    id: u64,
    tx: mpsc::Sender<SharedEvent>,
}

#[derive(Debug, Default)]
struct Queues {
    entries: HashMap<String, QueueEntry>,
    /// Set once the shutdown event has been offered; no queue opens after.
    sealed: bool,
}

/// Who currently has a live connection.
///
/// The registry holds the only sender for each queue, so removing an entry
/// closes that queue: its receiver yields what is already buffered and then
/// `None`.
#[derive(Debug)]
pub struct StreamRegistry {
    capacity: usize,
    next_id: AtomicU64,
    queues: RwLock<Queues>,
}

impl StreamRegistry {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, next_id: AtomicU64::new(1), queues: RwLock::new(Queues::default()) }
    }

    /// Register a fresh queue for `token`.
    ///
    /// An existing registration for the same token is replaced and its queue
    /// closed, so the superseded connection drains and exits on its own.
    /// Fails with `Unavailable` once the registry is sealed.
    pub fn open(&self, token: &str) -> Result<ClientQueue, ChatError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let replaced = {
            let mut queues = self.queues.write();
            if queues.sealed {
                return Err(ChatError::shutting_down());
            }
            queues.entries.insert(token.to_owned(), QueueEntry { id, tx })
        };
        if replaced.is_some() {
            debug!(token, "replaced existing stream registration");
        }
        debug!(token, "opened stream");
        Ok(ClientQueue { ticket: StreamTicket { token: token.to_owned(), id }, rx })
    }

    /// Remove the registration described by `ticket`, closing its queue.
    ///
    /// Returns `false` if the token is unknown or has since been re-opened.
    pub fn close(&self, ticket: &StreamTicket) -> bool {
        let removed = {
            let mut queues = self.queues.write();
            let owned =
                queues.entries.get(&ticket.token).is_some_and(|entry| entry.id == ticket.id);
            if owned {
                queues.entries.remove(&ticket.token);
            }
            owned
        };
        if removed {
            debug!(token = %ticket.token, "closed stream");
        }
        removed
    }

    /// Seal the registry and close every registered queue. Returns how many
    /// were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut queues = self.queues.write();
            queues.sealed = true;
            queues.entries.drain().collect()
        };
        drained.len()
    }

    /// Visit every registered queue under the read lock.
    ///
    /// `f` must not block; the hub only ever calls `try_send` from here.
    pub fn for_each(&self, mut f: impl FnMut(&str, &mpsc::Sender<SharedEvent>)) {
        let queues = self.queues.read();
        for (token, entry) in queues.entries.iter() {
            f(token, &entry.tx);
        }
    }

    /// Like [`for_each`](Self::for_each), but also seals the registry under
    /// the same write lock: every queue opened before the seal is visited,
    /// and every later [`open`](Self::open) fails.
    pub fn seal(&self, mut f: impl FnMut(&str, &mpsc::Sender<SharedEvent>)) {
        let mut queues = self.queues.write();
        queues.sealed = true;
        for (token, entry) in queues.entries.iter() {
            f(token, &entry.tx);
        }
    }

    /// Wait for room in each of `tokens`' queues and enqueue `event`, giving
    /// up at `deadline`. Returns how many queues received it.
    pub async fn deliver(&self, tokens: &[String], event: SharedEvent, deadline: Instant) -> usize {
        let senders: Vec<_> = {
            let queues = self.queues.read();
            tokens
                .iter()
                .filter_map(|token| queues.entries.get(token).map(|e| (token, e.tx.clone())))
                .collect()
        };

        let sends = senders.into_iter().map(|(token, tx)| {
            let event = Arc::clone(&event);
            async move {
                match tokio::time::timeout_at(deadline, tx.send(event)).await {
                    Ok(sent) => sent.is_ok(),
                    Err(_) => {
                        warn!(token = %token, "client stream still full, giving up");
                        false
                    }
                }
            }
        });
        future::join_all(sends).await.into_iter().filter(|sent| *sent).count()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.queues.read().entries.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.queues.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.read().entries.is_empty()
    }
}

/// Closes a stream registration when dropped.
///
/// Held by the connection handler so the queue is unregistered on every
/// exit path, including early returns and panics in the handler body.
pub struct StreamGuard<'a> {
    registry: &'a StreamRegistry,
    ticket: StreamTicket,
}

impl<'a> StreamGuard<'a> {
    pub fn new(registry: &'a StreamRegistry, ticket: StreamTicket) -> Self {
        Self { registry, ticket }
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        self.registry.close(&self.ticket);
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
