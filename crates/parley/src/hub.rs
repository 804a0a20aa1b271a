// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared ingress queue and the broadcast hub that drains it.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::event::{ChatEvent, SharedEvent};
use crate::stream::StreamRegistry;

/// Producer side of the single ingress queue.
///
/// Many producers push; [`BroadcastHub`] is the only consumer. The queue is
/// closed exactly once, by [`close_with`](Self::close_with), which pushes a
/// final event before dropping the sender.
#[derive(Debug)]
pub struct Ingress {
    tx: RwLock<Option<mpsc::Sender<SharedEvent>>>,
}

impl Ingress {
    /// Create the ingress queue. The receiver goes to [`BroadcastHub::new`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SharedEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: RwLock::new(Some(tx)) }, rx)
    }

    /// Push an event, waiting for room if the queue is full.
    ///
    /// Fails with `Unavailable` if [`close_with`](Self::close_with) started
    /// while waiting, so nothing is ever queued behind the final event.
    pub async fn push(&self, event: ChatEvent) -> Result<(), ChatError> {
        let tx = self.tx.read().clone().ok_or_else(ChatError::shutting_down)?;
        let permit = tx.reserve().await.map_err(|_| ChatError::shutting_down())?;

        // close_with takes the sender under the write lock before queueing.
        let open = self.tx.read();
        if open.is_none() {
            return Err(ChatError::shutting_down());
        }
        permit.send(Arc::new(event));
        Ok(())
    }

    /// Push `last` and close the queue. Later pushes fail with `Unavailable`.
    ///
    /// Only the first call has any effect.
    pub async fn close_with(&self, last: ChatEvent) -> Result<(), ChatError> {
        let tx = self.tx.write().take().ok_or_else(ChatError::shutting_down)?;
        tx.send(Arc::new(last)).await.map_err(|_| ChatError::shutting_down())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.read().as_ref().map_or(true, |tx| tx.is_closed())
    }
}

/// Counters reported by the hub when its loop ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubReport {
    pub events: u64,
    pub delivered: u64,
    pub dropped: u64,
    /// Events still buffered behind the shutdown event, never fanned out.
    pub discarded: u64,
    /// Tokens whose queue was full when the shutdown event was offered.
    /// They still owe that client its shutdown.
    pub lagging: Vec<String>,
}

/// Fans every ingress event out to every registered client queue.
pub struct BroadcastHub {
    rx: mpsc::Receiver<SharedEvent>,
    streams: Arc<StreamRegistry>,
}

impl BroadcastHub {
    pub fn new(rx: mpsc::Receiver<SharedEvent>, streams: Arc<StreamRegistry>) -> Self {
        Self { rx, streams }
    }

    pub fn spawn(self) -> JoinHandle<HubReport> {
        tokio::spawn(self.run())
    }

    /// Consume the ingress queue until it closes or a shutdown event passes.
    pub async fn run(mut self) -> HubReport {
        let mut report = HubReport::default();

        while let Some(event) = self.rx.recv().await {
            report.events += 1;
            let out = fan_out(&self.streams, &event);
            report.delivered += out.delivered;
            report.dropped += out.dropped;

            if event.is_shutdown() {
                report.lagging = out.full;
                self.rx.close();
                while self.rx.try_recv().is_ok() {
                    report.discarded += 1;
                }
                if report.discarded > 0 {
                    debug!(count = report.discarded, "discarded events queued behind shutdown");
                }
                break;
            }
        }

        info!(
            events = report.events,
            delivered = report.delivered,
            dropped = report.dropped,
            lagging = report.lagging.len(),
            "broadcast hub stopped"
        );
        report
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct FanOut {
    delivered: u64,
    dropped: u64,
    /// Tokens that could not take a shutdown event yet.
    full: Vec<String>,
}

/// Offer `event` to every registered queue without blocking.
///
/// A full queue loses an ordinary event; a closed one belongs to a connection
/// that is already tearing down. The shutdown event is offered while sealing
/// the registry, and full queues are recorded instead of dropped.
fn fan_out(streams: &StreamRegistry, event: &SharedEvent) -> FanOut {
    let last = event.is_shutdown();
    let mut out = FanOut::default();
    let offer = |token: &str, tx: &mpsc::Sender<SharedEvent>| {
        match tx.try_send(Arc::clone(event)) {
            Ok(()) => out.delivered += 1,
            Err(TrySendError::Full(_)) if last => {
                debug!(token, "client stream is full, shutdown deferred");
                out.full.push(token.to_owned());
            }
            Err(TrySendError::Full(_)) => {
                out.dropped += 1;
                warn!(token, "client stream is full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    };
    if last {
        streams.seal(offer);
    } else {
        streams.for_each(offer);
    }
    out
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
