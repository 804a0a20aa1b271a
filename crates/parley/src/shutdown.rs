// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered server shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::event::ChatEvent;
use crate::hub::HubReport;
use crate::service::ChatServer;

/// What a completed shutdown observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub hub: HubReport,
    /// Lagging queues that took the shutdown event once they had room.
    pub late_shutdowns: usize,
    /// Client queues still registered once the hub had exited.
    pub queues_closed: usize,
    /// `false` if some streams had to be cancelled after the drain timeout.
    pub drained: bool,
}

/// Drives the server from "running" to "every stream closed".
///
/// Steps, in order:
/// 1. stop accepting connections,
/// 2. push `ServerShutdown` and close the ingress queue,
/// 3. wait for the hub to fan it out and exit,
/// 4. hand it to queues that were full at the time, once they have room,
/// 5. close every client queue so send loops flush it,
/// 6. wait out the rest of the drain timeout, then cancel whatever is left.
///
/// Steps 4 to 6 share one drain deadline.
pub struct ShutdownCoordinator {
    server: Arc<ChatServer>,
    hub: JoinHandle<HubReport>,
    stop_accepting: CancellationToken,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(
        server: Arc<ChatServer>,
        hub: JoinHandle<HubReport>,
        drain_timeout: Duration,
    ) -> Self {
        Self { server, hub, stop_accepting: CancellationToken::new(), drain_timeout }
    }

    /// Fires when the listener should stop taking new connections.
    pub fn stop_accepting(&self) -> CancellationToken {
        self.stop_accepting.clone()
    }

    pub async fn run(self) -> ShutdownReport {
        info!("shutting down");
        self.stop_accepting.cancel();

        let last = ChatEvent::shutdown();
        if let Err(e) = self.server.ingress().close_with(last.clone()).await {
            debug!(err = %e, "ingress already closed");
        }

        let hub = match self.hub.await {
            Ok(report) => report,
            Err(e) => {
                error!(err = %e, "broadcast hub failed");
                HubReport::default()
            }
        };

        let deadline = Instant::now() + self.drain_timeout;
        let late_shutdowns = if hub.lagging.is_empty() {
            0
        } else {
            let streams = self.server.streams();
            streams.deliver(&hub.lagging, Arc::new(last), deadline).await
        };

        let queues_closed = self.server.streams().close_all();
        debug!(queues = queues_closed, late_shutdowns, "closed client queues");

        let remaining = deadline.saturating_duration_since(Instant::now());
        let drained = self.server.drain(remaining).await;
        info!(drained, "shutdown complete");
        ShutdownReport { hub, late_shutdowns, queues_closed, drained }
    }
}

#[cfg(test)]
#[path = "shutdown_tests.rs"]
mod tests;
