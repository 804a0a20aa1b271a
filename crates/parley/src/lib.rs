// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parley: a real-time broadcast chat server and terminal client.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod gate;
pub mod hub;
pub mod service;
pub mod session;
pub mod shutdown;
pub mod stream;
pub mod test_support;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::hub::BroadcastHub;
use crate::service::ChatServer;
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::transport::build_router;

/// Run the chat server until `shutdown` is cancelled.
pub async fn run(config: ServerConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    config.validate()?;
    let addr = config.addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!("chat server listening on {}", listener.local_addr()?);

    let (server, hub) = ChatServer::new(&config);
    let report = serve(listener, Arc::new(server), hub, config.drain_timeout(), shutdown).await?;
    info!(
        events = report.hub.events,
        dropped = report.hub.dropped,
        streams = report.queues_closed,
        "chat server stopped"
    );
    Ok(())
}

/// Serve `server` on an already-bound listener.
///
/// Returns once `shutdown` fires (or the listener dies) and the ordered
/// shutdown has finished.
pub async fn serve(
    listener: TcpListener,
    server: Arc<ChatServer>,
    hub: BroadcastHub,
    drain_timeout: Duration,
    shutdown: CancellationToken,
) -> anyhow::Result<ShutdownReport> {
    let coordinator = ShutdownCoordinator::new(Arc::clone(&server), hub.spawn(), drain_timeout);
    let stop_accepting = coordinator.stop_accepting();
    let router = build_router(server);

    let mut listener_task = tokio::spawn(async move {
        axum::serve(listener, router).with_graceful_shutdown(stop_accepting.cancelled_owned()).await
    });

    let listener_exit = tokio::select! {
        _ = shutdown.cancelled() => None,
        result = &mut listener_task => Some(result),
    };
    if listener_exit.is_some() {
        error!("listener stopped before shutdown was requested");
    }

    let report = coordinator.run().await;
    match listener_exit {
        Some(result) => result??,
        None => listener_task.await??,
    }
    Ok(report)
}
