// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a real server on a random port and assertion
//! helpers.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, ServerConfig};
use crate::service::ChatServer;
use crate::shutdown::ShutdownReport;

/// A chat server bound to `127.0.0.1:0` and served in the background.
pub struct ChatHarness {
    pub addr: SocketAddr,
    pub server: Arc<ChatServer>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<anyhow::Result<ShutdownReport>>,
}

impl ChatHarness {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Client config for `name` using the test password.
    pub fn client_config(&self, name: &str) -> ClientConfig {
        ClientConfig {
            server: self.addr.to_string(),
            password: ServerConfig::test().password,
            name: name.to_owned(),
        }
    }

    /// Trigger shutdown and wait for it to finish.
    pub async fn stop(self) -> anyhow::Result<ShutdownReport> {
        self.shutdown.cancel();
        self.handle.await?
    }
}

/// Spawn a chat server on a random port for integration testing.
pub async fn spawn_chat_server(config: ServerConfig) -> anyhow::Result<ChatHarness> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (server, hub) = ChatServer::new(&config);
    let server = Arc::new(server);
    let shutdown = CancellationToken::new();

    let handle = tokio::spawn(crate::serve(
        listener,
        Arc::clone(&server),
        hub,
        config.drain_timeout(),
        shutdown.clone(),
    ));
    Ok(ChatHarness { addr, server, shutdown, handle })
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
