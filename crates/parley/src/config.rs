// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Real-time chat server and terminal client.
#[derive(Debug, Parser)]
#[command(name = "parley", version, about)]
pub struct Cli {
    /// Log format (json or text).
    #[arg(long, global = true, env = "PARLEY_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, env = "PARLEY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the chat server.
    Server(ServerConfig),
    /// Connect to a chat server from the terminal.
    Client(ClientConfig),
}

/// Configuration for the chat server.
#[derive(Debug, Clone, clap::Args)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[arg(long, default_value = "0.0.0.0", env = "PARLEY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 6262, env = "PARLEY_PORT")]
    pub port: u16,

    /// Shared password every client must present at login.
    #[arg(long, env = "PARLEY_PASSWORD")]
    pub password: String,

    /// Events buffered per client before new ones are dropped for it.
    #[arg(long, default_value_t = 100, env = "PARLEY_CLIENT_QUEUE_CAPACITY")]
    pub client_queue_capacity: usize,

    /// Events buffered between producers and the broadcast hub.
    #[arg(long, default_value_t = 1000, env = "PARLEY_INGRESS_CAPACITY")]
    pub ingress_capacity: usize,

    /// Random bytes per session token (hex-encoded on the wire).
    #[arg(long, default_value_t = 16, env = "PARLEY_TOKEN_BYTES")]
    pub token_bytes: usize,

    /// How long shutdown waits for streams to flush before cancelling them.
    #[arg(long, default_value_t = 5000, env = "PARLEY_DRAIN_TIMEOUT_MS")]
    pub drain_timeout_ms: u64,
}

impl ServerConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.password.is_empty() {
            anyhow::bail!("--password cannot be empty");
        }
        if self.client_queue_capacity == 0 {
            anyhow::bail!("--client-queue-capacity must be at least 1");
        }
        if self.ingress_capacity == 0 {
            anyhow::bail!("--ingress-capacity must be at least 1");
        }
        if self.token_bytes < 4 {
            anyhow::bail!("--token-bytes must be at least 4");
        }
        Ok(())
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|e| anyhow::anyhow!("invalid listen address {addr}: {e}"))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Loopback config on an ephemeral port with small queues.
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 0,
            password: "secret".to_owned(),
            client_queue_capacity: 8,
            ingress_capacity: 64,
            token_bytes: 16,
            drain_timeout_ms: 2000,
        }
    }
}

/// Configuration for the terminal client.
#[derive(Debug, Clone, clap::Args)]
pub struct ClientConfig {
    /// Server address (host:port).
    #[arg(long, default_value = "127.0.0.1:6262", env = "PARLEY_SERVER")]
    pub server: String,

    /// Shared server password.
    #[arg(long, env = "PARLEY_PASSWORD")]
    pub password: String,

    /// Display name shown to other clients.
    #[arg(long, env = "PARLEY_NAME")]
    pub name: String,
}

impl ClientConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.is_empty() {
            anyhow::bail!("--server cannot be empty");
        }
        if self.name.is_empty() {
            anyhow::bail!("--name cannot be empty");
        }
        Ok(())
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.server)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.server)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
