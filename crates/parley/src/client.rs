// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal chat client.
//!
//! Logs in over HTTP, opens the WebSocket stream with the session token,
//! forwards input lines as messages and prints every event it receives.
//! Logs out on exit unless the server announced it was shutting down.

use std::time::Duration;

use chrono::{DateTime, Local};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ErrorResponse;
use crate::event::{ChatEvent, ClientFrame, EventKind};
use crate::transport::auth::TOKEN_HEADER;
use crate::transport::is_peer_gone;
use crate::transport::http::{LoginRequest, LoginResponse, LogoutRequest};

/// Deadline for the login and logout calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Format an epoch-millis timestamp as local `HH:MM:SS`.
fn clock(timestamp_ms: u64) -> String {
    i64::try_from(timestamp_ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_owned())
}

/// One printable line for a server event.
pub fn render_event(event: &ChatEvent) -> String {
    let ts = clock(event.timestamp);
    match &event.kind {
        EventKind::ClientLogin { name } => format!("[{ts}] {name} has logged in"),
        EventKind::ClientLogout { name } => format!("[{ts}] {name} has logged out"),
        EventKind::ClientMessage { name, message } => format!("[{ts}] {name}: {message}"),
        EventKind::ServerShutdown => format!("[{ts}] the server is shutting down"),
    }
}

async fn error_of(resp: reqwest::Response) -> anyhow::Error {
    let status = resp.status();
    match resp.json::<ErrorResponse>().await {
        Ok(body) => anyhow::anyhow!("{}: {}", body.error.code, body.error.message),
        Err(_) => anyhow::anyhow!("server returned {status}"),
    }
}

#[derive(Debug)]
pub struct ChatClient {
    config: ClientConfig,
    http: reqwest::Client,
    token: Option<String>,
    shutdown_seen: bool,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self { config, http, token: None, shutdown_seen: false })
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Whether the server announced its shutdown on the stream.
    pub fn shutdown_seen(&self) -> bool {
        self.shutdown_seen
    }

    pub async fn login(&mut self) -> anyhow::Result<String> {
        let url = format!("{}/api/v1/login", self.config.base_url());
        let body =
            LoginRequest { name: self.config.name.clone(), password: self.config.password.clone() };
        let resp = self.http.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(error_of(resp).await);
        }
        let LoginResponse { token } = resp.json().await?;
        self.token = Some(token.clone());
        Ok(token)
    }

    /// Log out, unless the server already said it is going away.
    ///
    /// An unreachable server counts as already logged out.
    pub async fn logout(&mut self) -> anyhow::Result<()> {
        if self.shutdown_seen {
            debug!("skipping logout, server sent shutdown");
            return Ok(());
        }
        let Some(token) = self.token.take() else {
            return Ok(());
        };

        let url = format!("{}/api/v1/logout", self.config.base_url());
        let resp = match self.http.post(&url).json(&LogoutRequest { token }).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_connect() => {
                debug!(err = %e, "unable to logout, connection already closed");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if !resp.status().is_success() {
            return Err(error_of(resp).await);
        }
        Ok(())
    }

    /// Open the stream and run it until the server ends it or `cancel` fires.
    ///
    /// Lines read from `input` are sent as messages; every event received is
    /// rendered to `output`. Blank lines are ignored.
    pub async fn stream<I, W>(
        &mut self,
        input: I,
        output: &mut W,
        cancel: CancellationToken,
    ) -> anyhow::Result<()>
    where
        I: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let token = self.token.as_deref().ok_or_else(|| anyhow::anyhow!("not logged in"))?;
        let mut request = self.config.ws_url().into_client_request()?;
        request.headers_mut().insert(TOKEN_HEADER, HeaderValue::from_str(token)?);

        let (ws, _response) = tokio_tungstenite::connect_async(request).await?;
        let (mut ws_tx, mut ws_rx) = ws.split();
        info!("connected to stream");

        let mut lines = input.lines();
        let mut input_open = true;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = ws_tx.close().await {
                        debug!(err = %e, "close after cancel failed");
                    }
                    return Ok(());
                }
                line = lines.next_line(), if input_open => {
                    let Some(line) = line? else {
                        debug!("input closed");
                        input_open = false;
                        continue;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let frame = serde_json::to_string(&ClientFrame { message: line })?;
                    if let Err(e) = ws_tx.send(Message::Text(frame.into())).await {
                        warn!(err = %e, "failed to send message");
                        return Ok(());
                    }
                }
                msg = ws_rx.next() => {
                    let text = match msg {
                        None | Some(Ok(Message::Close(_))) => {
                            debug!("stream closed by server");
                            return Ok(());
                        }
                        Some(Err(e)) if is_peer_gone(&e) => {
                            debug!(err = %e, "stream closed");
                            return Ok(());
                        }
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(_)) => continue,
                    };

                    let event: ChatEvent = serde_json::from_str(text.as_str())?;
                    output.write_all(render_event(&event).as_bytes()).await?;
                    output.write_all(b"\n").await?;
                    output.flush().await?;
                    if event.is_shutdown() {
                        self.shutdown_seen = true;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Log in, stream until done, then log out.
    pub async fn run<I, W>(
        &mut self,
        input: I,
        output: &mut W,
        cancel: CancellationToken,
    ) -> anyhow::Result<()>
    where
        I: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.login().await.map_err(|e| e.context("failed to login"))?;
        info!(name = %self.config.name, "logged in successfully");

        let streamed = self.stream(input, output, cancel).await;

        info!("logging out");
        if let Err(e) = self.logout().await {
            warn!(err = %e, "failed to logout");
        }
        streamed.map_err(|e| e.context("stream error"))
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
