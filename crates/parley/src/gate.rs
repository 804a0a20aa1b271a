// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Login and logout.

use std::fmt::Write as _;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info};

use crate::error::ChatError;
use crate::event::ChatEvent;
use crate::hub::Ingress;
use crate::session::SessionRegistry;

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Hex-encode `len` bytes from the thread-local CSPRNG.
pub fn generate_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill(&mut bytes[..]);
    bytes.iter().fold(String::with_capacity(len * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Authenticates clients against the shared password and announces
/// logins and logouts on the ingress queue.
pub struct AuthGate {
    password: String,
    token_bytes: usize,
    sessions: Arc<SessionRegistry>,
    ingress: Arc<Ingress>,
}

impl AuthGate {
    pub fn new(
        password: impl Into<String>,
        token_bytes: usize,
        sessions: Arc<SessionRegistry>,
        ingress: Arc<Ingress>,
    ) -> Self {
        Self { password: password.into(), token_bytes, sessions, ingress }
    }

    /// Check credentials, register a session and broadcast the login.
    pub async fn login(&self, name: &str, password: &str) -> Result<String, ChatError> {
        if !constant_time_eq(password, &self.password) {
            return Err(ChatError::unauthenticated("password is incorrect"));
        }
        if name.is_empty() {
            return Err(ChatError::invalid_argument("name cannot be empty"));
        }

        let token = generate_token(self.token_bytes);
        // Visible before the event goes out, so a stream opened with this
        // token as soon as the login is seen is never rejected.
        self.sessions.set(token.clone(), name);

        if let Err(e) = self.ingress.push(ChatEvent::login(name)).await {
            self.sessions.remove(&token);
            return Err(e);
        }

        info!(token = %token, name, "client logged in");
        Ok(token)
    }

    /// Drop the session for `token` and broadcast the logout.
    pub async fn logout(&self, token: &str) -> Result<(), ChatError> {
        let name =
            self.sessions.remove(token).ok_or_else(|| ChatError::not_found("token not found"))?;
        info!(token, name = %name, "client logged out");

        if let Err(e) = self.ingress.push(ChatEvent::logout(name)).await {
            debug!(token, err = %e, "logout not broadcast");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
