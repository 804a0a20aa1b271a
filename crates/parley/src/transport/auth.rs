// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::HeaderMap;

/// Header carrying the session token on stream upgrade.
pub const TOKEN_HEADER: &str = "x-chat-token";

/// Pick the session token from the `x-chat-token` header, falling back to a
/// `token` query parameter for clients that cannot set upgrade headers.
///
/// Empty values count as absent.
pub fn extract_token<'a>(headers: &'a HeaderMap, query: Option<&'a str>) -> Option<&'a str> {
    headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|t| !t.is_empty())
        .or_else(|| query.filter(|t| !t.is_empty()))
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
