// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token → display name map for logged-in clients.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Who is logged in.
///
/// Lookups share the lock; `set`/`remove` take it exclusively for a single
/// key. The guard never escapes a method, so no caller can hold it across
/// an await point.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    names: RwLock<HashMap<String, String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the name for `token`.
    pub fn set(&self, token: impl Into<String>, name: impl Into<String>) {
        self.names.write().insert(token.into(), name.into());
    }

    pub fn get(&self, token: &str) -> Option<String> {
        self.names.read().get(token).cloned()
    }

    /// Remove `token`, returning the name it mapped to.
    pub fn remove(&self, token: &str) -> Option<String> {
        self.names.write().remove(token)
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
