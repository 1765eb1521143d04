// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registry of open agent streams.
//!
//! Every streaming call registers a cancellation token keyed by
//! `(api key, stream kind)`. A reconnecting agent replaces (and cancels)
//! its previous stream of the same kind. Shutdown cancels them all.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Kind of agent stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// `UpdateAgentStateStream`.
    State,
    /// `StreamLog`.
    Log,
}

#[derive(Debug)]
struct Entry {
    id: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    streams: HashMap<(String, StreamKind), Entry>,
}

/// Process-wide map of open streams.
#[derive(Debug, Clone, Default)]
pub struct StreamRegistry {
    inner: Arc<Mutex<Inner>>,
    root: CancellationToken,
}

impl StreamRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream. Cancels any previous stream with the same key.
    ///
    /// The returned guard removes the entry when dropped.
    pub fn register(&self, api_key: &str, kind: StreamKind) -> StreamGuard {
        let token = self.root.child_token();
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.next_id += 1;
        let id = inner.next_id;

        let key = (api_key.to_string(), kind);
        if let Some(previous) = inner.streams.insert(
            key.clone(),
            Entry {
                id,
                token: token.clone(),
            },
        ) {
            debug!(kind = ?kind, "Replacing existing agent stream");
            previous.token.cancel();
        }

        StreamGuard {
            registry: self.clone(),
            key,
            id,
            token,
        }
    }

    /// Number of open streams.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .streams
            .len()
    }

    /// Whether no stream is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every open stream and refuse new ones.
    pub fn cancel_all(&self) {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let count = inner.streams.len();
        for entry in inner.streams.values() {
            entry.token.cancel();
        }
        drop(inner);
        self.root.cancel();
        info!(streams = count, "Cancelled agent streams");
    }

    fn remove(&self, key: &(String, StreamKind), id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if inner.streams.get(key).is_some_and(|e| e.id == id) {
            inner.streams.remove(key);
        }
    }
}

/// Membership of one stream in the registry.
#[derive(Debug)]
pub struct StreamGuard {
    registry: StreamRegistry,
    key: (String, StreamKind),
    id: u64,
    token: CancellationToken,
}

impl StreamGuard {
    /// Token cancelled on shutdown or replacement.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_drop() {
        let registry = StreamRegistry::new();
        let guard = registry.register("API-AGT-a", StreamKind::State);
        let _log = registry.register("API-AGT-a", StreamKind::Log);
        assert_eq!(registry.len(), 2);
        drop(guard);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_replacement_cancels_previous() {
        let registry = StreamRegistry::new();
        let first = registry.register("API-AGT-a", StreamKind::State);
        let second = registry.register("API-AGT-a", StreamKind::State);

        assert!(first.token().is_cancelled());
        assert!(!second.token().is_cancelled());

        // Dropping the replaced guard must not remove the new entry.
        drop(first);
        assert_eq!(registry.len(), 1);
        drop(second);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_all() {
        let registry = StreamRegistry::new();
        let a = registry.register("API-AGT-a", StreamKind::State);
        let b = registry.register("API-AGT-b", StreamKind::Log);

        registry.cancel_all();
        assert!(a.token().is_cancelled());
        assert!(b.token().is_cancelled());

        let late = registry.register("API-AGT-c", StreamKind::State);
        assert!(late.token().is_cancelled());
    }
}
