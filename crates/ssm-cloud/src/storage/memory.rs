// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory object storage.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use super::{ObjectStorage, ObjectStream, content_type_for};
use crate::error::{Error, Result};

/// Stored object.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    /// Object body.
    pub data: Bytes,
    /// Content type given at upload.
    pub content_type: String,
}

/// Object storage kept in a map. Clones share nothing; wrap in `Arc` to share.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    fail_puts: Mutex<bool>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent upload fail (or succeed again).
    pub fn set_fail_puts(&self, fail: bool) {
        *self.fail_puts.lock().unwrap_or_else(|p| p.into_inner()) = fail;
    }

    /// Snapshot of one object.
    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    fn insert(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        if *self.fail_puts.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(Error::Storage(format!("upload of {key} rejected")));
        }
        self.objects
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(
                key.to_string(),
                StoredObject {
                    data,
                    content_type: content_type.to_string(),
                },
            );
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put_file(&self, key: &str, path: &Path) -> Result<()> {
        let data = tokio::fs::read(path).await?;
        self.insert(key, Bytes::from(data), &content_type_for(key))
    }

    async fn put_bytes(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        self.insert(key, data, content_type)
    }

    async fn get_stream(&self, key: &str) -> Result<ObjectStream> {
        let data = self
            .object(key)
            .map(|o| o.data)
            .ok_or_else(|| Error::NotFound(format!("Object {key}")))?;
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut objects = self.objects.lock().unwrap_or_else(|p| p.into_inner());
        let before = objects.len();
        objects.retain(|k, _| !k.starts_with(prefix));
        Ok(before - objects.len())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
