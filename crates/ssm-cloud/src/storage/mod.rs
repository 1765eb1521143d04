// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Object storage for agent artifacts.
//!
//! A single bucket holds every account's saves, backups and logs under
//!
//! ```text
//! {accountId}/{agentId}/saves/{filename}
//! {accountId}/{agentId}/backups/{filename}
//! {accountId}/{agentId}/logs/{filename}
//! ```
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`S3Storage`] | Production (AWS S3 or any S3-compatible store) |
//! | [`MemoryStorage`] | Tests and local development |

mod memory;
mod s3;

pub use memory::MemoryStorage;
pub use s3::S3Storage;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use futures::stream::BoxStream;

use crate::error::Result;

/// Artifact category, the third segment of an object key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Save game files.
    Saves,
    /// Backup archives.
    Backups,
    /// Log files.
    Logs,
}

impl ArtifactKind {
    /// Key segment.
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Saves => "saves",
            ArtifactKind::Backups => "backups",
            ArtifactKind::Logs => "logs",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object key of an agent artifact.
pub fn object_key(account_id: &str, agent_id: &str, kind: ArtifactKind, file_name: &str) -> String {
    format!("{account_id}/{agent_id}/{kind}/{file_name}")
}

/// Prefix holding every artifact of an agent.
pub fn agent_prefix(account_id: &str, agent_id: &str) -> String {
    format!("{account_id}/{agent_id}/")
}

/// Prefix holding every artifact of an account.
pub fn account_prefix(account_id: &str) -> String {
    format!("{account_id}/")
}

/// Content type for an object, from its file extension.
pub fn content_type_for(file_name: &str) -> String {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    if ext.as_deref() == Some("log") {
        return "text/plain".to_string();
    }
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Body of a downloaded object, chunk by chunk.
pub type ObjectStream = BoxStream<'static, Result<Bytes>>;

/// Blob store used for artifacts.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload a local file to `key`. Content type follows the key's extension.
    async fn put_file(&self, key: &str, path: &Path) -> Result<()>;

    /// Upload bytes to `key`.
    async fn put_bytes(&self, key: &str, data: Bytes, content_type: &str) -> Result<()>;

    /// Open the object at `key` as a stream of body chunks.
    ///
    /// A missing object fails here, before any chunk is yielded.
    async fn get_stream(&self, key: &str) -> Result<ObjectStream>;

    /// Read the whole object at `key` into memory.
    async fn get(&self, key: &str) -> Result<Bytes> {
        let chunks = self.get_stream(key).await?;
        let body = chunks
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        Ok(body.freeze())
    }

    /// Delete every object whose key starts with `prefix`. Returns the count.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str;
}
