// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persists pending log buffers to object storage.
//!
//! For each pending log the buffer is written to a temporary file, uploaded
//! to `{accountId}/{agentId}/logs/{filename}`, and the row is marked
//! uploaded. Failed uploads leave the row pending for the next run; there is
//! no attempt counter.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::db::logs::{self, PendingLog};
use crate::error::{Error, Result};
use crate::job_runner::PeriodicJob;
use crate::storage::{ArtifactKind, ObjectStorage, object_key};

/// Logs handled per run.
const BATCH_SIZE: i64 = 100;

/// Outcome of one flush run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Logs uploaded.
    pub uploaded: usize,
    /// Logs whose upload failed.
    pub failed: usize,
}

/// Flushes pending logs.
pub struct LogFlusher {
    pool: PgPool,
    storage: Arc<dyn ObjectStorage>,
    temp_dir: PathBuf,
}

impl LogFlusher {
    /// Create a new flusher writing temp files under `temp_dir`.
    pub fn new(pool: PgPool, storage: Arc<dyn ObjectStorage>, temp_dir: PathBuf) -> Self {
        Self {
            pool,
            storage,
            temp_dir,
        }
    }

    /// Flush every pending log once.
    pub async fn flush_once(&self, cancel: &CancellationToken) -> Result<FlushReport> {
        let pending = logs::list_pending_logs(&self.pool, BATCH_SIZE).await?;
        let mut report = FlushReport::default();

        if pending.is_empty() {
            debug!("No pending logs");
            return Ok(report);
        }

        for log in &pending {
            if cancel.is_cancelled() {
                break;
            }
            match self.flush_log(log).await {
                Ok(()) => report.uploaded += 1,
                Err(e) => {
                    error!(
                        log_id = %log.log_id,
                        agent_id = %log.agent_id,
                        error = %e,
                        "Failed to flush log"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(uploaded = report.uploaded, failed = report.failed, "Flushed agent logs");
        Ok(report)
    }

    async fn flush_log(&self, log: &PendingLog) -> Result<()> {
        let file = self.write_temp_file(&log.lines).await?;
        let key = object_key(&log.account_id, &log.agent_id, ArtifactKind::Logs, &log.file_name);

        self.storage.put_file(&key, file.path()).await?;
        // Deleted on upload success; a failed upload also drops it here.
        drop(file);

        logs::mark_log_uploaded(&self.pool, &log.log_id, &key, log.updated_at).await?;
        debug!(log_id = %log.log_id, key = %key, "Log uploaded");
        Ok(())
    }

    async fn write_temp_file(&self, lines: &[String]) -> Result<tempfile::NamedTempFile> {
        let dir = self.temp_dir.clone();
        let body = lines.join("\n");
        tokio::task::spawn_blocking(move || -> Result<tempfile::NamedTempFile> {
            std::fs::create_dir_all(&dir)?;
            let mut file = tempfile::Builder::new()
                .prefix("ssm-log-")
                .suffix(".log")
                .tempfile_in(&dir)?;
            file.write_all(body.as_bytes())?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(|e| Error::Other(format!("temp file task failed: {e}")))?
    }
}

#[async_trait]
impl PeriodicJob for LogFlusher {
    fn name(&self) -> &'static str {
        "flushAgentLogsJob"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.flush_once(&cancel).await.map(|_| ())
    }
}
