// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Drops finished agent tasks.

use async_trait::async_trait;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::db::tasks;
use crate::error::Result;
use crate::job_runner::PeriodicJob;

/// Removes tasks that are completed or retried more than 30 times.
pub struct TaskPruner {
    pool: PgPool,
}

impl TaskPruner {
    /// Create a new pruner.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Prune once. Returns the number of removed tasks.
    pub async fn prune_once(&self) -> Result<u64> {
        let removed = tasks::prune_tasks(&self.pool).await?;
        if removed > 0 {
            info!(removed, "Pruned agent tasks");
        } else {
            debug!("No agent tasks to prune");
        }
        Ok(removed)
    }
}

#[async_trait]
impl PeriodicJob for TaskPruner {
    fn name(&self) -> &'static str {
        "pruneAgentTasksJob"
    }

    async fn run(&self, _cancel: CancellationToken) -> Result<()> {
        self.prune_once().await.map(|_| ())
    }
}
