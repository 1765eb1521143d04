// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agent stat samples (sliding window time series).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

/// One `(timestamp, cpu, ram, running)` sample.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatSample {
    /// CPU percentage.
    pub cpu: f64,
    /// RAM percentage.
    pub ram: f64,
    /// Game server running.
    pub running: bool,
    /// Sample time.
    pub created_at: DateTime<Utc>,
}

/// Record a sample.
pub async fn insert_sample(
    pool: &PgPool,
    agent_id: &str,
    cpu: f64,
    ram: f64,
    running: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO agent_stats (agent_id, cpu, ram, running) VALUES ($1, $2, $3, $4)")
        .bind(agent_id)
        .bind(cpu)
        .bind(ram)
        .bind(running)
        .execute(pool)
        .await?;
    Ok(())
}

/// Drop samples older than `retention`.
pub async fn prune_samples(
    pool: &PgPool,
    agent_id: &str,
    retention: Duration,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM agent_stats
        WHERE agent_id = $1 AND created_at < NOW() - make_interval(secs => $2)
        "#,
    )
    .bind(agent_id)
    .bind(retention.as_secs_f64())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Samples of an agent, oldest first.
pub async fn list_samples(pool: &PgPool, agent_id: &str) -> Result<Vec<StatSample>, sqlx::Error> {
    sqlx::query_as::<_, StatSample>(
        r#"
        SELECT cpu, ram, running, created_at
        FROM agent_stats
        WHERE agent_id = $1
        ORDER BY created_at, id
        "#,
    )
    .bind(agent_id)
    .fetch_all(pool)
    .await
}
