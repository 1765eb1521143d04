// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-agent task queue.
//!
//! Tasks are appended and polled as a whole list; the agent reports back
//! per task. Completed tasks and tasks retried more than
//! [`MAX_TASK_RETRIES`] times are removed by the pruner.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgExecutor, PgPool};
use sqlx::types::Json;

use crate::ids::new_id;

/// Tasks with more retries than this are pruned.
pub const MAX_TASK_RETRIES: i32 = 30;

/// Task row.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTask {
    /// Identity.
    pub task_id: String,
    /// Owning agent.
    pub agent_id: String,
    /// Action tag, e.g. `installsfserver`.
    pub action: String,
    /// Opaque payload.
    pub data: Json<serde_json::Value>,
    /// Agent reported completion.
    pub completed: bool,
    /// Agent-side failure count.
    pub retries: i32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Append a task.
pub async fn enqueue_task<'e>(
    executor: impl PgExecutor<'e>,
    agent_id: &str,
    action: &str,
    data: &serde_json::Value,
) -> Result<AgentTask, sqlx::Error> {
    sqlx::query_as::<_, AgentTask>(
        r#"
        INSERT INTO agent_tasks (task_id, agent_id, action, data)
        VALUES ($1, $2, $3, $4)
        RETURNING task_id, agent_id, action, data, completed, retries, created_at, updated_at
        "#,
    )
    .bind(new_id())
    .bind(agent_id)
    .bind(action)
    .bind(Json(data))
    .fetch_one(executor)
    .await
}

/// Tasks of an agent in enqueue order.
pub async fn list_tasks(pool: &PgPool, agent_id: &str) -> Result<Vec<AgentTask>, sqlx::Error> {
    sqlx::query_as::<_, AgentTask>(
        r#"
        SELECT task_id, agent_id, action, data, completed, retries, created_at, updated_at
        FROM agent_tasks
        WHERE agent_id = $1
        ORDER BY seq
        "#,
    )
    .bind(agent_id)
    .fetch_all(pool)
    .await
}

/// Whether the agent has a task with `action`, completed or not.
pub async fn has_task(pool: &PgPool, agent_id: &str, action: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM agent_tasks WHERE agent_id = $1 AND action = $2)",
    )
    .bind(agent_id)
    .bind(action)
    .fetch_one(pool)
    .await
}

/// Set `completed = true`. Returns whether the task exists.
pub async fn mark_task_completed(
    pool: &PgPool,
    agent_id: &str,
    task_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE agent_tasks SET completed = TRUE, updated_at = NOW()
        WHERE agent_id = $1 AND task_id = $2
        "#,
    )
    .bind(agent_id)
    .bind(task_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Increment `retries`. Returns whether the task exists.
pub async fn mark_task_failed(
    pool: &PgPool,
    agent_id: &str,
    task_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE agent_tasks SET retries = retries + 1, updated_at = NOW()
        WHERE agent_id = $1 AND task_id = $2
        "#,
    )
    .bind(agent_id)
    .bind(task_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Drop completed tasks and tasks past the retry cap, across all agents.
pub async fn prune_tasks(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM agent_tasks WHERE completed OR retries > $1")
        .bind(MAX_TASK_RETRIES)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
