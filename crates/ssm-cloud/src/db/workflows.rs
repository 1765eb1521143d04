// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow rows.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;

use crate::ids::new_id;
use crate::workflow::model::{Status, Workflow, WorkflowAction};

#[derive(sqlx::FromRow)]
struct WorkflowRow {
    workflow_id: String,
    workflow_type: String,
    account_id: String,
    status: String,
    actions: Json<Vec<WorkflowAction>>,
    data: Json<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = sqlx::Error;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<Status>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;
        Ok(Workflow {
            workflow_id: row.workflow_id,
            workflow_type: row.workflow_type,
            account_id: row.account_id,
            status,
            actions: row.actions.0,
            data: row.data.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Insert a workflow with pending status.
pub async fn insert_workflow(
    pool: &PgPool,
    workflow_type: &str,
    account_id: &str,
    actions: &[WorkflowAction],
    data: &serde_json::Value,
) -> Result<Workflow, sqlx::Error> {
    let row = sqlx::query_as::<_, WorkflowRow>(
        r#"
        INSERT INTO workflows (workflow_id, workflow_type, account_id, status, actions, data)
        VALUES ($1, $2, $3, '', $4, $5)
        RETURNING workflow_id, workflow_type, account_id, status, actions, data,
                  created_at, updated_at
        "#,
    )
    .bind(new_id())
    .bind(workflow_type)
    .bind(account_id)
    .bind(Json(actions))
    .bind(Json(data))
    .fetch_one(pool)
    .await?;
    row.try_into()
}

/// Get a workflow by id.
pub async fn get_workflow(pool: &PgPool, workflow_id: &str) -> Result<Option<Workflow>, sqlx::Error> {
    sqlx::query_as::<_, WorkflowRow>(
        r#"
        SELECT workflow_id, workflow_type, account_id, status, actions, data,
               created_at, updated_at
        FROM workflows
        WHERE workflow_id = $1
        "#,
    )
    .bind(workflow_id)
    .fetch_optional(pool)
    .await?
    .map(Workflow::try_from)
    .transpose()
}

/// Workflows still pending, oldest first.
pub async fn list_active_workflows(pool: &PgPool) -> Result<Vec<Workflow>, sqlx::Error> {
    sqlx::query_as::<_, WorkflowRow>(
        r#"
        SELECT workflow_id, workflow_type, account_id, status, actions, data,
               created_at, updated_at
        FROM workflows
        WHERE status = ''
        ORDER BY created_at
        "#,
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(Workflow::try_from)
    .collect()
}

/// Persist the action array and aggregate status.
pub async fn save_workflow_progress(
    pool: &PgPool,
    workflow_id: &str,
    status: Status,
    actions: &[WorkflowAction],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE workflows
        SET status = $2, actions = $3, updated_at = NOW()
        WHERE workflow_id = $1
        "#,
    )
    .bind(workflow_id)
    .bind(status.as_str())
    .bind(Json(actions))
    .execute(pool)
    .await?;
    Ok(())
}
