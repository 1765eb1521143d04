// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic workflow driver.

use async_trait::async_trait;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::model::{Status, Workflow, derive_status};
use super::{ActionContext, ActionOutcome, ActionRegistry};
use crate::db::workflows;
use crate::error::Result;
use crate::job_runner::PeriodicJob;
use crate::outbox::Outbox;

/// Advances every pending workflow by one action per tick.
pub struct WorkflowDriver {
    pool: PgPool,
    outbox: Outbox,
    actions: ActionRegistry,
}

impl WorkflowDriver {
    /// Create a driver dispatching to `actions`.
    pub fn new(pool: PgPool, outbox: Outbox, actions: ActionRegistry) -> Self {
        Self {
            pool,
            outbox,
            actions,
        }
    }

    /// Drive every pending workflow once. Returns the number persisted.
    pub async fn tick_once(&self, cancel: &CancellationToken) -> Result<usize> {
        let pending = workflows::list_active_workflows(&self.pool).await?;
        if pending.is_empty() {
            debug!("No pending workflows");
            return Ok(0);
        }

        let mut advanced = 0;
        for mut workflow in pending {
            if cancel.is_cancelled() {
                break;
            }
            self.step(&mut workflow).await;
            match workflows::save_workflow_progress(
                &self.pool,
                &workflow.workflow_id,
                workflow.status,
                &workflow.actions,
            )
            .await
            {
                Ok(()) => advanced += 1,
                Err(e) => error!(
                    workflow_id = %workflow.workflow_id,
                    error = %e,
                    "Failed to save workflow progress"
                ),
            }
        }
        Ok(advanced)
    }

    /// Execute the first pending action and re-derive the workflow status.
    pub async fn step(&self, workflow: &mut Workflow) {
        let status = derive_status(&workflow.actions);
        if status != Status::Pending {
            workflow.status = status;
            return;
        }

        let Some(index) = workflow.next_action_index() else {
            workflow.status = derive_status(&workflow.actions);
            return;
        };

        let outcome = match self.actions.get(&workflow.actions[index].action_type) {
            None => None,
            Some(handler) => {
                let ctx = ActionContext {
                    pool: &self.pool,
                    outbox: &self.outbox,
                    workflow_id: &workflow.workflow_id,
                    account_id: &workflow.account_id,
                    data: &workflow.data,
                };
                Some(handler.execute(&workflow.actions[index], &ctx).await)
            }
        };

        let action = &mut workflow.actions[index];
        match outcome {
            None => {
                warn!(
                    workflow_id = %workflow.workflow_id,
                    action = %action.action_type,
                    "No handler for workflow action"
                );
                let message = format!("no handler registered for action {}", action.action_type);
                action.fail(message);
            }
            Some(Ok(ActionOutcome::Completed)) => {
                debug!(
                    workflow_id = %workflow.workflow_id,
                    action = %action.action_type,
                    "Workflow action completed"
                );
                action.complete();
            }
            Some(Ok(ActionOutcome::Waiting)) => action.wait(),
            Some(Err(e)) => {
                error!(
                    workflow_id = %workflow.workflow_id,
                    action = %action.action_type,
                    error = %e,
                    "Workflow action failed"
                );
                action.fail(e.to_string());
            }
        }

        workflow.status = derive_status(&workflow.actions);
        if workflow.status != Status::Pending {
            info!(
                workflow_id = %workflow.workflow_id,
                workflow_type = %workflow.workflow_type,
                status = %workflow.status,
                "Workflow finished"
            );
        }
    }
}

#[async_trait]
impl PeriodicJob for WorkflowDriver {
    fn name(&self) -> &'static str {
        "workflowJob"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.tick_once(&cancel).await.map(|_| ())
    }
}
