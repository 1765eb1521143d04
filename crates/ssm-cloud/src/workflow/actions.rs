// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Create-agent action handlers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, info};

use super::{ActionContext, ActionHandler, ActionOutcome, ActionRegistry, CreateAgentData};
use crate::db::accounts;
use crate::db::agents::{self, Agent, AgentStatus, NewAgent};
use crate::db::tasks;
use crate::error::{Error, Result};
use crate::outbox::AGENT_CREATED;
use crate::registry::agent_event_data;
use crate::workflow::model::WorkflowAction;

/// Action types of the create-agent flow, in execution order.
pub const CREATE_AGENT_ACTIONS: [&str; 7] = [
    "create-agent",
    "wait-for-online",
    "install-server",
    "wait-for-installed",
    "start-server",
    "wait-for-running",
    "claim-server",
];

/// Audit type written when an agent joins an account.
pub const AUDIT_AGENT_ADDED: &str = "AgentAddedToAccount";

/// Task installing the dedicated server.
pub const TASK_INSTALL_SERVER: &str = "installsfserver";
/// Task starting the dedicated server.
pub const TASK_START_SERVER: &str = "startsfserver";
/// Task claiming the dedicated server with the admin/client passwords.
pub const TASK_CLAIM_SERVER: &str = "claimserver";

pub(super) fn register_create_agent_actions(registry: &mut ActionRegistry) {
    registry.register("create-agent", Arc::new(CreateAgent));
    registry.register("wait-for-online", Arc::new(WaitForStatus::Online));
    registry.register("install-server", Arc::new(EnqueueTask::InstallServer));
    registry.register("wait-for-installed", Arc::new(WaitForStatus::Installed));
    registry.register("start-server", Arc::new(EnqueueTask::StartServer));
    registry.register("wait-for-running", Arc::new(WaitForStatus::Running));
    registry.register("claim-server", Arc::new(EnqueueTask::ClaimServer));
}

async fn workflow_agent(ctx: &ActionContext<'_>, data: &CreateAgentData) -> Result<Agent> {
    agents::get_agent_by_name(ctx.pool, ctx.account_id, &data.agent_name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Agent {}", data.agent_name)))
}

/// Inserts the agent, audits it and announces `agent.created`.
pub struct CreateAgent;

#[async_trait]
impl ActionHandler for CreateAgent {
    async fn execute(
        &self,
        _action: &WorkflowAction,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome> {
        let data: CreateAgentData = ctx.decode()?;
        let api_key = data
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Validation("workflow data has no api key".to_string()))?;

        let duplicate = format!("agent with name {} already exists", data.agent_name);

        if let Some(existing) =
            agents::get_agent_by_name(ctx.pool, ctx.account_id, &data.agent_name).await?
        {
            // A previous run inserted it before the workflow row was saved.
            if existing.api_key == api_key {
                debug!(agent_id = %existing.agent_id, "Agent already created by this workflow");
                return Ok(ActionOutcome::Completed);
            }
            return Err(Error::Conflict(duplicate));
        }

        // The agent row and its audit entry commit together.
        let mut tx = ctx.pool.begin().await?;
        let agent = agents::insert_agent(
            &mut *tx,
            &NewAgent {
                account_id: ctx.account_id,
                agent_name: &data.agent_name,
                api_key,
                port: data.port,
                memory: data.memory,
            },
        )
        .await
        .map_err(|e| Error::conflict_on_unique(e, duplicate))?;

        accounts::append_audit(
            &mut *tx,
            ctx.account_id,
            AUDIT_AGENT_ADDED,
            &format!("New agent ({}) has been added to the account", agent.agent_name),
        )
        .await?;
        tx.commit().await?;

        // The agent exists now; a failed enqueue only loses the notification.
        if let Err(e) = ctx
            .outbox
            .enqueue(ctx.account_id, AGENT_CREATED, agent_event_data(&agent.agent_name))
            .await
        {
            error!(
                workflow_id = %ctx.workflow_id,
                agent_id = %agent.agent_id,
                error = %e,
                "Failed to enqueue agent.created"
            );
        }

        info!(
            workflow_id = %ctx.workflow_id,
            agent_id = %agent.agent_id,
            agent_name = %agent.agent_name,
            "Agent created"
        );
        Ok(ActionOutcome::Completed)
    }
}

/// Waits until the agent reports a status flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitForStatus {
    /// `online == true`.
    Online,
    /// `installed == true`.
    Installed,
    /// `running == true`.
    Running,
}

impl WaitForStatus {
    /// Whether `status` satisfies the wait.
    pub fn is_satisfied(self, status: &AgentStatus) -> bool {
        match self {
            WaitForStatus::Online => status.online,
            WaitForStatus::Installed => status.installed,
            WaitForStatus::Running => status.running,
        }
    }
}

#[async_trait]
impl ActionHandler for WaitForStatus {
    async fn execute(
        &self,
        _action: &WorkflowAction,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome> {
        let data: CreateAgentData = ctx.decode()?;
        let agent = workflow_agent(ctx, &data).await?;

        if self.is_satisfied(&agent.status()) {
            Ok(ActionOutcome::Completed)
        } else {
            Ok(ActionOutcome::Waiting)
        }
    }
}

/// Enqueues one agent task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueTask {
    /// `installsfserver`.
    InstallServer,
    /// `startsfserver`.
    StartServer,
    /// `claimserver` with `{adminPass, clientPass}`.
    ClaimServer,
}

impl EnqueueTask {
    /// Task action tag.
    pub fn task_action(self) -> &'static str {
        match self {
            EnqueueTask::InstallServer => TASK_INSTALL_SERVER,
            EnqueueTask::StartServer => TASK_START_SERVER,
            EnqueueTask::ClaimServer => TASK_CLAIM_SERVER,
        }
    }

    /// Task payload.
    pub fn task_data(self, data: &CreateAgentData) -> serde_json::Value {
        match self {
            EnqueueTask::ClaimServer => json!({
                "adminPass": data.admin_pass,
                "clientPass": data.client_pass,
            }),
            EnqueueTask::InstallServer | EnqueueTask::StartServer => json!({}),
        }
    }
}

#[async_trait]
impl ActionHandler for EnqueueTask {
    async fn execute(
        &self,
        _action: &WorkflowAction,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome> {
        let data: CreateAgentData = ctx.decode()?;
        let agent = workflow_agent(ctx, &data).await?;

        // A replay after a lost progress save must not queue the task twice.
        if tasks::has_task(ctx.pool, &agent.agent_id, self.task_action()).await? {
            debug!(
                workflow_id = %ctx.workflow_id,
                agent_id = %agent.agent_id,
                action = self.task_action(),
                "Agent task already enqueued"
            );
            return Ok(ActionOutcome::Completed);
        }

        let task =
            tasks::enqueue_task(ctx.pool, &agent.agent_id, self.task_action(), &self.task_data(&data))
                .await?;

        info!(
            workflow_id = %ctx.workflow_id,
            agent_id = %agent.agent_id,
            task_id = %task.task_id,
            action = %task.action,
            "Agent task enqueued"
        );
        Ok(ActionOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> CreateAgentData {
        CreateAgentData {
            agent_name: "atlas".to_string(),
            port: 15777,
            memory: 8,
            api_key: None,
            admin_pass: "p".to_string(),
            client_pass: "q".to_string(),
        }
    }

    #[test]
    fn test_wait_predicates() {
        let status = AgentStatus {
            online: true,
            installed: true,
            ..Default::default()
        };
        assert!(WaitForStatus::Online.is_satisfied(&status));
        assert!(WaitForStatus::Installed.is_satisfied(&status));
        assert!(!WaitForStatus::Running.is_satisfied(&status));
    }

    #[test]
    fn test_task_payloads() {
        assert_eq!(EnqueueTask::InstallServer.task_action(), "installsfserver");
        assert_eq!(EnqueueTask::StartServer.task_action(), "startsfserver");
        assert_eq!(EnqueueTask::ClaimServer.task_action(), "claimserver");

        assert_eq!(EnqueueTask::StartServer.task_data(&data()), json!({}));
        assert_eq!(
            EnqueueTask::ClaimServer.task_data(&data()),
            json!({"adminPass": "p", "clientPass": "q"})
        );
    }

    #[test]
    fn test_flow_order() {
        assert_eq!(CREATE_AGENT_ACTIONS[0], "create-agent");
        assert_eq!(CREATE_AGENT_ACTIONS[6], "claim-server");
    }
}
