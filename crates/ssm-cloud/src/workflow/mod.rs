// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable multi-step workflows.
//!
//! A workflow is an ordered list of actions persisted with the workflow row.
//! The [`WorkflowDriver`] periodically picks up every pending workflow and
//! executes its first pending action through the handler registered for the
//! action's type. Handlers report an [`ActionOutcome`]; the driver applies it
//! to the action record and persists the re-derived workflow status, so a
//! workflow resumes on any instance after a restart.
//!
//! ```text
//! create-agent → wait-for-online → install-server → wait-for-installed
//!              → start-server → wait-for-running → claim-server
//! ```

pub mod actions;
mod driver;
pub mod model;

pub use driver::WorkflowDriver;
pub use model::{MAX_ACTION_RETRIES, Status, Workflow, WorkflowAction, derive_status};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;

use crate::db::workflows;
use crate::error::{Error, Result};
use crate::ids::{generate_api_key, is_valid_api_key};
use crate::outbox::Outbox;

/// Workflow type of the agent provisioning flow.
pub const CREATE_AGENT_WORKFLOW: &str = "create-agent";

/// Result of one successful handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action is done.
    Completed,
    /// Not done yet; run it again next tick.
    Waiting,
}

/// What a handler can see and touch.
pub struct ActionContext<'a> {
    /// Store.
    pub pool: &'a PgPool,
    /// Event outbox.
    pub outbox: &'a Outbox,
    /// Workflow being driven.
    pub workflow_id: &'a str,
    /// Owning account.
    pub account_id: &'a str,
    /// Workflow payload shared by all actions.
    pub data: &'a Value,
}

impl ActionContext<'_> {
    /// Decode the workflow payload.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| Error::Validation(format!("workflow data: {e}")))
    }
}

/// Executes one action type.
///
/// Returning an error fails the action with the error's message.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Run the action once.
    async fn execute(&self, action: &WorkflowAction, ctx: &ActionContext<'_>)
    -> Result<ActionOutcome>;
}

/// Handlers keyed by action type.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every create-agent action.
    pub fn with_create_agent_actions() -> Self {
        let mut registry = Self::new();
        actions::register_create_agent_actions(&mut registry);
        registry
    }

    /// Register `handler` for `action_type`, replacing any previous one.
    pub fn register(&mut self, action_type: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(action_type.into(), handler);
    }

    /// Handler for `action_type`.
    pub fn get(&self, action_type: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(action_type)
    }

    /// Whether a handler is registered for `action_type`.
    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }
}

/// Payload of a create-agent workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentData {
    /// Name of the new agent.
    pub agent_name: String,
    /// Game port.
    pub port: i32,
    /// Memory allotment.
    pub memory: i64,
    /// Credential for the agent. Generated when absent.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Admin password passed to `claimserver`.
    #[serde(default)]
    pub admin_pass: String,
    /// Client password passed to `claimserver`.
    #[serde(default)]
    pub client_pass: String,
}

/// Start a create-agent workflow for `account_id`.
///
/// An API key is generated and stored in the payload when none is given, so
/// every later action sees the same key.
pub async fn create_agent_workflow(
    pool: &PgPool,
    account_id: &str,
    mut data: CreateAgentData,
) -> Result<Workflow> {
    data.agent_name = data.agent_name.trim().to_string();
    if data.agent_name.is_empty() {
        return Err(Error::Validation("agent name is required".to_string()));
    }
    if !(1..=65535).contains(&data.port) {
        return Err(Error::Validation(format!("invalid port: {}", data.port)));
    }
    if data.memory < 0 {
        return Err(Error::Validation(format!("invalid memory: {}", data.memory)));
    }

    let api_key = match data.api_key.take().filter(|k| !k.trim().is_empty()) {
        Some(key) if is_valid_api_key(&key) => key,
        Some(_) => return Err(Error::Validation("malformed api key".to_string())),
        None => generate_api_key(),
    };
    data.api_key = Some(api_key);

    let actions: Vec<WorkflowAction> = actions::CREATE_AGENT_ACTIONS
        .iter()
        .map(|a| WorkflowAction::new(*a))
        .collect();

    let workflow = workflows::insert_workflow(
        pool,
        CREATE_AGENT_WORKFLOW,
        account_id,
        &actions,
        &serde_json::to_value(&data)?,
    )
    .await?;

    info!(
        workflow_id = %workflow.workflow_id,
        account_id = %account_id,
        agent_name = %data.agent_name,
        "Create-agent workflow started"
    );
    Ok(workflow)
}

/// Get a workflow of `account_id`.
pub async fn get_account_workflow(pool: &PgPool, account_id: &str, workflow_id: &str) -> Result<Workflow> {
    workflows::get_workflow(pool, workflow_id)
        .await?
        .filter(|w| w.account_id == account_id)
        .ok_or_else(|| Error::NotFound("Workflow".to_string()))
}
