// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agent operations of account members.

use sqlx::PgPool;
use tracing::info;

use crate::db::accounts;
use crate::db::agents::{self, Agent, AgentSettings};
use crate::db::logs::{self, AgentLog, LogSource};
use crate::error::{Error, Result};
use crate::ids::is_valid_id;
use crate::storage::{ArtifactKind, ObjectStorage, ObjectStream, agent_prefix, object_key};

/// Audit type written when an agent is deleted.
pub const AUDIT_AGENT_REMOVED: &str = "AgentRemovedFromAccount";

/// Get an agent owned by `account_id`.
pub async fn get_account_agent(pool: &PgPool, account_id: &str, agent_id: &str) -> Result<Agent> {
    if !is_valid_id(agent_id) {
        return Err(Error::Validation(format!("malformed agent id: {agent_id}")));
    }
    agents::get_agent(pool, agent_id)
        .await?
        .filter(|a| a.account_id == account_id)
        .ok_or_else(|| Error::NotFound("Agent".to_string()))
}

/// Agents of an account.
pub async fn list_agents(pool: &PgPool, account_id: &str) -> Result<Vec<Agent>> {
    Ok(agents::list_account_agents(pool, account_id).await?)
}

/// Replace the user-editable settings of an agent.
pub async fn update_settings(
    pool: &PgPool,
    account_id: &str,
    agent_id: &str,
    settings: &AgentSettings,
) -> Result<Agent> {
    if settings.backup_interval < 0.0 {
        return Err(Error::Validation("backup interval must not be negative".to_string()));
    }
    if settings.backup_keep_amount < 0 {
        return Err(Error::Validation("backup keep amount must not be negative".to_string()));
    }
    if settings.server_config.max_players < 1 {
        return Err(Error::Validation("max players must be at least 1".to_string()));
    }

    let agent = get_account_agent(pool, account_id, agent_id).await?;
    agents::update_settings(pool, &agent.agent_id, settings).await?;
    get_account_agent(pool, account_id, agent_id).await
}

/// Delete an agent and purge its objects.
pub async fn delete_agent(
    pool: &PgPool,
    storage: &dyn ObjectStorage,
    account_id: &str,
    agent_id: &str,
) -> Result<()> {
    let agent = get_account_agent(pool, account_id, agent_id).await?;

    let removed = storage
        .delete_prefix(&agent_prefix(account_id, &agent.agent_id))
        .await?;
    agents::delete_agent(pool, &agent.agent_id).await?;
    accounts::append_audit(
        pool,
        account_id,
        AUDIT_AGENT_REMOVED,
        &format!("Agent ({}) has been removed from the account", agent.agent_name),
    )
    .await?;

    info!(
        agent_id = %agent.agent_id,
        account_id = %account_id,
        objects_removed = removed,
        "Agent deleted"
    );
    Ok(())
}

/// Log document of an agent for one source.
pub async fn get_agent_log(
    pool: &PgPool,
    account_id: &str,
    agent_id: &str,
    source: LogSource,
) -> Result<AgentLog> {
    let agent = get_account_agent(pool, account_id, agent_id).await?;
    logs::get_log(pool, &agent.agent_id, source)
        .await?
        .ok_or_else(|| Error::NotFound(format!("{source} log")))
}

/// Open a save, backup or log artifact of an agent for download.
///
/// The body is streamed from object storage, never buffered whole.
pub async fn download_artifact(
    pool: &PgPool,
    storage: &dyn ObjectStorage,
    account_id: &str,
    agent_id: &str,
    kind: ArtifactKind,
    file_name: &str,
) -> Result<ObjectStream> {
    if file_name.is_empty() || file_name.contains('/') || file_name.contains("..") {
        return Err(Error::Validation(format!("invalid file name: {file_name}")));
    }
    let agent = get_account_agent(pool, account_id, agent_id).await?;
    storage
        .get_stream(&object_key(account_id, &agent.agent_id, kind, file_name))
        .await
}
