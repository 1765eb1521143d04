// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agent protocol handlers.
//!
//! Transport-independent implementations of every agent call. The gRPC
//! services and the legacy HTTP routes authenticate the agent, then call
//! into these functions and only translate the request/response shapes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::db;
use crate::db::agents::{Agent, AgentStatus, FileIdentity, ModConfig, ServerConfig};
use crate::db::logs::LogSource;
use crate::db::tasks::{self, AgentTask};
use crate::error::{Error, Result};
use crate::registry::{AgentRegistry, OnlineEdge};
use crate::storage::{ArtifactKind, ObjectStorage, object_key};
use crate::streams::StreamRegistry;

/// Shared state for agent handlers.
pub struct AgentHandlerState {
    /// Agent registry (store + outbox).
    pub registry: AgentRegistry,
    /// Artifact store.
    pub storage: Arc<dyn ObjectStorage>,
    /// Open agent streams.
    pub streams: StreamRegistry,
    /// Directory for upload temp files.
    pub temp_dir: PathBuf,
    /// When the server started (for uptime calculation).
    pub start_time: std::time::Instant,
    /// Server version string.
    pub version: String,
}

impl AgentHandlerState {
    /// Create a new handler state.
    pub fn new(
        registry: AgentRegistry,
        storage: Arc<dyn ObjectStorage>,
        streams: StreamRegistry,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            storage,
            streams,
            temp_dir,
            start_time: std::time::Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Get the server uptime in milliseconds.
    pub fn uptime_ms(&self) -> i64 {
        self.start_time.elapsed().as_millis() as i64
    }
}

// ============================================================================
// Health Check
// ============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResponse {
    /// Database reachable.
    pub healthy: bool,
    /// Server version.
    pub version: String,
    /// Uptime in milliseconds.
    pub uptime_ms: i64,
}

/// Handle health check request.
pub async fn handle_health_check(state: &AgentHandlerState) -> HealthCheckResponse {
    let db_healthy = db::health_check(state.registry.pool()).await.unwrap_or(false);

    HealthCheckResponse {
        healthy: db_healthy,
        version: state.version.clone(),
        uptime_ms: state.uptime_ms(),
    }
}

// ============================================================================
// Config
// ============================================================================

/// Agent config as served to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfigView {
    /// Agent software version.
    pub version: String,
    /// Public IP.
    pub ip: String,
    /// Game port.
    pub port: i32,
    /// Memory allotment.
    pub memory: i64,
    /// Hours between backups.
    pub backup_interval: f32,
    /// Number of backups kept.
    pub backup_keep_amount: i32,
    /// Agent self-update enabled.
    pub auto_update: bool,
    /// Game server settings.
    pub server_config: ServerConfig,
}

impl From<&Agent> for AgentConfigView {
    fn from(agent: &Agent) -> Self {
        Self {
            version: agent.version.clone(),
            ip: agent.ip.clone(),
            port: agent.port,
            memory: agent.memory,
            backup_interval: agent.backup_interval,
            backup_keep_amount: agent.backup_keep_amount,
            auto_update: agent.auto_update,
            server_config: agent.server_config.0.clone(),
        }
    }
}

/// Handle GetAgentConfig.
pub fn handle_get_agent_config(agent: &Agent) -> AgentConfigView {
    AgentConfigView::from(agent)
}

/// Handle UpdateAgentConfigVersionIp.
pub async fn handle_update_agent_config(
    state: &AgentHandlerState,
    agent: &Agent,
    version: &str,
    ip: &str,
) -> Result<()> {
    state.registry.update_config(agent, version.trim(), ip.trim()).await
}

// ============================================================================
// State
// ============================================================================

/// Handle UpdateAgentState (unary).
pub async fn handle_update_agent_state(
    state: &AgentHandlerState,
    agent: &Agent,
    status: &AgentStatus,
) -> Result<Option<OnlineEdge>> {
    state.registry.update_status(agent, status).await
}

// ============================================================================
// Tasks
// ============================================================================

/// Handle GetAgentTasks.
pub async fn handle_get_agent_tasks(state: &AgentHandlerState, agent: &Agent) -> Result<Vec<AgentTask>> {
    Ok(tasks::list_tasks(state.registry.pool(), &agent.agent_id).await?)
}

/// Handle MarkAgentTaskCompleted. Repeated calls are no-ops.
pub async fn handle_mark_task_completed(
    state: &AgentHandlerState,
    agent: &Agent,
    task_id: &str,
) -> Result<()> {
    if !tasks::mark_task_completed(state.registry.pool(), &agent.agent_id, task_id).await? {
        return Err(Error::NotFound(format!("Task {task_id}")));
    }
    debug!(agent_id = %agent.agent_id, task_id = %task_id, "Task completed");
    Ok(())
}

/// Handle MarkAgentTaskFailed.
pub async fn handle_mark_task_failed(
    state: &AgentHandlerState,
    agent: &Agent,
    task_id: &str,
) -> Result<()> {
    if !tasks::mark_task_failed(state.registry.pool(), &agent.agent_id, task_id).await? {
        return Err(Error::NotFound(format!("Task {task_id}")));
    }
    debug!(agent_id = %agent.agent_id, task_id = %task_id, "Task failed");
    Ok(())
}

// ============================================================================
// Mod config
// ============================================================================

/// Handle GetModConfig.
pub fn handle_get_mod_config(agent: &Agent) -> ModConfig {
    agent.mod_config.0.clone()
}

/// Merge the agent's view of its mods into the stored selection.
///
/// The agent reports what it installed; the selection itself and the
/// desired versions stay owned by the account's users.
pub fn merge_reported_mods(stored: &mut ModConfig, reported: &ModConfig) {
    for selected in &mut stored.selected_mods {
        if let Some(report) = reported
            .selected_mods
            .iter()
            .find(|r| r.mod_reference == selected.mod_reference)
        {
            selected.installed = report.installed;
            selected.installed_version = report.installed_version.clone();
        }
    }
}

/// Handle UpdateModConfig.
///
/// Merges into the stored config under the row lock, not into the snapshot
/// taken at authentication.
pub async fn handle_update_mod_config(
    state: &AgentHandlerState,
    agent: &Agent,
    reported: &ModConfig,
) -> Result<ModConfig> {
    let mut tx = state.registry.pool().begin().await?;
    let mut config = db::agents::lock_mod_config(&mut *tx, &agent.agent_id)
        .await?
        .ok_or_else(|| Error::NotFound("Agent".to_string()))?;
    merge_reported_mods(&mut config, reported);
    db::agents::update_mod_config(&mut *tx, &agent.agent_id, &config).await?;
    tx.commit().await?;
    Ok(config)
}

// ============================================================================
// Uploads
// ============================================================================

/// Strip directories from a client-supplied file name.
pub fn sanitize_file_name(raw: &str) -> Result<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::Validation(format!("invalid file name: {raw:?}")));
    }
    Ok(name.to_string())
}

/// Store an uploaded artifact and record it on the agent.
///
/// `path` is a local temp file holding the upload. Saves are upserted by
/// file name, backups appended, and logs replace the buffer of the source
/// derived from the file name.
pub async fn handle_upload(
    state: &AgentHandlerState,
    agent: &Agent,
    kind: ArtifactKind,
    file_name: &str,
    path: &Path,
) -> Result<FileIdentity> {
    let file_name = sanitize_file_name(file_name)?;
    let size = tokio::fs::metadata(path).await?.len() as i64;
    let key = object_key(&agent.account_id, &agent.agent_id, kind, &file_name);

    state.storage.put_file(&key, path).await?;

    let file = FileIdentity {
        file_name: file_name.clone(),
        size,
        mod_time: Some(Utc::now()),
        file_url: key,
    };

    match kind {
        ArtifactKind::Saves => state.registry.upsert_save(agent, &file, true).await?,
        ArtifactKind::Backups => state.registry.append_backup(agent, &file).await?,
        ArtifactKind::Logs => {
            let content = tokio::fs::read_to_string(path).await?;
            let lines: Vec<String> = content.lines().map(str::to_string).collect();
            let source: LogSource = state.registry.upsert_log(agent, &file_name, &lines).await?;
            debug!(agent_id = %agent.agent_id, source = %source, lines = lines.len(), "Log replaced");
        }
    }

    info!(
        agent_id = %agent.agent_id,
        kind = %kind,
        file_name = %file.file_name,
        size = file.size,
        "Artifact uploaded"
    );
    Ok(file)
}

/// Replace the agent's save list with its own view.
pub async fn handle_sync_saves(
    state: &AgentHandlerState,
    agent: &Agent,
    files: &[FileIdentity],
) -> Result<()> {
    state.registry.sync_saves(agent, files).await
}
