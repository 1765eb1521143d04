// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agent registry.
//!
//! The operations remote agents and the transport layer perform on agent
//! rows: credential lookup, status ingestion with online/offline edge
//! events, config updates, and artifact bookkeeping (saves, backups, logs).

use std::time::Duration;

use serde_json::{Map, Value, json};
use sqlx::PgPool;
use tracing::{debug, error, info};

use crate::db::agents::{self, Agent, AgentStatus, FileIdentity};
use crate::db::logs::{self, LogSource};
use crate::db::stats;
use crate::error::{Error, Result};
use crate::ids::{SHORT_ID_LEN, is_valid_api_key};
use crate::outbox::{AGENT_OFFLINE, AGENT_ONLINE, Outbox};

/// Default retention of stat samples.
pub const DEFAULT_STATS_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Online/offline transition observed by a status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineEdge {
    /// offline → online.
    CameOnline,
    /// online → offline.
    WentOffline,
}

/// Edge between the previous and new `online` flag, if any.
pub fn online_edge(previous: bool, current: bool) -> Option<OnlineEdge> {
    match (previous, current) {
        (false, true) => Some(OnlineEdge::CameOnline),
        (true, false) => Some(OnlineEdge::WentOffline),
        _ => None,
    }
}

/// Event payload naming an agent.
pub fn agent_event_data(agent_name: &str) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("agent_name".to_string(), json!(agent_name));
    data
}

/// Persistent set of agents keyed by API key.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    pool: PgPool,
    outbox: Outbox,
    stats_retention: Duration,
}

impl AgentRegistry {
    /// Create a registry.
    pub fn new(pool: PgPool, outbox: Outbox) -> Self {
        Self {
            pool,
            outbox,
            stats_retention: DEFAULT_STATS_RETENTION,
        }
    }

    /// Set the stat sample retention window.
    pub fn with_stats_retention(mut self, retention: Duration) -> Self {
        self.stats_retention = retention;
        self
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The outbox events are written to.
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Look up an agent by API key.
    pub async fn get_by_api_key(&self, api_key: &str) -> Result<Agent> {
        agents::get_agent_by_api_key(&self.pool, api_key)
            .await?
            .ok_or_else(|| Error::NotFound("Agent".to_string()))
    }

    /// Resolve the agent behind a remote call and bump its `last_comm_date`.
    ///
    /// Missing, malformed or unknown keys are all authentication failures.
    pub async fn authenticate(&self, api_key: Option<&str>) -> Result<Agent> {
        let key = api_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::AuthFailed("missing api key".to_string()))?;

        if !is_valid_api_key(key) {
            return Err(Error::AuthFailed("invalid api key".to_string()));
        }

        let agent = agents::get_agent_by_api_key(&self.pool, key)
            .await?
            .ok_or_else(|| Error::AuthFailed("invalid api key".to_string()))?;

        agents::touch_last_comm(&self.pool, &agent.agent_id).await?;
        Ok(agent)
    }

    /// Look up an agent by the last 8 characters of its id.
    pub async fn get_by_short_id(&self, short_id: &str) -> Result<Agent> {
        if short_id.len() != SHORT_ID_LEN || !short_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Validation(format!("invalid short agent id: {short_id}")));
        }

        let mut matches =
            agents::find_agents_by_id_suffix(&self.pool, &short_id.to_ascii_lowercase(), 2).await?;
        match matches.len() {
            0 => Err(Error::NotFound("Agent".to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(Error::Validation(format!(
                "short agent id {short_id} is ambiguous"
            ))),
        }
    }

    /// Ingest one status frame.
    ///
    /// Records a stat sample (pruning the window), commits the status, bumps
    /// `last_comm_date`, and enqueues `agent.online` / `agent.offline` on an
    /// edge. Returns the edge, if any.
    pub async fn update_status(
        &self,
        agent: &Agent,
        status: &AgentStatus,
    ) -> Result<Option<OnlineEdge>> {
        stats::insert_sample(&self.pool, &agent.agent_id, status.cpu, status.ram, status.running)
            .await?;
        stats::prune_samples(&self.pool, &agent.agent_id, self.stats_retention).await?;

        let previous = agents::update_status(&self.pool, &agent.agent_id, status)
            .await?
            .ok_or_else(|| Error::NotFound("Agent".to_string()))?;

        let edge = online_edge(previous, status.online);
        if let Some(edge) = edge {
            let event_type = match edge {
                OnlineEdge::CameOnline => AGENT_ONLINE,
                OnlineEdge::WentOffline => AGENT_OFFLINE,
            };
            info!(agent_id = %agent.agent_id, event = event_type, "Agent online state changed");
            // Status is already committed; a failed enqueue only loses the notification.
            if let Err(e) = self
                .outbox
                .enqueue(&agent.account_id, event_type, agent_event_data(&agent.agent_name))
                .await
            {
                error!(agent_id = %agent.agent_id, error = %e, "Failed to enqueue online event");
            }
        }

        Ok(edge)
    }

    /// Set agent-reported version and IP.
    pub async fn update_config(&self, agent: &Agent, version: &str, ip: &str) -> Result<()> {
        agents::update_version_ip(&self.pool, &agent.agent_id, version, ip).await?;
        debug!(agent_id = %agent.agent_id, version = %version, ip = %ip, "Agent config updated");
        Ok(())
    }

    /// Insert or update a save by file name.
    pub async fn upsert_save(
        &self,
        agent: &Agent,
        file: &FileIdentity,
        update_mod_time: bool,
    ) -> Result<()> {
        agents::upsert_save(&self.pool, &agent.agent_id, file, update_mod_time).await?;
        Ok(())
    }

    /// Replace the save list with the agent's view.
    pub async fn sync_saves(&self, agent: &Agent, files: &[FileIdentity]) -> Result<()> {
        agents::replace_saves(&self.pool, &agent.agent_id, files).await?;
        Ok(())
    }

    /// Append a backup.
    pub async fn append_backup(&self, agent: &Agent, file: &FileIdentity) -> Result<()> {
        agents::append_backup(&self.pool, &agent.agent_id, file).await?;
        Ok(())
    }

    /// Create or replace the log buffer for the file's source.
    pub async fn upsert_log(
        &self,
        agent: &Agent,
        file_name: &str,
        lines: &[String],
    ) -> Result<LogSource> {
        let source = LogSource::from_file_name(file_name);
        logs::upsert_log(&self.pool, &agent.agent_id, source, file_name, lines).await?;
        Ok(source)
    }

    /// Append one streamed log line. `false` when no document exists yet.
    pub async fn append_log_line(
        &self,
        agent: &Agent,
        source: LogSource,
        line: &str,
        initial: bool,
    ) -> Result<bool> {
        Ok(logs::append_log_line(&self.pool, &agent.agent_id, source, line, initial).await?)
    }
}
