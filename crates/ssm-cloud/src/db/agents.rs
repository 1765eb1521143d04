// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agents, their status/config records, saves and backups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgExecutor, PgPool};
use sqlx::types::Json;

use crate::ids::new_id;

/// Columns selected for [`Agent`].
const AGENT_COLUMNS: &str = r#"
    agent_id, account_id, agent_name, api_key,
    online, installed, running, cpu, ram, installed_sf_version, latest_sf_version, last_comm_date,
    version, ip, port, memory, backup_interval, backup_keep_amount, auto_update, update_available,
    server_config, mod_config, created_at, updated_at
"#;

/// Game server settings pushed to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Player cap.
    pub max_players: i32,
    /// Server worker threads.
    pub worker_threads: i32,
    /// Steam branch (`public` or `experimental`).
    pub branch: String,
    /// Update the game server when it starts.
    pub update_on_start: bool,
    /// Restart the server process if it exits.
    pub auto_restart: bool,
    /// Pause the game when no players are connected.
    pub auto_pause: bool,
    /// Save when a player disconnects.
    pub auto_save_on_disconnect: bool,
    /// Autosave interval in seconds.
    pub autosave_interval: i32,
    /// Disable seasonal events.
    pub disable_seasonal_events: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_players: 4,
            worker_threads: 20,
            branch: "public".to_string(),
            update_on_start: true,
            auto_restart: true,
            auto_pause: true,
            auto_save_on_disconnect: true,
            autosave_interval: 300,
            disable_seasonal_events: false,
        }
    }
}

/// One mod selected on an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedMod {
    /// Catalog reference (`mods.mod_reference`).
    pub mod_reference: String,
    /// Version the user asked for.
    pub desired_version: String,
    /// Version the agent reports as installed.
    #[serde(default)]
    pub installed_version: String,
    /// Whether the agent has installed it.
    #[serde(default)]
    pub installed: bool,
    /// Catalog has a newer version than `desired_version`.
    #[serde(default)]
    pub needs_update: bool,
    /// Opaque per-mod configuration.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// The set of mods selected on an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModConfig {
    /// Selected mods.
    #[serde(default)]
    pub selected_mods: Vec<SelectedMod>,
}

/// Status record reported by the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AgentStatus {
    /// Agent process reachable.
    pub online: bool,
    /// Game server installed.
    pub installed: bool,
    /// Game server running.
    pub running: bool,
    /// CPU percentage.
    pub cpu: f64,
    /// RAM percentage.
    pub ram: f64,
    /// Installed game build.
    pub installed_sf_version: i64,
    /// Latest available game build.
    pub latest_sf_version: i64,
}

/// Agent row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Agent {
    /// Identity.
    pub agent_id: String,
    /// Owning account.
    pub account_id: String,
    /// Name, unique within the account.
    pub agent_name: String,
    /// Credential the agent authenticates with.
    pub api_key: String,
    /// Status: reachable.
    pub online: bool,
    /// Status: game installed.
    pub installed: bool,
    /// Status: game running.
    pub running: bool,
    /// Status: CPU percentage.
    pub cpu: f64,
    /// Status: RAM percentage.
    pub ram: f64,
    /// Status: installed game build.
    pub installed_sf_version: i64,
    /// Status: latest game build.
    pub latest_sf_version: i64,
    /// Last time the agent talked to us.
    pub last_comm_date: Option<DateTime<Utc>>,
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
    /// Number of backups kept by the agent.
    pub backup_keep_amount: i32,
    /// Agent self-update enabled.
    pub auto_update: bool,
    /// A newer agent release exists.
    pub update_available: bool,
    /// Game server settings.
    pub server_config: Json<ServerConfig>,
    /// Selected mods.
    pub mod_config: Json<ModConfig>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Current status record.
    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            online: self.online,
            installed: self.installed,
            running: self.running,
            cpu: self.cpu,
            ram: self.ram,
            installed_sf_version: self.installed_sf_version,
            latest_sf_version: self.latest_sf_version,
        }
    }
}

/// Values for a new agent.
#[derive(Debug, Clone)]
pub struct NewAgent<'a> {
    /// Owning account.
    pub account_id: &'a str,
    /// Agent name.
    pub agent_name: &'a str,
    /// API key.
    pub api_key: &'a str,
    /// Game port.
    pub port: i32,
    /// Memory allotment.
    pub memory: i64,
}

/// User-editable agent settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    /// Hours between backups.
    pub backup_interval: f32,
    /// Number of backups kept.
    pub backup_keep_amount: i32,
    /// Agent self-update enabled.
    pub auto_update: bool,
    /// Game server settings.
    pub server_config: ServerConfig,
}

/// File metadata reported by an agent or produced by an upload.
#[derive(Debug, Clone, PartialEq)]
pub struct FileIdentity {
    /// File name (no directories).
    pub file_name: String,
    /// Size in bytes.
    pub size: i64,
    /// Modification time on the agent.
    pub mod_time: Option<DateTime<Utc>>,
    /// Object storage key.
    pub file_url: String,
}

/// Save file row.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSave {
    /// Identity.
    pub save_id: String,
    /// Owning agent.
    pub agent_id: String,
    /// File name.
    pub file_name: String,
    /// Size in bytes.
    pub size: i64,
    /// Modification time on the agent.
    pub mod_time: Option<DateTime<Utc>>,
    /// Object storage key.
    pub file_url: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Backup file row.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentBackup {
    /// Identity.
    pub backup_id: String,
    /// Owning agent.
    pub agent_id: String,
    /// File name.
    pub file_name: String,
    /// Size in bytes.
    pub size: i64,
    /// Object storage key.
    pub file_url: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Agent that was forced offline by the liveness check.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StaleAgent {
    /// Identity.
    pub agent_id: String,
    /// Owning account.
    pub account_id: String,
    /// Agent name.
    pub agent_name: String,
}

// ============================================================================
// Agent rows
// ============================================================================

/// Insert a new agent.
pub async fn insert_agent<'e>(
    executor: impl PgExecutor<'e>,
    agent: &NewAgent<'_>,
) -> Result<Agent, sqlx::Error> {
    let query = format!(
        r#"
        INSERT INTO agents (agent_id, account_id, agent_name, api_key, port, memory, server_config)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {AGENT_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Agent>(&query)
        .bind(new_id())
        .bind(agent.account_id)
        .bind(agent.agent_name)
        .bind(agent.api_key)
        .bind(agent.port)
        .bind(agent.memory)
        .bind(Json(ServerConfig::default()))
        .fetch_one(executor)
        .await
}

/// Get an agent by id.
pub async fn get_agent(pool: &PgPool, agent_id: &str) -> Result<Option<Agent>, sqlx::Error> {
    let query = format!("SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = $1");
    sqlx::query_as::<_, Agent>(&query)
        .bind(agent_id)
        .fetch_optional(pool)
        .await
}

/// Get an agent by API key.
pub async fn get_agent_by_api_key(
    pool: &PgPool,
    api_key: &str,
) -> Result<Option<Agent>, sqlx::Error> {
    let query = format!("SELECT {AGENT_COLUMNS} FROM agents WHERE api_key = $1");
    sqlx::query_as::<_, Agent>(&query)
        .bind(api_key)
        .fetch_optional(pool)
        .await
}

/// Agents whose id ends with `suffix`. At most `limit` rows.
pub async fn find_agents_by_id_suffix(
    pool: &PgPool,
    suffix: &str,
    limit: i64,
) -> Result<Vec<Agent>, sqlx::Error> {
    let query = format!(
        "SELECT {AGENT_COLUMNS} FROM agents WHERE right(agent_id, length($1)) = $1 LIMIT $2"
    );
    sqlx::query_as::<_, Agent>(&query)
        .bind(suffix)
        .bind(limit)
        .fetch_all(pool)
        .await
}

/// Get an agent by name within an account.
pub async fn get_agent_by_name(
    pool: &PgPool,
    account_id: &str,
    agent_name: &str,
) -> Result<Option<Agent>, sqlx::Error> {
    let query =
        format!("SELECT {AGENT_COLUMNS} FROM agents WHERE account_id = $1 AND agent_name = $2");
    sqlx::query_as::<_, Agent>(&query)
        .bind(account_id)
        .bind(agent_name)
        .fetch_optional(pool)
        .await
}

/// Agents owned by an account, by name.
pub async fn list_account_agents(
    pool: &PgPool,
    account_id: &str,
) -> Result<Vec<Agent>, sqlx::Error> {
    let query =
        format!("SELECT {AGENT_COLUMNS} FROM agents WHERE account_id = $1 ORDER BY agent_name");
    sqlx::query_as::<_, Agent>(&query)
        .bind(account_id)
        .fetch_all(pool)
        .await
}

/// `(agent_id, mod_config)` for every agent with at least one selected mod.
pub async fn list_agent_mod_configs(
    pool: &PgPool,
) -> Result<Vec<(String, Json<ModConfig>)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT agent_id, mod_config
        FROM agents
        WHERE jsonb_array_length(COALESCE(mod_config->'selectedMods', '[]'::jsonb)) > 0
        ORDER BY agent_id
        "#,
    )
    .fetch_all(pool)
    .await
}

/// `(agent_id, version, update_available)` for every agent.
pub async fn list_agent_versions(
    pool: &PgPool,
) -> Result<Vec<(String, String, bool)>, sqlx::Error> {
    sqlx::query_as("SELECT agent_id, version, update_available FROM agents ORDER BY agent_id")
        .fetch_all(pool)
        .await
}

/// Delete an agent. Artifacts rows cascade.
pub async fn delete_agent(pool: &PgPool, agent_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM agents WHERE agent_id = $1")
        .bind(agent_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Status / config
// ============================================================================

/// Bump `last_comm_date` to now. Never moves it backwards.
pub async fn touch_last_comm(pool: &PgPool, agent_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE agents
        SET last_comm_date = GREATEST(COALESCE(last_comm_date, NOW()), NOW())
        WHERE agent_id = $1
        "#,
    )
    .bind(agent_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Assign the status record and bump `last_comm_date`.
///
/// Returns the previous `online` value, or `None` if the agent does not exist.
/// The previous value is read under the same row lock as the write.
pub async fn update_status(
    pool: &PgPool,
    agent_id: &str,
    status: &AgentStatus,
) -> Result<Option<bool>, sqlx::Error> {
    let row: Option<(bool,)> = sqlx::query_as(
        r#"
        WITH prev AS (
            SELECT agent_id, online FROM agents WHERE agent_id = $1 FOR UPDATE
        )
        UPDATE agents a
        SET online = $2,
            installed = $3,
            running = $4,
            cpu = $5,
            ram = $6,
            installed_sf_version = $7,
            latest_sf_version = $8,
            last_comm_date = GREATEST(COALESCE(a.last_comm_date, NOW()), NOW()),
            updated_at = NOW()
        FROM prev
        WHERE a.agent_id = prev.agent_id
        RETURNING prev.online
        "#,
    )
    .bind(agent_id)
    .bind(status.online)
    .bind(status.installed)
    .bind(status.running)
    .bind(status.cpu)
    .bind(status.ram)
    .bind(status.installed_sf_version)
    .bind(status.latest_sf_version)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(online,)| online))
}

/// Set the agent-reported version and IP.
pub async fn update_version_ip(
    pool: &PgPool,
    agent_id: &str,
    version: &str,
    ip: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE agents
        SET version = $2, ip = $3, updated_at = NOW()
        WHERE agent_id = $1
        "#,
    )
    .bind(agent_id)
    .bind(version)
    .bind(ip)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Replace the user-editable settings.
pub async fn update_settings(
    pool: &PgPool,
    agent_id: &str,
    settings: &AgentSettings,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE agents
        SET backup_interval = $2,
            backup_keep_amount = $3,
            auto_update = $4,
            server_config = $5,
            updated_at = NOW()
        WHERE agent_id = $1
        "#,
    )
    .bind(agent_id)
    .bind(settings.backup_interval)
    .bind(settings.backup_keep_amount)
    .bind(settings.auto_update)
    .bind(Json(&settings.server_config))
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Read the mod configuration and lock the agent row until `conn`'s
/// transaction ends. `None` when the agent does not exist.
///
/// Every read-modify-write of `mod_config` goes through this lock.
pub async fn lock_mod_config(
    conn: &mut PgConnection,
    agent_id: &str,
) -> Result<Option<ModConfig>, sqlx::Error> {
    let row: Option<(Json<ModConfig>,)> =
        sqlx::query_as("SELECT mod_config FROM agents WHERE agent_id = $1 FOR UPDATE")
            .bind(agent_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(row.map(|(config,)| config.0))
}

/// Replace the mod configuration.
pub async fn update_mod_config<'e>(
    executor: impl PgExecutor<'e>,
    agent_id: &str,
    mod_config: &ModConfig,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE agents SET mod_config = $2, updated_at = NOW()
        WHERE agent_id = $1
        "#,
    )
    .bind(agent_id)
    .bind(Json(mod_config))
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Set the agent-update flag.
pub async fn set_update_available(
    pool: &PgPool,
    agent_id: &str,
    update_available: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE agents SET update_available = $2, updated_at = NOW()
        WHERE agent_id = $1 AND update_available <> $2
        "#,
    )
    .bind(agent_id)
    .bind(update_available)
    .execute(pool)
    .await?;
    Ok(())
}

/// Force every online agent silent since `cutoff` offline.
///
/// Sets `online = running = false` and zeroes CPU/RAM in one statement, so
/// concurrent callers never report the same agent twice.
pub async fn mark_stale_offline(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<StaleAgent>, sqlx::Error> {
    sqlx::query_as::<_, StaleAgent>(
        r#"
        UPDATE agents
        SET online = FALSE, running = FALSE, cpu = 0, ram = 0, updated_at = NOW()
        WHERE online AND (last_comm_date IS NULL OR last_comm_date < $1)
        RETURNING agent_id, account_id, agent_name
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
}

// ============================================================================
// Saves / backups
// ============================================================================

/// Insert a save, or update size (and optionally mod time) of the save with
/// the same file name.
pub async fn upsert_save(
    pool: &PgPool,
    agent_id: &str,
    file: &FileIdentity,
    update_mod_time: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO agent_saves (save_id, agent_id, file_name, size, mod_time, file_url)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (agent_id, file_name) DO UPDATE SET
            size = EXCLUDED.size,
            mod_time = CASE WHEN $7 THEN EXCLUDED.mod_time ELSE agent_saves.mod_time END,
            file_url = CASE WHEN EXCLUDED.file_url = '' THEN agent_saves.file_url
                            ELSE EXCLUDED.file_url END,
            updated_at = NOW()
        "#,
    )
    .bind(new_id())
    .bind(agent_id)
    .bind(&file.file_name)
    .bind(file.size)
    .bind(file.mod_time)
    .bind(&file.file_url)
    .bind(update_mod_time)
    .execute(pool)
    .await?;
    Ok(())
}

/// Replace the save list with the agent's view.
pub async fn replace_saves(
    pool: &PgPool,
    agent_id: &str,
    files: &[FileIdentity],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    let names: Vec<&str> = files.iter().map(|f| f.file_name.as_str()).collect();
    sqlx::query("DELETE FROM agent_saves WHERE agent_id = $1 AND NOT (file_name = ANY($2))")
        .bind(agent_id)
        .bind(&names)
        .execute(&mut *tx)
        .await?;

    for file in files {
        sqlx::query(
            r#"
            INSERT INTO agent_saves (save_id, agent_id, file_name, size, mod_time, file_url)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (agent_id, file_name) DO UPDATE SET
                size = EXCLUDED.size,
                mod_time = EXCLUDED.mod_time,
                updated_at = NOW()
            "#,
        )
        .bind(new_id())
        .bind(agent_id)
        .bind(&file.file_name)
        .bind(file.size)
        .bind(file.mod_time)
        .bind(&file.file_url)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

/// Saves of an agent, by file name.
pub async fn list_saves(pool: &PgPool, agent_id: &str) -> Result<Vec<AgentSave>, sqlx::Error> {
    sqlx::query_as::<_, AgentSave>(
        r#"
        SELECT save_id, agent_id, file_name, size, mod_time, file_url, created_at, updated_at
        FROM agent_saves
        WHERE agent_id = $1
        ORDER BY file_name
        "#,
    )
    .bind(agent_id)
    .fetch_all(pool)
    .await
}

/// Append a backup.
pub async fn append_backup(
    pool: &PgPool,
    agent_id: &str,
    file: &FileIdentity,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO agent_backups (backup_id, agent_id, file_name, size, file_url)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(new_id())
    .bind(agent_id)
    .bind(&file.file_name)
    .bind(file.size)
    .bind(&file.file_url)
    .execute(pool)
    .await?;
    Ok(())
}

/// Backups of an agent, oldest first.
pub async fn list_backups(pool: &PgPool, agent_id: &str) -> Result<Vec<AgentBackup>, sqlx::Error> {
    sqlx::query_as::<_, AgentBackup>(
        r#"
        SELECT backup_id, agent_id, file_name, size, file_url, created_at
        FROM agent_backups
        WHERE agent_id = $1
        ORDER BY created_at
        "#,
    )
    .bind(agent_id)
    .fetch_all(pool)
    .await
}
