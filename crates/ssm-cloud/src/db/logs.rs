// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-agent, per-source log buffers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::ids::new_id;

/// Origin of a log file on the agent host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LogSource {
    /// The agent itself (`SSMAgent*`).
    Agent,
    /// The dedicated game server.
    FactoryGame,
    /// SteamCMD (`Steam*`).
    Steam,
}

impl LogSource {
    /// Stored string form.
    pub fn as_str(self) -> &'static str {
        match self {
            LogSource::Agent => "Agent",
            LogSource::FactoryGame => "FactoryGame",
            LogSource::Steam => "Steam",
        }
    }

    /// Derive the source from an uploaded file name.
    pub fn from_file_name(file_name: &str) -> Self {
        if file_name.starts_with("SSMAgent") {
            LogSource::Agent
        } else if file_name.starts_with("Steam") {
            LogSource::Steam
        } else {
            LogSource::FactoryGame
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Agent" => Ok(LogSource::Agent),
            "FactoryGame" => Ok(LogSource::FactoryGame),
            "Steam" => Ok(LogSource::Steam),
            other => Err(format!("unknown log source: {other}")),
        }
    }
}

/// Log document.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLog {
    /// Identity.
    pub log_id: String,
    /// Owning agent.
    pub agent_id: String,
    /// `Agent`, `FactoryGame` or `Steam`.
    pub source: String,
    /// File name used for the object key.
    pub file_name: String,
    /// Object storage key of the last flushed copy.
    pub file_url: String,
    /// Current line buffer.
    pub lines: Vec<String>,
    /// Buffer has changes not yet in object storage.
    pub pending_upload: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last buffer change.
    pub updated_at: DateTime<Utc>,
}

/// A pending log joined with its owner, as the flusher needs it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingLog {
    /// Identity.
    pub log_id: String,
    /// Owning agent.
    pub agent_id: String,
    /// Owning account.
    pub account_id: String,
    /// File name.
    pub file_name: String,
    /// Line buffer at read time.
    pub lines: Vec<String>,
    /// `updated_at` at read time.
    pub updated_at: DateTime<Utc>,
}

/// Create or replace the log document for `(agent, source)`.
///
/// Replaces the line buffer and marks it pending upload.
pub async fn upsert_log(
    pool: &PgPool,
    agent_id: &str,
    source: LogSource,
    file_name: &str,
    lines: &[String],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO agent_logs (log_id, agent_id, source, file_name, lines, pending_upload)
        VALUES ($1, $2, $3, $4, $5, TRUE)
        ON CONFLICT (agent_id, source) DO UPDATE SET
            file_name = EXCLUDED.file_name,
            lines = EXCLUDED.lines,
            pending_upload = TRUE,
            updated_at = NOW()
        "#,
    )
    .bind(new_id())
    .bind(agent_id)
    .bind(source.as_str())
    .bind(file_name)
    .bind(lines)
    .execute(pool)
    .await?;
    Ok(())
}

/// Append one streamed line, clearing the buffer first when `initial`.
///
/// Bumps the agent's `last_comm_date` in the same statement, whether or not
/// the document exists. Returns `false` when no document exists for
/// `(agent, source)`.
pub async fn append_log_line(
    pool: &PgPool,
    agent_id: &str,
    source: LogSource,
    line: &str,
    initial: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        WITH touched AS (
            UPDATE agents
            SET last_comm_date = GREATEST(COALESCE(last_comm_date, NOW()), NOW())
            WHERE agent_id = $1
        )
        UPDATE agent_logs
        SET lines = CASE WHEN $4 THEN ARRAY[$3::text] ELSE array_append(lines, $3::text) END,
            pending_upload = TRUE,
            updated_at = clock_timestamp()
        WHERE agent_id = $1 AND source = $2
        "#,
    )
    .bind(agent_id)
    .bind(source.as_str())
    .bind(line)
    .bind(initial)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Get the log document for `(agent, source)`.
pub async fn get_log(
    pool: &PgPool,
    agent_id: &str,
    source: LogSource,
) -> Result<Option<AgentLog>, sqlx::Error> {
    sqlx::query_as::<_, AgentLog>(
        r#"
        SELECT log_id, agent_id, source, file_name, file_url, lines, pending_upload,
               created_at, updated_at
        FROM agent_logs
        WHERE agent_id = $1 AND source = $2
        "#,
    )
    .bind(agent_id)
    .bind(source.as_str())
    .fetch_optional(pool)
    .await
}

/// Log documents of an agent.
pub async fn list_agent_logs(pool: &PgPool, agent_id: &str) -> Result<Vec<AgentLog>, sqlx::Error> {
    sqlx::query_as::<_, AgentLog>(
        r#"
        SELECT log_id, agent_id, source, file_name, file_url, lines, pending_upload,
               created_at, updated_at
        FROM agent_logs
        WHERE agent_id = $1
        ORDER BY source
        "#,
    )
    .bind(agent_id)
    .fetch_all(pool)
    .await
}

/// Logs waiting to be flushed, oldest change first.
pub async fn list_pending_logs(pool: &PgPool, limit: i64) -> Result<Vec<PendingLog>, sqlx::Error> {
    sqlx::query_as::<_, PendingLog>(
        r#"
        SELECT l.log_id, l.agent_id, a.account_id, l.file_name, l.lines, l.updated_at
        FROM agent_logs l
        JOIN agents a ON a.agent_id = l.agent_id
        WHERE l.pending_upload
        ORDER BY l.updated_at
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Record a successful flush.
///
/// `pending_upload` is only cleared when the buffer has not changed since
/// `read_at`; lines appended during the upload keep the log pending.
pub async fn mark_log_uploaded(
    pool: &PgPool,
    log_id: &str,
    file_url: &str,
    read_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let row: Option<(bool,)> = sqlx::query_as(
        r#"
        UPDATE agent_logs
        SET file_url = $2,
            pending_upload = CASE WHEN updated_at = $3 THEN FALSE ELSE pending_upload END
        WHERE log_id = $1
        RETURNING pending_upload
        "#,
    )
    .bind(log_id)
    .bind(file_url)
    .bind(read_at)
    .fetch_optional(pool)
    .await?;
    Ok(matches!(row, Some((false,))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_from_file_name() {
        assert_eq!(LogSource::from_file_name("SSMAgent.log"), LogSource::Agent);
        assert_eq!(
            LogSource::from_file_name("SSMAgent-2024.log"),
            LogSource::Agent
        );
        assert_eq!(LogSource::from_file_name("Steam.log"), LogSource::Steam);
        assert_eq!(
            LogSource::from_file_name("FactoryGame.log"),
            LogSource::FactoryGame
        );
        assert_eq!(
            LogSource::from_file_name("anything-else.txt"),
            LogSource::FactoryGame
        );
    }

    #[test]
    fn test_source_parse_roundtrip_names() {
        for source in [LogSource::Agent, LogSource::FactoryGame, LogSource::Steam] {
            assert_eq!(source.as_str().parse::<LogSource>().unwrap(), source);
        }
        assert!("steam".parse::<LogSource>().is_err());
    }
}
