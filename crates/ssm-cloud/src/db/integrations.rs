// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Account integrations and their delivery history.
//!
//! Writes to `integration_events` (enqueue, claim, mark) live in
//! [`crate::outbox`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::types::Json;

use crate::ids::new_id;

/// Kind of webhook receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationType {
    /// Discord webhook, payload wrapped in an embed.
    #[serde(rename = "discord")]
    Discord,
    /// Any HTTP endpoint accepting JSON.
    #[serde(rename = "generic-webhook")]
    GenericWebhook,
}

impl IntegrationType {
    /// Stored string form.
    pub fn as_str(self) -> &'static str {
        match self {
            IntegrationType::Discord => "discord",
            IntegrationType::GenericWebhook => "generic-webhook",
        }
    }
}

impl fmt::Display for IntegrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discord" => Ok(IntegrationType::Discord),
            "generic-webhook" => Ok(IntegrationType::GenericWebhook),
            other => Err(format!("unknown integration type: {other}")),
        }
    }
}

/// Configured webhook endpoint.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountIntegration {
    /// Identity.
    pub integration_id: String,
    /// Owning account.
    pub account_id: String,
    /// Display name.
    pub integration_name: String,
    /// `discord` or `generic-webhook`.
    pub integration_type: String,
    /// Target URL.
    pub url: String,
    /// Subscribed event types.
    pub event_types: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl AccountIntegration {
    /// Parsed integration type.
    pub fn kind(&self) -> Option<IntegrationType> {
        self.integration_type.parse().ok()
    }
}

/// Outbox row.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationEvent {
    /// Identity.
    pub event_id: String,
    /// Target integration.
    pub integration_id: String,
    /// Event type, e.g. `agent.online`.
    pub event_type: String,
    /// Target URL, copied from the integration at enqueue time.
    pub url: String,
    /// Body to POST.
    pub payload: Json<serde_json::Value>,
    /// `pending`, `processing`, `sent` or `failed`.
    pub status: String,
    /// Delivery attempts so far.
    pub attempts: i32,
    /// Earliest time of the next attempt.
    pub next_attempt_at: DateTime<Utc>,
    /// Worker holding the processing lease.
    pub processing_by: Option<String>,
    /// Processing lease expiry.
    pub processing_until: Option<DateTime<Utc>>,
    /// Last response body.
    pub response: Option<String>,
    /// Last response status code.
    pub response_code: Option<i32>,
    /// Last error.
    pub last_error: Option<String>,
    /// Delivery time.
    pub sent_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Columns selected for [`IntegrationEvent`].
pub(crate) const EVENT_COLUMNS: &str = r#"
    event_id, integration_id, event_type, url, payload, status, attempts, next_attempt_at,
    processing_by, processing_until, response, response_code, last_error, sent_at,
    created_at, updated_at
"#;

/// Insert an integration.
pub async fn insert_integration(
    pool: &PgPool,
    account_id: &str,
    integration_name: &str,
    integration_type: IntegrationType,
    url: &str,
    event_types: &[String],
) -> Result<AccountIntegration, sqlx::Error> {
    sqlx::query_as::<_, AccountIntegration>(
        r#"
        INSERT INTO account_integrations
            (integration_id, account_id, integration_name, integration_type, url, event_types)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING integration_id, account_id, integration_name, integration_type, url,
                  event_types, created_at, updated_at
        "#,
    )
    .bind(new_id())
    .bind(account_id)
    .bind(integration_name)
    .bind(integration_type.as_str())
    .bind(url)
    .bind(event_types)
    .fetch_one(pool)
    .await
}

/// Get an integration by id.
pub async fn get_integration(
    pool: &PgPool,
    integration_id: &str,
) -> Result<Option<AccountIntegration>, sqlx::Error> {
    sqlx::query_as::<_, AccountIntegration>(
        r#"
        SELECT integration_id, account_id, integration_name, integration_type, url,
               event_types, created_at, updated_at
        FROM account_integrations
        WHERE integration_id = $1
        "#,
    )
    .bind(integration_id)
    .fetch_optional(pool)
    .await
}

/// Integrations of an account.
pub async fn list_integrations(
    pool: &PgPool,
    account_id: &str,
) -> Result<Vec<AccountIntegration>, sqlx::Error> {
    sqlx::query_as::<_, AccountIntegration>(
        r#"
        SELECT integration_id, account_id, integration_name, integration_type, url,
               event_types, created_at, updated_at
        FROM account_integrations
        WHERE account_id = $1
        ORDER BY created_at
        "#,
    )
    .bind(account_id)
    .fetch_all(pool)
    .await
}

/// Integrations of an account subscribed to `event_type`.
pub async fn list_subscribed_integrations(
    pool: &PgPool,
    account_id: &str,
    event_type: &str,
) -> Result<Vec<AccountIntegration>, sqlx::Error> {
    sqlx::query_as::<_, AccountIntegration>(
        r#"
        SELECT integration_id, account_id, integration_name, integration_type, url,
               event_types, created_at, updated_at
        FROM account_integrations
        WHERE account_id = $1 AND $2 = ANY(event_types)
        ORDER BY created_at
        "#,
    )
    .bind(account_id)
    .bind(event_type)
    .fetch_all(pool)
    .await
}

/// Delete an integration owned by `account_id`. Its events cascade.
pub async fn delete_integration(
    pool: &PgPool,
    account_id: &str,
    integration_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM account_integrations WHERE account_id = $1 AND integration_id = $2",
    )
    .bind(account_id)
    .bind(integration_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete every integration of an account.
pub async fn delete_account_integrations(
    pool: &PgPool,
    account_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM account_integrations WHERE account_id = $1")
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Get one outbox row.
pub async fn get_event(
    pool: &PgPool,
    event_id: &str,
) -> Result<Option<IntegrationEvent>, sqlx::Error> {
    let query = format!("SELECT {EVENT_COLUMNS} FROM integration_events WHERE event_id = $1");
    sqlx::query_as::<_, IntegrationEvent>(&query)
        .bind(event_id)
        .fetch_optional(pool)
        .await
}

/// Most recent events of an integration.
pub async fn list_events(
    pool: &PgPool,
    integration_id: &str,
    limit: i64,
) -> Result<Vec<IntegrationEvent>, sqlx::Error> {
    let query = format!(
        r#"
        SELECT {EVENT_COLUMNS}
        FROM integration_events
        WHERE integration_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#
    );
    sqlx::query_as::<_, IntegrationEvent>(&query)
        .bind(integration_id)
        .bind(limit)
        .fetch_all(pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integration_type_strings() {
        assert_eq!(IntegrationType::Discord.as_str(), "discord");
        assert_eq!(
            "generic-webhook".parse::<IntegrationType>().unwrap(),
            IntegrationType::GenericWebhook
        );
        assert!("slack".parse::<IntegrationType>().is_err());

        let t: IntegrationType = serde_json::from_value(serde_json::json!("discord")).unwrap();
        assert_eq!(t, IntegrationType::Discord);
    }
}
