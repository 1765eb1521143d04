// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration outbox.
//!
//! Domain events are written as `integration_events` rows, one per
//! subscribed integration, with the final webhook body assembled at enqueue
//! time. The dispatcher drains them with leased claims:
//!
//! ```text
//!            claim_one                 mark_sent
//!  pending ────────────► processing ─────────────► sent
//!     ▲                      │
//!     │   mark_failed        │ mark_failed (attempts >= 5)
//!     └──────────────────────┴──────────────────────► failed
//!        (attempts < 5, backoff min(120s, attempts²))
//! ```
//!
//! A `processing` row whose lease has expired is claimable again, so a
//! crashed worker never strands an event.

use std::time::Duration;

use serde_json::{Map, Value, json};
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::{debug, info, warn};

use crate::db::integrations::{
    self, AccountIntegration, EVENT_COLUMNS, IntegrationEvent, IntegrationType,
};
use crate::error::Result;
use crate::ids::new_id;

/// Delivery attempts before an event fails terminally.
pub const MAX_ATTEMPTS: i32 = 5;

/// Processing lease taken by a claim.
pub const CLAIM_LEASE: Duration = Duration::from_secs(30);

/// Upper bound of the retry delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Username shown on Discord messages.
pub const DISCORD_USERNAME: &str = "SSM Cloud";

/// Event type emitted when an agent is created.
pub const AGENT_CREATED: &str = "agent.created";
/// Event type emitted when an agent comes online.
pub const AGENT_ONLINE: &str = "agent.online";
/// Event type emitted when an agent goes offline.
pub const AGENT_OFFLINE: &str = "agent.offline";
/// Event type emitted when a player joins a server.
pub const PLAYER_JOINED: &str = "player.joined";
/// Event type emitted when a player leaves a server.
pub const PLAYER_LEFT: &str = "player.left";
/// Event type emitted when a user joins an account.
pub const USER_ADDED: &str = "user.added";
/// Event type emitted when a user leaves an account.
pub const USER_REMOVED: &str = "user.removed";

/// Every event type an integration can subscribe to.
pub const EVENT_TYPES: &[&str] = &[
    AGENT_CREATED,
    AGENT_ONLINE,
    AGENT_OFFLINE,
    PLAYER_JOINED,
    PLAYER_LEFT,
    USER_ADDED,
    USER_REMOVED,
];

/// Outbox row status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Waiting for delivery.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Delivered.
    Sent,
    /// Gave up.
    Failed,
}

impl EventStatus {
    /// Stored string form.
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Sent => "sent",
            EventStatus::Failed => "failed",
        }
    }
}

/// Human title of an event type.
pub fn event_title(event_type: &str) -> &'static str {
    match event_type {
        AGENT_CREATED => "Server Created",
        AGENT_ONLINE => "Server Online",
        AGENT_OFFLINE => "Server Offline",
        PLAYER_JOINED => "Player Joined",
        PLAYER_LEFT => "Player Left",
        USER_ADDED => "User Added",
        USER_REMOVED => "User Removed",
        _ => "Unknown SSM Event",
    }
}

/// Wrap a payload map into a Discord webhook body.
pub fn discord_payload(event_type: &str, data: &Map<String, Value>, avatar_url: &str) -> Value {
    let fields: Vec<Value> = data
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            json!({ "name": name, "value": value, "inline": true })
        })
        .collect();

    json!({
        "username": DISCORD_USERNAME,
        "avatar_url": avatar_url,
        "embeds": [{
            "title": event_title(event_type),
            "fields": fields,
        }],
    })
}

/// Body for a generic webhook.
pub fn generic_payload(event_type: &str, data: &Map<String, Value>) -> Value {
    json!({ "eventType": event_type, "data": data })
}

/// What `mark_failed` does with an event after `attempts` deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTransition {
    /// Back to pending after the delay.
    Retry(Duration),
    /// Terminal failure.
    GiveUp,
}

/// Retry policy: `min(120 s, attempts² s)`, terminal from [`MAX_ATTEMPTS`].
pub fn failure_transition(attempts: i32) -> FailureTransition {
    if attempts >= MAX_ATTEMPTS {
        return FailureTransition::GiveUp;
    }
    let n = u64::try_from(attempts.max(0)).unwrap_or(0);
    FailureTransition::Retry(Duration::from_secs(n * n).min(MAX_BACKOFF))
}

/// Result of a delivery attempt, recorded on the row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryRecord {
    /// Response body, if one was read.
    pub response: Option<String>,
    /// Response status code, if a response arrived.
    pub response_code: Option<i32>,
}

/// Handle to the outbox tables.
#[derive(Debug, Clone)]
pub struct Outbox {
    pool: PgPool,
    avatar_url: String,
}

impl Outbox {
    /// Create a new outbox handle.
    pub fn new(pool: PgPool, avatar_url: impl Into<String>) -> Self {
        Self {
            pool,
            avatar_url: avatar_url.into(),
        }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Write one event per integration of `account_id` subscribed to
    /// `event_type`. Returns the new event ids.
    pub async fn enqueue(
        &self,
        account_id: &str,
        event_type: &str,
        data: Map<String, Value>,
    ) -> Result<Vec<String>> {
        let targets =
            integrations::list_subscribed_integrations(&self.pool, account_id, event_type).await?;

        let mut ids = Vec::with_capacity(targets.len());
        for integration in &targets {
            ids.push(self.enqueue_for(integration, event_type, &data).await?);
        }

        if !ids.is_empty() {
            info!(
                account_id = %account_id,
                event_type = %event_type,
                events = ids.len(),
                "Enqueued integration events"
            );
        }
        Ok(ids)
    }

    /// Write one event for a specific integration.
    pub async fn enqueue_for(
        &self,
        integration: &AccountIntegration,
        event_type: &str,
        data: &Map<String, Value>,
    ) -> Result<String> {
        let payload = match integration.kind() {
            Some(IntegrationType::Discord) => discord_payload(event_type, data, &self.avatar_url),
            Some(IntegrationType::GenericWebhook) | None => generic_payload(event_type, data),
        };

        let event_id = new_id();
        sqlx::query(
            r#"
            INSERT INTO integration_events (event_id, integration_id, event_type, url, payload)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&event_id)
        .bind(&integration.integration_id)
        .bind(event_type)
        .bind(&integration.url)
        .bind(Json(&payload))
        .execute(&self.pool)
        .await?;

        Ok(event_id)
    }

    /// Atomically claim the next due event for `worker_id`.
    ///
    /// Claimable: pending and due with no live lease, or processing with an
    /// expired lease. The claim sets `processing`, takes a 30 s lease and
    /// increments `attempts`.
    pub async fn claim_one(&self, worker_id: &str) -> Result<Option<IntegrationEvent>> {
        let query = format!(
            r#"
            UPDATE integration_events
            SET status = 'processing',
                processing_by = $1,
                processing_until = NOW() + make_interval(secs => $2),
                attempts = attempts + 1,
                updated_at = NOW()
            WHERE event_id = (
                SELECT event_id FROM integration_events
                WHERE (
                        status = 'pending'
                        AND next_attempt_at <= NOW()
                        AND (processing_until IS NULL OR processing_until <= NOW())
                      )
                   OR (status = 'processing' AND processing_until <= NOW())
                ORDER BY next_attempt_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {EVENT_COLUMNS}
            "#
        );

        let event = sqlx::query_as::<_, IntegrationEvent>(&query)
            .bind(worker_id)
            .bind(CLAIM_LEASE.as_secs_f64())
            .fetch_optional(&self.pool)
            .await?;

        if let Some(e) = &event {
            debug!(event_id = %e.event_id, attempts = e.attempts, worker = %worker_id, "Claimed event");
        }
        Ok(event)
    }

    /// Record a successful delivery.
    pub async fn mark_sent(
        &self,
        event: &IntegrationEvent,
        worker_id: &str,
        record: &DeliveryRecord,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE integration_events
            SET status = 'sent',
                response = $3,
                response_code = $4,
                sent_at = NOW(),
                last_error = NULL,
                processing_by = NULL,
                processing_until = NULL,
                updated_at = NOW()
            WHERE event_id = $1 AND status = 'processing' AND processing_by = $2
            "#,
        )
        .bind(&event.event_id)
        .bind(worker_id)
        .bind(&record.response)
        .bind(record.response_code)
        .execute(&self.pool)
        .await?;

        let updated = result.rows_affected() > 0;
        if !updated {
            warn!(event_id = %event.event_id, "Lease lost before marking event sent");
        }
        Ok(updated)
    }

    /// Record a failed delivery and schedule a retry or give up.
    ///
    /// Returns the resulting status, or `None` if the lease was lost.
    pub async fn mark_failed(
        &self,
        event: &IntegrationEvent,
        worker_id: &str,
        error: &str,
        record: &DeliveryRecord,
    ) -> Result<Option<EventStatus>> {
        let (status, delay) = match failure_transition(event.attempts) {
            FailureTransition::Retry(delay) => (EventStatus::Pending, delay),
            FailureTransition::GiveUp => (EventStatus::Failed, Duration::ZERO),
        };

        let result = sqlx::query(
            r#"
            UPDATE integration_events
            SET status = $3,
                next_attempt_at = CASE WHEN $3 = 'pending'
                                       THEN NOW() + make_interval(secs => $4)
                                       ELSE next_attempt_at END,
                last_error = $5,
                response = $6,
                response_code = $7,
                processing_by = NULL,
                processing_until = NULL,
                updated_at = NOW()
            WHERE event_id = $1 AND status = 'processing' AND processing_by = $2
            "#,
        )
        .bind(&event.event_id)
        .bind(worker_id)
        .bind(status.as_str())
        .bind(delay.as_secs_f64())
        .bind(error)
        .bind(&record.response)
        .bind(record.response_code)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(event_id = %event.event_id, "Lease lost before marking event failed");
            return Ok(None);
        }

        if status == EventStatus::Failed {
            warn!(
                event_id = %event.event_id,
                attempts = event.attempts,
                error = %error,
                "Integration event failed permanently"
            );
        } else {
            debug!(
                event_id = %event.event_id,
                attempts = event.attempts,
                retry_in_secs = delay.as_secs(),
                "Integration event scheduled for retry"
            );
        }
        Ok(Some(status))
    }

    /// Events still owed delivery, for monitoring.
    pub async fn pending_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM integration_events WHERE status IN ('pending', 'processing')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_titles() {
        assert_eq!(event_title("agent.created"), "Server Created");
        assert_eq!(event_title("agent.online"), "Server Online");
        assert_eq!(event_title("agent.offline"), "Server Offline");
        assert_eq!(event_title("player.joined"), "Player Joined");
        assert_eq!(event_title("user.removed"), "User Removed");
        assert_eq!(event_title("agent.exploded"), "Unknown SSM Event");
    }

    #[test]
    fn test_discord_payload_shape() {
        let mut data = Map::new();
        data.insert("agent_name".into(), json!("atlas"));
        data.insert("players".into(), json!(3));

        let payload = discord_payload("agent.online", &data, "https://example.com/a.png");

        assert_eq!(payload["username"], "SSM Cloud");
        assert_eq!(payload["avatar_url"], "https://example.com/a.png");
        let embed = &payload["embeds"][0];
        assert_eq!(embed["title"], "Server Online");
        let fields = embed["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 2);
        assert!(fields.iter().all(|f| f["inline"] == true));
        assert!(
            fields
                .iter()
                .any(|f| f["name"] == "agent_name" && f["value"] == "atlas")
        );
        assert!(
            fields
                .iter()
                .any(|f| f["name"] == "players" && f["value"] == "3")
        );
    }

    #[test]
    fn test_generic_payload_shape() {
        let mut data = Map::new();
        data.insert("agent_name".into(), json!("atlas"));
        let payload = generic_payload("agent.offline", &data);
        assert_eq!(payload["eventType"], "agent.offline");
        assert_eq!(payload["data"]["agent_name"], "atlas");
    }

    #[test]
    fn test_failure_transition_backoff() {
        assert_eq!(
            failure_transition(1),
            FailureTransition::Retry(Duration::from_secs(1))
        );
        assert_eq!(
            failure_transition(3),
            FailureTransition::Retry(Duration::from_secs(9))
        );
        assert_eq!(
            failure_transition(4),
            FailureTransition::Retry(Duration::from_secs(16))
        );
        assert_eq!(failure_transition(5), FailureTransition::GiveUp);
        assert_eq!(failure_transition(12), FailureTransition::GiveUp);
    }

    #[test]
    fn test_backoff_is_capped() {
        for attempts in 0..MAX_ATTEMPTS {
            if let FailureTransition::Retry(d) = failure_transition(attempts) {
                assert!(d <= MAX_BACKOFF);
            }
        }
    }
}
