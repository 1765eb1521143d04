// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Account integrations (webhook targets).

use sqlx::PgPool;
use tracing::info;

use super::required;
use crate::db::integrations::{self, AccountIntegration, IntegrationEvent, IntegrationType};
use crate::error::{Error, Result};
use crate::outbox::EVENT_TYPES;

/// Events returned by [`list_events`].
pub const EVENT_LIST_LIMIT: i64 = 100;

/// Check that `url` is an absolute http(s) URL.
pub fn validate_url(url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| Error::Validation(format!("invalid url {url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        _ => Err(Error::Validation(format!("url must be http(s): {url}"))),
    }
}

/// Check that every event type is known and the set is not empty.
pub fn validate_event_types(event_types: &[String]) -> Result<()> {
    if event_types.is_empty() {
        return Err(Error::Validation("at least one event type is required".to_string()));
    }
    match event_types.iter().find(|t| !EVENT_TYPES.contains(&t.as_str())) {
        Some(unknown) => Err(Error::Validation(format!("unknown event type: {unknown}"))),
        None => Ok(()),
    }
}

/// Create an integration. URLs are unique per account.
pub async fn create_integration(
    pool: &PgPool,
    account_id: &str,
    name: &str,
    integration_type: IntegrationType,
    url: &str,
    event_types: &[String],
) -> Result<AccountIntegration> {
    let name = required("integration name", name)?;
    let url = required("url", url)?;
    validate_url(url)?;
    validate_event_types(event_types)?;

    let mut event_types = event_types.to_vec();
    event_types.sort();
    event_types.dedup();

    let integration =
        integrations::insert_integration(pool, account_id, name, integration_type, url, &event_types)
            .await
            .map_err(|e| {
                Error::conflict_on_unique(e, "an integration with this url already exists")
            })?;

    info!(
        integration_id = %integration.integration_id,
        account_id = %account_id,
        integration_type = %integration_type,
        "Integration created"
    );
    Ok(integration)
}

/// Integrations of an account.
pub async fn list_integrations(pool: &PgPool, account_id: &str) -> Result<Vec<AccountIntegration>> {
    Ok(integrations::list_integrations(pool, account_id).await?)
}

/// Delete an integration of an account together with its events.
pub async fn delete_integration(pool: &PgPool, account_id: &str, integration_id: &str) -> Result<()> {
    if !integrations::delete_integration(pool, account_id, integration_id).await? {
        return Err(Error::NotFound("Integration".to_string()));
    }
    info!(integration_id = %integration_id, account_id = %account_id, "Integration deleted");
    Ok(())
}

/// Most recent outbox events of an integration of an account.
pub async fn list_events(
    pool: &PgPool,
    account_id: &str,
    integration_id: &str,
) -> Result<Vec<IntegrationEvent>> {
    integrations::get_integration(pool, integration_id)
        .await?
        .filter(|i| i.account_id == account_id)
        .ok_or_else(|| Error::NotFound("Integration".to_string()))?;
    Ok(integrations::list_events(pool, integration_id, EVENT_LIST_LIMIT).await?)
}
