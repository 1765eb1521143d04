// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for ssm-cloud integration tests.
//!
//! Database-backed tests need `TEST_SSM_DATABASE_URL` and are skipped when it
//! is unset. Every helper creates uniquely named rows so tests can share one
//! database.

#![allow(dead_code)]

use sqlx::PgPool;
use uuid::Uuid;

use ssm_cloud::db::accounts::{self, Account};
use ssm_cloud::db::agents::{self, Agent, NewAgent};
use ssm_cloud::db::integrations::{self, AccountIntegration, IntegrationType};
use ssm_cloud::ids::generate_api_key;
use ssm_cloud::outbox::Outbox;
use ssm_cloud::registry::AgentRegistry;

/// Avatar used by test outboxes.
pub const TEST_AVATAR_URL: &str = "https://example.invalid/avatar.png";

/// Helper macro to skip tests if database URL is not set.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_SSM_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_SSM_DATABASE_URL not set");
            return;
        }
    };
}

/// Connect to the test database and apply migrations.
pub async fn test_pool() -> PgPool {
    let database_url =
        std::env::var("TEST_SSM_DATABASE_URL").expect("TEST_SSM_DATABASE_URL not set");
    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to database");
    ssm_cloud::migrations::run(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Short unique suffix for names.
pub fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, &Uuid::new_v4().simple().to_string()[..12])
}

/// Outbox over `pool`.
pub fn outbox(pool: &PgPool) -> Outbox {
    Outbox::new(pool.clone(), TEST_AVATAR_URL)
}

/// Registry over `pool`.
pub fn registry(pool: &PgPool) -> AgentRegistry {
    AgentRegistry::new(pool.clone(), outbox(pool))
}

/// Create an account with a unique name.
pub async fn create_account(pool: &PgPool) -> Account {
    accounts::insert_account(pool, &unique("account"))
        .await
        .expect("Failed to create account")
}

/// Create an agent in `account_id` with a fresh API key.
pub async fn create_agent(pool: &PgPool, account_id: &str, name: &str) -> Agent {
    let api_key = generate_api_key();
    agents::insert_agent(
        pool,
        &NewAgent {
            account_id,
            agent_name: name,
            api_key: &api_key,
            port: 15777,
            memory: 8 * 1024 * 1024 * 1024,
        },
    )
    .await
    .expect("Failed to create agent")
}

/// Create a generic webhook integration subscribed to `event_types`.
pub async fn create_webhook(
    pool: &PgPool,
    account_id: &str,
    url: &str,
    event_types: &[&str],
) -> AccountIntegration {
    let event_types: Vec<String> = event_types.iter().map(|t| t.to_string()).collect();
    integrations::insert_integration(
        pool,
        account_id,
        &unique("hook"),
        IntegrationType::GenericWebhook,
        url,
        &event_types,
    )
    .await
    .expect("Failed to create integration")
}

/// Re-read an agent.
pub async fn reload_agent(pool: &PgPool, agent_id: &str) -> Agent {
    agents::get_agent(pool, agent_id)
        .await
        .expect("Failed to load agent")
        .expect("Agent missing")
}

/// Set an agent's `last_comm_date` to `minutes_ago` minutes in the past.
pub async fn backdate_last_comm(pool: &PgPool, agent_id: &str, minutes_ago: i64) {
    sqlx::query(
        "UPDATE agents SET last_comm_date = NOW() - make_interval(mins => $2) WHERE agent_id = $1",
    )
    .bind(agent_id)
    .bind(minutes_ago as i32)
    .execute(pool)
    .await
    .expect("Failed to backdate agent");
}
