// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database operations for ssm-cloud.
//!
//! Each submodule owns one group of tables and exposes free async functions
//! taking a `&PgPool`. Joined reads are spelled out per call site.

pub mod accounts;
pub mod agents;
pub mod integrations;
pub mod logs;
pub mod mods;
pub mod stats;
pub mod tasks;
pub mod workflows;

use sqlx::PgPool;

/// Check database connectivity.
pub async fn health_check(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(pool).await?;
    Ok(row.0 == 1)
}
