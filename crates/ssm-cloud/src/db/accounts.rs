// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Accounts, users, memberships and the account audit log.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgExecutor, PgPool};

use crate::ids::new_id;

/// Tenant boundary.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Identity.
    pub account_id: String,
    /// Unique account name.
    pub account_name: String,
    /// Short code other users join with. Generated lazily.
    pub join_code: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Authenticated human identity.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Identity.
    pub user_id: String,
    /// External identity string from the IdP.
    pub eid: String,
    /// Email address.
    pub email: String,
    /// Display name.
    pub username: String,
    /// Profile image URL.
    pub profile_image_url: String,
    /// Currently selected account. Always a member of the linked set when set.
    pub active_account_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Audit log entry.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Identity.
    pub audit_id: String,
    /// Owning account.
    pub account_id: String,
    /// Audit type tag, e.g. `AgentAddedToAccount`.
    pub audit_type: String,
    /// Human readable message.
    pub message: String,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Accounts
// ============================================================================

/// Insert a new account.
pub async fn insert_account(pool: &PgPool, account_name: &str) -> Result<Account, sqlx::Error> {
    sqlx::query_as::<_, Account>(
        r#"
        INSERT INTO accounts (account_id, account_name)
        VALUES ($1, $2)
        RETURNING account_id, account_name, join_code, created_at, updated_at
        "#,
    )
    .bind(new_id())
    .bind(account_name)
    .fetch_one(pool)
    .await
}

/// Get an account by id.
pub async fn get_account(pool: &PgPool, account_id: &str) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(
        r#"
        SELECT account_id, account_name, join_code, created_at, updated_at
        FROM accounts
        WHERE account_id = $1
        "#,
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await
}

/// Get an account by join code.
pub async fn get_account_by_join_code(
    pool: &PgPool,
    join_code: &str,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(
        r#"
        SELECT account_id, account_name, join_code, created_at, updated_at
        FROM accounts
        WHERE join_code = $1
        "#,
    )
    .bind(join_code)
    .fetch_optional(pool)
    .await
}

/// Set the join code if the account has none yet.
///
/// Returns the account's join code after the call, which is the existing one
/// when another writer got there first.
pub async fn ensure_join_code(
    pool: &PgPool,
    account_id: &str,
    candidate: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(Option<String>,)> = sqlx::query_as(
        r#"
        UPDATE accounts
        SET join_code = COALESCE(join_code, $2), updated_at = NOW()
        WHERE account_id = $1
        RETURNING join_code
        "#,
    )
    .bind(account_id)
    .bind(candidate)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|(code,)| code))
}

/// Delete an account row. Dependent rows cascade.
pub async fn delete_account(pool: &PgPool, account_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM accounts WHERE account_id = $1")
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Users
// ============================================================================

/// Create or refresh a user at login.
pub async fn upsert_user(
    pool: &PgPool,
    eid: &str,
    email: &str,
    username: &str,
    profile_image_url: &str,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (user_id, eid, email, username, profile_image_url)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (eid) DO UPDATE SET
            email = EXCLUDED.email,
            username = EXCLUDED.username,
            profile_image_url = EXCLUDED.profile_image_url,
            updated_at = NOW()
        RETURNING user_id, eid, email, username, profile_image_url, active_account_id,
                  created_at, updated_at
        "#,
    )
    .bind(new_id())
    .bind(eid)
    .bind(email)
    .bind(username)
    .bind(profile_image_url)
    .fetch_one(pool)
    .await
}

/// Get a user by external identity.
pub async fn get_user_by_eid(pool: &PgPool, eid: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT user_id, eid, email, username, profile_image_url, active_account_id,
               created_at, updated_at
        FROM users
        WHERE eid = $1
        "#,
    )
    .bind(eid)
    .fetch_optional(pool)
    .await
}

/// Get a user by id.
pub async fn get_user(pool: &PgPool, user_id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT user_id, eid, email, username, profile_image_url, active_account_id,
               created_at, updated_at
        FROM users
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

/// Link a user to an account. Idempotent.
pub async fn link_user_account(
    pool: &PgPool,
    user_id: &str,
    account_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO user_accounts (user_id, account_id)
        VALUES ($1, $2)
        ON CONFLICT (user_id, account_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(account_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Select the active account, only if the user is linked to it.
pub async fn set_active_account(
    pool: &PgPool,
    user_id: &str,
    account_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET active_account_id = $2, updated_at = NOW()
        WHERE user_id = $1
          AND EXISTS (
              SELECT 1 FROM user_accounts
              WHERE user_id = $1 AND account_id = $2
          )
        "#,
    )
    .bind(user_id)
    .bind(account_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Accounts a user is linked to, oldest link first.
pub async fn list_user_accounts(pool: &PgPool, user_id: &str) -> Result<Vec<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(
        r#"
        SELECT a.account_id, a.account_name, a.join_code, a.created_at, a.updated_at
        FROM accounts a
        JOIN user_accounts ua ON ua.account_id = a.account_id
        WHERE ua.user_id = $1
        ORDER BY ua.linked_at
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Users linked to an account.
pub async fn list_account_users(pool: &PgPool, account_id: &str) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT u.user_id, u.eid, u.email, u.username, u.profile_image_url, u.active_account_id,
               u.created_at, u.updated_at
        FROM users u
        JOIN user_accounts ua ON ua.user_id = u.user_id
        WHERE ua.account_id = $1
        ORDER BY ua.linked_at
        "#,
    )
    .bind(account_id)
    .fetch_all(pool)
    .await
}

/// Unlink every user from an account and clear it as their active account.
pub async fn unlink_account_users(pool: &PgPool, account_id: &str) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE users SET active_account_id = NULL, updated_at = NOW()
        WHERE active_account_id = $1
        "#,
    )
    .bind(account_id)
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query("DELETE FROM user_accounts WHERE account_id = $1")
        .bind(account_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(result.rows_affected())
}

// ============================================================================
// Audit
// ============================================================================

/// Append an audit entry.
pub async fn append_audit<'e>(
    executor: impl PgExecutor<'e>,
    account_id: &str,
    audit_type: &str,
    message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO account_audit (audit_id, account_id, audit_type, message)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(new_id())
    .bind(account_id)
    .bind(audit_type)
    .bind(message)
    .execute(executor)
    .await?;
    Ok(())
}

/// Most recent audit entries for an account.
pub async fn list_audit(
    pool: &PgPool,
    account_id: &str,
    limit: i64,
) -> Result<Vec<AuditEntry>, sqlx::Error> {
    sqlx::query_as::<_, AuditEntry>(
        r#"
        SELECT audit_id, account_id, audit_type, message, created_at
        FROM account_audit
        WHERE account_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(account_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Delete every audit entry of an account.
pub async fn delete_account_audit(pool: &PgPool, account_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM account_audit WHERE account_id = $1")
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
