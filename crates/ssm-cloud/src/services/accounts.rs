// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Account membership and lifecycle.

use serde_json::{Map, Value, json};
use sqlx::PgPool;
use tracing::{info, warn};

use super::required;
use crate::db::accounts::{self, Account, User};
use crate::db::{agents, integrations};
use crate::error::{Error, Result, is_unique_violation};
use crate::ids::generate_join_code;
use crate::outbox::{Outbox, USER_ADDED};
use crate::storage::{ObjectStorage, account_prefix};

/// Attempts at drawing an unused join code.
const JOIN_CODE_ATTEMPTS: usize = 5;

/// Audit type written when an account is created.
pub const AUDIT_ACCOUNT_CREATED: &str = "AccountCreated";
/// Audit type written when a user joins an account.
pub const AUDIT_USER_JOINED: &str = "UserJoinedAccount";

fn user_event_data(user: &User) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("user_name".to_string(), json!(user.username));
    data
}

async fn require_user(pool: &PgPool, user_id: &str) -> Result<User> {
    accounts::get_user(pool, user_id)
        .await?
        .ok_or_else(|| Error::NotFound("User".to_string()))
}

/// Upsert the user behind an identity-provider login.
pub async fn login_user(
    pool: &PgPool,
    eid: &str,
    email: &str,
    username: &str,
    profile_image_url: &str,
) -> Result<User> {
    let eid = required("eid", eid)?;
    Ok(accounts::upsert_user(pool, eid, email, username, profile_image_url).await?)
}

/// Accounts the user belongs to.
pub async fn list_user_accounts(pool: &PgPool, user_id: &str) -> Result<Vec<Account>> {
    Ok(accounts::list_user_accounts(pool, user_id).await?)
}

/// Get an account, generating its join code if it has none.
pub async fn get_account(pool: &PgPool, account_id: &str) -> Result<Account> {
    let mut account = accounts::get_account(pool, account_id)
        .await?
        .ok_or_else(|| Error::NotFound("Account".to_string()))?;

    if account.join_code.is_none() {
        account.join_code = Some(ensure_join_code(pool, account_id).await?);
    }
    Ok(account)
}

/// Assign a join code unless one exists. Returns the account's code.
pub async fn ensure_join_code(pool: &PgPool, account_id: &str) -> Result<String> {
    for _ in 0..JOIN_CODE_ATTEMPTS {
        match accounts::ensure_join_code(pool, account_id, &generate_join_code()).await {
            Ok(Some(code)) => return Ok(code),
            Ok(None) => return Err(Error::NotFound("Account".to_string())),
            Err(e) if is_unique_violation(&e) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::Conflict("could not allocate a unique join code".to_string()))
}

/// Create an account, make the user a member and switch to it.
pub async fn create_account(pool: &PgPool, user_id: &str, account_name: &str) -> Result<Account> {
    let account_name = required("account name", account_name)?;
    let user = require_user(pool, user_id).await?;

    let account = accounts::insert_account(pool, account_name)
        .await
        .map_err(|e| {
            Error::conflict_on_unique(e, format!("account with name {account_name} already exists"))
        })?;

    ensure_join_code(pool, &account.account_id).await?;
    accounts::link_user_account(pool, &user.user_id, &account.account_id).await?;
    accounts::set_active_account(pool, &user.user_id, &account.account_id).await?;
    accounts::append_audit(
        pool,
        &account.account_id,
        AUDIT_ACCOUNT_CREATED,
        &format!("Account created by {}", user.username),
    )
    .await?;

    info!(account_id = %account.account_id, user_id = %user.user_id, "Account created");
    get_account(pool, &account.account_id).await
}

/// Join the account owning `join_code` and switch to it.
pub async fn join_account(
    pool: &PgPool,
    outbox: &Outbox,
    user_id: &str,
    join_code: &str,
) -> Result<Account> {
    let join_code = required("join code", join_code)?.to_ascii_uppercase();
    let user = require_user(pool, user_id).await?;

    let account = accounts::get_account_by_join_code(pool, &join_code)
        .await?
        .ok_or_else(|| Error::NotFound("Account".to_string()))?;

    accounts::link_user_account(pool, &user.user_id, &account.account_id).await?;
    accounts::set_active_account(pool, &user.user_id, &account.account_id).await?;
    accounts::append_audit(
        pool,
        &account.account_id,
        AUDIT_USER_JOINED,
        &format!("User {} joined the account", user.username),
    )
    .await?;
    outbox
        .enqueue(&account.account_id, USER_ADDED, user_event_data(&user))
        .await?;

    info!(account_id = %account.account_id, user_id = %user.user_id, "User joined account");
    Ok(account)
}

/// Make `account_id` the user's active account. The user must be a member.
pub async fn switch_account(pool: &PgPool, user_id: &str, account_id: &str) -> Result<()> {
    if !accounts::set_active_account(pool, user_id, account_id).await? {
        return Err(Error::NotFound("Account".to_string()));
    }
    Ok(())
}

/// Delete an account and everything it owns.
///
/// Order: agents, objects under `{accountId}/`, audit, integrations, user
/// links, and finally the account row.
pub async fn delete_account(
    pool: &PgPool,
    storage: &dyn ObjectStorage,
    account_id: &str,
) -> Result<()> {
    accounts::get_account(pool, account_id)
        .await?
        .ok_or_else(|| Error::NotFound("Account".to_string()))?;

    for agent in agents::list_account_agents(pool, account_id).await? {
        agents::delete_agent(pool, &agent.agent_id).await?;
    }

    let removed = storage.delete_prefix(&account_prefix(account_id)).await?;
    accounts::delete_account_audit(pool, account_id).await?;
    integrations::delete_account_integrations(pool, account_id).await?;
    let unlinked = accounts::unlink_account_users(pool, account_id).await?;

    if !accounts::delete_account(pool, account_id).await? {
        warn!(account_id = %account_id, "Account vanished during delete");
    }

    info!(
        account_id = %account_id,
        objects_removed = removed,
        users_unlinked = unlinked,
        "Account deleted"
    );
    Ok(())
}
