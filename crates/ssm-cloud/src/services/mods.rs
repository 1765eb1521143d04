// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mod catalog browsing and per-agent mod selection.
//!
//! Changing an agent's selection edits its mod config and enqueues a task so
//! the agent applies it on its next poll.

use serde_json::json;
use sqlx::PgPool;
use tracing::info;

use super::agents::get_account_agent;
use crate::db::agents::{self, ModConfig, SelectedMod};
use crate::db::mods::{self, ModPage, ModQuery};
use crate::db::tasks;
use crate::error::{Error, Result};

/// Task installing a mod.
pub const TASK_INSTALL_MOD: &str = "installmod";
/// Task updating a mod.
pub const TASK_UPDATE_MOD: &str = "updatemod";
/// Task removing a mod.
pub const TASK_UNINSTALL_MOD: &str = "uninstallmod";

/// One catalog page.
pub async fn list_mods(pool: &PgPool, query: &ModQuery) -> Result<ModPage> {
    Ok(mods::list_mods(pool, query).await?)
}

/// Edit an agent's mod config under its row lock, then save it and enqueue
/// `task_action` with the payload `edit` returns, all in one transaction.
async fn edit_mod_config<F>(
    pool: &PgPool,
    agent_id: &str,
    task_action: &str,
    edit: F,
) -> Result<ModConfig>
where
    F: FnOnce(&mut ModConfig) -> Result<serde_json::Value>,
{
    let mut tx = pool.begin().await?;
    let mut config = agents::lock_mod_config(&mut *tx, agent_id)
        .await?
        .ok_or_else(|| Error::NotFound("Agent".to_string()))?;

    let task_data = edit(&mut config)?;

    agents::update_mod_config(&mut *tx, agent_id, &config).await?;
    tasks::enqueue_task(&mut *tx, agent_id, task_action, &task_data).await?;
    tx.commit().await?;
    Ok(config)
}

/// Select `mod_reference` on an agent at `version` (latest when `None`).
///
/// Selecting a mod that is already selected changes its desired version.
pub async fn install_mod(
    pool: &PgPool,
    account_id: &str,
    agent_id: &str,
    mod_reference: &str,
    version: Option<&str>,
) -> Result<ModConfig> {
    let agent = get_account_agent(pool, account_id, agent_id).await?;
    let catalog = mods::get_mod(pool, mod_reference)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Mod {mod_reference}")))?;

    let version = match version {
        Some(v) if !catalog.versions.0.iter().any(|known| known.version == v) => {
            return Err(Error::Validation(format!(
                "mod {mod_reference} has no version {v}"
            )));
        }
        Some(v) => v.to_string(),
        None => catalog.latest_version.clone(),
    };

    let config = edit_mod_config(pool, &agent.agent_id, TASK_INSTALL_MOD, |config| {
        match config
            .selected_mods
            .iter_mut()
            .find(|m| m.mod_reference == mod_reference)
        {
            Some(selected) => {
                selected.desired_version = version.clone();
                selected.needs_update = false;
            }
            None => config.selected_mods.push(SelectedMod {
                mod_reference: mod_reference.to_string(),
                desired_version: version.clone(),
                installed_version: String::new(),
                installed: false,
                needs_update: false,
                config: json!({}),
            }),
        }
        Ok(json!({ "modReference": mod_reference, "version": version }))
    })
    .await?;

    info!(agent_id = %agent.agent_id, mod_reference = %mod_reference, version = %version, "Mod selected");
    Ok(config)
}

/// Move a selected mod to the latest catalog version.
pub async fn update_mod(
    pool: &PgPool,
    account_id: &str,
    agent_id: &str,
    mod_reference: &str,
) -> Result<ModConfig> {
    let agent = get_account_agent(pool, account_id, agent_id).await?;
    let catalog = mods::get_mod(pool, mod_reference)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Mod {mod_reference}")))?;
    let latest = catalog.latest_version;

    let config = edit_mod_config(pool, &agent.agent_id, TASK_UPDATE_MOD, |config| {
        let selected = config
            .selected_mods
            .iter_mut()
            .find(|m| m.mod_reference == mod_reference)
            .ok_or_else(|| Error::NotFound(format!("Selected mod {mod_reference}")))?;
        selected.desired_version = latest.clone();
        selected.needs_update = false;
        Ok(json!({ "modReference": mod_reference, "version": latest }))
    })
    .await?;

    info!(agent_id = %agent.agent_id, mod_reference = %mod_reference, "Mod updated");
    Ok(config)
}

/// Remove a mod from an agent's selection.
pub async fn uninstall_mod(
    pool: &PgPool,
    account_id: &str,
    agent_id: &str,
    mod_reference: &str,
) -> Result<ModConfig> {
    let agent = get_account_agent(pool, account_id, agent_id).await?;

    let config = edit_mod_config(pool, &agent.agent_id, TASK_UNINSTALL_MOD, |config| {
        let before = config.selected_mods.len();
        config.selected_mods.retain(|m| m.mod_reference != mod_reference);
        if config.selected_mods.len() == before {
            return Err(Error::NotFound(format!("Selected mod {mod_reference}")));
        }
        Ok(json!({ "modReference": mod_reference }))
    })
    .await?;

    info!(agent_id = %agent.agent_id, mod_reference = %mod_reference, "Mod removed");
    Ok(config)
}
