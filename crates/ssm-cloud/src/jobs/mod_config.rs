// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Keeps `needsUpdate` on every selected mod in line with the catalog.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::agent_versions::is_newer_version;
use crate::db::agents::{self, ModConfig};
use crate::db::mods;
use crate::error::Result;
use crate::job_runner::PeriodicJob;

/// Recompute `needs_update` on each selected mod.
///
/// `catalog` maps mod reference to the latest catalog version. Mods missing
/// from the catalog never need an update. Returns whether anything changed.
pub fn apply_catalog(config: &mut ModConfig, catalog: &HashMap<String, String>) -> bool {
    let mut changed = false;
    for selected in &mut config.selected_mods {
        let needs_update = catalog
            .get(&selected.mod_reference)
            .is_some_and(|latest| is_newer_version(latest, &selected.desired_version));
        if selected.needs_update != needs_update {
            selected.needs_update = needs_update;
            changed = true;
        }
    }
    changed
}

/// Derives mod update flags for every agent.
pub struct ModConfigReconciler {
    pool: PgPool,
}

impl ModConfigReconciler {
    /// Create a new reconciler.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Reconcile once. Returns the number of agents whose config changed.
    pub async fn reconcile_once(&self, cancel: &CancellationToken) -> Result<usize> {
        let configs = agents::list_agent_mod_configs(&self.pool).await?;
        if configs.is_empty() {
            debug!("No agents with selected mods");
            return Ok(0);
        }

        let mut references: Vec<String> = configs
            .iter()
            .flat_map(|(_, c)| c.selected_mods.iter().map(|m| m.mod_reference.clone()))
            .collect();
        references.sort();
        references.dedup();

        let catalog: HashMap<String, String> = mods::get_mods_by_reference(&self.pool, &references)
            .await?
            .into_iter()
            .map(|m| (m.mod_reference, m.latest_version))
            .collect();

        let mut changed = 0;
        for (agent_id, snapshot) in configs {
            if cancel.is_cancelled() {
                break;
            }
            let mut preview = snapshot.0;
            if !apply_catalog(&mut preview, &catalog) {
                continue;
            }
            match self.reconcile_agent(&agent_id, &catalog).await {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => error!(agent_id = %agent_id, error = %e, "Failed to save mod config"),
            }
        }

        if changed > 0 {
            info!(changed, "Agent mod configs updated");
        }
        Ok(changed)
    }

    /// Re-apply the catalog to the current config under the row lock.
    async fn reconcile_agent(
        &self,
        agent_id: &str,
        catalog: &HashMap<String, String>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let Some(mut config) = agents::lock_mod_config(&mut *tx, agent_id).await? else {
            return Ok(false);
        };
        if !apply_catalog(&mut config, catalog) {
            return Ok(false);
        }
        agents::update_mod_config(&mut *tx, agent_id, &config).await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl PeriodicJob for ModConfigReconciler {
    fn name(&self) -> &'static str {
        "checkAgentModsConfigsJob"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.reconcile_once(&cancel).await.map(|_| ())
    }
}
