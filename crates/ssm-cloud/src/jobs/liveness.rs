// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background check for agents that stopped talking.
//!
//! Agents marked online whose `last_comm_date` is older than the threshold
//! are forced offline (`online = running = false`, CPU/RAM zeroed) and an
//! `agent.offline` event is enqueued for the owning account. This covers
//! agents that crash, lose network, or are switched off without sending a
//! final state frame.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::db::agents;
use crate::error::{Error, Result};
use crate::job_runner::PeriodicJob;
use crate::outbox::{AGENT_OFFLINE, Outbox};
use crate::registry::agent_event_data;

/// Configuration for the liveness monitor.
#[derive(Debug, Clone)]
pub struct LivenessMonitorConfig {
    /// Silence after which an agent counts as offline.
    pub offline_threshold: Duration,
}

impl Default for LivenessMonitorConfig {
    fn default() -> Self {
        Self {
            offline_threshold: Duration::from_secs(60 * 60), // 1 hour
        }
    }
}

/// Forces silent agents offline.
pub struct LivenessMonitor {
    outbox: Outbox,
    config: LivenessMonitorConfig,
}

impl LivenessMonitor {
    /// Create a new liveness monitor.
    pub fn new(outbox: Outbox, config: LivenessMonitorConfig) -> Self {
        Self { outbox, config }
    }

    /// Check once. Returns the ids of agents forced offline.
    pub async fn check_once(&self) -> Result<Vec<String>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.offline_threshold)
                .map_err(|e| Error::Other(format!("Invalid duration: {}", e)))?;

        let stale = agents::mark_stale_offline(self.outbox.pool(), cutoff).await?;
        if stale.is_empty() {
            debug!("No stale agents found");
            return Ok(Vec::new());
        }

        info!(count = stale.len(), "Marked stale agents offline");

        for agent in &stale {
            if let Err(e) = self
                .outbox
                .enqueue(&agent.account_id, AGENT_OFFLINE, agent_event_data(&agent.agent_name))
                .await
            {
                error!(
                    agent_id = %agent.agent_id,
                    error = %e,
                    "Failed to enqueue offline event"
                );
            }
        }

        Ok(stale.into_iter().map(|a| a.agent_id).collect())
    }
}

#[async_trait]
impl PeriodicJob for LivenessMonitor {
    fn name(&self) -> &'static str {
        "checkAllAgentsLastCommsJob"
    }

    async fn run(&self, _cancel: CancellationToken) -> Result<()> {
        self.check_once().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_threshold_is_one_hour() {
        let config = LivenessMonitorConfig::default();
        assert_eq!(config.offline_threshold, Duration::from_secs(3600));
    }
}
