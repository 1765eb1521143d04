// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flags agents running an outdated agent release.

use async_trait::async_trait;
use semver::Version;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::db::agents;
use crate::error::Result;
use crate::job_runner::PeriodicJob;

fn parse_version(raw: &str) -> Option<Version> {
    Version::parse(raw.trim().trim_start_matches('v')).ok()
}

/// `latest > current` under semantic versioning.
///
/// Unparseable versions never count as newer.
pub fn is_newer_version(latest: &str, current: &str) -> bool {
    match (parse_version(latest), parse_version(current)) {
        (Some(latest), Some(current)) => latest > current,
        _ => false,
    }
}

/// Sets `update_available` from the configured latest agent release.
pub struct AgentVersionChecker {
    pool: PgPool,
    latest_version: String,
}

impl AgentVersionChecker {
    /// Create a checker comparing against `latest_version`.
    pub fn new(pool: PgPool, latest_version: impl Into<String>) -> Self {
        Self {
            pool,
            latest_version: latest_version.into(),
        }
    }

    /// Check once. Returns the number of agents whose flag changed.
    pub async fn check_once(&self, cancel: &CancellationToken) -> Result<usize> {
        let rows = agents::list_agent_versions(&self.pool).await?;
        let mut changed = 0;

        for (agent_id, version, update_available) in rows {
            if cancel.is_cancelled() {
                break;
            }
            let outdated = is_newer_version(&self.latest_version, &version);
            if outdated == update_available {
                continue;
            }
            match agents::set_update_available(&self.pool, &agent_id, outdated).await {
                Ok(()) => changed += 1,
                Err(e) => error!(agent_id = %agent_id, error = %e, "Failed to set update flag"),
            }
        }

        if changed > 0 {
            info!(changed, latest = %self.latest_version, "Agent update flags changed");
        } else {
            debug!("Agent update flags unchanged");
        }
        Ok(changed)
    }
}

#[async_trait]
impl PeriodicJob for AgentVersionChecker {
    fn name(&self) -> &'static str {
        "checkAgentVersionsJob"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.check_once(&cancel).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_newer_version() {
        assert!(is_newer_version("1.2.0", "1.1.9"));
        assert!(is_newer_version("v2.0.0", "1.9.9"));
        assert!(!is_newer_version("1.2.0", "1.2.0"));
        assert!(!is_newer_version("1.0.0", "1.0.1"));
        assert!(is_newer_version("1.0.0", "1.0.0-beta.1"));
    }

    #[test]
    fn test_unparseable_is_never_newer() {
        assert!(!is_newer_version("latest", "1.0.0"));
        assert!(!is_newer_version("1.0.0", ""));
    }
}
