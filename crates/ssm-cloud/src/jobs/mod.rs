// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconcilers run by the [`JobRunner`](crate::job_runner::JobRunner).
//!
//! | Job | Name | Cadence |
//! |-----|------|---------|
//! | [`TaskPruner`] | `pruneAgentTasksJob` | 60 s |
//! | [`LogFlusher`] | `flushAgentLogsJob` | 30 s |
//! | [`LivenessMonitor`] | `checkAllAgentsLastCommsJob` | 30 s |
//! | [`ModConfigReconciler`] | `checkAgentModsConfigsJob` | 30 s |
//! | [`AgentVersionChecker`] | `checkAgentVersionsJob` | 60 s |
//!
//! The workflow driver and the integration dispatcher are jobs too; they
//! live in [`crate::workflow`] and [`crate::dispatcher`].
//!
//! Every job logs per-entity failures and moves on to the next entity.

mod agent_versions;
mod liveness;
mod log_flusher;
mod mod_config;
mod task_pruner;

pub use agent_versions::{AgentVersionChecker, is_newer_version};
pub use liveness::{LivenessMonitor, LivenessMonitorConfig};
pub use log_flusher::{FlushReport, LogFlusher};
pub use mod_config::{ModConfigReconciler, apply_catalog};
pub use task_pruner::TaskPruner;

use std::time::Duration;

use crate::job_runner::JobConfig;

/// Cadences of every periodic job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSchedule {
    /// Task pruner.
    pub task_pruner: JobConfig,
    /// Log flusher.
    pub log_flusher: JobConfig,
    /// Liveness monitor.
    pub liveness: JobConfig,
    /// Mod config reconciler.
    pub mod_config: JobConfig,
    /// Agent version checker.
    pub agent_versions: JobConfig,
    /// Workflow driver.
    pub workflow_driver: JobConfig,
    /// Integration dispatcher.
    pub dispatcher: JobConfig,
}

impl Default for JobSchedule {
    fn default() -> Self {
        Self {
            task_pruner: JobConfig::every(Duration::from_secs(60)),
            log_flusher: JobConfig::every(Duration::from_secs(30)),
            liveness: JobConfig::every(Duration::from_secs(30)),
            mod_config: JobConfig::every(Duration::from_secs(30)),
            agent_versions: JobConfig::every(Duration::from_secs(60)).starting_immediately(),
            workflow_driver: JobConfig::every(Duration::from_secs(5)),
            dispatcher: JobConfig::every(Duration::from_secs(10)),
        }
    }
}
