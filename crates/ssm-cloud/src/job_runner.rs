// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Periodic job runner.
//!
//! Runs a named job at a fixed cadence, but only while this process holds
//! the job's [`JobLock`]. One loop is spawned per job:
//!
//! ```text
//!   ┌──────── sleep(interval) ◄──────────────────────────┐
//!   ▼                                                     │
//!  local guard ──busy──────────────────────────────────────┤
//!   │ free                                                 │
//!   ▼                                                     │
//!  try_acquire ──held elsewhere────────────────────────────┤
//!   │ acquired                                             │
//!   ▼                                                     │
//!  job.run(cancel)  (lease renewed every ttl/2)           │
//!   │                                                     │
//!   ▼                                                     │
//!  release ───────────────────────────────────────────────┘
//! ```
//!
//! On shutdown the runner's token is cancelled. Running jobs observe their
//! child token, get up to the grace window to return, and the lock is
//! released either way.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::job_lock::JobLock;

/// Cadence and lease settings of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobConfig {
    /// Time between attempts.
    pub interval: Duration,
    /// Lease length taken on each attempt.
    pub lease_ttl: Duration,
    /// Attempt once right away instead of waiting a full interval.
    pub start_immediately: bool,
}

impl JobConfig {
    /// Config with `interval`, a lease of twice the interval (at least 30 s),
    /// and no immediate start.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            lease_ttl: (interval * 2).max(Duration::from_secs(30)),
            start_immediately: false,
        }
    }

    /// Set the lease length.
    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    /// Run the first attempt immediately.
    pub fn starting_immediately(mut self) -> Self {
        self.start_immediately = true;
        self
    }
}

/// A unit of periodic work.
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    /// Cluster-wide job name, also the lock name.
    fn name(&self) -> &'static str;

    /// Run once. Implementations should return early when `cancel` fires.
    async fn run(&self, cancel: CancellationToken) -> crate::error::Result<()>;
}

/// Outcome of one tick, exposed for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The job ran (successfully or not).
    Ran,
    /// Another process holds the lock.
    LockHeld,
    /// A run of the same job is already in flight in this process.
    Busy,
    /// The lock store failed.
    LockError,
}

/// Spawns and supervises periodic jobs.
#[derive(Clone)]
pub struct JobRunner {
    lock: JobLock,
    holder_id: String,
    in_flight: Arc<Mutex<HashSet<&'static str>>>,
    cancel: CancellationToken,
    grace: Duration,
}

impl JobRunner {
    /// Create a runner identified by `holder_id`.
    pub fn new(lock: JobLock, holder_id: impl Into<String>, grace: Duration) -> Self {
        Self {
            lock,
            holder_id: holder_id.into(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            cancel: CancellationToken::new(),
            grace,
        }
    }

    /// Lock holder identity of this runner.
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Token cancelled by [`JobRunner::shutdown`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the loop of one job.
    pub fn spawn(&self, job: Arc<dyn PeriodicJob>, config: JobConfig) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run_loop(job, config).await })
    }

    /// Signal every loop and running job to stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Release any lease still held by this runner.
    pub async fn release_all(&self) {
        match self.lock.release_all(&self.holder_id).await {
            Ok(0) => {}
            Ok(n) => info!(released = n, holder = %self.holder_id, "Released job locks"),
            Err(e) => error!(error = %e, "Failed to release job locks"),
        }
    }

    async fn run_loop(&self, job: Arc<dyn PeriodicJob>, config: JobConfig) {
        info!(
            job = job.name(),
            interval_secs = config.interval.as_secs_f64(),
            lease_ttl_secs = config.lease_ttl.as_secs_f64(),
            "Periodic job started"
        );

        if config.start_immediately && !self.cancel.is_cancelled() {
            self.tick(job.as_ref(), &config).await;
        }

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    break;
                }

                _ = tokio::time::sleep(config.interval) => {
                    self.tick(job.as_ref(), &config).await;
                }
            }
        }

        info!(job = job.name(), "Periodic job stopped");
    }

    /// Attempt one run of `job`.
    pub async fn tick(&self, job: &dyn PeriodicJob, config: &JobConfig) -> TickOutcome {
        let name = job.name();

        let Some(_guard) = InFlightGuard::try_enter(&self.in_flight, name) else {
            debug!(job = name, "Previous run still in flight, skipping");
            return TickOutcome::Busy;
        };

        match self
            .lock
            .try_acquire(name, config.lease_ttl, &self.holder_id)
            .await
        {
            Ok(Some(_grant)) => {}
            Ok(None) => return TickOutcome::LockHeld,
            Err(e) => {
                error!(job = name, error = %e, "Failed to acquire job lock");
                return TickOutcome::LockError;
            }
        }

        self.run_locked(job, config).await;

        match self.lock.release(name, &self.holder_id).await {
            Ok(true) => {}
            Ok(false) => warn!(job = name, "Job lock was taken over before release"),
            Err(e) => error!(job = name, error = %e, "Failed to release job lock"),
        }

        TickOutcome::Ran
    }

    async fn run_locked(&self, job: &dyn PeriodicJob, config: &JobConfig) {
        let name = job.name();
        let child = self.cancel.child_token();
        let run = job.run(child);
        tokio::pin!(run);

        let renew_every = (config.lease_ttl / 2).max(Duration::from_millis(100));
        let mut renew = tokio::time::interval_at(tokio::time::Instant::now() + renew_every, renew_every);

        let result = loop {
            tokio::select! {
                result = &mut run => break Some(result),

                _ = renew.tick() => {
                    match self.lock.renew(name, config.lease_ttl, &self.holder_id).await {
                        Ok(true) => {}
                        Ok(false) => warn!(job = name, "Lost job lock while running"),
                        Err(e) => error!(job = name, error = %e, "Failed to renew job lock"),
                    }
                }

                _ = self.cancel.cancelled() => {
                    match tokio::time::timeout(self.grace, &mut run).await {
                        Ok(result) => break Some(result),
                        Err(_) => {
                            warn!(
                                job = name,
                                grace_secs = self.grace.as_secs_f64(),
                                "Job did not stop within grace window"
                            );
                            break None;
                        }
                    }
                }
            }
        };

        if let Some(Err(e)) = result {
            error!(job = name, error = %e, "Job run failed");
        }
    }
}

/// Marks a job name as in flight in this process until dropped.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<&'static str>>>,
    name: &'static str,
}

impl InFlightGuard {
    fn try_enter(set: &Arc<Mutex<HashSet<&'static str>>>, name: &'static str) -> Option<Self> {
        let mut names = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !names.insert(name) {
            return None;
        }
        Some(Self {
            set: set.clone(),
            name,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut names = self
            .set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        names.remove(self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_config_every() {
        let config = JobConfig::every(Duration::from_secs(5));
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.lease_ttl, Duration::from_secs(30));
        assert!(!config.start_immediately);

        let config = JobConfig::every(Duration::from_secs(60)).starting_immediately();
        assert_eq!(config.lease_ttl, Duration::from_secs(120));
        assert!(config.start_immediately);
    }

    #[test]
    fn test_in_flight_guard_is_exclusive_per_name() {
        let set = Arc::new(Mutex::new(HashSet::new()));

        let first = InFlightGuard::try_enter(&set, "workflowJob");
        assert!(first.is_some());
        assert!(InFlightGuard::try_enter(&set, "workflowJob").is_none());
        assert!(InFlightGuard::try_enter(&set, "otherJob").is_some());

        drop(first);
        assert!(InFlightGuard::try_enter(&set, "workflowJob").is_some());
    }
}
