// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable control plane runtime.
//!
//! [`ControlPlaneRuntime`] wires the agent listeners, the periodic jobs and
//! the integration dispatcher around one pool and one artifact store, so the
//! control plane can run inside an existing tokio application as well as
//! from the `ssm-cloud` binary.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ssm_cloud::runtime::ControlPlaneRuntime;
//! use ssm_cloud::storage::MemoryStorage;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!
//!     let runtime = ControlPlaneRuntime::builder()
//!         .pool(pool)
//!         .storage(Arc::new(MemoryStorage::new()))
//!         .grpc_addr("0.0.0.0:50051".parse()?)
//!         .http_addr("0.0.0.0:3000".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! Shutdown order: listeners stop accepting, open agent streams are
//! cancelled, periodic jobs get the grace window to finish, then every
//! lease this process still holds is released.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, DEFAULT_WEBHOOK_AVATAR_URL};
use crate::dispatcher::IntegrationDispatcher;
use crate::handlers::AgentHandlerState;
use crate::job_lock::{JobLock, new_holder_id};
use crate::job_runner::JobRunner;
use crate::jobs::{
    AgentVersionChecker, JobSchedule, LivenessMonitor, LivenessMonitorConfig, LogFlusher,
    ModConfigReconciler, TaskPruner,
};
use crate::outbox::Outbox;
use crate::registry::AgentRegistry;
use crate::server::{run_grpc_server, run_http_server};
use crate::storage::ObjectStorage;
use crate::streams::StreamRegistry;
use crate::workflow::{ActionRegistry, WorkflowDriver};

/// Builder for creating a [`ControlPlaneRuntime`].
pub struct ControlPlaneRuntimeBuilder {
    pool: Option<PgPool>,
    storage: Option<Arc<dyn ObjectStorage>>,
    grpc_addr: SocketAddr,
    http_addr: SocketAddr,
    temp_dir: PathBuf,
    latest_agent_version: String,
    webhook_avatar_url: String,
    schedule: JobSchedule,
    liveness: LivenessMonitorConfig,
    shutdown_grace: Duration,
    holder_id: Option<String>,
}

impl Default for ControlPlaneRuntimeBuilder {
    fn default() -> Self {
        Self {
            pool: None,
            storage: None,
            grpc_addr: SocketAddr::from(([0, 0, 0, 0], 50051)),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            temp_dir: std::env::temp_dir(),
            latest_agent_version: "0.0.0".to_string(),
            webhook_avatar_url: DEFAULT_WEBHOOK_AVATAR_URL.to_string(),
            schedule: JobSchedule::default(),
            liveness: LivenessMonitorConfig::default(),
            shutdown_grace: Duration::from_secs(30),
            holder_id: None,
        }
    }
}

impl ControlPlaneRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy listener addresses and tunables from a loaded [`Config`].
    pub fn config(self, config: &Config) -> Self {
        self.grpc_addr(config.grpc_addr)
            .http_addr(config.http_addr)
            .temp_dir(config.temp_dir.clone())
            .latest_agent_version(config.latest_agent_version.clone())
            .webhook_avatar_url(config.webhook_avatar_url.clone())
            .shutdown_grace(config.shutdown_grace)
    }

    /// Set the PostgreSQL connection pool (required).
    pub fn pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set the artifact store (required).
    pub fn storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the gRPC bind address. Port 0 picks a free port.
    ///
    /// Default: `0.0.0.0:50051`
    pub fn grpc_addr(mut self, addr: SocketAddr) -> Self {
        self.grpc_addr = addr;
        self
    }

    /// Set the legacy HTTP bind address.
    ///
    /// Default: `0.0.0.0:3000`
    pub fn http_addr(mut self, addr: SocketAddr) -> Self {
        self.http_addr = addr;
        self
    }

    /// Directory for upload and flush temp files.
    pub fn temp_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.temp_dir = path.into();
        self
    }

    /// Latest released agent version.
    pub fn latest_agent_version(mut self, version: impl Into<String>) -> Self {
        self.latest_agent_version = version.into();
        self
    }

    /// Avatar used in Discord webhook payloads.
    pub fn webhook_avatar_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_avatar_url = url.into();
        self
    }

    /// Override job cadences.
    pub fn schedule(mut self, schedule: JobSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Override the liveness threshold.
    pub fn liveness(mut self, config: LivenessMonitorConfig) -> Self {
        self.liveness = config;
        self
    }

    /// How long shutdown waits for running jobs and listeners.
    ///
    /// Default: 30 seconds
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Fixed lock holder id. Generated when unset.
    pub fn holder_id(mut self, holder_id: impl Into<String>) -> Self {
        self.holder_id = Some(holder_id.into());
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ControlPlaneRuntimeConfig> {
        let pool = self
            .pool
            .ok_or_else(|| anyhow::anyhow!("pool is required"))?;
        let storage = self
            .storage
            .ok_or_else(|| anyhow::anyhow!("storage is required"))?;

        Ok(ControlPlaneRuntimeConfig {
            pool,
            storage,
            grpc_addr: self.grpc_addr,
            http_addr: self.http_addr,
            temp_dir: self.temp_dir,
            latest_agent_version: self.latest_agent_version,
            webhook_avatar_url: self.webhook_avatar_url,
            schedule: self.schedule,
            liveness: self.liveness,
            shutdown_grace: self.shutdown_grace,
            holder_id: self.holder_id.unwrap_or_else(new_holder_id),
        })
    }
}

/// Configuration for a [`ControlPlaneRuntime`].
pub struct ControlPlaneRuntimeConfig {
    pool: PgPool,
    storage: Arc<dyn ObjectStorage>,
    grpc_addr: SocketAddr,
    http_addr: SocketAddr,
    temp_dir: PathBuf,
    latest_agent_version: String,
    webhook_avatar_url: String,
    schedule: JobSchedule,
    liveness: LivenessMonitorConfig,
    shutdown_grace: Duration,
    holder_id: String,
}

impl ControlPlaneRuntimeConfig {
    /// Bind the listeners and spawn every job.
    pub async fn start(self) -> Result<ControlPlaneRuntime> {
        let outbox = Outbox::new(self.pool.clone(), self.webhook_avatar_url);
        let registry = AgentRegistry::new(self.pool.clone(), outbox.clone());
        let streams = StreamRegistry::new();
        let state = Arc::new(AgentHandlerState::new(
            registry,
            self.storage.clone(),
            streams.clone(),
            self.temp_dir.clone(),
        ));

        let runner = JobRunner::new(
            JobLock::new(self.pool.clone()),
            self.holder_id.clone(),
            self.shutdown_grace,
        );
        let schedule = self.schedule;

        let job_handles = vec![
            runner.spawn(
                Arc::new(TaskPruner::new(self.pool.clone())),
                schedule.task_pruner,
            ),
            runner.spawn(
                Arc::new(LogFlusher::new(
                    self.pool.clone(),
                    self.storage.clone(),
                    self.temp_dir.clone(),
                )),
                schedule.log_flusher,
            ),
            runner.spawn(
                Arc::new(LivenessMonitor::new(outbox.clone(), self.liveness)),
                schedule.liveness,
            ),
            runner.spawn(
                Arc::new(ModConfigReconciler::new(self.pool.clone())),
                schedule.mod_config,
            ),
            runner.spawn(
                Arc::new(AgentVersionChecker::new(
                    self.pool.clone(),
                    self.latest_agent_version,
                )),
                schedule.agent_versions,
            ),
            runner.spawn(
                Arc::new(WorkflowDriver::new(
                    self.pool.clone(),
                    outbox.clone(),
                    ActionRegistry::with_create_agent_actions(),
                )),
                schedule.workflow_driver,
            ),
            runner.spawn(
                Arc::new(IntegrationDispatcher::new(outbox, self.holder_id.clone())?),
                schedule.dispatcher,
            ),
        ];

        let grpc_listener = TcpListener::bind(self.grpc_addr).await?;
        let http_listener = TcpListener::bind(self.http_addr).await?;
        let grpc_addr = grpc_listener.local_addr()?;
        let http_addr = http_listener.local_addr()?;

        let server_shutdown = CancellationToken::new();
        let grpc_handle = tokio::spawn({
            let state = state.clone();
            let shutdown = server_shutdown.clone();
            async move {
                run_grpc_server(grpc_listener, state, shutdown)
                    .await
                    .map_err(anyhow::Error::from)
            }
        });
        let http_handle = tokio::spawn({
            let state = state.clone();
            let shutdown = server_shutdown.clone();
            async move {
                run_http_server(http_listener, state, shutdown)
                    .await
                    .map_err(anyhow::Error::from)
            }
        });

        info!(
            grpc_addr = %grpc_addr,
            http_addr = %http_addr,
            holder_id = %self.holder_id,
            jobs = job_handles.len(),
            "ControlPlaneRuntime started"
        );

        Ok(ControlPlaneRuntime {
            grpc_handle,
            http_handle,
            job_handles,
            runner,
            streams,
            server_shutdown,
            state,
            grpc_addr,
            http_addr,
            shutdown_grace: self.shutdown_grace,
        })
    }
}

/// A running control plane.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ControlPlaneRuntime {
    grpc_handle: JoinHandle<Result<()>>,
    http_handle: JoinHandle<Result<()>>,
    job_handles: Vec<JoinHandle<()>>,
    runner: JobRunner,
    streams: StreamRegistry,
    server_shutdown: CancellationToken,
    state: Arc<AgentHandlerState>,
    grpc_addr: SocketAddr,
    http_addr: SocketAddr,
    shutdown_grace: Duration,
}

impl ControlPlaneRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ControlPlaneRuntimeBuilder {
        ControlPlaneRuntimeBuilder::new()
    }

    /// Bound gRPC address.
    pub fn grpc_addr(&self) -> SocketAddr {
        self.grpc_addr
    }

    /// Bound HTTP address.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Shared handler state.
    pub fn state(&self) -> &Arc<AgentHandlerState> {
        &self.state
    }

    /// Check if the listeners and every job loop are still running.
    pub fn is_running(&self) -> bool {
        !self.grpc_handle.is_finished()
            && !self.http_handle.is_finished()
            && self.job_handles.iter().all(|h| !h.is_finished())
    }

    /// Gracefully shut down the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("ControlPlaneRuntime shutting down...");

        self.server_shutdown.cancel();
        self.streams.cancel_all();
        self.runner.shutdown();

        let jobs = futures::future::join_all(self.job_handles);
        match tokio::time::timeout(self.shutdown_grace, jobs).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("Job loop panicked: {}", e);
                    }
                }
            }
            Err(_) => warn!(
                grace_secs = self.shutdown_grace.as_secs_f64(),
                "Job loops did not stop within grace window"
            ),
        }

        self.runner.release_all().await;

        let mut first_error = None;
        for (name, handle) in [("gRPC", self.grpc_handle), ("HTTP", self.http_handle)] {
            match tokio::time::timeout(self.shutdown_grace, handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    error!("{} server error during shutdown: {}", name, e);
                    first_error.get_or_insert(e);
                }
                Ok(Err(e)) => {
                    error!("{} server task panicked: {}", name, e);
                    first_error.get_or_insert(anyhow::anyhow!("{name} server task panicked: {e}"));
                }
                Err(_) => warn!("{} server did not stop within grace window", name),
            }
        }

        match first_error {
            None => {
                info!("ControlPlaneRuntime shutdown complete");
                Ok(())
            }
            Some(e) => Err(e),
        }
    }
}
