// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SSM Cloud - Control Plane for Satisfactory Server Agents
//!
//! This crate is the multi-tenant control plane that agents running next to
//! dedicated game servers report to. It keeps the agent registry, hands out
//! tasks, ingests state and log streams, runs provisioning workflows and
//! delivers account webhooks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │  Agents (gRPC, port      │        │  Legacy agents (HTTP,    │
//! │  50051, x-api-key)       │        │  port 3000, x-api-key)   │
//! └────────────┬─────────────┘        └────────────┬─────────────┘
//!              │                                   │
//!              ▼                                   ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      ssm-cloud (This Crate)                      │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌────────────┐  │
//! │  │   Agent    │  │  Stream    │  │ Workflow   │  │ Integration│  │
//! │  │  Registry  │  │ Ingestors  │  │  Driver    │  │ Dispatcher │  │
//! │  └────────────┘  └────────────┘  └────────────┘  └────────────┘  │
//! │  ┌──────────────────────────────────────────────────────────────┐ │
//! │  │ Periodic jobs under a cluster-wide lease (JobRunner/JobLock) │ │
//! │  └──────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!              │                                   │
//!              ▼                                   ▼
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │        PostgreSQL        │        │  S3-compatible storage   │
//! └──────────────────────────┘        └──────────────────────────┘
//! ```
//!
//! # Agent Protocol
//!
//! | Service | Calls |
//! |---------|-------|
//! | `AgentConfigService` | `GetAgentConfig`, `UpdateAgentConfigVersionIp` |
//! | `AgentStateService` | `UpdateAgentState`, `UpdateAgentStateStream` |
//! | `AgentTaskService` | `GetAgentTasks`, `MarkAgentTaskCompleted`, `MarkAgentTaskFailed` |
//! | `AgentLogService` | `StreamLog` |
//! | `AgentModConfigService` | `GetModConfig`, `UpdateModConfig` |
//!
//! # Workflow Status State Machine
//!
//! ```text
//!   ┌─────────┐  every action   ┌───────────┐
//!   │ PENDING │────completed───►│ COMPLETED │
//!   └────┬────┘                 └───────────┘
//!        │ an action exhausted its retries
//!        ▼
//!   ┌────────┐
//!   │ FAILED │
//!   └────────┘
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `SSM_DATABASE_URL` | Yes* | - | PostgreSQL connection string |
//! | `DATABASE_URL` | Yes* | - | Fallback if above not set |
//! | `SSM_GRPC_PORT` | No | `50051` | gRPC agent port |
//! | `SSM_HTTP_PORT` | No | `3000` | Legacy HTTP agent port |
//! | `STORAGE_BUCKET` | Yes | - | Artifact bucket |
//! | `STORAGE_ENDPOINT` | No | - | S3-compatible endpoint |
//! | `STORAGE_REGION` | No | `us-east-1` | Bucket region |
//! | `STORAGE_KEY` / `STORAGE_SECRET` | No | - | Static credentials |
//! | `LATEST_AGENT_VERSION` | No | `0.0.0` | Released agent version |
//! | `WEBHOOK_AVATAR_URL` | No | SSM logo | Discord avatar |
//! | `TEMP_DIR` | No | system temp | Upload/flush temp files |
//! | `SSM_SHUTDOWN_GRACE_SECS` | No | `30` | Shutdown grace window |
//!
//! # Modules
//!
//! - [`config`]: Server configuration from environment variables
//! - [`db`]: PostgreSQL persistence
//! - [`error`]: Error types
//! - [`registry`]: Agent registry
//! - [`ingest`]: State and log stream ingestion
//! - [`jobs`]: Reconcilers run under the job lock
//! - [`workflow`]: Provisioning workflows
//! - [`outbox`] / [`dispatcher`]: Integration events and webhook delivery
//! - [`server`]: gRPC and legacy HTTP listeners
//! - [`runtime`]: Embeddable runtime wiring it all together

#![deny(missing_docs)]

/// Database migrations for ssm-cloud.
pub mod migrations;

/// Server configuration loaded from environment variables.
pub mod config;

/// PostgreSQL database operations.
pub mod db;

/// Error types for control plane operations.
pub mod error;

/// Identity, API key and join code generation.
pub mod ids;

/// Artifact storage (S3 and in-memory).
pub mod storage;

/// Integration outbox.
pub mod outbox;

/// Webhook delivery of outbox events.
pub mod dispatcher;

/// Agent registry: lookups, state transitions, artifact records.
pub mod registry;

/// Open agent streams.
pub mod streams;

/// State and log stream ingestion.
pub mod ingest;

/// Transport-independent agent protocol handlers.
pub mod handlers;

/// gRPC and legacy HTTP agent listeners.
pub mod server;

/// Cluster-wide job leases.
pub mod job_lock;

/// Periodic job supervision.
pub mod job_runner;

/// Periodic reconcilers.
pub mod jobs;

/// Provisioning workflows.
pub mod workflow;

/// Account, agent, integration and mod operations for the frontend.
pub mod services;

/// Embeddable runtime.
pub mod runtime;

pub use error::{Error, ErrorKind, Result};
pub use runtime::ControlPlaneRuntime;
