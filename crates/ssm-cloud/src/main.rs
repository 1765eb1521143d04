// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SSM Cloud - Control Plane Server
//!
//! Serves the agent protocol over gRPC and legacy HTTP and runs:
//! - reconcilers (tasks, logs, liveness, mod configs, agent versions)
//! - the provisioning workflow driver
//! - the integration webhook dispatcher

use std::sync::Arc;
use tracing::{info, warn};

use ssm_cloud::config::Config;
use ssm_cloud::migrations;
use ssm_cloud::runtime::ControlPlaneRuntime;
use ssm_cloud::storage::S3Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ssm_cloud=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        grpc_addr = %config.grpc_addr,
        http_addr = %config.http_addr,
        bucket = %config.storage.bucket,
        "Starting SSM Cloud"
    );

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    info!("Connected to database");

    migrations::run(&pool).await?;

    info!("Database schema verified");

    let storage = Arc::new(S3Storage::from_config(&config.storage).await);

    let runtime = ControlPlaneRuntime::builder()
        .config(&config)
        .pool(pool)
        .storage(storage)
        .build()?
        .start()
        .await?;

    info!(
        grpc_addr = %runtime.grpc_addr(),
        http_addr = %runtime.http_addr(),
        "SSM Cloud ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("SSM Cloud shut down");

    Ok(())
}
