// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for ssm-cloud.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default avatar shown on Discord webhook messages.
pub const DEFAULT_WEBHOOK_AVATAR_URL: &str =
    "https://ssmcloud.hostxtra.co.uk/public/images/ssm_logo128_outline.png";

/// Object storage settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Custom endpoint for S3-compatible stores (MinIO, R2, ...).
    pub endpoint: Option<String>,
    /// Bucket region.
    pub region: String,
    /// Static access key. Falls back to the AWS default chain when unset.
    pub access_key: Option<String>,
    /// Static secret key.
    pub secret_key: Option<String>,
    /// Bucket holding every account's artifacts.
    pub bucket: String,
}

/// Control plane configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// gRPC listener for the agent protocol.
    pub grpc_addr: SocketAddr,
    /// HTTP listener for the legacy agent API.
    pub http_addr: SocketAddr,
    /// Object storage settings.
    pub storage: StorageConfig,
    /// Most recent released agent version, used for drift detection.
    pub latest_agent_version: String,
    /// JWKS endpoint of the identity provider (used by the frontend router).
    pub jwks_url: Option<String>,
    /// Pre-shared key expected in the frontend `apikey` header.
    pub frontend_api_key: Option<String>,
    /// Avatar URL for Discord webhook payloads.
    pub webhook_avatar_url: String,
    /// Directory for temporary upload/flush files.
    pub temp_dir: PathBuf,
    /// How long shutdown waits for in-flight work.
    pub shutdown_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("SSM_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| ConfigError::MissingEnvVar("SSM_DATABASE_URL or DATABASE_URL"))?;

        let grpc_port = parse_port("SSM_GRPC_PORT", 50051)?;
        let http_port = parse_port("SSM_HTTP_PORT", 3000)?;

        let bucket = std::env::var("STORAGE_BUCKET")
            .map_err(|_| ConfigError::MissingEnvVar("STORAGE_BUCKET"))?;

        let storage = StorageConfig {
            endpoint: non_empty_var("STORAGE_ENDPOINT"),
            region: non_empty_var("STORAGE_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            access_key: non_empty_var("STORAGE_KEY"),
            secret_key: non_empty_var("STORAGE_SECRET"),
            bucket,
        };

        let latest_agent_version =
            non_empty_var("LATEST_AGENT_VERSION").unwrap_or_else(|| "0.0.0".to_string());

        let webhook_avatar_url = non_empty_var("WEBHOOK_AVATAR_URL")
            .unwrap_or_else(|| DEFAULT_WEBHOOK_AVATAR_URL.to_string());

        let temp_dir = non_empty_var("TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        let shutdown_grace_secs: u64 = match non_empty_var("SSM_SHUTDOWN_GRACE_SECS") {
            Some(v) => v.parse().map_err(|_| {
                ConfigError::Invalid("SSM_SHUTDOWN_GRACE_SECS", "must be a number of seconds")
            })?,
            None => 30,
        };

        Ok(Self {
            database_url,
            grpc_addr: SocketAddr::from(([0, 0, 0, 0], grpc_port)),
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            storage,
            latest_agent_version,
            jwks_url: non_empty_var("JWKS_URL"),
            frontend_api_key: non_empty_var("FRONTEND_API_KEY"),
            webhook_avatar_url,
            temp_dir,
            shutdown_grace: Duration::from_secs(shutdown_grace_secs),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_port(key: &'static str, default: u16) -> Result<u16, ConfigError> {
    match non_empty_var(key) {
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError::Invalid(key, "must be a valid port number")),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// An environment variable has an invalid value.
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
