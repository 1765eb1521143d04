// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SSM Protocol - gRPC contract between game-server agents and SSM Cloud
//!
//! # Services
//!
//! | Service | Methods |
//! |---------|---------|
//! | `AgentConfigService` | `GetAgentConfig`, `UpdateAgentConfigVersionIp` |
//! | `AgentStateService` | `UpdateAgentState`, `UpdateAgentStateStream` (client stream) |
//! | `AgentTaskService` | `GetAgentTasks`, `MarkAgentTaskCompleted`, `MarkAgentTaskFailed` |
//! | `AgentLogService` | `StreamLog` (client stream) |
//! | `AgentModConfigService` | `GetModConfig`, `UpdateModConfig` |
//!
//! Every call carries the agent's API key in the [`API_KEY_METADATA`]
//! metadata entry.
//!
//! # Usage
//!
//! ```ignore
//! use ssm_protocol::agent_proto::agent_state_service_client::AgentStateServiceClient;
//! use ssm_protocol::{AgentStateRequest, with_api_key};
//!
//! let mut client = AgentStateServiceClient::connect("http://127.0.0.1:50051").await?;
//! let frame = AgentStateRequest { online: true, ..Default::default() };
//! client.update_agent_state(with_api_key(frame, "API-AGT-...")?).await?;
//! ```

pub mod messages;

/// Generated service stubs (client and server) for all agent services.
pub mod agent_proto {
    include!(concat!(env!("OUT_DIR"), "/ssm.agent.v1.AgentConfigService.rs"));
    include!(concat!(env!("OUT_DIR"), "/ssm.agent.v1.AgentStateService.rs"));
    include!(concat!(env!("OUT_DIR"), "/ssm.agent.v1.AgentTaskService.rs"));
    include!(concat!(env!("OUT_DIR"), "/ssm.agent.v1.AgentLogService.rs"));
    include!(concat!(env!("OUT_DIR"), "/ssm.agent.v1.AgentModConfigService.rs"));
}

pub use messages::*;

use tonic::metadata::{MetadataMap, MetadataValue};

/// Metadata entry carrying the agent API key.
pub const API_KEY_METADATA: &str = "x-api-key";

/// Errors raised while attaching credentials to a request.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The API key contains characters not allowed in metadata values.
    #[error("invalid api key metadata value")]
    InvalidApiKey,
}

/// Read the agent API key from call metadata.
///
/// Returns `None` when the entry is absent, not valid ASCII, or empty.
pub fn api_key_from_metadata(metadata: &MetadataMap) -> Option<&str> {
    metadata
        .get(API_KEY_METADATA)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Wrap a message in a request carrying the agent API key.
pub fn with_api_key<T>(message: T, api_key: &str) -> Result<tonic::Request<T>, ProtocolError> {
    let mut request = tonic::Request::new(message);
    let value: MetadataValue<_> = api_key
        .parse()
        .map_err(|_| ProtocolError::InvalidApiKey)?;
    request.metadata_mut().insert(API_KEY_METADATA, value);
    Ok(request)
}
