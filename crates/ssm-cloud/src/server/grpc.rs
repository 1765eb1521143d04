// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! gRPC agent services.
//!
//! Every call authenticates through the `x-api-key` metadata entry, then
//! dispatches to [`crate::handlers`]. Client streams are registered in the
//! [`StreamRegistry`](crate::streams::StreamRegistry) for the duration of
//! the call and always end with an empty response.

use std::net::SocketAddr;
use std::sync::Arc;

use ssm_protocol::agent_proto::agent_config_service_server::{
    AgentConfigService, AgentConfigServiceServer,
};
use ssm_protocol::agent_proto::agent_log_service_server::{AgentLogService, AgentLogServiceServer};
use ssm_protocol::agent_proto::agent_mod_config_service_server::{
    AgentModConfigService, AgentModConfigServiceServer,
};
use ssm_protocol::agent_proto::agent_state_service_server::{
    AgentStateService, AgentStateServiceServer,
};
use ssm_protocol::agent_proto::agent_task_service_server::{
    AgentTaskService, AgentTaskServiceServer,
};
use ssm_protocol::{self as proto, api_key_from_metadata};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info};

use crate::db::agents::{Agent, AgentStatus, ModConfig, SelectedMod, ServerConfig};
use crate::db::tasks::AgentTask;
use crate::handlers::{self, AgentConfigView, AgentHandlerState};
use crate::ingest::{ingest_log_stream, ingest_state_stream};
use crate::streams::StreamKind;

// ============================================================================
// Conversions
// ============================================================================

impl From<&ServerConfig> for proto::ServerConfig {
    fn from(c: &ServerConfig) -> Self {
        proto::ServerConfig {
            max_players: c.max_players,
            worker_threads: c.worker_threads,
            branch: c.branch.clone(),
            update_on_start: c.update_on_start,
            auto_restart: c.auto_restart,
            auto_pause: c.auto_pause,
            auto_save_on_disconnect: c.auto_save_on_disconnect,
            autosave_interval: c.autosave_interval,
            disable_seasonal_events: c.disable_seasonal_events,
        }
    }
}

impl From<&AgentConfigView> for proto::AgentConfigResponse {
    fn from(view: &AgentConfigView) -> Self {
        proto::AgentConfigResponse {
            config: Some(proto::AgentConfig {
                version: view.version.clone(),
                ip: view.ip.clone(),
                port: view.port,
                memory: view.memory,
                backup_interval: view.backup_interval,
                backup_keep_amount: view.backup_keep_amount,
                auto_update: view.auto_update,
            }),
            server_config: Some(proto::ServerConfig::from(&view.server_config)),
        }
    }
}

impl From<&AgentTask> for proto::AgentTask {
    fn from(task: &AgentTask) -> Self {
        proto::AgentTask {
            id: task.task_id.clone(),
            action: task.action.clone(),
            data: task.data.0.to_string(),
            completed: task.completed,
            retries: task.retries,
        }
    }
}

impl From<&ModConfig> for proto::ModConfig {
    fn from(config: &ModConfig) -> Self {
        proto::ModConfig {
            selected_mods: config
                .selected_mods
                .iter()
                .map(|m| proto::SelectedMod {
                    mod_reference: m.mod_reference.clone(),
                    desired_version: m.desired_version.clone(),
                    installed_version: m.installed_version.clone(),
                    installed: m.installed,
                    needs_update: m.needs_update,
                    config: m.config.to_string(),
                })
                .collect(),
        }
    }
}

impl TryFrom<&proto::ModConfig> for ModConfig {
    type Error = Status;

    fn try_from(config: &proto::ModConfig) -> Result<Self, Status> {
        let selected_mods = config
            .selected_mods
            .iter()
            .map(|m| {
                let settings = if m.config.trim().is_empty() {
                    serde_json::Value::Null
                } else {
                    serde_json::from_str(&m.config).map_err(|e| {
                        Status::invalid_argument(format!(
                            "invalid config for mod {}: {e}",
                            m.mod_reference
                        ))
                    })?
                };
                Ok(SelectedMod {
                    mod_reference: m.mod_reference.clone(),
                    desired_version: m.desired_version.clone(),
                    installed_version: m.installed_version.clone(),
                    installed: m.installed,
                    needs_update: m.needs_update,
                    config: settings,
                })
            })
            .collect::<Result<Vec<_>, Status>>()?;
        Ok(ModConfig { selected_mods })
    }
}

// ============================================================================
// Services
// ============================================================================

/// Implementation of all five agent services.
#[derive(Clone)]
pub struct AgentGrpcService {
    state: Arc<AgentHandlerState>,
}

impl AgentGrpcService {
    /// Create the services over shared handler state.
    pub fn new(state: Arc<AgentHandlerState>) -> Self {
        Self { state }
    }

    async fn authenticate(&self, metadata: &MetadataMap) -> Result<Agent, Status> {
        Ok(self
            .state
            .registry
            .authenticate(api_key_from_metadata(metadata))
            .await?)
    }
}

#[tonic::async_trait]
impl AgentConfigService for AgentGrpcService {
    async fn get_agent_config(
        &self,
        request: Request<proto::Empty>,
    ) -> Result<Response<proto::AgentConfigResponse>, Status> {
        let agent = self.authenticate(request.metadata()).await?;
        let view = handlers::handle_get_agent_config(&agent);
        Ok(Response::new(proto::AgentConfigResponse::from(&view)))
    }

    async fn update_agent_config_version_ip(
        &self,
        request: Request<proto::UpdateAgentConfigVersionIpRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        let agent = self.authenticate(request.metadata()).await?;
        let req = request.into_inner();
        handlers::handle_update_agent_config(&self.state, &agent, &req.version, &req.ip).await?;
        Ok(Response::new(proto::Empty {}))
    }
}

#[tonic::async_trait]
impl AgentStateService for AgentGrpcService {
    async fn update_agent_state(
        &self,
        request: Request<proto::AgentStateRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        let agent = self.authenticate(request.metadata()).await?;
        let status = AgentStatus::from(request.get_ref());
        handlers::handle_update_agent_state(&self.state, &agent, &status).await?;
        Ok(Response::new(proto::Empty {}))
    }

    async fn update_agent_state_stream(
        &self,
        request: Request<Streaming<proto::AgentStateRequest>>,
    ) -> Result<Response<proto::Empty>, Status> {
        let agent = self.authenticate(request.metadata()).await?;
        let guard = self.state.streams.register(&agent.api_key, StreamKind::State);
        debug!(agent_id = %agent.agent_id, "State stream opened");

        ingest_state_stream(&self.state.registry, &agent, request.into_inner(), guard.token())
            .await;
        Ok(Response::new(proto::Empty {}))
    }
}

#[tonic::async_trait]
impl AgentTaskService for AgentGrpcService {
    async fn get_agent_tasks(
        &self,
        request: Request<proto::Empty>,
    ) -> Result<Response<proto::GetAgentTasksResponse>, Status> {
        let agent = self.authenticate(request.metadata()).await?;
        let tasks = handlers::handle_get_agent_tasks(&self.state, &agent).await?;
        Ok(Response::new(proto::GetAgentTasksResponse {
            tasks: tasks.iter().map(proto::AgentTask::from).collect(),
        }))
    }

    async fn mark_agent_task_completed(
        &self,
        request: Request<proto::AgentTaskIdRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        let agent = self.authenticate(request.metadata()).await?;
        handlers::handle_mark_task_completed(&self.state, &agent, &request.get_ref().task_id)
            .await?;
        Ok(Response::new(proto::Empty {}))
    }

    async fn mark_agent_task_failed(
        &self,
        request: Request<proto::AgentTaskIdRequest>,
    ) -> Result<Response<proto::Empty>, Status> {
        let agent = self.authenticate(request.metadata()).await?;
        handlers::handle_mark_task_failed(&self.state, &agent, &request.get_ref().task_id).await?;
        Ok(Response::new(proto::Empty {}))
    }
}

#[tonic::async_trait]
impl AgentLogService for AgentGrpcService {
    async fn stream_log(
        &self,
        request: Request<Streaming<proto::LogLine>>,
    ) -> Result<Response<proto::Empty>, Status> {
        let agent = self.authenticate(request.metadata()).await?;
        let guard = self.state.streams.register(&agent.api_key, StreamKind::Log);
        debug!(agent_id = %agent.agent_id, "Log stream opened");

        ingest_log_stream(&self.state.registry, &agent, request.into_inner(), guard.token()).await;
        Ok(Response::new(proto::Empty {}))
    }
}

#[tonic::async_trait]
impl AgentModConfigService for AgentGrpcService {
    async fn get_mod_config(
        &self,
        request: Request<proto::Empty>,
    ) -> Result<Response<proto::ModConfig>, Status> {
        let agent = self.authenticate(request.metadata()).await?;
        let config = handlers::handle_get_mod_config(&agent);
        Ok(Response::new(proto::ModConfig::from(&config)))
    }

    async fn update_mod_config(
        &self,
        request: Request<proto::ModConfig>,
    ) -> Result<Response<proto::Empty>, Status> {
        let agent = self.authenticate(request.metadata()).await?;
        let reported = ModConfig::try_from(request.get_ref())?;
        handlers::handle_update_mod_config(&self.state, &agent, &reported).await?;
        Ok(Response::new(proto::Empty {}))
    }
}

// ============================================================================
// Server
// ============================================================================

/// Serve the agent services on `listener` until `shutdown` fires.
pub async fn run_grpc_server(
    listener: TcpListener,
    state: Arc<AgentHandlerState>,
    shutdown: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    let service = AgentGrpcService::new(state);

    info!(addr = ?addr, "gRPC agent server listening");

    tonic::transport::Server::builder()
        .add_service(AgentConfigServiceServer::new(service.clone()))
        .add_service(AgentStateServiceServer::new(service.clone()))
        .add_service(AgentTaskServiceServer::new(service.clone()))
        .add_service(AgentLogServiceServer::new(service.clone()))
        .add_service(AgentModConfigServiceServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown.cancelled_owned())
        .await?;

    info!("gRPC agent server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mod_config_roundtrip_keeps_settings() {
        let config = ModConfig {
            selected_mods: vec![SelectedMod {
                mod_reference: "RefinedPower".to_string(),
                desired_version: "3.0.0".to_string(),
                installed_version: "2.9.0".to_string(),
                installed: true,
                needs_update: true,
                config: serde_json::json!({"power": 9000}),
            }],
        };
        let wire = proto::ModConfig::from(&config);
        assert_eq!(wire.selected_mods[0].config, r#"{"power":9000}"#);

        let back = ModConfig::try_from(&wire).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_blank_mod_settings_decode_to_null() {
        let wire = proto::ModConfig {
            selected_mods: vec![proto::SelectedMod {
                mod_reference: "A".to_string(),
                ..Default::default()
            }],
        };
        let config = ModConfig::try_from(&wire).unwrap();
        assert!(config.selected_mods[0].config.is_null());
    }

    #[test]
    fn test_invalid_mod_settings_rejected() {
        let wire = proto::ModConfig {
            selected_mods: vec![proto::SelectedMod {
                mod_reference: "A".to_string(),
                config: "{not json".to_string(),
                ..Default::default()
            }],
        };
        let status = ModConfig::try_from(&wire).unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }
}
