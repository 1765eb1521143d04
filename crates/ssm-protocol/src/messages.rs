// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Protobuf messages exchanged between agents and the control plane.
//!
//! Field tags are part of the wire contract with deployed agents and must
//! never be renumbered.

/// Empty request/response body.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Empty {}

/// Agent host configuration as stored by the control plane.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentConfig {
    /// Agent software version reported by the agent.
    #[prost(string, tag = "1")]
    pub version: ::prost::alloc::string::String,
    /// Public IP reported by the agent.
    #[prost(string, tag = "2")]
    pub ip: ::prost::alloc::string::String,
    /// Game server port.
    #[prost(int32, tag = "3")]
    pub port: i32,
    /// Memory limit in bytes.
    #[prost(int64, tag = "4")]
    pub memory: i64,
    /// Hours between automatic backups.
    #[prost(float, tag = "5")]
    pub backup_interval: f32,
    /// Number of backups to keep.
    #[prost(int32, tag = "6")]
    pub backup_keep_amount: i32,
    /// Whether the agent may auto-update itself.
    #[prost(bool, tag = "7")]
    pub auto_update: bool,
}

/// Dedicated server settings.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerConfig {
    #[prost(int32, tag = "1")]
    pub max_players: i32,
    #[prost(int32, tag = "2")]
    pub worker_threads: i32,
    #[prost(string, tag = "3")]
    pub branch: ::prost::alloc::string::String,
    #[prost(bool, tag = "4")]
    pub update_on_start: bool,
    #[prost(bool, tag = "5")]
    pub auto_restart: bool,
    #[prost(bool, tag = "6")]
    pub auto_pause: bool,
    #[prost(bool, tag = "7")]
    pub auto_save_on_disconnect: bool,
    #[prost(int32, tag = "8")]
    pub autosave_interval: i32,
    #[prost(bool, tag = "9")]
    pub disable_seasonal_events: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentConfigResponse {
    #[prost(message, optional, tag = "1")]
    pub config: ::core::option::Option<AgentConfig>,
    #[prost(message, optional, tag = "2")]
    pub server_config: ::core::option::Option<ServerConfig>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateAgentConfigVersionIpRequest {
    #[prost(string, tag = "1")]
    pub version: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub ip: ::prost::alloc::string::String,
}

/// One state frame. Sent unary or as an element of a client stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentStateRequest {
    #[prost(bool, tag = "1")]
    pub online: bool,
    #[prost(bool, tag = "2")]
    pub installed: bool,
    #[prost(bool, tag = "3")]
    pub running: bool,
    /// CPU usage in percent.
    #[prost(double, tag = "4")]
    pub cpu: f64,
    /// RAM usage in percent.
    #[prost(double, tag = "5")]
    pub ram: f64,
    #[prost(int64, tag = "6")]
    pub installed_sf_version: i64,
    #[prost(int64, tag = "7")]
    pub latest_sf_version: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentTask {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub action: ::prost::alloc::string::String,
    /// JSON-encoded task payload.
    #[prost(string, tag = "3")]
    pub data: ::prost::alloc::string::String,
    #[prost(bool, tag = "4")]
    pub completed: bool,
    #[prost(int32, tag = "5")]
    pub retries: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAgentTasksResponse {
    #[prost(message, repeated, tag = "1")]
    pub tasks: ::prost::alloc::vec::Vec<AgentTask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentTaskIdRequest {
    #[prost(string, tag = "1")]
    pub task_id: ::prost::alloc::string::String,
}

/// One line of a streamed log file.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogLine {
    /// `Agent`, `FactoryGame` or `Steam`.
    #[prost(string, tag = "1")]
    pub source: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub line: ::prost::alloc::string::String,
    /// Clears the buffer for this source before appending.
    #[prost(bool, tag = "3")]
    pub initial: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SelectedMod {
    #[prost(string, tag = "1")]
    pub mod_reference: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub desired_version: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub installed_version: ::prost::alloc::string::String,
    #[prost(bool, tag = "4")]
    pub installed: bool,
    #[prost(bool, tag = "5")]
    pub needs_update: bool,
    /// JSON-encoded mod settings.
    #[prost(string, tag = "6")]
    pub config: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModConfig {
    #[prost(message, repeated, tag = "1")]
    pub selected_mods: ::prost::alloc::vec::Vec<SelectedMod>,
}
