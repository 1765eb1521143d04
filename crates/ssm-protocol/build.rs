// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generates the agent gRPC service stubs.
//!
//! Messages are declared in `src/messages.rs` with `prost` derives, so the
//! services are described with tonic-build's manual builder and no `protoc`
//! is required at build time.

use tonic_build::manual::{Builder, Method, Service};

const PACKAGE: &str = "ssm.agent.v1";
const CODEC: &str = "tonic::codec::ProstCodec";

fn unary(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::messages::{input}"))
        .output_type(format!("crate::messages::{output}"))
        .codec_path(CODEC)
        .build()
}

fn client_stream(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::messages::{input}"))
        .output_type(format!("crate::messages::{output}"))
        .codec_path(CODEC)
        .client_streaming()
        .build()
}

fn main() {
    let config = Service::builder()
        .name("AgentConfigService")
        .package(PACKAGE)
        .method(unary(
            "get_agent_config",
            "GetAgentConfig",
            "Empty",
            "AgentConfigResponse",
        ))
        .method(unary(
            "update_agent_config_version_ip",
            "UpdateAgentConfigVersionIp",
            "UpdateAgentConfigVersionIpRequest",
            "Empty",
        ))
        .build();

    let state = Service::builder()
        .name("AgentStateService")
        .package(PACKAGE)
        .method(unary(
            "update_agent_state",
            "UpdateAgentState",
            "AgentStateRequest",
            "Empty",
        ))
        .method(client_stream(
            "update_agent_state_stream",
            "UpdateAgentStateStream",
            "AgentStateRequest",
            "Empty",
        ))
        .build();

    let task = Service::builder()
        .name("AgentTaskService")
        .package(PACKAGE)
        .method(unary(
            "get_agent_tasks",
            "GetAgentTasks",
            "Empty",
            "GetAgentTasksResponse",
        ))
        .method(unary(
            "mark_agent_task_completed",
            "MarkAgentTaskCompleted",
            "AgentTaskIdRequest",
            "Empty",
        ))
        .method(unary(
            "mark_agent_task_failed",
            "MarkAgentTaskFailed",
            "AgentTaskIdRequest",
            "Empty",
        ))
        .build();

    let log = Service::builder()
        .name("AgentLogService")
        .package(PACKAGE)
        .method(client_stream("stream_log", "StreamLog", "LogLine", "Empty"))
        .build();

    let mod_config = Service::builder()
        .name("AgentModConfigService")
        .package(PACKAGE)
        .method(unary("get_mod_config", "GetModConfig", "Empty", "ModConfig"))
        .method(unary(
            "update_mod_config",
            "UpdateModConfig",
            "ModConfig",
            "Empty",
        ))
        .build();

    Builder::new().compile(&[config, state, task, log, mod_config]);

    println!("cargo:rerun-if-changed=build.rs");
}
