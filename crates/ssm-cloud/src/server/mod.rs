// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agent-facing listeners.
//!
//! | Listener | Default port | Module |
//! |----------|--------------|--------|
//! | gRPC (five agent services) | 50051 | [`grpc`] |
//! | Legacy HTTP + uploads | 3000 | [`http`] |
//!
//! Both authenticate with the agent API key and share one
//! [`AgentHandlerState`](crate::handlers::AgentHandlerState).

pub mod grpc;
pub mod http;

pub use grpc::{AgentGrpcService, run_grpc_server};
pub use http::{router, run_http_server};
