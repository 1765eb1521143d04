// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Legacy HTTP agent API.
//!
//! Mirrors the gRPC calls under `/api/v1/agent` for agents that predate the
//! gRPC transport, plus multipart artifact uploads and `/healthz`.
//!
//! | Method | Path | Call |
//! |--------|------|------|
//! | GET | `/healthz` | health check |
//! | GET | `/api/v1/agent/config` | GetAgentConfig |
//! | PUT | `/api/v1/agent/config/versionip` | UpdateAgentConfigVersionIp |
//! | PUT | `/api/v1/agent/state` | UpdateAgentState |
//! | GET | `/api/v1/agent/tasks` | GetAgentTasks |
//! | PUT | `/api/v1/agent/tasks/{task_id}/completed` | MarkAgentTaskCompleted |
//! | PUT | `/api/v1/agent/tasks/{task_id}/failed` | MarkAgentTaskFailed |
//! | GET/PUT | `/api/v1/agent/modconfig` | Get/UpdateModConfig |
//! | POST | `/api/v1/agent/saves/sync` | save list sync |
//! | POST | `/api/v1/agent/upload/{save\|backup\|log}` | artifact upload (`file` field) |

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use ssm_protocol::API_KEY_METADATA;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::db::agents::{Agent, AgentStatus, FileIdentity, ModConfig};
use crate::error::Error;
use crate::handlers::{self, AgentHandlerState};
use crate::storage::ArtifactKind;

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

type SharedState = Arc<AgentHandlerState>;

/// Error rendered as `{"success": false, "error": ...}` with the mapped status.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl<E: Into<Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(error = %self.0, "Agent API request failed");
        }
        (status, Json(json!({ "success": false, "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn ok() -> Json<serde_json::Value> {
    Json(json!({ "success": true }))
}

/// Build the router.
pub fn router(state: SharedState) -> Router {
    let agent_routes = Router::new()
        .route("/config", get(get_config))
        .route("/config/versionip", put(update_config_version_ip))
        .route("/state", put(update_state))
        .route("/tasks", get(get_tasks))
        .route("/tasks/{task_id}/completed", put(mark_task_completed))
        .route("/tasks/{task_id}/failed", put(mark_task_failed))
        .route("/modconfig", get(get_mod_config).put(update_mod_config))
        .route("/saves/sync", post(sync_saves))
        .route(
            "/upload/{kind}",
            post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_agent));

    Router::new()
        .route("/healthz", get(health))
        .nest("/api/v1/agent", agent_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve the agent from the API key header and hand the request on.
async fn require_agent(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> ApiResult<Response> {
    let api_key = request
        .headers()
        .get(API_KEY_METADATA)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let agent = state.registry.authenticate(api_key.as_deref()).await?;
    request.extensions_mut().insert(agent);
    Ok(next.run(request).await)
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    let health = handlers::handle_health_check(&state).await;
    let status = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

async fn get_config(Extension(agent): Extension<Agent>) -> impl IntoResponse {
    Json(handlers::handle_get_agent_config(&agent))
}

#[derive(Debug, Deserialize)]
struct VersionIpBody {
    version: String,
    ip: String,
}

async fn update_config_version_ip(
    State(state): State<SharedState>,
    Extension(agent): Extension<Agent>,
    Json(body): Json<VersionIpBody>,
) -> ApiResult<impl IntoResponse> {
    handlers::handle_update_agent_config(&state, &agent, &body.version, &body.ip).await?;
    Ok(ok())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AgentStateBody {
    online: bool,
    installed: bool,
    running: bool,
    cpu: f64,
    ram: f64,
    #[serde(alias = "installedSFVersion")]
    installed_sf_version: i64,
    #[serde(alias = "latestSFVersion")]
    latest_sf_version: i64,
}

impl From<AgentStateBody> for AgentStatus {
    fn from(body: AgentStateBody) -> Self {
        AgentStatus {
            online: body.online,
            installed: body.installed,
            running: body.running,
            cpu: body.cpu,
            ram: body.ram,
            installed_sf_version: body.installed_sf_version,
            latest_sf_version: body.latest_sf_version,
        }
    }
}

async fn update_state(
    State(state): State<SharedState>,
    Extension(agent): Extension<Agent>,
    Json(body): Json<AgentStateBody>,
) -> ApiResult<impl IntoResponse> {
    handlers::handle_update_agent_state(&state, &agent, &AgentStatus::from(body)).await?;
    Ok(ok())
}

async fn get_tasks(
    State(state): State<SharedState>,
    Extension(agent): Extension<Agent>,
) -> ApiResult<impl IntoResponse> {
    let tasks = handlers::handle_get_agent_tasks(&state, &agent).await?;
    Ok(Json(json!({ "success": true, "tasks": tasks })))
}

async fn mark_task_completed(
    State(state): State<SharedState>,
    Extension(agent): Extension<Agent>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    handlers::handle_mark_task_completed(&state, &agent, &task_id).await?;
    Ok(ok())
}

async fn mark_task_failed(
    State(state): State<SharedState>,
    Extension(agent): Extension<Agent>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    handlers::handle_mark_task_failed(&state, &agent, &task_id).await?;
    Ok(ok())
}

async fn get_mod_config(Extension(agent): Extension<Agent>) -> impl IntoResponse {
    Json(handlers::handle_get_mod_config(&agent))
}

async fn update_mod_config(
    State(state): State<SharedState>,
    Extension(agent): Extension<Agent>,
    Json(reported): Json<ModConfig>,
) -> ApiResult<impl IntoResponse> {
    let config = handlers::handle_update_mod_config(&state, &agent, &reported).await?;
    Ok(Json(config))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveFileBody {
    file_name: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    mod_time: Option<DateTime<Utc>>,
}

async fn sync_saves(
    State(state): State<SharedState>,
    Extension(agent): Extension<Agent>,
    Json(body): Json<Vec<SaveFileBody>>,
) -> ApiResult<impl IntoResponse> {
    let files = body
        .into_iter()
        .map(|f| {
            Ok(FileIdentity {
                file_name: handlers::sanitize_file_name(&f.file_name)?,
                size: f.size,
                mod_time: f.mod_time,
                file_url: String::new(),
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;
    handlers::handle_sync_saves(&state, &agent, &files).await?;
    Ok(ok())
}

fn upload_kind(raw: &str) -> Result<ArtifactKind, Error> {
    match raw {
        "save" => Ok(ArtifactKind::Saves),
        "backup" => Ok(ArtifactKind::Backups),
        "log" => Ok(ArtifactKind::Logs),
        other => Err(Error::NotFound(format!("upload kind {other}"))),
    }
}

async fn upload(
    State(state): State<SharedState>,
    Extension(agent): Extension<Agent>,
    Path(kind): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let kind = upload_kind(&kind)?;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| Error::Validation("file field has no file name".to_string()))?;

        tokio::fs::create_dir_all(&state.temp_dir).await?;
        let temp = tempfile::Builder::new()
            .prefix("ssm-upload-")
            .tempfile_in(&state.temp_dir)?;
        let mut out = tokio::fs::File::create(temp.path()).await?;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| Error::Validation(format!("upload interrupted: {e}")))?
        {
            out.write_all(&chunk).await?;
        }
        out.flush().await?;
        drop(out);

        let file = handlers::handle_upload(&state, &agent, kind, &file_name, temp.path()).await?;
        return Ok(Json(json!({
            "success": true,
            "fileName": file.file_name,
            "size": file.size,
        })));
    }

    Err(Error::Validation("multipart body has no file field".to_string()).into())
}

/// Serve the legacy API on `listener` until `shutdown` fires.
pub async fn run_http_server(
    listener: TcpListener,
    state: SharedState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), "HTTP agent server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("HTTP agent server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_kind() {
        assert_eq!(upload_kind("save").unwrap(), ArtifactKind::Saves);
        assert_eq!(upload_kind("backup").unwrap(), ArtifactKind::Backups);
        assert_eq!(upload_kind("log").unwrap(), ArtifactKind::Logs);
        assert!(upload_kind("saves").is_err());
    }

    #[test]
    fn test_state_body_accepts_legacy_field_names() {
        let body: AgentStateBody = serde_json::from_value(json!({
            "online": true,
            "installedSFVersion": 365306,
            "latestSfVersion": 366202
        }))
        .unwrap();
        let status = AgentStatus::from(body);
        assert!(status.online);
        assert_eq!(status.installed_sf_version, 365306);
        assert_eq!(status.latest_sf_version, 366202);
    }

    #[test]
    fn test_api_error_status() {
        let response = ApiError(Error::AuthFailed("missing api key".into())).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = ApiError(Error::Conflict("dup".into())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
