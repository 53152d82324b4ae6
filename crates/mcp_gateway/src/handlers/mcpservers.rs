//! Server management endpoints under `/api/v1/mcpservers`.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use mcp_hub::{EnvUpdate, ServerSpec};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ServerInfo, StatusInfo, TargetQuery};
use crate::{auth::AuthedUser, error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct EnvBody {
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct EnvValueBody {
    pub value: String,
}

/// Persisted spec plus live status for one server.
#[derive(Debug, Serialize)]
pub struct ServerDetail {
    pub name: String,
    pub spec: ServerSpec,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// `POST /api/v1/mcpservers` — body `{"mcpServers":{name:spec}}`, exactly
/// one entry. Create-or-replace, persist, then start unless disabled.
pub async fn add_server(
    State(state): State<AppState>,
    auth: AuthedUser,
    Query(query): Query<TargetQuery>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<ServerInfo>), ApiError> {
    let username = auth.target(query.user.as_deref())?;

    let Some(servers) = body.get("mcpServers").and_then(Value::as_object) else {
        return Err(ApiError::bad_request(
            "invalid configuration: missing `mcpServers` key",
        ));
    };
    if servers.len() != 1 {
        return Err(ApiError::bad_request(
            "exactly one server entry is required",
        ));
    }
    let Some((name, raw_spec)) = servers.iter().next() else {
        return Err(ApiError::bad_request(
            "exactly one server entry is required",
        ));
    };

    let spec: ServerSpec = serde_json::from_value(raw_spec.clone())
        .map_err(|err| ApiError::bad_request(format!("invalid server spec: {err}")))?;

    let snapshot = state.controller.add(username, name, spec).await?;
    Ok((StatusCode::CREATED, Json(ServerInfo::from(snapshot))))
}

/// `GET /api/v1/mcpservers` — the caller's instances.
pub async fn list_servers(
    State(state): State<AppState>,
    auth: AuthedUser,
    Query(query): Query<TargetQuery>,
) -> Result<Json<Vec<ServerInfo>>, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    let servers = state
        .controller
        .list(username)
        .into_iter()
        .map(ServerInfo::from)
        .collect();
    Ok(Json(servers))
}

/// `GET /api/v1/mcpservers/config` — the persisted spec map.
pub async fn get_config(
    State(state): State<AppState>,
    auth: AuthedUser,
    Query(query): Query<TargetQuery>,
) -> Result<Json<Value>, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    let specs = state.store.server_specs(username);
    Ok(Json(json!({ "mcpServers": specs })))
}

/// `GET /api/v1/mcpservers/{name}` — persisted spec plus live status.
pub async fn get_server(
    State(state): State<AppState>,
    auth: AuthedUser,
    Path(name): Path<String>,
    Query(query): Query<TargetQuery>,
) -> Result<Json<ServerDetail>, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    let spec = state
        .store
        .server_spec(username, &name)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("server `{name}` not found")))?;

    let snapshot = state.controller.status(username, &name).ok();
    let (status, pid) = snapshot
        .map(|s| (s.status.to_string(), s.pid))
        .unwrap_or_else(|| ("stopped".to_string(), None));

    Ok(Json(ServerDetail {
        name,
        spec,
        status,
        pid,
    }))
}

/// `GET /api/v1/mcpservers/{name}/status`
pub async fn server_status(
    State(state): State<AppState>,
    auth: AuthedUser,
    Path(name): Path<String>,
    Query(query): Query<TargetQuery>,
) -> Result<Json<StatusInfo>, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    let snapshot = state.controller.status(username, &name)?;
    Ok(Json(StatusInfo::from(snapshot)))
}

/// `POST /api/v1/mcpservers/{name}/start`
pub async fn start_server(
    State(state): State<AppState>,
    auth: AuthedUser,
    Path(name): Path<String>,
    Query(query): Query<TargetQuery>,
) -> Result<Json<ServerInfo>, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    let snapshot = state.controller.start(username, &name).await?;
    Ok(Json(ServerInfo::from(snapshot)))
}

/// `POST /api/v1/mcpservers/{name}/stop`
pub async fn stop_server(
    State(state): State<AppState>,
    auth: AuthedUser,
    Path(name): Path<String>,
    Query(query): Query<TargetQuery>,
) -> Result<Json<ServerInfo>, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    let snapshot = state.controller.stop(username, &name).await?;
    Ok(Json(ServerInfo::from(snapshot)))
}

/// `POST /api/v1/mcpservers/{name}/restart`
pub async fn restart_server(
    State(state): State<AppState>,
    auth: AuthedUser,
    Path(name): Path<String>,
    Query(query): Query<TargetQuery>,
) -> Result<Json<ServerInfo>, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    let snapshot = state.controller.restart(username, &name).await?;
    Ok(Json(ServerInfo::from(snapshot)))
}

/// `DELETE /api/v1/mcpservers/{name}`
pub async fn delete_server(
    State(state): State<AppState>,
    auth: AuthedUser,
    Path(name): Path<String>,
    Query(query): Query<TargetQuery>,
) -> Result<StatusCode, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    state.controller.delete(username, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /api/v1/mcpservers/{name}/env` — replace the spec env wholesale.
/// The running child keeps its environment until the next start.
pub async fn put_server_env(
    State(state): State<AppState>,
    auth: AuthedUser,
    Path(name): Path<String>,
    Query(query): Query<TargetQuery>,
    Json(body): Json<EnvBody>,
) -> Result<StatusCode, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    state
        .controller
        .update_env(username, &name, EnvUpdate::Replace(body.env))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /api/v1/mcpservers/{name}/env/{key}` — set one key.
pub async fn put_server_env_key(
    State(state): State<AppState>,
    auth: AuthedUser,
    Path((name, key)): Path<(String, String)>,
    Query(query): Query<TargetQuery>,
    Json(body): Json<EnvValueBody>,
) -> Result<StatusCode, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    state
        .controller
        .update_env(
            username,
            &name,
            EnvUpdate::Set {
                key,
                value: body.value,
            },
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/v1/mcpservers/{name}/env` — drop every spec env key.
pub async fn delete_server_env(
    State(state): State<AppState>,
    auth: AuthedUser,
    Path(name): Path<String>,
    Query(query): Query<TargetQuery>,
) -> Result<StatusCode, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    state
        .controller
        .update_env(username, &name, EnvUpdate::Clear)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/v1/mcpservers/{name}/env/{key}` — drop one key.
pub async fn delete_server_env_key(
    State(state): State<AppState>,
    auth: AuthedUser,
    Path((name, key)): Path<(String, String)>,
    Query(query): Query<TargetQuery>,
) -> Result<StatusCode, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    state
        .controller
        .update_env(username, &name, EnvUpdate::RemoveKey(key))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
