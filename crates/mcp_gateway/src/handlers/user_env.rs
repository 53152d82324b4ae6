//! User-level environment endpoints under `/api/v1/user/env`.
//!
//! These feed the middle layer of the effective child environment:
//! ambient allow-list ≺ user env ≺ server-spec env.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use mcp_hub::EnvUpdate;
use serde_json::{json, Value};

use super::{
    mcpservers::{EnvBody, EnvValueBody},
    TargetQuery,
};
use crate::{auth::AuthedUser, error::ApiError, state::AppState};

/// `GET /api/v1/user/env`
pub async fn get_user_env(
    State(state): State<AppState>,
    auth: AuthedUser,
    Query(query): Query<TargetQuery>,
) -> Result<Json<Value>, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    Ok(Json(json!({ "env": state.store.user_env(username) })))
}

/// `PUT /api/v1/user/env` — replace the user env wholesale.
pub async fn put_user_env(
    State(state): State<AppState>,
    auth: AuthedUser,
    Query(query): Query<TargetQuery>,
    Json(body): Json<EnvBody>,
) -> Result<StatusCode, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    state
        .store
        .update_user_env(username, EnvUpdate::Replace(body.env))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /api/v1/user/env/{key}` — set one key.
pub async fn put_user_env_key(
    State(state): State<AppState>,
    auth: AuthedUser,
    Path(key): Path<String>,
    Query(query): Query<TargetQuery>,
    Json(body): Json<EnvValueBody>,
) -> Result<StatusCode, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    state
        .store
        .update_user_env(
            username,
            EnvUpdate::Set {
                key,
                value: body.value,
            },
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/v1/user/env`
pub async fn delete_user_env(
    State(state): State<AppState>,
    auth: AuthedUser,
    Query(query): Query<TargetQuery>,
) -> Result<StatusCode, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    state
        .store
        .update_user_env(username, EnvUpdate::Clear)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/v1/user/env/{key}`
pub async fn delete_user_env_key(
    State(state): State<AppState>,
    auth: AuthedUser,
    Path(key): Path<String>,
    Query(query): Query<TargetQuery>,
) -> Result<StatusCode, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    state
        .store
        .update_user_env(username, EnvUpdate::RemoveKey(key))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
