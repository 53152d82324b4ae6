//! Tool-call routing: explicit path form and flat-namespace form.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use super::TargetQuery;
use crate::{auth::AuthedUser, error::ApiError, state::AppState};

/// Query for the flat-namespace route: `name={server}__{tool}`.
#[derive(Debug, Deserialize)]
pub struct ImplicitQuery {
    pub name: String,
    pub user: Option<String>,
}

/// `POST /api/v1/user/tool/{server}/{tool}` — body is the arguments
/// object; the response is the raw content sequence from the child.
pub async fn call_tool_explicit(
    State(state): State<AppState>,
    auth: AuthedUser,
    Path((server, tool)): Path<(String, String)>,
    Query(query): Query<TargetQuery>,
    body: Option<Json<Value>>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let username = auth.target(query.user.as_deref())?;
    dispatch(&state, username, &server, &tool, body).await
}

/// `POST /tools/call?name={server}__{tool}` — the flat namespace splits on
/// the first double underscore.
pub async fn call_tool_implicit(
    State(state): State<AppState>,
    auth: AuthedUser,
    Query(query): Query<ImplicitQuery>,
    body: Option<Json<Value>>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let Some((server, tool)) = query.name.split_once("__") else {
        return Err(ApiError::bad_request(
            "tool name must take the form `{server}__{tool}`",
        ));
    };
    let username = auth.target(query.user.as_deref())?;
    dispatch(&state, username, server, tool, body).await
}

async fn dispatch(
    state: &AppState,
    username: &str,
    server: &str,
    tool: &str,
    body: Option<Json<Value>>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let arguments = body
        .map(|Json(value)| value)
        .unwrap_or_else(|| Value::Object(Default::default()));
    let result = state
        .controller
        .call_tool(username, server, tool, arguments, None)
        .await?;
    Ok(Json(result.content))
}
