//! Route table: `(method, path)` maps directly to a typed handler.

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::{
    handlers::{mcpservers, tools, user_env},
    state::AppState,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/mcpservers",
            post(mcpservers::add_server).get(mcpservers::list_servers),
        )
        .route("/api/v1/mcpservers/config", get(mcpservers::get_config))
        .route(
            "/api/v1/mcpservers/:name",
            get(mcpservers::get_server).delete(mcpservers::delete_server),
        )
        .route(
            "/api/v1/mcpservers/:name/status",
            get(mcpservers::server_status),
        )
        .route(
            "/api/v1/mcpservers/:name/start",
            post(mcpservers::start_server),
        )
        .route(
            "/api/v1/mcpservers/:name/stop",
            post(mcpservers::stop_server),
        )
        .route(
            "/api/v1/mcpservers/:name/restart",
            post(mcpservers::restart_server),
        )
        .route(
            "/api/v1/mcpservers/:name/env",
            put(mcpservers::put_server_env).delete(mcpservers::delete_server_env),
        )
        .route(
            "/api/v1/mcpservers/:name/env/:key",
            put(mcpservers::put_server_env_key).delete(mcpservers::delete_server_env_key),
        )
        .route(
            "/api/v1/user/env",
            get(user_env::get_user_env)
                .put(user_env::put_user_env)
                .delete(user_env::delete_user_env),
        )
        .route(
            "/api/v1/user/env/:key",
            put(user_env::put_user_env_key).delete(user_env::delete_user_env_key),
        )
        .route(
            "/api/v1/user/tool/:server/:tool",
            post(tools::call_tool_explicit),
        )
        .route("/tools/call", post(tools::call_tool_implicit))
        .with_state(state)
}
