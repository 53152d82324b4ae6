//! Gateway test fixtures: seeded users, a stub MCP server, request helper.

use std::{fs, os::unix::fs::PermissionsExt, sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use mcp_gateway::{auth, routes, AppState};
use mcp_hub::{ConfigStore, Controller, SupervisorConfig, UserConfig, UserGroup};
use serde_json::Value;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const JWT_SECRET: &str = "gateway-test-secret";
pub const ADMIN_API_KEY: &str = "admin-key-123";

const FAKE_SERVER: &str = r#"#!/usr/bin/env python3
import json
import os
import sys

def send(payload):
    sys.stdout.write(json.dumps(payload) + "\n")
    sys.stdout.flush()

TOOLS = [
    {"name": "echo", "description": "Echo arguments back", "inputSchema": {"type": "object"}},
    {"name": "env", "description": "Read an environment variable", "inputSchema": {"type": "object"}},
]

for line in sys.stdin:
    if not line.strip():
        continue
    msg = json.loads(line)
    method = msg.get("method")
    if method == "initialize":
        send({"jsonrpc": "2.0", "id": msg.get("id"), "result": {"protocolVersion": "2024-11-05", "capabilities": {}, "serverInfo": {"name": "stub", "version": "0.0.1"}}})
    elif method == "tools/list":
        send({"jsonrpc": "2.0", "id": msg.get("id"), "result": {"tools": TOOLS}})
    elif method == "tools/call":
        params = msg.get("params") or {}
        tool = params.get("name")
        args = params.get("arguments") or {}
        if tool == "echo":
            send({"jsonrpc": "2.0", "id": msg.get("id"), "result": {"content": [{"type": "text", "text": json.dumps(args)}]}})
        elif tool == "env":
            value = os.environ.get(args.get("key", ""), "")
            send({"jsonrpc": "2.0", "id": msg.get("id"), "result": {"content": [{"type": "text", "text": value}]}})
        else:
            send({"jsonrpc": "2.0", "id": msg.get("id"), "error": {"code": -32602, "message": "unknown tool"}})
"#;

pub struct TestGateway {
    pub app: Router,
    pub script: String,
    pub donald_token: String,
    pub admin_token: String,
    _store_dir: TempDir,
    _script_dir: TempDir,
}

impl TestGateway {
    /// Standard add-server body for the stub script.
    pub fn spec_body(&self, name: &str) -> Value {
        serde_json::json!({
            "mcpServers": { name: { "command": self.script, "args": [] } }
        })
    }
}

pub async fn gateway() -> TestGateway {
    let store_dir = tempfile::tempdir().expect("store dir");
    let script_dir = tempfile::tempdir().expect("script dir");
    let script_path = script_dir.path().join("stub-mcp-server");
    fs::write(&script_path, FAKE_SERVER).expect("write script");
    let mut perms = fs::metadata(&script_path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script_path, perms).expect("chmod");

    let store = Arc::new(ConfigStore::open(store_dir.path()).await.expect("open store"));
    store
        .put_user(UserConfig::new("donald"))
        .await
        .expect("donald");
    let mut admin = UserConfig::new("admin");
    admin.group = UserGroup::Admins;
    admin.api_keys.push(ADMIN_API_KEY.to_string());
    store.put_user(admin).await.expect("admin");

    let config = SupervisorConfig {
        handshake_timeout: Duration::from_secs(10),
        call_timeout: Duration::from_secs(10),
        stop_grace: Duration::from_secs(2),
        ..SupervisorConfig::default()
    };
    let controller = Arc::new(Controller::new(store, config));
    let state = AppState::new(controller, JWT_SECRET);

    let ttl = Duration::from_secs(3600);
    TestGateway {
        app: routes::router(state),
        script: script_path.to_string_lossy().into_owned(),
        donald_token: auth::issue_token(JWT_SECRET, "donald", ttl).expect("donald token"),
        admin_token: auth::issue_token(JWT_SECRET, "admin", ttl).expect("admin token"),
        _store_dir: store_dir,
        _script_dir: script_dir,
    }
}

/// Sends one request through the router and decodes the JSON body (Null
/// for empty bodies).
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}
