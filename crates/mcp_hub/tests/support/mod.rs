//! Shared fixtures: a scriptable stdio MCP server written into a tempdir.
#![allow(dead_code)]

use std::{collections::BTreeMap, fs, os::unix::fs::PermissionsExt, path::PathBuf};

use tempfile::TempDir;

const FAKE_SERVER: &str = r#"#!/usr/bin/env python3
import json
import os
import sys
import threading
import time

def send(payload):
    sys.stdout.write(json.dumps(payload) + "\n")
    sys.stdout.flush()

TOOLS = [
    {"name": "echo", "description": "Echo arguments back", "inputSchema": {"type": "object"}},
    {"name": "sleep_ms", "description": "Reply after a delay", "inputSchema": {"type": "object"}},
    {"name": "env", "description": "Read an environment variable", "inputSchema": {"type": "object"}},
    {"name": "crash", "description": "Exit without replying", "inputSchema": {"type": "object"}},
]

sys.stderr.write("fake-mcp-server booting\n")
sys.stderr.flush()

if os.environ.get("FAKE_EMIT_GARBAGE"):
    sys.stdout.write("not json at all\n")
    sys.stdout.flush()

def handle_call(req_id, params):
    tool = params.get("name")
    args = params.get("arguments") or {}
    if tool == "echo":
        send({"jsonrpc": "2.0", "id": req_id, "result": {"content": [{"type": "text", "text": json.dumps(args)}]}})
    elif tool == "sleep_ms":
        delay = args.get("ms", 0) / 1000.0
        def worker():
            time.sleep(delay)
            send({"jsonrpc": "2.0", "id": req_id, "result": {"content": [{"type": "text", "text": json.dumps(args)}]}})
        threading.Thread(target=worker, daemon=True).start()
    elif tool == "env":
        value = os.environ.get(args.get("key", ""), "")
        send({"jsonrpc": "2.0", "id": req_id, "result": {"content": [{"type": "text", "text": value}]}})
    elif tool == "crash":
        os._exit(1)
    else:
        send({"jsonrpc": "2.0", "id": req_id, "error": {"code": -32602, "message": "unknown tool: %s" % tool}})

for line in sys.stdin:
    if not line.strip():
        continue
    msg = json.loads(line)
    method = msg.get("method")
    if method == "initialize":
        delay = int(os.environ.get("FAKE_INIT_DELAY_MS", "0"))
        if delay:
            time.sleep(delay / 1000.0)
        if os.environ.get("FAKE_FAIL_INIT"):
            sys.stderr.write("refusing to initialize\n")
            sys.stderr.flush()
            sys.exit(3)
        send({"jsonrpc": "2.0", "id": msg.get("id"), "result": {"protocolVersion": "2024-11-05", "capabilities": {}, "serverInfo": {"name": "fake", "version": "0.0.1"}}})
    elif method == "notifications/initialized":
        pass
    elif method == "tools/list":
        send({"jsonrpc": "2.0", "id": msg.get("id"), "result": {"tools": TOOLS}})
    elif method == "tools/call":
        handle_call(msg.get("id"), msg.get("params") or {})
"#;

pub fn write_fake_server() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("fake-mcp-server");
    fs::write(&script_path, FAKE_SERVER).expect("write script");
    let mut perms = fs::metadata(&script_path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script_path, perms).expect("chmod");
    (dir, script_path)
}

/// Minimal launch environment: just enough PATH for the shebang to
/// resolve python3.
pub fn base_env() -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    if let Ok(path) = std::env::var("PATH") {
        env.insert("PATH".to_string(), path);
    }
    env
}
