use std::{io, time::Duration};

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced while supervising MCP servers and proxying tool calls.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("server `{server}` is not running (status: {status})")]
    ServerNotRunning { server: String, status: String },
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("handshake with `{server}` failed: {reason}")]
    Handshake { server: String, reason: String },
    #[error("server returned JSON-RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("tool call failed with code {code}: {message}")]
    Tool { code: i64, message: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("server process exited before responding")]
    ChildGone,
    #[error("{0}")]
    Conflict(String),
    #[error("failed to read config for `{username}`: {source}")]
    StoreRead {
        username: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write config for `{username}`: {source}")]
    StoreWrite {
        username: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode config for `{username}`: {source}")]
    StoreDecode {
        username: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HubError {
    /// True for errors that indicate the caller's request was malformed.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, HubError::BadRequest(_))
    }
}
