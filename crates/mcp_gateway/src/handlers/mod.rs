//! Typed HTTP handlers over the controller.

pub mod mcpservers;
pub mod tools;
pub mod user_env;

use mcp_hub::InstanceSnapshot;
use serde::{Deserialize, Serialize};

/// Optional `user` query parameter for admin reach.
#[derive(Debug, Deserialize)]
pub struct TargetQuery {
    pub user: Option<String>,
}

/// Full server instance view returned from mutating endpoints.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub uptime_seconds: u64,
    pub tools: Vec<String>,
    pub tool_count: usize,
}

impl From<InstanceSnapshot> for ServerInfo {
    fn from(snapshot: InstanceSnapshot) -> Self {
        let tools: Vec<String> = snapshot
            .tools
            .iter()
            .map(|tool| tool.name.clone())
            .collect();
        Self {
            name: snapshot.key.name,
            status: snapshot.status.to_string(),
            pid: snapshot.pid,
            uptime_seconds: snapshot.uptime.map(|d| d.as_secs()).unwrap_or(0),
            tool_count: tools.len(),
            tools,
        }
    }
}

/// Compact view served from the status endpoint.
#[derive(Debug, Serialize)]
pub struct StatusInfo {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub uptime_seconds: u64,
    pub tool_count: usize,
}

impl From<InstanceSnapshot> for StatusInfo {
    fn from(snapshot: InstanceSnapshot) -> Self {
        Self {
            status: snapshot.status.to_string(),
            pid: snapshot.pid,
            uptime_seconds: snapshot.uptime.map(|d| d.as_secs()).unwrap_or(0),
            tool_count: snapshot.tools.len(),
        }
    }
}
