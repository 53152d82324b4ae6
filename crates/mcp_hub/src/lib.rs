#![forbid(unsafe_code)]
//! Multi-tenant supervisor for stdio MCP servers.
//!
//! Users register server specifications (command, args, env); the
//! supervisor launches each as a child process, performs the MCP
//! handshake, caches the discovered tool manifest, and proxies tool
//! invocations over the child's stdio, isolating per-user state and
//! lifecycle.
//!
//! ## Layering
//! - [`process::ProcessHandle`] owns one child and its three streams,
//!   multiplexing concurrent JSON-RPC calls over a single stdio pair.
//! - [`client::McpClient`] speaks the MCP protocol on top of a handle:
//!   `initialize` → `notifications/initialized` → `tools/list`, then
//!   `tools/call` on demand.
//! - [`registry::ServerRegistry`] maps `(username, server-name)` to the
//!   in-memory instance record and is the single source of truth for live
//!   servers.
//! - [`controller::Controller`] is the command surface used by HTTP
//!   handlers: add, start, stop, restart, delete, update-env, status,
//!   list, call-tool, plus startup reconciliation.
//! - [`store::ConfigStore`] persists one JSON document per user and stays
//!   consistent with the registry through the controller.

pub mod client;
pub mod controller;
pub mod error;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod store;

pub use client::McpClient;
pub use controller::{Controller, SupervisorConfig, DEFAULT_ENV_ALLOWLIST};
pub use error::HubError;
pub use process::{ProcessHandle, SpawnOptions};
pub use protocol::{CallToolResult, ClientInfo, Tool};
pub use registry::{InstanceSnapshot, ServerKey, ServerRegistry, ServerStatus};
pub use store::{ConfigStore, EnvUpdate, ServerSpec, UserConfig, UserGroup};
