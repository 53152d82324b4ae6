#![forbid(unsafe_code)]
//! HTTP gateway over the MCP hub supervisor.
//!
//! Authenticated users manage their own MCP servers and invoke tools; the
//! authenticated identity supplies the username half of every server key.
//! Admins may additionally address other users' servers via the `user`
//! query parameter.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod settings;
pub mod state;

pub use routes::router;
pub use settings::GatewaySettings;
pub use state::AppState;
