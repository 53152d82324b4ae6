//! Application-wide context handed to every handler. No globals.

use std::sync::Arc;

use mcp_hub::{ConfigStore, Controller};

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub store: Arc<ConfigStore>,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(controller: Arc<Controller>, jwt_secret: impl Into<Arc<str>>) -> Self {
        let store = controller.store().clone();
        Self {
            controller,
            store,
            jwt_secret: jwt_secret.into(),
        }
    }
}
