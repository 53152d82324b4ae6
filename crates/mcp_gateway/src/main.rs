use std::{env, error::Error, path::PathBuf, sync::Arc};

use mcp_gateway::{routes, settings::GatewaySettings, state::AppState};
use mcp_hub::{ConfigStore, Controller};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings_path = env::var("MCP_GATEWAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("gateway.toml"));
    let settings = GatewaySettings::load(&settings_path)?;
    let jwt_secret = env::var("JWT_SECRET_KEY").map_err(|_| "JWT_SECRET_KEY must be set")?;

    let store = Arc::new(ConfigStore::open(&settings.config_root).await?);
    let controller = Arc::new(Controller::new(store, settings.supervisor_config()));

    info!("reconciling persisted servers");
    controller.reconcile().await;

    let state = AppState::new(controller, jwt_secret);
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(settings.bind_addr).await?;
    info!("listening on {}", settings.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
