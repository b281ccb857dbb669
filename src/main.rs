use std::sync::Arc;

use stateless_mcp_http::{
    build_app, config::Config, domain::build_capability_table, logging, AppState,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let capabilities = Arc::new(build_capability_table(config.notification_cap)?);
    let state = AppState::new(capabilities);
    let app = build_app(state);
    let bind_socket = config.bind_socket()?;
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        "server starting"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
