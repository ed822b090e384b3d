use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use widget_engine_api::{app, catalog, config, middleware};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = config::Config::load()?;

    middleware::logging::init_logging(&config.logging);
    middleware::init_metrics().context("Failed to install Prometheus recorder")?;

    info!("Starting Widget Engine API v{}", env!("CARGO_PKG_VERSION"));

    let widgets = catalog::build_service(&config)?;
    info!(
        widgets = widgets.registry().len(),
        categories = widgets.registry().categories().len(),
        "Widget engine ready"
    );

    let addr = config
        .socket_addr()
        .context("Invalid server host or port")?;
    let app = app::create_app(config, Arc::new(widgets));

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
