use anyhow::Result;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use dataforge_services::{app, config, logging, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging()?;

    let config = config::load_config()?;
    let addr = config.addr;

    let state = Arc::new(AppState::new(config));
    state.store.init().await?;

    let app = app(state).layer(TraceLayer::new_for_http());

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
