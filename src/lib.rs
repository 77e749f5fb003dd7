use axum::Router;
use std::sync::Arc;

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;

use services::llm_agent::LlmAgent;
use services::storage::DatasetStore;

// Application state
pub struct AppState {
    pub config: config::Config,
    pub store: DatasetStore,
    pub agent: LlmAgent,
}

impl AppState {
    pub fn new(config: config::Config) -> Self {
        let store = DatasetStore::new(&config.upload_dir, &config.stats_dir);
        let agent = LlmAgent::new(&config);
        Self { config, store, agent }
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    routes::routes(state.config.max_upload_size).with_state(state)
}
