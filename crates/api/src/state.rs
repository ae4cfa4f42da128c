use std::sync::Arc;

use fitline_pipeline::Orchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    /// Job orchestrator. Handlers create and advance jobs through it.
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<ServerConfig>,
}
