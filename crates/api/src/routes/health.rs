use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Root-level liveness route, outside `/api/v1`.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health::health_check))
}
