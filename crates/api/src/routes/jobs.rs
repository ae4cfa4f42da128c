use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// POST   /                create
/// GET    /{id}            get_by_id
/// POST   /{id}/advance    advance
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(jobs::create))
        .route("/{id}", get(jobs::get_by_id))
        .route("/{id}/advance", post(jobs::advance))
}
