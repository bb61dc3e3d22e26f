use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Staff Router Module
///
/// Back-office routes for any role holder (rank >= staff).
pub fn staff_routes() -> Router<AppState> {
    Router::new()
        // GET /roles
        .route("/roles", get(handlers::list_roles))
        // POST /generate
        // Request/reply to the `news_generator` worker over the broker.
        .route("/generate", post(handlers::generate_content))
}
