use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Read-only blog content, the newsletter sign-up form, dashboard counters and the
/// login endpoint. Nested under `/api`.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // POST /auth/user/login
        // Credentials in, bearer token out.
        .route("/auth/user/login", post(handlers::login))
        // GET /blog/posts
        .route("/blog/posts", get(handlers::list_posts))
        // GET /blog/author and /blog/author/{id}
        .route("/blog/author", get(handlers::list_authors))
        .route("/blog/author/{id}", get(handlers::get_author))
        // GET /blog/{id}
        // Static segments above take precedence over this capture.
        .route("/blog/{id}", get(handlers::get_post))
        // POST /newsletter/subscribe
        .route("/newsletter/subscribe", post(handlers::subscribe_newsletter))
        // GET /stats
        .route("/stats", get(handlers::get_stats))
}
