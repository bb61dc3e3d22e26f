use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Authenticated Router Module
///
/// Routes open to any valid token regardless of role. Finer checks (post ownership,
/// the user-edit hierarchy) live in the handlers, which receive the resolved
/// `AuthUser` from the request extensions.
pub fn authenticated_routes() -> Router<AppState> {
    Router::new()
        // GET /auth/user
        .route("/auth/user", get(handlers::get_current_user))
        // PUT /users/{id}
        // Self-edit, or editing a strictly lower-ranked user.
        .route("/users/{id}", put(handlers::update_user))
        // POST /blog
        // Caller must own an author profile.
        .route("/blog", post(handlers::create_post))
        // PUT /blog/edit/{id}
        // Owner-only.
        .route("/blog/edit/{id}", put(handlers::edit_post))
}
