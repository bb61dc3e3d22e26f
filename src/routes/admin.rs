use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Admin Router Module
///
/// User management and subscriber export (rank >= admin). Registration additionally
/// requires the new role to be strictly below the caller's, checked in the handler.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // POST /auth/user/register
        .route("/auth/user/register", post(handlers::register_user))
        // GET /users and /users/{id}
        // PUT /users/{id} is mounted by the authenticated router; the two merge.
        .route("/users", get(handlers::list_users))
        .route("/users/{id}", get(handlers::get_user))
        // GET /newsletter
        .route("/newsletter", get(handlers::list_newsletters))
}
