use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints that are **unauthenticated**. None of them mutate an existing resource,
/// so the ownership guard is never consulted here.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers and monitoring.
        .route("/health", get(|| async { "ok" }))
        // POST /login
        // Exchanges credentials for a bearer token.
        .route("/login", post(handlers::login))
        // POST /users/create
        // Registration. Returns 409 naming the field on a duplicate email or username.
        .route("/users/create", post(handlers::register_user))
        // GET /users/{id}
        .route("/users/{id}", get(handlers::get_user))
        // GET /users/{id}/posts
        // Published posts only.
        .route("/users/{id}/posts", get(handlers::get_user_posts))
        // GET /posts?maxpost=N
        .route("/posts", get(handlers::get_posts))
        // GET /posts/latest
        .route("/posts/latest", get(handlers::get_latest_post))
        // GET /posts/{id}
        .route("/posts/{id}", get(handlers::get_post))
}
