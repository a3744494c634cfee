use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, patch, post},
};

/// Authenticated Router Module
///
/// Every route here sits behind the authentication layer applied in `create_router`.
/// Mutations of existing posts and accounts additionally pass the ownership guard
/// inside the repository's unit of work.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // --- Account ---
        // GET/PATCH /users/profile
        // Read or partially update the caller's own profile.
        .route(
            "/users/profile",
            get(handlers::get_profile).patch(handlers::update_profile),
        )
        // GET /users/profile/posts
        // The caller's posts, drafts included.
        .route("/users/profile/posts", get(handlers::get_profile_posts))
        // POST /users/pass
        .route("/users/pass", post(handlers::change_password))
        // POST /users/delete
        // Cascades to the caller's posts and votes.
        .route("/users/delete", post(handlers::delete_account))
        // --- Posts ---
        // POST /posts
        .route("/posts", post(handlers::create_post))
        // PATCH/DELETE /posts/{id}
        // Owner-only.
        .route(
            "/posts/{id}",
            patch(handlers::update_post).delete(handlers::delete_post),
        )
        // --- Votes ---
        // POST /vote
        .route("/vote", post(handlers::vote))
}
