use crate::{
    AppState,
    auth::AuthUser,
    error::{AppError, ErrorBody},
    extract::ApiJson,
    models::{
        CreatePostRequest, CreateUserRequest, LoginRequest, NewUser, PasswordChange, PostChanges,
        PostDetail, PostPatch, PostWithVotes, Token, UpdateUserResponse, UserChanges, UserPatch,
        UserResponse, VoteRequest, VoteResponse, validate_request,
    },
    repository::{ITEM_NOT_FOUND, USER_NOT_FOUND},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

/// Default number of posts returned by the listing endpoint.
pub const DEFAULT_MAX_POSTS: i64 = 10;

/// PostListQuery
///
/// Query parameters for `GET /posts`.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct PostListQuery {
    /// Maximum number of posts to return (default 10).
    pub maxpost: Option<i64>,
}

// --- Session ---

/// login
///
/// [Public Route] Exchanges a username (or email) and password for a bearer token.
/// Unknown accounts and wrong passwords are indistinguishable to the caller.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = Token),
        (status = 401, description = "Invalid credentials", body = ErrorBody)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<Json<Token>, AppError> {
    let user = match (&payload.username, &payload.email) {
        (Some(username), _) => state.repo.find_user_by_username(username).await?,
        (None, Some(email)) => state.repo.find_user_by_email(email).await?,
        (None, None) => return Err(AppError::validation("username or email is required")),
    };

    let Some(user) = user else {
        return Err(AppError::Unauthorized);
    };

    if !state
        .credentials
        .verify_password(payload.password, user.password)
        .await?
    {
        tracing::debug!(user_id = user.id, "login rejected: wrong password");
        return Err(AppError::Unauthorized);
    }

    let access_token = state.credentials.issue_token(user.id)?;
    Ok(Json(Token {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

// --- Users ---

/// register_user
///
/// [Public Route] Creates an account. The password is bcrypt-hashed before it reaches the
/// store. A duplicate email or username yields 409 with a message naming the field.
#[utoipa::path(
    post,
    path = "/users/create",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Registered", body = UserResponse),
        (status = 409, description = "Email or username already in use", body = ErrorBody)
    )
)]
pub async fn register_user(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    validate_request(&payload)?;

    let password_hash = state.credentials.hash_password(payload.password).await?;
    let user = state
        .repo
        .create_user(NewUser {
            email: payload.email,
            username: payload.username,
            password_hash,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// get_profile
///
/// [Authenticated Route] The caller's own profile.
#[utoipa::path(
    get,
    path = "/users/profile",
    responses(
        (status = 200, description = "Profile", body = UserResponse),
        (status = 401, description = "Unauthorized", body = ErrorBody)
    )
)]
pub async fn get_profile(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .repo
        .find_user(id)
        .await?
        .ok_or_else(|| AppError::not_found(USER_NOT_FOUND))?;
    Ok(Json(user.into()))
}

/// get_profile_posts
///
/// [Authenticated Route] The caller's own posts, drafts included.
#[utoipa::path(
    get,
    path = "/users/profile/posts",
    responses((status = 200, description = "My posts", body = [PostWithVotes]))
)]
pub async fn get_profile_posts(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<PostWithVotes>>, AppError> {
    Ok(Json(state.repo.posts_by_owner(id, true).await?))
}

/// update_profile
///
/// [Authenticated Route] Partial update of email and/or username. Omitted fields keep
/// their values; an empty body changes nothing.
#[utoipa::path(
    patch,
    path = "/users/profile",
    request_body = UserPatch,
    responses(
        (status = 200, description = "Updated", body = UpdateUserResponse),
        (status = 409, description = "Email or username already in use", body = ErrorBody)
    )
)]
pub async fn update_profile(
    auth_user: AuthUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<UserPatch>,
) -> Result<Json<UpdateUserResponse>, AppError> {
    let changes = UserChanges::try_from(payload)?;
    let user = state.repo.update_user(&auth_user, changes).await?;
    Ok(Json(user.into()))
}

/// change_password
///
/// [Authenticated Route] Rehashes and replaces the caller's password.
#[utoipa::path(
    post,
    path = "/users/pass",
    request_body = PasswordChange,
    responses((status = 200, description = "Password changed", body = UpdateUserResponse))
)]
pub async fn change_password(
    auth_user: AuthUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<PasswordChange>,
) -> Result<Json<UpdateUserResponse>, AppError> {
    validate_request(&payload)?;
    let password_hash = state.credentials.hash_password(payload.password).await?;
    let user = state.repo.set_password(&auth_user, password_hash).await?;
    Ok(Json(user.into()))
}

/// delete_account
///
/// [Authenticated Route] Deletes the caller's account together with their posts and votes.
#[utoipa::path(
    post,
    path = "/users/delete",
    responses((status = 204, description = "Account deleted"))
)]
pub async fn delete_account(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    state.repo.delete_user(&auth_user).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// get_user
///
/// [Public Route] Another user's public profile.
#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "Found", body = UserResponse),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .repo
        .find_user(id)
        .await?
        .ok_or_else(|| AppError::not_found(ITEM_NOT_FOUND))?;
    Ok(Json(user.into()))
}

/// get_user_posts
///
/// [Public Route] Another user's published posts; drafts are never exposed here.
#[utoipa::path(
    get,
    path = "/users/{id}/posts",
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "Published posts", body = [PostWithVotes]),
        (status = 404, description = "Unknown user", body = ErrorBody)
    )
)]
pub async fn get_user_posts(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<PostWithVotes>>, AppError> {
    if state.repo.find_user(id).await?.is_none() {
        return Err(AppError::not_found(ITEM_NOT_FOUND));
    }
    Ok(Json(state.repo.posts_by_owner(id, false).await?))
}

// --- Posts ---

/// get_posts
///
/// [Public Route] Newest posts first, each with its live vote count.
#[utoipa::path(
    get,
    path = "/posts",
    params(PostListQuery),
    responses((status = 200, description = "Posts", body = [PostWithVotes]))
)]
pub async fn get_posts(
    State(state): State<AppState>,
    Query(query): Query<PostListQuery>,
) -> Result<Json<Vec<PostWithVotes>>, AppError> {
    let limit = query.maxpost.unwrap_or(DEFAULT_MAX_POSTS).max(0);
    Ok(Json(state.repo.list_posts(limit).await?))
}

/// get_latest_post
///
/// [Public Route] The most recently created post.
#[utoipa::path(
    get,
    path = "/posts/latest",
    responses(
        (status = 200, description = "Latest post", body = PostWithVotes),
        (status = 404, description = "No posts yet", body = ErrorBody)
    )
)]
pub async fn get_latest_post(
    State(state): State<AppState>,
) -> Result<Json<PostWithVotes>, AppError> {
    state
        .repo
        .latest_post()
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(ITEM_NOT_FOUND))
}

/// get_post
///
/// [Public Route] A single post with its vote count.
#[utoipa::path(
    get,
    path = "/posts/{id}",
    params(("id" = i32, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Found", body = PostWithVotes),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<PostWithVotes>, AppError> {
    state
        .repo
        .get_post(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(ITEM_NOT_FOUND))
}

/// create_post
///
/// [Authenticated Route] The owner is always the authenticated caller, never the payload.
#[utoipa::path(
    post,
    path = "/posts",
    request_body = CreatePostRequest,
    responses(
        (status = 201, description = "Created", body = PostDetail),
        (status = 422, description = "Invalid rating", body = ErrorBody)
    )
)]
pub async fn create_post(
    auth_user: AuthUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CreatePostRequest>,
) -> Result<(StatusCode, Json<PostDetail>), AppError> {
    validate_request(&payload)?;
    let post = state.repo.create_post(&auth_user, payload).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

/// update_post
///
/// [Authenticated Route] Owner-only partial update.
#[utoipa::path(
    patch,
    path = "/posts/{id}",
    params(("id" = i32, Path, description = "Post ID")),
    request_body = PostPatch,
    responses(
        (status = 200, description = "Updated", body = PostDetail),
        (status = 403, description = "Not Owner", body = ErrorBody),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn update_post(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    ApiJson(payload): ApiJson<PostPatch>,
) -> Result<Json<PostDetail>, AppError> {
    let changes = PostChanges::try_from(payload)?;
    let post = state.repo.update_post(&auth_user, id, changes).await?;
    Ok(Json(post))
}

/// delete_post
///
/// [Authenticated Route] Owner-only delete. Votes on the post are removed with it.
#[utoipa::path(
    delete,
    path = "/posts/{id}",
    params(("id" = i32, Path, description = "Post ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not Owner", body = ErrorBody),
        (status = 404, description = "Not Found", body = ErrorBody)
    )
)]
pub async fn delete_post(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    state.repo.delete_post(&auth_user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Votes ---

/// vote
///
/// [Authenticated Route] `dir = true` adds the caller's vote, `dir = false` removes it.
/// Adding twice or removing a vote that does not exist is a 409.
#[utoipa::path(
    post,
    path = "/vote",
    request_body = VoteRequest,
    responses(
        (status = 201, description = "Vote added or removed", body = VoteResponse),
        (status = 404, description = "Post not found", body = ErrorBody),
        (status = 409, description = "Voting conflict", body = ErrorBody)
    )
)]
pub async fn vote(
    auth_user: AuthUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<VoteRequest>,
) -> Result<(StatusCode, Json<VoteResponse>), AppError> {
    let outcome = state.repo.cast_vote(&auth_user, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(VoteResponse {
            response: outcome.message().to_string(),
        }),
    ))
}
