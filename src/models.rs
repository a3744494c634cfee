use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use validator::{Validate, ValidateEmail};

use crate::error::AppError;

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// Full row of the `users` table, including the password hash. Internal only:
/// it is never serialized into a response.
#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub username: String,
    // bcrypt hash of the account password.
    pub password: String,
    pub date_created: DateTime<Utc>,
}

/// Post
///
/// A row of the `posts` table.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Post {
    pub id: i32,
    pub title: String,
    pub content: String,
    pub category: String,
    pub location: Option<String>,
    // Always within [0, 5]; enforced by a CHECK constraint as well as request validation.
    pub rating: i32,
    pub published: bool,
    #[ts(type = "string")]
    pub date: DateTime<Utc>,
    // FK to users.id (Owner).
    pub owner_id: i32,
}

/// Vote
///
/// The (post, user) pair. Existence of the row is the upvote.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS, ToSchema, FromRow, PartialEq, Eq, Hash)]
#[ts(export)]
pub struct Vote {
    pub post_id: i32,
    pub user_id: i32,
}

// --- Response Schemas ---

/// Owner
///
/// Public identity of a user as embedded in post payloads.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Owner {
    pub id: i32,
    pub email: String,
    pub username: String,
}

/// UserResponse
///
/// Profile returned by registration and the profile endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct UserResponse {
    pub id: i32,
    pub email: String,
    pub username: String,
    #[ts(type = "string")]
    pub date_created: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            date_created: user.date_created,
        }
    }
}

/// UpdateUserResponse
///
/// Returned after a profile or password change.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct UpdateUserResponse {
    pub id: i32,
    pub email: String,
    pub username: String,
    #[ts(type = "string")]
    pub date_updated: DateTime<Utc>,
}

impl From<User> for UpdateUserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            date_updated: Utc::now(),
        }
    }
}

/// PostDetail
///
/// A post together with its owner's public profile, resolved by an explicit join.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct PostDetail {
    #[serde(flatten)]
    pub post: Post,
    pub owner: Owner,
}

/// PostWithVotes
///
/// Aggregate read: a post plus the live count of vote rows referencing it.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct PostWithVotes {
    pub post: PostDetail,
    #[ts(type = "number")]
    pub votes: i64,
}

/// PostRow
///
/// Flat row produced by the aggregate query (post columns, owner columns, vote count).
#[derive(Debug, FromRow)]
pub struct PostRow {
    #[sqlx(flatten)]
    pub post: Post,
    pub owner_email: String,
    pub owner_username: String,
    pub votes: i64,
}

impl From<PostRow> for PostWithVotes {
    fn from(row: PostRow) -> Self {
        let owner = Owner {
            id: row.post.owner_id,
            email: row.owner_email,
            username: row.owner_username,
        };
        Self {
            post: PostDetail {
                post: row.post,
                owner,
            },
            votes: row.votes,
        }
    }
}

/// Token
///
/// Login response.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
}

/// VoteResponse
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct VoteResponse {
    pub response: String,
}

// --- Request Payloads (Input Schemas) ---

/// CreateUserRequest
///
/// Input payload for `POST /users/create`. The password is hashed before it reaches
/// the store and is never logged.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct CreateUserRequest {
    #[validate(email(message = "value is not a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "username may not be empty"))]
    pub username: String,
    #[validate(length(min = 1, message = "password may not be empty"))]
    pub password: String,
}

/// NewUser
///
/// What the store persists for a registration: the request with its password hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
}

/// LoginRequest
///
/// Either `username` or `email` identifies the account; `username` wins if both are sent.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

/// PasswordChange
///
/// Input payload for `POST /users/pass`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct PasswordChange {
    #[validate(length(min = 1, message = "password may not be empty"))]
    pub password: String,
}

fn default_published() -> bool {
    true
}

/// CreatePostRequest
///
/// Input payload for `POST /posts`. The owner is always the caller.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0, max = 5, message = "rating must be between 0 and 5"))]
    pub rating: i32,
    #[serde(default = "default_published")]
    pub published: bool,
}

/// VoteRequest
///
/// `dir = true` adds the caller's vote, `dir = false` removes it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct VoteRequest {
    pub post_id: i32,
    pub dir: bool,
}

// --- Partial Updates ---

/// Patch
///
/// Tri-state field of a partial update: the key was absent, explicitly `null`,
/// or carried a value. Use with `#[serde(default)]` so absent keys become `Absent`.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Absent,
    Null,
    Value(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Absent
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(|value| match value {
            Some(v) => Patch::Value(v),
            None => Patch::Null,
        })
    }
}

impl<T> Patch<T> {
    /// For NOT NULL columns: `null` is rejected, absence means "leave unchanged".
    pub fn required(self, field: &str) -> Result<Option<T>, AppError> {
        match self {
            Patch::Absent => Ok(None),
            Patch::Value(v) => Ok(Some(v)),
            Patch::Null => Err(AppError::validation(format!("{field} may not be null"))),
        }
    }

    /// For nullable columns: outer `None` = unchanged, `Some(None)` = clear.
    pub fn nullable(self) -> Option<Option<T>> {
        match self {
            Patch::Absent => None,
            Patch::Null => Some(None),
            Patch::Value(v) => Some(Some(v)),
        }
    }
}

/// UserPatch
///
/// Partial update payload for `PATCH /users/profile`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UserPatch {
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub email: Patch<String>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub username: Patch<String>,
}

/// Validated form of `UserPatch`: `None` leaves the column unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserChanges {
    pub email: Option<String>,
    pub username: Option<String>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.username.is_none()
    }
}

impl TryFrom<UserPatch> for UserChanges {
    type Error = AppError;

    fn try_from(patch: UserPatch) -> Result<Self, Self::Error> {
        let email = patch.email.required("email")?;
        if let Some(email) = &email {
            if !email.validate_email() {
                return Err(AppError::validation("value is not a valid email address"));
            }
        }
        let username = patch.username.required("username")?;
        if username.as_deref() == Some("") {
            return Err(AppError::validation("username may not be empty"));
        }
        Ok(Self { email, username })
    }
}

/// PostPatch
///
/// Partial update payload for `PATCH /posts/{id}`. Only `location` may be set to `null`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PostPatch {
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub title: Patch<String>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub content: Patch<String>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub category: Patch<String>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub location: Patch<String>,
    #[serde(default)]
    #[schema(value_type = Option<i32>)]
    pub rating: Patch<i32>,
    #[serde(default)]
    #[schema(value_type = Option<bool>)]
    pub published: Patch<bool>,
}

/// Validated form of `PostPatch`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub location: Option<Option<String>>,
    pub rating: Option<i32>,
    pub published: Option<bool>,
}

impl PostChanges {
    pub fn is_empty(&self) -> bool {
        self == &PostChanges::default()
    }
}

impl TryFrom<PostPatch> for PostChanges {
    type Error = AppError;

    fn try_from(patch: PostPatch) -> Result<Self, Self::Error> {
        let rating = patch.rating.required("rating")?;
        if let Some(r) = rating {
            if !(0..=5).contains(&r) {
                return Err(AppError::validation("rating must be between 0 and 5"));
            }
        }
        Ok(Self {
            title: patch.title.required("title")?,
            content: patch.content.required("content")?,
            category: patch.category.required("category")?,
            location: patch.location.nullable(),
            rating,
            published: patch.published.required("published")?,
        })
    }
}

/// Runs `validator` rules and folds the first failure into a `Validation` error.
pub fn validate_request<T: Validate>(req: &T) -> Result<(), AppError> {
    req.validate()
        .map_err(|errors| AppError::validation(errors.to_string()))
}
