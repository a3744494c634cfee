use crate::{
    auth::AuthUser,
    error::AppError,
    guard,
    models::{
        CreatePostRequest, NewUser, Post, PostChanges, PostDetail, PostRow, PostWithVotes, User,
        UserChanges, UserResponse, Vote, VoteRequest,
    },
    votes::{self, VoteAction, VoteOutcome, VoteState},
};
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, query_builder::QueryBuilder};
use std::sync::Arc;

pub const EMAIL_TAKEN: &str = "Email already in use. Please use another email address.";
pub const USERNAME_TAKEN: &str = "Username already in use. Please use another username.";
pub const USER_CONFLICT: &str = "User cannot be created. Please check your credentials again.";
pub const USER_CREATE_FAILED: &str = "Unknown logic not handled by application";
pub const USER_NOT_FOUND: &str = "User not found";
pub const POST_NOT_FOUND: &str = "Post not found";
pub const ITEM_NOT_FOUND: &str = "Item not found";

/// Repository Trait
///
/// The contract of the aggregate store. Every mutating method is one unit of work:
/// it loads the target, runs the ownership guard or vote reconciler, writes, and
/// either commits everything or nothing.
///
/// **Send + Sync + async_trait** make `Arc<dyn Repository>` shareable across Axum's
/// task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    /// Fails with a `Conflict` naming the colliding field when email or username is taken.
    async fn create_user(&self, new_user: NewUser) -> Result<UserResponse, AppError>;
    async fn find_user(&self, id: i32) -> Result<Option<User>, AppError>;
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AppError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    // Self-mutation of the caller's own account.
    async fn update_user(&self, actor: &AuthUser, changes: UserChanges) -> Result<User, AppError>;
    async fn set_password(
        &self,
        actor: &AuthUser,
        password_hash: String,
    ) -> Result<User, AppError>;
    // Cascades to the user's posts and votes.
    async fn delete_user(&self, actor: &AuthUser) -> Result<(), AppError>;

    // --- Post Retrieval (vote counts computed at read time) ---
    async fn list_posts(&self, limit: i64) -> Result<Vec<PostWithVotes>, AppError>;
    async fn latest_post(&self) -> Result<Option<PostWithVotes>, AppError>;
    async fn get_post(&self, id: i32) -> Result<Option<PostWithVotes>, AppError>;
    async fn posts_by_owner(
        &self,
        owner_id: i32,
        include_drafts: bool,
    ) -> Result<Vec<PostWithVotes>, AppError>;

    // --- Post Actions ---
    async fn create_post(
        &self,
        actor: &AuthUser,
        req: CreatePostRequest,
    ) -> Result<PostDetail, AppError>;
    // Owner-Only.
    async fn update_post(
        &self,
        actor: &AuthUser,
        id: i32,
        changes: PostChanges,
    ) -> Result<PostDetail, AppError>;
    // Owner-Only. Cascades to the post's votes.
    async fn delete_post(&self, actor: &AuthUser, id: i32) -> Result<(), AppError>;

    // --- Votes ---
    async fn cast_vote(
        &self,
        actor: &AuthUser,
        vote: VoteRequest,
    ) -> Result<VoteOutcome, AppError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// uniqueness_conflict
///
/// Explains a uniqueness violation on the users table. Both flags can be false when the
/// colliding row disappeared between the violation and the lookup; that case gets the
/// generic message.
pub fn uniqueness_conflict(email_taken: bool, username_taken: bool) -> AppError {
    if email_taken {
        AppError::conflict(EMAIL_TAKEN)
    } else if username_taken {
        AppError::conflict(USERNAME_TAKEN)
    } else {
        AppError::conflict(USER_CONFLICT)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

/// Name of the FK from `votes.user_id` to `users.id` (see the init migration).
pub const VOTE_USER_FK: &str = "votes_user_id_fkey";

/// vote_reference_missing
///
/// Names the side of a vote whose referenced row is gone: the voter's account if the
/// violated constraint is `VOTE_USER_FK`, the post otherwise.
pub fn vote_reference_missing(constraint: Option<&str>) -> AppError {
    if constraint == Some(VOTE_USER_FK) {
        AppError::not_found(USER_NOT_FOUND)
    } else {
        AppError::not_found(POST_NOT_FOUND)
    }
}

const USER_COLUMNS: &str = "id, email, username, password, date_created";

const POST_COLUMNS: &str =
    "id, title, content, category, location, rating, published, date, owner_id";

/// Aggregate read: post + owner (explicit join) + live vote count (left join).
const POST_AGGREGATE: &str = r#"
    SELECT
        p.id, p.title, p.content, p.category, p.location, p.rating,
        p.published, p.date, p.owner_id,
        u.email AS owner_email, u.username AS owner_username,
        COUNT(v.post_id) AS votes
    FROM posts p
    JOIN users u ON u.id = p.owner_id
    LEFT JOIN votes v ON v.post_id = p.id
"#;

const POST_GROUP: &str = " GROUP BY p.id, u.id ";

/// PostgresRepository
///
/// The production implementation of `Repository`, backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn user_exists_with_email(
        &self,
        email: &str,
        except: Option<i32>,
    ) -> Result<bool, AppError> {
        let found: Option<i32> = sqlx::query_scalar(
            "SELECT id FROM users WHERE email = $1 AND ($2::int IS NULL OR id <> $2)",
        )
        .bind(email)
        .bind(except)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn user_exists_with_username(
        &self,
        username: &str,
        except: Option<i32>,
    ) -> Result<bool, AppError> {
        let found: Option<i32> = sqlx::query_scalar(
            "SELECT id FROM users WHERE username = $1 AND ($2::int IS NULL OR id <> $2)",
        )
        .bind(username)
        .bind(except)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Re-queries after a uniqueness violation to name the colliding field.
    async fn resolve_user_conflict(
        &self,
        email: Option<&str>,
        username: Option<&str>,
        except: Option<i32>,
    ) -> Result<AppError, AppError> {
        let email_taken = match email {
            Some(email) => self.user_exists_with_email(email, except).await?,
            None => false,
        };
        let username_taken = match username {
            Some(username) => self.user_exists_with_username(username, except).await?,
            None => false,
        };
        Ok(uniqueness_conflict(email_taken, username_taken))
    }
}

/// Loads and row-locks the caller's account for the rest of the transaction.
async fn lock_user(conn: &mut PgConnection, id: i32) -> Result<User, AppError> {
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::not_found(USER_NOT_FOUND))
}

async fn lock_post(conn: &mut PgConnection, id: i32) -> Result<Post, AppError> {
    sqlx::query_as::<_, Post>(&format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::not_found(ITEM_NOT_FOUND))
}

async fn fetch_post_detail(conn: &mut PgConnection, id: i32) -> Result<PostDetail, AppError> {
    let row = sqlx::query_as::<_, PostRow>(&format!(
        "{POST_AGGREGATE} WHERE p.id = $1 {POST_GROUP}"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::not_found(ITEM_NOT_FOUND))?;
    Ok(PostWithVotes::from(row).post)
}

#[async_trait]
impl Repository for PostgresRepository {
    /// create_user
    ///
    /// Inserts inside a transaction. A uniqueness violation rolls the transaction back and
    /// is then explained by looking up which of email/username already exists.
    async fn create_user(&self, new_user: NewUser) -> Result<UserResponse, AppError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, UserResponse>(
            r#"INSERT INTO users (email, username, password)
               VALUES ($1, $2, $3)
               RETURNING id, email, username, date_created"#,
        )
        .bind(&new_user.email)
        .bind(&new_user.username)
        .bind(&new_user.password_hash)
        .fetch_one(&mut *tx)
        .await;

        match inserted {
            Ok(user) => {
                tx.commit().await?;
                tracing::info!(user_id = user.id, "user created");
                Ok(user)
            }
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                Err(self
                    .resolve_user_conflict(Some(&new_user.email), Some(&new_user.username), None)
                    .await?)
            }
            Err(e) => {
                tracing::error!("create_user error: {:?}", e);
                Err(AppError::Internal(USER_CREATE_FAILED.to_string()))
            }
        }
    }

    async fn find_user(&self, id: i32) -> Result<Option<User>, AppError> {
        Ok(sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// update_user
    ///
    /// Uses `COALESCE` so that only supplied columns change.
    async fn update_user(&self, actor: &AuthUser, changes: UserChanges) -> Result<User, AppError> {
        let mut tx = self.pool.begin().await?;
        let user = lock_user(&mut tx, actor.id).await?;
        guard::authorize(actor, &user)?;

        if changes.is_empty() {
            tx.commit().await?;
            return Ok(user);
        }

        let updated = sqlx::query_as::<_, User>(&format!(
            r#"UPDATE users
               SET email = COALESCE($2, email),
                   username = COALESCE($3, username)
               WHERE id = $1
               RETURNING {USER_COLUMNS}"#
        ))
        .bind(user.id)
        .bind(&changes.email)
        .bind(&changes.username)
        .fetch_one(&mut *tx)
        .await;

        match updated {
            Ok(user) => {
                tx.commit().await?;
                Ok(user)
            }
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                Err(self
                    .resolve_user_conflict(
                        changes.email.as_deref(),
                        changes.username.as_deref(),
                        Some(user.id),
                    )
                    .await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set_password(
        &self,
        actor: &AuthUser,
        password_hash: String,
    ) -> Result<User, AppError> {
        let mut tx = self.pool.begin().await?;
        let user = lock_user(&mut tx, actor.id).await?;
        guard::authorize(actor, &user)?;

        let updated = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET password = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(user.id)
        .bind(password_hash)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    /// delete_user
    ///
    /// Posts and votes go with the account through `ON DELETE CASCADE`.
    async fn delete_user(&self, actor: &AuthUser) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        let user = lock_user(&mut tx, actor.id).await?;
        guard::authorize(actor, &user)?;

        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(user_id = user.id, "user deleted");
        Ok(())
    }

    /// list_posts
    ///
    /// Newest first (descending id), at most `limit` rows.
    async fn list_posts(&self, limit: i64) -> Result<Vec<PostWithVotes>, AppError> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "{POST_AGGREGATE} {POST_GROUP} ORDER BY p.id DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PostWithVotes::from).collect())
    }

    async fn latest_post(&self) -> Result<Option<PostWithVotes>, AppError> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "{POST_AGGREGATE} {POST_GROUP} ORDER BY p.id DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(PostWithVotes::from))
    }

    async fn get_post(&self, id: i32) -> Result<Option<PostWithVotes>, AppError> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "{POST_AGGREGATE} WHERE p.id = $1 {POST_GROUP}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(PostWithVotes::from))
    }

    async fn posts_by_owner(
        &self,
        owner_id: i32,
        include_drafts: bool,
    ) -> Result<Vec<PostWithVotes>, AppError> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "{POST_AGGREGATE} WHERE p.owner_id = $1 AND ($2 OR p.published) \
             {POST_GROUP} ORDER BY p.id DESC"
        ))
        .bind(owner_id)
        .bind(include_drafts)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PostWithVotes::from).collect())
    }

    async fn create_post(
        &self,
        actor: &AuthUser,
        req: CreatePostRequest,
    ) -> Result<PostDetail, AppError> {
        let mut tx = self.pool.begin().await?;

        let inserted: Result<i32, sqlx::Error> = sqlx::query_scalar(
            r#"INSERT INTO posts (title, content, category, location, rating, published, owner_id)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING id"#,
        )
        .bind(&req.title)
        .bind(&req.content)
        .bind(&req.category)
        .bind(&req.location)
        .bind(req.rating)
        .bind(req.published)
        .bind(actor.id)
        .fetch_one(&mut *tx)
        .await;

        let id = match inserted {
            Ok(id) => id,
            // The caller's account vanished after authentication.
            Err(e) if is_foreign_key_violation(&e) => {
                return Err(AppError::not_found(USER_NOT_FOUND));
            }
            Err(e) => return Err(e.into()),
        };

        let detail = fetch_post_detail(&mut tx, id).await?;
        tx.commit().await?;
        tracing::info!(post_id = id, owner_id = actor.id, "post created");
        Ok(detail)
    }

    /// update_post
    ///
    /// Builds the `SET` list from the supplied fields only; `location` can be cleared
    /// with an explicit null.
    async fn update_post(
        &self,
        actor: &AuthUser,
        id: i32,
        changes: PostChanges,
    ) -> Result<PostDetail, AppError> {
        let mut tx = self.pool.begin().await?;
        let post = lock_post(&mut tx, id).await?;
        guard::authorize(actor, &post)?;

        if !changes.is_empty() {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE posts SET ");
            let mut set = builder.separated(", ");
            if let Some(title) = changes.title {
                set.push("title = ").push_bind_unseparated(title);
            }
            if let Some(content) = changes.content {
                set.push("content = ").push_bind_unseparated(content);
            }
            if let Some(category) = changes.category {
                set.push("category = ").push_bind_unseparated(category);
            }
            if let Some(location) = changes.location {
                set.push("location = ").push_bind_unseparated(location);
            }
            if let Some(rating) = changes.rating {
                set.push("rating = ").push_bind_unseparated(rating);
            }
            if let Some(published) = changes.published {
                set.push("published = ").push_bind_unseparated(published);
            }
            builder.push(" WHERE id = ");
            builder.push_bind(post.id);

            builder.build().execute(&mut *tx).await?;
        }

        let detail = fetch_post_detail(&mut tx, post.id).await?;
        tx.commit().await?;
        Ok(detail)
    }

    async fn delete_post(&self, actor: &AuthUser, id: i32) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        let post = lock_post(&mut tx, id).await?;
        guard::authorize(actor, &post)?;

        sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(post.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(post_id = post.id, "post deleted");
        Ok(())
    }

    /// cast_vote
    ///
    /// Share-locks the post so it cannot be deleted mid-request, reads the pair's state,
    /// reconciles, and writes. Two concurrent inserts for the same pair race on the
    /// primary key: the loser gets a unique violation, reported as `Conflict`.
    async fn cast_vote(
        &self,
        actor: &AuthUser,
        vote: VoteRequest,
    ) -> Result<VoteOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let post: Option<i32> = sqlx::query_scalar("SELECT id FROM posts WHERE id = $1 FOR SHARE")
            .bind(vote.post_id)
            .fetch_optional(&mut *tx)
            .await?;
        if post.is_none() {
            return Err(AppError::not_found(POST_NOT_FOUND));
        }

        let pair = Vote {
            post_id: vote.post_id,
            user_id: actor.id,
        };
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM votes WHERE post_id = $1 AND user_id = $2)",
        )
        .bind(pair.post_id)
        .bind(pair.user_id)
        .fetch_one(&mut *tx)
        .await?;

        let action = votes::reconcile(VoteState::from_exists(exists), vote.dir)?;

        match action {
            VoteAction::Insert => {
                let inserted = sqlx::query("INSERT INTO votes (post_id, user_id) VALUES ($1, $2)")
                    .bind(pair.post_id)
                    .bind(pair.user_id)
                    .execute(&mut *tx)
                    .await;
                match inserted {
                    Ok(_) => {}
                    Err(e) if is_unique_violation(&e) => {
                        return Err(AppError::conflict(votes::VOTE_CONFLICT));
                    }
                    Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                        return Err(vote_reference_missing(db.constraint()));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            VoteAction::Delete => {
                let deleted = sqlx::query("DELETE FROM votes WHERE post_id = $1 AND user_id = $2")
                    .bind(pair.post_id)
                    .bind(pair.user_id)
                    .execute(&mut *tx)
                    .await?;
                // A concurrent request removed the vote first.
                if deleted.rows_affected() == 0 {
                    return Err(AppError::conflict(votes::VOTE_CONFLICT));
                }
            }
        }

        tx.commit().await?;
        tracing::debug!(post_id = vote.post_id, user_id = actor.id, ?action, "vote reconciled");
        Ok(action.into())
    }
}
