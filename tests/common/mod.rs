#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use blog_api::{
    AppConfig, AppState, create_router,
    auth::AuthUser,
    error::AppError,
    guard,
    models::{
        CreatePostRequest, NewUser, Owner, Post, PostChanges, PostDetail, PostWithVotes, User,
        UserChanges, UserResponse, VoteRequest,
    },
    repository::{ITEM_NOT_FOUND, POST_NOT_FOUND, Repository, USER_NOT_FOUND, uniqueness_conflict},
    votes::{self, VoteAction, VoteOutcome, VoteState},
};
use chrono::Utc;
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tower::ServiceExt;

// --- In-Memory Repository ---

#[derive(Default)]
struct Tables {
    users: BTreeMap<i32, User>,
    posts: BTreeMap<i32, Post>,
    // (post_id, user_id)
    votes: BTreeSet<(i32, i32)>,
    next_user_id: i32,
    next_post_id: i32,
}

impl Tables {
    fn email_taken(&self, email: &str, except: Option<i32>) -> bool {
        self.users
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }

    fn username_taken(&self, username: &str, except: Option<i32>) -> bool {
        self.users
            .values()
            .any(|u| u.username == username && Some(u.id) != except)
    }

    fn aggregate(&self, post: &Post) -> PostWithVotes {
        let owner = self
            .users
            .get(&post.owner_id)
            .map(|u| Owner {
                id: u.id,
                email: u.email.clone(),
                username: u.username.clone(),
            })
            .unwrap_or_default();
        let votes = self.votes.iter().filter(|(p, _)| *p == post.id).count() as i64;
        PostWithVotes {
            post: PostDetail {
                post: post.clone(),
                owner,
            },
            votes,
        }
    }

    fn remove_post(&mut self, id: i32) {
        self.posts.remove(&id);
        self.votes.retain(|(p, _)| *p != id);
    }
}

/// MemoryRepository
///
/// `Repository` over in-process tables. One mutex serializes every unit of work, and
/// every method validates before it writes, so a failed call leaves no partial state.
#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
    user_lookups: AtomicUsize,
}

/// Writes the supplied fields of `changes` onto `post`, leaving the rest untouched.
fn apply_changes(post: &mut Post, changes: PostChanges) {
    if let Some(title) = changes.title {
        post.title = title;
    }
    if let Some(content) = changes.content {
        post.content = content;
    }
    if let Some(category) = changes.category {
        post.category = category;
    }
    if let Some(location) = changes.location {
        post.location = location;
    }
    if let Some(rating) = changes.rating {
        post.rating = rating;
    }
    if let Some(published) = changes.published {
        post.published = published;
    }
}

impl MemoryRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn user_count(&self) -> usize {
        self.tables.lock().unwrap().users.len()
    }

    pub fn post_count(&self) -> usize {
        self.tables.lock().unwrap().posts.len()
    }

    pub fn vote_count(&self) -> usize {
        self.tables.lock().unwrap().votes.len()
    }

    /// Number of `find_user` calls so far.
    pub fn user_lookups(&self) -> usize {
        self.user_lookups.load(Ordering::SeqCst)
    }

    pub fn has_vote(&self, post_id: i32, user_id: i32) -> bool {
        self.tables.lock().unwrap().votes.contains(&(post_id, user_id))
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_user(&self, new_user: NewUser) -> Result<UserResponse, AppError> {
        let mut t = self.tables.lock().unwrap();
        let email_taken = t.email_taken(&new_user.email, None);
        let username_taken = t.username_taken(&new_user.username, None);
        if email_taken || username_taken {
            return Err(uniqueness_conflict(email_taken, username_taken));
        }
        t.next_user_id += 1;
        let user = User {
            id: t.next_user_id,
            email: new_user.email,
            username: new_user.username,
            password: new_user.password_hash,
            date_created: Utc::now(),
        };
        t.users.insert(user.id, user.clone());
        Ok(user.into())
    }

    async fn find_user(&self, id: i32) -> Result<Option<User>, AppError> {
        self.user_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.lock().unwrap().users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let t = self.tables.lock().unwrap();
        Ok(t.users.values().find(|u| u.username == username).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let t = self.tables.lock().unwrap();
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn update_user(&self, actor: &AuthUser, changes: UserChanges) -> Result<User, AppError> {
        let mut t = self.tables.lock().unwrap();
        let user = t
            .users
            .get(&actor.id)
            .cloned()
            .ok_or_else(|| AppError::not_found(USER_NOT_FOUND))?;
        guard::authorize(actor, &user)?;

        let email_taken = changes
            .email
            .as_deref()
            .is_some_and(|e| t.email_taken(e, Some(user.id)));
        let username_taken = changes
            .username
            .as_deref()
            .is_some_and(|u| t.username_taken(u, Some(user.id)));
        if email_taken || username_taken {
            return Err(uniqueness_conflict(email_taken, username_taken));
        }

        let stored = t.users.get_mut(&user.id).unwrap();
        if let Some(email) = changes.email {
            stored.email = email;
        }
        if let Some(username) = changes.username {
            stored.username = username;
        }
        Ok(stored.clone())
    }

    async fn set_password(
        &self,
        actor: &AuthUser,
        password_hash: String,
    ) -> Result<User, AppError> {
        let mut t = self.tables.lock().unwrap();
        let user = t
            .users
            .get_mut(&actor.id)
            .ok_or_else(|| AppError::not_found(USER_NOT_FOUND))?;
        guard::authorize(actor, &*user)?;
        user.password = password_hash;
        Ok(user.clone())
    }

    async fn delete_user(&self, actor: &AuthUser) -> Result<(), AppError> {
        let mut t = self.tables.lock().unwrap();
        let user = t
            .users
            .get(&actor.id)
            .cloned()
            .ok_or_else(|| AppError::not_found(USER_NOT_FOUND))?;
        guard::authorize(actor, &user)?;

        t.users.remove(&user.id);
        let owned: Vec<i32> = t
            .posts
            .values()
            .filter(|p| p.owner_id == user.id)
            .map(|p| p.id)
            .collect();
        for id in owned {
            t.remove_post(id);
        }
        t.votes.retain(|(_, u)| *u != user.id);
        Ok(())
    }

    async fn list_posts(&self, limit: i64) -> Result<Vec<PostWithVotes>, AppError> {
        let t = self.tables.lock().unwrap();
        Ok(t.posts
            .values()
            .rev()
            .take(limit.max(0) as usize)
            .map(|p| t.aggregate(p))
            .collect())
    }

    async fn latest_post(&self) -> Result<Option<PostWithVotes>, AppError> {
        let t = self.tables.lock().unwrap();
        Ok(t.posts.values().next_back().map(|p| t.aggregate(p)))
    }

    async fn get_post(&self, id: i32) -> Result<Option<PostWithVotes>, AppError> {
        let t = self.tables.lock().unwrap();
        Ok(t.posts.get(&id).map(|p| t.aggregate(p)))
    }

    async fn posts_by_owner(
        &self,
        owner_id: i32,
        include_drafts: bool,
    ) -> Result<Vec<PostWithVotes>, AppError> {
        let t = self.tables.lock().unwrap();
        Ok(t.posts
            .values()
            .rev()
            .filter(|p| p.owner_id == owner_id && (include_drafts || p.published))
            .map(|p| t.aggregate(p))
            .collect())
    }

    async fn create_post(
        &self,
        actor: &AuthUser,
        req: CreatePostRequest,
    ) -> Result<PostDetail, AppError> {
        let mut t = self.tables.lock().unwrap();
        if !t.users.contains_key(&actor.id) {
            return Err(AppError::not_found(USER_NOT_FOUND));
        }
        t.next_post_id += 1;
        let post = Post {
            id: t.next_post_id,
            title: req.title,
            content: req.content,
            category: req.category,
            location: req.location,
            rating: req.rating,
            published: req.published,
            date: Utc::now(),
            owner_id: actor.id,
        };
        t.posts.insert(post.id, post.clone());
        Ok(t.aggregate(&post).post)
    }

    async fn update_post(
        &self,
        actor: &AuthUser,
        id: i32,
        changes: PostChanges,
    ) -> Result<PostDetail, AppError> {
        let mut t = self.tables.lock().unwrap();
        let post = t
            .posts
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(ITEM_NOT_FOUND))?;
        guard::authorize(actor, &*post)?;
        apply_changes(post, changes);
        let post = post.clone();
        Ok(t.aggregate(&post).post)
    }

    async fn delete_post(&self, actor: &AuthUser, id: i32) -> Result<(), AppError> {
        let mut t = self.tables.lock().unwrap();
        let post = t
            .posts
            .get(&id)
            .ok_or_else(|| AppError::not_found(ITEM_NOT_FOUND))?;
        guard::authorize(actor, post)?;
        t.remove_post(id);
        Ok(())
    }

    async fn cast_vote(
        &self,
        actor: &AuthUser,
        vote: VoteRequest,
    ) -> Result<VoteOutcome, AppError> {
        let mut t = self.tables.lock().unwrap();
        if !t.posts.contains_key(&vote.post_id) {
            return Err(AppError::not_found(POST_NOT_FOUND));
        }
        let pair = (vote.post_id, actor.id);
        let action = votes::reconcile(VoteState::from_exists(t.votes.contains(&pair)), vote.dir)?;
        match action {
            VoteAction::Insert => {
                if !t.users.contains_key(&actor.id) {
                    return Err(AppError::not_found(USER_NOT_FOUND));
                }
                t.votes.insert(pair);
            }
            VoteAction::Delete => {
                t.votes.remove(&pair);
            }
        }
        Ok(action.into())
    }
}

// --- App Scaffolding ---

/// Test configuration: fast bcrypt, default secret and TTL.
pub fn test_config() -> AppConfig {
    AppConfig {
        bcrypt_cost: 4,
        ..AppConfig::default()
    }
}

pub fn test_state(repo: Arc<MemoryRepository>) -> AppState {
    AppState::new(repo, test_config())
}

pub fn test_app(repo: Arc<MemoryRepository>) -> Router {
    create_router(test_state(repo))
}

/// Sends one request through the full router and decodes the JSON body
/// (`Value::Null` for empty bodies).
pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Registers a user and returns the created profile.
pub async fn register(app: &Router, email: &str, username: &str, password: &str) -> Value {
    let (status, body) = send(
        app,
        Method::POST,
        "/users/create",
        None,
        Some(serde_json::json!({ "email": email, "username": username, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "registration failed: {body}");
    body
}

/// Logs in by username and returns the bearer token.
pub async fn login(app: &Router, username: &str, password: &str) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/login",
        None,
        Some(serde_json::json!({ "username": username, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    body["access_token"].as_str().unwrap().to_string()
}

/// Registers and logs in, returning (user id, token).
pub async fn signup(app: &Router, username: &str) -> (i64, String) {
    let user = register(app, &format!("{username}@x.com"), username, "p").await;
    let token = login(app, username, "p").await;
    (user["id"].as_i64().unwrap(), token)
}

/// Creates a post as the token's owner and returns its id.
pub async fn create_post(app: &Router, token: &str, body: Value) -> i64 {
    let (status, post) = send(app, Method::POST, "/posts", Some(token), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "post creation failed: {post}");
    post["id"].as_i64().unwrap()
}
