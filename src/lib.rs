use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Credential Service: password hashing and session tokens.
pub mod credentials;
// Identity Resolver: the `AuthUser` extractor.
pub mod auth;
// Ownership Guard.
pub mod guard;
// Vote Reconciler.
pub mod votes;
// Post/User Aggregate Store.
pub mod repository;

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod models;

pub mod routes;
use auth::AuthUser;
use routes::{authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use credentials::{CredentialState, Credentials};
pub use error::AppError;
pub use repository::{PostgresRepository, Repository, RepositoryState};

/// ApiDoc
///
/// Auto-generated OpenAPI document, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::login, handlers::register_user, handlers::get_profile,
        handlers::get_profile_posts, handlers::update_profile, handlers::change_password,
        handlers::delete_account, handlers::get_user, handlers::get_user_posts,
        handlers::get_posts, handlers::get_latest_post, handlers::get_post,
        handlers::create_post, handlers::update_post, handlers::delete_post, handlers::vote
    ),
    components(
        schemas(
            models::Post, models::Vote, models::Owner, models::PostDetail, models::PostWithVotes,
            models::UserResponse, models::UpdateUserResponse, models::Token,
            models::VoteResponse, models::CreateUserRequest, models::LoginRequest,
            models::PasswordChange, models::CreatePostRequest, models::VoteRequest,
            models::UserPatch, models::PostPatch, error::ErrorBody,
        )
    ),
    tags(
        (name = "blog-api", description = "Blog posts with per-user voting")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single shared container of request-independent services. Handlers pull the
/// pieces they need through `FromRef`; nothing here is a global.
#[derive(Clone)]
pub struct AppState {
    /// Aggregate store, wrapping the `PgPool`.
    pub repo: RepositoryState,
    /// Token signing/validation, read-only after startup.
    pub credentials: CredentialState,
    /// The loaded, immutable configuration.
    pub config: AppConfig,
}

impl AppState {
    /// Builds the state with credentials derived from `config`.
    pub fn new(repo: RepositoryState, config: AppConfig) -> Self {
        let credentials = std::sync::Arc::new(Credentials::from_config(&config));
        Self {
            repo,
            credentials,
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for CredentialState {
    fn from_ref(app_state: &AppState) -> CredentialState {
        app_state.credentials.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Rejects the request with 401 before any handler runs unless `AuthUser` resolves.
/// The resolved identity is stored in the request extensions, where the handler's
/// `AuthUser` extractor picks it up without a second lookup.
async fn auth_middleware(auth_user: AuthUser, mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(auth_user);
    next.run(request).await
}

/// create_router
///
/// Assembles routing, the authentication layer, observability layers and state.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// One span per request, correlated by the generated `x-request-id`.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
