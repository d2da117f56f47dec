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

// Guard layer: per-item authorization, bulk mutations, throttling, content filtering.
pub mod bulk;
pub mod guard;
pub mod ratelimit;
pub mod sanitizer;

// Application services around it.
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repository;

pub mod routes;
use auth::AuthUser;
use routes::{admin, public};

// --- Public Re-exports ---

pub use bulk::BulkOperationEngine;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use guard::AuthorizationGuard;
pub use ratelimit::{RateLimiter, RateLimiterState};
pub use repository::{PostgresRepository, RepositoryState};

/// ApiDoc
///
/// OpenAPI document for every `#[utoipa::path]` handler, served at
/// `/api-docs/openapi.json` and browsable at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_public_news, handlers::get_public_news, handlers::list_terms,
        handlers::get_me, handlers::list_admin_news, handlers::get_admin_news,
        handlers::create_news, handlers::update_news, handlers::delete_news,
        handlers::bulk_action
    ),
    components(
        schemas(
            models::News, models::Term, models::CreateNewsRequest, models::UpdateNewsRequest,
            models::BulkActionRequest, models::BulkActionResult, models::UserProfile,
            models::ErrorResponse,
        )
    ),
    tags(
        (name = "news-portal", description = "News CMS API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single shared state of the application. Everything inside is either
/// immutable or internally synchronized, so cloning per request is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Persistence collaborator.
    pub repo: RepositoryState,
    /// Per-client token buckets. Shared with the background sweeper.
    pub limiter: RateLimiterState,
    pub config: AppConfig,
}

impl AppState {
    pub fn guard(&self) -> AuthorizationGuard {
        AuthorizationGuard::new(self.repo.clone())
    }

    pub fn engine(&self) -> BulkOperationEngine {
        BulkOperationEngine::new(self.repo.clone())
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for RateLimiterState {
    fn from_ref(app_state: &AppState) -> RateLimiterState {
        app_state.limiter.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Authentication gate for the admin router. A failed `AuthUser` extraction
/// rejects with 401 before the handler runs; on success the principal is stored
/// in the request extensions so the handler's own `AuthUser` does not repeat the
/// lookup.
async fn auth_middleware(auth_user: AuthUser, mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(auth_user);
    next.run(request).await
}

/// create_router
///
/// Assembles the routes, the authentication and rate-limit layers, and the
/// observability stack.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .nest(
            "/api/admin",
            admin::admin_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        .with_state(state.clone());

    // 3. Throttling wraps the whole router: it runs before authentication and
    // sees the full request path.
    let throttled = base_router.layer(middleware::from_fn_with_state(
        state.limiter.clone(),
        ratelimit::rate_limit_middleware,
    ));

    // 4. Observability and Correlation Layers
    throttled
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
/// Span for one HTTP exchange, correlated by the generated `x-request-id`.
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
