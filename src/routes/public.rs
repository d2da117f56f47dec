use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Public Router Module
///
/// Endpoints reachable without credentials. They are still charged against the
/// public rate-limit quota like every other route.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers.
        .route("/health", get(|| async { "ok" }))
        // GET /api/public/news?page=&size=&termId=
        .route("/api/public/news", get(handlers::list_public_news))
        // GET /api/public/news/{id}
        // Drafts are indistinguishable from missing ids here.
        .route("/api/public/news/{id}", get(handlers::get_public_news))
        .route("/api/public/terms", get(handlers::list_terms))
}
