use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Admin Router Module
///
/// Nested under `/api/admin`, which is also the prefix that selects the admin
/// rate-limit quota.
///
/// Access Control:
/// `create_router` wraps this router in the authentication layer, so every
/// handler here runs with a resolved `Principal`. Role and ownership decisions
/// are made inside the handlers by `AuthorizationGuard` and
/// `BulkOperationEngine`, never by routing alone.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /me
        .route("/me", get(handlers::get_me))
        // GET/POST /news
        // Listing is scoped by role; creation requires ADMIN or EDITOR.
        .route("/news", get(handlers::list_admin_news).post(handlers::create_news))
        // POST /news/bulk
        // Static segment, so it takes precedence over `/news/{id}`.
        .route("/news/bulk", post(handlers::bulk_action))
        // GET/PUT/DELETE /news/{id}
        // Mutations fetch the item once and check ownership on that entity.
        .route(
            "/news/{id}",
            get(handlers::get_admin_news)
                .put(handlers::update_news)
                .delete(handlers::delete_news),
        )
}
