/// Router Module Index
///
/// Routing is split by audience. Each module returns an un-stated
/// `Router<AppState>`; layers are attached in `create_router`.

/// Anonymous, read-only routes. Handlers only ever return published content.
pub mod public;

/// Routes under `/api/admin`, wrapped in the authentication layer. Per-item and
/// role checks run inside the handlers through `AuthorizationGuard`.
pub mod admin;
