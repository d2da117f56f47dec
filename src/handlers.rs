use crate::{
    AppState,
    auth::AuthUser,
    error::{AppError, AppResult},
    guard::AuthorizationGuard,
    models::{
        BulkActionRequest, BulkActionResult, CreateNewsRequest, DbId, ErrorResponse, News, Term,
        UpdateNewsRequest, UserProfile,
    },
    sanitizer::ContentSanitizer,
};
use axum::{
    Json,
    extract::{FromRequest, Path, Query, Request, State},
    http::StatusCode,
};
use serde::{Deserialize, de::DeserializeOwned};

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

// --- Extractors ---

/// JsonBody
///
/// `Json<T>` whose rejection is an `AppError`, so a malformed body gets the same
/// 400 `{status, error, message}` answer as any other invalid input.
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(JsonBody(value))
    }
}

// --- Query Structs ---

/// NewsQuery
///
/// Paging and filtering parameters shared by the news listings. `page` is
/// zero-based; `size` is clamped to `1..=100`.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct NewsQuery {
    pub page: Option<u32>,
    pub size: Option<u32>,
    /// Only items tagged with this term. Ignored by the admin listing.
    pub term_id: Option<DbId>,
}

impl NewsQuery {
    /// (limit, offset) for the repository.
    pub fn window(&self) -> (i64, i64) {
        let size = self.size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE) as i64;
        let page = self.page.unwrap_or(0) as i64;
        (size, page * size)
    }
}

fn require_title(title: &str) -> AppResult<()> {
    if title.trim().is_empty() {
        return Err(AppError::InvalidInput("Title must not be blank".to_string()));
    }
    Ok(())
}

// --- Public Handlers ---

/// list_public_news
///
/// [Public Route] Published articles, newest first. The repository applies
/// `published = true` unconditionally.
#[utoipa::path(
    get,
    path = "/api/public/news",
    params(NewsQuery),
    responses(
        (status = 200, description = "Published news", body = [News]),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    )
)]
pub async fn list_public_news(
    State(state): State<AppState>,
    Query(query): Query<NewsQuery>,
) -> AppResult<Json<Vec<News>>> {
    let (limit, offset) = query.window();
    let news = state.repo.find_published(query.term_id, limit, offset).await?;
    Ok(Json(news))
}

/// get_public_news
///
/// [Public Route] A single published article. Drafts answer 404, the same as a
/// missing id, so their existence is not disclosed.
#[utoipa::path(
    get,
    path = "/api/public/news/{id}",
    params(("id" = i64, Path, description = "News ID")),
    responses(
        (status = 200, description = "Found", body = News),
        (status = 404, description = "Not found or not published", body = ErrorResponse)
    )
)]
pub async fn get_public_news(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<News>> {
    state
        .repo
        .find_published_by_id(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("News {id}")))
}

#[utoipa::path(
    get,
    path = "/api/public/terms",
    responses((status = 200, description = "All taxonomy terms", body = [Term]))
)]
pub async fn list_terms(State(state): State<AppState>) -> AppResult<Json<Vec<Term>>> {
    Ok(Json(state.repo.list_terms().await?))
}

// --- Admin Handlers ---

/// get_me
///
/// [Admin Route] The caller's id and resolved roles.
#[utoipa::path(
    get,
    path = "/api/admin/me",
    responses(
        (status = 200, description = "Current principal", body = UserProfile),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    )
)]
pub async fn get_me(AuthUser(principal): AuthUser) -> Json<UserProfile> {
    Json(UserProfile {
        id: principal.id,
        roles: principal.role_names(),
    })
}

/// list_admin_news
///
/// [Admin Route] Admins see every article regardless of status; editors see
/// their own. Any other authenticated principal gets an empty page.
#[utoipa::path(
    get,
    path = "/api/admin/news",
    params(NewsQuery),
    responses((status = 200, description = "Visible news", body = [News]))
)]
pub async fn list_admin_news(
    AuthUser(principal): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<NewsQuery>,
) -> AppResult<Json<Vec<News>>> {
    let (limit, offset) = query.window();

    let news = if AuthorizationGuard::is_admin(&principal) {
        state.repo.find_all(limit, offset).await?
    } else if AuthorizationGuard::is_editor(&principal) {
        state.repo.find_by_author(principal.id, limit, offset).await?
    } else {
        Vec::new()
    };

    Ok(Json(news))
}

#[utoipa::path(
    get,
    path = "/api/admin/news/{id}",
    params(("id" = i64, Path, description = "News ID")),
    responses(
        (status = 200, description = "Found", body = News),
        (status = 403, description = "Not readable", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub async fn get_admin_news(
    AuthUser(principal): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<News>> {
    let item = state
        .repo
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("News {id}")))?;

    if !AuthorizationGuard::can_read(&principal, &item) {
        return Err(AppError::AccessDenied("Not allowed to read this article".to_string()));
    }
    Ok(Json(item))
}

/// create_news
///
/// [Admin Route] Creates an article owned by the caller. The body goes through
/// embed rewriting and the content allow-list; the teaser through the strict one.
#[utoipa::path(
    post,
    path = "/api/admin/news",
    request_body = CreateNewsRequest,
    responses(
        (status = 201, description = "Created", body = News),
        (status = 400, description = "Invalid content", body = ErrorResponse),
        (status = 403, description = "Requires ADMIN or EDITOR", body = ErrorResponse)
    )
)]
pub async fn create_news(
    AuthUser(principal): AuthUser,
    State(state): State<AppState>,
    JsonBody(mut payload): JsonBody<CreateNewsRequest>,
) -> AppResult<(StatusCode, Json<News>)> {
    AuthorizationGuard::require_writer(&principal)?;
    require_title(&payload.title)?;

    payload.body = ContentSanitizer::admin_content().process(&payload.body)?;
    if let Some(teaser) = payload.teaser.take() {
        payload.teaser = Some(ContentSanitizer::strict().process(&teaser)?);
    }

    let news = state.repo.create(payload, principal.id).await?;
    tracing::info!(news = news.id, author = principal.id, "news created");
    Ok((StatusCode::CREATED, Json(news)))
}

/// update_news
///
/// [Admin Route] Partial update. Ownership is checked against the entity fetched
/// by the guard, then only the supplied fields are sanitized and written.
#[utoipa::path(
    put,
    path = "/api/admin/news/{id}",
    params(("id" = i64, Path, description = "News ID")),
    request_body = UpdateNewsRequest,
    responses(
        (status = 200, description = "Updated", body = News),
        (status = 403, description = "Not the author", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub async fn update_news(
    AuthUser(principal): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    JsonBody(mut payload): JsonBody<UpdateNewsRequest>,
) -> AppResult<Json<News>> {
    state.guard().authorize_mutation(&principal, id).await?;

    if let Some(title) = &payload.title {
        require_title(title)?;
    }
    if let Some(body) = payload.body.take() {
        payload.body = Some(ContentSanitizer::admin_content().process(&body)?);
    }
    if let Some(teaser) = payload.teaser.take() {
        payload.teaser = Some(ContentSanitizer::strict().process(&teaser)?);
    }

    let news = state.repo.update(id, payload).await?;
    Ok(Json(news))
}

#[utoipa::path(
    delete,
    path = "/api/admin/news/{id}",
    params(("id" = i64, Path, description = "News ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the author", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
pub async fn delete_news(
    AuthUser(principal): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<StatusCode> {
    state.guard().authorize_mutation(&principal, id).await?;
    state.repo.delete(id).await?;
    tracing::info!(news = id, principal = principal.id, "news deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// bulk_action
///
/// [Admin Route] Applies DELETE or UNPUBLISH to every item the filter selects,
/// in one transaction. Admin only, and the request must carry `confirmed: true`.
#[utoipa::path(
    post,
    path = "/api/admin/news/bulk",
    request_body = BulkActionRequest,
    responses(
        (status = 200, description = "Applied", body = BulkActionResult),
        (status = 400, description = "Unconfirmed, invalid filter or unsupported action", body = ErrorResponse),
        (status = 403, description = "Not an admin", body = ErrorResponse)
    )
)]
pub async fn bulk_action(
    AuthUser(principal): AuthUser,
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<BulkActionRequest>,
) -> AppResult<Json<BulkActionResult>> {
    let result = state.engine().perform(&payload, &principal).await?;
    Ok(Json(result))
}
