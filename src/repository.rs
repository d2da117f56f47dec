use crate::models::{CreateNewsRequest, DbId, News, Term, UpdateNewsRequest, User};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction, query_builder::QueryBuilder};
use std::sync::Arc;
use thiserror::Error;

/// RepositoryError
///
/// Failures surfaced by the persistence collaborator. `NotFound` passes through
/// the guard layer unchanged; `Database` becomes an opaque 500.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// ContentRepository Trait
///
/// The persistence contract consumed by the guard layer and the handlers.
/// Handlers and guards only ever see `Arc<dyn ContentRepository>`, so tests swap
/// in an in-memory implementation.
///
/// **Send + Sync + async_trait** are required to make the trait object shareable
/// across Axum's task boundaries.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    // --- Identity ---
    /// Loads a user with the names of all assigned roles.
    async fn find_user(&self, id: DbId) -> RepoResult<Option<User>>;

    // --- Content Retrieval ---
    async fn find_by_id(&self, id: DbId) -> RepoResult<Option<News>>;
    async fn exists_by_id_and_author(&self, id: DbId, author_id: DbId) -> RepoResult<bool>;
    /// Public listing. Must enforce `published = true`.
    async fn find_published(&self, term_id: Option<DbId>, limit: i64, offset: i64) -> RepoResult<Vec<News>>;
    async fn find_published_by_id(&self, id: DbId) -> RepoResult<Option<News>>;
    /// Admin listing: every item regardless of status.
    async fn find_all(&self, limit: i64, offset: i64) -> RepoResult<Vec<News>>;
    async fn find_by_author(&self, author_id: DbId, limit: i64, offset: i64) -> RepoResult<Vec<News>>;
    async fn list_terms(&self) -> RepoResult<Vec<Term>>;

    // --- Single-Item Writes ---
    // Callers run the authorization guard first; these do no ownership filtering.
    async fn create(&self, req: CreateNewsRequest, author_id: DbId) -> RepoResult<News>;
    async fn update(&self, id: DbId, req: UpdateNewsRequest) -> RepoResult<News>;
    async fn delete(&self, id: DbId) -> RepoResult<()>;

    // --- Bulk ---
    /// Opens a transactional scope for one bulk operation. Filter resolution and
    /// the batch mutation both go through the scope; nothing is visible to other
    /// transactions until `commit`, and dropping the scope rolls back.
    async fn begin_bulk(&self) -> RepoResult<Box<dyn BulkScope>>;
}

/// BulkScope
///
/// One unit of work for the bulk operation engine.
#[async_trait]
pub trait BulkScope: Send {
    async fn ids_by_term(&mut self, term_id: DbId) -> RepoResult<Vec<DbId>>;
    async fn ids_by_author(&mut self, author_id: DbId) -> RepoResult<Vec<DbId>>;
    async fn all_ids(&mut self) -> RepoResult<Vec<DbId>>;
    /// Deletes every listed item in a single statement. Returns rows affected.
    async fn delete_batch(&mut self, ids: &[DbId]) -> RepoResult<u64>;
    /// Sets `published = false` on every listed item in a single statement.
    async fn unpublish_batch(&mut self, ids: &[DbId]) -> RepoResult<u64>;
    async fn commit(self: Box<Self>) -> RepoResult<()>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn ContentRepository>;

const NEWS_COLUMNS: &str = "id, title, teaser, body, published, author_id, publication_date, created_at, updated_at";

/// PostgresRepository
///
/// `ContentRepository` backed by PostgreSQL. Schema: `migrations/`.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContentRepository for PostgresRepository {
    async fn find_user(&self, id: DbId) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.username, u.email, u.active,
                   COALESCE(array_agg(r.name::text) FILTER (WHERE r.name IS NOT NULL), '{}'::text[]) AS roles
            FROM users u
            LEFT JOIN user_roles ur ON ur.user_id = u.id
            LEFT JOIN roles r ON r.id = ur.role_id
            WHERE u.id = $1 AND u.active = true
            GROUP BY u.id
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: DbId) -> RepoResult<Option<News>> {
        let news = sqlx::query_as::<_, News>(&format!("SELECT {NEWS_COLUMNS} FROM content WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(news)
    }

    async fn exists_by_id_and_author(&self, id: DbId, author_id: DbId) -> RepoResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM content WHERE id = $1 AND author_id = $2)",
        )
        .bind(id)
        .bind(author_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// find_published
    ///
    /// Uses QueryBuilder so the optional term filter stays parameterized.
    /// **Security**: `WHERE published = true` is part of the base query.
    async fn find_published(&self, term_id: Option<DbId>, limit: i64, offset: i64) -> RepoResult<Vec<News>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {NEWS_COLUMNS} FROM content c WHERE c.published = true"
        ));

        if let Some(term_id) = term_id {
            builder.push(" AND EXISTS (SELECT 1 FROM content_terms ct WHERE ct.content_id = c.id AND ct.term_id = ");
            builder.push_bind(term_id);
            builder.push(")");
        }

        builder.push(" ORDER BY c.publication_date DESC NULLS LAST, c.id DESC LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        let news = builder.build_query_as::<News>().fetch_all(&self.pool).await?;
        Ok(news)
    }

    async fn find_published_by_id(&self, id: DbId) -> RepoResult<Option<News>> {
        let news = sqlx::query_as::<_, News>(&format!(
            "SELECT {NEWS_COLUMNS} FROM content WHERE id = $1 AND published = true"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(news)
    }

    async fn find_all(&self, limit: i64, offset: i64) -> RepoResult<Vec<News>> {
        let news = sqlx::query_as::<_, News>(&format!(
            "SELECT {NEWS_COLUMNS} FROM content ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(news)
    }

    async fn find_by_author(&self, author_id: DbId, limit: i64, offset: i64) -> RepoResult<Vec<News>> {
        let news = sqlx::query_as::<_, News>(&format!(
            "SELECT {NEWS_COLUMNS} FROM content WHERE author_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(author_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(news)
    }

    async fn list_terms(&self) -> RepoResult<Vec<Term>> {
        let terms = sqlx::query_as::<_, Term>("SELECT id, name, vocabulary FROM terms ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(terms)
    }

    /// create
    ///
    /// Inserts the article and its term links in one transaction. Unknown term ids
    /// abort the insert with `NotFound`.
    async fn create(&self, req: CreateNewsRequest, author_id: DbId) -> RepoResult<News> {
        let mut tx = self.pool.begin().await?;

        let mut term_ids = req.term_ids.clone();
        term_ids.sort_unstable();
        term_ids.dedup();

        if !term_ids.is_empty() {
            let known = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM terms WHERE id = ANY($1)")
                .bind(&term_ids)
                .fetch_one(&mut *tx)
                .await?;
            if known != term_ids.len() as i64 {
                return Err(RepositoryError::NotFound("Term".to_string()));
            }
        }

        let news = sqlx::query_as::<_, News>(&format!(
            r#"
            INSERT INTO content (title, teaser, body, published, author_id, publication_date, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, CASE WHEN $4 THEN NOW() ELSE NULL END, NOW(), NOW())
            RETURNING {NEWS_COLUMNS}
            "#
        ))
        .bind(&req.title)
        .bind(&req.teaser)
        .bind(&req.body)
        .bind(req.published)
        .bind(author_id)
        .fetch_one(&mut *tx)
        .await?;

        if !term_ids.is_empty() {
            sqlx::query("INSERT INTO content_terms (content_id, term_id) SELECT $1, UNNEST($2::bigint[])")
                .bind(news.id)
                .bind(&term_ids)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(news)
    }

    /// update
    ///
    /// COALESCE keeps columns whose request field is `None`. The publication date
    /// is stamped the first time an article becomes published.
    async fn update(&self, id: DbId, req: UpdateNewsRequest) -> RepoResult<News> {
        sqlx::query_as::<_, News>(&format!(
            r#"
            UPDATE content
            SET title = COALESCE($2, title),
                teaser = COALESCE($3, teaser),
                body = COALESCE($4, body),
                published = COALESCE($5, published),
                publication_date = CASE
                    WHEN COALESCE($5, published) AND publication_date IS NULL THEN NOW()
                    ELSE publication_date
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {NEWS_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(req.title)
        .bind(req.teaser)
        .bind(req.body)
        .bind(req.published)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("News {id}")))
    }

    async fn delete(&self, id: DbId) -> RepoResult<()> {
        let res = sqlx::query("DELETE FROM content WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("News {id}")));
        }
        Ok(())
    }

    async fn begin_bulk(&self) -> RepoResult<Box<dyn BulkScope>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresBulkScope { tx }))
    }
}

/// PostgresBulkScope
///
/// Resolution queries take `FOR UPDATE` row locks, so no concurrent writer can
/// change the resolved rows before the batch statement runs in the same transaction.
pub struct PostgresBulkScope {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BulkScope for PostgresBulkScope {
    async fn ids_by_term(&mut self, term_id: DbId) -> RepoResult<Vec<DbId>> {
        let ids = sqlx::query_scalar::<_, DbId>(
            r#"
            SELECT c.id FROM content c
            WHERE EXISTS (SELECT 1 FROM content_terms ct WHERE ct.content_id = c.id AND ct.term_id = $1)
            ORDER BY c.id
            FOR UPDATE
            "#,
        )
        .bind(term_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids)
    }

    async fn ids_by_author(&mut self, author_id: DbId) -> RepoResult<Vec<DbId>> {
        let ids = sqlx::query_scalar::<_, DbId>(
            "SELECT id FROM content WHERE author_id = $1 ORDER BY id FOR UPDATE",
        )
        .bind(author_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids)
    }

    async fn all_ids(&mut self) -> RepoResult<Vec<DbId>> {
        let ids = sqlx::query_scalar::<_, DbId>("SELECT id FROM content ORDER BY id FOR UPDATE")
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(ids)
    }

    async fn delete_batch(&mut self, ids: &[DbId]) -> RepoResult<u64> {
        let res = sqlx::query("DELETE FROM content WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(res.rows_affected())
    }

    async fn unpublish_batch(&mut self, ids: &[DbId]) -> RepoResult<u64> {
        let res = sqlx::query(
            "UPDATE content SET published = false, updated_at = NOW() WHERE id = ANY($1) AND published = true",
        )
        .bind(ids)
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected())
    }

    async fn commit(self: Box<Self>) -> RepoResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
