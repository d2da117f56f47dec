//! Filter-resolved batch mutations.
//!
//! A bulk request moves through role check, confirmation check, filter
//! resolution and action application in that order. The checks, including the
//! action's validity, run before any repository call; resolution and
//! application share one transaction.

use crate::{
    error::{AppError, AppResult},
    guard::AuthorizationGuard,
    models::{BulkAction, BulkActionRequest, BulkActionResult, DbId, FilterType, Principal},
    repository::{BulkScope, RepoResult, RepositoryState},
};

/// Target
///
/// A validated filter: only the field matching the filter type survives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Ids(Vec<DbId>),
    Term(DbId),
    Author(DbId),
    All,
}

impl Target {
    /// Picks the field that matches `filter_type`. Absent ids for `BY_IDS` mean an
    /// empty selection; absent ids for `BY_TERM`/`BY_AUTHOR` are invalid.
    pub fn from_request(request: &BulkActionRequest) -> AppResult<Self> {
        match &request.filter_type {
            FilterType::ByIds => Ok(Target::Ids(
                request
                    .item_ids
                    .as_ref()
                    .map(|ids| ids.iter().copied().collect())
                    .unwrap_or_default(),
            )),
            FilterType::ByTerm => request
                .term_id
                .map(Target::Term)
                .ok_or_else(|| AppError::InvalidInput("termId is required for BY_TERM".to_string())),
            FilterType::ByAuthor => request
                .author_id
                .map(Target::Author)
                .ok_or_else(|| AppError::InvalidInput("authorId is required for BY_AUTHOR".to_string())),
            FilterType::All => Ok(Target::All),
            FilterType::Unknown(raw) => Err(AppError::InvalidInput(format!("Unknown filter type: {raw}"))),
        }
    }

    async fn resolve(self, scope: &mut dyn BulkScope) -> RepoResult<Vec<DbId>> {
        match self {
            Target::Ids(ids) => Ok(ids),
            Target::Term(term_id) => scope.ids_by_term(term_id).await,
            Target::Author(author_id) => scope.ids_by_author(author_id).await,
            Target::All => scope.all_ids().await,
        }
    }
}

/// The actions the engine can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mutation {
    Delete,
    Unpublish,
}

impl Mutation {
    fn from_action(action: &BulkAction) -> AppResult<Self> {
        match action {
            BulkAction::Delete => Ok(Mutation::Delete),
            BulkAction::Unpublish => Ok(Mutation::Unpublish),
            BulkAction::Unsupported(raw) => Err(AppError::UnsupportedOperation(format!(
                "Unsupported bulk action: {raw}"
            ))),
        }
    }
}

/// BulkOperationEngine
///
/// Bulk operations are admin-only: editors are refused even when every target is
/// their own, which is stricter than the single-item path.
#[derive(Clone)]
pub struct BulkOperationEngine {
    repo: RepositoryState,
}

impl BulkOperationEngine {
    pub fn new(repo: RepositoryState) -> Self {
        Self { repo }
    }

    pub async fn perform(&self, request: &BulkActionRequest, principal: &Principal) -> AppResult<BulkActionResult> {
        if !AuthorizationGuard::is_admin(principal) {
            return Err(AppError::AccessDenied(
                "Bulk operations are restricted to ADMIN role only".to_string(),
            ));
        }

        if !request.confirmed {
            return Err(AppError::InvalidInput("Bulk operation must be confirmed".to_string()));
        }

        let target = Target::from_request(request)?;
        let mutation = Mutation::from_action(&request.action)?;

        let mut scope = self.repo.begin_bulk().await?;
        let ids = target.resolve(scope.as_mut()).await?;

        if ids.is_empty() {
            // Nothing to mutate; dropping the scope rolls back the read.
            return Ok(BulkActionResult { affected_count: 0 });
        }

        let rows = match mutation {
            Mutation::Delete => scope.delete_batch(&ids).await?,
            Mutation::Unpublish => scope.unpublish_batch(&ids).await?,
        };

        scope.commit().await?;

        tracing::info!(
            principal = principal.id,
            action = ?request.action,
            resolved = ids.len(),
            rows,
            "bulk action applied"
        );

        Ok(BulkActionResult {
            affected_count: ids.len(),
        })
    }
}
