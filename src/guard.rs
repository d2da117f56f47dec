//! Per-item authorization.
//!
//! Handlers call these checks explicitly as their first step; nothing is
//! enforced implicitly by routing.

use crate::{
    error::{AppError, AppResult},
    models::{DbId, News, Principal, Role},
    repository::RepositoryState,
};

/// AuthorizationGuard
///
/// Answers read/mutate eligibility for a content item. Stateless apart from the
/// injected repository, so it is cheap to clone per request.
#[derive(Clone)]
pub struct AuthorizationGuard {
    repo: RepositoryState,
}

impl AuthorizationGuard {
    pub fn new(repo: RepositoryState) -> Self {
        Self { repo }
    }

    pub fn is_admin(principal: &Principal) -> bool {
        principal.has_role(Role::Admin)
    }

    pub fn is_editor(principal: &Principal) -> bool {
        principal.has_role(Role::Editor)
    }

    /// is_author_of
    ///
    /// Delegates to `exists_by_id_and_author`. Unauthenticated principals and
    /// absent ids are never authors, and never reach the repository.
    pub async fn is_author_of(&self, principal: &Principal, item_id: Option<DbId>) -> AppResult<bool> {
        let Some(item_id) = item_id else {
            return Ok(false);
        };
        if !principal.is_authenticated {
            return Ok(false);
        }
        Ok(self.repo.exists_by_id_and_author(item_id, principal.id).await?)
    }

    /// Any authenticated principal may read through the admin-facing path.
    pub fn can_read(principal: &Principal, _item: &News) -> bool {
        principal.is_authenticated
    }

    /// can_mutate
    ///
    /// `admin || (editor && author)`. Admins and principals without a writing role
    /// are decided without touching the repository.
    pub async fn can_mutate(&self, principal: &Principal, item_id: DbId) -> AppResult<bool> {
        if Self::is_admin(principal) {
            return Ok(true);
        }
        if Self::is_editor(principal) {
            return self.is_author_of(principal, Some(item_id)).await;
        }
        Ok(false)
    }

    /// Same rule as `can_mutate`, evaluated against an entity the caller has
    /// already fetched.
    pub fn can_mutate_item(principal: &Principal, item: &News) -> bool {
        Self::is_admin(principal)
            || (Self::is_editor(principal) && principal.id == item.author_id)
    }

    /// Principals allowed to author content at all (admins and editors).
    pub fn require_writer(principal: &Principal) -> AppResult<()> {
        if Self::is_admin(principal) || Self::is_editor(principal) {
            Ok(())
        } else {
            Err(AppError::AccessDenied("Requires ADMIN or EDITOR role".to_string()))
        }
    }

    /// authorize_mutation
    ///
    /// Fetches the item once and checks ownership against that fetched entity, so
    /// the subsequent mutation needs no second lookup. A principal with no writing
    /// role is denied before any repository call.
    pub async fn authorize_mutation(&self, principal: &Principal, item_id: DbId) -> AppResult<News> {
        Self::require_writer(principal)?;

        let item = self
            .repo
            .find_by_id(item_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("News {item_id}")))?;

        if !Self::can_mutate_item(principal, &item) {
            tracing::debug!(principal = principal.id, item = item_id, "mutation denied: not the author");
            return Err(AppError::AccessDenied(
                "You are not the author of this article".to_string(),
            ));
        }

        Ok(item)
    }
}
