#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use news_portal::{
    AppConfig, AppState,
    models::{CreateNewsRequest, DbId, News, Principal, Role, Term, UpdateNewsRequest, User},
    ratelimit::{Quota, RateLimiter},
    repository::{BulkScope, ContentRepository, RepoResult, RepositoryError, RepositoryState},
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// --- IN-MEMORY REPOSITORY ---

// Records every trait call by name so tests can assert which collaborators a
// guard or the bulk engine touched. Bulk scopes stage their changes on a copy
// and only publish them on commit, like a real transaction.
#[derive(Default)]
pub struct MockState {
    pub users: Mutex<HashMap<DbId, User>>,
    pub news: Mutex<BTreeMap<DbId, News>>,
    pub terms: Mutex<Vec<Term>>,
    pub news_terms: Mutex<HashMap<DbId, BTreeSet<DbId>>>,
    pub calls: Mutex<Vec<String>>,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub fail_batches: AtomicBool,
    next_id: AtomicI64,
}

#[derive(Clone, Default)]
pub struct MockRepo(pub Arc<MockState>);

impl MockRepo {
    pub fn new() -> Self {
        let repo = Self::default();
        repo.0.next_id.store(1000, Ordering::SeqCst);
        repo
    }

    pub fn with_user(self, id: DbId, roles: &[&str]) -> Self {
        self.0.users.lock().unwrap().insert(
            id,
            User {
                id,
                username: format!("user{id}"),
                email: format!("user{id}@example.com"),
                active: true,
                roles: roles.iter().map(|r| r.to_string()).collect(),
            },
        );
        self
    }

    pub fn with_news(self, id: DbId, author_id: DbId, published: bool, terms: &[DbId]) -> Self {
        self.0.news.lock().unwrap().insert(id, news(id, author_id, published));
        self.0
            .news_terms
            .lock()
            .unwrap()
            .insert(id, terms.iter().copied().collect());
        self
    }

    pub fn with_term(self, id: DbId, name: &str) -> Self {
        self.0.terms.lock().unwrap().push(Term {
            id,
            name: name.to_string(),
            vocabulary: Some("tags".to_string()),
        });
        self
    }

    pub fn failing_batches(self) -> Self {
        self.0.fail_batches.store(true, Ordering::SeqCst);
        self
    }

    pub fn state(&self) -> RepositoryState {
        Arc::new(self.clone())
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == name).count()
    }

    pub fn clear_calls(&self) {
        self.0.calls.lock().unwrap().clear();
    }

    pub fn news_ids(&self) -> Vec<DbId> {
        self.0.news.lock().unwrap().keys().copied().collect()
    }

    pub fn get(&self, id: DbId) -> Option<News> {
        self.0.news.lock().unwrap().get(&id).cloned()
    }

    pub fn commits(&self) -> usize {
        self.0.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.0.rollbacks.load(Ordering::SeqCst)
    }

    fn record(&self, name: &str) {
        self.0.calls.lock().unwrap().push(name.to_string());
    }
}

#[async_trait]
impl ContentRepository for MockRepo {
    async fn find_user(&self, id: DbId) -> RepoResult<Option<User>> {
        self.record("find_user");
        Ok(self.0.users.lock().unwrap().get(&id).filter(|u| u.active).cloned())
    }

    async fn find_by_id(&self, id: DbId) -> RepoResult<Option<News>> {
        self.record("find_by_id");
        Ok(self.get(id))
    }

    async fn exists_by_id_and_author(&self, id: DbId, author_id: DbId) -> RepoResult<bool> {
        self.record("exists_by_id_and_author");
        Ok(self.get(id).is_some_and(|n| n.author_id == author_id))
    }

    async fn find_published(&self, term_id: Option<DbId>, limit: i64, offset: i64) -> RepoResult<Vec<News>> {
        self.record("find_published");
        let links = self.0.news_terms.lock().unwrap().clone();
        Ok(self
            .0
            .news
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.published)
            .filter(|n| term_id.is_none_or(|t| links.get(&n.id).is_some_and(|s| s.contains(&t))))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_published_by_id(&self, id: DbId) -> RepoResult<Option<News>> {
        self.record("find_published_by_id");
        Ok(self.get(id).filter(|n| n.published))
    }

    async fn find_all(&self, limit: i64, offset: i64) -> RepoResult<Vec<News>> {
        self.record("find_all");
        Ok(self
            .0
            .news
            .lock()
            .unwrap()
            .values()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_by_author(&self, author_id: DbId, limit: i64, offset: i64) -> RepoResult<Vec<News>> {
        self.record("find_by_author");
        Ok(self
            .0
            .news
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.author_id == author_id)
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn list_terms(&self) -> RepoResult<Vec<Term>> {
        self.record("list_terms");
        Ok(self.0.terms.lock().unwrap().clone())
    }

    async fn create(&self, req: CreateNewsRequest, author_id: DbId) -> RepoResult<News> {
        self.record("create");
        let id = self.0.next_id.fetch_add(1, Ordering::SeqCst);
        let mut item = news(id, author_id, req.published);
        item.title = req.title;
        item.teaser = req.teaser;
        item.body = req.body;
        self.0.news.lock().unwrap().insert(id, item.clone());
        self.0
            .news_terms
            .lock()
            .unwrap()
            .insert(id, req.term_ids.into_iter().collect());
        Ok(item)
    }

    async fn update(&self, id: DbId, req: UpdateNewsRequest) -> RepoResult<News> {
        self.record("update");
        let mut news = self.0.news.lock().unwrap();
        let item = news
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("News {id}")))?;
        if let Some(title) = req.title {
            item.title = title;
        }
        if let Some(teaser) = req.teaser {
            item.teaser = Some(teaser);
        }
        if let Some(body) = req.body {
            item.body = body;
        }
        if let Some(published) = req.published {
            item.published = published;
        }
        Ok(item.clone())
    }

    async fn delete(&self, id: DbId) -> RepoResult<()> {
        self.record("delete");
        self.0
            .news
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("News {id}")))
    }

    async fn begin_bulk(&self) -> RepoResult<Box<dyn BulkScope>> {
        self.record("begin_bulk");
        let staged = self.0.news.lock().unwrap().clone();
        Ok(Box::new(MockScope {
            repo: self.clone(),
            staged,
            committed: false,
        }))
    }
}

pub struct MockScope {
    repo: MockRepo,
    staged: BTreeMap<DbId, News>,
    committed: bool,
}

impl MockScope {
    fn fail_if_configured(&self) -> RepoResult<()> {
        if self.repo.0.fail_batches.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl BulkScope for MockScope {
    async fn ids_by_term(&mut self, term_id: DbId) -> RepoResult<Vec<DbId>> {
        self.repo.record("ids_by_term");
        let links = self.repo.0.news_terms.lock().unwrap().clone();
        Ok(self
            .staged
            .keys()
            .copied()
            .filter(|id| links.get(id).is_some_and(|s| s.contains(&term_id)))
            .collect())
    }

    async fn ids_by_author(&mut self, author_id: DbId) -> RepoResult<Vec<DbId>> {
        self.repo.record("ids_by_author");
        Ok(self
            .staged
            .values()
            .filter(|n| n.author_id == author_id)
            .map(|n| n.id)
            .collect())
    }

    async fn all_ids(&mut self) -> RepoResult<Vec<DbId>> {
        self.repo.record("all_ids");
        Ok(self.staged.keys().copied().collect())
    }

    async fn delete_batch(&mut self, ids: &[DbId]) -> RepoResult<u64> {
        self.repo.record(&format!("delete_batch:{ids:?}"));
        self.fail_if_configured()?;
        Ok(ids.iter().filter(|id| self.staged.remove(*id).is_some()).count() as u64)
    }

    async fn unpublish_batch(&mut self, ids: &[DbId]) -> RepoResult<u64> {
        self.repo.record(&format!("unpublish_batch:{ids:?}"));
        self.fail_if_configured()?;
        let mut changed = 0;
        for id in ids {
            if let Some(item) = self.staged.get_mut(id) {
                if item.published {
                    item.published = false;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn commit(mut self: Box<Self>) -> RepoResult<()> {
        self.repo.record("commit");
        let staged = std::mem::take(&mut self.staged);
        *self.repo.0.news.lock().unwrap() = staged;
        self.repo.0.commits.fetch_add(1, Ordering::SeqCst);
        self.committed = true;
        Ok(())
    }
}

impl Drop for MockScope {
    fn drop(&mut self) {
        if !self.committed {
            self.repo.0.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// --- FIXTURES ---

pub fn news(id: DbId, author_id: DbId, published: bool) -> News {
    News {
        id,
        title: format!("Article {id}"),
        teaser: None,
        body: "<p>body</p>".to_string(),
        published,
        author_id,
        publication_date: published.then(Utc::now),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn admin(id: DbId) -> Principal {
    Principal::authenticated(id, [Role::Admin])
}

pub fn editor(id: DbId) -> Principal {
    Principal::authenticated(id, [Role::Editor])
}

/// Authenticated, but holding no role the guard layer recognises.
pub fn reader(id: DbId) -> Principal {
    Principal::from_role_names(id, ["SUBSCRIBER"])
}

pub fn create_test_state(repo: &MockRepo) -> AppState {
    create_test_state_with_quotas(repo, Quota::PUBLIC, Quota::ADMIN)
}

pub fn create_test_state_with_quotas(repo: &MockRepo, public: Quota, admin: Quota) -> AppState {
    let config = AppConfig::default();
    AppState {
        repo: repo.state(),
        limiter: Arc::new(RateLimiter::new(public, admin, config.rate_limit.admin_prefix.clone())),
        config,
    }
}
