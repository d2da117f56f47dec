use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;

/// Primary key type shared by every table (`BIGSERIAL`).
pub type DbId = i64;

// --- Identity ---

/// Role
///
/// The closed set of roles the guard layer reasons about. Role names arrive as
/// strings from the `roles` table (optionally carrying the legacy `ROLE_` prefix)
/// and are translated here, at the boundary, so that guard logic can match
/// exhaustively instead of comparing strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Editor,
}

impl Role {
    const LEGACY_PREFIX: &'static str = "ROLE_";

    /// Parses an external role name. Unknown names yield `None` and therefore
    /// grant nothing.
    pub fn from_name(name: &str) -> Option<Role> {
        let name = name.trim();
        let name = name.strip_prefix(Self::LEGACY_PREFIX).unwrap_or(name);
        match name.to_ascii_uppercase().as_str() {
            "ADMIN" => Some(Role::Admin),
            "EDITOR" => Some(Role::Editor),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Editor => "EDITOR",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Principal
///
/// The acting identity for one request, produced by the authentication layer
/// (`auth::AuthUser`). Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: DbId,
    pub roles: HashSet<Role>,
    pub is_authenticated: bool,
}

impl Principal {
    pub fn authenticated(id: DbId, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            id,
            roles: roles.into_iter().collect(),
            is_authenticated: true,
        }
    }

    /// Builds an authenticated principal from raw role names, dropping any name
    /// that does not map to a known `Role`.
    pub fn from_role_names<'a>(id: DbId, names: impl IntoIterator<Item = &'a str>) -> Self {
        Self::authenticated(id, names.into_iter().filter_map(Role::from_name))
    }

    pub fn anonymous() -> Self {
        Self {
            id: 0,
            roles: HashSet::new(),
            is_authenticated: false,
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.is_authenticated && self.roles.contains(&role)
    }

    /// Role names in a stable order, for responses and logs.
    pub fn role_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.roles.iter().map(|r| r.as_str().to_string()).collect();
        names.sort();
        names
    }
}

/// User
///
/// A row from `users`, with the role names aggregated from `user_roles`/`roles`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct User {
    pub id: DbId,
    pub username: String,
    pub email: String,
    pub active: bool,
    pub roles: Vec<String>,
}

impl User {
    pub fn to_principal(&self) -> Principal {
        Principal::from_role_names(self.id, self.roles.iter().map(String::as_str))
    }
}

// --- Content ---

/// News
///
/// A news article from the `content` table. This is the protected resource of the
/// guard layer: ownership is decided by `author_id`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct News {
    pub id: DbId,
    pub title: String,
    pub teaser: Option<String>,
    pub body: String,
    pub published: bool,
    pub author_id: DbId,
    #[ts(type = "string | null")]
    pub publication_date: Option<DateTime<Utc>>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// Term
///
/// A taxonomy term (category/tag) from the `terms` table.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Term {
    pub id: DbId,
    pub name: String,
    pub vocabulary: Option<String>,
}

// --- Request Payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateNewsRequest {
    pub title: String,
    #[serde(default)]
    pub teaser: Option<String>,
    pub body: String,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub term_ids: Vec<DbId>,
}

/// UpdateNewsRequest
///
/// Partial update; only `Some` fields are written.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateNewsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teaser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
}

// --- Bulk Operations ---

/// BulkAction
///
/// The mutation a bulk request applies. Unrecognised wire values are kept as
/// `Unsupported` so the engine can reject them at the action step rather than
/// at deserialization time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BulkAction {
    Delete,
    Unpublish,
    Unsupported(String),
}

impl From<String> for BulkAction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "DELETE" => BulkAction::Delete,
            "UNPUBLISH" => BulkAction::Unpublish,
            _ => BulkAction::Unsupported(value),
        }
    }
}

impl From<BulkAction> for String {
    fn from(value: BulkAction) -> Self {
        match value {
            BulkAction::Delete => "DELETE".to_string(),
            BulkAction::Unpublish => "UNPUBLISH".to_string(),
            BulkAction::Unsupported(raw) => raw,
        }
    }
}

/// FilterType
///
/// How a bulk request selects its targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterType {
    ByIds,
    ByTerm,
    ByAuthor,
    All,
    Unknown(String),
}

impl From<String> for FilterType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "BY_IDS" => FilterType::ByIds,
            "BY_TERM" => FilterType::ByTerm,
            "BY_AUTHOR" => FilterType::ByAuthor,
            "ALL" => FilterType::All,
            _ => FilterType::Unknown(value),
        }
    }
}

impl From<FilterType> for String {
    fn from(value: FilterType) -> Self {
        match value {
            FilterType::ByIds => "BY_IDS".to_string(),
            FilterType::ByTerm => "BY_TERM".to_string(),
            FilterType::ByAuthor => "BY_AUTHOR".to_string(),
            FilterType::All => "ALL".to_string(),
            FilterType::Unknown(raw) => raw,
        }
    }
}

/// BulkActionRequest
///
/// Only the field matching `filter_type` is read; the others are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkActionRequest {
    #[schema(value_type = String, example = "UNPUBLISH")]
    pub action: BulkAction,
    #[schema(value_type = String, example = "BY_IDS")]
    pub filter_type: FilterType,
    #[serde(default)]
    pub item_ids: Option<BTreeSet<DbId>>,
    #[serde(default)]
    pub term_id: Option<DbId>,
    #[serde(default)]
    pub author_id: Option<DbId>,
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BulkActionResult {
    pub affected_count: usize,
}

// --- Responses ---

/// UserProfile
///
/// Output of `GET /api/admin/me`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserProfile {
    pub id: DbId,
    pub roles: Vec<String>,
}

/// ErrorResponse
///
/// Body of every error response produced by `error::AppError`. Field names are
/// snake_case on the wire (`retry_after`).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ErrorResponse {
    pub status: u16,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}
