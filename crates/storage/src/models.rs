// Database models (internal, may differ from public DTOs)

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::fmt;

// ============================================
// Users
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    /// System-wide administrator (distinct from project admin)
    pub admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateUserRow {
    pub username: String,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub admin: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateUser {
    pub username: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub admin: Option<bool>,
}

// ============================================
// API Tokens
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct ApiTokenRow {
    /// SHA-256 hex digest of the token value
    pub id: String,
    pub user_id: i64,
    pub token_prefix: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Set on revocation; the row is kept
    pub expired: bool,
}

impl ApiTokenRow {
    /// A token is usable if it was never revoked and has not passed its expiry
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if self.expired {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateApiTokenRow {
    pub id: String,
    pub user_id: i64,
    pub token_prefix: String,
    pub expires_at: Option<DateTime<Utc>>,
}

// ============================================
// Projects and memberships
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct ProjectRow {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateProjectRow {
    pub name: String,
    /// Becomes the first (admin) member of the project
    pub owner_id: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct MembershipRow {
    pub project_id: i64,
    pub user_id: i64,
    pub admin: bool,
    pub created_at: DateTime<Utc>,
}

/// Membership joined with its project, as returned by a single lookup
#[derive(Debug, Clone)]
pub struct ProjectMembership {
    pub project: ProjectRow,
    pub user_id: i64,
    pub admin: bool,
}

/// Outcome of demoting or removing a project member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberChange {
    Applied,
    NotMember,
    /// Refused: the member is the project's only admin
    LastAdmin,
}

/// A project member with their user record
#[derive(Debug, Clone)]
pub struct ProjectMemberRow {
    pub user: UserRow,
    pub admin: bool,
}

// ============================================
// Project-scoped resources
// ============================================

/// Kinds of resources owned by a project. Each kind lives in its own table
/// and every lookup is constrained by `project_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    AccessKey,
    Inventory,
    Environment,
    Template,
    Repository,
    Task,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::AccessKey,
        ResourceKind::Inventory,
        ResourceKind::Environment,
        ResourceKind::Template,
        ResourceKind::Repository,
        ResourceKind::Task,
    ];

    /// Table name. Only ever interpolated from this fixed set.
    pub fn table(&self) -> &'static str {
        match self {
            ResourceKind::AccessKey => "access_keys",
            ResourceKind::Inventory => "inventories",
            ResourceKind::Environment => "environments",
            ResourceKind::Template => "templates",
            ResourceKind::Repository => "repositories",
            ResourceKind::Task => "tasks",
        }
    }

    /// Human readable label used in error messages
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::AccessKey => "Key",
            ResourceKind::Inventory => "Inventory",
            ResourceKind::Environment => "Environment",
            ResourceKind::Template => "Template",
            ResourceKind::Repository => "Repository",
            ResourceKind::Task => "Task",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ResourceRow {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub data: sqlx::types::JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateResourceRow {
    pub project_id: i64,
    pub name: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateResource {
    pub name: Option<String>,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TaskOutputRow {
    pub task_id: i64,
    pub output: String,
    pub recorded_at: DateTime<Utc>,
}

// ============================================
// Events (per-project audit trail)
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub id: i64,
    pub project_id: i64,
    /// Acting user; None once that user is gone
    pub user_id: Option<i64>,
    /// "project", "user", or a resource table name such as "access_keys"
    pub object_type: String,
    pub object_id: Option<i64>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateEventRow {
    pub project_id: i64,
    pub user_id: Option<i64>,
    pub object_type: String,
    pub object_id: Option<i64>,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(expired: bool, expires_at: Option<DateTime<Utc>>) -> ApiTokenRow {
        ApiTokenRow {
            id: "digest".to_string(),
            user_id: 1,
            token_prefix: "cdt_abcd1234...".to_string(),
            created_at: Utc::now(),
            expires_at,
            expired,
        }
    }

    #[test]
    fn test_token_activity() {
        let now = Utc::now();
        assert!(token(false, None).is_active_at(now));
        assert!(token(false, Some(now + Duration::days(1))).is_active_at(now));
        assert!(!token(false, Some(now - Duration::seconds(1))).is_active_at(now));
        assert!(!token(true, None).is_active_at(now));
        assert!(!token(true, Some(now + Duration::days(1))).is_active_at(now));
    }

    #[test]
    fn test_resource_tables_are_distinct() {
        let mut tables: Vec<_> = ResourceKind::ALL.iter().map(|k| k.table()).collect();
        tables.sort();
        tables.dedup();
        assert_eq!(tables.len(), ResourceKind::ALL.len());
    }
}
