// Storage backend abstraction
// Decision: Use enum dispatch for simplicity over trait objects
//
// StorageBackend wraps either PostgreSQL (production) or the in-memory store
// (dev mode, tests). The request guards do not use it directly: they see it
// through the narrower CredentialStore trait (see credentials.rs).

use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;

use super::memory::InMemoryDatabase;
use super::models::*;
use super::repositories::Database;

/// Storage backend that can be either PostgreSQL or in-memory
#[derive(Clone)]
pub enum StorageBackend {
    /// PostgreSQL database (production)
    Postgres(Database),
    /// In-memory database (dev mode)
    InMemory(Arc<InMemoryDatabase>),
}

impl StorageBackend {
    /// Create a PostgreSQL storage backend from a database URL
    pub async fn postgres(database_url: &str) -> Result<Self> {
        let db = Database::from_url(database_url).await?;
        Ok(Self::Postgres(db))
    }

    /// Create an in-memory storage backend
    pub fn in_memory() -> Self {
        Self::InMemory(Arc::new(InMemoryDatabase::new()))
    }

    /// Check if this is dev mode (in-memory)
    pub fn is_dev_mode(&self) -> bool {
        matches!(self, Self::InMemory(_))
    }

    /// Get the PostgreSQL pool if using PostgreSQL backend
    pub fn pool(&self) -> Option<&PgPool> {
        match self {
            Self::Postgres(db) => Some(db.pool()),
            Self::InMemory(_) => None,
        }
    }

    /// Apply pending migrations. No-op for the in-memory backend.
    pub async fn migrate(&self) -> Result<()> {
        match self {
            Self::Postgres(db) => db.migrate().await,
            Self::InMemory(_) => Ok(()),
        }
    }

    // ============================================
    // Users
    // ============================================

    pub async fn create_user(&self, input: CreateUserRow) -> Result<UserRow> {
        match self {
            Self::Postgres(db) => db.create_user(input).await,
            Self::InMemory(db) => db.create_user(input).await,
        }
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<UserRow>> {
        match self {
            Self::Postgres(db) => db.get_user(id).await,
            Self::InMemory(db) => db.get_user(id).await,
        }
    }

    /// Look a user up by username or email
    pub async fn get_user_by_login(&self, login: &str) -> Result<Option<UserRow>> {
        match self {
            Self::Postgres(db) => db.get_user_by_login(login).await,
            Self::InMemory(db) => db.get_user_by_login(login).await,
        }
    }

    pub async fn list_users(&self) -> Result<Vec<UserRow>> {
        match self {
            Self::Postgres(db) => db.list_users().await,
            Self::InMemory(db) => db.list_users().await,
        }
    }

    pub async fn update_user(&self, id: i64, input: UpdateUser) -> Result<Option<UserRow>> {
        match self {
            Self::Postgres(db) => db.update_user(id, input).await,
            Self::InMemory(db) => db.update_user(id, input).await,
        }
    }

    // ============================================
    // API Tokens
    // ============================================

    pub async fn create_api_token(&self, input: CreateApiTokenRow) -> Result<ApiTokenRow> {
        match self {
            Self::Postgres(db) => db.create_api_token(input).await,
            Self::InMemory(db) => db.create_api_token(input).await,
        }
    }

    pub async fn get_api_token(&self, id: &str) -> Result<Option<ApiTokenRow>> {
        match self {
            Self::Postgres(db) => db.get_api_token(id).await,
            Self::InMemory(db) => db.get_api_token(id).await,
        }
    }

    pub async fn list_api_tokens_for_user(&self, user_id: i64) -> Result<Vec<ApiTokenRow>> {
        match self {
            Self::Postgres(db) => db.list_api_tokens_for_user(user_id).await,
            Self::InMemory(db) => db.list_api_tokens_for_user(user_id).await,
        }
    }

    /// Mark a token expired. Only succeeds for the token's owner.
    pub async fn expire_api_token(&self, id: &str, user_id: i64) -> Result<bool> {
        match self {
            Self::Postgres(db) => db.expire_api_token(id, user_id).await,
            Self::InMemory(db) => db.expire_api_token(id, user_id).await,
        }
    }

    // ============================================
    // Projects
    // ============================================

    pub async fn create_project(&self, input: CreateProjectRow) -> Result<ProjectRow> {
        match self {
            Self::Postgres(db) => db.create_project(input).await,
            Self::InMemory(db) => db.create_project(input).await,
        }
    }

    pub async fn list_projects_for_user(&self, user_id: i64) -> Result<Vec<ProjectRow>> {
        match self {
            Self::Postgres(db) => db.list_projects_for_user(user_id).await,
            Self::InMemory(db) => db.list_projects_for_user(user_id).await,
        }
    }

    // ============================================
    // Memberships
    // ============================================

    /// Returns None if the user is already a member
    pub async fn add_project_member(
        &self,
        project_id: i64,
        user_id: i64,
        admin: bool,
    ) -> Result<Option<MembershipRow>> {
        match self {
            Self::Postgres(db) => db.add_project_member(project_id, user_id, admin).await,
            Self::InMemory(db) => db.add_project_member(project_id, user_id, admin).await,
        }
    }

    pub async fn get_membership(
        &self,
        user_id: i64,
        project_id: i64,
    ) -> Result<Option<ProjectMembership>> {
        match self {
            Self::Postgres(db) => db.get_membership(user_id, project_id).await,
            Self::InMemory(db) => db.get_membership(user_id, project_id).await,
        }
    }

    pub async fn list_project_members(&self, project_id: i64) -> Result<Vec<ProjectMemberRow>> {
        match self {
            Self::Postgres(db) => db.list_project_members(project_id).await,
            Self::InMemory(db) => db.list_project_members(project_id).await,
        }
    }

    pub async fn set_project_member_admin(
        &self,
        project_id: i64,
        user_id: i64,
        admin: bool,
    ) -> Result<MemberChange> {
        match self {
            Self::Postgres(db) => db.set_project_member_admin(project_id, user_id, admin).await,
            Self::InMemory(db) => db.set_project_member_admin(project_id, user_id, admin).await,
        }
    }

    /// Demotions and removals refuse to leave a project without an admin
    pub async fn remove_project_member(
        &self,
        project_id: i64,
        user_id: i64,
    ) -> Result<MemberChange> {
        match self {
            Self::Postgres(db) => db.remove_project_member(project_id, user_id).await,
            Self::InMemory(db) => db.remove_project_member(project_id, user_id).await,
        }
    }

    // ============================================
    // Project-scoped resources
    // ============================================

    pub async fn list_resources(
        &self,
        kind: ResourceKind,
        project_id: i64,
    ) -> Result<Vec<ResourceRow>> {
        match self {
            Self::Postgres(db) => db.list_resources(kind, project_id).await,
            Self::InMemory(db) => db.list_resources(kind, project_id).await,
        }
    }

    pub async fn create_resource(
        &self,
        kind: ResourceKind,
        input: CreateResourceRow,
    ) -> Result<ResourceRow> {
        match self {
            Self::Postgres(db) => db.create_resource(kind, input).await,
            Self::InMemory(db) => db.create_resource(kind, input).await,
        }
    }

    pub async fn find_resource(
        &self,
        kind: ResourceKind,
        id: i64,
        project_id: i64,
    ) -> Result<Option<ResourceRow>> {
        match self {
            Self::Postgres(db) => db.find_resource(kind, id, project_id).await,
            Self::InMemory(db) => db.find_resource(kind, id, project_id).await,
        }
    }

    pub async fn update_resource(
        &self,
        kind: ResourceKind,
        id: i64,
        project_id: i64,
        input: UpdateResource,
    ) -> Result<Option<ResourceRow>> {
        match self {
            Self::Postgres(db) => db.update_resource(kind, id, project_id, input).await,
            Self::InMemory(db) => db.update_resource(kind, id, project_id, input).await,
        }
    }

    pub async fn delete_resource(
        &self,
        kind: ResourceKind,
        id: i64,
        project_id: i64,
    ) -> Result<bool> {
        match self {
            Self::Postgres(db) => db.delete_resource(kind, id, project_id).await,
            Self::InMemory(db) => db.delete_resource(kind, id, project_id).await,
        }
    }

    // ============================================
    // Task output
    // ============================================

    pub async fn append_task_output(
        &self,
        task_id: i64,
        output: &str,
    ) -> Result<Option<TaskOutputRow>> {
        match self {
            Self::Postgres(db) => db.append_task_output(task_id, output).await,
            Self::InMemory(db) => db.append_task_output(task_id, output).await,
        }
    }

    pub async fn list_task_output(&self, task_id: i64) -> Result<Vec<TaskOutputRow>> {
        match self {
            Self::Postgres(db) => db.list_task_output(task_id).await,
            Self::InMemory(db) => db.list_task_output(task_id).await,
        }
    }

    // ============================================
    // Events
    // ============================================

    pub async fn record_event(&self, input: CreateEventRow) -> Result<EventRow> {
        match self {
            Self::Postgres(db) => db.record_event(input).await,
            Self::InMemory(db) => db.record_event(input).await,
        }
    }

    /// Newest first, at most `limit`
    pub async fn list_project_events(&self, project_id: i64, limit: i64) -> Result<Vec<EventRow>> {
        match self {
            Self::Postgres(db) => db.list_project_events(project_id, limit).await,
            Self::InMemory(db) => db.list_project_events(project_id, limit).await,
        }
    }

    /// Events of the projects `user_id` belongs to, newest first
    pub async fn list_events_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<EventRow>> {
        match self {
            Self::Postgres(db) => db.list_events_for_user(user_id, limit).await,
            Self::InMemory(db) => db.list_events_for_user(user_id, limit).await,
        }
    }
}
