// Repository layer for PostgreSQL
// Decision: Runtime-checked queries (query_as) so builds need no live database
// Decision: Resource tables share one column layout; table names come from ResourceKind only

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::models::*;

const RESOURCE_COLUMNS: &str = "id, project_id, name, data, created_at, updated_at";

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// Row shape of the membership/project join
#[derive(FromRow)]
struct MembershipJoinRow {
    project_id: i64,
    project_name: String,
    project_created_at: DateTime<Utc>,
    user_id: i64,
    admin: bool,
}

impl From<MembershipJoinRow> for ProjectMembership {
    fn from(row: MembershipJoinRow) -> Self {
        Self {
            project: ProjectRow {
                id: row.project_id,
                name: row.project_name,
                created_at: row.project_created_at,
            },
            user_id: row.user_id,
            admin: row.admin,
        }
    }
}

/// Row shape of the member/user join
#[derive(FromRow)]
struct MemberJoinRow {
    id: i64,
    username: String,
    name: String,
    email: String,
    password_hash: Option<String>,
    admin: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    member_admin: bool,
}

impl From<MemberJoinRow> for ProjectMemberRow {
    fn from(row: MemberJoinRow) -> Self {
        Self {
            user: UserRow {
                id: row.id,
                username: row.username,
                name: row.name,
                email: row.email,
                password_hash: row.password_hash,
                admin: row.admin,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
            admin: row.member_admin,
        }
    }
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations from `migrations/`
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::debug!("Database migrations up to date");
        Ok(())
    }

    // ============================================
    // Users
    // ============================================

    pub async fn create_user(&self, input: CreateUserRow) -> Result<UserRow> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (username, name, email, password_hash, admin)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, username, name, email, password_hash, admin, created_at, updated_at
            "#,
        )
        .bind(&input.username)
        .bind(&input.name)
        .bind(&input.email)
        .bind(&input.password_hash)
        .bind(input.admin)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, name, email, password_hash, admin, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Find a user by username or email
    pub async fn get_user_by_login(&self, login: &str) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, name, email, password_hash, admin, created_at, updated_at
            FROM users
            WHERE username = $1 OR email = $1
            LIMIT 1
            "#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_users(&self) -> Result<Vec<UserRow>> {
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, name, email, password_hash, admin, created_at, updated_at
            FROM users
            ORDER BY username
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn update_user(&self, id: i64, input: UpdateUser) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            UPDATE users
            SET
                username = COALESCE($2, username),
                name = COALESCE($3, name),
                email = COALESCE($4, email),
                password_hash = COALESCE($5, password_hash),
                admin = COALESCE($6, admin),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, username, name, email, password_hash, admin, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&input.username)
        .bind(&input.name)
        .bind(&input.email)
        .bind(&input.password_hash)
        .bind(input.admin)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // API Tokens
    // ============================================

    pub async fn create_api_token(&self, input: CreateApiTokenRow) -> Result<ApiTokenRow> {
        let row = sqlx::query_as::<_, ApiTokenRow>(
            r#"
            INSERT INTO api_tokens (id, user_id, token_prefix, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, token_prefix, created_at, expires_at, expired
            "#,
        )
        .bind(&input.id)
        .bind(input.user_id)
        .bind(&input.token_prefix)
        .bind(input.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_api_token(&self, id: &str) -> Result<Option<ApiTokenRow>> {
        let row = sqlx::query_as::<_, ApiTokenRow>(
            r#"
            SELECT id, user_id, token_prefix, created_at, expires_at, expired
            FROM api_tokens
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_api_tokens_for_user(&self, user_id: i64) -> Result<Vec<ApiTokenRow>> {
        let rows = sqlx::query_as::<_, ApiTokenRow>(
            r#"
            SELECT id, user_id, token_prefix, created_at, expires_at, expired
            FROM api_tokens
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Revoke a token owned by `user_id`. Returns false if no such token.
    pub async fn expire_api_token(&self, id: &str, user_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE api_tokens
            SET expired = TRUE
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Projects
    // ============================================

    pub async fn create_project(&self, input: CreateProjectRow) -> Result<ProjectRow> {
        let mut tx = self.pool.begin().await?;

        let project = sqlx::query_as::<_, ProjectRow>(
            r#"
            INSERT INTO projects (name)
            VALUES ($1)
            RETURNING id, name, created_at
            "#,
        )
        .bind(&input.name)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO project_users (project_id, user_id, admin)
            VALUES ($1, $2, TRUE)
            "#,
        )
        .bind(project.id)
        .bind(input.owner_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(project)
    }

    pub async fn list_projects_for_user(&self, user_id: i64) -> Result<Vec<ProjectRow>> {
        let rows = sqlx::query_as::<_, ProjectRow>(
            r#"
            SELECT p.id, p.name, p.created_at
            FROM projects p
            JOIN project_users pu ON pu.project_id = p.id
            WHERE pu.user_id = $1
            ORDER BY p.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ============================================
    // Memberships
    // ============================================

    /// Returns None if the (project, user) pair is already a member
    pub async fn add_project_member(
        &self,
        project_id: i64,
        user_id: i64,
        admin: bool,
    ) -> Result<Option<MembershipRow>> {
        let row = sqlx::query_as::<_, MembershipRow>(
            r#"
            INSERT INTO project_users (project_id, user_id, admin)
            VALUES ($1, $2, $3)
            ON CONFLICT (project_id, user_id) DO NOTHING
            RETURNING project_id, user_id, admin, created_at
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .bind(admin)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_membership(
        &self,
        user_id: i64,
        project_id: i64,
    ) -> Result<Option<ProjectMembership>> {
        let row = sqlx::query_as::<_, MembershipJoinRow>(
            r#"
            SELECT
                p.id AS project_id,
                p.name AS project_name,
                p.created_at AS project_created_at,
                pu.user_id,
                pu.admin
            FROM project_users pu
            JOIN projects p ON p.id = pu.project_id
            WHERE pu.project_id = $1 AND pu.user_id = $2
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    pub async fn list_project_members(&self, project_id: i64) -> Result<Vec<ProjectMemberRow>> {
        let rows = sqlx::query_as::<_, MemberJoinRow>(
            r#"
            SELECT
                u.id, u.username, u.name, u.email, u.password_hash, u.admin,
                u.created_at, u.updated_at,
                pu.admin AS member_admin
            FROM project_users pu
            JOIN users u ON u.id = pu.user_id
            WHERE pu.project_id = $1
            ORDER BY u.username
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn set_project_member_admin(
        &self,
        project_id: i64,
        user_id: i64,
        admin: bool,
    ) -> Result<MemberChange> {
        let mut tx = self.pool.begin().await?;
        let Some(current) = lock_membership(&mut tx, project_id, user_id).await? else {
            return Ok(MemberChange::NotMember);
        };
        if current && !admin && !other_admin_exists(&mut tx, project_id, user_id).await? {
            tracing::debug!(project_id, user_id, "Refused to demote the last project admin");
            return Ok(MemberChange::LastAdmin);
        }

        sqlx::query(
            r#"
            UPDATE project_users
            SET admin = $3
            WHERE project_id = $1 AND user_id = $2
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .bind(admin)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(MemberChange::Applied)
    }

    pub async fn remove_project_member(
        &self,
        project_id: i64,
        user_id: i64,
    ) -> Result<MemberChange> {
        let mut tx = self.pool.begin().await?;
        let Some(current) = lock_membership(&mut tx, project_id, user_id).await? else {
            return Ok(MemberChange::NotMember);
        };
        if current && !other_admin_exists(&mut tx, project_id, user_id).await? {
            tracing::debug!(project_id, user_id, "Refused to remove the last project admin");
            return Ok(MemberChange::LastAdmin);
        }

        sqlx::query(
            r#"
            DELETE FROM project_users
            WHERE project_id = $1 AND user_id = $2
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(MemberChange::Applied)
    }

    // ============================================
    // Project-scoped resources
    // ============================================

    pub async fn list_resources(
        &self,
        kind: ResourceKind,
        project_id: i64,
    ) -> Result<Vec<ResourceRow>> {
        let sql = format!(
            "SELECT {RESOURCE_COLUMNS} FROM {} WHERE project_id = $1 ORDER BY id",
            kind.table()
        );
        let rows = sqlx::query_as::<_, ResourceRow>(&sql)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    pub async fn create_resource(
        &self,
        kind: ResourceKind,
        input: CreateResourceRow,
    ) -> Result<ResourceRow> {
        let sql = format!(
            "INSERT INTO {} (project_id, name, data) VALUES ($1, $2, $3) RETURNING {RESOURCE_COLUMNS}",
            kind.table()
        );
        let row = sqlx::query_as::<_, ResourceRow>(&sql)
            .bind(input.project_id)
            .bind(&input.name)
            .bind(&input.data)
            .fetch_one(&self.pool)
            .await?;

        Ok(row)
    }

    /// Single lookup constrained by both the resource id and the owning project
    pub async fn find_resource(
        &self,
        kind: ResourceKind,
        id: i64,
        project_id: i64,
    ) -> Result<Option<ResourceRow>> {
        let sql = format!(
            "SELECT {RESOURCE_COLUMNS} FROM {} WHERE id = $1 AND project_id = $2",
            kind.table()
        );
        let row = sqlx::query_as::<_, ResourceRow>(&sql)
            .bind(id)
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    pub async fn update_resource(
        &self,
        kind: ResourceKind,
        id: i64,
        project_id: i64,
        input: UpdateResource,
    ) -> Result<Option<ResourceRow>> {
        let sql = format!(
            r#"
            UPDATE {}
            SET
                name = COALESCE($3, name),
                data = COALESCE($4, data),
                updated_at = NOW()
            WHERE id = $1 AND project_id = $2
            RETURNING {RESOURCE_COLUMNS}
            "#,
            kind.table()
        );
        let row = sqlx::query_as::<_, ResourceRow>(&sql)
            .bind(id)
            .bind(project_id)
            .bind(&input.name)
            .bind(&input.data)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    pub async fn delete_resource(
        &self,
        kind: ResourceKind,
        id: i64,
        project_id: i64,
    ) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE id = $1 AND project_id = $2",
            kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(project_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Task output
    // ============================================

    /// Returns None if the task does not exist (or was deleted concurrently)
    pub async fn append_task_output(
        &self,
        task_id: i64,
        output: &str,
    ) -> Result<Option<TaskOutputRow>> {
        let result = sqlx::query_as::<_, TaskOutputRow>(
            r#"
            INSERT INTO task_outputs (task_id, output)
            SELECT id, $2 FROM tasks WHERE id = $1
            RETURNING task_id, output, recorded_at
            "#,
        )
        .bind(task_id)
        .bind(output)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(row),
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                tracing::debug!(task_id, "Task deleted while appending output");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_task_output(&self, task_id: i64) -> Result<Vec<TaskOutputRow>> {
        let rows = sqlx::query_as::<_, TaskOutputRow>(
            r#"
            SELECT task_id, output, recorded_at
            FROM task_outputs
            WHERE task_id = $1
            ORDER BY id
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ============================================
    // Events
    // ============================================

    pub async fn record_event(&self, input: CreateEventRow) -> Result<EventRow> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            INSERT INTO events (project_id, user_id, object_type, object_id, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, project_id, user_id, object_type, object_id, description, created_at
            "#,
        )
        .bind(input.project_id)
        .bind(input.user_id)
        .bind(&input.object_type)
        .bind(input.object_id)
        .bind(&input.description)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_project_events(&self, project_id: i64, limit: i64) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, project_id, user_id, object_type, object_id, description, created_at
            FROM events
            WHERE project_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(project_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn list_events_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<EventRow>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT e.id, e.project_id, e.user_id, e.object_type, e.object_id,
                   e.description, e.created_at
            FROM events e
            JOIN project_users pu ON pu.project_id = e.project_id
            WHERE pu.user_id = $1
            ORDER BY e.id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Lock the project row, then read the member's admin flag.
/// Holding the project lock serializes admin changes within one project, so
/// two admins cannot demote each other concurrently.
async fn lock_membership(
    tx: &mut Transaction<'_, Postgres>,
    project_id: i64,
    user_id: i64,
) -> Result<Option<bool>> {
    sqlx::query("SELECT id FROM projects WHERE id = $1 FOR UPDATE")
        .bind(project_id)
        .execute(&mut **tx)
        .await?;

    let admin = sqlx::query_scalar::<_, bool>(
        "SELECT admin FROM project_users WHERE project_id = $1 AND user_id = $2",
    )
    .bind(project_id)
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(admin)
}

async fn other_admin_exists(
    tx: &mut Transaction<'_, Postgres>,
    project_id: i64,
    user_id: i64,
) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM project_users
            WHERE project_id = $1 AND admin AND user_id <> $2
        )
        "#,
    )
    .bind(project_id)
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(exists)
}
