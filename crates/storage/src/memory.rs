// In-memory storage implementation for dev mode
// Decision: Use parking_lot for thread-safe access
// Decision: Identifiers come from one process-wide counter per table
//
// This implementation provides a PostgreSQL-compatible API backed by in-memory
// HashMaps, allowing the control-plane to run without a database for development
// and letting tests exercise the full request pipeline.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use super::models::*;

/// In-memory database for dev mode
/// All data is stored in memory and lost on restart
#[derive(Default)]
pub struct InMemoryDatabase {
    users: RwLock<HashMap<i64, UserRow>>,
    api_tokens: RwLock<HashMap<String, ApiTokenRow>>,
    projects: RwLock<HashMap<i64, ProjectRow>>,
    // Keyed by (project_id, user_id): at most one membership per pair
    memberships: RwLock<HashMap<(i64, i64), MembershipRow>>,
    // BTreeMap keeps ids ordered for listing
    resources: RwLock<HashMap<ResourceKind, BTreeMap<i64, ResourceRow>>>,
    task_outputs: RwLock<HashMap<i64, Vec<TaskOutputRow>>>,
    // Append-only, oldest first
    events: RwLock<Vec<EventRow>>,
    next_user_id: AtomicI64,
    next_project_id: AtomicI64,
    next_resource_id: AtomicI64,
    next_event_id: AtomicI64,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn next_id(counter: &AtomicI64) -> i64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    // ============================================
    // Users
    // ============================================

    pub async fn create_user(&self, input: CreateUserRow) -> Result<UserRow> {
        let mut users = self.users.write();
        if users
            .values()
            .any(|u| u.username == input.username || u.email == input.email)
        {
            return Err(anyhow!(
                "duplicate key value violates unique constraint on users"
            ));
        }

        let now = Self::now();
        let id = Self::next_id(&self.next_user_id);
        let row = UserRow {
            id,
            username: input.username,
            name: input.name,
            email: input.email,
            password_hash: input.password_hash,
            admin: input.admin,
            created_at: now,
            updated_at: now,
        };
        users.insert(id, row.clone());
        Ok(row)
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<UserRow>> {
        Ok(self.users.read().get(&id).cloned())
    }

    pub async fn get_user_by_login(&self, login: &str) -> Result<Option<UserRow>> {
        Ok(self
            .users
            .read()
            .values()
            .find(|u| u.username == login || u.email == login)
            .cloned())
    }

    pub async fn list_users(&self) -> Result<Vec<UserRow>> {
        let mut result: Vec<_> = self.users.read().values().cloned().collect();
        result.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(result)
    }

    pub async fn update_user(&self, id: i64, input: UpdateUser) -> Result<Option<UserRow>> {
        let mut users = self.users.write();

        let clashes = users.values().any(|u| {
            u.id != id
                && (input.username.as_deref() == Some(u.username.as_str())
                    || input.email.as_deref() == Some(u.email.as_str()))
        });
        if clashes {
            return Err(anyhow!(
                "duplicate key value violates unique constraint on users"
            ));
        }

        if let Some(user) = users.get_mut(&id) {
            if let Some(username) = input.username {
                user.username = username;
            }
            if let Some(name) = input.name {
                user.name = name;
            }
            if let Some(email) = input.email {
                user.email = email;
            }
            if let Some(password_hash) = input.password_hash {
                user.password_hash = Some(password_hash);
            }
            if let Some(admin) = input.admin {
                user.admin = admin;
            }
            user.updated_at = Self::now();
            return Ok(Some(user.clone()));
        }
        Ok(None)
    }

    // ============================================
    // API Tokens
    // ============================================

    pub async fn create_api_token(&self, input: CreateApiTokenRow) -> Result<ApiTokenRow> {
        let mut tokens = self.api_tokens.write();
        if tokens.contains_key(&input.id) {
            return Err(anyhow!("duplicate api token"));
        }
        let row = ApiTokenRow {
            id: input.id,
            user_id: input.user_id,
            token_prefix: input.token_prefix,
            created_at: Self::now(),
            expires_at: input.expires_at,
            expired: false,
        };
        tokens.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    pub async fn get_api_token(&self, id: &str) -> Result<Option<ApiTokenRow>> {
        Ok(self.api_tokens.read().get(id).cloned())
    }

    pub async fn list_api_tokens_for_user(&self, user_id: i64) -> Result<Vec<ApiTokenRow>> {
        let mut result: Vec<_> = self
            .api_tokens
            .read()
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    pub async fn expire_api_token(&self, id: &str, user_id: i64) -> Result<bool> {
        let mut tokens = self.api_tokens.write();
        match tokens.get_mut(id) {
            Some(token) if token.user_id == user_id => {
                token.expired = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // ============================================
    // Projects
    // ============================================

    pub async fn create_project(&self, input: CreateProjectRow) -> Result<ProjectRow> {
        let now = Self::now();
        let id = Self::next_id(&self.next_project_id);
        let project = ProjectRow {
            id,
            name: input.name,
            created_at: now,
        };

        // Lock order: projects, then memberships
        let mut projects = self.projects.write();
        let mut memberships = self.memberships.write();
        projects.insert(id, project.clone());
        memberships.insert(
            (id, input.owner_id),
            MembershipRow {
                project_id: id,
                user_id: input.owner_id,
                admin: true,
                created_at: now,
            },
        );

        Ok(project)
    }

    pub async fn list_projects_for_user(&self, user_id: i64) -> Result<Vec<ProjectRow>> {
        let projects = self.projects.read();
        let memberships = self.memberships.read();
        let mut result: Vec<_> = memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| projects.get(&m.project_id).cloned())
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    // ============================================
    // Memberships
    // ============================================

    pub async fn add_project_member(
        &self,
        project_id: i64,
        user_id: i64,
        admin: bool,
    ) -> Result<Option<MembershipRow>> {
        if !self.projects.read().contains_key(&project_id) {
            return Err(anyhow!("project {} does not exist", project_id));
        }
        if !self.users.read().contains_key(&user_id) {
            return Err(anyhow!("user {} does not exist", user_id));
        }

        let mut memberships = self.memberships.write();
        if memberships.contains_key(&(project_id, user_id)) {
            return Ok(None);
        }
        let row = MembershipRow {
            project_id,
            user_id,
            admin,
            created_at: Self::now(),
        };
        memberships.insert((project_id, user_id), row.clone());
        Ok(Some(row))
    }

    pub async fn get_membership(
        &self,
        user_id: i64,
        project_id: i64,
    ) -> Result<Option<ProjectMembership>> {
        let projects = self.projects.read();
        let memberships = self.memberships.read();
        Ok(memberships.get(&(project_id, user_id)).and_then(|m| {
            projects.get(&project_id).map(|project| ProjectMembership {
                project: project.clone(),
                user_id: m.user_id,
                admin: m.admin,
            })
        }))
    }

    pub async fn list_project_members(&self, project_id: i64) -> Result<Vec<ProjectMemberRow>> {
        let users = self.users.read();
        let memberships = self.memberships.read();
        let mut result: Vec<_> = memberships
            .values()
            .filter(|m| m.project_id == project_id)
            .filter_map(|m| {
                users.get(&m.user_id).map(|user| ProjectMemberRow {
                    user: user.clone(),
                    admin: m.admin,
                })
            })
            .collect();
        result.sort_by(|a, b| a.user.username.cmp(&b.user.username));
        Ok(result)
    }

    pub async fn set_project_member_admin(
        &self,
        project_id: i64,
        user_id: i64,
        admin: bool,
    ) -> Result<MemberChange> {
        // Check and write under one lock
        let mut memberships = self.memberships.write();
        let Some(current) = memberships.get(&(project_id, user_id)).map(|m| m.admin) else {
            return Ok(MemberChange::NotMember);
        };
        if current && !admin && !Self::other_admin_exists(&memberships, project_id, user_id) {
            tracing::debug!(project_id, user_id, "Refused to demote the last project admin");
            return Ok(MemberChange::LastAdmin);
        }
        if let Some(membership) = memberships.get_mut(&(project_id, user_id)) {
            membership.admin = admin;
        }
        Ok(MemberChange::Applied)
    }

    pub async fn remove_project_member(
        &self,
        project_id: i64,
        user_id: i64,
    ) -> Result<MemberChange> {
        let mut memberships = self.memberships.write();
        let Some(current) = memberships.get(&(project_id, user_id)).map(|m| m.admin) else {
            return Ok(MemberChange::NotMember);
        };
        if current && !Self::other_admin_exists(&memberships, project_id, user_id) {
            tracing::debug!(project_id, user_id, "Refused to remove the last project admin");
            return Ok(MemberChange::LastAdmin);
        }
        memberships.remove(&(project_id, user_id));
        Ok(MemberChange::Applied)
    }

    fn other_admin_exists(
        memberships: &HashMap<(i64, i64), MembershipRow>,
        project_id: i64,
        user_id: i64,
    ) -> bool {
        memberships
            .values()
            .any(|m| m.project_id == project_id && m.user_id != user_id && m.admin)
    }

    // ============================================
    // Project-scoped resources
    // ============================================

    pub async fn list_resources(
        &self,
        kind: ResourceKind,
        project_id: i64,
    ) -> Result<Vec<ResourceRow>> {
        Ok(self
            .resources
            .read()
            .get(&kind)
            .map(|rows| {
                rows.values()
                    .filter(|r| r.project_id == project_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn create_resource(
        &self,
        kind: ResourceKind,
        input: CreateResourceRow,
    ) -> Result<ResourceRow> {
        if !self.projects.read().contains_key(&input.project_id) {
            return Err(anyhow!("project {} does not exist", input.project_id));
        }

        let now = Self::now();
        let id = Self::next_id(&self.next_resource_id);
        let row = ResourceRow {
            id,
            project_id: input.project_id,
            name: input.name,
            data: input.data,
            created_at: now,
            updated_at: now,
        };
        self.resources
            .write()
            .entry(kind)
            .or_default()
            .insert(id, row.clone());
        Ok(row)
    }

    pub async fn find_resource(
        &self,
        kind: ResourceKind,
        id: i64,
        project_id: i64,
    ) -> Result<Option<ResourceRow>> {
        Ok(self
            .resources
            .read()
            .get(&kind)
            .and_then(|rows| rows.get(&id))
            .filter(|r| r.project_id == project_id)
            .cloned())
    }

    pub async fn update_resource(
        &self,
        kind: ResourceKind,
        id: i64,
        project_id: i64,
        input: UpdateResource,
    ) -> Result<Option<ResourceRow>> {
        let mut resources = self.resources.write();
        let row = resources
            .get_mut(&kind)
            .and_then(|rows| rows.get_mut(&id))
            .filter(|r| r.project_id == project_id);

        if let Some(row) = row {
            if let Some(name) = input.name {
                row.name = name;
            }
            if let Some(data) = input.data {
                row.data = data;
            }
            row.updated_at = Self::now();
            return Ok(Some(row.clone()));
        }
        Ok(None)
    }

    pub async fn delete_resource(
        &self,
        kind: ResourceKind,
        id: i64,
        project_id: i64,
    ) -> Result<bool> {
        let mut resources = self.resources.write();
        let Some(rows) = resources.get_mut(&kind) else {
            return Ok(false);
        };
        if rows.get(&id).is_some_and(|r| r.project_id == project_id) {
            rows.remove(&id);
            if kind == ResourceKind::Task {
                self.task_outputs.write().remove(&id);
            }
            return Ok(true);
        }
        Ok(false)
    }

    // ============================================
    // Task output
    // ============================================

    /// Returns None if the task does not exist
    pub async fn append_task_output(
        &self,
        task_id: i64,
        output: &str,
    ) -> Result<Option<TaskOutputRow>> {
        // Lock order: resources, then task_outputs (as in delete_resource), held
        // across the push so a concurrent delete cannot leave orphan output
        let resources = self.resources.read();
        let exists = resources
            .get(&ResourceKind::Task)
            .is_some_and(|rows| rows.contains_key(&task_id));
        if !exists {
            return Ok(None);
        }

        let row = TaskOutputRow {
            task_id,
            output: output.to_string(),
            recorded_at: Self::now(),
        };
        self.task_outputs
            .write()
            .entry(task_id)
            .or_default()
            .push(row.clone());
        Ok(Some(row))
    }

    pub async fn list_task_output(&self, task_id: i64) -> Result<Vec<TaskOutputRow>> {
        Ok(self
            .task_outputs
            .read()
            .get(&task_id)
            .cloned()
            .unwrap_or_default())
    }

    // ============================================
    // Events
    // ============================================

    pub async fn record_event(&self, input: CreateEventRow) -> Result<EventRow> {
        if !self.projects.read().contains_key(&input.project_id) {
            return Err(anyhow!("project {} does not exist", input.project_id));
        }

        let row = EventRow {
            id: Self::next_id(&self.next_event_id),
            project_id: input.project_id,
            user_id: input.user_id,
            object_type: input.object_type,
            object_id: input.object_id,
            description: input.description,
            created_at: Self::now(),
        };
        self.events.write().push(row.clone());
        Ok(row)
    }

    /// Newest first
    pub async fn list_project_events(&self, project_id: i64, limit: i64) -> Result<Vec<EventRow>> {
        Ok(Self::newest(
            &self.events.read(),
            |e| e.project_id == project_id,
            limit,
        ))
    }

    /// Events of every project the user is a member of, newest first
    pub async fn list_events_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<EventRow>> {
        // Lock order: memberships, then events
        let memberships = self.memberships.read();
        let events = self.events.read();
        Ok(Self::newest(
            &events,
            |e| memberships.contains_key(&(e.project_id, user_id)),
            limit,
        ))
    }

    fn newest<F>(events: &[EventRow], keep: F, limit: i64) -> Vec<EventRow>
    where
        F: Fn(&EventRow) -> bool,
    {
        events
            .iter()
            .rev()
            .filter(|e| keep(e))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seed_user(db: &InMemoryDatabase, username: &str) -> UserRow {
        db.create_user(CreateUserRow {
            username: username.to_string(),
            name: username.to_string(),
            email: format!("{}@example.com", username),
            password_hash: None,
            admin: false,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_project_makes_owner_admin() {
        let db = InMemoryDatabase::new();
        let owner = seed_user(&db, "owner").await;

        let project = db
            .create_project(CreateProjectRow {
                name: "infra".to_string(),
                owner_id: owner.id,
            })
            .await
            .unwrap();

        let membership = db.get_membership(owner.id, project.id).await.unwrap().unwrap();
        assert!(membership.admin);
        assert_eq!(membership.project.name, "infra");

        let projects = db.list_projects_for_user(owner.id).await.unwrap();
        assert_eq!(projects.len(), 1);
    }

    #[tokio::test]
    async fn test_membership_is_unique_per_pair() {
        let db = InMemoryDatabase::new();
        let owner = seed_user(&db, "owner").await;
        let member = seed_user(&db, "member").await;
        let project = db
            .create_project(CreateProjectRow {
                name: "infra".to_string(),
                owner_id: owner.id,
            })
            .await
            .unwrap();

        let first = db.add_project_member(project.id, member.id, false).await.unwrap();
        assert!(first.is_some());

        let second = db.add_project_member(project.id, member.id, true).await.unwrap();
        assert!(second.is_none(), "duplicate membership must be refused");

        // The original row is untouched
        let membership = db.get_membership(member.id, project.id).await.unwrap().unwrap();
        assert!(!membership.admin);
        assert_eq!(db.list_project_members(project.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resource_lookup_is_project_scoped() {
        let db = InMemoryDatabase::new();
        let owner = seed_user(&db, "owner").await;
        let p1 = db
            .create_project(CreateProjectRow {
                name: "one".to_string(),
                owner_id: owner.id,
            })
            .await
            .unwrap();
        let p2 = db
            .create_project(CreateProjectRow {
                name: "two".to_string(),
                owner_id: owner.id,
            })
            .await
            .unwrap();

        let key = db
            .create_resource(
                ResourceKind::AccessKey,
                CreateResourceRow {
                    project_id: p1.id,
                    name: "deploy".to_string(),
                    data: json!({"type": "ssh"}),
                },
            )
            .await
            .unwrap();

        assert!(db
            .find_resource(ResourceKind::AccessKey, key.id, p1.id)
            .await
            .unwrap()
            .is_some());
        assert!(db
            .find_resource(ResourceKind::AccessKey, key.id, p2.id)
            .await
            .unwrap()
            .is_none());
        // Same id, different kind
        assert!(db
            .find_resource(ResourceKind::Inventory, key.id, p1.id)
            .await
            .unwrap()
            .is_none());

        // Mutations through the wrong project do nothing
        let update = UpdateResource {
            name: Some("stolen".to_string()),
            data: None,
        };
        assert!(db
            .update_resource(ResourceKind::AccessKey, key.id, p2.id, update)
            .await
            .unwrap()
            .is_none());
        assert!(!db
            .delete_resource(ResourceKind::AccessKey, key.id, p2.id)
            .await
            .unwrap());
        assert!(db
            .delete_resource(ResourceKind::AccessKey, key.id, p1.id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_expire_api_token_requires_owner() {
        let db = InMemoryDatabase::new();
        let owner = seed_user(&db, "owner").await;
        let other = seed_user(&db, "other").await;

        db.create_api_token(CreateApiTokenRow {
            id: "digest".to_string(),
            user_id: owner.id,
            token_prefix: "cdt_00000000...".to_string(),
            expires_at: None,
        })
        .await
        .unwrap();

        assert!(!db.expire_api_token("digest", other.id).await.unwrap());
        assert!(!db.get_api_token("digest").await.unwrap().unwrap().expired);

        assert!(db.expire_api_token("digest", owner.id).await.unwrap());
        assert!(db.get_api_token("digest").await.unwrap().unwrap().expired);
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let db = InMemoryDatabase::new();
        seed_user(&db, "alice").await;
        let result = db
            .create_user(CreateUserRow {
                username: "alice".to_string(),
                name: "Alice Again".to_string(),
                email: "other@example.com".to_string(),
                password_hash: None,
                admin: false,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_task_output_in_order() {
        let db = InMemoryDatabase::new();
        let owner = seed_user(&db, "owner").await;
        let project = db
            .create_project(CreateProjectRow {
                name: "infra".to_string(),
                owner_id: owner.id,
            })
            .await
            .unwrap();
        let task = db
            .create_resource(
                ResourceKind::Task,
                CreateResourceRow {
                    project_id: project.id,
                    name: "site.yml".to_string(),
                    data: json!({}),
                },
            )
            .await
            .unwrap();

        db.append_task_output(task.id, "PLAY [all]").await.unwrap();
        db.append_task_output(task.id, "ok: [web1]").await.unwrap();

        let lines: Vec<_> = db
            .list_task_output(task.id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.output)
            .collect();
        assert_eq!(lines, vec!["PLAY [all]", "ok: [web1]"]);

        assert!(db.append_task_output(9999, "nope").await.unwrap().is_none());

        // Output goes away with its task and cannot be appended afterwards
        assert!(db
            .delete_resource(ResourceKind::Task, task.id, project.id)
            .await
            .unwrap());
        assert!(db.list_task_output(task.id).await.unwrap().is_empty());
        assert!(db
            .append_task_output(task.id, "late line")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_events_follow_membership() {
        let db = InMemoryDatabase::new();
        let alice = seed_user(&db, "alice").await;
        let bob = seed_user(&db, "bob").await;
        let ours = db
            .create_project(CreateProjectRow {
                name: "ours".to_string(),
                owner_id: alice.id,
            })
            .await
            .unwrap();
        let theirs = db
            .create_project(CreateProjectRow {
                name: "theirs".to_string(),
                owner_id: bob.id,
            })
            .await
            .unwrap();

        let events = [
            (ours.id, "first"),
            (theirs.id, "foreign"),
            (ours.id, "second"),
        ];
        for (project_id, description) in events {
            db.record_event(CreateEventRow {
                project_id,
                user_id: None,
                object_type: "project".to_string(),
                object_id: Some(project_id),
                description: description.to_string(),
            })
            .await
            .unwrap();
        }

        let mine: Vec<_> = db
            .list_events_for_user(alice.id, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.description)
            .collect();
        assert_eq!(mine, vec!["second", "first"]);

        assert_eq!(db.list_project_events(ours.id, 1).await.unwrap().len(), 1);
        assert!(db
            .record_event(CreateEventRow {
                project_id: 9999,
                user_id: None,
                object_type: "project".to_string(),
                object_id: None,
                description: "nowhere".to_string(),
            })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_last_admin_cannot_leave() {
        let db = InMemoryDatabase::new();
        let alice = seed_user(&db, "alice").await;
        let bob = seed_user(&db, "bob").await;
        let project = db
            .create_project(CreateProjectRow {
                name: "infra".to_string(),
                owner_id: alice.id,
            })
            .await
            .unwrap();
        db.add_project_member(project.id, bob.id, true)
            .await
            .unwrap()
            .unwrap();

        // Two admins: one may go, the other must stay
        assert_eq!(
            db.set_project_member_admin(project.id, bob.id, false)
                .await
                .unwrap(),
            MemberChange::Applied
        );
        assert_eq!(
            db.set_project_member_admin(project.id, alice.id, false)
                .await
                .unwrap(),
            MemberChange::LastAdmin
        );
        assert_eq!(
            db.remove_project_member(project.id, alice.id).await.unwrap(),
            MemberChange::LastAdmin
        );
        assert_eq!(
            db.remove_project_member(project.id, bob.id).await.unwrap(),
            MemberChange::Applied
        );
        assert_eq!(
            db.remove_project_member(project.id, bob.id).await.unwrap(),
            MemberChange::NotMember
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mutual_demotion_keeps_an_admin() {
        for _ in 0..50 {
            let db = std::sync::Arc::new(InMemoryDatabase::new());
            let alice = seed_user(&db, "alice").await;
            let bob = seed_user(&db, "bob").await;
            let project = db
                .create_project(CreateProjectRow {
                    name: "infra".to_string(),
                    owner_id: alice.id,
                })
                .await
                .unwrap();
            db.add_project_member(project.id, bob.id, true)
                .await
                .unwrap()
                .unwrap();

            let a = tokio::spawn({
                let db = db.clone();
                async move { db.remove_project_member(project.id, bob.id).await }
            });
            let b = tokio::spawn({
                let db = db.clone();
                async move { db.remove_project_member(project.id, alice.id).await }
            });
            let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
            assert!(outcomes.contains(&MemberChange::LastAdmin));

            let admins = db
                .list_project_members(project.id)
                .await
                .unwrap()
                .into_iter()
                .filter(|m| m.admin)
                .count();
            assert_eq!(admins, 1);
        }
    }
}
