// Credential lookups used by request guards
// Decision: Guards depend on this trait only, never on StorageBackend directly
// Decision: Every lookup that touches project data takes the project id, so a
// guard cannot fetch a row without constraining it to the tenant

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::backend::StorageBackend;
use super::models::{ApiTokenRow, ProjectMembership, ResourceKind, ResourceRow, UserRow};

/// SHA-256 hex digest of a raw API token value. This is the token's storage key;
/// raw token values are never persisted.
pub fn token_digest(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Read-only lookups needed to authenticate a request and authorize it against
/// a project. Implementations return `Ok(None)` for "not found"; `Err` means the
/// store itself failed.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<UserRow>>;

    /// Membership of `user_id` in `project_id`, joined with the project
    async fn find_membership(
        &self,
        user_id: i64,
        project_id: i64,
    ) -> Result<Option<ProjectMembership>>;

    /// Look up an API token by its raw value
    async fn find_token(&self, token_value: &str) -> Result<Option<ApiTokenRow>>;

    /// Resource of `kind` with `id`, only if it belongs to `project_id`
    async fn find_resource(
        &self,
        kind: ResourceKind,
        id: i64,
        project_id: i64,
    ) -> Result<Option<ResourceRow>>;
}

#[async_trait]
impl CredentialStore for StorageBackend {
    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<UserRow>> {
        self.get_user(user_id).await
    }

    async fn find_membership(
        &self,
        user_id: i64,
        project_id: i64,
    ) -> Result<Option<ProjectMembership>> {
        self.get_membership(user_id, project_id).await
    }

    async fn find_token(&self, token_value: &str) -> Result<Option<ApiTokenRow>> {
        self.get_api_token(&token_digest(token_value)).await
    }

    async fn find_resource(
        &self,
        kind: ResourceKind,
        id: i64,
        project_id: i64,
    ) -> Result<Option<ResourceRow>> {
        StorageBackend::find_resource(self, kind, id, project_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateApiTokenRow, CreateProjectRow, CreateResourceRow, CreateUserRow};
    use serde_json::json;

    #[test]
    fn test_token_digest() {
        let digest = token_digest("cdt_test");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, token_digest("cdt_test"));
        assert_ne!(digest, token_digest("cdt_test2"));
    }

    #[tokio::test]
    async fn test_find_token_hashes_raw_value() {
        let store = StorageBackend::in_memory();
        let user = store
            .create_user(CreateUserRow {
                username: "alice".to_string(),
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                password_hash: None,
                admin: false,
            })
            .await
            .unwrap();

        let raw = "cdt_0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        store
            .create_api_token(CreateApiTokenRow {
                id: token_digest(raw),
                user_id: user.id,
                token_prefix: "cdt_01234567...".to_string(),
                expires_at: None,
            })
            .await
            .unwrap();

        let found = store.find_token(raw).await.unwrap().unwrap();
        assert_eq!(found.user_id, user.id);

        // The digest itself is not a usable token value
        assert!(store.find_token(&token_digest(raw)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_resource_through_trait_object() {
        let backend = StorageBackend::in_memory();
        let owner = backend
            .create_user(CreateUserRow {
                username: "owner".to_string(),
                name: "Owner".to_string(),
                email: "owner@example.com".to_string(),
                password_hash: None,
                admin: false,
            })
            .await
            .unwrap();
        let project = backend
            .create_project(CreateProjectRow {
                name: "infra".to_string(),
                owner_id: owner.id,
            })
            .await
            .unwrap();
        let repo = backend
            .create_resource(
                ResourceKind::Repository,
                CreateResourceRow {
                    project_id: project.id,
                    name: "playbooks".to_string(),
                    data: json!({"url": "git@example.com:ops/playbooks.git"}),
                },
            )
            .await
            .unwrap();

        let store: &dyn CredentialStore = &backend;
        assert!(store
            .find_resource(ResourceKind::Repository, repo.id, project.id)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_resource(ResourceKind::Repository, repo.id, project.id + 1)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_membership(owner.id, project.id)
            .await
            .unwrap()
            .is_some_and(|m| m.admin));
    }
}
