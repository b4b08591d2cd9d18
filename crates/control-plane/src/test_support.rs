// Helpers shared by unit and integration tests

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use conductor_storage::{
    ApiTokenRow, CredentialStore, ProjectMembership, ResourceKind, ResourceRow, StorageBackend,
    UserRow,
};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Credential store wrapper that counts lookups. `failing()` builds one whose
/// every lookup errors, to exercise store outages.
pub struct CountingStore {
    inner: Option<StorageBackend>,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: StorageBackend) -> Self {
        Self {
            inner: Some(inner),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            inner: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of lookups made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn backend(&self) -> Result<&StorageBackend> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .as_ref()
            .ok_or_else(|| anyhow!("credential store unavailable"))
    }
}

#[async_trait]
impl CredentialStore for CountingStore {
    async fn find_user_by_id(&self, user_id: i64) -> Result<Option<UserRow>> {
        self.backend()?.find_user_by_id(user_id).await
    }

    async fn find_membership(
        &self,
        user_id: i64,
        project_id: i64,
    ) -> Result<Option<ProjectMembership>> {
        self.backend()?.find_membership(user_id, project_id).await
    }

    async fn find_token(&self, token_value: &str) -> Result<Option<ApiTokenRow>> {
        self.backend()?.find_token(token_value).await
    }

    async fn find_resource(
        &self,
        kind: ResourceKind,
        id: i64,
        project_id: i64,
    ) -> Result<Option<ResourceRow>> {
        CredentialStore::find_resource(self.backend()?, kind, id, project_id).await
    }
}
