// Application state shared by all routes
// Decision: Guards only reach storage through `credentials`; handlers use `store`

use conductor_storage::{CredentialStore, StorageBackend};
use std::sync::Arc;

use crate::auth::identity::IdentityResolver;
use crate::auth::session::{SessionCodec, SESSION_COOKIE};
use crate::config::{AppConfig, ConfigError};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: StorageBackend,
    pub credentials: Arc<dyn CredentialStore>,
    pub codec: Arc<SessionCodec>,
    pub resolver: Arc<IdentityResolver>,
}

impl AppState {
    /// Build state from a validated configuration.
    pub fn new(config: AppConfig, store: StorageBackend) -> Result<Self, ConfigError> {
        let hash_key = config.hash_key()?;
        let encryption_key = config.encryption_key()?;
        let codec = SessionCodec::new(
            SESSION_COOKIE,
            &hash_key,
            encryption_key.as_deref(),
            config.session_max_age(),
        )
        .map_err(|e| ConfigError::InvalidSecret {
            field: "cookie_encryption",
            reason: e.to_string(),
        })?;

        let credentials: Arc<dyn CredentialStore> = Arc::new(store.clone());
        Ok(Self::assemble(
            Arc::new(config),
            store,
            credentials,
            Arc::new(codec),
        ))
    }

    /// Replace the credential store seen by the guards (and the identity resolver)
    pub fn with_credentials(self, credentials: Arc<dyn CredentialStore>) -> Self {
        Self::assemble(self.config, self.store, credentials, self.codec)
    }

    fn assemble(
        config: Arc<AppConfig>,
        store: StorageBackend,
        credentials: Arc<dyn CredentialStore>,
        codec: Arc<SessionCodec>,
    ) -> Self {
        let resolver = Arc::new(IdentityResolver::new(codec.clone(), credentials.clone()));
        Self {
            config,
            store,
            credentials,
            codec,
            resolver,
        }
    }
}
