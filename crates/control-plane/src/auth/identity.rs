// Identity resolution: which user (if any) is making this request
// Decision: Session cookie first, API token second; a valid cookie means the
// token header is never looked at
// Decision: A cookie that fails to open falls through to the token header
// Decision: Malformed tokens are refused before touching the store

use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;
use chrono::Utc;
use conductor_storage::CredentialStore;
use std::sync::Arc;

use super::api_token::{bearer_token, is_valid_token_format};
use super::session::SessionCodec;

/// How the request proved its identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Session,
    ApiToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    User { user_id: i64, method: AuthMethod },
    Anonymous,
}

pub struct IdentityResolver {
    codec: Arc<SessionCodec>,
    store: Arc<dyn CredentialStore>,
}

impl IdentityResolver {
    pub fn new(codec: Arc<SessionCodec>, store: Arc<dyn CredentialStore>) -> Self {
        Self { codec, store }
    }

    /// Resolve the request's identity from its headers.
    ///
    /// Credentials that do not check out resolve to `Anonymous`. Only a failing
    /// store is an error.
    pub async fn resolve(&self, headers: &HeaderMap) -> anyhow::Result<Identity> {
        let jar = CookieJar::from_headers(headers);
        if let Some(cookie) = jar.get(self.codec.cookie_name()) {
            match self.codec.open(cookie.value()) {
                Ok(claims) => {
                    return Ok(Identity::User {
                        user_id: claims.user_id,
                        method: AuthMethod::Session,
                    });
                }
                Err(e) => tracing::debug!(reason = %e, "Ignoring invalid session cookie"),
            }
        }

        let Some(token) = bearer_token(headers) else {
            return Ok(Identity::Anonymous);
        };
        if !is_valid_token_format(token) {
            tracing::debug!("Ignoring malformed API token");
            return Ok(Identity::Anonymous);
        }

        let Some(row) = self.store.find_token(token).await? else {
            tracing::debug!("Unknown API token");
            return Ok(Identity::Anonymous);
        };
        if !row.is_active_at(Utc::now()) {
            tracing::debug!(user_id = row.user_id, expired = row.expired, "Inactive API token");
            return Ok(Identity::Anonymous);
        }

        Ok(Identity::User {
            user_id: row.user_id,
            method: AuthMethod::ApiToken,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::api_token::generate_api_token;
    use crate::auth::session::SESSION_COOKIE;
    use crate::test_support::CountingStore;
    use axum::http::{header, HeaderValue};
    use chrono::Duration;
    use conductor_storage::{CreateApiTokenRow, CreateUserRow, StorageBackend};

    fn codec() -> Arc<SessionCodec> {
        Arc::new(
            SessionCodec::new(
                SESSION_COOKIE,
                b"0123456789abcdef0123456789abcdef",
                Some(b"fedcba9876543210fedcba9876543210"),
                Duration::days(7),
            )
            .unwrap(),
        )
    }

    async fn user(store: &StorageBackend, username: &str) -> i64 {
        store
            .create_user(CreateUserRow {
                username: username.to_string(),
                name: username.to_string(),
                email: format!("{}@example.com", username),
                password_hash: None,
                admin: false,
            })
            .await
            .unwrap()
            .id
    }

    async fn token_for(
        store: &StorageBackend,
        user_id: i64,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> String {
        let generated = generate_api_token();
        store
            .create_api_token(CreateApiTokenRow {
                id: generated.digest,
                user_id,
                token_prefix: generated.display_prefix,
                expires_at,
            })
            .await
            .unwrap();
        generated.token
    }

    fn headers(cookie: Option<&str>, bearer: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = cookie {
            headers.insert(
                header::COOKIE,
                HeaderValue::from_str(&format!("{}={}", SESSION_COOKIE, cookie)).unwrap(),
            );
        }
        if let Some(token) = bearer {
            headers.insert(
                header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
            );
        }
        headers
    }

    #[tokio::test]
    async fn test_cookie_wins_over_token() {
        let backend = StorageBackend::in_memory();
        let alice = user(&backend, "alice").await;
        let bob = user(&backend, "bob").await;
        let bobs_token = token_for(&backend, bob, None).await;

        let store = Arc::new(CountingStore::new(backend));
        let codec = codec();
        let resolver = IdentityResolver::new(codec.clone(), store.clone());

        let cookie = codec.seal(alice).unwrap();
        let identity = resolver
            .resolve(&headers(Some(&cookie), Some(&bobs_token)))
            .await
            .unwrap();

        assert_eq!(
            identity,
            Identity::User {
                user_id: alice,
                method: AuthMethod::Session
            }
        );
        assert_eq!(store.calls(), 0, "token must not be looked up");
    }

    #[tokio::test]
    async fn test_token_used_when_cookie_invalid() {
        let backend = StorageBackend::in_memory();
        let bob = user(&backend, "bob").await;
        let token = token_for(&backend, bob, None).await;
        let resolver = IdentityResolver::new(codec(), Arc::new(backend));

        let identity = resolver
            .resolve(&headers(Some("garbage"), Some(&token)))
            .await
            .unwrap();
        assert_eq!(
            identity,
            Identity::User {
                user_id: bob,
                method: AuthMethod::ApiToken
            }
        );
    }

    #[tokio::test]
    async fn test_expired_and_revoked_tokens_are_anonymous() {
        let backend = StorageBackend::in_memory();
        let bob = user(&backend, "bob").await;

        let expired = token_for(&backend, bob, Some(Utc::now() - Duration::minutes(1))).await;
        let revoked = token_for(&backend, bob, None).await;
        let revoked_id = conductor_storage::credentials::token_digest(&revoked);
        assert!(backend.expire_api_token(&revoked_id, bob).await.unwrap());

        let resolver = IdentityResolver::new(codec(), Arc::new(backend));
        for token in [expired, revoked] {
            let identity = resolver.resolve(&headers(None, Some(&token))).await.unwrap();
            assert_eq!(identity, Identity::Anonymous);
        }
    }

    #[tokio::test]
    async fn test_malformed_token_skips_store() {
        let store = Arc::new(CountingStore::new(StorageBackend::in_memory()));
        let resolver = IdentityResolver::new(codec(), store.clone());

        for token in ["nope", "cdt_1234", "eyJhbGciOiJIUzI1NiJ9.e30.sig"] {
            let identity = resolver.resolve(&headers(None, Some(token))).await.unwrap();
            assert_eq!(identity, Identity::Anonymous);
        }
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_token_is_anonymous() {
        let resolver = IdentityResolver::new(codec(), Arc::new(StorageBackend::in_memory()));
        let token = generate_api_token().token;
        let identity = resolver.resolve(&headers(None, Some(&token))).await.unwrap();
        assert_eq!(identity, Identity::Anonymous);
    }

    #[tokio::test]
    async fn test_store_failure_is_error() {
        let store = Arc::new(CountingStore::failing());
        let resolver = IdentityResolver::new(codec(), store);
        let token = generate_api_token().token;
        assert!(resolver.resolve(&headers(None, Some(&token))).await.is_err());
    }

    #[tokio::test]
    async fn test_no_credentials() {
        let store = Arc::new(CountingStore::new(StorageBackend::in_memory()));
        let resolver = IdentityResolver::new(codec(), store.clone());
        assert_eq!(
            resolver.resolve(&HeaderMap::new()).await.unwrap(),
            Identity::Anonymous
        );
        assert_eq!(store.calls(), 0);
    }
}
