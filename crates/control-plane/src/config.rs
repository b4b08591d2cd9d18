// Server configuration
// Decision: JSON config file, then environment overrides, validated once at startup
// Decision: Secrets are base64 (standard alphabet) encoded random bytes
// Decision: No database_url means the in-memory dev store
//
// The resulting AppConfig is immutable for the lifetime of the process and is
// shared behind an Arc.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Duration;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default session lifetime: 7 days
const DEFAULT_SESSION_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

/// Longest accepted session lifetime: 10 years
pub const MAX_SESSION_MAX_AGE_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Minimum decoded length of the session MAC key
pub const MIN_HASH_KEY_LEN: usize = 16;

/// Required decoded length of the session encryption key (AES-256)
pub const ENCRYPTION_KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid {field}: {reason}")]
    InvalidSecret { field: &'static str, reason: String },

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Account created at startup if no user with that username exists yet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdminConfig {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Socket address the HTTP server binds to
    pub listen: String,
    /// PostgreSQL connection string. Absent: in-memory store (dev mode)
    pub database_url: Option<String>,
    /// Session MAC key, base64
    pub cookie_hash: String,
    /// Session encryption key, base64. Absent: integrity-only sessions
    pub cookie_encryption: Option<String>,
    pub session_max_age_secs: u64,
    /// Mark the session cookie `Secure`
    pub cookie_secure: bool,
    pub admin: Option<AdminConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
            database_url: None,
            cookie_hash: String::new(),
            cookie_encryption: None,
            session_max_age_secs: DEFAULT_SESSION_MAX_AGE_SECS,
            cookie_secure: true,
            admin: None,
        }
    }
}

impl AppConfig {
    /// Load configuration: file (if given) or defaults, then environment
    /// overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                        path: path.to_path_buf(),
                        source,
                    })?;
                Self::from_json(&contents)?
            }
            None => Self::default(),
        };

        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Apply environment overrides using the given lookup function.
    ///
    /// `LISTEN_ADDR` wins over `PORT`. The admin account is only overridden when
    /// username, email and password are all set.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = var("PORT") {
            let port: u16 = port.trim().parse().map_err(|_| ConfigError::Invalid {
                field: "PORT",
                reason: format!("'{}' is not a port number", port),
            })?;
            self.listen = format!("0.0.0.0:{}", port);
        }
        if let Some(listen) = var("LISTEN_ADDR") {
            self.listen = listen;
        }
        if let Some(url) = var("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Some(hash) = var("CONDUCTOR_COOKIE_HASH") {
            self.cookie_hash = hash;
        }
        if let Some(encryption) = var("CONDUCTOR_COOKIE_ENCRYPTION") {
            self.cookie_encryption = Some(encryption);
        }
        if let Some(secure) = var("CONDUCTOR_COOKIE_SECURE") {
            self.cookie_secure = parse_bool("CONDUCTOR_COOKIE_SECURE", &secure)?;
        }
        if let Some(max_age) = var("CONDUCTOR_SESSION_MAX_AGE_SECS") {
            self.session_max_age_secs =
                max_age.trim().parse().map_err(|_| ConfigError::Invalid {
                    field: "CONDUCTOR_SESSION_MAX_AGE_SECS",
                    reason: format!("'{}' is not a number of seconds", max_age),
                })?;
        }

        if let (Some(username), Some(email), Some(password)) = (
            var("CONDUCTOR_ADMIN_USERNAME"),
            var("CONDUCTOR_ADMIN_EMAIL"),
            var("CONDUCTOR_ADMIN_PASSWORD"),
        ) {
            self.admin = Some(AdminConfig {
                username,
                email,
                password,
                name: var("CONDUCTOR_ADMIN_NAME"),
            });
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.hash_key()?;
        self.encryption_key()?;

        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Invalid {
                field: "listen",
                reason: format!("'{}' is not a socket address", self.listen),
            });
        }
        if self.session_max_age_secs == 0 || self.session_max_age_secs > MAX_SESSION_MAX_AGE_SECS {
            return Err(ConfigError::Invalid {
                field: "session_max_age_secs",
                reason: format!("must be between 1 and {}", MAX_SESSION_MAX_AGE_SECS),
            });
        }
        if let Some(admin) = &self.admin {
            if admin.username.trim().is_empty() || admin.password.is_empty() {
                return Err(ConfigError::Invalid {
                    field: "admin",
                    reason: "username and password are required".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Decoded session MAC key
    pub fn hash_key(&self) -> Result<Vec<u8>, ConfigError> {
        if self.cookie_hash.is_empty() {
            return Err(ConfigError::InvalidSecret {
                field: "cookie_hash",
                reason: "not set (generate one with --print-config)".to_string(),
            });
        }
        let key = decode_secret("cookie_hash", &self.cookie_hash)?;
        if key.len() < MIN_HASH_KEY_LEN {
            return Err(ConfigError::InvalidSecret {
                field: "cookie_hash",
                reason: format!(
                    "decodes to {} bytes, at least {} required",
                    key.len(),
                    MIN_HASH_KEY_LEN
                ),
            });
        }
        Ok(key)
    }

    /// Decoded session encryption key, if configured
    pub fn encryption_key(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        let Some(encoded) = self.cookie_encryption.as_deref().filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let key = decode_secret("cookie_encryption", encoded)?;
        if key.len() != ENCRYPTION_KEY_LEN {
            return Err(ConfigError::InvalidSecret {
                field: "cookie_encryption",
                reason: format!(
                    "decodes to {} bytes, exactly {} required",
                    key.len(),
                    ENCRYPTION_KEY_LEN
                ),
            });
        }
        Ok(Some(key))
    }

    /// Session lifetime, clamped to `MAX_SESSION_MAX_AGE_SECS`
    pub fn session_max_age(&self) -> Duration {
        let secs = self.session_max_age_secs.min(MAX_SESSION_MAX_AGE_SECS);
        Duration::seconds(i64::try_from(secs).unwrap_or(0))
    }

    /// A complete configuration with freshly generated secrets
    pub fn example() -> Self {
        Self {
            cookie_hash: generate_secret(32),
            cookie_encryption: Some(generate_secret(ENCRYPTION_KEY_LEN)),
            admin: Some(AdminConfig {
                username: "admin".to_string(),
                email: "admin@localhost".to_string(),
                password: "change-me".to_string(),
                name: Some("Administrator".to_string()),
            }),
            ..Self::default()
        }
    }
}

/// Generate `len` random bytes from the OS CSPRNG, base64 encoded
pub fn generate_secret(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

fn decode_secret(field: &'static str, encoded: &str) -> Result<Vec<u8>, ConfigError> {
    BASE64
        .decode(encoded.trim())
        .map_err(|e| ConfigError::InvalidSecret {
            field,
            reason: format!("not valid base64: {}", e),
        })
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            field,
            reason: format!("'{}' is not a boolean", other),
        }),
    }
}
