// API tokens for programmatic access
// Decision: Tokens are prefixed with "cdt_" for identification
// Decision: Full token is shown only once at creation; the store keeps its SHA-256 digest

use axum::http::{header, HeaderMap};
use conductor_storage::credentials::token_digest;
use rand::Rng;

/// API token prefix for identification
pub const TOKEN_PREFIX: &str = "cdt_";
const TOKEN_BYTES: usize = 32; // 32 random bytes = 64 hex chars

/// Generated API token (full value shown only at creation)
#[derive(Debug)]
pub struct GeneratedApiToken {
    /// Full token (cdt_<random>)
    pub token: String,
    /// SHA-256 digest, used as the stored token id
    pub digest: String,
    /// Prefix for display (e.g., "cdt_abc12345...")
    pub display_prefix: String,
}

/// Generate a new API token
pub fn generate_api_token() -> GeneratedApiToken {
    let random_bytes: [u8; TOKEN_BYTES] = rand::thread_rng().gen();
    let random_hex = hex::encode(random_bytes);

    let token = format!("{}{}", TOKEN_PREFIX, random_hex);
    let digest = token_digest(&token);
    let display_prefix = format!("{}{}...", TOKEN_PREFIX, &random_hex[..8]);

    GeneratedApiToken {
        token,
        digest,
        display_prefix,
    }
}

/// Check token shape before any lookup: prefix plus 64 lowercase hex chars
pub fn is_valid_token_format(token: &str) -> bool {
    let Some(random_part) = token.strip_prefix(TOKEN_PREFIX) else {
        return false;
    };

    random_part.len() == TOKEN_BYTES * 2
        && random_part
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Raw value of an `Authorization: Bearer <token>` header, if present
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_generate_api_token() {
        let generated = generate_api_token();

        assert!(generated.token.starts_with(TOKEN_PREFIX));
        assert!(is_valid_token_format(&generated.token));
        assert_eq!(generated.digest, token_digest(&generated.token));
        assert!(generated.display_prefix.ends_with("..."));
        assert!(generated.token.starts_with(generated.display_prefix.trim_end_matches("...")));
    }

    #[test]
    fn test_generated_tokens_differ() {
        assert_ne!(generate_api_token().token, generate_api_token().token);
    }

    #[test]
    fn test_token_format() {
        let valid = format!("cdt_{}", "ab".repeat(32));
        assert!(is_valid_token_format(&valid));

        assert!(!is_valid_token_format(""));
        assert!(!is_valid_token_format("cdt_"));
        assert!(!is_valid_token_format(&format!("evr_{}", "ab".repeat(32))));
        assert!(!is_valid_token_format(&format!("cdt_{}", "ab".repeat(31))));
        assert!(!is_valid_token_format(&format!("cdt_{}", "AB".repeat(32))));
        assert!(!is_valid_token_format(&format!("cdt_{}", "zz".repeat(32))));
        assert!(!is_valid_token_format(&format!("cdt_{}a", "ab".repeat(32))));
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer cdt_abc"));
        assert_eq!(bearer_token(&headers), Some("cdt_abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer cdt_abc"));
        assert_eq!(bearer_token(&headers), Some("cdt_abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwdw=="));
        assert_eq!(bearer_token(&headers), None);
    }
}
