// Session codec: seals a user id into a tamper-proof cookie value
// Decision: AES-256-GCM for confidentiality, HMAC-SHA256 over the whole value
// for integrity; the MAC is checked before anything is decrypted or parsed
// Decision: Without an encryption key the codec runs integrity-only and says so
// Decision: The issue time is part of the authenticated value so the server
// enforces the session lifetime, not just the browser
//
// Wire format (base64url, no padding):
//   mode(1) || issued_at(8, big endian unix seconds) || body || mac(32)
// body = nonce(12) || ciphertext   when mode = MODE_SEALED
// body = claims JSON               when mode = MODE_SIGNED

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "conductor_session";

const MODE_SIGNED: u8 = 0x00;
const MODE_SEALED: u8 = 0x01;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MAC_LEN: usize = 32;
const HEADER_LEN: usize = 1 + 8;

/// Tolerated clock skew for issue times slightly in the future
const CLOCK_SKEW_SECS: i64 = 60;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session value is malformed")]
    Malformed,
    #[error("session signature mismatch")]
    BadSignature,
    #[error("session protection mode does not match")]
    ModeMismatch,
    #[error("session expired")]
    Expired,
    #[error("session could not be decrypted")]
    Decrypt,
    #[error("session could not be encrypted")]
    Encrypt,
    #[error("session claims are invalid")]
    Claims,
    #[error("invalid session key: {0}")]
    InvalidKey(&'static str),
}

/// Identity carried by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub user_id: i64,
    /// Unix seconds
    pub issued_at: i64,
}

pub struct SessionCodec {
    cookie_name: String,
    hash_key: Vec<u8>,
    cipher: Option<Aes256Gcm>,
    max_age: Duration,
}

impl std::fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCodec")
            .field("cookie_name", &self.cookie_name)
            .field("encrypted", &self.is_encrypted())
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl SessionCodec {
    pub fn new(
        cookie_name: &str,
        hash_key: &[u8],
        encryption_key: Option<&[u8]>,
        max_age: Duration,
    ) -> Result<Self, SessionError> {
        if hash_key.is_empty() {
            return Err(SessionError::InvalidKey("hash key must not be empty"));
        }

        let cipher = match encryption_key {
            Some(key) => Some(
                Aes256Gcm::new_from_slice(key)
                    .map_err(|_| SessionError::InvalidKey("encryption key must be 32 bytes"))?,
            ),
            None => {
                tracing::warn!(
                    cookie = cookie_name,
                    "No session encryption key configured; session cookies are signed but not encrypted"
                );
                None
            }
        };

        Ok(Self {
            cookie_name: cookie_name.to_string(),
            hash_key: hash_key.to_vec(),
            cipher,
            max_age,
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Whether session values are encrypted (false: integrity-only)
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    fn mode(&self) -> u8 {
        if self.is_encrypted() {
            MODE_SEALED
        } else {
            MODE_SIGNED
        }
    }

    /// Seal a session for `user_id`, issued now
    pub fn seal(&self, user_id: i64) -> Result<String, SessionError> {
        self.seal_at(user_id, Utc::now().timestamp())
    }

    pub(crate) fn seal_at(&self, user_id: i64, issued_at: i64) -> Result<String, SessionError> {
        let claims = SessionClaims { user_id, issued_at };
        let plaintext = serde_json::to_vec(&claims).map_err(|_| SessionError::Claims)?;

        let mode = self.mode();
        let body = match &self.cipher {
            Some(cipher) => {
                let mut nonce = [0u8; NONCE_LEN];
                rand::thread_rng().fill_bytes(&mut nonce);
                let ciphertext = cipher
                    .encrypt(
                        Nonce::from_slice(&nonce),
                        Payload {
                            msg: &plaintext,
                            aad: self.cookie_name.as_bytes(),
                        },
                    )
                    .map_err(|_| SessionError::Encrypt)?;

                let mut body = Vec::with_capacity(NONCE_LEN + ciphertext.len());
                body.extend_from_slice(&nonce);
                body.extend_from_slice(&ciphertext);
                body
            }
            None => plaintext,
        };

        let issued = issued_at.to_be_bytes();
        let tag = self.mac(mode, &issued, &body)?.finalize().into_bytes();

        let mut value = Vec::with_capacity(HEADER_LEN + body.len() + MAC_LEN);
        value.push(mode);
        value.extend_from_slice(&issued);
        value.extend_from_slice(&body);
        value.extend_from_slice(&tag);
        Ok(URL_SAFE_NO_PAD.encode(value))
    }

    /// Open a session value. Any defect yields an error, never partial claims.
    pub fn open(&self, value: &str) -> Result<SessionClaims, SessionError> {
        self.open_at(value, Utc::now().timestamp())
    }

    pub(crate) fn open_at(&self, value: &str, now: i64) -> Result<SessionClaims, SessionError> {
        let raw = URL_SAFE_NO_PAD
            .decode(value.trim())
            .map_err(|_| SessionError::Malformed)?;
        if raw.len() < HEADER_LEN + MAC_LEN {
            return Err(SessionError::Malformed);
        }

        let (signed, tag) = raw.split_at(raw.len() - MAC_LEN);
        let mode = signed[0];
        let issued: [u8; 8] = signed[1..HEADER_LEN]
            .try_into()
            .map_err(|_| SessionError::Malformed)?;
        let body = &signed[HEADER_LEN..];

        self.mac(mode, &issued, body)?
            .verify_slice(tag)
            .map_err(|_| SessionError::BadSignature)?;

        if mode != self.mode() {
            return Err(SessionError::ModeMismatch);
        }

        let issued_at = i64::from_be_bytes(issued);
        let too_new = issued_at > now.saturating_add(CLOCK_SKEW_SECS);
        let too_old = now.saturating_sub(issued_at) > self.max_age.num_seconds();
        if too_new || too_old {
            return Err(SessionError::Expired);
        }

        let plaintext = match &self.cipher {
            Some(cipher) => {
                if body.len() < NONCE_LEN + TAG_LEN {
                    return Err(SessionError::Malformed);
                }
                let (nonce, ciphertext) = body.split_at(NONCE_LEN);
                cipher
                    .decrypt(
                        Nonce::from_slice(nonce),
                        Payload {
                            msg: ciphertext,
                            aad: self.cookie_name.as_bytes(),
                        },
                    )
                    .map_err(|_| SessionError::Decrypt)?
            }
            None => body.to_vec(),
        };

        let claims: SessionClaims =
            serde_json::from_slice(&plaintext).map_err(|_| SessionError::Claims)?;
        if claims.issued_at != issued_at {
            return Err(SessionError::Claims);
        }
        Ok(claims)
    }

    fn mac(&self, mode: u8, issued: &[u8], body: &[u8]) -> Result<HmacSha256, SessionError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.hash_key)
            .map_err(|_| SessionError::InvalidKey("hash key rejected"))?;
        mac.update(self.cookie_name.as_bytes());
        mac.update(&[mode]);
        mac.update(issued);
        mac.update(body);
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH_KEY: &[u8] = b"0123456789abcdef0123456789abcdef";
    const ENC_KEY: &[u8] = b"fedcba9876543210fedcba9876543210";

    fn sealed_codec() -> SessionCodec {
        SessionCodec::new(SESSION_COOKIE, HASH_KEY, Some(ENC_KEY), Duration::days(7)).unwrap()
    }

    fn signed_codec() -> SessionCodec {
        SessionCodec::new(SESSION_COOKIE, HASH_KEY, None, Duration::days(7)).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let codec = sealed_codec();
        assert!(codec.is_encrypted());
        for user_id in [1, 42, i64::MAX] {
            let value = codec.seal(user_id).unwrap();
            assert_eq!(codec.open(&value).unwrap().user_id, user_id);
        }
    }

    #[test]
    fn test_sealed_value_hides_claims() {
        let codec = sealed_codec();
        let value = codec.seal(424242).unwrap();
        let raw = URL_SAFE_NO_PAD.decode(&value).unwrap();
        let needle = b"424242";
        assert!(!raw.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_every_single_byte_flip_is_rejected() {
        for codec in [sealed_codec(), signed_codec()] {
            let raw = URL_SAFE_NO_PAD.decode(codec.seal(7).unwrap()).unwrap();
            for i in 0..raw.len() {
                for bit in [0x01u8, 0x80] {
                    let mut tampered = raw.clone();
                    tampered[i] ^= bit;
                    let value = URL_SAFE_NO_PAD.encode(&tampered);
                    assert!(
                        codec.open(&value).is_err(),
                        "flip of byte {} (mask {:#04x}) was accepted",
                        i,
                        bit
                    );
                }
            }
        }
    }

    #[test]
    fn test_truncated_and_garbage_values() {
        let codec = sealed_codec();
        let value = codec.seal(7).unwrap();
        assert!(codec.open(&value[..value.len() - 4]).is_err());
        assert_eq!(codec.open("").unwrap_err(), SessionError::Malformed);
        assert_eq!(codec.open("!!not-base64!!").unwrap_err(), SessionError::Malformed);
        assert_eq!(codec.open("AAAA").unwrap_err(), SessionError::Malformed);
    }

    #[test]
    fn test_integrity_only_round_trip() {
        let codec = signed_codec();
        assert!(!codec.is_encrypted());
        let value = codec.seal(9).unwrap();
        assert_eq!(codec.open(&value).unwrap().user_id, 9);
    }

    #[test]
    fn test_mode_mismatch_rejected_both_ways() {
        let sealed = sealed_codec();
        let signed = signed_codec();

        // Same MAC key, so only the mode check stands between them
        assert_eq!(
            signed.open(&sealed.seal(1).unwrap()).unwrap_err(),
            SessionError::ModeMismatch
        );
        assert_eq!(
            sealed.open(&signed.seal(1).unwrap()).unwrap_err(),
            SessionError::ModeMismatch
        );
    }

    #[test]
    fn test_other_keys_rejected() {
        let codec = sealed_codec();
        let other = SessionCodec::new(
            SESSION_COOKIE,
            b"another-hash-key-another-hash-key",
            Some(ENC_KEY),
            Duration::days(7),
        )
        .unwrap();
        assert_eq!(
            other.open(&codec.seal(1).unwrap()).unwrap_err(),
            SessionError::BadSignature
        );
    }

    #[test]
    fn test_cookie_name_is_bound() {
        let codec = sealed_codec();
        let renamed =
            SessionCodec::new("other_cookie", HASH_KEY, Some(ENC_KEY), Duration::days(7)).unwrap();
        assert!(renamed.open(&codec.seal(1).unwrap()).is_err());
    }

    #[test]
    fn test_expiry() {
        let codec = SessionCodec::new(SESSION_COOKIE, HASH_KEY, Some(ENC_KEY), Duration::hours(1))
            .unwrap();
        let now = Utc::now().timestamp();

        let fresh = codec.seal_at(5, now - 60).unwrap();
        assert_eq!(codec.open_at(&fresh, now).unwrap().user_id, 5);

        let stale = codec.seal_at(5, now - 3601).unwrap();
        assert_eq!(codec.open_at(&stale, now).unwrap_err(), SessionError::Expired);

        let future = codec.seal_at(5, now + 3600).unwrap();
        assert_eq!(codec.open_at(&future, now).unwrap_err(), SessionError::Expired);
    }

    #[test]
    fn test_invalid_keys() {
        assert!(SessionCodec::new(SESSION_COOKIE, b"", None, Duration::days(1)).is_err());
        assert!(
            SessionCodec::new(SESSION_COOKIE, HASH_KEY, Some(b"short"), Duration::days(1)).is_err()
        );
    }

    #[test]
    fn test_nonce_is_fresh() {
        let codec = sealed_codec();
        assert_ne!(codec.seal(1).unwrap(), codec.seal(1).unwrap());
    }
}
