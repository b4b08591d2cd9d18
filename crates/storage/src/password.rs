// Password hashing using Argon2id
// Decision: Default Argon2 parameters, PHC string format stored in users.password_hash
// Decision: Accounts without a stored hash can never log in with a password

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Hash a password using Argon2id. Empty passwords are refused.
pub fn hash_password(password: &str) -> Result<String> {
    if password.is_empty() {
        return Err(anyhow!("Password must not be empty"));
    }

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash password: {}", e))?;

    Ok(hash.to_string())
}

/// Check a login attempt against a user's stored hash.
///
/// Returns `Ok(false)` for a wrong password or a user without a password.
/// A stored hash that cannot be parsed is an error.
pub fn check_password(password: &str, stored_hash: Option<&str>) -> Result<bool> {
    let Some(stored_hash) = stored_hash else {
        return Ok(false);
    };

    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| anyhow!("Failed to parse password hash: {}", e))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_check() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(hash.starts_with("$argon2id$"));

        assert!(check_password("correct horse battery staple", Some(&hash)).unwrap());
        assert!(!check_password("Tr0ub4dor&3", Some(&hash)).unwrap());
    }

    #[test]
    fn test_salted() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_user_without_password() {
        assert!(!check_password("anything", None).unwrap());
    }

    #[test]
    fn test_empty_password_refused() {
        assert!(hash_password("").is_err());
    }

    #[test]
    fn test_corrupt_hash_is_error() {
        assert!(check_password("pw", Some("not-a-phc-string")).is_err());
    }
}
