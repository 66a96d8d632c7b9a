//! Password storage and the bootstrap-user rules.
//!
//! Hashes are Argon2id PHC strings with a per-entry salt; the cost lives in
//! the string so it can be raised without invalidating old entries.
//! Registration is blocked once the first user exists.

use crate::core::store::models::User;
use crate::core::store::Store;
use crate::error::{Error, Result};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(password: &str) -> Result<String> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(Error::InvalidInput(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("hash password: {e}")))
}

pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| Error::Internal(format!("stored hash is malformed: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Create the bootstrap user. Rejected with `Conflict` once any user exists.
pub async fn register_user(store: &Store, username: &str, password: &str) -> Result<User> {
    if store.user_count().await? > 0 {
        return Err(Error::Conflict(
            "registration is closed: a user already exists".into(),
        ));
    }
    let hash = hash_password(password)?;
    store.create_user(username, &hash).await
}

pub async fn change_password(store: &Store, username: &str, password: &str) -> Result<()> {
    let hash = hash_password(password)?;
    store.update_user_password(username, &hash).await
}

/// Resolve a login attempt. The error does not reveal whether the username
/// or the password was wrong.
pub async fn verify_login(store: &Store, username: &str, password: &str) -> Result<User> {
    let user = match store.user_by_username(username).await {
        Ok(user) => user,
        Err(Error::NotFound(_)) => {
            return Err(Error::Unauthorized("invalid credentials".into()))
        }
        Err(e) => return Err(e),
    };

    if verify_password(password, &user.password_hash)? {
        Ok(user)
    } else {
        Err(Error::Unauthorized("invalid credentials".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse battery", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
    }

    #[test]
    fn salts_are_per_entry() {
        let a = hash_password("same password").unwrap();
        let b = hash_password("same password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(matches!(
            hash_password("short"),
            Err(Error::InvalidInput(_))
        ));
    }
}
