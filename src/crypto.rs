//! Password hashing for the local demo store.
//!
//! Demo credentials are local-only, but they are still hashed at rest with
//! Argon2id rather than stored in clear.

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use rand::rngs::OsRng;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
}

/// Hash a password into a PHC string.
pub(crate) fn hash_password(password: &str) -> Result<String, CryptoError> {
    let salt = SaltString::generate(&mut OsRng);

    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| CryptoError::Argon2(err.to_string()))?
        .to_string())
}

/// Check a password against a stored PHC string.
///
/// Any malformed hash counts as a mismatch.
pub(crate) fn verify_password(password: &str, phc: &str) -> bool {
    PasswordHash::new(phc).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}
