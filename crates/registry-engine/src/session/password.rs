//! Registrar password hashing (argon2id).

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};

use crate::error::{FlowError, FlowResult};

/// Hash a registrar password with a random salt, returning a PHC string.
pub fn hash_password(password: &str) -> FlowResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| FlowError::Internal(format!("Password hashing failed: {e}")))
}

/// Check `password` against a stored hash. A malformed stored hash is an
/// internal error, not a failed login.
pub fn verify_password(password: &str, stored: &str) -> FlowResult<bool> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| FlowError::Internal(format!("Stored password hash is invalid: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
