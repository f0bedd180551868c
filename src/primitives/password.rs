//! Password hashing and verification.
//!
//! Hashes are argon2id PHC strings produced with a fixed, deliberately low
//! work factor. Verification reads the parameters back out of the stored
//! string, so raising the cost later keeps old hashes verifiable.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};

use super::SecureRng;
use crate::{Error, Result};

/// Memory cost in KiB.
const MEMORY_COST_KIB: u32 = 4096;
/// Number of passes.
const TIME_COST: u32 = 1;
/// Degree of parallelism.
const PARALLELISM: u32 = 1;

fn hasher() -> Result<Argon2<'static>> {
    let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, None)
        .map_err(|e| Error::PasswordHash(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hashes a plain-text password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut SecureRng::new());

    hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::PasswordHash(e.to_string()))
}

/// Checks a plain-text password against a stored hash.
///
/// Returns `Ok(false)` on a mismatch; `Err` only when the stored hash cannot
/// be parsed or verification itself fails.
pub fn verify_password(stored_hash: &str, password: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash).map_err(|e| Error::PasswordHash(e.to_string()))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(Error::PasswordHash(e.to_string())),
    }
}
