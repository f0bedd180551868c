//! Credential primitives: password hashing and secure randomness.

/// Password hashing and verification.
pub mod password;
/// Secure randomness and token generation.
pub mod rng;

pub use password::{hash_password, verify_password};
pub use rng::{random_hex, SecureRng};
