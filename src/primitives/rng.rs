//! Cryptographically secure random number generator.

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

/// Cryptographically secure random number generator.
///
/// A thin wrapper around `OsRng` so every consumer of entropy in the crate
/// (salts, verification tokens) draws from the same source.
pub struct SecureRng(OsRng);

impl SecureRng {
    /// Creates a new cryptographically secure random number generator.
    pub fn new() -> Self {
        Self(OsRng)
    }
}

impl Default for SecureRng {
    fn default() -> Self {
        Self::new()
    }
}

impl RngCore for SecureRng {
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.0.try_fill_bytes(dest)
    }
}

impl CryptoRng for SecureRng {}

/// Returns `len` random bytes, hex-encoded (so the string is `2 * len` long).
pub fn random_hex(len: usize) -> String {
    let mut buf = vec![0u8; len];
    SecureRng::new().fill_bytes(&mut buf);
    hex::encode(buf)
}
