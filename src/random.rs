//! Source of random bytes for handshake keys and frame masks.
//!
//! The client never reaches for a process-wide generator; a [`RandomSource`]
//! is handed to it so tests can substitute a deterministic one.

use crate::error::Result;

/// Cryptographic-quality random byte source.
pub trait RandomSource: Send + Sync + std::fmt::Debug {
    /// Fill `dest` entirely with random bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Random`](crate::Error::Random) if the source is unavailable.
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()>;
}

/// Operating system randomness via `getrandom`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()> {
        getrandom::getrandom(dest)?;
        Ok(())
    }
}

/// Draw a fresh 4-byte masking key.
pub(crate) fn mask_key(random: &dyn RandomSource) -> Result<[u8; 4]> {
    let mut key = [0u8; 4];
    random.fill_bytes(&mut key)?;
    Ok(key)
}
