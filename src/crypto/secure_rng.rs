//! Cryptographically secure byte source for random passes.
//!
//! Random pass content must stay unpredictable: bytes are drawn fresh from
//! the OS CSPRNG for every chunk of every pass and are never persisted or
//! reused across passes or sessions. A recorded seed would make the written
//! data replayable and defeat the anti-forensic guarantee.

use crate::{WipeError, WipeResult};
use ring::rand::{SecureRandom, SystemRandom};

pub struct SecureRng {
    inner: SystemRandom,
}

impl SecureRng {
    pub fn new() -> Self {
        Self {
            inner: SystemRandom::new(),
        }
    }

    /// Fills `dest` with random bytes from the OS cryptographic RNG.
    pub fn fill(&self, dest: &mut [u8]) -> WipeResult<()> {
        self.inner
            .fill(dest)
            .map_err(|_| WipeError::DeviceIo("system entropy source failure".to_string()))
    }
}

impl Default for SecureRng {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_requested_length() {
        let rng = SecureRng::new();
        let mut buf = vec![0u8; 4096];
        rng.fill(&mut buf).unwrap();
        // A 4 KiB buffer of CSPRNG output is all-zero with probability 2^-32768
        assert!(buf.iter().any(|&b| b != 0));
    }

    #[test]
    fn successive_fills_differ() {
        let rng = SecureRng::new();
        let mut a = vec![0u8; 256];
        let mut b = vec![0u8; 256];
        rng.fill(&mut a).unwrap();
        rng.fill(&mut b).unwrap();
        assert_ne!(a, b);
    }
}
