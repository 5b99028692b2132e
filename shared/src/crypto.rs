//! Secure channel primitives: Diffie-Hellman agreement and the RC4 stream cipher
//!
//! The key exchange runs over a small fixed group (prime `0x7FFFFFC3`,
//! generator 3) so every public value fits the 32-bit seed fields of the
//! handshake messages. Each side runs two exchanges at once, one per traffic
//! direction, and keys an RC4 instance from `SALT || decimal(shared secret)`.

use rand::Rng;
use thiserror::Error;

/// Fixed prime modulus shared by both ends
pub const DH_PRIME: u64 = 0x7FFF_FFC3;
/// Fixed generator shared by both ends
pub const DH_GENERATOR: u64 = 3;
/// Prefix mixed into every derived cipher key
pub const SALT: &str = "DH";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("seed {0} is outside the key exchange group")]
    MalformedSeed(i64),
    #[error("cipher key must not be empty")]
    EmptyKey,
}

/// Computes `base^exp mod modulus`.
///
/// Operands stay below 2^31 so the u128 intermediate never overflows.
pub fn mod_pow(base: u64, mut exp: u64, modulus: u64) -> u64 {
    if modulus == 1 {
        return 0;
    }
    let m = modulus as u128;
    let mut result: u128 = 1;
    let mut b = (base as u128) % m;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result * b % m;
        }
        b = b * b % m;
        exp >>= 1;
    }
    result as u64
}

/// Checks that a seed received off the wire is a usable public value
pub fn validate_seed(seed: i64) -> Result<u64, CryptoError> {
    if seed < 1 || seed as u64 >= DH_PRIME {
        return Err(CryptoError::MalformedSeed(seed));
    }
    Ok(seed as u64)
}

/// One ephemeral secret and its public value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPair {
    secret: u64,
    public: u64,
}

impl KeyPair {
    /// Draws a fresh secret from `[0, i64::MAX)`.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::from_secret(rng.gen_range(0..i64::MAX as u64))
    }

    pub fn from_secret(secret: u64) -> Self {
        Self {
            secret,
            public: mod_pow(DH_GENERATOR, secret, DH_PRIME),
        }
    }

    pub fn public(&self) -> u64 {
        self.public
    }

    /// Shared secret against the peer's public value
    pub fn agree(&self, peer_public: u64) -> u64 {
        mod_pow(peer_public, self.secret, DH_PRIME)
    }
}

/// Key bytes for a cipher derived from a shared secret
pub fn derive_key(shared_secret: u64) -> Vec<u8> {
    format!("{}{}", SALT, shared_secret).into_bytes()
}

/// RC4 keystream generator.
///
/// Encryption and decryption are the same operation; each direction of a
/// session owns its own instance and the keystream position advances with
/// every byte processed.
#[derive(Clone)]
pub struct Rc4 {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.is_empty() {
            return Err(CryptoError::EmptyKey);
        }
        let mut s = [0u8; 256];
        for (i, slot) in s.iter_mut().enumerate() {
            *slot = i as u8;
        }
        let mut j: u8 = 0;
        for i in 0..256 {
            j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
            s.swap(i, j as usize);
        }
        Ok(Self { s, i: 0, j: 0 })
    }

    /// Keys a cipher straight from a shared secret
    pub fn from_shared_secret(shared_secret: u64) -> Result<Self, CryptoError> {
        Self::new(&derive_key(shared_secret))
    }

    /// XORs the keystream into `data` in place
    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.s[self.i as usize]);
            self.s.swap(self.i as usize, self.j as usize);
            let idx = self.s[self.i as usize].wrapping_add(self.s[self.j as usize]);
            *byte ^= self.s[idx as usize];
        }
    }
}

impl std::fmt::Debug for Rc4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rc4").finish_non_exhaustive()
    }
}
