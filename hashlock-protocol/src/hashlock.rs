// Hash-lock material for one swap: a random 32-byte secret and its
// SHA-256 digest. Both chains' escrow contracts verify SHA-256, so the
// digest computed here must match their on-chain check bit-for-bit.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const SECRET_LEN: usize = 32;

/// The secret/hash pair for one swap. The secret stays server-side until
/// it is revealed on the destination chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashLock {
    pub secret: [u8; SECRET_LEN],
    pub hash: [u8; SECRET_LEN],
}

/// Generates a fresh hash-lock pair from the OS CSPRNG.
pub fn generate() -> HashLock {
    let mut secret = [0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut secret);
    HashLock {
        secret,
        hash: hash_secret(&secret),
    }
}

/// SHA-256 of the secret. Pure; reproducible by destination-chain
/// verification logic.
pub fn hash_secret(secret: &[u8; SECRET_LEN]) -> [u8; SECRET_LEN] {
    Sha256::digest(secret).into()
}
