//! Key derivation and ciphers.
//!
//! Current containers: Argon2id(password, salt = container id) → master key,
//! split with BLAKE3 `derive_key` into a header key and a data key.  Both are
//! used with AES-256-GCM.
//!
//! Header payload:  AES-256-GCM, all-zero nonce, AAD = plain header bytes.
//! Data chunk:      AES-256-GCM, nonce = `entry u32 ‖ chunk u32 ‖ last u8 ‖ 000`.
//!
//! The header key encrypts exactly one message per container (the id is
//! fresh for every container), so the fixed nonce never repeats under a key.
//!
//! Legacy ciphers (Rijndael-256, Blowfish) live in [`legacy`].

pub mod legacy;
pub mod rijndael;

use aes_gcm::aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

pub const KEY_LEN:   usize = 32;
pub const NONCE_LEN: usize = 12;
/// GCM authentication tag appended to every ciphertext.
pub const TAG_LEN:   usize = 16;
pub const SALT_LEN:  usize = 16;

/// Upper bound on the Argon2 memory cost accepted from a container (1 GiB).
pub const MAX_MEM_COST_KIB: u32 = 1024 * 1024;
pub const MAX_TIME_COST:    u32 = 64;
pub const MAX_PARALLELISM:  u32 = 16;

const HEADER_KEY_CONTEXT: &str = "satchel 2024-06 container header key";
const DATA_KEY_CONTEXT:   &str = "satchel 2024-06 container data key";

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed: wrong key or corrupted data")]
    DecryptionFailed,
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("Invalid key length: {0} bytes")]
    InvalidKeyLength(usize),
    #[error("Invalid block length: {0} bytes")]
    InvalidBlockLength(usize),
    #[error("Cipher suite {0:?} has no unit cipher")]
    NotLegacySuite(crate::version::Algorithm),
}

// ── KDF parameters ───────────────────────────────────────────────────────────

/// Argon2id cost parameters, stored in the plain header of every current
/// container so the reader derives the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB (default 65536 = 64 MiB).
    pub mem_cost_kib: u32,
    /// Passes over memory (default 3).
    pub time_cost:    u32,
    /// Lanes (default 1).
    pub parallelism:  u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self { mem_cost_kib: 64 * 1024, time_cost: 3, parallelism: 1 }
    }
}

impl KdfParams {
    /// Cheap parameters for tests and benchmarks.  Never use for real data.
    pub fn insecure_fast() -> Self {
        Self { mem_cost_kib: 1024, time_cost: 1, parallelism: 1 }
    }

    /// Reject parameters read from an untrusted container that would make the
    /// reader allocate unbounded memory or spin for minutes.
    pub fn check_bounds(&self) -> Result<(), CryptoError> {
        if self.mem_cost_kib > MAX_MEM_COST_KIB
            || self.time_cost == 0
            || self.time_cost > MAX_TIME_COST
            || self.parallelism == 0
            || self.parallelism > MAX_PARALLELISM
        {
            return Err(CryptoError::KeyDerivation(format!(
                "parameters out of range: m={} KiB t={} p={}",
                self.mem_cost_kib, self.time_cost, self.parallelism
            )));
        }
        Ok(())
    }
}

// ── Session key ──────────────────────────────────────────────────────────────

/// Key material of one open session.  Zeroized on drop.
pub struct SessionKey {
    header: [u8; KEY_LEN],
    data:   [u8; KEY_LEN],
}

impl SessionKey {
    /// Run Argon2id and split the result into header and data keys.
    pub fn derive(password: &[u8], salt: &[u8; SALT_LEN], params: &KdfParams) -> Result<Self, CryptoError> {
        params.check_bounds()?;
        let argon_params = Params::new(
            params.mem_cost_kib,
            params.time_cost,
            params.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

        let mut master = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(password, salt, master.as_mut())
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        Ok(Self {
            header: blake3::derive_key(HEADER_KEY_CONTEXT, master.as_ref()),
            data:   blake3::derive_key(DATA_KEY_CONTEXT, master.as_ref()),
        })
    }

    /// Encrypt the serialised header.  Output is `ciphertext ‖ tag`.
    pub fn seal_header(&self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal(&self.header, &[0u8; NONCE_LEN], aad, plaintext)
    }

    /// Decrypt and authenticate the header.  A wrong password surfaces here
    /// as [`CryptoError::DecryptionFailed`].
    pub fn open_header(&self, aad: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        open(&self.header, &[0u8; NONCE_LEN], aad, ciphertext).map(Zeroizing::new)
    }

    pub fn seal_chunk(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal(&self.data, nonce, &[], plaintext)
    }

    pub fn open_chunk(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        open(&self.data, nonce, &[], ciphertext)
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.header.zeroize();
        self.data.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("header", &"[REDACTED]")
            .field("data", &"[REDACTED]")
            .finish()
    }
}

/// Nonce binding a data chunk to its position in the container.
///
/// The `last` flag stops truncation at a chunk boundary from going unnoticed.
pub fn chunk_nonce(entry: u32, chunk: u32, last: bool) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[0..4].copy_from_slice(&entry.to_le_bytes());
    nonce[4..8].copy_from_slice(&chunk.to_le_bytes());
    nonce[8] = last as u8;
    nonce
}

/// Fill `buf` from the OS CSPRNG.
pub fn fill_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

fn seal(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptionFailed)?;
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailed)
}

fn open(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::DecryptionFailed);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptionFailed)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptionFailed)
}
