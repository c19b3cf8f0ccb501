//! Block ciphers of the historical container formats.
//!
//! Both legacy formats process data in 32-byte units:
//! * ≤ 103: Blowfish-ECB, each unit is four independent 8-byte blocks.
//! * 104/105: Rijndael with a 256-bit block and key, CBC over units.

use blowfish::cipher::generic_array::GenericArray;
use blowfish::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use blowfish::Blowfish;
use zeroize::Zeroizing;

use super::rijndael::Rijndael;
use super::CryptoError;
use crate::version::{Algorithm, BlockMode, CipherSuite, KeySchedule};

/// Legacy cipher unit; also the IV length and the header size granularity.
pub const UNIT: usize = 32;
/// Legacy key buffer length.  Longer passwords are truncated.
pub const KEY_BUF: usize = 32;
/// Appended to the password to form the Blowfish key.
pub const PASS_FOOTER: &[u8] = b"_AttacheCase-M.Hibara";

const BLOWFISH_BLOCK: usize = 8;

pub enum LegacyCipher {
    Blowfish(Box<Blowfish>),
    Rijndael { cipher: Rijndael, chain: [u8; UNIT] },
}

impl LegacyCipher {
    /// Cipher for a legacy format's suite.  `iv` seeds the CBC chain and is
    /// unused in ECB mode.
    pub fn for_suite(suite: CipherSuite, password: &[u8], iv: [u8; UNIT]) -> Result<Self, CryptoError> {
        match (suite.algorithm, suite.key_schedule, suite.block_mode) {
            (Algorithm::Blowfish, KeySchedule::PasswordWithFooter, BlockMode::Ecb) => {
                if suite.block_len != BLOWFISH_BLOCK {
                    return Err(CryptoError::InvalidBlockLength(suite.block_len));
                }
                Self::blowfish(password)
            }
            (Algorithm::Rijndael256, KeySchedule::ZeroPadded, BlockMode::Cbc) => {
                if suite.block_len != UNIT {
                    return Err(CryptoError::InvalidBlockLength(suite.block_len));
                }
                Self::rijndael(password, iv)
            }
            (algorithm, ..) => Err(CryptoError::NotLegacySuite(algorithm)),
        }
    }

    pub fn blowfish(password: &[u8]) -> Result<Self, CryptoError> {
        let key = blowfish_key(password);
        let cipher: Blowfish = Blowfish::new_from_slice(&key)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        Ok(LegacyCipher::Blowfish(Box::new(cipher)))
    }

    pub fn rijndael(password: &[u8], iv: [u8; UNIT]) -> Result<Self, CryptoError> {
        let key = rijndael_key(password);
        let cipher = Rijndael::new(key.as_ref(), UNIT)?;
        Ok(LegacyCipher::Rijndael { cipher, chain: iv })
    }

    /// Restart CBC with a new IV.  Blowfish-ECB has no chain.
    pub fn reset_chain(&mut self, iv: [u8; UNIT]) {
        if let LegacyCipher::Rijndael { chain, .. } = self {
            *chain = iv;
        }
    }

    pub fn encrypt_unit(&mut self, unit: &mut [u8; UNIT]) {
        match self {
            LegacyCipher::Blowfish(bf) => {
                for block in unit.chunks_exact_mut(BLOWFISH_BLOCK) {
                    bf.encrypt_block(GenericArray::from_mut_slice(block));
                }
            }
            LegacyCipher::Rijndael { cipher, chain } => {
                for (b, c) in unit.iter_mut().zip(chain.iter()) {
                    *b ^= c;
                }
                cipher.encrypt_block(unit);
                chain.copy_from_slice(unit);
            }
        }
    }

    pub fn decrypt_unit(&mut self, unit: &mut [u8; UNIT]) {
        match self {
            LegacyCipher::Blowfish(bf) => {
                for block in unit.chunks_exact_mut(BLOWFISH_BLOCK) {
                    bf.decrypt_block(GenericArray::from_mut_slice(block));
                }
            }
            LegacyCipher::Rijndael { cipher, chain } => {
                let saved = *unit;
                cipher.decrypt_block(unit);
                for (b, c) in unit.iter_mut().zip(chain.iter()) {
                    *b ^= c;
                }
                *chain = saved;
            }
        }
    }
}

impl std::fmt::Debug for LegacyCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegacyCipher::Blowfish(_)         => f.write_str("LegacyCipher::Blowfish"),
            LegacyCipher::Rijndael { .. }     => f.write_str("LegacyCipher::Rijndael"),
        }
    }
}

/// Password bytes up to the first NUL (at most 31), then [`PASS_FOOTER`].
pub fn blowfish_key(password: &[u8]) -> Zeroizing<Vec<u8>> {
    let window = &password[..password.len().min(KEY_BUF - 1)];
    let end = window.iter().position(|&b| b == 0).unwrap_or(window.len());
    let mut key = Zeroizing::new(Vec::with_capacity(end + PASS_FOOTER.len()));
    key.extend_from_slice(&window[..end]);
    key.extend_from_slice(PASS_FOOTER);
    key
}

/// Password truncated or zero padded to 32 bytes.
pub fn rijndael_key(password: &[u8]) -> Zeroizing<[u8; KEY_BUF]> {
    let mut key = Zeroizing::new([0u8; KEY_BUF]);
    let n = password.len().min(KEY_BUF);
    key[..n].copy_from_slice(&password[..n]);
    key
}
