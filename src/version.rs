//! Container format versions and their cipher parameter bundles.
//!
//! The `data_version` field of the plain header selects exactly one
//! [`FormatVersion`].  Each variant carries a fixed [`CipherSuite`]; the
//! Unlocker dispatches on the variant once and never re-inspects the raw
//! version number.
//!
//! | data_version | sub_version | variant                  | cipher                     |
//! |--------------|-------------|--------------------------|----------------------------|
//! | ≤ 103        | n/a         | `LegacyBlowfish`         | Blowfish-ECB, zlib         |
//! | 104, 105     | < 6         | `LegacyRijndael`         | Rijndael-256/256-CBC, zlib |
//! | 104, 105     | ≥ 6         | `LegacyRijndaelGuarded`  | as above + attempt counter |
//! | 106          | any         | `Current`                | Argon2id + AES-256-GCM     |

use crate::error::{AtcError, Result};

/// Highest data version written with Blowfish.
pub const DATA_VERSION_BLOWFISH_MAX: i32 = 103;
pub const DATA_VERSION_RIJNDAEL_FIRST: i32 = 104;
pub const DATA_VERSION_RIJNDAEL: i32 = 105;
pub const DATA_VERSION_CURRENT: i32 = 106;

/// First sub-version whose plain header carries the attempt counter.
pub const SUB_VERSION_GUARDED: u8 = 6;

/// `algorithm` field values.
pub const ALGORITHM_BLOWFISH: i32 = 0;
pub const ALGORITHM_RIJNDAEL: i32 = 1;
pub const ALGORITHM_AES_GCM: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    /// AttacheCase 1.x containers.
    LegacyBlowfish,
    /// AttacheCase 2.x containers written before the attempt counter.
    LegacyRijndael,
    /// AttacheCase 2.70+ containers with a persisted attempt counter.
    LegacyRijndaelGuarded,
    /// Argon2id / AES-256-GCM chunked containers.
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Blowfish,
    Rijndael256,
    Aes256Gcm,
}

/// How the password becomes key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySchedule {
    /// Password bytes (up to the first NUL, max 31) + fixed footer.
    PasswordWithFooter,
    /// Password bytes truncated / zero padded to 32 bytes.
    ZeroPadded,
    /// Argon2id over the password, salted with the container id.
    Argon2id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    Ecb,
    Cbc,
    /// Per-chunk AEAD with position-derived nonces.
    ChunkedAead,
}

/// Parameter bundle of one format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSuite {
    pub algorithm:    Algorithm,
    pub key_schedule: KeySchedule,
    pub block_mode:   BlockMode,
    /// Cipher block (legacy) or AEAD chunk granularity in bytes.
    pub block_len:    usize,
}

impl FormatVersion {
    /// Resolve the on-disk version fields.  Anything this build cannot
    /// decode is `UnsupportedVersion`, never a wrong-key failure.
    pub fn detect(data_version: i32, sub_version: u8) -> Result<Self> {
        match data_version {
            v if v <= DATA_VERSION_BLOWFISH_MAX => Ok(FormatVersion::LegacyBlowfish),
            DATA_VERSION_RIJNDAEL_FIRST | DATA_VERSION_RIJNDAEL => {
                if sub_version >= SUB_VERSION_GUARDED {
                    Ok(FormatVersion::LegacyRijndaelGuarded)
                } else {
                    Ok(FormatVersion::LegacyRijndael)
                }
            }
            DATA_VERSION_CURRENT => Ok(FormatVersion::Current),
            other => Err(AtcError::UnsupportedVersion(other)),
        }
    }

    pub fn suite(self) -> CipherSuite {
        match self {
            FormatVersion::LegacyBlowfish => CipherSuite {
                algorithm:    Algorithm::Blowfish,
                key_schedule: KeySchedule::PasswordWithFooter,
                block_mode:   BlockMode::Ecb,
                block_len:    8,
            },
            FormatVersion::LegacyRijndael | FormatVersion::LegacyRijndaelGuarded => CipherSuite {
                algorithm:    Algorithm::Rijndael256,
                key_schedule: KeySchedule::ZeroPadded,
                block_mode:   BlockMode::Cbc,
                block_len:    32,
            },
            FormatVersion::Current => CipherSuite {
                algorithm:    Algorithm::Aes256Gcm,
                key_schedule: KeySchedule::Argon2id,
                block_mode:   BlockMode::ChunkedAead,
                block_len:    crate::block::CHUNK_SIZE,
            },
        }
    }

    /// `data_version` written by the Locker for this variant.
    pub fn data_version(self) -> i32 {
        match self {
            FormatVersion::LegacyBlowfish        => DATA_VERSION_BLOWFISH_MAX,
            FormatVersion::LegacyRijndael        => DATA_VERSION_RIJNDAEL_FIRST,
            FormatVersion::LegacyRijndaelGuarded => DATA_VERSION_RIJNDAEL,
            FormatVersion::Current               => DATA_VERSION_CURRENT,
        }
    }

    pub fn algorithm_id(self) -> i32 {
        match self.suite().algorithm {
            Algorithm::Blowfish    => ALGORITHM_BLOWFISH,
            Algorithm::Rijndael256 => ALGORITHM_RIJNDAEL,
            Algorithm::Aes256Gcm   => ALGORITHM_AES_GCM,
        }
    }

    /// True when bytes 2..4 of the plain header hold a live attempt counter.
    pub fn has_attempt_counter(self) -> bool {
        matches!(self, FormatVersion::LegacyRijndaelGuarded | FormatVersion::Current)
    }

    /// Versions the Locker can produce.
    pub fn is_writable(self) -> bool {
        matches!(self, FormatVersion::LegacyRijndaelGuarded | FormatVersion::Current)
    }

    pub fn name(self) -> &'static str {
        match self {
            FormatVersion::LegacyBlowfish        => "legacy-blowfish",
            FormatVersion::LegacyRijndael        => "legacy-rijndael",
            FormatVersion::LegacyRijndaelGuarded => "legacy-rijndael-guarded",
            FormatVersion::Current               => "aead",
        }
    }
}
