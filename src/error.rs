//! Outcome vocabulary shared by the Locker and the Unlocker.
//!
//! Every expected failure is a variant of [`AtcError`]; nothing in the engine
//! panics on bad input, a wrong password or a broken stream.

use std::io;
use thiserror::Error;

use crate::codec::CodecError;
use crate::crypto::CryptoError;

pub type Result<T> = std::result::Result<T, AtcError>;

#[derive(Error, Debug)]
pub enum AtcError {
    /// Header authentication failed.  `remaining` is the persisted attempt
    /// budget after this failure, or `None` for formats without a counter.
    #[error("Wrong password{}", attempts_suffix(.remaining))]
    WrongKey { remaining: Option<u8> },

    /// The stream carries no container token (plain file).
    #[error("Not an encrypted container")]
    NotAContainer,

    #[error("Invalid file entry: {0}")]
    InvalidEntry(String),

    #[error("Invalid locker option: {0}")]
    InvalidOption(String),

    /// The header decrypted but could not be parsed.
    #[error("Broken header: {0}")]
    BrokenHeader(String),

    #[error("Unsupported data version: {0}")]
    UnsupportedVersion(i32),

    /// The container was destroyed after its attempt budget ran out.
    #[error("Container destroyed after too many wrong passwords")]
    SelfDestructed,

    /// A session operation was called in the wrong order.
    #[error("Out of order: {0}")]
    OutOfOrder(String),

    #[error("Size mismatch: declared {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// File data failed authentication or decompression.
    #[error("Corrupted file data: {0}")]
    Corrupted(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn attempts_suffix(remaining: &Option<u8>) -> String {
    match remaining {
        Some(1) => " (1 attempt left)".to_string(),
        Some(n) => format!(" ({n} attempts left)"),
        None    => String::new(),
    }
}

impl From<CryptoError> for AtcError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::KeyDerivation(msg) => AtcError::KeyDerivation(msg),
            other                           => AtcError::Corrupted(other.to_string()),
        }
    }
}
