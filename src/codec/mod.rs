//! Chunk codec registry for current-format containers.
//!
//! The codec is chosen once per container and recorded as a single byte in
//! the encrypted header.  A chunk whose compressed form is not smaller than
//! its plaintext is stored raw regardless of the container codec (see
//! `block.rs`), so `None` only matters as an explicit user choice.
//!
//! Legacy containers always use one zlib stream and never touch this module.

use std::io;
use thiserror::Error;

// ── Codec ids ────────────────────────────────────────────────────────────────

/// On-disk codec discriminant.  Values are permanent; never reuse one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CodecId {
    None = 0,
    Zstd = 1,
}

/// Default Zstd compression level.
pub const DEFAULT_LEVEL: i32 = 3;

impl CodecId {
    pub fn from_u8(v: u8) -> Result<Self, CodecError> {
        match v {
            0 => Ok(CodecId::None),
            1 => Ok(CodecId::Zstd),
            other => Err(CodecError::UnknownCodec(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable name (diagnostics only).
    pub fn name(self) -> &'static str {
        match self {
            CodecId::None => "none",
            CodecId::Zstd => "zstd",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(CodecId::None),
            "zstd" => Some(CodecId::Zstd),
            _      => None,
        }
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("Unknown codec id {0}")]
    UnknownCodec(u8),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn codec_id(&self) -> CodecId;
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError>;
    /// Decompress, refusing output larger than `max_len`.
    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Vec<u8>, CodecError>;
}

// ── Built-in codec implementations ──────────────────────────────────────────

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn codec_id(&self) -> CodecId { CodecId::None }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Vec<u8>, CodecError> {
        if data.len() > max_len {
            return Err(CodecError::Decompression(format!(
                "stored payload of {} bytes exceeds limit {max_len}", data.len()
            )));
        }
        Ok(data.to_vec())
    }
}

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn codec_id(&self) -> CodecId { CodecId::Zstd }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        zstd::bulk::compress(data, level).map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8], max_len: usize) -> Result<Vec<u8>, CodecError> {
        zstd::bulk::decompress(data, max_len).map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a CodecId to a built-in codec.
pub fn get_codec(id: CodecId) -> Box<dyn Codec> {
    match id {
        CodecId::None => Box::new(NoneCodec),
        CodecId::Zstd => Box::new(ZstdCodec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable() {
        assert_eq!(CodecId::from_u8(0).unwrap(), CodecId::None);
        assert_eq!(CodecId::from_u8(1).unwrap(), CodecId::Zstd);
        assert!(matches!(CodecId::from_u8(9), Err(CodecError::UnknownCodec(9))));
        assert_eq!(CodecId::from_name("ZSTD"), Some(CodecId::Zstd));
    }

    #[test]
    fn zstd_respects_output_limit() {
        let data = vec![b'a'; 10_000];
        let codec = get_codec(CodecId::Zstd);
        let packed = codec.compress(&data, DEFAULT_LEVEL).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(codec.decompress(&packed, data.len()).unwrap(), data);
        assert!(codec.decompress(&packed, 100).is_err());
    }
}
