//! Chunk framing for current-format file data.
//!
//! Every non-directory entry is split into `CHUNK_SIZE` pieces (an empty
//! entry still yields one empty chunk so its end is authenticated).  Each
//! chunk is written as:
//!
//! ```text
//! u32 LE   frame_len
//! [frame_len] AES-256-GCM( flag u8 ‖ payload ) ‖ tag
//! ```
//!
//! `flag` is [`FLAG_STORED`] or [`FLAG_COMPRESSED`].  The nonce is derived
//! from the entry ordinal, the chunk ordinal and a last-chunk marker, so
//! frames cannot be reordered, moved between entries or dropped from the
//! end without failing authentication.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use zeroize::Zeroizing;

use crate::codec::{Codec, CodecId};
use crate::crypto::{chunk_nonce, SessionKey, TAG_LEN};
use crate::error::{AtcError, Result};

/// Plaintext bytes per chunk: 64 KiB.
pub const CHUNK_SIZE: usize = 64 * 1024;

pub const FLAG_STORED:     u8 = 0;
pub const FLAG_COMPRESSED: u8 = 1;

/// Largest frame a well-formed container can contain.
pub const MAX_FRAME_LEN: usize = 1 + CHUNK_SIZE + TAG_LEN;
const MIN_FRAME_LEN: usize = 1 + TAG_LEN;

/// Number of chunks an entry of `size` bytes is written as.
pub fn chunk_count(size: u64) -> u64 {
    size.div_ceil(CHUNK_SIZE as u64).max(1)
}

/// Position of one chunk inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPos {
    pub entry: u32,
    pub chunk: u32,
    pub last:  bool,
}

/// Compress (when it helps), encrypt and write one chunk.  Returns the number
/// of bytes written including the length prefix.
pub fn write_chunk<W: Write>(
    mut writer: W,
    key:        &SessionKey,
    codec:      &dyn Codec,
    level:      i32,
    pos:        ChunkPos,
    data:       &[u8],
) -> Result<u64> {
    debug_assert!(data.len() <= CHUNK_SIZE);

    let mut plaintext = Zeroizing::new(Vec::with_capacity(1 + data.len()));
    let packed = match codec.codec_id() {
        CodecId::None => None,
        _ if data.is_empty() => None,
        _ => Some(Zeroizing::new(codec.compress(data, level)?)),
    };
    match packed {
        Some(p) if p.len() < data.len() => {
            plaintext.push(FLAG_COMPRESSED);
            plaintext.extend_from_slice(&p);
        }
        _ => {
            plaintext.push(FLAG_STORED);
            plaintext.extend_from_slice(data);
        }
    }

    let sealed = key.seal_chunk(&chunk_nonce(pos.entry, pos.chunk, pos.last), &plaintext)?;
    writer.write_u32::<LittleEndian>(sealed.len() as u32)?;
    writer.write_all(&sealed)?;
    Ok(4 + sealed.len() as u64)
}

/// Read, authenticate and decompress one chunk of exactly `expected_len`
/// plaintext bytes.
pub fn read_chunk<R: Read>(
    mut reader:   R,
    key:          &SessionKey,
    codec:        &dyn Codec,
    pos:          ChunkPos,
    expected_len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let frame_len = reader.read_u32::<LittleEndian>().map_err(truncated(pos))? as usize;
    if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&frame_len) {
        return Err(AtcError::Corrupted(format!(
            "chunk {} of entry {} has invalid frame length {frame_len}", pos.chunk, pos.entry
        )));
    }
    let mut frame = vec![0u8; frame_len];
    reader.read_exact(&mut frame).map_err(truncated(pos))?;

    let plaintext = Zeroizing::new(
        key.open_chunk(&chunk_nonce(pos.entry, pos.chunk, pos.last), &frame)
            .map_err(|_| AtcError::Corrupted(format!(
                "chunk {} of entry {} failed authentication", pos.chunk, pos.entry
            )))?,
    );

    let (flag, payload) = plaintext.split_first()
        .ok_or_else(|| AtcError::Corrupted("empty chunk frame".into()))?;
    let data = match *flag {
        FLAG_STORED     => Zeroizing::new(payload.to_vec()),
        FLAG_COMPRESSED => Zeroizing::new(codec.decompress(payload, expected_len)?),
        other => {
            return Err(AtcError::Corrupted(format!("unknown chunk flag {other:#04x}")));
        }
    };
    if data.len() != expected_len {
        return Err(AtcError::Corrupted(format!(
            "chunk {} of entry {} holds {} bytes, expected {expected_len}",
            pos.chunk, pos.entry, data.len()
        )));
    }
    Ok(data)
}

fn truncated(pos: ChunkPos) -> impl Fn(std::io::Error) -> AtcError {
    move |e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            AtcError::Corrupted(format!("data ends inside chunk {} of entry {}", pos.chunk, pos.entry))
        } else {
            AtcError::Io(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::get_codec;
    use crate::crypto::KdfParams;
    use std::io::Cursor;

    fn key() -> SessionKey {
        SessionKey::derive(b"pw", &[1u8; 16], &KdfParams::insecure_fast()).unwrap()
    }

    const POS: ChunkPos = ChunkPos { entry: 0, chunk: 0, last: true };

    #[test]
    fn chunk_counts() {
        assert_eq!(chunk_count(0), 1);
        assert_eq!(chunk_count(1), 1);
        assert_eq!(chunk_count(CHUNK_SIZE as u64), 1);
        assert_eq!(chunk_count(CHUNK_SIZE as u64 + 1), 2);
    }

    #[test]
    fn compressible_chunk_shrinks() {
        let k = key();
        let zstd = get_codec(CodecId::Zstd);
        let data = vec![b'z'; CHUNK_SIZE];
        let mut buf = Vec::new();
        let written = write_chunk(&mut buf, &k, zstd.as_ref(), 3, POS, &data).unwrap();
        assert_eq!(written as usize, buf.len());
        assert!(buf.len() < data.len() / 10);

        let out = read_chunk(Cursor::new(&buf), &k, zstd.as_ref(), POS, data.len()).unwrap();
        assert_eq!(out.as_slice(), data.as_slice());
    }

    #[test]
    fn incompressible_chunk_is_stored() {
        let k = key();
        let zstd = get_codec(CodecId::Zstd);
        let data: Vec<u8> = (0..4096u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        let mut buf = Vec::new();
        write_chunk(&mut buf, &k, zstd.as_ref(), 3, POS, &data).unwrap();
        assert!(buf.len() <= 4 + 1 + data.len() + TAG_LEN);
        let out = read_chunk(Cursor::new(&buf), &k, zstd.as_ref(), POS, data.len()).unwrap();
        assert_eq!(out.as_slice(), data.as_slice());
    }

    #[test]
    fn moved_chunk_fails_authentication() {
        let k = key();
        let none = get_codec(CodecId::None);
        let mut buf = Vec::new();
        write_chunk(&mut buf, &k, none.as_ref(), 0, POS, b"abc").unwrap();
        let elsewhere = ChunkPos { entry: 1, ..POS };
        assert!(matches!(
            read_chunk(Cursor::new(&buf), &k, none.as_ref(), elsewhere, 3),
            Err(AtcError::Corrupted(_))
        ));
    }

    #[test]
    fn truncated_frame_is_corruption() {
        let k = key();
        let none = get_codec(CodecId::None);
        let mut buf = Vec::new();
        write_chunk(&mut buf, &k, none.as_ref(), 0, POS, b"abcdef").unwrap();
        buf.truncate(buf.len() - 3);
        assert!(matches!(
            read_chunk(Cursor::new(&buf), &k, none.as_ref(), POS, 6),
            Err(AtcError::Corrupted(_))
        ));
    }
}
