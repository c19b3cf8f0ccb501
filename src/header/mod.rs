//! Encrypted header: the entry list plus session policy.
//!
//! Current containers serialise it in a compact binary layout (all LE):
//!
//! ```text
//! u32  entry_count
//! per entry:
//!   i32  attribute
//!   i64  size              (-1 = directory)
//!   u16  sjis_len,  [sjis_len]  regional name bytes
//!   u16  utf8_len,  [utf8_len]  UTF-8 name
//!   i64  create_time       Unix seconds
//!   i64  change_time       Unix seconds
//! u8   passwd_try_limit    configured budget (restored after success)
//! u8   self_destruction
//! u8   codec id
//! i64  created             Unix seconds
//! ```
//!
//! Legacy containers use the text layout in [`legacy`].

pub mod legacy;

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::codec::CodecId;
use crate::entry::FileEntry;
use crate::error::{AtcError, Result};

/// Smallest possible serialised entry (empty names).
const MIN_ENTRY_LEN: usize = 4 + 8 + 2 + 2 + 8 + 8;
const TRAILER_LEN:   usize = 1 + 1 + 1 + 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub entries:          Vec<FileEntry>,
    pub passwd_try_limit: u8,
    pub self_destruction: bool,
    pub codec:            CodecId,
    pub created:          i64,
}

impl Header {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.entries.len() * (MIN_ENTRY_LEN + 32) + TRAILER_LEN);
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for e in &self.entries {
            out.extend_from_slice(&e.attribute.to_le_bytes());
            out.extend_from_slice(&e.size.to_le_bytes());
            out.extend_from_slice(&(e.name_sjis.len() as u16).to_le_bytes());
            out.extend_from_slice(&e.name_sjis);
            out.extend_from_slice(&(e.name_utf8.len() as u16).to_le_bytes());
            out.extend_from_slice(e.name_utf8.as_bytes());
            out.extend_from_slice(&e.create_time.to_le_bytes());
            out.extend_from_slice(&e.change_time.to_le_bytes());
        }
        out.push(self.passwd_try_limit);
        out.push(self.self_destruction as u8);
        out.push(self.codec.as_u8());
        out.extend_from_slice(&self.created.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        let count = cur.read_u32::<LittleEndian>().map_err(broken)? as usize;
        if count > bytes.len() / MIN_ENTRY_LEN {
            return Err(AtcError::BrokenHeader(format!("entry count {count} exceeds header length")));
        }

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let attribute = cur.read_i32::<LittleEndian>().map_err(broken)?;
            let size = cur.read_i64::<LittleEndian>().map_err(broken)?;
            let name_sjis = read_prefixed(&mut cur)?;
            let name_utf8 = String::from_utf8(read_prefixed(&mut cur)?)
                .map_err(|_| AtcError::BrokenHeader("entry name is not UTF-8".into()))?;
            let create_time = cur.read_i64::<LittleEndian>().map_err(broken)?;
            let change_time = cur.read_i64::<LittleEndian>().map_err(broken)?;
            let entry = FileEntry { attribute, size, name_sjis, name_utf8, create_time, change_time };
            entry.validate().map_err(|e| AtcError::BrokenHeader(e.to_string()))?;
            entries.push(entry);
        }

        let passwd_try_limit = cur.read_u8().map_err(broken)?;
        let self_destruction = cur.read_u8().map_err(broken)? != 0;
        let codec = CodecId::from_u8(cur.read_u8().map_err(broken)?)
            .map_err(|e| AtcError::BrokenHeader(e.to_string()))?;
        let created = cur.read_i64::<LittleEndian>().map_err(broken)?;

        if cur.position() as usize != bytes.len() {
            return Err(AtcError::BrokenHeader("trailing bytes after header".into()));
        }
        Ok(Self { entries, passwd_try_limit, self_destruction, codec, created })
    }
}

fn read_prefixed(cur: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let len = cur.read_u16::<LittleEndian>().map_err(broken)? as usize;
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf).map_err(broken)?;
    Ok(buf)
}

fn broken(_: std::io::Error) -> AtcError {
    AtcError::BrokenHeader("header ends early".into())
}
