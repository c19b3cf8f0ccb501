//! Plain (unencrypted) container header.
//!
//! Every container starts with a 24-byte prefix:
//!
//! ```text
//!  0  u8     sub_version        (≤103: bytes 0..4 are the i32 header size)
//!  1  u8     reserved
//!  2  u8     passwd_try_limit   remaining attempts, rewritten in place
//!  3  u8     self_destruction
//!  4  [16]   token              "_AttacheCaseData" / "_Atc_Broken_Data"
//! 20  i32    data_version
//! ```
//!
//! What follows depends on the version; see [`CurrentPlain`] and
//! [`LegacyPlain`].  A container may also be embedded at the end of a larger
//! file (self-extracting variant) whose last 8 bytes hold the container
//! length as an `i64`.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::debug;
use uuid::Uuid;

use crate::crypto::legacy::UNIT;
use crate::crypto::KdfParams;
use crate::error::{AtcError, Result};
use crate::version::{FormatVersion, ALGORITHM_AES_GCM, DATA_VERSION_CURRENT, SUB_VERSION_GUARDED};

pub const TOKEN:        &[u8; 16] = b"_AttacheCaseData";
pub const BROKEN_TOKEN: &[u8; 16] = b"_Atc_Broken_Data";

pub const PREFIX_SIZE:      u64 = 24;
pub const TRY_LIMIT_OFFSET: u64 = 2;
pub const TOKEN_OFFSET:     u64 = 4;
/// Trailing `i64` of the self-extracting variant.
pub const TRAILER_SIZE:     u64 = 8;

pub const MIN_TRY_LIMIT:     u8 = 1;
pub const MAX_TRY_LIMIT:     u8 = 10;
pub const DEFAULT_TRY_LIMIT: u8 = 3;

/// Bytes of the current-format plain header: prefix, algorithm, container
/// id, Argon2 parameters, CRC-32.
pub const CURRENT_PLAIN_SIZE: usize = 60;
/// Authenticated span of the current plain header (token .. KDF params).
const AUTH_START: usize = 4;
const AUTH_END:   usize = 56;

// ── Prefix ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Superblock {
    /// Absolute offset of the container inside the stream.
    pub base:            u64,
    /// End of container bytes (excludes the self-extracting trailer).
    pub end:             u64,
    pub self_extracting: bool,
    pub info:            [u8; 4],
    pub data_version:    i32,
    pub format:          FormatVersion,
}

impl Superblock {
    /// Find the container token, either at offset 0 or through the
    /// self-extracting trailer, and decode the prefix.  Leaves `reader`
    /// positioned just after the prefix.
    pub fn locate<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let stream_len = reader.seek(SeekFrom::End(0))?;

        let (base, end, self_extracting, info) = match read_token_at(reader, 0, stream_len)? {
            TokenCheck::Valid(info)  => (0, stream_len, false, info),
            TokenCheck::Broken       => return Err(AtcError::SelfDestructed),
            TokenCheck::Absent       => {
                if stream_len < TRAILER_SIZE {
                    return Err(AtcError::NotAContainer);
                }
                reader.seek(SeekFrom::Start(stream_len - TRAILER_SIZE))?;
                let container_len = reader.read_i64::<LittleEndian>()?;
                let end = stream_len - TRAILER_SIZE;
                let base = u64::try_from(container_len)
                    .ok()
                    .and_then(|len| end.checked_sub(len))
                    .ok_or(AtcError::NotAContainer)?;
                match read_token_at(reader, base, stream_len)? {
                    TokenCheck::Valid(info) => (base, end, true, info),
                    TokenCheck::Broken      => return Err(AtcError::SelfDestructed),
                    TokenCheck::Absent      => return Err(AtcError::NotAContainer),
                }
            }
        };

        let data_version = reader.read_i32::<LittleEndian>().map_err(eof_is_not_container)?;
        let format = FormatVersion::detect(data_version, info[0])?;
        debug!(base, self_extracting, data_version, format = format.name(), "container located");

        Ok(Self { base, end, self_extracting, info, data_version, format })
    }

    pub fn sub_version(&self) -> u8 {
        self.info[0]
    }

    /// Raw persisted counter byte.
    pub fn stored_try_limit(&self) -> u8 {
        self.info[2]
    }

    pub fn self_destruction(&self) -> bool {
        self.format.has_attempt_counter() && self.info[3] != 0
    }

    /// Remaining attempts as the reader interprets them.
    ///
    /// Legacy guarded containers outside 1..=10 read as the default, which
    /// means a legacy counter never reaches zero on disk.  Current
    /// containers report the byte as stored.
    pub fn passwd_try_limit(&self) -> u8 {
        match self.format {
            FormatVersion::Current => self.info[2],
            FormatVersion::LegacyRijndaelGuarded => {
                let n = self.info[2];
                if (MIN_TRY_LIMIT..=MAX_TRY_LIMIT).contains(&n) { n } else { DEFAULT_TRY_LIMIT }
            }
            _ => DEFAULT_TRY_LIMIT,
        }
    }

    /// Legacy ≤ 103 containers keep the encrypted header size in bytes 0..4.
    pub fn blowfish_header_size(&self) -> i32 {
        i32::from_le_bytes(self.info)
    }

    pub fn try_limit_pos(&self) -> u64 {
        self.base + TRY_LIMIT_OFFSET
    }

    pub fn token_pos(&self) -> u64 {
        self.base + TOKEN_OFFSET
    }

    /// First byte after the plain header that destruction overwrites.
    pub fn payload_pos(&self) -> u64 {
        self.base + PREFIX_SIZE
    }
}

enum TokenCheck {
    Valid([u8; 4]),
    Broken,
    Absent,
}

fn read_token_at<R: Read + Seek>(reader: &mut R, pos: u64, stream_len: u64) -> io::Result<TokenCheck> {
    if stream_len < pos + PREFIX_SIZE {
        return Ok(TokenCheck::Absent);
    }
    reader.seek(SeekFrom::Start(pos))?;
    let mut info = [0u8; 4];
    let mut token = [0u8; 16];
    reader.read_exact(&mut info)?;
    reader.read_exact(&mut token)?;
    Ok(if &token == TOKEN {
        TokenCheck::Valid(info)
    } else if &token == BROKEN_TOKEN {
        TokenCheck::Broken
    } else {
        TokenCheck::Absent
    })
}

fn eof_is_not_container(e: io::Error) -> AtcError {
    if e.kind() == io::ErrorKind::UnexpectedEof { AtcError::NotAContainer } else { AtcError::Io(e) }
}

/// Write the 24-byte prefix.
pub fn write_prefix<W: Write>(
    mut writer:       W,
    try_limit:        u8,
    self_destruction: bool,
    data_version:     i32,
) -> io::Result<()> {
    writer.write_all(&prefix_bytes(try_limit, self_destruction, data_version))
}

fn prefix_bytes(try_limit: u8, self_destruction: bool, data_version: i32) -> [u8; PREFIX_SIZE as usize] {
    let mut out = [0u8; PREFIX_SIZE as usize];
    out[0] = SUB_VERSION_GUARDED;
    out[2] = try_limit;
    out[3] = self_destruction as u8;
    out[4..20].copy_from_slice(TOKEN);
    out[20..24].copy_from_slice(&data_version.to_le_bytes());
    out
}

// ── Current format extension ─────────────────────────────────────────────────

/// Plain fields of a current-format container after the prefix.
///
/// ```text
/// 24  i32    algorithm (2 = AES-256-GCM)
/// 28  [16]   container id, Argon2 salt
/// 44  u32    mem_cost_kib
/// 48  u32    time_cost
/// 52  u32    parallelism
/// 56  u32    CRC-32 of bytes 4..56
/// ```
///
/// Bytes 4..56 are also the AAD of the encrypted header, so tampering with
/// the KDF parameters or the id shows up as an authentication failure even
/// when the CRC is patched.  Bytes 0..4 stay mutable for the counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentPlain {
    pub container_id: Uuid,
    pub kdf:          KdfParams,
}

impl CurrentPlain {
    pub fn new(kdf: KdfParams) -> Self {
        Self { container_id: Uuid::new_v4(), kdf }
    }

    pub fn salt(&self) -> &[u8; 16] {
        self.container_id.as_bytes()
    }

    pub fn encode(&self, try_limit: u8, self_destruction: bool) -> [u8; CURRENT_PLAIN_SIZE] {
        let mut out = [0u8; CURRENT_PLAIN_SIZE];
        out[..PREFIX_SIZE as usize].copy_from_slice(&prefix_bytes(try_limit, self_destruction, DATA_VERSION_CURRENT));
        out[24..28].copy_from_slice(&ALGORITHM_AES_GCM.to_le_bytes());
        out[28..44].copy_from_slice(self.container_id.as_bytes());
        out[44..48].copy_from_slice(&self.kdf.mem_cost_kib.to_le_bytes());
        out[48..52].copy_from_slice(&self.kdf.time_cost.to_le_bytes());
        out[52..56].copy_from_slice(&self.kdf.parallelism.to_le_bytes());
        let crc = crc32fast::hash(&out[AUTH_START..AUTH_END]);
        out[56..60].copy_from_slice(&crc.to_le_bytes());
        out
    }

    /// Associated data binding the encrypted header to this plain header.
    pub fn aad(&self) -> Vec<u8> {
        self.encode(0, false)[AUTH_START..AUTH_END].to_vec()
    }

    /// Read the extension; `reader` must sit right after the prefix.
    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut raw = [0u8; CURRENT_PLAIN_SIZE];
        raw[4..20].copy_from_slice(TOKEN);
        raw[20..24].copy_from_slice(&DATA_VERSION_CURRENT.to_le_bytes());
        reader.read_exact(&mut raw[24..]).map_err(|e| broken_on_eof(e, "plain header truncated"))?;

        let stored_crc = u32::from_le_bytes([raw[56], raw[57], raw[58], raw[59]]);
        if crc32fast::hash(&raw[AUTH_START..AUTH_END]) != stored_crc {
            return Err(AtcError::BrokenHeader("plain header checksum mismatch".into()));
        }
        let algorithm = i32::from_le_bytes([raw[24], raw[25], raw[26], raw[27]]);
        if algorithm != ALGORITHM_AES_GCM {
            return Err(AtcError::BrokenHeader(format!("unknown algorithm {algorithm}")));
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(&raw[28..44]);
        let word = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        let kdf = KdfParams {
            mem_cost_kib: word(44),
            time_cost:    word(48),
            parallelism:  word(52),
        };
        kdf.check_bounds().map_err(|e| AtcError::BrokenHeader(e.to_string()))?;
        Ok(Self { container_id: Uuid::from_bytes(id), kdf })
    }
}

// ── Legacy extension ─────────────────────────────────────────────────────────

/// Plain fields of a legacy container after the prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyPlain {
    /// Encrypted header length, a multiple of 32.
    pub header_size: usize,
    /// Header IV; Blowfish containers have none.
    pub iv:          Option<[u8; UNIT]>,
}

impl LegacyPlain {
    pub fn read<R: Read>(mut reader: R, sb: &Superblock) -> Result<Self> {
        let (size, iv) = match sb.format {
            FormatVersion::LegacyBlowfish => (sb.blowfish_header_size(), None),
            _ => {
                let _algorithm = reader.read_i32::<LittleEndian>()
                    .map_err(|e| broken_on_eof(e, "plain header truncated"))?;
                let size = reader.read_i32::<LittleEndian>()
                    .map_err(|e| broken_on_eof(e, "plain header truncated"))?;
                let mut iv = [0u8; UNIT];
                reader.read_exact(&mut iv).map_err(|e| broken_on_eof(e, "header IV truncated"))?;
                (size, Some(iv))
            }
        };
        let header_size = usize::try_from(size)
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| AtcError::BrokenHeader(format!("encrypted header size {size}")))?;
        if header_size as u64 > sb.end.saturating_sub(sb.base) {
            return Err(AtcError::BrokenHeader(format!("encrypted header size {size} exceeds container")));
        }
        Ok(Self { header_size, iv })
    }
}

fn broken_on_eof(e: io::Error, what: &str) -> AtcError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        AtcError::BrokenHeader(what.to_string())
    } else {
        AtcError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn current_bytes(limit: u8) -> Vec<u8> {
        CurrentPlain::new(KdfParams::insecure_fast()).encode(limit, true).to_vec()
    }

    #[test]
    fn locates_plain_container() {
        let mut c = Cursor::new(current_bytes(4));
        let sb = Superblock::locate(&mut c).unwrap();
        assert_eq!(sb.base, 0);
        assert!(!sb.self_extracting);
        assert_eq!(sb.format, FormatVersion::Current);
        assert_eq!(sb.passwd_try_limit(), 4);
        assert!(sb.self_destruction());
        assert_eq!(c.position(), PREFIX_SIZE);
        assert!(CurrentPlain::read(&mut c).is_ok());
    }

    #[test]
    fn locates_self_extracting_container() {
        let container = current_bytes(3);
        let mut file = vec![0x4d, 0x5a];
        file.extend(std::iter::repeat(0x90).take(500));
        file.extend_from_slice(&container);
        file.extend_from_slice(&(container.len() as i64).to_le_bytes());

        let sb = Superblock::locate(&mut Cursor::new(file)).unwrap();
        assert!(sb.self_extracting);
        assert_eq!(sb.base, 502);
        assert_eq!(sb.end, 502 + container.len() as u64);
    }

    #[test]
    fn plain_files_are_not_containers() {
        assert!(matches!(
            Superblock::locate(&mut Cursor::new(b"hello world".to_vec())),
            Err(AtcError::NotAContainer)
        ));
        assert!(matches!(
            Superblock::locate(&mut Cursor::new(vec![0u8; 200])),
            Err(AtcError::NotAContainer)
        ));
        // A bogus trailer pointing before the start of the stream.
        let mut junk = vec![1u8; 64];
        junk.extend_from_slice(&i64::MAX.to_le_bytes());
        assert!(matches!(Superblock::locate(&mut Cursor::new(junk)), Err(AtcError::NotAContainer)));
    }

    #[test]
    fn broken_token_means_destroyed() {
        let mut bytes = current_bytes(0);
        bytes[4..20].copy_from_slice(BROKEN_TOKEN);
        assert!(matches!(Superblock::locate(&mut Cursor::new(bytes)), Err(AtcError::SelfDestructed)));
    }

    #[test]
    fn future_version_is_unsupported() {
        let mut bytes = current_bytes(3);
        bytes[20..24].copy_from_slice(&150i32.to_le_bytes());
        assert!(matches!(
            Superblock::locate(&mut Cursor::new(bytes)),
            Err(AtcError::UnsupportedVersion(150))
        ));
    }

    #[test]
    fn tampered_kdf_params_fail_crc() {
        let mut bytes = current_bytes(3);
        bytes[44] ^= 0xff;
        let mut c = Cursor::new(bytes);
        Superblock::locate(&mut c).unwrap();
        assert!(matches!(CurrentPlain::read(&mut c), Err(AtcError::BrokenHeader(_))));
    }

    #[test]
    fn counter_byte_is_outside_the_aad() {
        let plain = CurrentPlain::new(KdfParams::insecure_fast());
        let a = plain.encode(3, false);
        let b = plain.encode(1, true);
        assert_eq!(a[AUTH_START..], b[AUTH_START..]);
        assert_eq!(plain.aad(), a[AUTH_START..AUTH_END].to_vec());
    }

    #[test]
    fn legacy_guarded_counter_is_clamped() {
        let mut bytes = prefix_bytes(0, true, 105).to_vec();
        bytes.extend_from_slice(&[0u8; 40]);
        let sb = Superblock::locate(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(sb.format, FormatVersion::LegacyRijndaelGuarded);
        assert_eq!(sb.passwd_try_limit(), DEFAULT_TRY_LIMIT);
    }
}
