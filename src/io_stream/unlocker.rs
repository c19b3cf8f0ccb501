//! Container reader.
//!
//! [`Unlocker::open`] locates the container, dispatches on its format
//! version, authenticates the header (charging the attempt counter on
//! failure) and exposes the entry list.  File data is then extracted in
//! entry order with [`Unlocker::extract_file_data`] or
//! [`Unlocker::extract_entry`].

use byteorder::{LittleEndian, ReadBytesExt};
use serde::Serialize;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::debug;
use zeroize::Zeroizing;

use crate::block::{chunk_count, read_chunk, ChunkPos, CHUNK_SIZE};
use crate::codec::{get_codec, Codec};
use crate::crypto::legacy::{LegacyCipher, UNIT};
use crate::crypto::SessionKey;
use crate::entry::FileEntry;
use crate::error::{AtcError, Result};
use crate::guard;
use crate::header::{legacy as text_header, Header};
use crate::superblock::{CurrentPlain, LegacyPlain, Superblock};
use crate::version::{BlockMode, FormatVersion};

use super::legacy::LegacyDecoder;
use super::locker::next_file;

/// Largest encrypted header a reader accepts (64 MiB).
pub const MAX_HEADER_LEN: u64 = 64 * 1024 * 1024;

/// What can be learned about a container without the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    #[serde(serialize_with = "serialize_format")]
    pub format:           FormatVersion,
    pub data_version:     i32,
    pub sub_version:      u8,
    /// Absolute offset of the container in the stream.
    pub offset:           u64,
    pub self_extracting:  bool,
    /// Remaining attempts as persisted (default 3 for formats without a counter).
    pub passwd_try_limit: u8,
    pub self_destruction: bool,
}

fn serialize_format<S: serde::Serializer>(f: &FormatVersion, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(f.name())
}

enum Engine {
    Current { key: SessionKey, codec: Box<dyn Codec> },
    Legacy  { decoder: LegacyDecoder },
}

pub struct Unlocker<S> {
    stream:           S,
    sb:               Superblock,
    entries:          Vec<FileEntry>,
    passwd_try_limit: u8,
    self_destruction: bool,
    created:          Option<i64>,
    engine:           Engine,
    /// First entry index not yet extracted.
    next:             usize,
    poisoned:         bool,
}

impl<S: Read + Seek> Unlocker<S> {
    /// Inspect the plain header without a password.  Never modifies the
    /// stream and never charges the attempt counter.
    pub fn probe(stream: &mut S) -> Result<ContainerInfo> {
        let sb = Superblock::locate(stream)?;
        Ok(ContainerInfo {
            format:           sb.format,
            data_version:     sb.data_version,
            sub_version:      if sb.format == FormatVersion::LegacyBlowfish { 0 } else { sb.sub_version() },
            offset:           sb.base,
            self_extracting:  sb.self_extracting,
            passwd_try_limit: sb.passwd_try_limit(),
            self_destruction: sb.self_destruction(),
        })
    }
}

impl<S: Read + Write + Seek> Unlocker<S> {
    /// Open and authenticate.  A wrong password decrements the persisted
    /// counter by one and returns [`AtcError::WrongKey`], or destroys the
    /// container and returns [`AtcError::SelfDestructed`] when the budget
    /// is spent.
    pub fn open(mut stream: S, password: &[u8]) -> Result<Self> {
        let sb = Superblock::locate(&mut stream)?;
        if guard::destruction_pending(&sb) {
            guard::destroy(&mut stream, &sb)?;
            return Err(AtcError::SelfDestructed);
        }

        let unlocker = match sb.format {
            FormatVersion::Current => Self::open_current(stream, sb, password)?,
            _                      => Self::open_legacy(stream, sb, password)?,
        };
        debug!(
            format = unlocker.sb.format.name(),
            entries = unlocker.entries.len(),
            "container unlocked"
        );
        Ok(unlocker)
    }

    fn open_current(mut stream: S, sb: Superblock, password: &[u8]) -> Result<Self> {
        let plain = CurrentPlain::read(&mut stream)?;
        let header_len = stream.read_u32::<LittleEndian>()
            .map_err(|_| AtcError::BrokenHeader("header length missing".into()))? as u64;
        let available = sb.end.saturating_sub(stream.stream_position()?);
        if header_len > MAX_HEADER_LEN || header_len > available {
            return Err(AtcError::BrokenHeader(format!("encrypted header length {header_len}")));
        }
        let mut sealed = vec![0u8; header_len as usize];
        stream.read_exact(&mut sealed)?;
        let data_pos = stream.stream_position()?;

        let key = SessionKey::derive(password, plain.salt(), &plain.kdf)?;
        let header = match key.open_header(&plain.aad(), &sealed) {
            Ok(plaintext) => Header::from_bytes(&plaintext)?,
            Err(_) => {
                let attempt = guard::record_failure(&mut stream, &sb)?;
                return Err(attempt.into_error());
            }
        };

        guard::record_success(&mut stream, &sb, header.passwd_try_limit)?;
        stream.seek(SeekFrom::Start(data_pos))?;

        Ok(Self {
            stream,
            passwd_try_limit: header.passwd_try_limit,
            self_destruction: header.self_destruction,
            created:          Some(header.created),
            engine:           Engine::Current { key, codec: get_codec(header.codec) },
            entries:          header.entries,
            sb,
            next:             0,
            poisoned:         false,
        })
    }

    fn open_legacy(mut stream: S, sb: Superblock, password: &[u8]) -> Result<Self> {
        let plain = LegacyPlain::read(&mut stream, &sb)?;
        let suite = sb.format.suite();
        let mut cipher = LegacyCipher::for_suite(suite, password, plain.iv.unwrap_or([0u8; UNIT]))?;

        let units = plain.header_size.div_ceil(UNIT);
        let mut text = Zeroizing::new(Vec::with_capacity(units * UNIT));
        for i in 0..units {
            let mut unit = [0u8; UNIT];
            stream.read_exact(&mut unit)
                .map_err(|_| AtcError::BrokenHeader("encrypted header truncated".into()))?;
            cipher.decrypt_unit(&mut unit);
            if i == 0 && !contains(&unit, text_header::PASSCODE_MARK) {
                let attempt = guard::record_failure(&mut stream, &sb)?;
                return Err(attempt.into_error());
            }
            text.extend_from_slice(&unit);
        }
        let header = text_header::parse(&text)?;

        if suite.block_mode == BlockMode::Cbc {
            let mut iv = [0u8; UNIT];
            stream.read_exact(&mut iv)
                .map_err(|_| AtcError::Corrupted("data IV missing".into()))?;
            cipher.reset_chain(iv);
        }
        let data_pos = stream.stream_position()?;
        // Blowfish-era writers may leave a bad zlib trailer after the data.
        let lenient = suite.block_mode == BlockMode::Ecb;
        let decoder = LegacyDecoder::new(cipher, sb.end.saturating_sub(data_pos), lenient);

        Ok(Self {
            stream,
            passwd_try_limit: sb.passwd_try_limit(),
            self_destruction: sb.self_destruction(),
            created:          header.created(),
            entries:          header.entries,
            engine:           Engine::Legacy { decoder },
            sb,
            next:             0,
            poisoned:         false,
        })
    }

    // ── Extraction ───────────────────────────────────────────────────────────

    /// Decrypt exactly `size` bytes of the next non-directory entry into
    /// `dest`.  `size` must equal that entry's declared size.
    pub fn extract_file_data<W: Write>(&mut self, mut dest: W, size: u64) -> Result<()> {
        if self.poisoned {
            return Err(AtcError::OutOfOrder("extraction failed earlier".into()));
        }
        let index = next_file(&self.entries, self.next)
            .ok_or_else(|| AtcError::OutOfOrder("every file entry has been extracted".into()))?;
        let expected = self.entries[index].data_len();
        if size != expected {
            return Err(AtcError::OutOfOrder(format!(
                "requested {size} bytes but next entry `{}` holds {expected}",
                self.entries[index].display_name()
            )));
        }

        match self.stream_entry(index, &mut dest, size) {
            Ok(()) => {
                self.next = index + 1;
                debug!(index, size, "file data extracted");
                Ok(())
            }
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    /// Extract entry `index`.  Directories are a no-op; a file must be the
    /// next pending one.
    pub fn extract_entry<W: Write>(&mut self, index: usize, dest: W) -> Result<()> {
        let entry = self.entries.get(index)
            .ok_or_else(|| AtcError::InvalidEntry(format!(
                "index {index} out of range ({} entries)", self.entries.len()
            )))?;
        if entry.is_directory() {
            return Ok(());
        }
        let size = entry.data_len();
        match next_file(&self.entries, self.next) {
            Some(next) if next == index => self.extract_file_data(dest, size),
            _ => Err(AtcError::OutOfOrder(format!(
                "entry {index} is not the next file to extract"
            ))),
        }
    }

    fn stream_entry<W: Write>(&mut self, index: usize, dest: &mut W, size: u64) -> Result<()> {
        match &mut self.engine {
            Engine::Current { key, codec } => {
                let chunks = chunk_count(size);
                let mut done = 0u64;
                for chunk in 0..chunks {
                    let want = (size - done).min(CHUNK_SIZE as u64) as usize;
                    let pos = ChunkPos {
                        entry: index as u32,
                        chunk: chunk as u32,
                        last:  chunk + 1 == chunks,
                    };
                    let data = read_chunk(&mut self.stream, key, codec.as_ref(), pos, want)?;
                    dest.write_all(&data)?;
                    done += want as u64;
                }
            }
            Engine::Legacy { decoder } => {
                let mut buf = Zeroizing::new(vec![0u8; CHUNK_SIZE]);
                let mut done = 0u64;
                while done < size {
                    let want = (size - done).min(CHUNK_SIZE as u64) as usize;
                    let n = decoder.read(&mut self.stream, &mut buf[..want])?;
                    if n == 0 {
                        return Err(AtcError::Corrupted(format!(
                            "data stream ended {} bytes into a {size} byte entry", done
                        )));
                    }
                    dest.write_all(&buf[..n])?;
                    done += n as u64;
                }
            }
        }
        dest.flush()?;
        Ok(())
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    /// Configured budget (current format) or the persisted counter (legacy).
    pub fn passwd_try_limit(&self) -> u8 {
        self.passwd_try_limit
    }

    pub fn self_destruction(&self) -> bool {
        self.self_destruction
    }

    pub fn format(&self) -> FormatVersion {
        self.sb.format
    }

    pub fn data_version(&self) -> i32 {
        self.sb.data_version
    }

    pub fn is_self_extracting(&self) -> bool {
        self.sb.self_extracting
    }

    /// Creation stamp in Unix seconds, when the header carries a readable one.
    pub fn created(&self) -> Option<i64> {
        self.created
    }

    /// Release the stream.  Key material is wiped with the rest of `self`.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
