//! Container writer.
//!
//! Call order: [`Locker::open`] → [`Locker::add_file_entry`]* →
//! [`Locker::write_encrypted_header`] → [`Locker::write_file_data`] once per
//! non-directory entry, in entry order → [`Locker::close`].

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::Utc;
use std::io::{Read, Write};
use tracing::debug;
use zeroize::Zeroizing;

use crate::block::{chunk_count, write_chunk, ChunkPos, CHUNK_SIZE};
use crate::codec::{get_codec, Codec, CodecId, DEFAULT_LEVEL};
use crate::crypto::legacy::{LegacyCipher, UNIT};
use crate::crypto::{fill_random, KdfParams, SessionKey};
use crate::entry::FileEntry;
use crate::error::{AtcError, Result};
use crate::header::{legacy as text_header, Header};
use crate::superblock::{write_prefix, CurrentPlain, DEFAULT_TRY_LIMIT, MAX_TRY_LIMIT, MIN_TRY_LIMIT};
use crate::version::FormatVersion;

use super::legacy::{LegacyEncoder, DEFAULT_ZLIB_LEVEL};

/// Tunables of a lock session.
#[derive(Debug, Clone)]
pub struct LockerOptions {
    /// Wrong passwords tolerated before the container counts as exhausted (1..=10).
    pub passwd_try_limit: u8,
    /// Destroy the container once the budget runs out.
    pub self_destruction: bool,
    /// `Current` or `LegacyRijndaelGuarded` (AttacheCase 2.x compatible).
    pub format:           FormatVersion,
    /// Chunk codec, current format only.
    pub codec:            CodecId,
    /// Compression level; `None` picks zstd 3 or zlib 6.
    pub level:            Option<i32>,
    /// Argon2id cost, current format only.
    pub kdf:              KdfParams,
    /// Creation stamp in Unix seconds; `None` means now.
    pub created:          Option<i64>,
}

impl Default for LockerOptions {
    fn default() -> Self {
        Self {
            passwd_try_limit: DEFAULT_TRY_LIMIT,
            self_destruction: false,
            format:           FormatVersion::Current,
            codec:            CodecId::Zstd,
            level:            None,
            kdf:              KdfParams::default(),
            created:          None,
        }
    }
}

impl LockerOptions {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_TRY_LIMIT..=MAX_TRY_LIMIT).contains(&self.passwd_try_limit) {
            return Err(AtcError::InvalidOption(format!(
                "passwd_try_limit {} outside {MIN_TRY_LIMIT}..={MAX_TRY_LIMIT}", self.passwd_try_limit
            )));
        }
        if !self.format.is_writable() {
            return Err(AtcError::InvalidOption(format!("format {} is read-only", self.format.name())));
        }
        if let Some(level) = self.level {
            let range = match self.format {
                FormatVersion::Current => 1..=22,
                _                      => 0..=9,
            };
            if !range.contains(&level) {
                return Err(AtcError::InvalidOption(format!("compression level {level} outside {range:?}")));
            }
        }
        self.kdf.check_bounds().map_err(|e| AtcError::InvalidOption(e.to_string()))?;
        Ok(())
    }
}

enum Engine {
    Current {
        key:   SessionKey,
        plain: CurrentPlain,
        codec: Box<dyn Codec>,
        level: i32,
    },
    Legacy {
        encoder: LegacyEncoder,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Entries,
    /// Header written; `next` is the first entry index not yet served.
    Data { next: usize },
    /// A data write failed midway; the container is unusable.
    Poisoned,
}

pub struct Locker<W: Write> {
    writer:  W,
    options: LockerOptions,
    entries: Vec<FileEntry>,
    engine:  Engine,
    phase:   Phase,
    created: i64,
}

impl<W: Write> Locker<W> {
    /// Validate options, derive the key and write the plain header.
    pub fn open(mut writer: W, password: &[u8], options: LockerOptions) -> Result<Self> {
        options.validate()?;
        if password.is_empty() {
            return Err(AtcError::InvalidOption("password is empty".into()));
        }

        let engine = match options.format {
            FormatVersion::Current => {
                let plain = CurrentPlain::new(options.kdf);
                let key = SessionKey::derive(password, plain.salt(), &options.kdf)?;
                writer.write_all(&plain.encode(options.passwd_try_limit, options.self_destruction))?;
                Engine::Current {
                    key,
                    plain,
                    codec: get_codec(options.codec),
                    level: options.level.unwrap_or(DEFAULT_LEVEL),
                }
            }
            _ => {
                write_prefix(&mut writer, options.passwd_try_limit, options.self_destruction, options.format.data_version())?;
                writer.write_i32::<LittleEndian>(options.format.algorithm_id())?;
                let cipher = LegacyCipher::for_suite(options.format.suite(), password, [0u8; UNIT])?;
                let level = options.level.map_or(DEFAULT_ZLIB_LEVEL, |l| l as u32);
                Engine::Legacy { encoder: LegacyEncoder::new(cipher, level) }
            }
        };

        let created = options.created.unwrap_or_else(|| Utc::now().timestamp());
        debug!(format = options.format.name(), try_limit = options.passwd_try_limit,
               self_destruction = options.self_destruction, "locker opened");
        Ok(Self { writer, options, entries: Vec::new(), engine, phase: Phase::Entries, created })
    }

    pub fn add_file_entry(&mut self, entry: FileEntry) -> Result<()> {
        if self.phase != Phase::Entries {
            return Err(AtcError::OutOfOrder("entries must be added before the header is written".into()));
        }
        entry.validate()?;
        if matches!(self.engine, Engine::Legacy { .. }) {
            text_header::check_name(&entry)?;
        }
        if self.entries.len() >= u32::MAX as usize {
            return Err(AtcError::InvalidEntry("too many entries".into()));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    /// Serialise and encrypt the entry list.  Exactly once, before any data.
    pub fn write_encrypted_header(&mut self) -> Result<()> {
        if self.phase != Phase::Entries {
            return Err(AtcError::OutOfOrder("header already written".into()));
        }

        match &mut self.engine {
            Engine::Current { key, plain, .. } => {
                let header = Header {
                    entries:          self.entries.clone(),
                    passwd_try_limit: self.options.passwd_try_limit,
                    self_destruction: self.options.self_destruction,
                    codec:            self.options.codec,
                    created:          self.created,
                };
                let plaintext = Zeroizing::new(header.to_bytes());
                let sealed = key.seal_header(&plain.aad(), &plaintext)?;
                self.writer.write_u32::<LittleEndian>(sealed.len() as u32)?;
                self.writer.write_all(&sealed)?;
            }
            Engine::Legacy { encoder } => {
                let stamp = text_header::format_date(self.created);
                let mut plaintext = Zeroizing::new(text_header::encode(&self.entries, &stamp));
                let padded = plaintext.len().div_ceil(UNIT) * UNIT;
                plaintext.resize(padded, 0);

                let header_iv = random_iv();
                self.writer.write_i32::<LittleEndian>(padded as i32)?;
                self.writer.write_all(&header_iv)?;
                encoder.cipher_mut().reset_chain(header_iv);
                encoder.write_units(&mut self.writer, &mut plaintext)?;

                let data_iv = random_iv();
                self.writer.write_all(&data_iv)?;
                encoder.cipher_mut().reset_chain(data_iv);
            }
        }

        debug!(entries = self.entries.len(), "encrypted header written");
        self.phase = Phase::Data { next: 0 };
        Ok(())
    }

    /// Encrypt exactly `size` bytes from `source` as the data of the next
    /// non-directory entry.
    pub fn write_file_data<R: Read>(&mut self, source: R, size: u64) -> Result<()> {
        let next = match self.phase {
            Phase::Data { next } => next,
            Phase::Entries  => return Err(AtcError::OutOfOrder("header has not been written".into())),
            Phase::Poisoned => return Err(AtcError::OutOfOrder("session failed earlier".into())),
        };
        let index = next_file(&self.entries, next)
            .ok_or_else(|| AtcError::OutOfOrder("every file entry already has data".into()))?;
        let expected = self.entries[index].data_len();
        if size != expected {
            return Err(AtcError::SizeMismatch { expected, actual: size });
        }

        match self.stream_entry(index, source, size) {
            Ok(()) => {
                self.phase = Phase::Data { next: index + 1 };
                debug!(index, size, "file data written");
                Ok(())
            }
            Err(e) => {
                self.phase = Phase::Poisoned;
                Err(e)
            }
        }
    }

    fn stream_entry<R: Read>(&mut self, index: usize, mut source: R, size: u64) -> Result<()> {
        let mut buf = Zeroizing::new(vec![0u8; CHUNK_SIZE]);
        let mut done = 0u64;
        match &mut self.engine {
            Engine::Current { key, codec, level, .. } => {
                let chunks = chunk_count(size);
                for chunk in 0..chunks {
                    let want = (size - done).min(CHUNK_SIZE as u64) as usize;
                    let got = read_full(&mut source, &mut buf[..want])?;
                    if got < want {
                        return Err(AtcError::SizeMismatch { expected: size, actual: done + got as u64 });
                    }
                    let pos = ChunkPos {
                        entry: index as u32,
                        chunk: chunk as u32,
                        last:  chunk + 1 == chunks,
                    };
                    write_chunk(&mut self.writer, key, codec.as_ref(), *level, pos, &buf[..want])?;
                    done += want as u64;
                }
            }
            Engine::Legacy { encoder } => {
                while done < size {
                    let want = (size - done).min(CHUNK_SIZE as u64) as usize;
                    let got = read_full(&mut source, &mut buf[..want])?;
                    if got < want {
                        return Err(AtcError::SizeMismatch { expected: size, actual: done + got as u64 });
                    }
                    encoder.write(&mut self.writer, &buf[..want])?;
                    done += want as u64;
                }
            }
        }
        Ok(())
    }

    /// Finish the container and hand back the writer.  Key material is
    /// wiped when `self` drops, on this and every other exit path.
    pub fn close(mut self) -> Result<W> {
        match self.phase {
            Phase::Entries  => return Err(AtcError::OutOfOrder("header has not been written".into())),
            Phase::Poisoned => return Err(AtcError::OutOfOrder("session failed earlier".into())),
            Phase::Data { next } => {
                if let Some(index) = next_file(&self.entries, next) {
                    return Err(AtcError::OutOfOrder(format!(
                        "entry `{}` never received its data", self.entries[index].display_name()
                    )));
                }
            }
        }
        if let Engine::Legacy { encoder } = &mut self.engine {
            encoder.finish(&mut self.writer)?;
        }
        self.writer.flush()?;
        debug!(entries = self.entries.len(), "locker closed");
        Ok(self.writer)
    }
}

/// Index of the first non-directory entry at or after `from`.
pub(crate) fn next_file(entries: &[FileEntry], from: usize) -> Option<usize> {
    entries.iter().skip(from).position(|e| !e.is_directory()).map(|p| p + from)
}

fn random_iv() -> [u8; UNIT] {
    let mut iv = [0u8; UNIT];
    fill_random(&mut iv);
    iv
}

/// Read until `buf` is full or the source is exhausted.
fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
