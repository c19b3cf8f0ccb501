//! Persisted attempt counter and self-destruction.
//!
//! The remaining-attempts byte sits at offset 2 of the plain header and is
//! rewritten in place.  Destruction is ordered so that an interruption at any
//! step leaves a container that is already unusable or that the next open
//! finishes destroying:
//!
//! 1. counter byte set to 0, flushed
//! 2. everything after the 24-byte prefix overwritten with random bytes
//! 3. token replaced with `_Atc_Broken_Data`, flushed

use std::io::{Seek, SeekFrom, Write};
use tracing::{debug, warn};

use crate::crypto::fill_random;
use crate::error::{AtcError, Result};
use crate::superblock::{Superblock, BROKEN_TOKEN};
use crate::version::FormatVersion;

const WIPE_BUF: usize = 64 * 1024;

/// Result of recording one failed header decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Attempts left after this failure; `None` when the format keeps no
    /// counter.
    Remaining(Option<u8>),
    Destroyed,
}

impl Attempt {
    pub fn into_error(self) -> AtcError {
        match self {
            Attempt::Remaining(remaining) => AtcError::WrongKey { remaining },
            Attempt::Destroyed            => AtcError::SelfDestructed,
        }
    }
}

/// Decrement the persisted counter by one, destroying the container when
/// it reaches zero with self-destruction enabled.
pub fn record_failure<S: Write + Seek>(stream: &mut S, sb: &Superblock) -> Result<Attempt> {
    if !sb.format.has_attempt_counter() {
        debug!(format = sb.format.name(), "wrong password on a container without attempt counter");
        return Ok(Attempt::Remaining(None));
    }

    let remaining = sb.passwd_try_limit().saturating_sub(1);
    if remaining == 0 && sb.self_destruction() {
        destroy(stream, sb)?;
        return Ok(Attempt::Destroyed);
    }

    write_counter(stream, sb, remaining)?;
    warn!(remaining, "wrong password");
    Ok(Attempt::Remaining(Some(remaining)))
}

/// Restore the configured budget after a successful open.  Only current
/// containers carry the configured value; legacy counters are left alone.
pub fn record_success<S: Write + Seek>(stream: &mut S, sb: &Superblock, configured: u8) -> Result<()> {
    if sb.format == FormatVersion::Current && sb.stored_try_limit() != configured {
        write_counter(stream, sb, configured)?;
        debug!(configured, "attempt counter restored");
    }
    Ok(())
}

/// True when a previous destruction was interrupted after step 1.
pub fn destruction_pending(sb: &Superblock) -> bool {
    sb.format == FormatVersion::Current && sb.self_destruction() && sb.stored_try_limit() == 0
}

/// Irreversibly wipe the container.  The self-extracting stub before
/// `sb.base` and the trailer after `sb.end` are left intact.
pub fn destroy<S: Write + Seek>(stream: &mut S, sb: &Superblock) -> Result<()> {
    warn!(base = sb.base, "attempt budget exhausted, destroying container");

    write_counter(stream, sb, 0)?;

    stream.seek(SeekFrom::Start(sb.payload_pos()))?;
    let mut remaining = sb.end.saturating_sub(sb.payload_pos());
    let mut buf = vec![0u8; WIPE_BUF];
    while remaining > 0 {
        let n = remaining.min(WIPE_BUF as u64) as usize;
        fill_random(&mut buf[..n]);
        stream.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    stream.flush()?;

    stream.seek(SeekFrom::Start(sb.token_pos()))?;
    stream.write_all(BROKEN_TOKEN)?;
    stream.flush()?;
    Ok(())
}

fn write_counter<S: Write + Seek>(stream: &mut S, sb: &Superblock, value: u8) -> Result<()> {
    stream.seek(SeekFrom::Start(sb.try_limit_pos()))?;
    stream.write_all(&[value])?;
    stream.flush()?;
    Ok(())
}
