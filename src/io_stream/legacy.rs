//! zlib-over-block-cipher data stream of legacy containers.
//!
//! All file data of a legacy container is one zlib stream, cut into 32-byte
//! units and encrypted unit by unit.  The final partial unit is padded with
//! bytes whose value is the pad length.  Readers need no unpadding: the zlib
//! stream end marks the end of data.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use std::io::{Read, Write};
use zeroize::Zeroizing;

use crate::crypto::legacy::{LegacyCipher, UNIT};
use crate::error::{AtcError, Result};

const SCRATCH: usize = 4096;

/// zlib level AttacheCase writes with (`Z_DEFAULT_COMPRESSION`).
pub const DEFAULT_ZLIB_LEVEL: u32 = 6;

// ── Encoder ──────────────────────────────────────────────────────────────────

pub struct LegacyEncoder {
    cipher:  LegacyCipher,
    z:       Compress,
    scratch: Zeroizing<Vec<u8>>,
    /// Compressed bytes not yet forming a full unit.
    staged:  Zeroizing<Vec<u8>>,
}

impl LegacyEncoder {
    pub fn new(cipher: LegacyCipher, level: u32) -> Self {
        Self {
            cipher,
            z:       Compress::new(Compression::new(level.min(9)), true),
            scratch: Zeroizing::new(vec![0u8; SCRATCH]),
            staged:  Zeroizing::new(Vec::with_capacity(SCRATCH + UNIT)),
        }
    }

    pub fn cipher_mut(&mut self) -> &mut LegacyCipher {
        &mut self.cipher
    }

    /// Encrypt `units` (a multiple of 32 bytes) in place and write them.
    pub fn write_units<W: Write>(&mut self, mut writer: W, units: &mut [u8]) -> Result<()> {
        for chunk in units.chunks_exact_mut(UNIT) {
            let mut unit = [0u8; UNIT];
            unit.copy_from_slice(chunk);
            self.cipher.encrypt_unit(&mut unit);
            writer.write_all(&unit)?;
        }
        Ok(())
    }

    pub fn write<W: Write>(&mut self, mut writer: W, mut input: &[u8]) -> Result<()> {
        while !input.is_empty() {
            let (consumed, _) = self.pump(input, FlushCompress::None)?;
            self.emit_full_units(&mut writer)?;
            input = &input[consumed..];
        }
        Ok(())
    }

    /// End the zlib stream and write the padded final unit.
    pub fn finish<W: Write>(&mut self, mut writer: W) -> Result<()> {
        loop {
            let (_, status) = self.pump(&[], FlushCompress::Finish)?;
            self.emit_full_units(&mut writer)?;
            if status == Status::StreamEnd {
                break;
            }
        }
        if !self.staged.is_empty() {
            let pad = UNIT - self.staged.len();
            self.staged.resize(UNIT, pad as u8);
            let mut unit = [0u8; UNIT];
            unit.copy_from_slice(&self.staged);
            self.staged.clear();
            self.cipher.encrypt_unit(&mut unit);
            writer.write_all(&unit)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn pump(&mut self, input: &[u8], flush: FlushCompress) -> Result<(usize, Status)> {
        let in_before = self.z.total_in();
        let out_before = self.z.total_out();
        let status = self.z
            .compress(input, &mut self.scratch, flush)
            .map_err(|e| AtcError::Corrupted(format!("zlib: {e}")))?;
        let consumed = (self.z.total_in() - in_before) as usize;
        let produced = (self.z.total_out() - out_before) as usize;
        self.staged.extend_from_slice(&self.scratch[..produced]);
        Ok((consumed, status))
    }

    fn emit_full_units<W: Write>(&mut self, writer: &mut W) -> Result<()> {
        let full = self.staged.len() / UNIT * UNIT;
        for chunk in self.staged[..full].chunks_exact(UNIT) {
            let mut unit = [0u8; UNIT];
            unit.copy_from_slice(chunk);
            self.cipher.encrypt_unit(&mut unit);
            writer.write_all(&unit)?;
        }
        self.staged.drain(..full);
        Ok(())
    }
}

// ── Decoder ──────────────────────────────────────────────────────────────────

pub struct LegacyDecoder {
    cipher:    LegacyCipher,
    z:         Decompress,
    unit:      Zeroizing<[u8; UNIT]>,
    unit_pos:  usize,
    unit_len:  usize,
    /// Ciphertext bytes left before the end of the container.
    remaining: u64,
    ended:     bool,
    /// Blowfish-era streams may end in a checksum error after all data.
    lenient:   bool,
}

impl LegacyDecoder {
    pub fn new(cipher: LegacyCipher, remaining: u64, lenient: bool) -> Self {
        Self {
            cipher,
            z:         Decompress::new(true),
            unit:      Zeroizing::new([0u8; UNIT]),
            unit_pos:  0,
            unit_len:  0,
            remaining,
            ended:     false,
            lenient,
        }
    }

    /// Fill `buf` with plaintext.  Returns 0 only at the end of the stream.
    pub fn read<R: Read>(&mut self, mut reader: R, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.ended {
                return Ok(0);
            }
            if self.unit_pos == self.unit_len {
                self.next_unit(&mut reader)?;
            }

            let in_before = self.z.total_in();
            let out_before = self.z.total_out();
            let result = self.z.decompress(
                &self.unit[self.unit_pos..self.unit_len],
                buf,
                FlushDecompress::None,
            );
            let consumed = (self.z.total_in() - in_before) as usize;
            let produced = (self.z.total_out() - out_before) as usize;
            self.unit_pos += consumed;

            match result {
                Ok(Status::StreamEnd) => self.ended = true,
                Ok(_) => {}
                Err(e) if self.lenient => {
                    tracing::debug!(error = %e, "ignoring zlib error in legacy stream");
                    self.ended = true;
                }
                Err(e) => return Err(AtcError::Corrupted(format!("zlib: {e}"))),
            }

            if produced > 0 {
                return Ok(produced);
            }
        }
    }

    fn next_unit<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        if self.remaining < UNIT as u64 {
            return Err(AtcError::Corrupted("data stream ends before the compressed stream".into()));
        }
        let mut unit = [0u8; UNIT];
        reader.read_exact(&mut unit).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => AtcError::Corrupted("data stream truncated".into()),
            _ => AtcError::Io(e),
        })?;
        self.cipher.decrypt_unit(&mut unit);
        *self.unit = unit;
        self.unit_pos = 0;
        self.unit_len = UNIT;
        self.remaining -= UNIT as u64;
        Ok(())
    }
}
