//! Fixture builders shared by the integration tests.  Built fixtures are
//! produced fresh by the calling test; the `tests/fixtures/*.hex` containers
//! were written by an independent implementation and are only ever read.
#![allow(dead_code)]

use byteorder::{LittleEndian, WriteBytesExt};
use satchel::crypto::legacy::{LegacyCipher, UNIT};
use satchel::header::legacy as text_header;
use satchel::io_stream::legacy::{LegacyEncoder, DEFAULT_ZLIB_LEVEL};
use satchel::superblock::TOKEN;
use satchel::{FileEntry, FormatVersion, KdfParams, Locker, LockerOptions, Unlocker};
use std::io::{Cursor, Read, Seek, Write};

pub const PASSWORD: &[u8] = b"correct horse";
pub const WRONG: &[u8] = b"battery staple";

/// One directory and two ASCII payloads, as `(entry, data)` pairs.
pub fn sample_entries() -> Vec<(FileEntry, Vec<u8>)> {
    let a = b"The quick brown fox jumps over the lazy dog".to_vec();
    let b = b"satchel test payload\r\nsecond line\r\n".repeat(20);
    vec![
        (FileEntry::directory("test\\").with_times(1_600_000_000, 1_600_000_100), Vec::new()),
        (FileEntry::file("test\\a.txt", a.len() as u64).unwrap().with_times(1_600_000_200, 1_600_000_300), a),
        (FileEntry::file("test\\b.txt", b.len() as u64).unwrap().with_times(1_600_000_400, 1_600_000_500), b),
    ]
}

pub fn fast_options() -> LockerOptions {
    LockerOptions {
        kdf: KdfParams::insecure_fast(),
        created: Some(1_700_000_000),
        ..LockerOptions::default()
    }
}

/// Lock `items` into `writer` with `options`.
pub fn lock_into<W: Write>(writer: W, items: &[(FileEntry, Vec<u8>)], options: LockerOptions) -> W {
    let mut locker = Locker::open(writer, PASSWORD, options).unwrap();
    for (entry, _) in items {
        locker.add_file_entry(entry.clone()).unwrap();
    }
    locker.write_encrypted_header().unwrap();
    for (entry, data) in items {
        if !entry.is_directory() {
            locker.write_file_data(&data[..], data.len() as u64).unwrap();
        }
    }
    locker.close().unwrap()
}

pub fn lock_bytes(items: &[(FileEntry, Vec<u8>)], options: LockerOptions) -> Vec<u8> {
    lock_into(Vec::new(), items, options)
}

pub fn current_container(try_limit: u8, self_destruction: bool) -> Vec<u8> {
    lock_bytes(
        &sample_entries(),
        LockerOptions { passwd_try_limit: try_limit, self_destruction, ..fast_options() },
    )
}

/// Password of the stored reference containers.
pub const REFERENCE_PASSWORD: &[u8] = b"correct horse";
/// CRC-32 of `ref\reference.txt` inside every reference container.
pub const REFERENCE_CRC: u32 = 0x7550_c0b1;
pub const REFERENCE_LEN: usize = 248;

/// A stored reference container, e.g. `reference("legacy_v105")`.
pub fn reference(name: &str) -> Vec<u8> {
    let path = format!("{}/tests/fixtures/{name}.hex", env!("CARGO_MANIFEST_DIR"));
    let text = std::fs::read_to_string(&path).unwrap();
    hex::decode(text.trim()).unwrap()
}

/// v105 with the attempt counter, as AttacheCase 2.70+ writes it.
pub fn legacy_v105(try_limit: u8, self_destruction: bool) -> Vec<u8> {
    lock_bytes(
        &sample_entries(),
        LockerOptions {
            passwd_try_limit: try_limit,
            self_destruction,
            format: FormatVersion::LegacyRijndaelGuarded,
            ..fast_options()
        },
    )
}

/// v104 from before the attempt counter: same cipher, older version fields.
pub fn legacy_v104() -> Vec<u8> {
    let mut bytes = legacy_v105(3, false);
    bytes[0] = 5;
    bytes[20..24].copy_from_slice(&104i32.to_le_bytes());
    bytes
}

/// v103 Blowfish-ECB container: header size in bytes 0..4, no IVs.
pub fn legacy_v103(password: &[u8]) -> Vec<u8> {
    let items = sample_entries();
    let entries: Vec<FileEntry> = items.iter().map(|(e, _)| e.clone()).collect();

    let mut header = text_header::encode(&entries, "2004/05/06 07:08:09");
    let padded = header.len().div_ceil(UNIT) * UNIT;
    header.resize(padded, 0);

    let mut out = Vec::new();
    out.write_i32::<LittleEndian>(padded as i32).unwrap();
    out.extend_from_slice(TOKEN);
    out.write_i32::<LittleEndian>(103).unwrap();

    let mut encoder = LegacyEncoder::new(LegacyCipher::blowfish(password).unwrap(), DEFAULT_ZLIB_LEVEL);
    encoder.write_units(&mut out, &mut header).unwrap();
    for (entry, data) in &items {
        if !entry.is_directory() {
            encoder.write(&mut out, data).unwrap();
        }
    }
    encoder.finish(&mut out).unwrap();
    out
}

/// Wrap `container` the way a self-extracting executable carries it.
pub fn self_extracting(container: &[u8]) -> Vec<u8> {
    let mut out = b"MZ\x90\x00 stub executable bytes ".repeat(16);
    out.extend_from_slice(container);
    out.write_i64::<LittleEndian>(container.len() as i64).unwrap();
    out
}

/// Open `stream` and extract every file entry as `(name, data)`.
pub fn unlock_all<S: Read + Write + Seek>(stream: S, password: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut unlocker = Unlocker::open(stream, password).unwrap();
    let entries = unlocker.entries().to_vec();
    let mut out = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        if entry.is_directory() {
            continue;
        }
        let mut data = Vec::new();
        unlocker.extract_entry(i, &mut data).unwrap();
        out.push((entry.display_name().into_owned(), data));
    }
    out
}

/// Expected `(name, data)` pairs of [`sample_entries`].
pub fn sample_files() -> Vec<(String, Vec<u8>)> {
    sample_entries()
        .into_iter()
        .filter(|(e, _)| !e.is_directory())
        .map(|(e, d)| (e.name_utf8, d))
        .collect()
}

pub fn digest(data: &[u8]) -> blake3::Hash {
    blake3::hash(data)
}

pub fn cursor(bytes: Vec<u8>) -> Cursor<Vec<u8>> {
    Cursor::new(bytes)
}
