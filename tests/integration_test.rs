mod common;

use common::*;
use satchel::block::CHUNK_SIZE;
use satchel::superblock::{BROKEN_TOKEN, TOKEN};
use satchel::{AtcError, CodecId, FileEntry, FormatVersion, LockerOptions, Unlocker};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use tempfile::NamedTempFile;

fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let mut tmp = NamedTempFile::new().unwrap();
    tmp.write_all(bytes).unwrap();
    tmp.flush().unwrap();
    tmp
}

fn open_rw(tmp: &NamedTempFile) -> File {
    OpenOptions::new().read(true).write(true).open(tmp.path()).unwrap()
}

fn read_back(tmp: &NamedTempFile) -> Vec<u8> {
    let mut bytes = Vec::new();
    File::open(tmp.path()).unwrap().read_to_end(&mut bytes).unwrap();
    bytes
}

#[test]
fn test_lock_unlock_roundtrip() {
    let tmp = NamedTempFile::new().unwrap();
    lock_into(File::create(tmp.path()).unwrap(), &sample_entries(), fast_options());

    let mut file = open_rw(&tmp);
    let mut unlocker = Unlocker::open(&mut file, PASSWORD).unwrap();
    let names: Vec<_> = unlocker.entries().iter().map(|e| e.name_utf8.clone()).collect();
    assert_eq!(names, ["test\\", "test\\a.txt", "test\\b.txt"]);
    assert!(unlocker.entries()[0].is_directory());
    assert_eq!(unlocker.entries()[1].change_time, 1_600_000_300);
    assert_eq!(unlocker.entries()[2].create_time, 1_600_000_400);
    assert_eq!(unlocker.created(), Some(1_700_000_000));
    assert_eq!(unlocker.passwd_try_limit(), 3);
    assert!(!unlocker.self_destruction());

    let expected = sample_files();
    for (i, (_, data)) in expected.iter().enumerate() {
        let mut out = Vec::new();
        unlocker.extract_file_data(&mut out, data.len() as u64).unwrap();
        assert_eq!(digest(&out), digest(data), "entry {i}");
    }
}

#[test]
fn test_uncompressed_codec_roundtrip() {
    let opts = LockerOptions { codec: CodecId::None, ..fast_options() };
    let bytes = lock_bytes(&sample_entries(), opts);
    assert_eq!(unlock_all(cursor(bytes), PASSWORD), sample_files());
}

#[test]
fn test_ciphertext_hides_plaintext() {
    let bytes = current_container(3, false);
    let needle = b"quick brown fox";
    assert!(!bytes.windows(needle.len()).any(|w| w == needle));
    assert!(!bytes.windows(5).any(|w| w == b"a.txt"));
}

#[test]
fn test_zero_length_and_multi_chunk_payloads() {
    let big: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i * 31 % 251) as u8).collect();
    let items = vec![
        (FileEntry::file("empty.bin", 0).unwrap(), Vec::new()),
        (FileEntry::file("big.bin", big.len() as u64).unwrap(), big.clone()),
        (FileEntry::file("exact.bin", CHUNK_SIZE as u64).unwrap(), vec![7u8; CHUNK_SIZE]),
    ];
    let bytes = lock_bytes(&items, fast_options());
    let files = unlock_all(cursor(bytes), PASSWORD);
    assert_eq!(files.len(), 3);
    assert!(files[0].1.is_empty());
    assert_eq!(digest(&files[1].1), digest(&big));
    assert_eq!(files[2].1, vec![7u8; CHUNK_SIZE]);
}

#[test]
fn test_wrong_password_decrements_counter() {
    let tmp = write_temp(&current_container(3, false));

    let err = Unlocker::open(open_rw(&tmp), WRONG).err().unwrap();
    assert!(matches!(err, AtcError::WrongKey { remaining: Some(2) }));
    assert_eq!(read_back(&tmp)[2], 2);

    let err = Unlocker::open(open_rw(&tmp), WRONG).err().unwrap();
    assert!(matches!(err, AtcError::WrongKey { remaining: Some(1) }));
    assert_eq!(read_back(&tmp)[2], 1);

    // A correct password restores the configured budget.
    assert_eq!(unlock_all(open_rw(&tmp), PASSWORD), sample_files());
    assert_eq!(read_back(&tmp)[2], 3);
}

#[test]
fn test_counter_saturates_without_self_destruction() {
    let tmp = write_temp(&current_container(1, false));
    for _ in 0..3 {
        let err = Unlocker::open(open_rw(&tmp), WRONG).err().unwrap();
        assert!(matches!(err, AtcError::WrongKey { remaining: Some(0) }));
    }
    let bytes = read_back(&tmp);
    assert_eq!(&bytes[4..20], TOKEN);
    assert_eq!(unlock_all(open_rw(&tmp), PASSWORD), sample_files());
}

#[test]
fn test_exhausted_budget_self_destructs() {
    let original = current_container(3, true);
    let tmp = write_temp(&original);

    for remaining in [2u8, 1] {
        let err = Unlocker::open(open_rw(&tmp), WRONG).err().unwrap();
        assert!(matches!(err, AtcError::WrongKey { remaining: Some(r) } if r == remaining));
    }
    let err = Unlocker::open(open_rw(&tmp), WRONG).err().unwrap();
    assert!(matches!(err, AtcError::SelfDestructed));

    let bytes = read_back(&tmp);
    assert_eq!(bytes.len(), original.len());
    assert_eq!(&bytes[4..20], BROKEN_TOKEN);
    assert_ne!(&bytes[24..], &original[24..]);

    // Even the right password cannot recover it.
    assert!(matches!(Unlocker::open(open_rw(&tmp), PASSWORD).err().unwrap(), AtcError::SelfDestructed));
    assert!(matches!(Unlocker::probe(&mut File::open(tmp.path()).unwrap()), Err(AtcError::SelfDestructed)));
}

#[test]
fn test_interrupted_destruction_is_resumed() {
    let mut bytes = current_container(2, true);
    // Counter already zeroed but the token never replaced.
    bytes[2] = 0;
    let tmp = write_temp(&bytes);

    let err = Unlocker::open(open_rw(&tmp), PASSWORD).err().unwrap();
    assert!(matches!(err, AtcError::SelfDestructed));
    assert_eq!(&read_back(&tmp)[4..20], BROKEN_TOKEN);
}

#[test]
fn test_probe_reads_plain_header_only() {
    let bytes = current_container(7, true);
    let mut c = cursor(bytes.clone());
    let info = Unlocker::probe(&mut c).unwrap();
    assert_eq!(info.format, FormatVersion::Current);
    assert_eq!(info.data_version, 106);
    assert_eq!(info.sub_version, 6);
    assert_eq!(info.offset, 0);
    assert!(!info.self_extracting);
    assert_eq!(info.passwd_try_limit, 7);
    assert!(info.self_destruction);
    assert_eq!(c.into_inner(), bytes);

    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["format"], "aead");
}

#[test]
fn test_plain_file_is_not_a_container() {
    let mut c = cursor(b"just some text that happens to be long enough".to_vec());
    assert!(matches!(Unlocker::probe(&mut c), Err(AtcError::NotAContainer)));
    assert!(matches!(Unlocker::open(c, PASSWORD).err().unwrap(), AtcError::NotAContainer));
    assert!(matches!(Unlocker::probe(&mut cursor(Vec::new())), Err(AtcError::NotAContainer)));
}

#[test]
fn test_unknown_version_is_unsupported() {
    let mut bytes = current_container(3, false);
    bytes[20..24].copy_from_slice(&250i32.to_le_bytes());
    let tmp = write_temp(&bytes);
    let err = Unlocker::open(open_rw(&tmp), PASSWORD).err().unwrap();
    assert!(matches!(err, AtcError::UnsupportedVersion(250)));
    assert_eq!(read_back(&tmp), bytes);
}

#[test]
fn test_tampered_plain_header_is_broken() {
    let mut bytes = current_container(3, false);
    bytes[30] ^= 0xff;
    let err = Unlocker::open(cursor(bytes), PASSWORD).err().unwrap();
    assert!(matches!(err, AtcError::BrokenHeader(_)));
}

#[test]
fn test_out_of_order_extraction_fails() {
    let bytes = current_container(3, false);
    let mut unlocker = Unlocker::open(cursor(bytes), PASSWORD).unwrap();

    let mut sink = Vec::new();
    assert!(matches!(unlocker.extract_entry(2, &mut sink), Err(AtcError::OutOfOrder(_))));
    assert!(matches!(unlocker.extract_file_data(&mut sink, 1), Err(AtcError::OutOfOrder(_))));
    assert!(matches!(unlocker.extract_entry(9, &mut sink), Err(AtcError::InvalidEntry(_))));
    assert!(sink.is_empty());

    // Still usable in the right order.
    unlocker.extract_entry(0, &mut sink).unwrap();
    unlocker.extract_entry(1, &mut sink).unwrap();
    assert_eq!(sink, sample_files()[0].1);
    sink.clear();
    unlocker.extract_entry(2, &mut sink).unwrap();
    assert_eq!(sink, sample_files()[1].1);
    assert!(matches!(unlocker.extract_file_data(&mut sink, 0), Err(AtcError::OutOfOrder(_))));
}

#[test]
fn test_truncated_data_is_corrupted() {
    let big = vec![0x5au8; CHUNK_SIZE * 2];
    let items = vec![(FileEntry::file("big.bin", big.len() as u64).unwrap(), big.clone())];
    let opts = LockerOptions { codec: CodecId::None, ..fast_options() };
    let mut bytes = lock_bytes(&items, opts);
    bytes.truncate(bytes.len() - 100);

    let mut unlocker = Unlocker::open(cursor(bytes), PASSWORD).unwrap();
    let err = unlocker.extract_file_data(Vec::new(), big.len() as u64).unwrap_err();
    assert!(matches!(err, AtcError::Corrupted(_)));
    // The session refuses to continue after a failure.
    assert!(matches!(unlocker.extract_file_data(Vec::new(), big.len() as u64), Err(AtcError::OutOfOrder(_))));
}

#[test]
fn test_flipped_data_byte_is_corrupted_not_wrong_key() {
    let mut bytes = current_container(3, false);
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    let tmp = write_temp(&bytes);

    let mut unlocker = Unlocker::open(open_rw(&tmp), PASSWORD).unwrap();
    unlocker.extract_entry(1, Vec::new()).unwrap();
    let err = unlocker.extract_entry(2, Vec::new()).unwrap_err();
    assert!(matches!(err, AtcError::Corrupted(_)));
    // Data errors never charge the counter.
    assert_eq!(read_back(&tmp)[2], 3);
}

#[test]
fn test_self_extracting_container() {
    let container = current_container(3, true);
    let wrapped = self_extracting(&container);
    let stub_len = (wrapped.len() - container.len() - 8) as u64;

    let mut c = cursor(wrapped.clone());
    let info = Unlocker::probe(&mut c).unwrap();
    assert!(info.self_extracting);
    assert_eq!(info.offset, stub_len);
    assert_eq!(unlock_all(cursor(wrapped.clone()), PASSWORD), sample_files());

    // Counter and destruction act on the embedded container only.
    let tmp = write_temp(&wrapped);
    let err = Unlocker::open(open_rw(&tmp), WRONG).err().unwrap();
    assert!(matches!(err, AtcError::WrongKey { remaining: Some(2) }));
    assert_eq!(read_back(&tmp)[stub_len as usize + 2], 2);
    for _ in 0..2 {
        let _ = Unlocker::open(open_rw(&tmp), WRONG);
    }
    let bytes = read_back(&tmp);
    assert_eq!(&bytes[..stub_len as usize], &wrapped[..stub_len as usize]);
    assert_eq!(&bytes[bytes.len() - 8..], &wrapped[wrapped.len() - 8..]);
    let token = stub_len as usize + 4;
    assert_eq!(&bytes[token..token + 16], BROKEN_TOKEN);
}

#[test]
fn test_unlocker_releases_stream() {
    let tmp = write_temp(&current_container(3, false));
    let unlocker = Unlocker::open(open_rw(&tmp), PASSWORD).unwrap();
    let mut file = unlocker.into_inner();
    file.seek(SeekFrom::Start(4)).unwrap();
    let mut token = [0u8; 16];
    file.read_exact(&mut token).unwrap();
    assert_eq!(&token, TOKEN);
}
