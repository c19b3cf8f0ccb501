use criterion::{black_box, criterion_group, criterion_main, Criterion};
use satchel::{CodecId, FileEntry, FormatVersion, KdfParams, Locker, LockerOptions, Unlocker};
use std::io::Cursor;

const PASSWORD: &[u8] = b"bench password";

fn options(format: FormatVersion, codec: CodecId) -> LockerOptions {
    LockerOptions { format, codec, kdf: KdfParams::insecure_fast(), ..LockerOptions::default() }
}

fn lock(data: &[u8], opts: LockerOptions) -> Vec<u8> {
    let mut locker = Locker::open(Vec::new(), PASSWORD, opts).unwrap();
    locker.add_file_entry(FileEntry::file("bench.bin", data.len() as u64).unwrap()).unwrap();
    locker.write_encrypted_header().unwrap();
    locker.write_file_data(data, data.len() as u64).unwrap();
    locker.close().unwrap()
}

fn bench_lock(c: &mut Criterion) {
    let data = vec![42u8; 1024 * 1024];

    c.bench_function("lock_1mb_aead_zstd", |b| {
        b.iter(|| lock(black_box(&data), options(FormatVersion::Current, CodecId::Zstd)))
    });
    c.bench_function("lock_1mb_aead_stored", |b| {
        b.iter(|| lock(black_box(&data), options(FormatVersion::Current, CodecId::None)))
    });
    c.bench_function("lock_1mb_legacy_rijndael", |b| {
        b.iter(|| lock(black_box(&data), options(FormatVersion::LegacyRijndaelGuarded, CodecId::Zstd)))
    });
}

fn bench_unlock(c: &mut Criterion) {
    let data: Vec<u8> = (0..1024 * 1024u32).map(|i| (i % 251) as u8).collect();

    for (name, format) in [
        ("unlock_1mb_aead", FormatVersion::Current),
        ("unlock_1mb_legacy_rijndael", FormatVersion::LegacyRijndaelGuarded),
    ] {
        let container = lock(&data, options(format, CodecId::Zstd));
        c.bench_function(name, |b| {
            b.iter(|| {
                let mut unlocker = Unlocker::open(Cursor::new(container.clone()), PASSWORD).unwrap();
                let mut out = Vec::with_capacity(data.len());
                unlocker.extract_file_data(&mut out, data.len() as u64).unwrap();
                black_box(out)
            })
        });
    }
}

criterion_group!(benches, bench_lock, bench_unlock);
criterion_main!(benches);
