//! End-to-end tests over a real cellar folder: write, seal, checkpoint,
//! reopen, and read back across chunk boundaries.

use std::io::Read;

use cellar::{CellarReader, CellarWriter, MetaStore, RedbMetaStore};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tempfile::TempDir;

const KEY: [u8; 32] = [0xA5; 32];

/// Honor RUST_LOG when a test needs engine traces; repeated calls are fine.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Collect every record as (position, key, value).
fn drain(reader: &mut CellarReader) -> Vec<(u64, Vec<u8>, Vec<u8>)> {
    let mut records = Vec::new();
    reader
        .read_all(|pos, key, value| {
            let mut bytes = Vec::new();
            value.read_to_end(&mut bytes).unwrap();
            records.push((pos, key.to_vec(), bytes));
        })
        .unwrap();
    records
}

#[test]
fn fixed_size_regression() {
    let dir = TempDir::new().unwrap();
    let key_bytes = [0u8; 8];
    let value = [0u8; 64];
    let mut value_bytes_written = 0u64;

    let mut writer = CellarWriter::create(dir.path(), 1000, KEY).unwrap();
    for _ in 0..30 {
        writer
            .append_stream(&key_bytes, &mut &value[..], value.len() as u32)
            .unwrap();
        value_bytes_written += value.len() as u64;
    }
    writer.checkpoint("s", 0).unwrap();

    let size = writer.estimate_size().unwrap();
    assert_eq!(size.records, 30);
    assert_eq!(size.chunk_count, 2);
    drop(writer);

    let mut value_bytes_read = 0u64;
    let mut reader = CellarReader::open(dir.path(), KEY).unwrap();
    reader
        .read_all(|_, _, value| value_bytes_read += value.len())
        .unwrap();

    assert_eq!(value_bytes_written, value_bytes_read);
    assert_eq!(value_bytes_read, 30 * 64);
}

#[test]
fn roundtrip_across_seal_boundaries() {
    let dir = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(7);

    let mut expected: Vec<(u64, Vec<u8>, Vec<u8>)> = Vec::new();
    {
        // a small cap so the workload spans several chunks
        let mut writer = CellarWriter::create(dir.path(), 600, KEY).unwrap();
        for _ in 0..60 {
            let mut key = vec![0u8; rng.gen_range(0..24)];
            rng.fill_bytes(&mut key);
            let mut value = vec![0u8; rng.gen_range(0..120)];
            rng.fill_bytes(&mut value);

            let pos = writer.append(&key, &value).unwrap();
            expected.push((pos, key, value));
        }
        writer.checkpoint("s", 0).unwrap();
    }

    let mut reader = CellarReader::open(dir.path(), KEY).unwrap();
    let records = drain(&mut reader);
    assert_eq!(records, expected);
}

#[test]
fn positions_resume_to_exactly_one_record() {
    let dir = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(11);

    let mut expected: Vec<(u64, Vec<u8>, Vec<u8>)> = Vec::new();
    {
        let mut writer = CellarWriter::create(dir.path(), 500, KEY).unwrap();
        for i in 0..40u32 {
            let key = i.to_be_bytes().to_vec();
            let mut value = vec![0u8; rng.gen_range(1..90)];
            rng.fill_bytes(&mut value);
            let pos = writer.append(&key, &value).unwrap();
            expected.push((pos, key, value));
        }
        writer.checkpoint("s", 0).unwrap();
    }

    for (pos, key, value) in &expected {
        let mut reader = CellarReader::open(dir.path(), KEY).unwrap();
        let mut hits = Vec::new();
        reader
            .read_from(*pos, 1, |p, k, v| {
                let mut bytes = Vec::new();
                v.read_to_end(&mut bytes).unwrap();
                hits.push((p, k.to_vec(), bytes));
            })
            .unwrap();
        assert_eq!(hits, vec![(*pos, key.clone(), value.clone())]);
    }
}

#[test]
fn offsets_into_the_tail_and_past_the_end() {
    let dir = TempDir::new().unwrap();

    let mut writer = CellarWriter::create(dir.path(), 1 << 16, KEY).unwrap();
    let mut positions = Vec::new();
    for i in 0u8..5 {
        positions.push(writer.append(&[i], &[i; 10]).unwrap());
    }
    writer.checkpoint("s", 0).unwrap();
    drop(writer);

    let mut reader = CellarReader::open(dir.path(), KEY).unwrap();

    // resume from the middle of the tail
    let mut keys = Vec::new();
    reader
        .read_from(positions[3], u64::MAX, |_, k, _| keys.push(k[0]))
        .unwrap();
    assert_eq!(keys, vec![3, 4]);

    // an offset past everything yields nothing
    let mut seen = 0;
    reader
        .read_from(reader.byte_size(), u64::MAX, |_, _, _| seen += 1)
        .unwrap();
    assert_eq!(seen, 0);
}

#[test]
fn crash_tail_tolerance() {
    let dir = TempDir::new().unwrap();

    {
        let mut writer = CellarWriter::create(dir.path(), 4096, KEY).unwrap();
        for i in 0u8..6 {
            writer.append(&[i; 4], &[i; 32]).unwrap();
        }
        writer.checkpoint("s", 0).unwrap();
    }

    let mut reader = CellarReader::open(dir.path(), KEY).unwrap();
    let before = drain(&mut reader);
    drop(reader);

    // grow the buffer file well past its preallocation; only the recorded
    // position may matter to the scan
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|e| e == "blob") {
            let len = path.metadata().unwrap().len();
            std::fs::OpenOptions::new()
                .write(true)
                .open(&path)
                .unwrap()
                .set_len(len + 8192)
                .unwrap();
        }
    }

    let mut reader = CellarReader::open(dir.path(), KEY).unwrap();
    let after = drain(&mut reader);
    assert_eq!(before, after);
}

#[test]
fn watermarks_and_partition_hold_after_mixed_workload() {
    let dir = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(23);

    let mut max_key = 0u32;
    let mut max_val = 0u32;
    {
        let mut writer = CellarWriter::create(dir.path(), 700, KEY).unwrap();
        for _ in 0..80 {
            let key = vec![1u8; rng.gen_range(0..40)];
            let value = vec![2u8; rng.gen_range(0..150)];
            max_key = max_key.max(key.len() as u32);
            max_val = max_val.max(value.len() as u32);
            writer.append(&key, &value).unwrap();
        }
        writer.checkpoint("s", 0).unwrap();
    }

    let store = RedbMetaStore::open(dir.path().join("meta.redb")).unwrap();
    let txn = store.begin_read().unwrap();

    let chunks = cellar::meta::schema::list_chunks(&txn).unwrap();
    assert!(!chunks.is_empty());

    // chunk ranges are contiguous from zero and the tail starts where they end
    let mut next_start = 0u64;
    for chunk in &chunks {
        assert_eq!(chunk.start_pos, next_start);
        assert!(chunk.uncompressed_byte_size > 0);
        next_start = chunk.start_pos + chunk.uncompressed_byte_size;
    }

    let buffer = cellar::meta::schema::get_buffer(&txn).unwrap().unwrap();
    assert_eq!(buffer.start_pos, next_start);

    let cellar_meta = cellar::meta::schema::get_cellar_meta(&txn).unwrap().unwrap();
    assert_eq!(cellar_meta.max_key_size, max_key);
    assert_eq!(cellar_meta.max_val_size, max_val);
}

#[test]
fn checkpoints_survive_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let mut writer = CellarWriter::create(dir.path(), 1024, KEY).unwrap();
        writer.append(b"k", b"v").unwrap();
        writer.checkpoint("ingest", 12_345).unwrap();
    }

    let reader = CellarReader::open(dir.path(), KEY).unwrap();
    assert_eq!(reader.get_checkpoint("ingest", 0).unwrap(), 12_345);
    assert_eq!(reader.get_checkpoint("unknown", -9).unwrap(), -9);
    drop(reader);

    let writer = CellarWriter::create(dir.path(), 1024, KEY).unwrap();
    assert_eq!(writer.get_checkpoint("ingest", 0).unwrap(), 12_345);
}

#[test]
fn fuzz_reopen_roundtrip() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(0xCE11A7);

    // a deliberately small cap so seals happen constantly
    let cap = rng.gen_range(256..2048);
    let mut writer = Some(CellarWriter::create(dir.path(), cap, KEY).unwrap());
    let mut bytes_written = 0u64;

    for i in 0..400 {
        if rng.gen_range(0..17) == 13 {
            // simulate a restart: checkpoint, drop, verify, reopen
            let mut w = writer.take().unwrap();
            w.checkpoint("", 0).unwrap();
            drop(w);

            let mut bytes_read = 0u64;
            let mut reader = CellarReader::open(dir.path(), KEY).unwrap();
            reader
                .read_all(|_, _, value| bytes_read += value.len())
                .unwrap();
            drop(reader);
            assert_eq!(bytes_written, bytes_read, "iteration {i}");

            writer = Some(CellarWriter::create(dir.path(), cap, KEY).unwrap());
        }

        let w = writer.as_mut().unwrap();
        let mut key = vec![0u8; rng.gen_range(0..64)];
        rng.fill_bytes(&mut key);
        let mut value = vec![0u8; rng.gen_range(0..512)];
        rng.fill_bytes(&mut value);

        if i % 3 == 0 {
            w.append_stream(&key, &mut value.as_slice(), value.len() as u32)
                .unwrap();
        } else {
            w.append(&key, &value).unwrap();
        }
        bytes_written += value.len() as u64;
    }

    let mut w = writer.take().unwrap();
    w.checkpoint("", 0).unwrap();
    drop(w);

    let mut bytes_read = 0u64;
    let mut reader = CellarReader::open(dir.path(), KEY).unwrap();
    reader
        .read_all(|_, _, value| bytes_read += value.len())
        .unwrap();
    assert_eq!(bytes_written, bytes_read);
}
