use super::{as_refs, build, numbered};
use crate::{Error, Flags, Tndb};
use anyhow::Result;
use std::fs::OpenOptions;
use std::io::Read;
use tempfile::tempdir;

// -------------------- Ordering & completeness --------------------

#[test]
fn iterates_in_write_order() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("order.tndb");
    let pairs = numbered(1000);
    build(&path, Flags::SIGNED, &as_refs(&pairs))?;

    let db = Tndb::open(&path)?;
    let got: Vec<(Vec<u8>, Vec<u8>)> = db.records()?.collect::<crate::Result<_>>()?;
    assert_eq!(got, pairs);
    Ok(())
}

#[test]
fn exhausted_after_nrec() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("two.tndb");
    build(&path, Flags::empty(), &[(b"a", b"1"), (b"b", b"22")])?;

    let db = Tndb::open(&path)?;
    let mut it = db.iter()?;
    let mut key = Vec::new();

    let first = it.get_value_offset(Some(&mut key))?.expect("first record");
    assert_eq!(key, b"a");
    assert_eq!(first.key_len, 1);
    assert_eq!(first.value.len, 1);
    assert_eq!(first.value.offset, u64::from(db.header().doffs()) + 6);

    let second = it.get_value_offset(Some(&mut key))?.expect("second record");
    assert_eq!(key, b"b");
    assert_eq!(second.value.offset, first.value.end() + 6);
    assert_eq!(it.position(), 2);

    assert!(it.get_value_offset(None)?.is_none());
    assert!(it.get_value_offset(None)?.is_none());
    Ok(())
}

#[test]
fn duplicates_are_all_visited() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("dup.tndb");
    build(&path, Flags::empty(), &[(b"k", b"1"), (b"k", b"2")])?;

    let db = Tndb::open(&path)?;
    let values: Vec<Vec<u8>> = db.records()?.map(|r| r.map(|(_, v)| v)).collect::<crate::Result<_>>()?;
    assert_eq!(values, vec![b"1".to_vec(), b"2".to_vec()]);
    Ok(())
}

// -------------------- Value access --------------------

#[test]
fn get_copies_into_fixed_buffer() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("fixed.tndb");
    build(&path, Flags::empty(), &[(b"k1", b"v1"), (b"k2", b"v2longer")])?;

    let db = Tndb::open(&path)?;
    let mut it = db.iter()?;
    let mut key = Vec::new();
    let mut buf = [0u8; 16];

    assert_eq!(it.get(Some(&mut key), &mut buf)?, Some(2));
    assert_eq!((&key[..], &buf[..2]), (&b"k1"[..], &b"v1"[..]));
    assert_eq!(it.get(None, &mut buf)?, Some(8));
    assert_eq!(&buf[..8], b"v2longer");
    assert_eq!(it.get(None, &mut buf)?, None);
    Ok(())
}

#[test]
#[should_panic(expected = "not enough space for data")]
fn get_with_undersized_buffer_panics() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tight.tndb");
    build(&path, Flags::empty(), &[(b"k", b"longer than four")]).unwrap();

    let db = Tndb::open(&path).unwrap();
    let mut it = db.iter().unwrap();
    let mut buf = [0u8; 4];
    let _ = it.get(None, &mut buf);
}

#[test]
fn rget_grows_buffer() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("grow.tndb");
    let big = vec![0x42u8; 100_000];
    build(&path, Flags::NOHASH, &[(b"small", b"x"), (b"big", &big)])?;

    let db = Tndb::open(&path)?;
    let mut it = db.iter()?;
    let mut value = Vec::new();
    assert_eq!(it.rget(None, &mut value)?, Some(1));
    assert_eq!(value, b"x");
    assert_eq!(it.rget(None, &mut value)?, Some(100_000));
    assert_eq!(value, big);
    assert_eq!(it.rget(None, &mut value)?, None);
    Ok(())
}

#[test]
fn direct_value_streams_in_place() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("direct.tndb");
    build(&path, Flags::SIGNED, &[(b"one", b"0123456789"), (b"two", b"abc")])?;

    let db = Tndb::open(&path)?;
    let mut it = db.iter()?;
    let mut key = Vec::new();

    {
        let mut dv = it.begin(Some(&mut key))?.expect("first record");
        assert_eq!(key, b"one");
        assert_eq!(dv.remaining(), 10);

        let mut head = [0u8; 4];
        dv.read_exact(&mut head)?;
        assert_eq!(&head, b"0123");
        assert_eq!(dv.remaining(), 6);
        dv.end()?;
    }

    {
        let mut dv = it.begin(Some(&mut key))?.expect("second record");
        assert_eq!(key, b"two");
        let mut rest = Vec::new();
        dv.read_to_end(&mut rest)?;
        assert_eq!(rest, b"abc");
        assert_eq!(dv.record().value.len, 3);
        dv.end()?;
    }

    assert!(it.begin(None)?.is_none());
    Ok(())
}

#[test]
fn dropped_direct_value_does_not_derail_iteration() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("drop.tndb");
    build(&path, Flags::empty(), &[(b"a", b"aaaa"), (b"b", b"bbbb")])?;

    let db = Tndb::open(&path)?;
    let mut it = db.iter()?;
    {
        let mut dv = it.begin(None)?.expect("first record");
        let mut one = [0u8; 1];
        dv.read_exact(&mut one)?;
    }

    let mut key = Vec::new();
    let mut value = Vec::new();
    assert_eq!(it.rget(Some(&mut key), &mut value)?, Some(4));
    assert_eq!((key, value), (b"b".to_vec(), b"bbbb".to_vec()));
    Ok(())
}

// -------------------- Truncation --------------------

#[test]
fn truncated_file_reports_truncated_record() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("cut.tndb");
    build(&path, Flags::NOHASH, &[(b"a", b"1"), (b"b", b"2"), (b"c", b"333")])?;

    let len = std::fs::metadata(&path)?.len();
    OpenOptions::new().write(true).open(&path)?.set_len(len - 2)?;

    let db = Tndb::open(&path)?;
    let mut it = db.iter()?;
    assert!(it.get_value_offset(None)?.is_some());
    assert!(it.get_value_offset(None)?.is_some());

    let err = it.get_value_offset(None).unwrap_err();
    let third = u64::from(db.header().doffs()) + 2 * 7;
    assert!(
        matches!(err, Error::TruncatedRecord { index: 2, offset } if offset == third),
        "{:?}",
        err
    );
    Ok(())
}

#[test]
fn truncated_key_is_reported() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("cut-key.tndb");
    build(&path, Flags::NOHASH, &[(b"a", b"1"), (b"long-key", b"v")])?;

    let len = std::fs::metadata(&path)?.len();
    // keep klen and two key bytes of the second record
    OpenOptions::new().write(true).open(&path)?.set_len(len - (1 + 8 + 4 + 1) + 3)?;

    let db = Tndb::open(&path)?;
    let records: Vec<_> = db.records()?.collect();
    assert_eq!(records.len(), 2);
    assert!(records[0].is_ok());
    assert!(matches!(records[1], Err(Error::TruncatedRecord { index: 1, .. })));
    Ok(())
}
