/// End-to-end tests for tndb through the public API only.
/// Covers: build/open/lookup cycles, verification, compressed files,
/// shared handles across threads, and a randomized round-trip property.
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;
use tndb::{Closed, Flags, Tndb, TndbConfig, TndbWriter};

fn write_all(path: &std::path::Path, flags: Flags, pairs: &[(Vec<u8>, Vec<u8>)]) -> tndb::Result<()> {
    let w = TndbWriter::create(path, flags)?;
    for (k, v) in pairs {
        w.put(k, v)?;
    }
    assert_eq!(w.close()?, Closed::Finalized);
    Ok(())
}

#[test]
fn build_open_lookup_scan() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("cities.tndb");
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = [("paris", "fr"), ("lima", "pe"), ("oslo", "no"), ("quito", "ec")]
        .iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect();
    write_all(&path, Flags::SIGNED, &pairs)?;

    let db = Tndb::open(&path)?;
    assert_eq!(db.len(), 4);
    assert_eq!(db.get_str("oslo")?.as_deref(), Some("no"));
    assert_eq!(db.get_str("bern")?, None);
    assert_eq!(db.keys()?, pairs.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>());
    assert!(db.verify()?);
    assert_eq!(db.close()?, Closed::Released);
    Ok(())
}

#[test]
fn concurrent_readers_share_one_handle() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("shared.tndb");
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0..1000)
        .map(|i| (format!("k{}", i).into_bytes(), format!("v{}", i * i).into_bytes()))
        .collect();
    write_all(&path, Flags::SIGNED, &pairs)?;

    let db = Tndb::open(&path)?;
    let pairs = Arc::new(pairs);
    let workers: Vec<_> = (0..4)
        .map(|t| {
            let db = db.share();
            let pairs = Arc::clone(&pairs);
            thread::spawn(move || -> tndb::Result<()> {
                for (k, v) in pairs.iter().skip(t).step_by(4) {
                    assert_eq!(db.get_all(k)?.as_ref(), Some(v));
                }
                assert_eq!(db.close()?, Closed::Deferred);
                Ok(())
            })
        })
        .collect();

    for w in workers {
        w.join().expect("reader thread panicked")?;
    }
    assert_eq!(db.close()?, Closed::Released);
    Ok(())
}

#[test]
fn environment_style_config_is_honored() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("env.tndb.zst");

    let vars: HashMap<&str, &str> = [
        ("TNDB_SIDECAR_EXT", "chk"),
        ("TNDB_COPY_BUFFER_KB", "1"),
        ("TNDB_COMPRESSION_LEVEL", "19"),
    ]
    .into_iter()
    .collect();
    let cfg = TndbConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

    let w = TndbWriter::create_with(&path, Flags::SIGNED, &cfg)?;
    for i in 0..200u32 {
        w.put(&i.to_be_bytes(), &vec![b'z'; 64])?;
    }
    w.close()?;

    let db = Tndb::open_with(&path, &cfg)?;
    assert_eq!(db.get_all(&7u32.to_be_bytes())?, Some(vec![b'z'; 64]));
    assert!(dir.path().join("env.tndb.zst.chk").exists());
    Ok(())
}

fn entries() -> impl Strategy<Value = Vec<(Vec<u8>, Vec<u8>)>> {
    prop::collection::vec(
        (
            prop::collection::vec(any::<u8>(), 0..40),
            prop::collection::vec(any::<u8>(), 0..200),
        ),
        0..120,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn roundtrip_matches_last_write(pairs in entries(), signed in any::<bool>()) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prop.tndb");
        let flags = if signed { Flags::SIGNED } else { Flags::empty() };
        write_all(&path, flags, &pairs).unwrap();

        let mut expected: HashMap<&[u8], &[u8]> = HashMap::new();
        for (k, v) in &pairs {
            expected.insert(k, v);
        }

        let db = Tndb::open(&path).unwrap();
        prop_assert_eq!(db.len(), pairs.len());
        for (k, v) in &expected {
            let got = db.get_all(k).unwrap();
            prop_assert_eq!(got.as_deref(), Some(*v));
        }

        let scanned: Vec<(Vec<u8>, Vec<u8>)> = db.records().unwrap().map(|r| r.unwrap()).collect();
        prop_assert_eq!(&scanned, &pairs);

        if signed {
            prop_assert!(db.verify_digest().unwrap());
        }
    }
}
