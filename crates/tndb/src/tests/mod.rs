mod iter_tests;

use crate::{Flags, TndbWriter};
use std::path::Path;

/// Writes `pairs` in order and closes the writer.
fn build(path: &Path, flags: Flags, pairs: &[(&[u8], &[u8])]) -> crate::Result<()> {
    let w = TndbWriter::create(path, flags)?;
    for (k, v) in pairs {
        w.put(k, v)?;
    }
    w.close()?;
    Ok(())
}

fn numbered(n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    (0..n)
        .map(|i| {
            (
                format!("key-{:05}", i).into_bytes(),
                format!("value-{}", i).repeat(i % 7 + 1).into_bytes(),
            )
        })
        .collect()
}

fn as_refs(pairs: &[(Vec<u8>, Vec<u8>)]) -> Vec<(&[u8], &[u8])> {
    pairs.iter().map(|(k, v)| (k.as_slice(), v.as_slice())).collect()
}

/// Flips every bit of the byte at `offset`.
fn flip_byte(path: &Path, offset: usize) {
    let mut bytes = std::fs::read(path).unwrap();
    bytes[offset] ^= 0xff;
    std::fs::write(path, bytes).unwrap();
}
