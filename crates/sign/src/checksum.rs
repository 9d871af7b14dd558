//! Whole-file MD5 sidecar.
//!
//! The sidecar lives next to the database as `<path>.<ext>` and holds the
//! 32 lowercase hex characters of the MD5 of the finished file. It is not
//! part of the signature scheme; it only lets a repeated verification of an
//! unchanged file skip the full digest recomputation.

use md5::{Digest as _, Md5};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Length of the hex-encoded MD5 stored in a sidecar.
pub const SIDECAR_HEX_LEN: usize = 32;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ChecksumError {
    fn io(path: &Path, source: io::Error) -> Self {
        ChecksumError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Returns `path` with `.<ext>` appended to the full file name
/// (`db.tndb` → `db.tndb.md5`).
pub fn sidecar_path(path: &Path, ext: &str) -> PathBuf {
    let mut s = OsString::from(path.as_os_str());
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// MD5 of the file at `path`, hex-encoded.
pub fn md5_hex(path: &Path) -> Result<String, ChecksumError> {
    let mut f = File::open(path).map_err(|e| ChecksumError::io(path, e))?;
    let mut ctx = Md5::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match f.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ChecksumError::io(path, e)),
        };
        ctx.update(&buf[..n]);
    }
    Ok(hex::encode(ctx.finalize()))
}

/// Hashes the file at `path` and writes the hex digest to its sidecar.
/// Returns the hex digest.
pub fn compute_and_store(path: &Path, ext: &str) -> Result<String, ChecksumError> {
    let md = md5_hex(path)?;
    let side = sidecar_path(path, ext);
    fs::write(&side, md.as_bytes()).map_err(|e| ChecksumError::io(&side, e))?;
    debug!(path = %path.display(), sidecar = %side.display(), "stored checksum sidecar");
    Ok(md)
}

/// Compares the file at `path` against its sidecar.
///
/// A missing sidecar, or one that is not exactly [`SIDECAR_HEX_LEN`] bytes
/// long, yields `Ok(false)` without hashing the database.
pub fn verify_cached(path: &Path, ext: &str) -> Result<bool, ChecksumError> {
    let side = sidecar_path(path, ext);
    let stored = match fs::read(&side) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(ChecksumError::io(&side, e)),
    };

    if stored.len() != SIDECAR_HEX_LEN {
        debug!(sidecar = %side.display(), len = stored.len(), "malformed checksum sidecar");
        return Ok(false);
    }

    let actual = md5_hex(path)?;
    Ok(actual.as_bytes() == stored.as_slice())
}
