//! # Sign - digest engine for tndb files
//!
//! A signed tndb file carries a SHA-1 digest computed over its data region,
//! its header fields and its hash directory. This crate holds the pieces the
//! writer and the verifier share:
//!
//! - [`Signer`]: the running digest (`new` / `update` / `update_u32` /
//!   `finalize`). `finalize` consumes the signer, so feeding bytes after the
//!   digest has been extracted cannot be expressed.
//! - [`TeeWriter`]: an [`io::Write`] that writes through to an inner writer
//!   and, when it carries a signer, feeds every written byte to it.
//! - [`DigestSink`]: an [`io::Write`] that only feeds the signer and discards
//!   the bytes. Serializers written against `io::Write` run once through a
//!   `DigestSink` (dry pass) and once through the real output.
//! - [`checksum`]: the whole-file MD5 sidecar used to skip a full digest
//!   recomputation on repeated verifications.
//!
//! ## Example
//!
//! ```rust
//! use sign::{DigestSink, Signer};
//! use std::io::Write;
//!
//! let mut a = Signer::new();
//! a.update(b"abc");
//! a.update_u32(7);
//!
//! let mut b = Signer::new();
//! let mut sink = DigestSink::new(&mut b);
//! sink.write_all(b"abc").unwrap();
//! sink.write_all(&7u32.to_be_bytes()).unwrap();
//!
//! assert_eq!(a.finalize(), b.finalize());
//! ```

pub mod checksum;

pub use checksum::ChecksumError;

use sha1::{Digest as _, Sha1};
use std::fmt;
use std::io::{self, Write};

/// Size of a finalized digest in bytes.
pub const DIGEST_LEN: usize = 20;

/// A finalized SHA-1 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Builds a digest from a slice, returning `None` unless it is exactly
    /// [`DIGEST_LEN`] bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; DIGEST_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Running SHA-1 context.
#[derive(Clone, Default)]
pub struct Signer {
    ctx: Sha1,
    fed: u64,
}

impl Signer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, buf: &[u8]) {
        self.ctx.update(buf);
        self.fed += buf.len() as u64;
    }

    /// Feeds `v` in big-endian byte order, so the digest does not depend on
    /// the host's endianness.
    pub fn update_u32(&mut self, v: u32) {
        self.update(&v.to_be_bytes());
    }

    /// Number of bytes fed so far.
    pub fn bytes_fed(&self) -> u64 {
        self.fed
    }

    pub fn finalize(self) -> Digest {
        let out = self.ctx.finalize();
        let mut md = [0u8; DIGEST_LEN];
        md.copy_from_slice(&out);
        Digest(md)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("bytes_fed", &self.fed).finish()
    }
}

/// Digest-only sink: every write goes to the signer, nothing is persisted.
#[derive(Debug)]
pub struct DigestSink<'a> {
    signer: &'a mut Signer,
}

impl<'a> DigestSink<'a> {
    pub fn new(signer: &'a mut Signer) -> Self {
        Self { signer }
    }
}

impl Write for DigestSink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.signer.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Write-through sink with an optional signer observing the written bytes.
///
/// Only bytes the inner writer actually accepted are fed to the signer, so a
/// short write never leaves the digest ahead of the stream.
#[derive(Debug)]
pub struct TeeWriter<W: Write> {
    inner: W,
    signer: Option<Signer>,
}

impl<W: Write> TeeWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            signer: None,
        }
    }

    pub fn with_signer(inner: W, signer: Signer) -> Self {
        Self {
            inner,
            signer: Some(signer),
        }
    }

    pub fn into_parts(self) -> (W, Option<Signer>) {
        (self.inner, self.signer)
    }
}

impl<W: Write> Write for TeeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if let Some(signer) = self.signer.as_mut() {
            signer.update(&buf[..n]);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
