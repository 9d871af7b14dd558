use hashdir::DirectoryError;
use sign::ChecksumError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

/// Errors returned by tndb operations.
///
/// Lookups report "not found" as `Ok(None)`, never as an error, so an `Err`
/// from a lookup always means the file could not be read.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("not a tndb file (bad magic)")]
    BadMagic,

    #[error("corrupt header: {0}")]
    CorruptHeader(String),

    #[error("truncated {0}")]
    Truncated(&'static str),

    /// A record could not be read completely before `nrec` records were
    /// consumed.
    #[error("truncated record #{index} at offset {offset}")]
    TruncatedRecord { index: u32, offset: u64 },

    #[error("hash directory: {0}")]
    Directory(#[from] DirectoryError),

    #[error("too large: {0}")]
    TooLarge(String),

    #[error("signature verification failed; refusing to read")]
    Unverified,

    #[error("iterator protocol violation: {0}")]
    Protocol(String),

    #[error("handle lock poisoned")]
    LockPoisoned,

    #[error("value is not valid utf-8: {0}")]
    Utf8(#[from] FromUtf8Error),

    #[error("checksum sidecar: {0}")]
    Checksum(#[from] ChecksumError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Maps an unexpected EOF to `short`, keeping every other I/O error as is.
pub(crate) fn eof_as(err: io::Error, short: impl FnOnce() -> Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        short()
    } else {
        Error::Io(err)
    }
}
