//! # tndb - signed constant database
//!
//! A tndb file is built once by a [`TndbWriter`], then opened any number of
//! times by [`Tndb`] for point lookups through an on-disk hash directory or
//! for full scans in write order. An optional SHA-1 digest covers the whole
//! file so tampering and corruption can be detected with [`Tndb::verify`].
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ HEADER                                                        │
//! │                                                               │
//! │ magic "tndb1.0\n" | flags (u8) | signature block              │
//! │ ts (u32) | nrec (u32) | doffs (u32)                           │
//! ├───────────────────────────────────────────────────────────────┤
//! │ HASH DIRECTORY (absent with NOHASH)                           │
//! │                                                               │
//! │ 256 x bucket pointer (u32)                                    │
//! │ per bucket: count (u32) | count x [hash (u32) | offset (u32)] │
//! ├───────────────────────────────────────────────────────────────┤
//! │ DATA (starts at doffs)                                        │
//! │                                                               │
//! │ klen (u8) | key | vlen (u32) | value                          │
//! │ ... repeated nrec times, in write order ...                   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. The digest is taken over the data region,
//! then the header fields, then the directory bytes.
//!
//! A path ending in `.zst` stores the same layout inside a zstd frame.
//!
//! ## Example
//!
//! ```no_run
//! use tndb::{Flags, Tndb, TndbWriter};
//!
//! # fn main() -> tndb::Result<()> {
//! let w = TndbWriter::create("words.tndb", Flags::SIGNED)?;
//! w.put(b"k1", b"v1")?;
//! w.put(b"k2", b"v2")?;
//! w.close()?;
//!
//! let db = Tndb::open("words.tndb")?;
//! assert_eq!(db.get_all(b"k2")?, Some(b"v2".to_vec()));
//! for rec in db.records()? {
//!     let (key, value) = rec?;
//!     println!("{:?} = {:?}", key, value);
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod format;
mod iter;
mod reader;
mod stream;
mod verify;
mod writer;

pub use config::TndbConfig;
pub use error::{Error, Result};
pub use format::{record_size, Flags, Header, KEY_MAX, MAGIC};
pub use iter::{DirectValue, Records, RecordRef, TndbIter};
pub use reader::{Tndb, ValueRef, Verification};
pub use sign::Digest;
pub use stream::StreamKind;
pub use writer::TndbWriter;

/// What a `close` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closed {
    /// Other owners remain; nothing was torn down.
    Deferred,
    /// Last writer owner: the file was written and renamed into place.
    Finalized,
    /// Last writer owner of an unlinked writer: no file was written.
    Discarded,
    /// Last reader owner: the handle was released.
    Released,
}

#[cfg(test)]
mod tests;
