//! # Hashdir - the 256-bucket hash directory
//!
//! Every keyed lookup in a tndb file goes through the hash directory that
//! sits between the header and the data region. Keys are hashed with
//! [`hash`]; the low byte of the hash selects one of [`BUCKETS`] buckets, and
//! each bucket is a table of `(hash, record_offset)` pairs sorted by hash.
//!
//! ## On-disk layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ POINTER TABLE: 256 x u32                                     │
//! │   0 = empty bucket, otherwise absolute offset of sub-table   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ SUB-TABLES, one slot per bucket, in bucket order             │
//! │   empty bucket:     [0: u32]                                 │
//! │   non-empty bucket: [count: u32] count x [hash: u32][off: u32]│
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. Record offsets are absolute file offsets.
//!
//! ## Memory layout
//!
//! All entries of a directory live in one arena (`Vec<HashEntry>`); a bucket
//! is a contiguous span of that arena. Entries are never freed one by one:
//! the arena goes away with the directory.
//!
//! ## Example
//!
//! ```rust
//! use hashdir::{hash, DirectoryBuilder};
//!
//! let mut b = DirectoryBuilder::new();
//! b.push(hash(b"k1"), 0);
//! b.push(hash(b"k2"), 7);
//! let dir = b.finish();
//! assert_eq!(dir.candidates(hash(b"k2"))[0].offset, 7);
//! ```

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;
use tracing::{debug, warn};

/// Number of buckets in the directory.
pub const BUCKETS: usize = 256;

/// Size in bytes of the pointer table that starts the directory.
pub const POINTER_TABLE_BYTES: u32 = (BUCKETS * 4) as u32;

/// On-disk size of one `(hash, offset)` entry.
pub const ENTRY_BYTES: u32 = 8;

/// Hash used to place keys in the directory.
///
/// `h = 5381; for each byte: h = h * 33; h ^= byte` (wrapping).
pub fn hash(key: &[u8]) -> u32 {
    let mut h: u32 = 5381;
    for &b in key {
        h = h.wrapping_add(h << 5);
        h ^= u32::from(b);
    }
    h
}

/// Bucket index for a hash value (its low 8 bits).
#[inline]
pub fn bucket_index(hash: u32) -> usize {
    (hash & 0xff) as usize
}

/// One directory entry: the key hash and the offset of its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashEntry {
    pub hash: u32,
    pub offset: u32,
}

impl HashEntry {
    pub fn new(hash: u32, offset: u32) -> Self {
        Self { hash, offset }
    }

    #[inline]
    pub fn bucket(&self) -> usize {
        bucket_index(self.hash)
    }
}

/// Errors raised while loading a directory from a stream.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt directory: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Span {
    start: u32,
    len: u32,
}

/// Size of a serialized directory holding `counts[i]` entries in bucket `i`.
fn store_size_for(counts: impl Iterator<Item = u32>) -> u64 {
    let mut size = u64::from(POINTER_TABLE_BYTES);
    for n in counts {
        size += 4 + u64::from(n) * u64::from(ENTRY_BYTES);
    }
    size
}

/// Write-side accumulator.
///
/// Entries are appended to the arena in insertion order with offsets
/// relative to the start of the data region; [`finish`](Self::finish) sorts
/// them into per-bucket spans.
#[derive(Debug, Clone)]
pub struct DirectoryBuilder {
    arena: Vec<HashEntry>,
    counts: [u32; BUCKETS],
}

impl Default for DirectoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryBuilder {
    pub fn new() -> Self {
        Self {
            arena: Vec::new(),
            counts: [0; BUCKETS],
        }
    }

    /// Records a key with hash `hash` whose record starts `offset` bytes
    /// into the data region.
    pub fn push(&mut self, hash: u32, offset: u32) {
        self.counts[bucket_index(hash)] += 1;
        self.arena.push(HashEntry::new(hash, offset));
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Serialized size of the directory, computable before [`finish`](Self::finish).
    pub fn store_size(&self) -> u64 {
        store_size_for(self.counts.iter().copied())
    }

    /// Sorts every bucket by `(hash, offset)` and freezes the directory.
    pub fn finish(self) -> Directory {
        let DirectoryBuilder { mut arena, counts } = self;
        arena.sort_unstable_by_key(|e| (e.bucket(), e.hash, e.offset));

        let mut spans = vec![Span::default(); BUCKETS];
        let mut start = 0u32;
        for (span, &len) in spans.iter_mut().zip(counts.iter()) {
            *span = Span { start, len };
            start += len;
        }

        Directory { arena, spans }
    }
}

/// A frozen directory: either built by a writer or loaded from a file.
#[derive(Debug, Clone)]
pub struct Directory {
    arena: Vec<HashEntry>,
    spans: Vec<Span>,
}

impl Directory {
    /// Entries of bucket `bucket`, sorted by hash.
    pub fn bucket(&self, bucket: usize) -> &[HashEntry] {
        let Span { start, len } = self.spans[bucket];
        &self.arena[start as usize..(start + len) as usize]
    }

    /// The run of entries whose hash equals `hash`.
    ///
    /// Binary search compares hashes only; entries with equal hashes are
    /// contiguous inside a bucket, so the run starts at the landing point.
    pub fn candidates(&self, hash: u32) -> &[HashEntry] {
        let bucket = self.bucket(bucket_index(hash));
        let start = bucket.partition_point(|e| e.hash < hash);
        let run = bucket[start..]
            .iter()
            .take_while(|e| e.hash == hash)
            .count();
        &bucket[start..start + run]
    }

    pub fn entry_count(&self) -> usize {
        self.arena.len()
    }

    pub fn non_empty_buckets(&self) -> usize {
        self.spans.iter().filter(|s| s.len > 0).count()
    }

    pub fn store_size(&self) -> u64 {
        store_size_for(self.spans.iter().map(|s| s.len))
    }

    /// Serializes the directory.
    ///
    /// * `table_offset` – absolute offset the pointer table will be written
    ///   at (the header size).
    /// * `data_base` – absolute offset of the data region; it is added to
    ///   every entry offset, which the builder kept relative to the data
    ///   region.
    ///
    /// The routine is the same for the real write and for a digest-only
    /// pass, so both see identical bytes.
    pub fn write_to<W: Write>(&self, w: &mut W, table_offset: u32, data_base: u32) -> io::Result<()> {
        let mut sub_offset = u64::from(table_offset) + u64::from(POINTER_TABLE_BYTES);

        for span in &self.spans {
            if span.len == 0 {
                w.write_u32::<BigEndian>(0)?;
                sub_offset += 4;
            } else {
                w.write_u32::<BigEndian>(to_u32(sub_offset, "sub-table offset")?)?;
                sub_offset += 4 + u64::from(span.len) * u64::from(ENTRY_BYTES);
            }
        }

        if sub_offset != u64::from(data_base) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "directory ends at {} but data region starts at {}",
                    sub_offset, data_base
                ),
            ));
        }

        for bucket in 0..BUCKETS {
            let entries = self.bucket(bucket);
            w.write_u32::<BigEndian>(entries.len() as u32)?;
            for e in entries {
                let abs = u64::from(e.offset) + u64::from(data_base);
                w.write_u32::<BigEndian>(e.hash)?;
                w.write_u32::<BigEndian>(to_u32(abs, "record offset")?)?;
            }
        }

        Ok(())
    }

    /// Loads a directory whose pointer table starts at `table_offset` and
    /// which must end at or before `end` (the data region offset).
    ///
    /// All 256 pointers are read first in one forward pass; sub-tables are
    /// then visited in bucket order, which is also file order.
    pub fn load<R: Read + Seek>(r: &mut R, table_offset: u64, end: u64) -> Result<Self, DirectoryError> {
        let sub_start = table_offset + u64::from(POINTER_TABLE_BYTES);
        if sub_start > end {
            return Err(DirectoryError::Corrupt(format!(
                "pointer table at {} overruns data offset {}",
                table_offset, end
            )));
        }

        r.seek(SeekFrom::Start(table_offset))?;
        let mut raw = [0u8; POINTER_TABLE_BYTES as usize];
        r.read_exact(&mut raw)?;

        let mut pointers = [0u32; BUCKETS];
        BigEndian::read_u32_into(&raw, &mut pointers);

        let mut arena = Vec::new();
        let mut spans = vec![Span::default(); BUCKETS];
        let mut entry_buf = Vec::new();

        for (bucket, &ptr) in pointers.iter().enumerate() {
            if ptr == 0 {
                continue;
            }
            let ptr = u64::from(ptr);
            if ptr < sub_start || ptr + 4 > end {
                return Err(DirectoryError::Corrupt(format!(
                    "bucket {} points outside the directory ({})",
                    bucket, ptr
                )));
            }

            r.seek(SeekFrom::Start(ptr))?;
            let count = r.read_u32::<BigEndian>()?;
            if count == 0 {
                warn!(bucket, "non-empty directory pointer to an empty bucket");
                continue;
            }
            let bytes = u64::from(count) * u64::from(ENTRY_BYTES);
            if ptr + 4 + bytes > end {
                return Err(DirectoryError::Corrupt(format!(
                    "bucket {} with {} entries overruns the directory",
                    bucket, count
                )));
            }

            entry_buf.resize(bytes as usize, 0);
            r.read_exact(&mut entry_buf)?;

            let start = arena.len();
            for pair in entry_buf.chunks_exact(ENTRY_BYTES as usize) {
                let e = HashEntry::new(BigEndian::read_u32(&pair[..4]), BigEndian::read_u32(&pair[4..]));
                if e.bucket() != bucket {
                    return Err(DirectoryError::Corrupt(format!(
                        "hash {:#010x} stored in bucket {}",
                        e.hash, bucket
                    )));
                }
                arena.push(e);
            }

            let entries = &mut arena[start..];
            if !entries.windows(2).all(|w| w[0].hash <= w[1].hash) {
                warn!(bucket, "directory bucket not sorted by hash; re-sorting");
                entries.sort_by_key(|e| e.hash);
            }

            spans[bucket] = Span {
                start: start as u32,
                len: count,
            };
        }

        let dir = Directory { arena, spans };
        debug!(
            entries = dir.entry_count(),
            buckets = dir.non_empty_buckets(),
            "loaded hash directory"
        );
        Ok(dir)
    }
}

fn to_u32(v: u64, what: &str) -> io::Result<u32> {
    u32::try_from(v).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} {} does not fit in 32 bits", what, v),
        )
    })
}
