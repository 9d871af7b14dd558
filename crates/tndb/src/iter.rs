//! Sequential access to records in write order.
//!
//! A [`TndbIter`] is a cursor over the data region: the offset of the next
//! record and the number of records already consumed. Iteration ends with
//! `Ok(None)` exactly after `nrec` records; running out of bytes before
//! that is reported as [`Error::TruncatedRecord`].
//!
//! Values can be copied out ([`get`](TndbIter::get), [`rget`](TndbIter::rget))
//! or streamed in place through a [`DirectValue`] obtained from
//! [`begin`](TndbIter::begin).

use std::cmp;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::MutexGuard;

use crate::error::{eof_as, Error, Result};
use crate::format::{read_record_head, RECORD_OVERHEAD};
use crate::reader::{ReaderState, Tndb, ValueRef};
use crate::stream::{seek_to, ReadStream};

/// Position and size of one record found by the iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef {
    pub key_len: u8,
    pub value: ValueRef,
}

/// Cursor over the records of a [`Tndb`].
#[derive(Debug)]
pub struct TndbIter<'a> {
    db: &'a Tndb,
    offset: u64,
    consumed: u32,
}

impl Tndb {
    /// Starts an iterator at the first record. Runs the read guard.
    pub fn iter(&self) -> Result<TndbIter<'_>> {
        drop(self.guarded()?);
        Ok(TndbIter {
            db: self,
            offset: u64::from(self.header().doffs()),
            consumed: 0,
        })
    }

    /// Owned `(key, value)` pairs in write order.
    pub fn records(&self) -> Result<Records<'_>> {
        Ok(Records {
            iter: self.iter()?,
            failed: false,
        })
    }
}

impl<'a> TndbIter<'a> {
    /// Records consumed so far.
    pub fn position(&self) -> u32 {
        self.consumed
    }

    /// Reads the next record header, leaving `stream` at its first value
    /// byte. The key is stored in `key` when given.
    fn advance(&mut self, stream: &mut ReadStream, key: Option<&mut Vec<u8>>) -> Result<Option<RecordRef>> {
        if self.consumed >= self.db.header().nrec() {
            return Ok(None);
        }

        let start = self.offset;
        let index = self.consumed;
        let truncated = || Error::TruncatedRecord { index, offset: start };

        let mut scratch = Vec::new();
        let key = key.unwrap_or(&mut scratch);

        seek_to(stream, start)?;
        let len = read_record_head(stream, key).map_err(|e| eof_as(e, truncated))?;
        let value = ValueRef {
            offset: start + RECORD_OVERHEAD + key.len() as u64,
            len,
        };
        if value.end() > self.db.stream_len() {
            return Err(truncated());
        }

        self.offset = value.end();
        self.consumed += 1;
        Ok(Some(RecordRef {
            key_len: key.len() as u8,
            value,
        }))
    }

    /// Moves to the next record without reading its value.
    ///
    /// Returns `Ok(None)` once every record has been consumed.
    pub fn get_value_offset(&mut self, key: Option<&mut Vec<u8>>) -> Result<Option<RecordRef>> {
        let db = self.db;
        let mut st = db.lock()?;
        self.advance(&mut st.stream, key)
    }

    /// Reads the next record, copying its value into `buf`. Returns the
    /// value length.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than the value. Use [`rget`](Self::rget)
    /// when value sizes are not bounded in advance.
    pub fn get(&mut self, key: Option<&mut Vec<u8>>, buf: &mut [u8]) -> Result<Option<usize>> {
        let db = self.db;
        let mut st = db.lock()?;
        let rec = match self.advance(&mut st.stream, key)? {
            Some(rec) => rec,
            None => return Ok(None),
        };
        let len = rec.value.len as usize;
        assert!(len <= buf.len(), "tndb: not enough space for data");
        self.read_value(&mut st, rec, &mut buf[..len])?;
        Ok(Some(len))
    }

    /// Like [`get`](Self::get), resizing `buf` to the value length.
    pub fn rget(&mut self, key: Option<&mut Vec<u8>>, buf: &mut Vec<u8>) -> Result<Option<usize>> {
        let db = self.db;
        let mut st = db.lock()?;
        let rec = match self.advance(&mut st.stream, key)? {
            Some(rec) => rec,
            None => return Ok(None),
        };
        buf.resize(rec.value.len as usize, 0);
        self.read_value(&mut st, rec, buf)?;
        Ok(Some(buf.len()))
    }

    fn read_value(&self, st: &mut ReaderState, rec: RecordRef, buf: &mut [u8]) -> Result<()> {
        let index = self.consumed - 1;
        let offset = rec.value.offset - RECORD_OVERHEAD - u64::from(rec.key_len);
        st.stream
            .read_exact(buf)
            .map_err(|e| eof_as(e, || Error::TruncatedRecord { index, offset }))
    }

    /// Positions the stream on the next record's value and returns a reader
    /// bounded to it.
    ///
    /// The handle stays locked until the [`DirectValue`] is ended or
    /// dropped, so other methods of the same handle must not be called from
    /// this thread in the meantime.
    pub fn begin<'i>(&'i mut self, key: Option<&mut Vec<u8>>) -> Result<Option<DirectValue<'i, 'a>>> {
        let db: &'a Tndb = self.db;
        let mut guard = db.lock()?;
        let record = match self.advance(&mut guard.stream, key)? {
            Some(rec) => rec,
            None => return Ok(None),
        };
        Ok(Some(DirectValue {
            iter: self,
            guard,
            record,
            remaining: u64::from(record.value.len),
        }))
    }
}

/// A value being read in place, borrowed from a [`TndbIter`].
///
/// Reads stop at the end of the value. Call [`end`](DirectValue::end) to
/// hand the stream back; dropping the value without it is allowed, the
/// iterator seeks to the next record by offset either way.
#[derive(Debug)]
pub struct DirectValue<'i, 'a> {
    iter: &'i mut TndbIter<'a>,
    guard: MutexGuard<'a, ReaderState>,
    record: RecordRef,
    remaining: u64,
}

impl DirectValue<'_, '_> {
    pub fn record(&self) -> RecordRef {
        self.record
    }

    /// Value bytes not read yet.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Finishes the value, skipping whatever was not read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the stream was moved past the end of
    /// the value.
    pub fn end(mut self) -> Result<()> {
        let expected = self.iter.offset;
        let pos = self.guard.stream.stream_position()?;
        if pos > expected {
            return Err(Error::Protocol(format!(
                "stream at {} past end of value at {}",
                pos, expected
            )));
        }
        if pos < expected {
            self.guard.stream.seek(SeekFrom::Start(expected))?;
        }
        Ok(())
    }
}

impl Read for DirectValue<'_, '_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = cmp::min(buf.len() as u64, self.remaining) as usize;
        let n = self.guard.stream.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "value ends before its declared length",
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Iterator over owned `(key, value)` pairs. Stops after the first error.
#[derive(Debug)]
pub struct Records<'a> {
    iter: TndbIter<'a>,
    failed: bool,
}

impl Iterator for Records<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let mut key = Vec::new();
        let mut value = Vec::new();
        match self.iter.rget(Some(&mut key), &mut value) {
            Ok(Some(_)) => Some(Ok((key, value))),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.iter.db.header().nrec() - self.iter.consumed) as usize;
        (0, Some(left))
    }
}
