//! Byte streams under a database file.
//!
//! The kind is picked from the path: a `.zst` suffix selects a zstd frame,
//! anything else a plain buffered file. Compressed databases are decoded
//! into memory on open so lookups can seek freely.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Physical encoding of a database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Plain,
    Zstd,
}

impl StreamKind {
    /// Picks the stream kind from the file extension.
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("zst") => StreamKind::Zstd,
            _ => StreamKind::Plain,
        }
    }
}

/// Seekable read side of an open database.
#[derive(Debug)]
pub(crate) enum ReadStream {
    Plain(BufReader<File>),
    Memory(Cursor<Vec<u8>>),
}

impl ReadStream {
    pub(crate) fn open(file: File, kind: StreamKind) -> io::Result<Self> {
        match kind {
            StreamKind::Plain => Ok(ReadStream::Plain(BufReader::new(file))),
            StreamKind::Zstd => {
                let bytes = zstd::stream::decode_all(BufReader::new(file))?;
                Ok(ReadStream::Memory(Cursor::new(bytes)))
            }
        }
    }
}

impl Read for ReadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ReadStream::Plain(r) => r.read(buf),
            ReadStream::Memory(c) => c.read(buf),
        }
    }
}

impl Seek for ReadStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            ReadStream::Plain(r) => r.seek(pos),
            ReadStream::Memory(c) => c.seek(pos),
        }
    }

    // BufReader answers this without dropping its buffer.
    fn stream_position(&mut self) -> io::Result<u64> {
        match self {
            ReadStream::Plain(r) => r.stream_position(),
            ReadStream::Memory(c) => c.stream_position(),
        }
    }
}

/// Moves `stream` to `offset` unless it is already there.
pub(crate) fn seek_to<S: Seek>(stream: &mut S, offset: u64) -> io::Result<()> {
    if stream.stream_position()? != offset {
        stream.seek(SeekFrom::Start(offset))?;
    }
    Ok(())
}

/// Write side of the final file produced at writer close.
pub(crate) enum Output {
    Plain(BufWriter<File>),
    Zstd(zstd::stream::write::Encoder<'static, BufWriter<File>>),
}

impl Output {
    pub(crate) fn new(file: File, kind: StreamKind, level: i32) -> io::Result<Self> {
        let inner = BufWriter::new(file);
        match kind {
            StreamKind::Plain => Ok(Output::Plain(inner)),
            StreamKind::Zstd => Ok(Output::Zstd(zstd::stream::write::Encoder::new(inner, level)?)),
        }
    }

    /// Ends the stream (writing the zstd epilogue if any), flushes the
    /// buffer and hands back the file for syncing.
    pub(crate) fn finish(self) -> io::Result<File> {
        let buffered = match self {
            Output::Plain(w) => w,
            Output::Zstd(enc) => enc.finish()?,
        };
        buffered.into_inner().map_err(|e| e.into_error())
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Output::Plain(w) => w.write(buf),
            Output::Zstd(enc) => enc.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Output::Plain(w) => w.flush(),
            Output::Zstd(enc) => enc.flush(),
        }
    }
}
