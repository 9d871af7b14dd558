use config::TndbConfig;
use hashdir::{hash, Directory, BUCKETS, POINTER_TABLE_BYTES};
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{eof_as, Error, Result};
use crate::format::{read_record_head, Flags, Header, KEY_MAX, RECORD_OVERHEAD};
use crate::stream::{ReadStream, StreamKind};
use crate::Closed;

/// Location of a value inside the database stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRef {
    /// Absolute offset of the first value byte.
    pub offset: u64,
    pub len: u32,
}

impl ValueRef {
    /// Offset one past the last value byte.
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.len)
    }
}

/// Outcome of the last verification attempt on a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Signed file, not verified yet.
    Pending,
    Passed,
    Failed,
}

/// A read-only handle on a tndb file.
///
/// Opening parses the header only; the hash directory is loaded on the first
/// keyed lookup and kept for the lifetime of the handle. All methods take
/// `&self`: the stream sits behind a `Mutex`, one lock per operation.
///
/// Handles are reference counted: [`share`](Tndb::share) hands out another
/// owner and [`close`](Tndb::close) releases one.
///
/// # Read guard
///
/// With [`TndbConfig::verify_before_read`] set (the default), the first keyed
/// lookup or iteration over a signed file runs [`verify`](Tndb::verify). If
/// that fails, every guarded read returns [`Error::Unverified`].
#[derive(Debug)]
pub struct Tndb {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    config: TndbConfig,
    header: Header,
    /// Length of the decoded stream.
    stream_len: u64,
    state: Mutex<ReaderState>,
}

#[derive(Debug)]
pub(crate) struct ReaderState {
    pub(crate) stream: ReadStream,
    directory: Option<Directory>,
    pub(crate) verification: Verification,
}

impl Tndb {
    /// Opens the database at `path` with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or decoded, if the magic
    /// does not match, or if the header is malformed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &TndbConfig::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, config: &TndbConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Self::from_file(file, path, config)
    }

    /// Opens a database from an already open file. `path` selects the
    /// stream kind and locates the checksum sidecar.
    pub fn from_file<P: AsRef<Path>>(file: File, path: P, config: &TndbConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut stream = ReadStream::open(file, StreamKind::detect(&path))?;

        stream.seek(SeekFrom::Start(0))?;
        let header = Header::restore(&mut stream)?;
        check_data_offset(&header)?;
        let stream_len = stream.seek(SeekFrom::End(0))?;

        let verification = if header.flags().is_signed() {
            Verification::Pending
        } else {
            Verification::Passed
        };

        debug!(
            path = %path.display(),
            flags = ?header.flags(),
            nrec = header.nrec(),
            doffs = header.doffs(),
            "opened tndb file"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                path,
                config: config.clone(),
                header,
                stream_len,
                state: Mutex::new(ReaderState {
                    stream,
                    directory: None,
                    verification,
                }),
            }),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, ReaderState>> {
        self.shared.state.lock().map_err(|_| Error::LockPoisoned)
    }

    pub(crate) fn config(&self) -> &TndbConfig {
        &self.shared.config
    }

    pub(crate) fn stream_len(&self) -> u64 {
        self.shared.stream_len
    }

    /// Locks the handle for a data read, verifying first if required.
    pub(crate) fn guarded(&self) -> Result<MutexGuard<'_, ReaderState>> {
        let enforce = self.shared.config.verify_before_read && self.flags().is_signed();
        if enforce && self.lock()?.verification == Verification::Pending {
            self.verify()?;
        }
        let st = self.lock()?;
        if enforce && st.verification == Verification::Failed {
            return Err(Error::Unverified);
        }
        Ok(st)
    }

    fn check_lookup(&self, key: &[u8]) {
        assert!(
            self.flags().has_hash(),
            "tndb: method not allowed on file without hash table"
        );
        assert!(
            key.len() <= KEY_MAX,
            "tndb: key of {} bytes exceeds the {} byte limit",
            key.len(),
            KEY_MAX
        );
    }

    /// Finds where the value for `key` is stored.
    ///
    /// Returns `Ok(None)` if the key is absent. When a key was written more
    /// than once, the record written last wins.
    ///
    /// # Panics
    ///
    /// Panics if the file was built with [`Flags::NOHASH`] or if `key` is
    /// longer than [`KEY_MAX`] bytes.
    pub fn get_value_offset(&self, key: &[u8]) -> Result<Option<ValueRef>> {
        self.check_lookup(key);
        let mut st = self.guarded()?;
        st.lookup(&self.shared.header, self.shared.stream_len, key)
    }

    /// Copies the value for `key` into `buf` and returns its length.
    ///
    /// Returns 0 when the key is absent or when `buf` is too small to hold
    /// the whole value; nothing is copied in that case.
    ///
    /// # Panics
    ///
    /// Same as [`get_value_offset`](Tndb::get_value_offset).
    pub fn get(&self, key: &[u8], buf: &mut [u8]) -> Result<usize> {
        self.check_lookup(key);
        let mut st = self.guarded()?;
        let vr = match st.lookup(&self.shared.header, self.shared.stream_len, key)? {
            Some(vr) => vr,
            None => return Ok(0),
        };
        let len = vr.len as usize;
        if len > buf.len() {
            return Ok(0);
        }
        st.read_value(vr, &mut buf[..len])?;
        Ok(len)
    }

    /// Returns the value for `key` in a buffer of exactly its size.
    pub fn get_all(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_lookup(key);
        let mut st = self.guarded()?;
        let vr = match st.lookup(&self.shared.header, self.shared.stream_len, key)? {
            Some(vr) => vr,
            None => return Ok(None),
        };
        let mut value = vec![0u8; vr.len as usize];
        st.read_value(vr, &mut value)?;
        Ok(Some(value))
    }

    /// String convenience over [`get_all`](Tndb::get_all).
    pub fn get_str(&self, key: &str) -> Result<Option<String>> {
        match self.get_all(key.as_bytes())? {
            Some(value) => Ok(Some(String::from_utf8(value)?)),
            None => Ok(None),
        }
    }

    /// Reads up to `buf.len()` bytes starting at absolute `offset`, stopping
    /// early at the end of the stream. Returns the number of bytes read.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut st = self.guarded()?;
        st.stream.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match st.stream.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    /// All keys in the order they were written.
    pub fn keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut it = self.iter()?;
        let mut keys = Vec::with_capacity(self.len());
        loop {
            let mut key = Vec::new();
            match it.get_value_offset(Some(&mut key))? {
                Some(_) => keys.push(key),
                None => return Ok(keys),
            }
        }
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.shared.header
    }

    #[must_use]
    pub fn flags(&self) -> Flags {
        self.shared.header.flags()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Number of records in the file.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.header.nrec() as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn verification(&self) -> Result<Verification> {
        Ok(self.lock()?.verification)
    }

    pub fn is_verified(&self) -> bool {
        matches!(self.verification(), Ok(Verification::Passed))
    }

    pub(crate) fn set_verification(&self, v: Verification) -> Result<()> {
        self.lock()?.verification = v;
        Ok(())
    }

    /// Returns another owner of the same handle.
    pub fn share(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Releases this owner. The last owner drops the stream and directory
    /// and gets [`Closed::Released`]; the others get [`Closed::Deferred`].
    pub fn close(self) -> Result<Closed> {
        match Arc::into_inner(self.shared) {
            Some(shared) => {
                debug!(path = %shared.path.display(), "closed tndb file");
                Ok(Closed::Released)
            }
            None => Ok(Closed::Deferred),
        }
    }

    /// Removes the file (and its checksum sidecar) from disk. The handle
    /// stays readable until closed.
    pub fn unlink(&self) -> Result<()> {
        fs::remove_file(&self.shared.path)?;
        let sidecar = sign::checksum::sidecar_path(&self.shared.path, &self.shared.config.sidecar_extension);
        match fs::remove_file(sidecar) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        info!(path = %self.shared.path.display(), "unlinked tndb file");
        Ok(())
    }
}

impl ReaderState {
    fn lookup(&mut self, header: &Header, stream_len: u64, key: &[u8]) -> Result<Option<ValueRef>> {
        let ReaderState {
            stream, directory, ..
        } = self;

        if directory.is_none() {
            *directory = Some(Directory::load(
                stream,
                u64::from(header.extent()),
                u64::from(header.doffs()),
            )?);
        }
        let Some(dir) = directory.as_ref() else {
            return Ok(None);
        };

        let mut found: Option<ValueRef> = None;
        let mut stored = Vec::with_capacity(key.len());

        for entry in dir.candidates(hash(key)) {
            let offset = u64::from(entry.offset);
            stream.seek(SeekFrom::Start(offset))?;
            let len = read_record_head(stream, &mut stored).map_err(|e| eof_as(e, || Error::Truncated("record")))?;
            if stored != key {
                continue;
            }
            let vr = ValueRef {
                offset: offset + RECORD_OVERHEAD + stored.len() as u64,
                len,
            };
            if vr.end() > stream_len {
                return Err(Error::Truncated("record"));
            }
            if found.map_or(true, |prev| vr.offset > prev.offset) {
                found = Some(vr);
            }
        }
        Ok(found)
    }

    pub(crate) fn read_value(&mut self, vr: ValueRef, buf: &mut [u8]) -> Result<()> {
        self.stream.seek(SeekFrom::Start(vr.offset))?;
        self.stream
            .read_exact(buf)
            .map_err(|e| eof_as(e, || Error::Truncated("value")))
    }
}

/// `doffs` must sit right after the header (NOHASH) or leave room for at
/// least an empty directory.
fn check_data_offset(header: &Header) -> Result<()> {
    let extent = u64::from(header.extent());
    let doffs = u64::from(header.doffs());
    let min_dir = u64::from(POINTER_TABLE_BYTES) + BUCKETS as u64 * 4;

    let ok = if header.flags().has_hash() {
        doffs >= extent + min_dir
    } else {
        doffs == extent
    };
    if ok {
        Ok(())
    } else {
        Err(Error::CorruptHeader(format!(
            "data offset {} inconsistent with header size {} and flags {:?}",
            doffs,
            extent,
            header.flags()
        )))
    }
}
