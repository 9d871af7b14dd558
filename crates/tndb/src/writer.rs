use config::TndbConfig;
use hashdir::{hash, Directory, DirectoryBuilder};
use sign::{DigestSink, Signer, TeeWriter};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::format::{record_size, write_record, Flags, Header, KEY_MAX};
use crate::stream::{Output, StreamKind};
use crate::Closed;

/// Builds a new tndb file.
///
/// Records are appended to an anonymous scratch file next to the destination
/// while the hash directory is accumulated in memory. Nothing appears at
/// `path` until the last owner calls [`close`](TndbWriter::close), which
/// writes header, directory and data to `<path>.tmp`, fsyncs it and renames
/// it into place.
///
/// A writer dropped without `close` leaves no file behind.
///
/// # Example
///
/// ```no_run
/// use tndb::{Flags, TndbWriter};
///
/// # fn main() -> tndb::Result<()> {
/// let w = TndbWriter::create("cities.tndb", Flags::SIGNED)?;
/// w.put(b"paris", b"fr")?;
/// w.put(b"lima", b"pe")?;
/// w.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TndbWriter {
    shared: Arc<WriterShared>,
}

#[derive(Debug)]
struct WriterShared {
    path: PathBuf,
    flags: Flags,
    kind: StreamKind,
    config: TndbConfig,
    state: Mutex<WriterState>,
}

#[derive(Debug)]
pub(crate) struct WriterState {
    header: Header,
    /// Scratch data region; carries the signer while the file is signed.
    data: TeeWriter<BufWriter<File>>,
    /// `None` for NOHASH files.
    directory: Option<DirectoryBuilder>,
    /// Bytes written to the data region so far.
    current: u64,
    unlinked: bool,
}

impl TndbWriter {
    /// Creates a writer for `path` with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the scratch file cannot be created in the
    /// destination directory.
    pub fn create<P: AsRef<Path>>(path: P, flags: Flags) -> Result<Self> {
        Self::create_with(path, flags, &TndbConfig::default())
    }

    pub fn create_with<P: AsRef<Path>>(path: P, flags: Flags, config: &TndbConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let scratch = tempfile::tempfile_in(parent_dir(&path))?;

        let data = BufWriter::new(scratch);
        let data = if flags.is_signed() {
            TeeWriter::with_signer(data, Signer::new())
        } else {
            TeeWriter::new(data)
        };
        let directory = flags.has_hash().then(DirectoryBuilder::new);

        debug!(path = %path.display(), ?flags, "created tndb writer");

        Ok(Self {
            shared: Arc::new(WriterShared {
                kind: StreamKind::detect(&path),
                path,
                flags,
                config: config.clone(),
                state: Mutex::new(WriterState {
                    header: Header::new(flags),
                    data,
                    directory,
                    current: 0,
                    unlinked: false,
                }),
            }),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, WriterState>> {
        self.shared.state.lock().map_err(|_| Error::LockPoisoned)
    }

    /// Appends one record.
    ///
    /// Duplicate keys are stored as given; readers resolve a duplicated key
    /// to the record written last.
    ///
    /// # Panics
    ///
    /// Panics if `key` is longer than [`KEY_MAX`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooLarge`] if the value length does not fit in 32
    /// bits or the record would start past a 32-bit offset, and an I/O error
    /// if the scratch file cannot be written.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        assert!(
            key.len() <= KEY_MAX,
            "tndb: key of {} bytes exceeds the {} byte limit",
            key.len(),
            KEY_MAX
        );
        if u32::try_from(value.len()).is_err() {
            return Err(Error::TooLarge(format!("value of {} bytes", value.len())));
        }

        let mut guard = self.lock()?;
        let st = &mut *guard;

        let offset = u32::try_from(st.current)
            .map_err(|_| Error::TooLarge(format!("data region of {} bytes", st.current)))?;
        let nrec = st
            .header
            .nrec
            .checked_add(1)
            .ok_or_else(|| Error::TooLarge("record count".to_string()))?;

        write_record(&mut st.data, key, value)?;
        if let Some(dir) = st.directory.as_mut() {
            dir.push(hash(key), offset);
        }
        st.current += record_size(key.len(), value.len());
        st.header.nrec = nrec;
        Ok(())
    }

    /// Returns another owner of the same writer.
    pub fn share(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Marks the writer so that the final close writes no file.
    pub fn unlink(&self) -> Result<()> {
        let mut st = self.lock()?;
        st.unlinked = true;
        debug!(path = %self.shared.path.display(), "writer unlinked");
        Ok(())
    }

    /// Number of records written so far.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.header.nrec as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn flags(&self) -> Flags {
        self.shared.flags
    }

    /// Releases this owner. The last owner finalizes the file.
    ///
    /// Returns [`Closed::Deferred`] while other owners remain,
    /// [`Closed::Discarded`] if the writer was unlinked, and
    /// [`Closed::Finalized`] once the file is in place.
    ///
    /// # Errors
    ///
    /// On any failure during finalization the temporary output is removed
    /// and the error returned; nothing is left at `path`.
    pub fn close(self) -> Result<Closed> {
        let shared = match Arc::into_inner(self.shared) {
            Some(shared) => shared,
            None => return Ok(Closed::Deferred),
        };
        let WriterShared {
            path,
            kind,
            config,
            state,
            ..
        } = shared;
        let state = state.into_inner().map_err(|_| Error::LockPoisoned)?;
        state.finalize(&path, kind, &config)
    }
}

impl WriterState {
    fn finalize(self, path: &Path, kind: StreamKind, config: &TndbConfig) -> Result<Closed> {
        let WriterState {
            mut header,
            data,
            directory,
            current,
            unlinked,
        } = self;

        let (scratch, signer) = data.into_parts();

        if unlinked {
            if let Some(signer) = signer {
                let bytes = signer.bytes_fed();
                debug!(bytes, digest = %signer.finalize(), "discarding signed data region");
            }
            info!(path = %path.display(), nrec = header.nrec, "unlinked writer closed; no file written");
            return Ok(Closed::Discarded);
        }

        let mut scratch = scratch.into_inner().map_err(|e| e.into_error())?;
        scratch.seek(SeekFrom::Start(0))?;

        let directory = directory.map(DirectoryBuilder::finish);
        let header_size = header.store_size();
        let dir_size = directory.as_ref().map_or(0, Directory::store_size);
        let doffs = u64::from(header_size) + dir_size;
        header.doffs = u32::try_from(doffs)
            .map_err(|_| Error::TooLarge(format!("data offset {}", doffs)))?;

        if let Some(mut signer) = signer {
            header.compute_digest(&mut signer);
            if let Some(dir) = &directory {
                dir.write_to(&mut DigestSink::new(&mut signer), header_size, header.doffs)?;
            }
            header.set_digest(signer.finalize());
        }

        let tmp = tmp_path(path);
        let written = write_final(&tmp, kind, config, &header, directory.as_ref(), &mut scratch, current)
            .and_then(|()| fs::rename(&tmp, path).map_err(Error::from));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        // Fsync the parent directory so the rename survives a crash.
        if let Ok(dir) = File::open(parent_dir(path)) {
            let _ = dir.sync_all();
        }

        info!(
            path = %path.display(),
            nrec = header.nrec,
            doffs = header.doffs,
            data_bytes = current,
            digest = ?header.digest(),
            "tndb file written"
        );
        Ok(Closed::Finalized)
    }
}

/// Writes header, directory and the scratch data region to `tmp` and syncs it.
fn write_final(
    tmp: &Path,
    kind: StreamKind,
    config: &TndbConfig,
    header: &Header,
    directory: Option<&Directory>,
    scratch: &mut File,
    data_len: u64,
) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(tmp)?;
    let mut out = Output::new(file, kind, config.compression_level)?;

    header.store(&mut out)?;
    if let Some(dir) = directory {
        dir.write_to(&mut out, header.store_size(), header.doffs())?;
    }

    let copied = copy_chunked(scratch, &mut out, config.copy_buffer_size)?;
    if copied != data_len {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("scratch data holds {} bytes, expected {}", copied, data_len),
        )));
    }

    out.finish()?.sync_all()?;
    Ok(())
}

fn copy_chunked<R: Read, W: Write>(r: &mut R, w: &mut W, chunk: usize) -> io::Result<u64> {
    let mut buf = vec![0u8; chunk.max(1)];
    let mut total = 0u64;
    loop {
        let n = match r.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        w.write_all(&buf[..n])?;
        total += n as u64;
    }
}

/// `<path>.tmp`, keeping the full file name (so `db.tndb.zst` becomes
/// `db.tndb.zst.tmp`).
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
