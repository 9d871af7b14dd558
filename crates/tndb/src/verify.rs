//! Integrity checks: the cached MD5 sidecar and the embedded SHA-1 digest.

use sign::checksum::{compute_and_store, verify_cached};
use sign::{DigestSink, Signer};
use std::io::{self, Read, Seek, SeekFrom};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::reader::{Tndb, Verification};

impl Tndb {
    /// Checks the file's integrity and records the outcome on the handle.
    ///
    /// A matching checksum sidecar short-circuits the check. Otherwise the
    /// embedded digest is recomputed with [`verify_digest`](Tndb::verify_digest);
    /// on success the sidecar is regenerated so the next call is cheap.
    ///
    /// Unsigned files have no digest to fall back on: their sidecar is
    /// (re)written first and the check then passes against it.
    ///
    /// The sidecar is a cache. Failing to write it (for example after
    /// [`unlink`](Tndb::unlink)) is logged and does not change the result.
    ///
    /// Returns `Ok(false)` when the file does not match; `Err` only for I/O
    /// failures.
    pub fn verify(&self) -> Result<bool> {
        let path = self.path();

        if !self.flags().is_signed() && !self.store_sidecar() {
            self.set_verification(Verification::Passed)?;
            return Ok(true);
        }

        let ok = if verify_cached(path, &self.config().sidecar_extension)? {
            debug!(path = %path.display(), "checksum sidecar matches");
            true
        } else if self.verify_digest()? {
            if self.store_sidecar() {
                info!(path = %path.display(), "digest verified; sidecar regenerated");
            }
            true
        } else {
            warn!(path = %path.display(), "tndb verification failed");
            false
        };

        self.set_verification(if ok {
            Verification::Passed
        } else {
            Verification::Failed
        })?;
        Ok(ok)
    }

    /// Rewrites the checksum sidecar. Returns whether it was written.
    fn store_sidecar(&self) -> bool {
        let path = self.path();
        match compute_and_store(path, &self.config().sidecar_extension) {
            Ok(_) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not write checksum sidecar");
                false
            }
        }
    }

    /// Recomputes the SHA-1 digest over data, header and directory and
    /// compares it with the one stored in the header. Does not consult or
    /// touch the sidecar.
    ///
    /// Returns `Ok(false)` for unsigned files.
    pub fn verify_digest(&self) -> Result<bool> {
        let header = self.header();
        let expected = match header.digest() {
            Some(md) => md,
            None => return Ok(false),
        };

        let dir_offset = u64::from(header.extent());
        let doffs = u64::from(header.doffs());

        let mut st = self.lock()?;
        let stream = &mut st.stream;
        let mut signer = Signer::new();

        stream.seek(SeekFrom::Start(doffs))?;
        io::copy(stream, &mut DigestSink::new(&mut signer))?;

        header.compute_digest(&mut signer);

        if header.flags().has_hash() {
            stream.seek(SeekFrom::Start(dir_offset))?;
            let want = doffs - dir_offset;
            let got = io::copy(&mut (&mut *stream).take(want), &mut DigestSink::new(&mut signer))?;
            if got != want {
                debug!(want, got, "directory shorter than its declared size");
                return Ok(false);
            }
        }

        let actual = signer.finalize();
        if actual != expected {
            debug!(%expected, %actual, "digest mismatch");
        }
        Ok(actual == expected)
    }
}
