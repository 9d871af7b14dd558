//! tndb binary format: header codec and record codec.
//!
//! ## Header
//!
//! ```text
//! [magic: 8 bytes "tndb1.0\n"][flags: u8]
//! [sig_block_len: u16]                         -- includes itself
//!     repeated: [name_len: u8][name][sig_len: u16][sig]
//! [ts: u32][nrec: u32][doffs: u32]
//! ```
//!
//! A signed header carries one sub-signature named `"md"` holding the
//! 20-byte SHA-1 digest. Unknown sub-signatures are skipped on read.
//! All integers are big-endian.
//!
//! ## Record
//!
//! ```text
//! [klen: u8][key][vlen: u32][value]
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use sign::{Digest, Signer, DIGEST_LEN};
use std::fmt;
use std::io::{self, Read, Write};
use std::ops::BitOr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{eof_as, Error, Result};

/// Magic/version tag at the start of every tndb file.
pub const MAGIC: [u8; 8] = *b"tndb1.0\n";

/// Maximum key length in bytes.
pub const KEY_MAX: usize = u8::MAX as usize;

/// Name of the sub-signature holding the SHA-1 digest.
pub const DIGEST_SIG_NAME: &str = "md";

/// Size of a record's fixed fields: `klen` (u8) + `vlen` (u32).
pub const RECORD_OVERHEAD: u64 = 1 + 4;

/// Database build flags, stored in the header's flags byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u8);

impl Flags {
    /// The file carries a SHA-1 digest over header, directory and data.
    pub const SIGNED: Flags = Flags(1 << 0);
    /// The file has no hash directory; only sequential iteration works.
    pub const NOHASH: Flags = Flags(1 << 7);

    pub const fn empty() -> Self {
        Flags(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Flags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_signed(self) -> bool {
        self.contains(Flags::SIGNED)
    }

    pub const fn has_hash(self) -> bool {
        !self.contains(Flags::NOHASH)
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.is_signed() {
            names.push("SIGNED");
        }
        if !self.has_hash() {
            names.push("NOHASH");
        }
        write!(f, "Flags({:#04x}", self.0)?;
        if !names.is_empty() {
            write!(f, " {}", names.join("|"))?;
        }
        write!(f, ")")
    }
}

/// Size of the signature block written for `flags`.
fn sig_block_size(flags: Flags) -> u32 {
    let mut size = 2;
    if flags.is_signed() {
        size += 1 + DIGEST_SIG_NAME.len() as u32 + 2 + DIGEST_LEN as u32;
    }
    size
}

/// Where [`Header::emit`] sends each field.
enum Target<'a> {
    Stream(&'a mut dyn Write),
    Digest(&'a mut Signer),
}

impl Target<'_> {
    fn bytes(&mut self, b: &[u8]) -> io::Result<()> {
        match self {
            Target::Stream(w) => w.write_all(b),
            Target::Digest(s) => {
                s.update(b);
                Ok(())
            }
        }
    }

    fn u32(&mut self, v: u32) -> io::Result<()> {
        match self {
            Target::Stream(w) => w.write_u32::<BigEndian>(v),
            Target::Digest(s) => {
                s.update_u32(v);
                Ok(())
            }
        }
    }
}

/// The fixed preamble of a tndb file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    flags: Flags,
    digest: Option<Digest>,
    pub(crate) ts: u32,
    pub(crate) nrec: u32,
    pub(crate) doffs: u32,
    /// Bytes the header occupies on disk.
    extent: u32,
}

impl Header {
    /// A fresh header stamped with the current time.
    pub fn new(flags: Flags) -> Self {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        Self {
            flags,
            digest: None,
            ts,
            nrec: 0,
            doffs: 0,
            extent: Self::size_for(flags),
        }
    }

    fn size_for(flags: Flags) -> u32 {
        MAGIC.len() as u32 + 1 + sig_block_size(flags) + 3 * 4
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn digest(&self) -> Option<Digest> {
        self.digest
    }

    pub(crate) fn set_digest(&mut self, digest: Digest) {
        self.digest = Some(digest);
    }

    /// Creation time, seconds since the Unix epoch.
    pub fn ts(&self) -> u32 {
        self.ts
    }

    pub fn nrec(&self) -> u32 {
        self.nrec
    }

    /// Absolute offset of the first data record.
    pub fn doffs(&self) -> u32 {
        self.doffs
    }

    /// Size [`store`](Self::store) will write. Needs no I/O, so the
    /// directory can be placed before the header is written.
    pub fn store_size(&self) -> u32 {
        Self::size_for(self.flags)
    }

    /// Bytes this header occupies in its file. Equal to
    /// [`store_size`](Self::store_size) unless the file carried
    /// sub-signatures this version does not know.
    pub fn extent(&self) -> u32 {
        self.extent
    }

    /// Single field walker behind [`store`](Self::store) and
    /// [`compute_digest`](Self::compute_digest).
    fn emit(&self, mut target: Target<'_>) -> io::Result<()> {
        target.bytes(&MAGIC)?;
        target.bytes(&[self.flags.bits()])?;
        if let Target::Stream(w) = &mut target {
            self.store_signatures(&mut **w)?;
        }
        target.u32(self.ts)?;
        target.u32(self.nrec)?;
        target.u32(self.doffs)
    }

    fn store_signatures(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_u16::<BigEndian>(sig_block_size(self.flags) as u16)?;
        if self.flags.is_signed() {
            let md = self.digest.unwrap_or_default();
            w.write_u8(DIGEST_SIG_NAME.len() as u8)?;
            w.write_all(DIGEST_SIG_NAME.as_bytes())?;
            w.write_u16::<BigEndian>(DIGEST_LEN as u16)?;
            w.write_all(md.as_bytes())?;
        }
        Ok(())
    }

    pub fn store<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.emit(Target::Stream(w))
    }

    /// Feeds the header's digest contribution (everything but the
    /// signature block) to `signer`.
    pub fn compute_digest(&self, signer: &mut Signer) {
        // digest targets cannot fail
        let _ = self.emit(Target::Digest(signer));
    }

    /// Reads a header from the current position of `r`.
    pub fn restore<R: Read>(r: &mut R) -> Result<Self> {
        let short = || Error::Truncated("header");

        let mut magic = [0u8; 8];
        r.read_exact(&mut magic).map_err(|e| eof_as(e, short))?;
        if magic != MAGIC {
            return Err(Error::BadMagic);
        }

        let flags = Flags::from_bits(r.read_u8().map_err(|e| eof_as(e, short))?);
        let (digest, sig_len) = restore_signatures(r, flags)?;

        let ts = r.read_u32::<BigEndian>().map_err(|e| eof_as(e, short))?;
        let nrec = r.read_u32::<BigEndian>().map_err(|e| eof_as(e, short))?;
        let doffs = r.read_u32::<BigEndian>().map_err(|e| eof_as(e, short))?;

        Ok(Self {
            flags,
            digest,
            ts,
            nrec,
            doffs,
            extent: MAGIC.len() as u32 + 1 + u32::from(sig_len) + 3 * 4,
        })
    }
}

/// Reads the signature block, returning the digest (if any) and the block's
/// declared length.
///
/// A digest entry must be present exactly when `flags` is signed.
fn restore_signatures<R: Read>(r: &mut R, flags: Flags) -> Result<(Option<Digest>, u16)> {
    let short = || Error::Truncated("signature block");

    let total = r.read_u16::<BigEndian>().map_err(|e| eof_as(e, short))?;
    if total < 2 {
        return Err(Error::CorruptHeader(format!(
            "signature block length {} too small",
            total
        )));
    }

    let mut remaining = u32::from(total) - 2;
    let mut digest = None;
    let mut name = Vec::new();
    let mut sig = Vec::new();

    while remaining > 0 {
        let name_len = r.read_u8().map_err(|e| eof_as(e, short))?;
        name.resize(name_len as usize, 0);
        r.read_exact(&mut name).map_err(|e| eof_as(e, short))?;

        let sig_len = r.read_u16::<BigEndian>().map_err(|e| eof_as(e, short))?;
        let used = 1 + u32::from(name_len) + 2 + u32::from(sig_len);
        if used > remaining {
            return Err(Error::CorruptHeader("signature block overrun".to_string()));
        }
        sig.resize(sig_len as usize, 0);
        r.read_exact(&mut sig).map_err(|e| eof_as(e, short))?;
        remaining -= used;

        if name == DIGEST_SIG_NAME.as_bytes() {
            if !flags.is_signed() {
                return Err(Error::CorruptHeader(format!(
                    "digest present but {:?} is not signed",
                    flags
                )));
            }
            let md = Digest::from_slice(&sig).ok_or_else(|| {
                Error::CorruptHeader(format!("digest of {} bytes, expected {}", sig_len, DIGEST_LEN))
            })?;
            digest = Some(md);
        }
    }

    if flags.is_signed() && digest.is_none() {
        return Err(Error::CorruptHeader("signed header without a digest".to_string()));
    }
    Ok((digest, total))
}

/// On-disk size of a record.
pub fn record_size(key_len: usize, value_len: usize) -> u64 {
    RECORD_OVERHEAD + key_len as u64 + value_len as u64
}

/// Writes one `[klen][key][vlen][value]` record.
///
/// The caller has already checked `key.len() <= KEY_MAX` and that the value
/// length fits in 32 bits.
pub(crate) fn write_record<W: Write>(w: &mut W, key: &[u8], value: &[u8]) -> io::Result<()> {
    w.write_u8(key.len() as u8)?;
    w.write_all(key)?;
    w.write_u32::<BigEndian>(value.len() as u32)?;
    w.write_all(value)
}

/// Reads a record's `[klen][key][vlen]` prefix, leaving `r` at the first
/// value byte. The key is stored in `key` and the value length returned.
pub(crate) fn read_record_head<R: Read>(r: &mut R, key: &mut Vec<u8>) -> io::Result<u32> {
    let klen = r.read_u8()?;
    key.resize(klen as usize, 0);
    r.read_exact(key)?;
    r.read_u32::<BigEndian>()
}
