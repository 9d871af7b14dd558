//! # Config - tndb runtime settings
//!
//! A single [`TndbConfig`] value is handed to the writer and reader when a
//! database is created or opened. Every field has a sensible default, and
//! each one can be overridden from the environment:
//!
//! ```text
//! TNDB_VERIFY_BEFORE_READ  verify signed files before lookups  (default: "true")
//! TNDB_SIDECAR_EXT         checksum sidecar extension          (default: "md5")
//! TNDB_COPY_BUFFER_KB      data copy buffer at writer close    (default: 16)
//! TNDB_COMPRESSION_LEVEL   zstd level for `.zst` databases     (default: 3)
//! ```
//!
//! Absent or unparsable values fall back to the default.
//!
//! ## Example
//!
//! ```rust
//! use config::TndbConfig;
//!
//! let cfg = TndbConfig::default().with_verify_before_read(false);
//! assert!(!cfg.verify_before_read);
//! assert_eq!(cfg.sidecar_extension, "md5");
//! ```

/// Default extension of the whole-file checksum sidecar (`<db>.md5`).
pub const DEFAULT_SIDECAR_EXT: &str = "md5";

/// Default size of the buffer used to copy the data region at writer close.
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Default zstd compression level for databases whose path ends in `.zst`.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Runtime settings shared by the tndb writer and reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TndbConfig {
    /// When `true`, keyed lookups and iteration over a signed database run a
    /// full verification first and refuse to read if it fails.
    pub verify_before_read: bool,
    /// Extension appended to the database path for the checksum sidecar.
    pub sidecar_extension: String,
    /// Size of the chunk buffer used when the writer appends the data region
    /// onto the final file.
    pub copy_buffer_size: usize,
    /// zstd level used when the destination path selects a compressed stream.
    pub compression_level: i32,
}

impl Default for TndbConfig {
    fn default() -> Self {
        Self {
            verify_before_read: true,
            sidecar_extension: DEFAULT_SIDECAR_EXT.to_string(),
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl TndbConfig {
    /// Builds a config from `TNDB_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. `from_env` is this
    /// function applied to the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).map(|v| v.trim().to_string());

        let verify_before_read = parsed("TNDB_VERIFY_BEFORE_READ")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.verify_before_read);

        let sidecar_extension = parsed("TNDB_SIDECAR_EXT")
            .map(|v| v.trim_start_matches('.').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.sidecar_extension);

        let copy_buffer_size = parsed("TNDB_COPY_BUFFER_KB")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|kb| *kb > 0)
            .map(|kb| kb * 1024)
            .unwrap_or(defaults.copy_buffer_size);

        let compression_level = parsed("TNDB_COMPRESSION_LEVEL")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.compression_level);

        Self {
            verify_before_read,
            sidecar_extension,
            copy_buffer_size,
            compression_level,
        }
    }

    #[must_use]
    pub fn with_verify_before_read(mut self, on: bool) -> Self {
        self.verify_before_read = on;
        self
    }

    /// Sets the sidecar extension. A leading `.` is stripped.
    ///
    /// # Panics
    ///
    /// Panics if the extension is empty.
    #[must_use]
    pub fn with_sidecar_extension(mut self, ext: &str) -> Self {
        let ext = ext.trim_start_matches('.');
        assert!(!ext.is_empty(), "sidecar extension must not be empty");
        self.sidecar_extension = ext.to_string();
        self
    }

    /// Sets the copy buffer size in bytes.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is 0.
    #[must_use]
    pub fn with_copy_buffer_size(mut self, bytes: usize) -> Self {
        assert!(bytes > 0, "copy buffer size must be > 0");
        self.copy_buffer_size = bytes;
        self
    }

    #[must_use]
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }
}
