//! Error type for the TDF3 archive codec
//!
//! Every fallible operation in the crate returns [`Result`], whose error side
//! is [`ArchiveError`]. Nothing is retried internally and the writer never
//! rolls back bytes already handed to its sink.
//!
//! # Example
//!
//! ```
//! use tdf3_archive::{ArchiveError, ArchiveReader};
//!
//! let truncated = vec![0u8; 10];
//! match ArchiveReader::open(truncated) {
//!     Err(e) => assert!(e.is_format_error()),
//!     Ok(_) => unreachable!(),
//! }
//! ```

use thiserror::Error;

/// Errors produced by the archive writer, reader and TDF facade
///
/// # Error Categories
///
/// - **InvalidFormat**: bad signature, truncated record, missing zip64 extra
/// - **ShortRead**: a read reached past the end of the input source
/// - **NotFound**: no entry with the requested name
/// - **RangeOutOfBounds**: a byte range overruns the entry
/// - **StateViolation**: a writer call made in the wrong phase
/// - **Io**: the underlying sink or source failed
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The bytes do not form a ZIP archive this codec understands
    #[error("invalid zip format: {0}")]
    InvalidFormat(String),

    /// The source ended before the requested bytes
    #[error("short read: {len} bytes at offset {offset} exceeds source size {size}")]
    ShortRead { offset: u64, len: u64, size: u64 },

    /// Entry name absent from the archive
    #[error("entry not found: {0}")]
    NotFound(String),

    /// Requested range overruns the entry
    #[error("size error: range {offset}+{len} exceeds entry '{name}' of {size} bytes")]
    RangeOutOfBounds {
        name: String,
        offset: u64,
        len: u64,
        size: u64,
    },

    /// Writer operation called out of phase
    #[error("writer state violation: {0}")]
    StateViolation(String),

    /// Underlying sink or source failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest JSON could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        Self::StateViolation(msg.into())
    }

    /// Returns true if the archive itself is malformed
    ///
    /// A short read while parsing trailers also means the archive is
    /// truncated, so it counts as a format error.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidFormat(_) | Self::ShortRead { .. } | Self::Json(_)
        )
    }

    /// Returns true if the caller can continue using the same reader or writer
    ///
    /// Lookups of absent names and out-of-range reads leave the reader intact.
    /// State violations and I/O failures leave a writer's output unusable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::RangeOutOfBounds { .. })
    }

    /// Returns a suggestion for resolving this error
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::InvalidFormat(_) | Self::ShortRead { .. } => {
                Some("The archive is truncated or not a ZIP file; discard it and re-create it")
            }
            Self::NotFound(_) => Some("List entry names with ArchiveReader::entry_names"),
            Self::RangeOutOfBounds { .. } => {
                Some("Check the entry size with ArchiveReader::entry_size before reading")
            }
            Self::StateViolation(_) => Some(
                "Declare an entry, append exactly its declared size, then declare the next or finish",
            ),
            _ => None,
        }
    }
}
