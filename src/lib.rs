//! Streaming ZIP32/ZIP64 archive codec for TDF3 containers
//!
//! A TDF3 file is a ZIP archive holding two stored entries, `0.payload`
//! (ciphertext) and `0.manifest.json`. [`ArchiveWriter`] streams entries of
//! known size into any [`OutputSink`] and [`ArchiveReader`] serves byte
//! ranges from any [`InputSource`]. [`TdfArchiveBuilder`] and [`TdfArchive`]
//! wrap both for the two-entry TDF layout.

mod archive;
pub mod codec;
mod crypto;
mod error;
mod io;
mod manifest;

pub use archive::{TdfArchive, TdfArchiveBuilder, MANIFEST_ENTRY, PAYLOAD_ENTRY};
pub use codec::{
    ArchiveReader, ArchiveWriter, Crc32, DosDateTime, EntryDescriptor, EntryInfo, EntryReader,
    WriterOptions,
};
pub use crypto::{EncryptionError, PayloadCipher, IV_SIZE, KEY_SIZE, TAG_SIZE};
pub use error::{ArchiveError, Result};
pub use io::{FileSource, InputSource, OutputSink, SeekSource, WriteSink};
pub use manifest::{
    EncryptionInformation, EncryptionMethod, IntegrityInformation, KeyAccess, Payload,
    PolicyBinding, RootSignature, Segment, SegmentSizeOverflow, TdfManifest, DEFAULT_SEGMENT_SIZE,
};
