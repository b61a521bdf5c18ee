//! ZIP store-only codec: on-disk records, CRC-32, DOS timestamps, and the
//! streaming writer and random-access reader built on them.

pub mod crc;
pub mod dostime;
pub mod reader;
pub mod records;
pub mod writer;

pub use crc::Crc32;
pub use dostime::DosDateTime;
pub use reader::{ArchiveReader, EntryInfo, EntryReader};
pub use writer::{ArchiveWriter, EntryDescriptor, WriterOptions};
