//! Streaming ZIP writer
//!
//! Entries are stored uncompressed. Each entry's size is declared up front so
//! the zip32/zip64 layout can be chosen before any byte of it is written; the
//! CRC is only known once the data has streamed through, so every local
//! header sets bit 3 and is followed after the data by a data descriptor.
//!
//! # Example
//!
//! ```
//! use tdf3_archive::{ArchiveReader, ArchiveWriter};
//!
//! # fn example() -> Result<(), tdf3_archive::ArchiveError> {
//! let mut writer = ArchiveWriter::new(Vec::new());
//! writer.declare_entry("1.txt", 10)?;
//! writer.append_chunk("1.txt", &[0xFF; 4])?;
//! writer.append_chunk("1.txt", &[0xFF; 6])?;
//! let bytes = writer.finish()?;
//!
//! let reader = ArchiveReader::open(bytes)?;
//! assert_eq!(reader.entry_size("1.txt")?, 10);
//! # Ok(())
//! # }
//! ```

use super::crc::Crc32;
use super::dostime::DosDateTime;
use super::records::{
    CentralDirectoryHeader, DataDescriptor, EndOfCentralDirectory, LocalFileHeader,
    Zip64EndOfCentralDirectory, Zip64EndOfCentralDirectoryLocator, Zip64ExtraField,
    FLAG_DATA_DESCRIPTOR, METHOD_STORE, SENTINEL_16, SENTINEL_32, ZIP32_MAX_SIZE, ZIP_VERSION,
};
use crate::error::{ArchiveError, Result};
use crate::io::OutputSink;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

/// Writer configuration
#[derive(Debug, Clone, Default)]
pub struct WriterOptions {
    zip64: bool,
    modified: Option<DateTime<Utc>>,
}

impl WriterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit the zip64 layout regardless of entry sizes
    pub fn zip64(mut self, enabled: bool) -> Self {
        self.zip64 = enabled;
        self
    }

    /// Stamp every entry with this time instead of reading the clock
    pub fn modified_time(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }
}

/// One in-flight or completed entry
#[derive(Debug, Clone)]
pub struct EntryDescriptor {
    name: String,
    declared_size: u64,
    bytes_written: u64,
    crc: Crc32,
    local_header_offset: u64,
    header_written: bool,
    zip64: bool,
    modified: DosDateTime,
    flags: u16,
}

impl EntryDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.declared_size
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn crc32(&self) -> u32 {
        self.crc.value()
    }

    pub fn local_header_offset(&self) -> u64 {
        self.local_header_offset
    }

    pub fn modified(&self) -> DosDateTime {
        self.modified
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// Whether this entry's local header carries a zip64 extra field
    pub fn is_zip64(&self) -> bool {
        self.zip64
    }

    fn is_complete(&self) -> bool {
        self.bytes_written == self.declared_size
    }
}

/// Stateful ZIP encoder over an append-only sink
///
/// Phases: no entry in flight, appending one entry, and finished. The last is
/// reached by [`ArchiveWriter::finish`], which consumes the writer.
pub struct ArchiveWriter<S: OutputSink> {
    sink: S,
    options: WriterOptions,
    current_offset: u64,
    zip64: bool,
    current: Option<EntryDescriptor>,
    entries: Vec<EntryDescriptor>,
}

impl<S: OutputSink> ArchiveWriter<S> {
    pub fn new(sink: S) -> Self {
        Self::with_options(sink, WriterOptions::default())
    }

    pub fn with_options(sink: S, options: WriterOptions) -> Self {
        Self {
            sink,
            zip64: options.zip64,
            options,
            current_offset: 0,
            current: None,
            entries: Vec::new(),
        }
    }

    /// Bytes handed to the sink so far
    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    pub fn is_zip64(&self) -> bool {
        self.zip64
    }

    /// Latches the zip64 layout for the rest of the archive
    pub fn enable_zip64(&mut self) {
        self.zip64 = true;
    }

    /// Completed entries in write order
    pub fn entries(&self) -> &[EntryDescriptor] {
        &self.entries
    }

    /// The entry currently accepting bytes, if any
    pub fn in_flight(&self) -> Option<&EntryDescriptor> {
        self.current.as_ref()
    }

    /// Declares the next entry and its exact size
    ///
    /// Nothing is written until the first [`append_chunk`](Self::append_chunk),
    /// except for zero-length entries, which are complete as soon as they are
    /// declared and so emit their header and data descriptor immediately.
    pub fn declare_entry(&mut self, name: &str, size: u64) -> Result<()> {
        if let Some(current) = &self.current {
            return Err(ArchiveError::state(format!(
                "cannot declare '{}' while '{}' has {} of {} bytes",
                name, current.name, current.bytes_written, current.declared_size
            )));
        }
        if name.is_empty() {
            return Err(ArchiveError::state("entry name must not be empty"));
        }
        if name.len() > u16::MAX as usize {
            return Err(ArchiveError::state(format!(
                "entry name is {} bytes, the limit is {}",
                name.len(),
                u16::MAX
            )));
        }
        if self.entries.iter().any(|e| e.name == name) {
            return Err(ArchiveError::state(format!(
                "entry '{}' was already written",
                name
            )));
        }

        if size > ZIP32_MAX_SIZE {
            self.zip64 = true;
        }

        let modified = match &self.options.modified {
            Some(dt) => DosDateTime::from_datetime(dt),
            None => DosDateTime::now(),
        };

        debug!(name, size, zip64 = self.zip64, "declared archive entry");

        self.current = Some(EntryDescriptor {
            name: name.to_string(),
            declared_size: size,
            bytes_written: 0,
            crc: Crc32::new(),
            local_header_offset: 0,
            header_written: false,
            zip64: false,
            modified,
            flags: FLAG_DATA_DESCRIPTOR,
        });

        if size == 0 {
            self.write_local_header()?;
            self.complete_entry()?;
        }
        Ok(())
    }

    /// Appends bytes to the declared entry
    ///
    /// The first call emits the local file header. The call that brings the
    /// entry to its declared size also emits the data descriptor.
    pub fn append_chunk(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let Some(current) = self.current.as_ref() else {
            // A zero-length entry completes at declaration
            let last_was_empty = self
                .entries
                .last()
                .is_some_and(|e| e.name == name && e.declared_size == 0);
            if bytes.is_empty() && last_was_empty {
                return Ok(());
            }
            return Err(ArchiveError::state(format!(
                "no entry in flight for '{}'",
                name
            )));
        };
        if current.name != name {
            return Err(ArchiveError::state(format!(
                "append to '{}' while '{}' is in flight",
                name, current.name
            )));
        }
        let remaining = current.declared_size - current.bytes_written;
        if bytes.len() as u64 > remaining {
            return Err(ArchiveError::state(format!(
                "append of {} bytes to '{}' exceeds declared size {} ({} remaining)",
                bytes.len(),
                name,
                current.declared_size,
                remaining
            )));
        }

        if !current.header_written {
            self.write_local_header()?;
        }

        if !bytes.is_empty() {
            self.emit(bytes)?;
            if let Some(current) = self.current.as_mut() {
                current.crc.update(bytes);
                current.bytes_written += bytes.len() as u64;
                trace!(
                    name,
                    len = bytes.len(),
                    written = current.bytes_written,
                    "appended entry chunk"
                );
            }
        }

        if self.current.as_ref().is_some_and(EntryDescriptor::is_complete) {
            self.complete_entry()?;
        }
        Ok(())
    }

    /// Declares an entry and writes all of its bytes in one call
    pub fn add_entry(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.declare_entry(name, bytes.len() as u64)?;
        if !bytes.is_empty() {
            self.append_chunk(name, bytes)?;
        }
        Ok(())
    }

    /// Writes the central directory and end records, returning the sink
    pub fn finish(mut self) -> Result<S> {
        if let Some(current) = &self.current {
            return Err(ArchiveError::state(format!(
                "cannot finish: '{}' has {} of {} bytes",
                current.name, current.bytes_written, current.declared_size
            )));
        }

        let cd_offset = self.current_offset;
        if cd_offset > ZIP32_MAX_SIZE || self.entries.len() >= SENTINEL_16 as usize {
            self.zip64 = true;
        }
        let zip64 = self.zip64;

        let mut buf = Vec::new();
        for entry in &self.entries {
            let (size32, offset32, extra) = if zip64 {
                let extra = Zip64ExtraField::central(entry.declared_size, entry.local_header_offset);
                (SENTINEL_32, SENTINEL_32, Some(extra))
            } else {
                (
                    entry.declared_size as u32,
                    entry.local_header_offset as u32,
                    None,
                )
            };
            CentralDirectoryHeader {
                version_made_by: ZIP_VERSION,
                version_needed: ZIP_VERSION,
                flags: entry.flags,
                compression_method: METHOD_STORE,
                last_mod_time: entry.modified.time,
                last_mod_date: entry.modified.date,
                crc32: entry.crc.value(),
                compressed_size: size32,
                uncompressed_size: size32,
                file_name_length: entry.name.len() as u16,
                extra_field_length: extra.map_or(0, |e| e.encoded_len() as u16),
                comment_length: 0,
                disk_number_start: 0,
                internal_attributes: 0,
                external_attributes: 0,
                local_header_offset: offset32,
            }
            .write_to(&mut buf);
            buf.extend_from_slice(entry.name.as_bytes());
            if let Some(extra) = extra {
                extra.write_to(&mut buf);
            }
        }
        self.emit(&buf)?;

        let cd_size = self.current_offset - cd_offset;
        let count = self.entries.len() as u64;

        buf.clear();
        if zip64 {
            Zip64EndOfCentralDirectory::new(count, cd_size, cd_offset).write_to(&mut buf);
            Zip64EndOfCentralDirectoryLocator::new(self.current_offset).write_to(&mut buf);
        }
        let count16 = if count >= SENTINEL_16 as u64 {
            SENTINEL_16
        } else {
            count as u16
        };
        EndOfCentralDirectory {
            disk_number: 0,
            disk_with_central_directory: 0,
            entries_on_disk: count16,
            total_entries: count16,
            central_directory_size: u32::try_from(cd_size).unwrap_or(SENTINEL_32),
            central_directory_offset: if zip64 { SENTINEL_32 } else { cd_offset as u32 },
            comment_length: 0,
        }
        .write_to(&mut buf);
        self.emit(&buf)?;
        self.sink.flush()?;

        debug!(
            entries = count,
            cd_offset,
            cd_size,
            zip64,
            total = self.current_offset,
            "finished archive"
        );
        Ok(self.sink)
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        self.sink.write(bytes)?;
        self.current_offset += bytes.len() as u64;
        Ok(())
    }

    fn write_local_header(&mut self) -> Result<()> {
        // Offsets past the zip32 range need the zip64 central directory form
        if self.current_offset > ZIP32_MAX_SIZE {
            self.zip64 = true;
        }
        let zip64 = self.zip64;
        let offset = self.current_offset;

        let mut buf = Vec::new();
        {
            let Some(entry) = self.current.as_mut() else {
                return Err(ArchiveError::state("no entry in flight"));
            };
            entry.local_header_offset = offset;
            entry.zip64 = zip64;
            entry.header_written = true;

            let extra = zip64.then(|| Zip64ExtraField::local(entry.declared_size));
            let size32 = if zip64 { SENTINEL_32 } else { 0 };
            LocalFileHeader {
                version_needed: ZIP_VERSION,
                flags: entry.flags,
                compression_method: METHOD_STORE,
                last_mod_time: entry.modified.time,
                last_mod_date: entry.modified.date,
                crc32: 0,
                compressed_size: size32,
                uncompressed_size: size32,
                file_name_length: entry.name.len() as u16,
                extra_field_length: extra.map_or(0, |e| e.encoded_len() as u16),
            }
            .write_to(&mut buf);
            buf.extend_from_slice(entry.name.as_bytes());
            if let Some(extra) = extra {
                extra.write_to(&mut buf);
            }
        }
        self.emit(&buf)
    }

    fn complete_entry(&mut self) -> Result<()> {
        let Some(entry) = self.current.take() else {
            return Err(ArchiveError::state("no entry in flight"));
        };

        let descriptor = DataDescriptor {
            crc32: entry.crc.value(),
            compressed_size: entry.declared_size,
            uncompressed_size: entry.declared_size,
        };
        let mut buf = Vec::with_capacity(DataDescriptor::SIZE_64);
        descriptor.write_to(&mut buf, entry.zip64);
        self.emit(&buf)?;

        debug!(
            name = %entry.name,
            size = entry.declared_size,
            crc32 = descriptor.crc32,
            "completed archive entry"
        );
        self.entries.push(entry);
        Ok(())
    }
}

impl<S: OutputSink> std::fmt::Debug for ArchiveWriter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWriter")
            .field("current_offset", &self.current_offset)
            .field("zip64", &self.zip64)
            .field("in_flight", &self.current.as_ref().map(|e| e.name.as_str()))
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::crc::checksum;
    use crate::codec::records::{
        DATA_DESCRIPTOR_SIGNATURE, EOCD_SIGNATURE, ZIP64_EOCD_LOCATOR_SIGNATURE,
        ZIP64_EOCD_SIGNATURE,
    };
    use chrono::TimeZone;

    fn fixed_options() -> WriterOptions {
        WriterOptions::new().modified_time(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 10).unwrap())
    }

    fn u32_at(bytes: &[u8], pos: usize) -> u32 {
        u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap())
    }

    #[test]
    fn test_single_entry_layout() -> Result<()> {
        let mut writer = ArchiveWriter::with_options(Vec::new(), fixed_options());
        writer.declare_entry("1.txt", 10)?;
        assert_eq!(writer.current_offset(), 0, "declare must not emit bytes");

        writer.append_chunk("1.txt", &[0xFF; 3])?;
        assert_eq!(writer.current_offset(), 30 + 5 + 3);
        writer.append_chunk("1.txt", &[0xFF; 7])?;
        assert!(writer.in_flight().is_none());
        assert_eq!(writer.entries().len(), 1);
        assert_eq!(writer.entries()[0].crc32(), checksum(&[0xFF; 10]));

        let bytes = writer.finish()?;
        // local header + name + data + descriptor + cd header + name + eocd
        assert_eq!(bytes.len(), 30 + 5 + 10 + 16 + 46 + 5 + 22);

        assert_eq!(u32_at(&bytes, 0), 0x0403_4B50);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), FLAG_DATA_DESCRIPTOR);
        assert_eq!(u32_at(&bytes, 45), DATA_DESCRIPTOR_SIGNATURE);
        assert_eq!(u32_at(&bytes, 49), checksum(&[0xFF; 10]));
        assert_eq!(u32_at(&bytes, 53), 10);
        assert_eq!(u32_at(&bytes, 57), 10);

        let eocd = bytes.len() - 22;
        assert_eq!(u32_at(&bytes, eocd), EOCD_SIGNATURE);
        assert_eq!(u16::from_le_bytes([bytes[eocd + 10], bytes[eocd + 11]]), 1);
        assert_eq!(u32_at(&bytes, eocd + 16), 61);
        Ok(())
    }

    #[test]
    fn test_zero_length_entry() -> Result<()> {
        let mut writer = ArchiveWriter::with_options(Vec::new(), fixed_options());
        writer.declare_entry("empty", 0)?;
        assert!(writer.in_flight().is_none());
        assert_eq!(writer.current_offset(), 30 + 5 + 16);
        assert_eq!(writer.entries()[0].crc32(), 0);

        // An empty append to the completed entry changes nothing
        writer.append_chunk("empty", &[])?;
        assert_eq!(writer.current_offset(), 30 + 5 + 16);
        let err = writer.append_chunk("empty", b"x").unwrap_err();
        assert!(err.to_string().contains("no entry in flight for 'empty'"));

        let bytes = writer.finish()?;
        assert_eq!(u32_at(&bytes, 35), DATA_DESCRIPTOR_SIGNATURE);
        assert_eq!(u32_at(&bytes, 39), 0);
        Ok(())
    }

    #[test]
    fn test_append_past_declared_size_is_rejected() -> Result<()> {
        let mut writer = ArchiveWriter::new(Vec::new());
        writer.declare_entry("a", 4)?;
        writer.append_chunk("a", b"ab")?;
        let before = writer.current_offset();

        let err = writer.append_chunk("a", b"cde").unwrap_err();
        assert!(matches!(err, ArchiveError::StateViolation(_)));
        assert_eq!(writer.current_offset(), before);

        writer.append_chunk("a", b"cd")?;
        assert!(writer.in_flight().is_none());
        Ok(())
    }

    #[test]
    fn test_phase_violations() -> Result<()> {
        let mut writer = ArchiveWriter::new(Vec::new());
        assert!(matches!(
            writer.append_chunk("a", b"x"),
            Err(ArchiveError::StateViolation(_))
        ));
        assert!(writer.declare_entry("", 1).is_err());

        writer.declare_entry("a", 2)?;
        assert!(writer.declare_entry("b", 1).is_err());
        assert!(writer.append_chunk("b", b"x").is_err());
        writer.append_chunk("a", b"x")?;

        let err = writer.finish().unwrap_err();
        assert!(err.to_string().contains("1 of 2 bytes"));
        Ok(())
    }

    #[test]
    fn test_duplicate_names_rejected() -> Result<()> {
        let mut writer = ArchiveWriter::new(Vec::new());
        writer.add_entry("a", b"1")?;
        assert!(writer.declare_entry("a", 1).is_err());
        Ok(())
    }

    #[test]
    fn test_zip64_threshold() -> Result<()> {
        let mut writer = ArchiveWriter::new(Vec::new());
        writer.declare_entry("big", 0xFFFF_FFFE)?;
        assert!(!writer.is_zip64());

        let mut writer = ArchiveWriter::new(Vec::new());
        writer.declare_entry("bigger", 0xFFFF_FFFF)?;
        assert!(writer.is_zip64());
        Ok(())
    }

    #[test]
    fn test_zip64_layout() -> Result<()> {
        let options = fixed_options().zip64(true);
        let mut writer = ArchiveWriter::with_options(Vec::new(), options);
        writer.add_entry("1.txt", &[0xFF; 10])?;
        writer.add_entry("2.txt", &[0xFF; 10])?;
        let bytes = writer.finish()?;

        // Local header sizes are sentinels and a 20-byte extra follows the name
        assert_eq!(u32_at(&bytes, 18), SENTINEL_32);
        assert_eq!(u16::from_le_bytes([bytes[28], bytes[29]]), 20);
        // Descriptor sizes are 8 bytes wide
        let dd = 30 + 5 + 20 + 10;
        assert_eq!(u32_at(&bytes, dd), DATA_DESCRIPTOR_SIGNATURE);
        assert_eq!(u64::from_le_bytes(bytes[dd + 8..dd + 16].try_into().unwrap()), 10);

        let eocd = bytes.len() - 22;
        let locator = eocd - 20;
        let zip64_eocd = locator - 56;
        assert_eq!(u32_at(&bytes, eocd), EOCD_SIGNATURE);
        assert_eq!(u32_at(&bytes, eocd + 16), SENTINEL_32);
        // Entry counts agree between the classical and zip64 records
        assert_eq!(u16::from_le_bytes([bytes[eocd + 8], bytes[eocd + 9]]), 2);
        assert_eq!(u16::from_le_bytes([bytes[eocd + 10], bytes[eocd + 11]]), 2);
        assert_eq!(u32_at(&bytes, locator), ZIP64_EOCD_LOCATOR_SIGNATURE);
        assert_eq!(
            u64::from_le_bytes(bytes[locator + 8..locator + 16].try_into().unwrap()),
            zip64_eocd as u64
        );
        assert_eq!(u32_at(&bytes, zip64_eocd), ZIP64_EOCD_SIGNATURE);
        assert_eq!(
            u64::from_le_bytes(bytes[zip64_eocd + 24..zip64_eocd + 32].try_into().unwrap()),
            2
        );
        assert_eq!(
            u64::from_le_bytes(bytes[zip64_eocd + 32..zip64_eocd + 40].try_into().unwrap()),
            2
        );
        Ok(())
    }

    struct FailingSink;

    impl OutputSink for FailingSink {
        fn write(&mut self, _bytes: &[u8]) -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "disk full").into())
        }
    }

    #[test]
    fn test_sink_errors_surface() -> Result<()> {
        let mut writer = ArchiveWriter::new(FailingSink);
        writer.declare_entry("a", 1)?;
        let err = writer.append_chunk("a", b"x").unwrap_err();
        assert!(matches!(err, ArchiveError::Io(_)));
        assert_eq!(writer.current_offset(), 0);
        Ok(())
    }
}
