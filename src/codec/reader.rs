//! ZIP reader over a random-access source
//!
//! ZIP archives are read from the end:
//! 1. Find the end of central directory (EOCD) record at the tail
//! 2. If any EOCD field is a sentinel, follow the zip64 locator to the zip64 EOCD
//! 3. Walk the central directory for names, sizes and local header offsets
//! 4. Parse each local header to find where the entry's data starts
//!
//! After [`ArchiveReader::open`] the index is immutable; range reads go
//! straight to the source.

use super::crc::Crc32;
use super::dostime::DosDateTime;
use super::records::{
    CentralDirectoryHeader, EndOfCentralDirectory, LocalFileHeader, Zip64EndOfCentralDirectory,
    Zip64EndOfCentralDirectoryLocator, Zip64ExtraField, FLAG_ENCRYPTED, METHOD_STORE, SENTINEL_32,
};
use crate::error::{ArchiveError, Result};
use crate::io::InputSource;
use std::collections::HashMap;
use std::io::Read;
use tracing::{debug, warn};

/// Largest archive comment the EOCD can announce
const MAX_COMMENT_SIZE: u64 = 0xFFFF;

/// Chunk size used when streaming an entry through the CRC check
const VERIFY_CHUNK_SIZE: usize = 64 * 1024;

/// Location and metadata of one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    name: String,
    crc32: u32,
    size: u64,
    local_header_offset: u64,
    data_offset: u64,
    modified: DosDateTime,
    flags: u16,
}

impl EntryInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// Stored length in bytes (entries are never compressed)
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn local_header_offset(&self) -> u64 {
        self.local_header_offset
    }

    /// Absolute offset of the first data byte
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    pub fn modified(&self) -> DosDateTime {
        self.modified
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }
}

/// Where the central directory lives, taken from the (zip64) EOCD
#[derive(Debug)]
struct DirectoryLocation {
    entries: u64,
    size: u64,
    offset: u64,
    zip64: bool,
}

/// Parsed archive: an immutable name index over an input source
pub struct ArchiveReader<R: InputSource> {
    source: R,
    entries: Vec<EntryInfo>,
    index: HashMap<String, usize>,
    zip64: bool,
}

impl<R: InputSource> ArchiveReader<R> {
    /// Parses the trailers and central directory of `source`
    pub fn open(source: R) -> Result<Self> {
        let (eocd, eocd_offset) = find_eocd(&source)?;
        let location = locate_directory(&source, &eocd, eocd_offset)?;

        let fits = location
            .offset
            .checked_add(location.size)
            .is_some_and(|end| end <= eocd_offset);
        if !fits {
            return Err(ArchiveError::invalid(format!(
                "central directory at {} ({} bytes) overlaps end records at {}",
                location.offset, location.size, eocd_offset
            )));
        }
        if location.entries.saturating_mul(CentralDirectoryHeader::SIZE as u64) > location.size {
            return Err(ArchiveError::invalid(format!(
                "{} entries cannot fit in a {}-byte central directory",
                location.entries, location.size
            )));
        }

        let directory = source.read_at(location.offset, location.size as usize)?;
        let mut entries = Vec::with_capacity(location.entries as usize);
        let mut index = HashMap::with_capacity(location.entries as usize);
        let mut pos = 0usize;

        for _ in 0..location.entries {
            let (entry, consumed) =
                parse_directory_entry(&source, &directory[pos..], location.offset)?;
            pos += consumed;
            if index.contains_key(&entry.name) {
                warn!(name = %entry.name, "duplicate entry name, keeping the first");
                continue;
            }
            index.insert(entry.name.clone(), entries.len());
            entries.push(entry);
        }

        debug!(
            entries = entries.len(),
            zip64 = location.zip64,
            cd_offset = location.offset,
            "opened archive"
        );

        Ok(Self {
            source,
            entries,
            index,
            zip64: location.zip64,
        })
    }

    /// True if the archive carries zip64 end records
    pub fn is_zip64(&self) -> bool {
        self.zip64
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Entry names in central directory order
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(EntryInfo::name)
    }

    pub fn entries(&self) -> &[EntryInfo] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Result<&EntryInfo> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| ArchiveError::NotFound(name.to_string()))
    }

    pub fn entry_size(&self, name: &str) -> Result<u64> {
        Ok(self.entry(name)?.size)
    }

    /// Reads `len` bytes starting `offset` bytes into the entry
    pub fn read_range(&self, name: &str, offset: u64, len: u64) -> Result<Vec<u8>> {
        let entry = self.entry(name)?;
        if offset > entry.size || len > entry.size - offset {
            return Err(ArchiveError::RangeOutOfBounds {
                name: name.to_string(),
                offset,
                len,
                size: entry.size,
            });
        }
        let len = usize::try_from(len).map_err(|_| ArchiveError::RangeOutOfBounds {
            name: name.to_string(),
            offset,
            len,
            size: entry.size,
        })?;
        self.source.read_at(entry.data_offset + offset, len)
    }

    /// Reads a whole entry into memory
    pub fn read_all(&self, name: &str) -> Result<Vec<u8>> {
        let size = self.entry_size(name)?;
        self.read_range(name, 0, size)
    }

    /// Streams an entry through [`std::io::Read`]
    pub fn entry_reader(&self, name: &str) -> Result<EntryReader<'_, R>> {
        let entry = self.entry(name)?;
        Ok(EntryReader {
            source: &self.source,
            next: entry.data_offset,
            end: entry.data_offset + entry.size,
        })
    }

    /// Recomputes an entry's CRC-32 and compares it to the central directory
    pub fn verify_crc(&self, name: &str) -> Result<()> {
        let entry = self.entry(name)?;
        let mut crc = Crc32::new();
        let mut reader = self.entry_reader(name)?;
        let mut buf = vec![0u8; VERIFY_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            crc.update(&buf[..n]);
        }
        if crc.value() != entry.crc32 {
            warn!(name, expected = entry.crc32, actual = crc.value(), "CRC mismatch");
            return Err(ArchiveError::invalid(format!(
                "CRC mismatch for '{}': directory says {:#010x}, data hashes to {:#010x}",
                name,
                entry.crc32,
                crc.value()
            )));
        }
        Ok(())
    }

    pub fn source(&self) -> &R {
        &self.source
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}

impl<R: InputSource> std::fmt::Debug for ArchiveReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("zip64", &self.zip64)
            .field("entries", &self.entries)
            .finish()
    }
}

/// [`std::io::Read`] over one entry's bytes
pub struct EntryReader<'a, R: InputSource> {
    source: &'a R,
    next: u64,
    end: u64,
}

impl<R: InputSource> EntryReader<'_, R> {
    /// Bytes not yet read
    pub fn remaining(&self) -> u64 {
        self.end - self.next
    }
}

impl<R: InputSource> Read for EntryReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = (buf.len() as u64).min(self.remaining()) as usize;
        if n == 0 {
            return Ok(0);
        }
        self.source
            .read_exact_at(self.next, &mut buf[..n])
            .map_err(|e| match e {
                ArchiveError::Io(io) => io,
                other => std::io::Error::new(std::io::ErrorKind::UnexpectedEof, other),
            })?;
        self.next += n as u64;
        Ok(n)
    }
}

/// Finds the EOCD, first at the fixed tail position, then behind a comment
fn find_eocd<R: InputSource>(source: &R) -> Result<(EndOfCentralDirectory, u64)> {
    let size = source.size();
    let eocd_size = EndOfCentralDirectory::SIZE as u64;
    if size < eocd_size {
        return Err(ArchiveError::invalid(format!(
            "{} bytes is too small for an end of central directory record",
            size
        )));
    }

    let offset = size - eocd_size;
    let tail = source.read_at(offset, EndOfCentralDirectory::SIZE)?;
    if let Ok(eocd) = EndOfCentralDirectory::parse(&tail) {
        if eocd.comment_length == 0 {
            return Ok((eocd, offset));
        }
    }

    // Search backwards for an EOCD whose comment runs exactly to the end
    let search_len = (MAX_COMMENT_SIZE + eocd_size).min(size);
    let search_start = size - search_len;
    let buf = source.read_at(search_start, search_len as usize)?;
    for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
        if buf[i..i + 4] != *b"PK\x05\x06" {
            continue;
        }
        let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
        if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
            let eocd = EndOfCentralDirectory::parse(&buf[i..])?;
            return Ok((eocd, search_start + i as u64));
        }
    }

    warn!(size, "no end of central directory signature found");
    Err(ArchiveError::invalid(
        "end of central directory signature not found",
    ))
}

fn locate_directory<R: InputSource>(
    source: &R,
    eocd: &EndOfCentralDirectory,
    eocd_offset: u64,
) -> Result<DirectoryLocation> {
    if !eocd.is_zip64() {
        return Ok(DirectoryLocation {
            entries: eocd.total_entries as u64,
            size: eocd.central_directory_size as u64,
            offset: eocd.central_directory_offset as u64,
            zip64: false,
        });
    }

    let locator_size = Zip64EndOfCentralDirectoryLocator::SIZE as u64;
    let locator_offset = eocd_offset.checked_sub(locator_size).ok_or_else(|| {
        ArchiveError::invalid("zip64 end of central directory locator missing")
    })?;
    let locator = Zip64EndOfCentralDirectoryLocator::parse(
        &source.read_at(locator_offset, Zip64EndOfCentralDirectoryLocator::SIZE)?,
    )?;
    if locator.zip64_eocd_offset > locator_offset {
        return Err(ArchiveError::invalid(format!(
            "zip64 end of central directory offset {} points past its locator",
            locator.zip64_eocd_offset
        )));
    }
    let record = Zip64EndOfCentralDirectory::parse(&source.read_at(
        locator.zip64_eocd_offset,
        Zip64EndOfCentralDirectory::SIZE,
    )?)?;

    Ok(DirectoryLocation {
        entries: record.total_entries,
        size: record.central_directory_size,
        offset: record.central_directory_offset,
        zip64: true,
    })
}

/// Parses one central directory header at the start of `data` and resolves
/// its data offset through the local header
///
/// Returns the entry and the number of directory bytes consumed. Entry data
/// must end before `directory_offset`.
fn parse_directory_entry<R: InputSource>(
    source: &R,
    data: &[u8],
    directory_offset: u64,
) -> Result<(EntryInfo, usize)> {
    let header = CentralDirectoryHeader::parse(data)?;
    let total = header.total_length();
    if data.len() < total {
        return Err(ArchiveError::invalid(
            "central directory header runs past the directory",
        ));
    }

    let name_end = CentralDirectoryHeader::SIZE + header.file_name_length as usize;
    let name = String::from_utf8_lossy(&data[CentralDirectoryHeader::SIZE..name_end]).into_owned();
    let extra = &data[name_end..name_end + header.extra_field_length as usize];

    if header.compression_method != METHOD_STORE {
        return Err(ArchiveError::invalid(format!(
            "entry '{}' uses compression method {}, only store is supported",
            name, header.compression_method
        )));
    }
    if header.flags & FLAG_ENCRYPTED != 0 {
        return Err(ArchiveError::invalid(format!(
            "entry '{}' is encrypted at the archive layer",
            name
        )));
    }

    let needs_uncompressed = header.uncompressed_size == SENTINEL_32;
    let needs_compressed = header.compressed_size == SENTINEL_32;
    let needs_offset = header.local_header_offset == SENTINEL_32;
    let zip64 = if needs_uncompressed || needs_compressed || needs_offset {
        Zip64ExtraField::find(extra, needs_uncompressed, needs_compressed, needs_offset)?
            .ok_or_else(|| {
                ArchiveError::invalid(format!(
                    "entry '{}' has sentinel sizes but no zip64 extra field",
                    name
                ))
            })?
    } else {
        Zip64ExtraField::default()
    };

    let size = zip64
        .compressed_size
        .unwrap_or(header.compressed_size as u64);
    let local_header_offset = zip64
        .local_header_offset
        .unwrap_or(header.local_header_offset as u64);

    let local = LocalFileHeader::parse(&source.read_at(local_header_offset, LocalFileHeader::SIZE)?)?;
    let data_offset = local_header_offset + local.variable_length();
    if data_offset
        .checked_add(size)
        .map_or(true, |end| end > directory_offset)
    {
        return Err(ArchiveError::invalid(format!(
            "data of entry '{}' ({} bytes at {}) runs past the central directory",
            name, size, data_offset
        )));
    }

    Ok((
        EntryInfo {
            name,
            crc32: header.crc32,
            size,
            local_header_offset,
            data_offset,
            modified: DosDateTime {
                time: header.last_mod_time,
                date: header.last_mod_date,
            },
            flags: header.flags,
        },
        total,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::writer::{ArchiveWriter, WriterOptions};

    fn three_files(options: WriterOptions) -> Result<Vec<u8>> {
        let mut writer = ArchiveWriter::with_options(Vec::new(), options);
        for name in ["1.txt", "2.txt", "3.txt"] {
            writer.declare_entry(name, 10)?;
            writer.append_chunk(name, &[0xFF; 10])?;
        }
        writer.finish()
    }

    #[test]
    fn test_reads_back_zip32() -> Result<()> {
        let reader = ArchiveReader::open(three_files(WriterOptions::new())?)?;
        assert!(!reader.is_zip64());
        assert_eq!(reader.len(), 3);
        assert_eq!(
            reader.entry_names().collect::<Vec<_>>(),
            ["1.txt", "2.txt", "3.txt"]
        );
        for name in ["1.txt", "2.txt", "3.txt"] {
            assert_eq!(reader.entry_size(name)?, 10);
            assert_eq!(reader.read_all(name)?, vec![0xFF; 10]);
            reader.verify_crc(name)?;
        }

        let second = reader.entry("2.txt")?;
        assert_eq!(second.local_header_offset(), 30 + 5 + 10 + 16);
        assert_eq!(second.data_offset(), second.local_header_offset() + 35);
        Ok(())
    }

    #[test]
    fn test_reads_back_zip64() -> Result<()> {
        let reader = ArchiveReader::open(three_files(WriterOptions::new().zip64(true))?)?;
        assert!(reader.is_zip64());
        assert_eq!(reader.len(), 3);
        assert_eq!(reader.read_all("3.txt")?, vec![0xFF; 10]);
        // Local headers carry a 20-byte zip64 extra
        let first = reader.entry("1.txt")?;
        assert_eq!(first.data_offset(), 30 + 5 + 20);
        Ok(())
    }

    #[test]
    fn test_range_reads() -> Result<()> {
        let mut writer = ArchiveWriter::new(Vec::new());
        writer.add_entry("digits", b"0123456789")?;
        let reader = ArchiveReader::open(writer.finish()?)?;

        assert_eq!(reader.read_range("digits", 3, 4)?, b"3456");
        assert_eq!(reader.read_range("digits", 10, 0)?, b"");
        assert!(matches!(
            reader.read_range("digits", 8, 3),
            Err(ArchiveError::RangeOutOfBounds { .. })
        ));
        assert!(matches!(
            reader.read_range("digits", 11, 0),
            Err(ArchiveError::RangeOutOfBounds { .. })
        ));
        assert!(matches!(
            reader.read_range("missing", 0, 1),
            Err(ArchiveError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_entry_reader_streams() -> Result<()> {
        let payload: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        let mut writer = ArchiveWriter::new(Vec::new());
        writer.add_entry("data.bin", &payload)?;
        let reader = ArchiveReader::open(writer.finish()?)?;

        let mut stream = reader.entry_reader("data.bin")?;
        let mut first = [0u8; 100];
        stream.read_exact(&mut first)?;
        assert_eq!(stream.remaining(), 4900);
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest)?;
        assert_eq!([first.as_slice(), rest.as_slice()].concat(), payload);
        Ok(())
    }

    #[test]
    fn test_zero_length_entry() -> Result<()> {
        let mut writer = ArchiveWriter::new(Vec::new());
        writer.declare_entry("empty", 0)?;
        writer.add_entry("after", b"x")?;
        let reader = ArchiveReader::open(writer.finish()?)?;
        assert_eq!(reader.entry_size("empty")?, 0);
        assert_eq!(reader.read_all("empty")?, Vec::<u8>::new());
        assert_eq!(reader.entry("empty")?.crc32(), 0);
        assert_eq!(reader.read_all("after")?, b"x");
        Ok(())
    }

    #[test]
    fn test_truncated_archive_is_invalid_format() -> Result<()> {
        let bytes = three_files(WriterOptions::new())?;
        for cut in [1, 10, 22, 40, bytes.len() - 1] {
            let truncated = bytes[..bytes.len() - cut].to_vec();
            match ArchiveReader::open(truncated) {
                Err(ArchiveError::InvalidFormat(_)) => {}
                other => panic!("cut {}: expected InvalidFormat, got {:?}", cut, other.err()),
            }
        }
        Ok(())
    }

    #[test]
    fn test_corrupt_central_directory_signature() -> Result<()> {
        let mut bytes = three_files(WriterOptions::new())?;
        let cd_offset = 3 * (30 + 5 + 10 + 16);
        bytes[cd_offset] = 0;
        let err = ArchiveReader::open(bytes).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidFormat(_)));
        Ok(())
    }

    #[test]
    fn test_comment_is_tolerated() -> Result<()> {
        let mut bytes = three_files(WriterOptions::new())?;
        let comment = b"written elsewhere";
        let len_pos = bytes.len() - 2;
        bytes[len_pos..].copy_from_slice(&(comment.len() as u16).to_le_bytes());
        bytes.extend_from_slice(comment);

        let reader = ArchiveReader::open(bytes)?;
        assert_eq!(reader.len(), 3);
        assert_eq!(reader.read_all("1.txt")?, vec![0xFF; 10]);
        Ok(())
    }

    #[test]
    fn test_crc_mismatch_detected() -> Result<()> {
        let mut bytes = three_files(WriterOptions::new())?;
        // Flip a data byte of 1.txt
        bytes[35] = 0x00;
        let reader = ArchiveReader::open(bytes)?;
        assert!(reader.verify_crc("1.txt").is_err());
        reader.verify_crc("2.txt")?;
        Ok(())
    }
}
