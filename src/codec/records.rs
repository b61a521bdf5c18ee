//! ZIP record layouts (PKWARE APPNOTE 6.3.x, store subset)
//!
//! All integers are little-endian. Encoders append to a `Vec<u8>` so the
//! writer can hand each record to its sink in a single call; decoders take a
//! slice that holds at least the fixed part of the record.

use crate::error::{ArchiveError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4B50;
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4B50;
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4B50;
pub const EOCD_SIGNATURE: u32 = 0x0605_4B50;
pub const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4B50;
pub const ZIP64_EOCD_LOCATOR_SIGNATURE: u32 = 0x0706_4B50;

/// Header id of the Zip64 extended information extra field
pub const ZIP64_EXTRA_TAG: u16 = 0x0001;

/// Marks a 32-bit field whose real value lives in the Zip64 extra field
pub const SENTINEL_32: u32 = 0xFFFF_FFFF;
/// Marks a 16-bit entry count whose real value lives in the Zip64 EOCD
pub const SENTINEL_16: u16 = 0xFFFF;

/// Largest entry size that still fits the zip32 layout
pub const ZIP32_MAX_SIZE: u64 = 0xFFFF_FFFE;

/// Version made by / needed to extract (4.5 permits the zip64 extra)
pub const ZIP_VERSION: u16 = 45;
/// General purpose bit 3: CRC and sizes follow the data in a data descriptor
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
/// General purpose bit 0: entry is encrypted
pub const FLAG_ENCRYPTED: u16 = 0x0001;
/// Compression method 0
pub const METHOD_STORE: u16 = 0;

/// Zip64 extra field in a local header: tag, size, original and compressed size
pub const LOCAL_ZIP64_EXTRA_SIZE: usize = 20;
/// Zip64 extra field in a central header: adds the local header offset
pub const CENTRAL_ZIP64_EXTRA_SIZE: usize = 28;

fn cursor_at<'a>(
    data: &'a [u8],
    min_len: usize,
    signature: u32,
    record: &str,
) -> Result<Cursor<&'a [u8]>> {
    if data.len() < min_len {
        return Err(ArchiveError::invalid(format!(
            "truncated {}: {} of {} bytes",
            record,
            data.len(),
            min_len
        )));
    }
    let mut cursor = Cursor::new(data);
    let found = cursor.read_u32::<LittleEndian>()?;
    if found != signature {
        return Err(ArchiveError::invalid(format!(
            "bad {} signature {:#010x}, expected {:#010x}",
            record, found, signature
        )));
    }
    Ok(cursor)
}

/// Local file header, fixed 30-byte part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    pub const SIZE: usize = 30;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.compression_method.to_le_bytes());
        out.extend_from_slice(&self.last_mod_time.to_le_bytes());
        out.extend_from_slice(&self.last_mod_date.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&self.file_name_length.to_le_bytes());
        out.extend_from_slice(&self.extra_field_length.to_le_bytes());
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut c = cursor_at(data, Self::SIZE, LOCAL_FILE_HEADER_SIGNATURE, "local file header")?;
        Ok(Self {
            version_needed: c.read_u16::<LittleEndian>()?,
            flags: c.read_u16::<LittleEndian>()?,
            compression_method: c.read_u16::<LittleEndian>()?,
            last_mod_time: c.read_u16::<LittleEndian>()?,
            last_mod_date: c.read_u16::<LittleEndian>()?,
            crc32: c.read_u32::<LittleEndian>()?,
            compressed_size: c.read_u32::<LittleEndian>()?,
            uncompressed_size: c.read_u32::<LittleEndian>()?,
            file_name_length: c.read_u16::<LittleEndian>()?,
            extra_field_length: c.read_u16::<LittleEndian>()?,
        })
    }

    /// Bytes between the header's start and the entry data
    pub fn variable_length(&self) -> u64 {
        Self::SIZE as u64 + self.file_name_length as u64 + self.extra_field_length as u64
    }
}

/// Signatured data descriptor written after each entry's data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    pub const SIZE_32: usize = 16;
    pub const SIZE_64: usize = 24;

    /// Sizes are 8 bytes wide when the entry's local header carried a zip64 extra
    pub fn write_to(&self, out: &mut Vec<u8>, zip64: bool) {
        out.extend_from_slice(&DATA_DESCRIPTOR_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        if zip64 {
            out.extend_from_slice(&self.compressed_size.to_le_bytes());
            out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        } else {
            out.extend_from_slice(&(self.compressed_size as u32).to_le_bytes());
            out.extend_from_slice(&(self.uncompressed_size as u32).to_le_bytes());
        }
    }

    pub fn parse(data: &[u8], zip64: bool) -> Result<Self> {
        let size = if zip64 { Self::SIZE_64 } else { Self::SIZE_32 };
        let mut c = cursor_at(data, size, DATA_DESCRIPTOR_SIGNATURE, "data descriptor")?;
        let crc32 = c.read_u32::<LittleEndian>()?;
        let (compressed_size, uncompressed_size) = if zip64 {
            (c.read_u64::<LittleEndian>()?, c.read_u64::<LittleEndian>()?)
        } else {
            (
                c.read_u32::<LittleEndian>()? as u64,
                c.read_u32::<LittleEndian>()? as u64,
            )
        };
        Ok(Self {
            crc32,
            compressed_size,
            uncompressed_size,
        })
    }
}

/// Central directory file header, fixed 46-byte part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
    pub comment_length: u16,
    pub disk_number_start: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub local_header_offset: u32,
}

impl CentralDirectoryHeader {
    pub const SIZE: usize = 46;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.version_made_by.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.compression_method.to_le_bytes());
        out.extend_from_slice(&self.last_mod_time.to_le_bytes());
        out.extend_from_slice(&self.last_mod_date.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&self.file_name_length.to_le_bytes());
        out.extend_from_slice(&self.extra_field_length.to_le_bytes());
        out.extend_from_slice(&self.comment_length.to_le_bytes());
        out.extend_from_slice(&self.disk_number_start.to_le_bytes());
        out.extend_from_slice(&self.internal_attributes.to_le_bytes());
        out.extend_from_slice(&self.external_attributes.to_le_bytes());
        out.extend_from_slice(&self.local_header_offset.to_le_bytes());
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut c = cursor_at(
            data,
            Self::SIZE,
            CENTRAL_DIRECTORY_SIGNATURE,
            "central directory header",
        )?;
        Ok(Self {
            version_made_by: c.read_u16::<LittleEndian>()?,
            version_needed: c.read_u16::<LittleEndian>()?,
            flags: c.read_u16::<LittleEndian>()?,
            compression_method: c.read_u16::<LittleEndian>()?,
            last_mod_time: c.read_u16::<LittleEndian>()?,
            last_mod_date: c.read_u16::<LittleEndian>()?,
            crc32: c.read_u32::<LittleEndian>()?,
            compressed_size: c.read_u32::<LittleEndian>()?,
            uncompressed_size: c.read_u32::<LittleEndian>()?,
            file_name_length: c.read_u16::<LittleEndian>()?,
            extra_field_length: c.read_u16::<LittleEndian>()?,
            comment_length: c.read_u16::<LittleEndian>()?,
            disk_number_start: c.read_u16::<LittleEndian>()?,
            internal_attributes: c.read_u16::<LittleEndian>()?,
            external_attributes: c.read_u32::<LittleEndian>()?,
            local_header_offset: c.read_u32::<LittleEndian>()?,
        })
    }

    /// Length of the header including name, extra field and comment
    pub fn total_length(&self) -> usize {
        Self::SIZE
            + self.file_name_length as usize
            + self.extra_field_length as usize
            + self.comment_length as usize
    }
}

/// Zip64 extended information extra field (tag 0x0001)
///
/// Only the values present are encoded, always in the order original size,
/// compressed size, local header offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64ExtraField {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub local_header_offset: Option<u64>,
}

impl Zip64ExtraField {
    /// Form used in local file headers: both sizes, no offset
    pub fn local(size: u64) -> Self {
        Self {
            uncompressed_size: Some(size),
            compressed_size: Some(size),
            local_header_offset: None,
        }
    }

    /// Form used in central directory headers: both sizes and the offset
    pub fn central(size: u64, local_header_offset: u64) -> Self {
        Self {
            uncompressed_size: Some(size),
            compressed_size: Some(size),
            local_header_offset: Some(local_header_offset),
        }
    }

    fn values(&self) -> impl Iterator<Item = u64> {
        [
            self.uncompressed_size,
            self.compressed_size,
            self.local_header_offset,
        ]
        .into_iter()
        .flatten()
    }

    pub fn body_size(&self) -> u16 {
        (self.values().count() * 8) as u16
    }

    /// Encoded length including the 4-byte tag/size prefix
    pub fn encoded_len(&self) -> usize {
        4 + self.body_size() as usize
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&ZIP64_EXTRA_TAG.to_le_bytes());
        out.extend_from_slice(&self.body_size().to_le_bytes());
        for value in self.values() {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }

    /// Locates the zip64 field in an extra area and reads the requested values
    ///
    /// The area is walked as tag/size/body triples. Each `needs_*` flag says
    /// whether the header held the sentinel for that field; only those values
    /// are present in the body, in fixed order. Returns `None` if the area
    /// has no zip64 field.
    pub fn find(
        extra: &[u8],
        needs_uncompressed: bool,
        needs_compressed: bool,
        needs_offset: bool,
    ) -> Result<Option<Self>> {
        let mut pos = 0usize;
        while pos < extra.len() {
            if extra.len() - pos < 4 {
                return Err(ArchiveError::invalid("truncated extra field header"));
            }
            let tag = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
            let size = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
            let body_start = pos + 4;
            let body_end = body_start + size;
            if body_end > extra.len() {
                return Err(ArchiveError::invalid(format!(
                    "extra field {:#06x} overruns extra area",
                    tag
                )));
            }

            if tag == ZIP64_EXTRA_TAG {
                let mut body = Cursor::new(&extra[body_start..body_end]);
                let mut next = |wanted: bool, what: &str| -> Result<Option<u64>> {
                    if !wanted {
                        return Ok(None);
                    }
                    body.read_u64::<LittleEndian>().map(Some).map_err(|_| {
                        ArchiveError::invalid(format!("zip64 extra field is missing the {}", what))
                    })
                };
                let uncompressed_size = next(needs_uncompressed, "uncompressed size")?;
                let compressed_size = next(needs_compressed, "compressed size")?;
                let local_header_offset = next(needs_offset, "local header offset")?;
                return Ok(Some(Self {
                    uncompressed_size,
                    compressed_size,
                    local_header_offset,
                }));
            }

            pos = body_end;
        }
        Ok(None)
    }
}

/// Zip64 end of central directory record (fixed 56 bytes, no extensible data)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectory {
    pub record_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_disk: u64,
    pub total_entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub const SIZE: usize = 56;

    pub fn new(entries: u64, central_directory_size: u64, central_directory_offset: u64) -> Self {
        Self {
            // Excludes the signature and this field itself
            record_size: (Self::SIZE - 12) as u64,
            version_made_by: ZIP_VERSION,
            version_needed: ZIP_VERSION,
            disk_number: 0,
            disk_with_central_directory: 0,
            entries_on_disk: entries,
            total_entries: entries,
            central_directory_size,
            central_directory_offset,
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&ZIP64_EOCD_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.record_size.to_le_bytes());
        out.extend_from_slice(&self.version_made_by.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.disk_with_central_directory.to_le_bytes());
        out.extend_from_slice(&self.entries_on_disk.to_le_bytes());
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.central_directory_size.to_le_bytes());
        out.extend_from_slice(&self.central_directory_offset.to_le_bytes());
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut c = cursor_at(
            data,
            Self::SIZE,
            ZIP64_EOCD_SIGNATURE,
            "zip64 end of central directory",
        )?;
        Ok(Self {
            record_size: c.read_u64::<LittleEndian>()?,
            version_made_by: c.read_u16::<LittleEndian>()?,
            version_needed: c.read_u16::<LittleEndian>()?,
            disk_number: c.read_u32::<LittleEndian>()?,
            disk_with_central_directory: c.read_u32::<LittleEndian>()?,
            entries_on_disk: c.read_u64::<LittleEndian>()?,
            total_entries: c.read_u64::<LittleEndian>()?,
            central_directory_size: c.read_u64::<LittleEndian>()?,
            central_directory_offset: c.read_u64::<LittleEndian>()?,
        })
    }
}

/// Zip64 end of central directory locator (20 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub disk_with_zip64_eocd: u32,
    pub zip64_eocd_offset: u64,
    pub total_disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub const SIZE: usize = 20;

    pub fn new(zip64_eocd_offset: u64) -> Self {
        Self {
            disk_with_zip64_eocd: 0,
            zip64_eocd_offset,
            total_disks: 1,
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&ZIP64_EOCD_LOCATOR_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.disk_with_zip64_eocd.to_le_bytes());
        out.extend_from_slice(&self.zip64_eocd_offset.to_le_bytes());
        out.extend_from_slice(&self.total_disks.to_le_bytes());
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut c = cursor_at(
            data,
            Self::SIZE,
            ZIP64_EOCD_LOCATOR_SIGNATURE,
            "zip64 end of central directory locator",
        )?;
        Ok(Self {
            disk_with_zip64_eocd: c.read_u32::<LittleEndian>()?,
            zip64_eocd_offset: c.read_u64::<LittleEndian>()?,
            total_disks: c.read_u32::<LittleEndian>()?,
        })
    }
}

/// Classical end of central directory record (22 bytes plus comment)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_disk: u16,
    pub total_entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub comment_length: u16,
}

impl EndOfCentralDirectory {
    pub const SIZE: usize = 22;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&EOCD_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.disk_with_central_directory.to_le_bytes());
        out.extend_from_slice(&self.entries_on_disk.to_le_bytes());
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.central_directory_size.to_le_bytes());
        out.extend_from_slice(&self.central_directory_offset.to_le_bytes());
        out.extend_from_slice(&self.comment_length.to_le_bytes());
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut c = cursor_at(data, Self::SIZE, EOCD_SIGNATURE, "end of central directory")?;
        Ok(Self {
            disk_number: c.read_u16::<LittleEndian>()?,
            disk_with_central_directory: c.read_u16::<LittleEndian>()?,
            entries_on_disk: c.read_u16::<LittleEndian>()?,
            total_entries: c.read_u16::<LittleEndian>()?,
            central_directory_size: c.read_u32::<LittleEndian>()?,
            central_directory_offset: c.read_u32::<LittleEndian>()?,
            comment_length: c.read_u16::<LittleEndian>()?,
        })
    }

    /// True if any field defers to the Zip64 end of central directory
    pub fn is_zip64(&self) -> bool {
        self.entries_on_disk == SENTINEL_16
            || self.total_entries == SENTINEL_16
            || self.central_directory_size == SENTINEL_32
            || self.central_directory_offset == SENTINEL_32
    }
}
