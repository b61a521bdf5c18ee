use crate::codec::reader::{ArchiveReader, EntryReader};
use crate::codec::records::ZIP32_MAX_SIZE;
use crate::codec::writer::{ArchiveWriter, WriterOptions};
use crate::error::{ArchiveError, Result};
use crate::io::{FileSource, InputSource, OutputSink, WriteSink};
use crate::manifest::TdfManifest;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

/// Name of the ciphertext entry
pub const PAYLOAD_ENTRY: &str = "0.payload";
/// Name of the JSON manifest entry
pub const MANIFEST_ENTRY: &str = "0.manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AwaitingPayloadSize,
    Payload,
    AwaitingManifest,
    Complete,
}

/// Writes a TDF3 archive: `0.payload` first, then `0.manifest.json`
///
/// # Example
///
/// ```
/// use tdf3_archive::{TdfArchive, TdfArchiveBuilder};
///
/// # fn example() -> Result<(), tdf3_archive::ArchiveError> {
/// let mut builder = TdfArchiveBuilder::in_memory();
/// builder.set_payload_size(11)?;
/// builder.append_payload_chunk(b"hello ")?;
/// builder.append_payload_chunk(b"world")?;
/// builder.append_manifest(br#"{"payload":{}}"#)?;
/// let bytes = builder.finish()?;
///
/// let archive = TdfArchive::new(bytes)?;
/// assert_eq!(archive.read_payload()?, b"hello world");
/// # Ok(())
/// # }
/// ```
pub struct TdfArchiveBuilder<S: OutputSink> {
    writer: ArchiveWriter<S>,
    stage: Stage,
}

impl TdfArchiveBuilder<Vec<u8>> {
    /// Builds the archive in memory; [`finish`](Self::finish) returns the bytes
    pub fn in_memory() -> Self {
        Self::new(Vec::new())
    }
}

impl TdfArchiveBuilder<WriteSink<BufWriter<File>>> {
    /// Creates (or truncates) a TDF file at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(WriteSink::new(BufWriter::new(file))))
    }
}

impl<S: OutputSink> TdfArchiveBuilder<S> {
    pub fn new(sink: S) -> Self {
        Self::with_options(sink, WriterOptions::default())
    }

    pub fn with_options(sink: S, options: WriterOptions) -> Self {
        Self {
            writer: ArchiveWriter::with_options(sink, options),
            stage: Stage::AwaitingPayloadSize,
        }
    }

    /// Declares the total payload length; must precede any payload chunk
    ///
    /// Payloads of 0xFFFFFFFF bytes or more switch the archive to zip64.
    pub fn set_payload_size(&mut self, size: u64) -> Result<()> {
        if self.stage != Stage::AwaitingPayloadSize {
            return Err(ArchiveError::state("payload size was already set"));
        }
        if size > ZIP32_MAX_SIZE {
            self.writer.enable_zip64();
        }
        self.writer.declare_entry(PAYLOAD_ENTRY, size)?;
        self.stage = if self.writer.in_flight().is_some() {
            Stage::Payload
        } else {
            Stage::AwaitingManifest
        };
        debug!(size, zip64 = self.writer.is_zip64(), "declared TDF payload");
        Ok(())
    }

    pub fn append_payload_chunk(&mut self, bytes: &[u8]) -> Result<()> {
        match self.stage {
            Stage::Payload => {}
            Stage::AwaitingManifest if bytes.is_empty() => return Ok(()),
            Stage::AwaitingPayloadSize => {
                return Err(ArchiveError::state(
                    "payload size must be set before appending payload",
                ))
            }
            _ => return Err(ArchiveError::state("payload is already complete")),
        }
        self.writer.append_chunk(PAYLOAD_ENTRY, bytes)?;
        if self.writer.in_flight().is_none() {
            self.stage = Stage::AwaitingManifest;
        }
        Ok(())
    }

    /// Writes the manifest blob; the payload must be complete
    pub fn append_manifest(&mut self, manifest: &[u8]) -> Result<()> {
        match self.stage {
            Stage::AwaitingManifest => {}
            Stage::Complete => return Err(ArchiveError::state("manifest was already written")),
            _ => {
                return Err(ArchiveError::state(
                    "manifest must follow the complete payload",
                ))
            }
        }
        self.writer.add_entry(MANIFEST_ENTRY, manifest)?;
        self.stage = Stage::Complete;
        Ok(())
    }

    /// Serializes `manifest` to JSON and writes it
    pub fn write_manifest(&mut self, manifest: &TdfManifest) -> Result<()> {
        let json = manifest.to_json()?;
        self.append_manifest(json.as_bytes())
    }

    pub fn is_zip64(&self) -> bool {
        self.writer.is_zip64()
    }

    /// Writes the central directory and returns the sink
    pub fn finish(self) -> Result<S> {
        if self.stage != Stage::Complete {
            return Err(ArchiveError::state(
                "a TDF archive needs both payload and manifest before finishing",
            ));
        }
        self.writer.finish()
    }
}

/// Reads a TDF3 archive produced by [`TdfArchiveBuilder`] or any other
/// conforming TDF3 writer
#[derive(Debug)]
pub struct TdfArchive<R: InputSource> {
    reader: ArchiveReader<R>,
}

impl TdfArchive<FileSource> {
    /// Opens a TDF archive from a file path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(FileSource::open(path)?)
    }
}

impl<R: InputSource> TdfArchive<R> {
    /// Parses `source` and checks that both TDF entries are present
    pub fn new(source: R) -> Result<Self> {
        let reader = ArchiveReader::open(source)?;
        for name in [PAYLOAD_ENTRY, MANIFEST_ENTRY] {
            if !reader.contains(name) {
                return Err(ArchiveError::invalid(format!(
                    "not a TDF3 archive: missing {}",
                    name
                )));
            }
        }
        Ok(Self { reader })
    }

    pub fn payload_size(&self) -> Result<u64> {
        self.reader.entry_size(PAYLOAD_ENTRY)
    }

    pub fn read_payload_range(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.reader.read_range(PAYLOAD_ENTRY, offset, len)
    }

    pub fn read_payload(&self) -> Result<Vec<u8>> {
        self.reader.read_all(PAYLOAD_ENTRY)
    }

    pub fn payload_reader(&self) -> Result<EntryReader<'_, R>> {
        self.reader.entry_reader(PAYLOAD_ENTRY)
    }

    /// The manifest exactly as stored
    pub fn manifest_json(&self) -> Result<String> {
        let bytes = self.reader.read_all(MANIFEST_ENTRY)?;
        String::from_utf8(bytes)
            .map_err(|e| ArchiveError::invalid(format!("manifest is not UTF-8: {}", e)))
    }

    pub fn manifest(&self) -> Result<TdfManifest> {
        Ok(TdfManifest::from_json(&self.manifest_json()?)?)
    }

    /// Validates the structure of the TDF archive
    ///
    /// Both entries must match their CRCs, the manifest must be a JSON
    /// object, and a segment table that records every encrypted size must
    /// add up to the payload length.
    pub fn validate(&self) -> Result<()> {
        self.reader.verify_crc(PAYLOAD_ENTRY)?;
        self.reader.verify_crc(MANIFEST_ENTRY)?;

        let value: serde_json::Value = serde_json::from_str(&self.manifest_json()?)?;
        if !value.is_object() {
            return Err(ArchiveError::invalid("manifest is not a JSON object"));
        }

        if let Ok(manifest) = serde_json::from_value::<TdfManifest>(value) {
            let expected = manifest
                .encryption_information
                .integrity_information
                .encrypted_payload_size()
                .map_err(|e| ArchiveError::invalid(e.to_string()))?;
            let actual = self.payload_size()?;
            if let Some(expected) = expected.filter(|e| *e != actual) {
                return Err(ArchiveError::invalid(format!(
                    "manifest segments total {} bytes but payload is {}",
                    expected, actual
                )));
            }
        }
        Ok(())
    }

    /// The underlying ZIP reader
    pub fn reader(&self) -> &ArchiveReader<R> {
        &self.reader
    }
}
