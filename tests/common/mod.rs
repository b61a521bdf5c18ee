//! Common test utilities for archive integration tests
//!
//! Large-archive tests stream hundreds of MiB of zeros. [`SparseBuffer`]
//! stores runs of zero bytes as lengths so those archives can be written and
//! read back without holding the payload in memory.

#![allow(dead_code)]

use tdf3_archive::{ArchiveError, InputSource, OutputSink, Result};

pub const MIB: u64 = 1024 * 1024;

/// Routes `tracing` output to the test harness; set `RUST_LOG=debug` to see it
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Buffer of `len` bytes all equal to `byte`
pub fn filled(byte: u8, len: usize) -> Vec<u8> {
    vec![byte; len]
}

#[derive(Debug)]
enum Run {
    Data(Vec<u8>),
    Zeros(u64),
}

impl Run {
    fn len(&self) -> u64 {
        match self {
            Run::Data(bytes) => bytes.len() as u64,
            Run::Zeros(n) => *n,
        }
    }
}

/// In-memory sink and source that keeps zero runs as counts
#[derive(Debug, Default)]
pub struct SparseBuffer {
    // (start offset, run), sorted by start
    runs: Vec<(u64, Run)>,
    len: u64,
}

impl SparseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes actually held in memory
    pub fn resident_bytes(&self) -> usize {
        self.runs
            .iter()
            .map(|(_, run)| match run {
                Run::Data(bytes) => bytes.len(),
                Run::Zeros(_) => 0,
            })
            .sum()
    }

    /// Every non-zero run concatenated, for signature searches
    pub fn resident_data(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (_, run) in &self.runs {
            if let Run::Data(bytes) = run {
                out.extend_from_slice(bytes);
            }
        }
        out
    }

    fn push(&mut self, bytes: &[u8]) {
        let zero = bytes.iter().all(|b| *b == 0);
        match (self.runs.last_mut(), zero) {
            (Some((_, Run::Zeros(n))), true) => *n += bytes.len() as u64,
            (Some((_, Run::Data(data))), false) => data.extend_from_slice(bytes),
            (_, true) => self.runs.push((self.len, Run::Zeros(bytes.len() as u64))),
            (_, false) => self.runs.push((self.len, Run::Data(bytes.to_vec()))),
        }
        self.len += bytes.len() as u64;
    }
}

impl OutputSink for SparseBuffer {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !bytes.is_empty() {
            self.push(bytes);
        }
        Ok(())
    }
}

impl InputSource for SparseBuffer {
    fn size(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = offset
            .checked_add(buf.len() as u64)
            .filter(|end| *end <= self.len)
            .ok_or(ArchiveError::ShortRead {
                offset,
                len: buf.len() as u64,
                size: self.len,
            })?;

        let mut index = match self.runs.binary_search_by_key(&offset, |(start, _)| *start) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let mut pos = offset;
        while pos < end {
            let (start, run) = &self.runs[index];
            let from = pos - start;
            let take = (run.len() - from).min(end - pos);
            let dst = &mut buf[(pos - offset) as usize..(pos - offset + take) as usize];
            match run {
                Run::Data(bytes) => {
                    dst.copy_from_slice(&bytes[from as usize..(from + take) as usize])
                }
                Run::Zeros(_) => dst.fill(0),
            }
            pos += take;
            index += 1;
        }
        Ok(())
    }
}
