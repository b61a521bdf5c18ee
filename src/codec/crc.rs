//! CRC-32 (IEEE 802.3, reflected polynomial 0xEDB88320) as used by ZIP

/// Incremental CRC-32 accumulator
///
/// Tracks the number of bytes fed so that two accumulators over adjacent
/// byte ranges can be combined without re-reading the data.
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
    len: u64,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resumes from a known CRC over `len` bytes
    pub fn from_parts(crc: u32, len: u64) -> Self {
        Self {
            hasher: crc32fast::Hasher::new_with_initial_len(crc, len),
            len,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
        self.len += bytes.len() as u64;
    }

    /// Number of bytes fed so far
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current checksum; the accumulator keeps going
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Appends the range covered by `other` after the range covered by `self`
    pub fn combine(&mut self, other: &Crc32) {
        self.hasher.combine(&other.hasher);
        self.len += other.len;
    }
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc32")
            .field("value", &format_args!("{:#010x}", self.value()))
            .field("len", &self.len())
            .finish()
    }
}

/// CRC-32 of a complete buffer
pub fn checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// CRC of `A || B` given `crc(A)`, `crc(B)` and `len(B)`
pub fn combine(crc_a: u32, crc_b: u32, len_b: u64) -> u32 {
    let mut a = Crc32::from_parts(crc_a, 0);
    a.combine(&Crc32::from_parts(crc_b, len_b));
    a.value()
}
