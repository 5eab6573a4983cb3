//! Raw target memory readers.
//!
//! Everything above this layer only needs "read these bytes at this
//! address". Two readers ship with the crate: [`MemoryImage`], a sparse
//! snapshot that can be saved as JSON, and (with the `hardware` feature)
//! [`ProbeMemory`], which reads a live target through probe-rs.

use crate::error::AccessError;
use crate::Address;
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Source of raw target bytes.
pub trait ReadMemory {
    /// Fill `buf` with the bytes at `address`. Partial reads are errors.
    fn read(&mut self, address: Address, buf: &mut [u8]) -> Result<(), AccessError>;
}

impl<T: ReadMemory + ?Sized> ReadMemory for &mut T {
    fn read(&mut self, address: Address, buf: &mut [u8]) -> Result<(), AccessError> {
        (**self).read(address, buf)
    }
}

impl<T: ReadMemory + ?Sized> ReadMemory for Box<T> {
    fn read(&mut self, address: Address, buf: &mut [u8]) -> Result<(), AccessError> {
        (**self).read(address, buf)
    }
}

/// Sparse little-endian memory snapshot.
///
/// Unmapped bytes are unreadable, which is how tests simulate a symbol that
/// exists but cannot be read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RegionRecord>", into = "Vec<RegionRecord>")]
pub struct MemoryImage {
    regions: BTreeMap<u64, Vec<u8>>,
}

/// JSON form of one contiguous region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionRecord {
    pub base: Address,
    /// Hex-encoded bytes.
    pub data: String,
}

impl TryFrom<Vec<RegionRecord>> for MemoryImage {
    type Error = String;

    fn try_from(records: Vec<RegionRecord>) -> Result<Self, Self::Error> {
        let mut image = Self::new();
        for record in records {
            let data = hex::decode(record.data.trim())
                .map_err(|e| format!("region at {}: {e}", record.base))?;
            image.write(record.base, &data);
        }
        Ok(image)
    }
}

impl From<MemoryImage> for Vec<RegionRecord> {
    fn from(image: MemoryImage) -> Self {
        image
            .regions
            .into_iter()
            .map(|(base, data)| RegionRecord { base: Address::new(base), data: hex::encode(data) })
            .collect()
    }
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of disjoint mapped regions.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Map `data` at `address`, merging with any region it overlaps or touches.
    pub fn write(&mut self, address: Address, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let start = address.value();
        let end = start + data.len() as u64;

        let touching: Vec<u64> = self
            .regions
            .range(..=end)
            .filter(|(base, bytes)| **base + bytes.len() as u64 >= start)
            .map(|(base, _)| *base)
            .collect();

        let mut merged_start = start;
        let mut merged_end = end;
        for base in &touching {
            if let Some(bytes) = self.regions.get(base) {
                merged_start = merged_start.min(*base);
                merged_end = merged_end.max(base + bytes.len() as u64);
            }
        }

        let mut merged = vec![0u8; (merged_end - merged_start) as usize];
        for base in touching {
            if let Some(bytes) = self.regions.remove(&base) {
                let at = (base - merged_start) as usize;
                merged[at..at + bytes.len()].copy_from_slice(&bytes);
            }
        }
        let at = (start - merged_start) as usize;
        merged[at..at + data.len()].copy_from_slice(data);
        self.regions.insert(merged_start, merged);
    }

    pub fn write_u8(&mut self, address: Address, value: u8) {
        self.write(address, &[value]);
    }

    pub fn write_u16(&mut self, address: Address, value: u16) {
        self.write(address, &value.to_le_bytes());
    }

    pub fn write_u32(&mut self, address: Address, value: u32) {
        self.write(address, &value.to_le_bytes());
    }

    /// Write a NUL-padded string into a fixed `len`-byte buffer.
    pub fn write_str(&mut self, address: Address, text: &str, len: usize) {
        let mut buf = vec![0u8; len];
        let n = text.len().min(len.saturating_sub(1));
        buf[..n].copy_from_slice(&text.as_bytes()[..n]);
        self.write(address, &buf);
    }

    /// Map `len` zero bytes at `address` (a blank structure to fill in).
    pub fn zero(&mut self, address: Address, len: usize) {
        self.write(address, &vec![0u8; len]);
    }
}

impl ReadMemory for MemoryImage {
    fn read(&mut self, address: Address, buf: &mut [u8]) -> Result<(), AccessError> {
        let start = address.value();
        let len = buf.len();
        let unreadable = || AccessError::Unreadable { address, len };
        let (base, bytes) = self.regions.range(..=start).next_back().ok_or_else(unreadable)?;
        let at = (start - base) as usize;
        let end = at.checked_add(buf.len()).ok_or_else(unreadable)?;
        let src = bytes.get(at..end).ok_or_else(unreadable)?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

/// A symbol map plus memory image, saved together as one JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub symbols: BTreeMap<String, Address>,
    #[serde(default)]
    pub memory: MemoryImage,
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        let snapshot: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;
        log::info!(
            "Loaded snapshot {} ({} symbols, {} regions)",
            path.display(),
            snapshot.symbols.len(),
            snapshot.memory.region_count()
        );
        Ok(snapshot)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("Failed to encode snapshot")?;
        std::fs::write(path, text).with_context(|| format!("Failed to write snapshot {}", path.display()))
    }
}

#[cfg(feature = "hardware")]
pub use probe::ProbeMemory;

#[cfg(feature = "hardware")]
mod probe {
    use super::ReadMemory;
    use crate::error::AccessError;
    use crate::Address;
    use anyhow::{Context as _, Result};
    use probe_rs::probe::list::Lister;
    use probe_rs::{MemoryInterface, Permissions, Session};

    /// Reads a live target through a probe-rs session.
    ///
    /// Only reads are ever issued. Each read borrows the core afresh, so a
    /// lost connection shows up as an error on the next read.
    pub struct ProbeMemory {
        session: Session,
        core_index: usize,
    }

    impl ProbeMemory {
        pub fn new(session: Session, core_index: usize) -> Self {
            Self { session, core_index }
        }

        /// Open probe `probe_index` and attach to `chip` without halting it.
        pub fn attach(chip: &str, probe_index: usize) -> Result<Self> {
            let lister = Lister::new();
            let probes = lister.list_all();
            let info = probes.get(probe_index).context("Probe index out of range")?;
            let probe = info.open().context("Failed to open probe")?;
            let session = probe
                .attach(chip, Permissions::default())
                .with_context(|| format!("Failed to attach to {chip}"))?;
            log::info!("Attached to {chip} through probe {probe_index}");
            Ok(Self::new(session, 0))
        }
    }

    impl ReadMemory for ProbeMemory {
        fn read(&mut self, address: Address, buf: &mut [u8]) -> Result<(), AccessError> {
            let mut core = self
                .session
                .core(self.core_index)
                .map_err(|e| AccessError::SessionUnavailable(e.to_string()))?;
            core.read_8(address.value(), buf)
                .map_err(|e| AccessError::ReadFailed { address, reason: e.to_string() })
        }
    }
}
