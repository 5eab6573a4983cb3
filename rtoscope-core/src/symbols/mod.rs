//! Symbol tables.
//!
//! Kernel detection only needs to know whether a global exists and where it
//! lives. Symbols come from the ELF symbol table of the firmware image, or
//! from the symbol map saved alongside a memory snapshot.

use crate::Address;
use anyhow::{Context as _, Result};
use object::{Object, ObjectSymbol};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Name to address map for the firmware running on the target.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, Address>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load symbols from an ELF file.
    pub fn from_elf(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let table = Self::from_elf_data(&data)
            .with_context(|| format!("Failed to parse ELF {}", path.display()))?;
        log::info!("Loaded {} symbols from {}", table.len(), path.display());
        Ok(table)
    }

    /// Load symbols from an in-memory ELF image.
    pub fn from_elf_data(data: &[u8]) -> Result<Self> {
        let obj = object::File::parse(data).context("Not an object file")?;
        let mut table = Self::new();
        for symbol in obj.symbols() {
            if symbol.is_undefined() {
                continue;
            }
            let Ok(name) = symbol.name() else { continue };
            if name.is_empty() {
                continue;
            }
            table.symbols.insert(name.to_string(), Address::new(symbol.address()));
        }
        Ok(table)
    }

    pub fn insert(&mut self, name: &str, address: Address) {
        self.symbols.insert(name.to_string(), address);
    }

    /// Lookup a symbol address by name.
    pub fn lookup_symbol(&self, name: &str) -> Option<Address> {
        self.symbols.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Fold `other` into this table; `other` wins on conflicts.
    pub fn extend(&mut self, other: Self) {
        self.symbols.extend(other.symbols);
    }
}

impl From<&BTreeMap<String, Address>> for SymbolTable {
    fn from(map: &BTreeMap<String, Address>) -> Self {
        let mut table = Self::new();
        for (name, address) in map {
            table.insert(name, *address);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_table_initial_state() {
        let table = SymbolTable::new();
        assert!(table.is_empty());
        assert!(table.lookup_symbol("main").is_none());
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut table = SymbolTable::new();
        table.insert("pxCurrentTCB", Address::new(0x2000_0010));
        assert!(table.contains("pxCurrentTCB"));
        assert_eq!(table.lookup_symbol("pxCurrentTCB"), Some(Address::new(0x2000_0010)));
    }

    #[test]
    fn test_from_snapshot_map() {
        let mut map = BTreeMap::new();
        map.insert("OSRunning".to_string(), Address::new(0x100));
        let mut table = SymbolTable::from(&map);
        let mut other = SymbolTable::new();
        other.insert("OSRunning", Address::new(0x200));
        table.extend(other);
        assert_eq!(table.lookup_symbol("OSRunning"), Some(Address::new(0x200)));
    }

    #[test]
    fn test_garbage_is_not_elf() {
        assert!(SymbolTable::from_elf_data(b"definitely not an elf").is_err());
    }
}
