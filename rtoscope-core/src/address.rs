//! Target address type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A location in the target's address space.
///
/// The only operations the traversal code relies on are equality, nullness
/// and adding a fixed member offset. Anything else is pointer arithmetic the
/// target owns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(u64);

impl Address {
    /// The null address, used as list terminator by every supported kernel.
    pub const NULL: Self = Self(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address of a member located `offset` bytes into a structure.
    pub const fn offset(self, offset: u64) -> Self {
        Self(self.0.wrapping_add(offset))
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<u32> for Address {
    fn from(value: u32) -> Self {
        Self(u64::from(value))
    }
}

impl From<Address> for u64 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_and_offset() {
        assert!(Address::NULL.is_null());
        assert!(!Address::new(0x2000).is_null());
        assert_eq!(Address::new(0x2000).offset(0x10), Address::new(0x2010));
    }

    #[test]
    fn test_display() {
        assert_eq!(Address::new(0x500).to_string(), "0x00000500");
        assert_eq!(format!("{:x}", Address::new(0xbeef)), "beef");
    }
}
