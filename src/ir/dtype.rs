//! Element types and their wire encoding.
//!
//! The name and wire tables are immutable `const fn` lookups; there is no
//! process-wide registry to initialise.

use crate::core::error::LowerError;
use std::fmt;
use std::str::FromStr;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Float64,
    Float32,
    Float16,
    BFloat16,
    UInt64,
    UInt32,
    UInt16,
    UInt8,
    Int64,
    Int32,
    Int16,
    Int8,
    Int4,
    Int2,
    Binary,
}

/// Static description of one element type.
#[derive(Debug, Clone, Copy)]
pub struct DTypeInfo {
    pub name: &'static str,
    pub wire: u8,
    pub bits: u32,
    pub signed: bool,
}

impl DType {
    pub const ALL: [DType; 15] = [
        DType::Float64,
        DType::Float32,
        DType::Float16,
        DType::BFloat16,
        DType::UInt64,
        DType::UInt32,
        DType::UInt16,
        DType::UInt8,
        DType::Int64,
        DType::Int32,
        DType::Int16,
        DType::Int8,
        DType::Int4,
        DType::Int2,
        DType::Binary,
    ];

    pub const fn info(self) -> DTypeInfo {
        use DType::*;
        match self {
            Float64 => DTypeInfo { name: "Float64", wire: 1, bits: 64, signed: true },
            Float32 => DTypeInfo { name: "Float32", wire: 2, bits: 32, signed: true },
            Float16 => DTypeInfo { name: "Float16", wire: 3, bits: 16, signed: true },
            BFloat16 => DTypeInfo { name: "BFloat16", wire: 19, bits: 16, signed: true },
            UInt64 => DTypeInfo { name: "UInt64", wire: 5, bits: 64, signed: false },
            UInt32 => DTypeInfo { name: "UInt32", wire: 6, bits: 32, signed: false },
            UInt16 => DTypeInfo { name: "UInt16", wire: 7, bits: 16, signed: false },
            UInt8 => DTypeInfo { name: "UInt8", wire: 8, bits: 8, signed: false },
            Int64 => DTypeInfo { name: "Int64", wire: 9, bits: 64, signed: true },
            Int32 => DTypeInfo { name: "Int32", wire: 10, bits: 32, signed: true },
            Int16 => DTypeInfo { name: "Int16", wire: 11, bits: 16, signed: true },
            Int8 => DTypeInfo { name: "Int8", wire: 12, bits: 8, signed: true },
            Int4 => DTypeInfo { name: "Int4", wire: 13, bits: 4, signed: true },
            Int2 => DTypeInfo { name: "Int2", wire: 14, bits: 2, signed: true },
            Binary => DTypeInfo { name: "Binary", wire: 16, bits: 1, signed: false },
        }
    }

    pub const fn bits(self) -> u32 {
        self.info().bits
    }

    /// Bytes one element occupies in a stride, rounded up for sub-byte types.
    pub const fn size_bytes(self) -> u64 {
        (self.info().bits as u64 + 7) / 8
    }

    pub const fn is_signed(self) -> bool {
        self.info().signed
    }

    /// UInt8/Int8, the only types the entropy coder and hardware decompressor accept.
    pub const fn is_byte_integer(self) -> bool {
        matches!(self, DType::UInt8 | DType::Int8)
    }

    pub const fn wire(self) -> u8 {
        self.info().wire
    }

    pub fn from_wire(tag: u8) -> Option<DType> {
        DType::ALL.iter().copied().find(|d| d.wire() == tag)
    }

    /// Size in bytes of `elements` elements packed without padding.
    pub fn payload_bytes(self, elements: usize) -> u64 {
        (elements as u64 * self.bits() as u64 + 7) / 8
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.info().name)
    }
}

impl FromStr for DType {
    type Err = LowerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DType::ALL
            .iter()
            .copied()
            .find(|d| d.info().name == s)
            .ok_or_else(|| LowerError::unknown_name("element type", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tags_are_unique() {
        for a in DType::ALL {
            assert_eq!(DType::from_wire(a.wire()), Some(a));
        }
        assert_eq!(DType::from_wire(0), None);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(DType::UInt8.size_bytes(), 1);
        assert_eq!(DType::Float16.size_bytes(), 2);
        assert_eq!(DType::Int4.size_bytes(), 1);
        assert_eq!(DType::Int4.payload_bytes(5), 3);
        assert!(DType::Int8.is_byte_integer());
        assert!(!DType::Float16.is_byte_integer());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("Float16".parse::<DType>().ok(), Some(DType::Float16));
        assert!("Float8".parse::<DType>().is_err());
    }
}
