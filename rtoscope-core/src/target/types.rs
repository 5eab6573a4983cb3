//! Typed description of target structures.
//!
//! Kernel integrations describe the structures they read (member names,
//! offsets and types) and the type of every global they evaluate. The
//! registry is what lets [`LayoutTarget`](super::LayoutTarget) decompose a
//! raw address into named members.

use crate::error::AccessError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A C-like type as seen by the target.
///
/// Written in JSON as a string: `u32`, `char[16]`, `TCB_t*`, `List_t[5]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeRef {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    Char,
    Void,
    Pointer(Box<TypeRef>),
    Array(Box<TypeRef>, usize),
    Struct(String),
}

impl TypeRef {
    pub fn pointer_to(target: Self) -> Self {
        Self::Pointer(Box::new(target))
    }

    pub fn array_of(element: Self, len: usize) -> Self {
        Self::Array(Box::new(element), len)
    }

    pub fn named(name: &str) -> Self {
        Self::Struct(name.to_string())
    }

    pub const fn is_pointer(&self) -> bool {
        matches!(self, Self::Pointer(_))
    }

    /// Width and signedness of integer types.
    pub const fn integer(&self) -> Option<(usize, bool)> {
        match self {
            Self::U8 | Self::Char => Some((1, false)),
            Self::U16 => Some((2, false)),
            Self::U32 => Some((4, false)),
            Self::U64 => Some((8, false)),
            Self::I8 => Some((1, true)),
            Self::I16 => Some((2, true)),
            Self::I32 => Some((4, true)),
            Self::I64 => Some((8, true)),
            _ => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8 => f.write_str("u8"),
            Self::U16 => f.write_str("u16"),
            Self::U32 => f.write_str("u32"),
            Self::U64 => f.write_str("u64"),
            Self::I8 => f.write_str("i8"),
            Self::I16 => f.write_str("i16"),
            Self::I32 => f.write_str("i32"),
            Self::I64 => f.write_str("i64"),
            Self::Char => f.write_str("char"),
            Self::Void => f.write_str("void"),
            Self::Pointer(inner) => write!(f, "{inner}*"),
            Self::Array(..) => {
                let mut element = self;
                let mut dims = Vec::new();
                while let Self::Array(inner, len) = element {
                    dims.push(*len);
                    element = inner.as_ref();
                }
                write!(f, "{element}")?;
                dims.iter().try_for_each(|len| write!(f, "[{len}]"))
            }
            Self::Struct(name) => f.write_str(name),
        }
    }
}

impl FromStr for TypeRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let base_end = s.find(['*', '[']).unwrap_or(s.len());
        let base = s[..base_end].trim();
        if base.is_empty() || !base.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("invalid type name `{s}`"));
        }

        let mut ty = match base {
            "u8" | "bool" => Self::U8,
            "u16" => Self::U16,
            "u32" => Self::U32,
            "u64" => Self::U64,
            "i8" => Self::I8,
            "i16" => Self::I16,
            "i32" => Self::I32,
            "i64" => Self::I64,
            "char" => Self::Char,
            "void" => Self::Void,
            other => Self::Struct(other.to_string()),
        };

        let mut rest = s[base_end..].trim_start();
        while let Some(after) = rest.strip_prefix('*') {
            ty = Self::pointer_to(ty);
            rest = after.trim_start();
        }
        // `T[2][3]` is two arrays of three, so dimensions apply right to left.
        let mut dims = Vec::new();
        while let Some(after) = rest.strip_prefix('[') {
            let close = after.find(']').ok_or_else(|| format!("unterminated array in `{s}`"))?;
            let len = after[..close]
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid array length in `{s}`"))?;
            dims.push(len);
            rest = after[close + 1..].trim_start();
        }
        if !rest.is_empty() {
            return Err(format!("unexpected `{rest}` in type `{s}`"));
        }
        for len in dims.into_iter().rev() {
            ty = Self::array_of(ty, len);
        }
        Ok(ty)
    }
}

impl TryFrom<String> for TypeRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TypeRef> for String {
    fn from(value: TypeRef) -> Self {
        value.to_string()
    }
}

/// Byte order of the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl Endian {
    /// Decode an unsigned integer of `bytes.len()` bytes (at most 8).
    pub fn read_unsigned(self, bytes: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        match self {
            Self::Little => {
                buf[..bytes.len()].copy_from_slice(bytes);
                u64::from_le_bytes(buf)
            }
            Self::Big => {
                buf[8 - bytes.len()..].copy_from_slice(bytes);
                u64::from_be_bytes(buf)
            }
        }
    }

    /// Decode a two's complement integer of `bytes.len()` bytes.
    pub fn read_signed(self, bytes: &[u8]) -> i64 {
        let raw = self.read_unsigned(bytes);
        let shift = 64 - 8 * bytes.len() as u32;
        ((raw << shift) as i64) >> shift
    }
}

/// One member of a structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberLayout {
    pub name: String,
    pub offset: u64,
    #[serde(rename = "type")]
    pub ty: TypeRef,
}

/// Layout of one structure type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructLayout {
    pub name: String,
    pub size: usize,
    pub members: Vec<MemberLayout>,
}

impl StructLayout {
    pub fn new(name: &str, size: usize) -> Self {
        Self { name: name.to_string(), size, members: Vec::new() }
    }

    /// Builder helper used by the built-in kernel descriptions.
    #[must_use]
    pub fn member(mut self, name: &str, offset: u64, ty: &str) -> Self {
        let ty = ty.parse().unwrap_or_else(|err| panic!("built-in layout {}: {err}", self.name));
        self.members.push(MemberLayout { name: name.to_string(), offset, ty });
        self
    }

    pub fn find(&self, member: &str) -> Option<&MemberLayout> {
        self.members.iter().find(|m| m.name == member)
    }
}

fn default_pointer_size() -> usize {
    4
}

/// All type knowledge available to a target accessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRegistry {
    #[serde(default = "default_pointer_size")]
    pub pointer_size: usize,
    #[serde(default)]
    pub endian: Endian,
    #[serde(default)]
    pub structs: Vec<StructLayout>,
    /// Declared type of every global an expression may name.
    #[serde(default)]
    pub globals: BTreeMap<String, TypeRef>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self {
            pointer_size: default_pointer_size(),
            endian: Endian::Little,
            structs: Vec::new(),
            globals: BTreeMap::new(),
        }
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_struct(mut self, layout: StructLayout) -> Self {
        self.structs.push(layout);
        self
    }

    #[must_use]
    pub fn with_global(mut self, name: &str, ty: &str) -> Self {
        let ty = ty.parse().unwrap_or_else(|err| panic!("built-in global {name}: {err}"));
        self.globals.insert(name.to_string(), ty);
        self
    }

    pub fn layout(&self, name: &str) -> Result<&StructLayout, AccessError> {
        self.structs
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| AccessError::UnknownType(name.to_string()))
    }

    pub fn global(&self, name: &str) -> Option<&TypeRef> {
        self.globals.get(name)
    }

    pub fn size_of(&self, ty: &TypeRef) -> Result<usize, AccessError> {
        Ok(match ty {
            TypeRef::Pointer(_) => self.pointer_size,
            TypeRef::Array(inner, len) => {
                self.size_of(inner)?.checked_mul(*len).ok_or_else(|| AccessError::TooLarge(ty.to_string()))?
            }
            TypeRef::Struct(name) => self.layout(name)?.size,
            TypeRef::Void => 0,
            other => other.integer().map_or(0, |(width, _)| width),
        })
    }

    /// Resolve a dotted member path (`xStateListItem.pvContainer`) inside a
    /// structure type, returning its offset and type.
    pub fn resolve_path(&self, struct_name: &str, path: &str) -> Result<(u64, TypeRef), AccessError> {
        let mut offset = 0;
        let mut ty = TypeRef::named(struct_name);
        for part in path.split('.') {
            let TypeRef::Struct(name) = &ty else {
                return Err(AccessError::TypeMismatch { expected: "structure", found: ty.to_string() });
            };
            let layout = self.layout(name)?;
            let member = layout.find(part).ok_or_else(|| AccessError::UnknownMember {
                ty: name.clone(),
                member: part.to_string(),
            })?;
            offset += member.offset;
            ty = member.ty.clone();
        }
        Ok((offset, ty))
    }
}
