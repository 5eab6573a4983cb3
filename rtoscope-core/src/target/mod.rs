//! Target access.
//!
//! [`TargetAccess`] is the only way kernel integrations see the target:
//! symbol existence, expression evaluation, structure decomposition and
//! string reads. Any call may fail when the session is lost; callers must
//! pass those failures up rather than hide them.
//!
//! [`LayoutTarget`] implements the contract on top of a symbol table, a
//! [`TypeRegistry`] and a raw memory reader.

pub mod expr;
pub mod types;

pub use types::{Endian, MemberLayout, StructLayout, TypeRef, TypeRegistry};

use crate::error::AccessError;
use crate::memory::ReadMemory;
use crate::model::Number;
use crate::symbols::SymbolTable;
use crate::Address;
use expr::Expr;
use std::sync::Arc;

/// Longest string read through a pointer when the caller gives no limit.
pub const DEFAULT_STRING_LIMIT: usize = 64;

/// Remote memory and symbol access for one debug session.
pub trait TargetAccess {
    /// Whether the firmware image defines `name`. Never fails.
    fn symbol_exists(&self, name: &str) -> bool;

    /// Evaluate an expression such as `pxCurrentTCB` or
    /// `&pxReadyTasksLists[0].xListEnd`.
    fn evaluate(&mut self, expr: &str) -> Result<Value, AccessError>;

    /// Read the structure of type `type_name` located at `address`.
    ///
    /// The returned handle is a snapshot; call again to observe new target
    /// state.
    fn read_structure(&mut self, address: Address, type_name: &str) -> Result<Structure, AccessError>;

    /// Read a NUL-terminated string of at most `limit` bytes.
    fn read_c_string(&mut self, address: Address, limit: usize) -> Result<String, AccessError>;

    /// Decode with `types` from now on. A kernel binds its own layouts
    /// before it reads, so kernels never see each other's pointer width,
    /// byte order or structures.
    fn use_types(&mut self, types: &Arc<TypeRegistry>);
}

/// A value read from the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Unsigned(u64),
    Signed(i64),
    Pointer(Address),
    /// Contents of a `char` array.
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Struct(Structure),
}

impl Value {
    fn describe(&self) -> String {
        match self {
            Self::Unsigned(v) => format!("number {v}"),
            Self::Signed(v) => format!("number {v}"),
            Self::Pointer(a) => format!("pointer {a}"),
            Self::Bytes(b) => format!("char[{}]", b.len()),
            Self::Array(items) => format!("array of {}", items.len()),
            Self::Struct(s) => format!("structure {}", s.type_name()),
        }
    }

    pub fn as_number(&self) -> Result<Number, AccessError> {
        match self {
            Self::Unsigned(v) => Ok(Number::Unsigned(*v)),
            Self::Signed(v) => Ok(Number::Signed(*v)),
            Self::Pointer(a) => Ok(Number::Unsigned(a.value())),
            other => Err(AccessError::TypeMismatch { expected: "number", found: other.describe() }),
        }
    }

    /// Raw bits of a numeric value.
    pub fn as_u64(&self) -> Result<u64, AccessError> {
        self.as_number().map(Number::bits)
    }

    pub fn as_address(&self) -> Result<Address, AccessError> {
        match self {
            Self::Pointer(a) => Ok(*a),
            Self::Unsigned(v) => Ok(Address::new(*v)),
            other => Err(AccessError::TypeMismatch { expected: "address", found: other.describe() }),
        }
    }

    pub fn as_structure(&self) -> Result<&Structure, AccessError> {
        match self {
            Self::Struct(s) => Ok(s),
            other => Err(AccessError::TypeMismatch { expected: "structure", found: other.describe() }),
        }
    }

    /// Read the value as a NUL-terminated string.
    ///
    /// Character arrays are decoded in place; pointers are followed through
    /// `target`. A null pointer reads as the empty string.
    pub fn read_string(&self, target: &mut dyn TargetAccess, limit: usize) -> Result<String, AccessError> {
        match self {
            Self::Bytes(bytes) => Ok(crate::format::c_string(bytes)),
            Self::Pointer(a) if a.is_null() => Ok(String::new()),
            Self::Pointer(a) => target.read_c_string(*a, limit),
            other => Err(AccessError::TypeMismatch { expected: "string", found: other.describe() }),
        }
    }
}

/// A decoded view of one target structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structure {
    address: Address,
    type_name: String,
    members: Vec<(String, Value)>,
}

impl Structure {
    pub fn new(address: Address, type_name: &str, members: Vec<(String, Value)>) -> Self {
        Self { address, type_name: type_name.to_string(), members }
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn members(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.members.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn member(&self, name: &str) -> Result<&Value, AccessError> {
        self.members
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| AccessError::UnknownMember { ty: self.type_name.clone(), member: name.to_string() })
    }

    /// Follow a dotted path through nested structures.
    pub fn path(&self, path: &str) -> Result<&Value, AccessError> {
        let mut parts = path.split('.');
        let first = parts.next().unwrap_or_default();
        let mut value = self.member(first)?;
        for part in parts {
            value = value.as_structure()?.member(part)?;
        }
        Ok(value)
    }
}

/// Intermediate result of evaluating an expression.
enum Eval {
    /// An object in target memory.
    Place { address: Address, ty: TypeRef },
    /// A computed value that lives nowhere (literal, address-of).
    Rvalue { value: u64, ty: TypeRef },
}

/// [`TargetAccess`] built from symbols, typed layouts and raw memory.
pub struct LayoutTarget<M> {
    symbols: SymbolTable,
    types: Arc<TypeRegistry>,
    memory: M,
}

impl<M: ReadMemory> LayoutTarget<M> {
    pub fn new(symbols: SymbolTable, types: impl Into<Arc<TypeRegistry>>, memory: M) -> Self {
        Self { symbols, types: types.into(), memory }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        Arc::make_mut(&mut self.types)
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    fn read_bytes(&mut self, address: Address, len: usize) -> Result<Vec<u8>, AccessError> {
        let mut buf = vec![0u8; len];
        self.memory.read(address, &mut buf)?;
        log::trace!("read {len} bytes at {address}");
        Ok(buf)
    }

    fn read_value(&mut self, address: Address, ty: &TypeRef) -> Result<Value, AccessError> {
        let size = self.types.size_of(ty)?;
        let bytes = self.read_bytes(address, size)?;
        self.decode(ty, &bytes, address)
    }

    fn decode(&self, ty: &TypeRef, bytes: &[u8], address: Address) -> Result<Value, AccessError> {
        let endian = self.types.endian;
        match ty {
            TypeRef::Pointer(_) => Ok(Value::Pointer(Address::new(endian.read_unsigned(bytes)))),
            TypeRef::Array(elem, _) if **elem == TypeRef::Char => Ok(Value::Bytes(bytes.to_vec())),
            TypeRef::Array(elem, len) => {
                let size = self.types.size_of(elem)?;
                (0..*len)
                    .map(|i| {
                        let at = i * size;
                        self.decode(elem, &bytes[at..at + size], address.offset(at as u64))
                    })
                    .collect::<Result<_, _>>()
                    .map(Value::Array)
            }
            TypeRef::Struct(name) => {
                let layout = self.types.layout(name)?;
                self.decode_struct(layout, bytes, address).map(Value::Struct)
            }
            TypeRef::Void => Err(AccessError::TypeMismatch { expected: "complete type", found: "void".to_string() }),
            integer => match integer.integer() {
                Some((_, true)) => Ok(Value::Signed(endian.read_signed(bytes))),
                _ => Ok(Value::Unsigned(endian.read_unsigned(bytes))),
            },
        }
    }

    fn decode_struct(&self, layout: &StructLayout, bytes: &[u8], address: Address) -> Result<Structure, AccessError> {
        let mut members = Vec::with_capacity(layout.members.len());
        for member in &layout.members {
            let size = self.types.size_of(&member.ty)?;
            let at = usize::try_from(member.offset).unwrap_or(usize::MAX);
            let slice = at.checked_add(size).and_then(|end| bytes.get(at..end)).ok_or_else(|| AccessError::TypeMismatch {
                expected: "member inside its structure",
                found: format!("{}.{} at offset {at}", layout.name, member.name),
            })?;
            let value = self.decode(&member.ty, slice, address.offset(member.offset))?;
            members.push((member.name.clone(), value));
        }
        Ok(Structure::new(address, &layout.name, members))
    }

    fn member_place(&self, address: Address, ty: &TypeRef, member: &str) -> Result<Eval, AccessError> {
        let TypeRef::Struct(name) = ty else {
            return Err(AccessError::TypeMismatch { expected: "structure", found: ty.to_string() });
        };
        let layout = self.types.layout(name)?;
        let found = layout.find(member).ok_or_else(|| AccessError::UnknownMember {
            ty: name.clone(),
            member: member.to_string(),
        })?;
        Ok(Eval::Place { address: address.offset(found.offset), ty: found.ty.clone() })
    }

    /// Interpret an evaluated expression as a pointer, returning its value
    /// and pointee type. Arrays decay to a pointer to their first element.
    fn pointer(&mut self, eval: Eval) -> Result<(Address, TypeRef), AccessError> {
        match eval {
            Eval::Rvalue { value, ty: TypeRef::Pointer(inner) } => Ok((Address::new(value), *inner)),
            Eval::Place { address, ty: TypeRef::Array(elem, _) } => Ok((address, *elem)),
            Eval::Place { address, ty: TypeRef::Pointer(inner) } => {
                let bytes = self.read_bytes(address, self.types.pointer_size)?;
                Ok((Address::new(self.types.endian.read_unsigned(&bytes)), *inner))
            }
            Eval::Place { ty, .. } | Eval::Rvalue { ty, .. } => {
                Err(AccessError::TypeMismatch { expected: "pointer", found: ty.to_string() })
            }
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Eval, AccessError> {
        match expr {
            Expr::Symbol(name) => {
                let address =
                    self.symbols.lookup_symbol(name).ok_or_else(|| AccessError::UnknownSymbol(name.clone()))?;
                let ty = self.types.global(name).cloned().ok_or_else(|| AccessError::UntypedSymbol(name.clone()))?;
                Ok(Eval::Place { address, ty })
            }
            Expr::Literal(value) => Ok(Eval::Rvalue { value: *value, ty: TypeRef::U64 }),
            Expr::AddressOf(inner) => match self.eval(inner)? {
                Eval::Place { address, ty } => {
                    Ok(Eval::Rvalue { value: address.value(), ty: TypeRef::pointer_to(ty) })
                }
                Eval::Rvalue { ty, .. } => {
                    Err(AccessError::TypeMismatch { expected: "addressable object", found: ty.to_string() })
                }
            },
            Expr::Deref(inner) => {
                let inner = self.eval(inner)?;
                let (address, ty) = self.pointer(inner)?;
                if ty == TypeRef::Void {
                    return Err(AccessError::TypeMismatch { expected: "typed pointer", found: "void*".to_string() });
                }
                Ok(Eval::Place { address, ty })
            }
            Expr::Member(inner, member) => match self.eval(inner)? {
                Eval::Place { address, ty } => self.member_place(address, &ty, member),
                Eval::Rvalue { ty, .. } => {
                    Err(AccessError::TypeMismatch { expected: "structure", found: ty.to_string() })
                }
            },
            Expr::Arrow(inner, member) => {
                let inner = self.eval(inner)?;
                let (address, ty) = self.pointer(inner)?;
                self.member_place(address, &ty, member)
            }
            Expr::Index(inner, index) => {
                let (base, elem) = match self.eval(inner)? {
                    Eval::Place { ty: TypeRef::Array(_, len), .. } if *index >= len as u64 => {
                        return Err(AccessError::TypeMismatch {
                            expected: "index within array bounds",
                            found: format!("[{index}] of {len}"),
                        });
                    }
                    other => self.pointer(other)?,
                };
                let size = self.types.size_of(&elem)? as u64;
                Ok(Eval::Place { address: base.offset(index * size), ty: elem })
            }
        }
    }
}

impl<M: ReadMemory> TargetAccess for LayoutTarget<M> {
    fn symbol_exists(&self, name: &str) -> bool {
        self.symbols.contains(name)
    }

    fn evaluate(&mut self, text: &str) -> Result<Value, AccessError> {
        let expr = expr::parse(text)?;
        match self.eval(&expr)? {
            Eval::Place { address, ty } => self.read_value(address, &ty),
            Eval::Rvalue { value, ty: TypeRef::Pointer(_) } => Ok(Value::Pointer(Address::new(value))),
            Eval::Rvalue { value, .. } => Ok(Value::Unsigned(value)),
        }
    }

    fn read_structure(&mut self, address: Address, type_name: &str) -> Result<Structure, AccessError> {
        let size = self.types.layout(type_name)?.size;
        let bytes = self.read_bytes(address, size)?;
        let layout = self.types.layout(type_name)?;
        self.decode_struct(layout, &bytes, address)
    }

    fn read_c_string(&mut self, address: Address, limit: usize) -> Result<String, AccessError> {
        const CHUNK: usize = 16;
        let mut out = Vec::new();
        while out.len() < limit {
            let at = address.offset(out.len() as u64);
            let want = CHUNK.min(limit - out.len());
            // Near the end of mapped memory a whole chunk may not be
            // readable even though the string is; fall back to one byte.
            let chunk = match self.read_bytes(at, want) {
                Ok(chunk) => chunk,
                Err(_) if want > 1 => self.read_bytes(at, 1)?,
                Err(err) => return Err(err),
            };
            if let Some(nul) = chunk.iter().position(|&b| b == 0) {
                out.extend_from_slice(&chunk[..nul]);
                return Ok(String::from_utf8_lossy(&out).into_owned());
            }
            out.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn use_types(&mut self, types: &Arc<TypeRegistry>) {
        if !Arc::ptr_eq(&self.types, types) {
            self.types = Arc::clone(types);
        }
    }
}
