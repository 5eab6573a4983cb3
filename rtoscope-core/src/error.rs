//! Error types shared across the crate.

use crate::Address;
use thiserror::Error;

/// Failure reported by a target accessor.
///
/// Every accessor call may fail at any time; callers surface these instead
/// of swallowing them, except during kernel detection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("debug session unavailable: {0}")]
    SessionUnavailable(String),
    #[error("cannot read {len} bytes at {address}")]
    Unreadable { address: Address, len: usize },
    #[error("target read at {address} failed: {reason}")]
    ReadFailed { address: Address, reason: String },
    #[error("unknown symbol `{0}`")]
    UnknownSymbol(String),
    #[error("symbol `{0}` has no declared type")]
    UntypedSymbol(String),
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("type `{ty}` has no member `{member}`")]
    UnknownMember { ty: String, member: String },
    #[error("invalid expression `{expr}`: {reason}")]
    Expression { expr: String, reason: String },
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: String },
    #[error("type `{0}` does not fit in the address space")]
    TooLarge(String),
}

/// Failure while walking a kernel collection.
///
/// Aborts the refresh of the table that started the walk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraversalFault {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("walk from {head} exceeded {limit} elements (corrupted or cyclic list)")]
    StepLimit { head: Address, limit: usize },
}

/// A table schema or record that breaks the table contract.
///
/// These point at a broken kernel integration, not at the target state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("table `{0}` declares no fields")]
    Empty(String),
    #[error("table `{0}` has no primary field")]
    NoPrimary(String),
    #[error("table `{table}` has several primary fields: {fields:?}")]
    MultiplePrimary { table: String, fields: Vec<String> },
    #[error("table `{table}` declares field `{field}` twice")]
    DuplicateField { table: String, field: String },
    #[error("record for table `{table}` has {found} cells, expected {expected}")]
    CellCount { table: String, expected: usize, found: usize },
    #[error("cell {index} of table `{table}` is {found:?}, field `{field}` is {expected:?}")]
    CellKind {
        table: String,
        field: String,
        index: usize,
        expected: crate::model::FieldKind,
        found: crate::model::FieldKind,
    },
}

/// Why one table failed to refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error(transparent)]
    Traversal(#[from] TraversalFault),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl From<AccessError> for TableError {
    fn from(err: AccessError) -> Self {
        Self::Traversal(TraversalFault::Access(err))
    }
}

/// A kernel description rejected at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("kernel `{kernel}`: {reason}")]
    Invalid { kernel: String, reason: String },
    #[error("kernel `{kernel}`, table `{table}`: {reason}")]
    Table { kernel: String, table: String, reason: String },
    #[error("kernel `{kernel}`, table `{table}`: {source}")]
    Schema {
        kernel: String,
        table: String,
        #[source]
        source: SchemaError,
    },
}
