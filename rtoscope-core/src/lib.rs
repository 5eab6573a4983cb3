//! rtoscope core - RTOS awareness for host-side debuggers.
//!
//! Reconstructs the live state of an embedded kernel (tasks, semaphores,
//! mutexes, queues, pools, timers) by reading target memory, without any
//! agent on the target. Kernels are described by data ([`KernelSpec`]),
//! walked with a generic traversal engine and exposed as uniform tables.

pub mod address;
pub mod config;
pub mod context;
pub mod error;
pub mod format;
pub mod kernel;
pub mod memory;
pub mod model;
pub mod provider;
pub mod session;
pub mod symbols;
pub mod target;
pub mod traverse;

// Re-export commonly used types
pub use address::Address;
pub use config::{Config, Limits};
pub use context::{ContextProvider, SavedRegister, StackedContext};
pub use error::{AccessError, SchemaError, SpecError, TableError, TraversalFault};
pub use kernel::{KernelSpec, SpecProvider};
pub use memory::{MemoryImage, ReadMemory, Snapshot};
pub use model::{Cell, Field, FieldKind, Model, Record, Schema, Table, TableView};
pub use provider::{Attachment, DetectionState, Detector, NotReady, OsProvider};
pub use session::{AwarenessCommand, AwarenessEvent, AwarenessHandle};
pub use symbols::SymbolTable;
pub use target::{LayoutTarget, Structure, TargetAccess, TypeRegistry, Value};
pub use traverse::{ListWalk, PointerArray};

#[cfg(feature = "hardware")]
pub use memory::ProbeMemory;
