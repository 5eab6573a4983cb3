//! Kernel descriptions and the engine that runs them.
//!
//! Each supported kernel is a [`KernelSpec`]: plain data naming its symbols,
//! layouts and tables. [`SpecProvider`] checks a spec once at registration
//! and then serves it through the [`OsProvider`](crate::provider::OsProvider)
//! facade. Built-in specs describe 32-bit little-endian Cortex-M builds with
//! default configuration; other builds load their own JSON spec.

mod freertos;
mod prepare;
mod provider;
pub mod spec;
mod table;
mod threadx;
mod ucos3;

pub use freertos::freertos;
pub use provider::SpecProvider;
pub use spec::{
    ColumnSpec, ColumnValue, ContextSpec, Expect, Format, KernelSpec, ListHead, Owner, RunningCheck, Source,
    TableSpec,
};
pub use table::SpecTable;
pub use threadx::threadx;
pub use ucos3::ucos3;

use crate::config::Limits;
use crate::error::SpecError;
use crate::provider::OsProvider;
use crate::target::StructLayout;
use std::sync::Arc;

/// Every built-in kernel, in detection order.
pub fn builtin() -> Vec<KernelSpec> {
    vec![freertos(), threadx(), ucos3()]
}

/// Check every spec and wrap it as a provider, in order.
pub fn providers(specs: Vec<KernelSpec>, limits: Limits) -> Result<Vec<Arc<dyn OsProvider>>, SpecError> {
    specs
        .into_iter()
        .map(|spec| SpecProvider::new(spec, limits).map(|p| Arc::new(p) as Arc<dyn OsProvider>))
        .collect()
}

/// Registers an ARMv7-M exception entry pushes, preceded by `saved`, the
/// registers the kernel's context switch stores below them.
fn cortex_m_frame(name: &str, saved: &[&str]) -> StructLayout {
    const HARDWARE: [&str; 8] = ["r0", "r1", "r2", "r3", "r12", "lr", "pc", "xpsr"];
    let registers: Vec<&str> = saved.iter().copied().chain(HARDWARE).collect();
    registers
        .iter()
        .enumerate()
        .fold(StructLayout::new(name, registers.len() * 4), |layout, (i, reg)| {
            layout.member(reg, (i * 4) as u64, "u32")
        })
}

/// Callee-saved registers in push order.
const CALLEE_SAVED: [&str; 8] = ["r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11"];
