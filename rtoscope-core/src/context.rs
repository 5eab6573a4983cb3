//! Saved register context of suspended tasks.
//!
//! When a kernel switches away from a task it pushes the task's registers
//! onto the task's own stack and stores the resulting stack pointer in the
//! task control block. Reading that frame back gives a debugger the
//! registers it needs to unwind a task that is not currently running.

use crate::error::{AccessError, TraversalFault};
use crate::target::TargetAccess;
use crate::Address;
use serde::{Deserialize, Serialize};

/// One register recovered from a task's stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedRegister {
    pub name: String,
    pub value: u64,
}

/// Supplies the register view of a task that is not running.
pub trait ContextProvider: Send + Sync {
    fn saved_registers(
        &self,
        target: &mut dyn TargetAccess,
        task: Address,
    ) -> Result<Vec<SavedRegister>, TraversalFault>;
}

/// Context saved as a fixed frame at the task's stored stack pointer.
///
/// `frame_type` is a structure whose members are the saved registers in
/// stack order. The stack pointer of the task before the switch is the
/// frame address plus `frame_size`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackedContext {
    pub task_type: String,
    /// Member path of the saved stack pointer in the task structure.
    pub stack_pointer: String,
    pub frame_type: String,
    pub frame_size: u64,
}

impl ContextProvider for StackedContext {
    fn saved_registers(
        &self,
        target: &mut dyn TargetAccess,
        task: Address,
    ) -> Result<Vec<SavedRegister>, TraversalFault> {
        let tcb = target.read_structure(task, &self.task_type)?;
        let sp = tcb.path(&self.stack_pointer)?.as_address()?;
        if sp.is_null() {
            return Err(AccessError::TypeMismatch {
                expected: "saved stack pointer",
                found: format!("null in task {task}"),
            }
            .into());
        }

        let frame = target.read_structure(sp, &self.frame_type)?;
        let mut registers = frame
            .members()
            .map(|(name, value)| Ok(SavedRegister { name: name.to_string(), value: value.as_u64()? }))
            .collect::<Result<Vec<_>, AccessError>>()?;
        registers.push(SavedRegister { name: "sp".to_string(), value: sp.offset(self.frame_size).value() });
        log::debug!("Recovered {} registers for task {task}", registers.len());
        Ok(registers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryImage;
    use crate::symbols::SymbolTable;
    use crate::target::{LayoutTarget, StructLayout, TypeRegistry};

    fn context() -> StackedContext {
        StackedContext {
            task_type: "tcb".to_string(),
            stack_pointer: "sp".to_string(),
            frame_type: "frame".to_string(),
            frame_size: 12,
        }
    }

    fn target() -> LayoutTarget<MemoryImage> {
        let types = TypeRegistry::new()
            .with_struct(StructLayout::new("tcb", 8).member("sp", 0, "u32*").member("prio", 4, "u32"))
            .with_struct(
                StructLayout::new("frame", 12)
                    .member("r4", 0, "u32")
                    .member("lr", 4, "u32")
                    .member("pc", 8, "u32"),
            );
        let mut memory = MemoryImage::new();
        memory.write_u32(Address::new(0x100), 0x2000_0400);
        memory.write_u32(Address::new(0x2000_0400), 4);
        memory.write_u32(Address::new(0x2000_0404), 0xffff_fffd);
        memory.write_u32(Address::new(0x2000_0408), 0x0800_1234);
        memory.zero(Address::new(0x200), 8);
        LayoutTarget::new(SymbolTable::new(), types, memory)
    }

    #[test]
    fn test_registers_from_stack_frame() {
        let mut t = target();
        let regs = context().saved_registers(&mut t, Address::new(0x100)).unwrap();
        let names: Vec<&str> = regs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["r4", "lr", "pc", "sp"]);
        assert_eq!(regs[2].value, 0x0800_1234);
        assert_eq!(regs[3].value, 0x2000_040c);
    }

    #[test]
    fn test_null_stack_pointer_is_a_fault() {
        let mut t = target();
        assert!(context().saved_registers(&mut t, Address::new(0x200)).is_err());
    }

    #[test]
    fn test_unreadable_frame_is_a_fault() {
        let mut t = target();
        t.memory_mut().write_u32(Address::new(0x100), 0x3000_0000);
        let err = context().saved_registers(&mut t, Address::new(0x100)).unwrap_err();
        assert!(matches!(err, TraversalFault::Access(AccessError::Unreadable { .. })));
    }
}
