//! Micrium uC/OS-III 3.0x built with `OS_CFG_DBG_EN`.
//!
//! The debug build links every kernel object into a null-terminated list
//! headed by `OS<Type>DbgListPtr` and chained through `DbgNextPtr`.

use super::spec::{ColumnSpec, ContextSpec, Expect, Format, KernelSpec, ListHead, RunningCheck, Source, TableSpec};
use super::{cortex_m_frame, CALLEE_SAVED};
use crate::target::{StructLayout, TypeRegistry};

/// `OS_STATE_OS_RUNNING`.
const OS_RUNNING: u64 = 1;

/// `OS_PEND_LIST`, embedded in every pend object.
fn pend_list() -> StructLayout {
    StructLayout::new("OS_PEND_LIST", 12)
        .member("HeadPtr", 0, "void*")
        .member("TailPtr", 4, "void*")
        .member("NbrEntries", 8, "u16")
}

/// Members every pend object starts with, as of 3.03.
fn pend_object(name: &str, size: usize) -> StructLayout {
    let own = format!("{name}*");
    StructLayout::new(name, size)
        .member("Type", 0, "u32")
        .member("NamePtr", 4, "char*")
        .member("PendList", 8, "OS_PEND_LIST")
        .member("DbgPrevPtr", 20, &own)
        .member("DbgNextPtr", 24, &own)
        .member("DbgNamePtr", 28, "char*")
}

fn types() -> TypeRegistry {
    TypeRegistry::new()
        .with_struct(
            StructLayout::new("OS_TCB", 128)
                .member("StkPtr", 0, "u32*")
                .member("ExtPtr", 4, "void*")
                .member("StkLimitPtr", 8, "u32*")
                .member("NamePtr", 12, "char*")
                .member("NextPtr", 16, "OS_TCB*")
                .member("PrevPtr", 20, "OS_TCB*")
                .member("TickNextPtr", 24, "OS_TCB*")
                .member("TickPrevPtr", 28, "OS_TCB*")
                .member("TickSpokePtr", 32, "void*")
                .member("StkBasePtr", 36, "u32*")
                .member("TaskEntryAddr", 40, "void*")
                .member("TaskEntryArg", 44, "void*")
                .member("PendDataTblPtr", 48, "void*")
                .member("PendOn", 52, "u8")
                .member("PendStatus", 53, "u8")
                .member("TaskState", 54, "u8")
                .member("Prio", 55, "u8")
                .member("StkSize", 56, "u32")
                .member("Opt", 60, "u16")
                .member("PendDataTblEntries", 62, "u16")
                .member("TS", 64, "u32")
                .member("SemCtr", 68, "u32")
                .member("TickCtrPrev", 72, "u32")
                .member("TickCtrMatch", 76, "u32")
                .member("TickRemain", 80, "u32")
                .member("TimeQuanta", 84, "u32")
                .member("TimeQuantaCtr", 88, "u32")
                .member("MsgPtr", 92, "void*")
                .member("MsgSize", 96, "u16")
                .member("SuspendCtr", 100, "u8")
                .member("CPUUsage", 102, "u16")
                .member("CtxSwCtr", 104, "u32")
                .member("StkUsed", 108, "u32")
                .member("StkFree", 112, "u32")
                .member("DbgPrevPtr", 116, "OS_TCB*")
                .member("DbgNextPtr", 120, "OS_TCB*")
                .member("DbgNamePtr", 124, "char*"),
        )
        .with_struct(pend_list())
        .with_struct(pend_object("OS_SEM", 40).member("Ctr", 32, "u32").member("TS", 36, "u32"))
        .with_struct(
            pend_object("OS_MUTEX", 44)
                .member("OwnerTCBPtr", 32, "OS_TCB*")
                .member("OwnerOriginalPrio", 36, "u8")
                .member("OwnerNestingCtr", 37, "u8")
                .member("TS", 40, "u32"),
        )
        .with_struct(
            StructLayout::new("OS_MSG_Q", 16)
                .member("InPtr", 0, "void*")
                .member("OutPtr", 4, "void*")
                .member("NbrEntriesSize", 8, "u16")
                .member("NbrEntries", 10, "u16")
                .member("NbrEntriesMax", 12, "u16"),
        )
        .with_struct(pend_object("OS_Q", 48).member("MsgQ", 32, "OS_MSG_Q"))
        .with_struct(pend_object("OS_FLAG_GRP", 40).member("Flags", 32, "u32").member("TS", 36, "u32"))
        .with_struct(
            StructLayout::new("OS_MEM", 36)
                .member("Type", 0, "u32")
                .member("AddrPtr", 4, "void*")
                .member("NamePtr", 8, "char*")
                .member("FreeListPtr", 12, "void*")
                .member("BlkSize", 16, "u32")
                .member("NbrMax", 20, "u32")
                .member("NbrFree", 24, "u32")
                .member("DbgPrevPtr", 28, "OS_MEM*")
                .member("DbgNextPtr", 32, "OS_MEM*"),
        )
        .with_struct(
            StructLayout::new("OS_TMR", 52)
                .member("Type", 0, "u32")
                .member("NamePtr", 4, "char*")
                .member("CallbackPtr", 8, "void*")
                .member("CallbackPtrArg", 12, "void*")
                .member("NextPtr", 16, "OS_TMR*")
                .member("PrevPtr", 20, "OS_TMR*")
                .member("Remain", 24, "u32")
                .member("Match", 28, "u32")
                .member("Dly", 32, "u32")
                .member("Period", 36, "u32")
                .member("Opt", 40, "u16")
                .member("State", 42, "u8")
                .member("DbgPrevPtr", 44, "OS_TMR*")
                .member("DbgNextPtr", 48, "OS_TMR*"),
        )
        .with_struct(cortex_m_frame("OS_Frame", &CALLEE_SAVED))
        .with_global("OSRunning", "u8")
        .with_global("OSTaskQty", "u16")
        .with_global("OSTCBCurPtr", "OS_TCB*")
        .with_global("OSTaskDbgListPtr", "OS_TCB*")
        .with_global("OSSemDbgListPtr", "OS_SEM*")
        .with_global("OSMutexDbgListPtr", "OS_MUTEX*")
        .with_global("OSQDbgListPtr", "OS_Q*")
        .with_global("OSFlagDbgListPtr", "OS_FLAG_GRP*")
        .with_global("OSMemDbgListPtr", "OS_MEM*")
        .with_global("OSTmrDbgListPtr", "OS_TMR*")
}

/// Table over the debug list headed by `head`.
fn debug_list(id: &str, label: &str, head: &str, object_type: &str) -> TableSpec {
    let source = Source::list(object_type, "DbgNextPtr").head(ListHead::new(head));
    TableSpec::new(id, label, source)
        .column(ColumnSpec::address("address", "Address").primary())
        .column(ColumnSpec::member("name", "Name", "NamePtr", Format::Text))
}

fn tasks() -> TableSpec {
    let states = Format::names([
        (0, "Ready"),
        (1, "Delayed"),
        (2, "Pending"),
        (3, "Pending, timeout"),
        (4, "Suspended"),
        (5, "Delayed, suspended"),
        (6, "Pending, suspended"),
        (7, "Pending, timeout, suspended"),
        (255, "Deleted"),
    ]);
    let pend_on = Format::names([
        (0, ""),
        (1, "Flag"),
        (2, "Task queue"),
        (3, "Multiple"),
        (4, "Mutex"),
        (5, "Queue"),
        (6, "Semaphore"),
        (7, "Task semaphore"),
    ]);
    debug_list("tasks", "Tasks", "OSTaskDbgListPtr", "OS_TCB")
        .column(ColumnSpec::member("state", "State", "TaskState", states))
        .column(ColumnSpec::member("pend_on", "Pending on", "PendOn", pend_on))
        .column(ColumnSpec::matches("running", "Running", "OSTCBCurPtr", "yes", ""))
        .column(ColumnSpec::member("priority", "Priority", "Prio", Format::Decimal))
        .column(ColumnSpec::member("stack_base", "Stack base", "StkBasePtr", Format::Address))
        .column(ColumnSpec::member("stack_size", "Stack size", "StkSize", Format::Decimal))
        .column(ColumnSpec::member("stack_ptr", "Saved SP", "StkPtr", Format::Address))
        .column(ColumnSpec::member("switches", "Context switches", "CtxSwCtr", Format::Decimal))
        .column(ColumnSpec::member("suspend", "Suspend count", "SuspendCtr", Format::Decimal))
}

fn semaphores() -> TableSpec {
    debug_list("semaphores", "Semaphores", "OSSemDbgListPtr", "OS_SEM")
        .column(ColumnSpec::member("count", "Count", "Ctr", Format::Decimal))
        .column(ColumnSpec::member("waiting", "Waiting", "PendList.NbrEntries", Format::Decimal))
}

fn mutexes() -> TableSpec {
    debug_list("mutexes", "Mutexes", "OSMutexDbgListPtr", "OS_MUTEX")
        .column(ColumnSpec::member("owner", "Owner", "OwnerTCBPtr", Format::Address))
        .column(ColumnSpec::member("owner_name", "Owner name", "OwnerTCBPtr->NamePtr", Format::Text))
        .column(ColumnSpec::member("nesting", "Nesting", "OwnerNestingCtr", Format::Decimal))
        .column(ColumnSpec::member("waiting", "Waiting", "PendList.NbrEntries", Format::Decimal))
}

fn queues() -> TableSpec {
    debug_list("queues", "Queues", "OSQDbgListPtr", "OS_Q")
        .column(ColumnSpec::member("entries", "Entries", "MsgQ.NbrEntries", Format::Decimal))
        .column(ColumnSpec::member("size", "Size", "MsgQ.NbrEntriesSize", Format::Decimal))
        .column(ColumnSpec::member("peak", "Peak", "MsgQ.NbrEntriesMax", Format::Decimal))
        .column(ColumnSpec::member("waiting", "Waiting", "PendList.NbrEntries", Format::Decimal))
}

fn flags() -> TableSpec {
    debug_list("event_flags", "Event flags", "OSFlagDbgListPtr", "OS_FLAG_GRP")
        .column(ColumnSpec::member("flags", "Flags", "Flags", Format::Hex))
        .column(ColumnSpec::member("waiting", "Waiting", "PendList.NbrEntries", Format::Decimal))
}

fn partitions() -> TableSpec {
    debug_list("partitions", "Memory partitions", "OSMemDbgListPtr", "OS_MEM")
        .column(ColumnSpec::member("base", "Base", "AddrPtr", Format::Address))
        .column(ColumnSpec::member("block_size", "Block size", "BlkSize", Format::Decimal))
        .column(ColumnSpec::member("blocks", "Blocks", "NbrMax", Format::Decimal))
        .column(ColumnSpec::member("free", "Free", "NbrFree", Format::Decimal))
}

fn timers() -> TableSpec {
    let states = Format::names([(0, "Unused"), (1, "Stopped"), (2, "Running"), (3, "Completed")]);
    debug_list("timers", "Timers", "OSTmrDbgListPtr", "OS_TMR")
        .column(ColumnSpec::member("state", "State", "State", states))
        .column(ColumnSpec::member("remain", "Remaining", "Remain", Format::Decimal))
        .column(ColumnSpec::member("period", "Period", "Period", Format::Decimal))
        .column(ColumnSpec::member("callback", "Callback", "CallbackPtr", Format::Address))
}

pub fn ucos3() -> KernelSpec {
    KernelSpec {
        name: "uC/OS-III".to_string(),
        required_symbols: ["OSRunning", "OSTCBCurPtr", "OSTaskDbgListPtr"].map(String::from).to_vec(),
        running: vec![RunningCheck::new("OSRunning", Expect::Equals(OS_RUNNING))],
        types: types(),
        tables: vec![tasks(), semaphores(), mutexes(), queues(), flags(), partitions(), timers()],
        context: Some(ContextSpec::new("OS_TCB", "StkPtr", "OS_Frame")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pend_objects_share_prefix() {
        let types = types();
        for name in ["OS_SEM", "OS_MUTEX", "OS_Q", "OS_FLAG_GRP"] {
            assert_eq!(types.resolve_path(name, "DbgNextPtr").unwrap().0, 24, "{name}");
            assert_eq!(types.resolve_path(name, "PendList.NbrEntries").unwrap().0, 16, "{name}");
        }
    }

    #[test]
    fn test_lists_are_null_terminated() {
        for table in ucos3().tables {
            assert!(matches!(table.source, Source::List { circular: false, ref heads, .. } if heads[0].sentinel.is_none()));
        }
    }
}
