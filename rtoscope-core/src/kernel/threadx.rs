//! Azure RTOS ThreadX 6.x.
//!
//! Every object type keeps a circular, doubly linked "created" list:
//! `_tx_X_created_ptr` points at the first object and the last object's
//! `tx_X_created_next` leads back to it.

use super::spec::{ColumnSpec, ContextSpec, Expect, Format, KernelSpec, ListHead, RunningCheck, Source, TableSpec};
use super::{cortex_m_frame, CALLEE_SAVED};
use crate::target::{StructLayout, TypeRegistry};

/// `TX_INITIALIZE_IN_PROGRESS`.
const INITIALIZE_IN_PROGRESS: u64 = 0xF0F0_F0F0;

fn types() -> TypeRegistry {
    TypeRegistry::new()
        .with_struct(
            StructLayout::new("TX_TIMER_INTERNAL", 28)
                .member("tx_timer_internal_remaining_ticks", 0, "u32")
                .member("tx_timer_internal_re_initialize_ticks", 4, "u32")
                .member("tx_timer_internal_timeout_function", 8, "void*")
                .member("tx_timer_internal_timeout_param", 12, "u32")
                .member("tx_timer_internal_active_next", 16, "TX_TIMER_INTERNAL*")
                .member("tx_timer_internal_active_previous", 20, "TX_TIMER_INTERNAL*")
                .member("tx_timer_internal_list_head", 24, "void*"),
        )
        .with_struct(
            StructLayout::new("TX_THREAD", 144)
                .member("tx_thread_id", 0, "u32")
                .member("tx_thread_run_count", 4, "u32")
                .member("tx_thread_stack_ptr", 8, "void*")
                .member("tx_thread_stack_start", 12, "void*")
                .member("tx_thread_stack_end", 16, "void*")
                .member("tx_thread_stack_size", 20, "u32")
                .member("tx_thread_time_slice", 24, "u32")
                .member("tx_thread_new_time_slice", 28, "u32")
                .member("tx_thread_ready_next", 32, "TX_THREAD*")
                .member("tx_thread_ready_previous", 36, "TX_THREAD*")
                .member("tx_thread_name", 40, "char*")
                .member("tx_thread_priority", 44, "u32")
                .member("tx_thread_state", 48, "u32")
                .member("tx_thread_delayed_suspend", 52, "u32")
                .member("tx_thread_suspending", 56, "u32")
                .member("tx_thread_preempt_threshold", 60, "u32")
                .member("tx_thread_schedule_hook", 64, "void*")
                .member("tx_thread_entry", 68, "void*")
                .member("tx_thread_entry_parameter", 72, "u32")
                .member("tx_thread_timer", 76, "TX_TIMER_INTERNAL")
                .member("tx_thread_suspend_cleanup", 104, "void*")
                .member("tx_thread_suspend_control_block", 108, "void*")
                .member("tx_thread_suspended_next", 112, "TX_THREAD*")
                .member("tx_thread_suspended_previous", 116, "TX_THREAD*")
                .member("tx_thread_suspend_info", 120, "u32")
                .member("tx_thread_additional_suspend_info", 124, "void*")
                .member("tx_thread_suspend_option", 128, "u32")
                .member("tx_thread_suspend_status", 132, "u32")
                .member("tx_thread_created_next", 136, "TX_THREAD*")
                .member("tx_thread_created_previous", 140, "TX_THREAD*"),
        )
        .with_struct(
            StructLayout::new("TX_SEMAPHORE", 32)
                .member("tx_semaphore_id", 0, "u32")
                .member("tx_semaphore_name", 4, "char*")
                .member("tx_semaphore_count", 8, "u32")
                .member("tx_semaphore_suspension_list", 12, "TX_THREAD*")
                .member("tx_semaphore_suspended_count", 16, "u32")
                .member("tx_semaphore_created_next", 20, "TX_SEMAPHORE*")
                .member("tx_semaphore_created_previous", 24, "TX_SEMAPHORE*"),
        )
        .with_struct(
            StructLayout::new("TX_MUTEX", 40)
                .member("tx_mutex_id", 0, "u32")
                .member("tx_mutex_name", 4, "char*")
                .member("tx_mutex_ownership_count", 8, "u32")
                .member("tx_mutex_owner", 12, "TX_THREAD*")
                .member("tx_mutex_inherit", 16, "u32")
                .member("tx_mutex_original_priority", 20, "u32")
                .member("tx_mutex_suspension_list", 24, "TX_THREAD*")
                .member("tx_mutex_suspended_count", 28, "u32")
                .member("tx_mutex_created_next", 32, "TX_MUTEX*")
                .member("tx_mutex_created_previous", 36, "TX_MUTEX*"),
        )
        .with_struct(
            StructLayout::new("TX_QUEUE", 56)
                .member("tx_queue_id", 0, "u32")
                .member("tx_queue_name", 4, "char*")
                .member("tx_queue_message_size", 8, "u32")
                .member("tx_queue_capacity", 12, "u32")
                .member("tx_queue_enqueued", 16, "u32")
                .member("tx_queue_available_storage", 20, "u32")
                .member("tx_queue_start", 24, "u32*")
                .member("tx_queue_end", 28, "u32*")
                .member("tx_queue_read", 32, "u32*")
                .member("tx_queue_write", 36, "u32*")
                .member("tx_queue_suspension_list", 40, "TX_THREAD*")
                .member("tx_queue_suspended_count", 44, "u32")
                .member("tx_queue_created_next", 48, "TX_QUEUE*")
                .member("tx_queue_created_previous", 52, "TX_QUEUE*"),
        )
        .with_struct(
            StructLayout::new("TX_EVENT_FLAGS_GROUP", 32)
                .member("tx_event_flags_group_id", 0, "u32")
                .member("tx_event_flags_group_name", 4, "char*")
                .member("tx_event_flags_group_current", 8, "u32")
                .member("tx_event_flags_group_reset_search", 12, "u32")
                .member("tx_event_flags_group_suspension_list", 16, "TX_THREAD*")
                .member("tx_event_flags_group_suspended_count", 20, "u32")
                .member("tx_event_flags_group_created_next", 24, "TX_EVENT_FLAGS_GROUP*")
                .member("tx_event_flags_group_created_previous", 28, "TX_EVENT_FLAGS_GROUP*"),
        )
        .with_struct(
            StructLayout::new("TX_BYTE_POOL", 52)
                .member("tx_byte_pool_id", 0, "u32")
                .member("tx_byte_pool_name", 4, "char*")
                .member("tx_byte_pool_available", 8, "u32")
                .member("tx_byte_pool_fragments", 12, "u32")
                .member("tx_byte_pool_list", 16, "u8*")
                .member("tx_byte_pool_search", 20, "u8*")
                .member("tx_byte_pool_start", 24, "u8*")
                .member("tx_byte_pool_size", 28, "u32")
                .member("tx_byte_pool_owner", 32, "TX_THREAD*")
                .member("tx_byte_pool_suspension_list", 36, "TX_THREAD*")
                .member("tx_byte_pool_suspended_count", 40, "u32")
                .member("tx_byte_pool_created_next", 44, "TX_BYTE_POOL*")
                .member("tx_byte_pool_created_previous", 48, "TX_BYTE_POOL*"),
        )
        .with_struct(
            StructLayout::new("TX_BLOCK_POOL", 48)
                .member("tx_block_pool_id", 0, "u32")
                .member("tx_block_pool_name", 4, "char*")
                .member("tx_block_pool_available", 8, "u32")
                .member("tx_block_pool_total", 12, "u32")
                .member("tx_block_pool_available_list", 16, "u8*")
                .member("tx_block_pool_start", 20, "u8*")
                .member("tx_block_pool_size", 24, "u32")
                .member("tx_block_pool_block_size", 28, "u32")
                .member("tx_block_pool_suspension_list", 32, "TX_THREAD*")
                .member("tx_block_pool_suspended_count", 36, "u32")
                .member("tx_block_pool_created_next", 40, "TX_BLOCK_POOL*")
                .member("tx_block_pool_created_previous", 44, "TX_BLOCK_POOL*"),
        )
        .with_struct(
            StructLayout::new("TX_TIMER", 44)
                .member("tx_timer_id", 0, "u32")
                .member("tx_timer_name", 4, "char*")
                .member("tx_timer_internal", 8, "TX_TIMER_INTERNAL")
                .member("tx_timer_created_next", 36, "TX_TIMER*")
                .member("tx_timer_created_previous", 40, "TX_TIMER*"),
        )
        .with_struct(cortex_m_frame("TX_Frame", &std::iter::once("exc_return").chain(CALLEE_SAVED).collect::<Vec<_>>()))
        .with_global("_tx_thread_created_ptr", "TX_THREAD*")
        .with_global("_tx_thread_created_count", "u32")
        .with_global("_tx_thread_current_ptr", "TX_THREAD*")
        .with_global("_tx_thread_system_state", "u32")
        .with_global("_tx_semaphore_created_ptr", "TX_SEMAPHORE*")
        .with_global("_tx_mutex_created_ptr", "TX_MUTEX*")
        .with_global("_tx_queue_created_ptr", "TX_QUEUE*")
        .with_global("_tx_event_flags_created_ptr", "TX_EVENT_FLAGS_GROUP*")
        .with_global("_tx_byte_pool_created_ptr", "TX_BYTE_POOL*")
        .with_global("_tx_block_pool_created_ptr", "TX_BLOCK_POOL*")
        .with_global("_tx_timer_created_ptr", "TX_TIMER*")
}

/// Table over the created list headed by `_tx_{list}_created_ptr`, whose
/// members are named `{prefix}_...`.
fn created(id: &str, label: &str, list: &str, prefix: &str, object_type: &str) -> TableSpec {
    let source = Source::list(object_type, &format!("{prefix}_created_next"))
        .head(ListHead::new(&format!("_tx_{list}_created_ptr")))
        .circular();
    TableSpec::new(id, label, source)
        .column(ColumnSpec::address("address", "Address").primary())
        .column(ColumnSpec::member("name", "Name", &format!("{prefix}_name"), Format::Text))
}

fn threads() -> TableSpec {
    let states = Format::names([
        (0, "Ready"),
        (1, "Completed"),
        (2, "Terminated"),
        (3, "Suspended"),
        (4, "Sleeping"),
        (5, "Queue suspended"),
        (6, "Semaphore suspended"),
        (7, "Event flag suspended"),
        (8, "Block pool suspended"),
        (9, "Byte pool suspended"),
        (10, "I/O driver"),
        (11, "File"),
        (12, "TCP/IP"),
        (13, "Mutex suspended"),
        (14, "Priority change"),
    ]);
    created("threads", "Threads", "thread", "tx_thread", "TX_THREAD")
        .column(ColumnSpec::member("state", "State", "tx_thread_state", states))
        .column(ColumnSpec::matches("running", "Running", "_tx_thread_current_ptr", "yes", ""))
        .column(ColumnSpec::member("priority", "Priority", "tx_thread_priority", Format::Decimal))
        .column(ColumnSpec::member("threshold", "Preemption threshold", "tx_thread_preempt_threshold", Format::Decimal))
        .column(ColumnSpec::member("run_count", "Run count", "tx_thread_run_count", Format::Decimal))
        .column(ColumnSpec::member("stack_start", "Stack start", "tx_thread_stack_start", Format::Address))
        .column(ColumnSpec::member("stack_end", "Stack end", "tx_thread_stack_end", Format::Address))
        .column(ColumnSpec::member("stack_ptr", "Saved SP", "tx_thread_stack_ptr", Format::Address))
        .column(ColumnSpec::member("entry", "Entry", "tx_thread_entry", Format::Address))
}

fn semaphores() -> TableSpec {
    created("semaphores", "Semaphores", "semaphore", "tx_semaphore", "TX_SEMAPHORE")
        .column(ColumnSpec::member("count", "Count", "tx_semaphore_count", Format::Decimal))
        .column(ColumnSpec::member("waiting", "Suspended", "tx_semaphore_suspended_count", Format::Decimal))
        .column(ColumnSpec::member("first_waiter", "First waiter", "tx_semaphore_suspension_list", Format::Address))
}

fn mutexes() -> TableSpec {
    created("mutexes", "Mutexes", "mutex", "tx_mutex", "TX_MUTEX")
        .column(ColumnSpec::member("owner", "Owner", "tx_mutex_owner", Format::Address))
        .column(ColumnSpec::member("owner_name", "Owner name", "tx_mutex_owner->tx_thread_name", Format::Text))
        .column(ColumnSpec::member("count", "Ownership count", "tx_mutex_ownership_count", Format::Decimal))
        .column(ColumnSpec::member("inherit", "Inherit", "tx_mutex_inherit", Format::Decimal))
        .column(ColumnSpec::member("waiting", "Suspended", "tx_mutex_suspended_count", Format::Decimal))
}

fn queues() -> TableSpec {
    created("queues", "Queues", "queue", "tx_queue", "TX_QUEUE")
        .column(ColumnSpec::member("enqueued", "Enqueued", "tx_queue_enqueued", Format::Decimal))
        .column(ColumnSpec::member("capacity", "Capacity", "tx_queue_capacity", Format::Decimal))
        .column(ColumnSpec::member("message_size", "Message words", "tx_queue_message_size", Format::Decimal))
        .column(ColumnSpec::member("waiting", "Suspended", "tx_queue_suspended_count", Format::Decimal))
}

fn event_flags() -> TableSpec {
    created("event_flags", "Event flags", "event_flags", "tx_event_flags_group", "TX_EVENT_FLAGS_GROUP")
        .column(ColumnSpec::member("flags", "Flags", "tx_event_flags_group_current", Format::Hex))
        .column(ColumnSpec::member("waiting", "Suspended", "tx_event_flags_group_suspended_count", Format::Decimal))
}

fn byte_pools() -> TableSpec {
    created("byte_pools", "Byte pools", "byte_pool", "tx_byte_pool", "TX_BYTE_POOL")
        .column(ColumnSpec::member("start", "Start", "tx_byte_pool_start", Format::Address))
        .column(ColumnSpec::member("size", "Size", "tx_byte_pool_size", Format::Decimal))
        .column(ColumnSpec::member("available", "Available", "tx_byte_pool_available", Format::Decimal))
        .column(ColumnSpec::member("fragments", "Fragments", "tx_byte_pool_fragments", Format::Decimal))
}

fn block_pools() -> TableSpec {
    created("block_pools", "Block pools", "block_pool", "tx_block_pool", "TX_BLOCK_POOL")
        .column(ColumnSpec::member("start", "Start", "tx_block_pool_start", Format::Address))
        .column(ColumnSpec::member("block_size", "Block size", "tx_block_pool_block_size", Format::Decimal))
        .column(ColumnSpec::member("total", "Blocks", "tx_block_pool_total", Format::Decimal))
        .column(ColumnSpec::member("available", "Available", "tx_block_pool_available", Format::Decimal))
}

fn timers() -> TableSpec {
    created("timers", "Timers", "timer", "tx_timer", "TX_TIMER")
        .column(ColumnSpec::member(
            "remaining",
            "Remaining ticks",
            "tx_timer_internal.tx_timer_internal_remaining_ticks",
            Format::Decimal,
        ))
        .column(ColumnSpec::member(
            "reload",
            "Reload ticks",
            "tx_timer_internal.tx_timer_internal_re_initialize_ticks",
            Format::Decimal,
        ))
        .column(ColumnSpec::member(
            "callback",
            "Callback",
            "tx_timer_internal.tx_timer_internal_timeout_function",
            Format::Address,
        ))
}

pub fn threadx() -> KernelSpec {
    KernelSpec {
        name: "ThreadX".to_string(),
        required_symbols: ["_tx_thread_created_ptr", "_tx_thread_current_ptr", "_tx_thread_system_state"]
            .map(String::from)
            .to_vec(),
        // The system state is also 0 before tx_kernel_enter runs; the created
        // list is what tells that case apart.
        running: vec![
            RunningCheck::new("_tx_thread_system_state", Expect::NotEquals(INITIALIZE_IN_PROGRESS)),
            RunningCheck::new("_tx_thread_created_ptr", Expect::NonZero),
        ],
        types: types(),
        tables: vec![
            threads(),
            semaphores(),
            mutexes(),
            queues(),
            event_flags(),
            byte_pools(),
            block_pools(),
            timers(),
        ],
        context: Some(ContextSpec::new("TX_THREAD", "tx_thread_stack_ptr", "TX_Frame")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_lists_are_circular() {
        for table in threadx().tables {
            let Source::List { circular, next, .. } = &table.source else {
                panic!("{} is not a list", table.id);
            };
            assert!(circular);
            assert!(next.ends_with("_created_next"));
        }
    }

    #[test]
    fn test_context_frame_starts_with_exc_return() {
        let types = types();
        let frame = types.layout("TX_Frame").unwrap();
        assert_eq!(frame.size, 68);
        assert_eq!(frame.members[0].name, "exc_return");
        assert_eq!(frame.find("pc").unwrap().offset, 60);
    }
}
