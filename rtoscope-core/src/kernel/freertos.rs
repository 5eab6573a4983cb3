//! FreeRTOS 10.x.
//!
//! Tasks live in `List_t` lists whose items are embedded in the TCB
//! (`xStateListItem`); the `pvOwner` of each item points back at the TCB.
//! Every list ends at its own `xListEnd` marker, which is never a task.

use super::spec::{ColumnSpec, ContextSpec, Expect, Format, KernelSpec, ListHead, RunningCheck, Source, TableSpec};
use super::{cortex_m_frame, CALLEE_SAVED};
use crate::target::{StructLayout, TypeRegistry};

/// `configMAX_PRIORITIES`.
const MAX_PRIORITIES: usize = 5;
/// `configQUEUE_REGISTRY_SIZE`.
const QUEUE_REGISTRY_SIZE: usize = 8;

fn types() -> TypeRegistry {
    TypeRegistry::new()
        .with_struct(
            StructLayout::new("ListItem_t", 20)
                .member("xItemValue", 0, "u32")
                .member("pxNext", 4, "ListItem_t*")
                .member("pxPrevious", 8, "ListItem_t*")
                .member("pvOwner", 12, "void*")
                .member("pvContainer", 16, "List_t*"),
        )
        .with_struct(
            StructLayout::new("MiniListItem_t", 12)
                .member("xItemValue", 0, "u32")
                .member("pxNext", 4, "ListItem_t*")
                .member("pxPrevious", 8, "ListItem_t*"),
        )
        .with_struct(
            StructLayout::new("List_t", 20)
                .member("uxNumberOfItems", 0, "u32")
                .member("pxIndex", 4, "ListItem_t*")
                .member("xListEnd", 8, "MiniListItem_t"),
        )
        .with_struct(
            StructLayout::new("TCB_t", 92)
                .member("pxTopOfStack", 0, "u32*")
                .member("xStateListItem", 4, "ListItem_t")
                .member("xEventListItem", 24, "ListItem_t")
                .member("uxPriority", 44, "u32")
                .member("pxStack", 48, "u32*")
                .member("pcTaskName", 52, "char[16]")
                .member("uxTCBNumber", 68, "u32")
                .member("uxTaskNumber", 72, "u32")
                .member("uxBasePriority", 76, "u32")
                .member("uxMutexesHeld", 80, "u32")
                .member("ulNotifiedValue", 84, "u32")
                .member("ucNotifyState", 88, "u8"),
        )
        .with_struct(
            StructLayout::new("QueueRegistryItem_t", 8)
                .member("pcQueueName", 0, "char*")
                .member("xHandle", 4, "Queue_t*"),
        )
        .with_struct(
            StructLayout::new("Queue_t", 80)
                .member("pcHead", 0, "i8*")
                .member("pcWriteTo", 4, "i8*")
                .member("xTasksWaitingToSend", 16, "List_t")
                .member("xTasksWaitingToReceive", 36, "List_t")
                .member("uxMessagesWaiting", 56, "u32")
                .member("uxLength", 60, "u32")
                .member("uxItemSize", 64, "u32")
                .member("cRxLock", 68, "i8")
                .member("cTxLock", 69, "i8")
                .member("uxQueueNumber", 72, "u32")
                .member("ucQueueType", 76, "u8"),
        )
        .with_struct(
            StructLayout::new("Timer_t", 44)
                .member("pcTimerName", 0, "char*")
                .member("xTimerListItem", 4, "ListItem_t")
                .member("xTimerPeriodInTicks", 24, "u32")
                .member("pvTimerID", 28, "void*")
                .member("pxCallbackFunction", 32, "void*")
                .member("uxTimerNumber", 36, "u32")
                .member("ucStatus", 40, "u8"),
        )
        .with_struct(cortex_m_frame("FreeRTOS_Frame", &CALLEE_SAVED))
        .with_global("pxCurrentTCB", "TCB_t*")
        .with_global("pxReadyTasksLists", &format!("List_t[{MAX_PRIORITIES}]"))
        .with_global("xDelayedTaskList1", "List_t")
        .with_global("xDelayedTaskList2", "List_t")
        .with_global("xPendingReadyList", "List_t")
        .with_global("xSuspendedTaskList", "List_t")
        .with_global("xTasksWaitingTermination", "List_t")
        .with_global("xSchedulerRunning", "i32")
        .with_global("uxCurrentNumberOfTasks", "u32")
        .with_global("xTickCount", "u32")
        .with_global("xQueueRegistry", &format!("QueueRegistryItem_t[{QUEUE_REGISTRY_SIZE}]"))
        .with_global("xActiveTimerList1", "List_t")
        .with_global("xActiveTimerList2", "List_t")
}

/// Head of the task list `list`, tagged with the state its tasks are in.
fn task_list(list: &str, state: &str) -> ListHead {
    ListHead::new(&format!("{list}.xListEnd.pxNext")).sentinel(&format!("&{list}.xListEnd")).tag(state)
}

fn tasks() -> TableSpec {
    let source = Source::list("ListItem_t", "pxNext")
        .head(task_list("pxReadyTasksLists[{i}]", "Ready").repeat_over("pxReadyTasksLists"))
        .head(task_list("xPendingReadyList", "Ready"))
        .head(task_list("xDelayedTaskList1", "Blocked"))
        .head(task_list("xDelayedTaskList2", "Blocked"))
        .head(task_list("xSuspendedTaskList", "Suspended"))
        .head(task_list("xTasksWaitingTermination", "Deleted"))
        .owned_by("pvOwner", "TCB_t");

    TableSpec::new("tasks", "Tasks", source)
        .column(ColumnSpec::address("tcb", "TCB").primary())
        .column(ColumnSpec::member("name", "Name", "pcTaskName", Format::Text))
        .column(ColumnSpec::tag("state", "State"))
        .column(ColumnSpec::matches("running", "Running", "pxCurrentTCB", "yes", ""))
        .column(ColumnSpec::member("priority", "Priority", "uxPriority", Format::Decimal))
        .column(ColumnSpec::member("base_priority", "Base priority", "uxBasePriority", Format::Decimal))
        .column(ColumnSpec::member("stack_base", "Stack base", "pxStack", Format::Address))
        .column(ColumnSpec::member("stack_top", "Saved SP", "pxTopOfStack", Format::Address))
        .column(ColumnSpec::member("waiting_on", "Waiting on", "xEventListItem.pvContainer", Format::Address))
        .column(ColumnSpec::member("number", "Number", "uxTCBNumber", Format::Decimal))
}

fn queues() -> TableSpec {
    let source = Source::indexed("&xQueueRegistry[{i}]", QUEUE_REGISTRY_SIZE, "QueueRegistryItem_t").skip_null("xHandle");
    let kinds = Format::names([
        (0, "Queue"),
        (1, "Mutex"),
        (2, "Counting semaphore"),
        (3, "Binary semaphore"),
        (4, "Recursive mutex"),
    ]);

    TableSpec::new("queues", "Queues", source)
        .column(ColumnSpec::member("handle", "Handle", "xHandle", Format::Address).primary())
        .column(ColumnSpec::member("name", "Name", "pcQueueName", Format::Text))
        .column(ColumnSpec::member("type", "Type", "xHandle->ucQueueType", kinds))
        .column(ColumnSpec::member("waiting", "Messages", "xHandle->uxMessagesWaiting", Format::Decimal))
        .column(ColumnSpec::member("length", "Length", "xHandle->uxLength", Format::Decimal))
        .column(ColumnSpec::member("item_size", "Item size", "xHandle->uxItemSize", Format::Decimal))
        .column(ColumnSpec::member(
            "senders",
            "Blocked senders",
            "xHandle->xTasksWaitingToSend.uxNumberOfItems",
            Format::Decimal,
        ))
        .column(ColumnSpec::member(
            "receivers",
            "Blocked receivers",
            "xHandle->xTasksWaitingToReceive.uxNumberOfItems",
            Format::Decimal,
        ))
}

fn timers() -> TableSpec {
    let timer_list = |list: &str| ListHead::new(&format!("{list}.xListEnd.pxNext")).sentinel(&format!("&{list}.xListEnd"));
    let source = Source::list("ListItem_t", "pxNext")
        .head(timer_list("xActiveTimerList1"))
        .head(timer_list("xActiveTimerList2"))
        .owned_by("pvOwner", "Timer_t");

    TableSpec::new("timers", "Timers", source)
        .column(ColumnSpec::address("timer", "Timer").primary())
        .column(ColumnSpec::member("name", "Name", "pcTimerName", Format::Text))
        .column(ColumnSpec::member("period", "Period", "xTimerPeriodInTicks", Format::Decimal))
        .column(ColumnSpec::member("expiry", "Expires at", "xTimerListItem.xItemValue", Format::Decimal))
        .column(ColumnSpec::member("callback", "Callback", "pxCallbackFunction", Format::Address))
        .column(ColumnSpec::member("status", "Status", "ucStatus", Format::Hex))
}

pub fn freertos() -> KernelSpec {
    KernelSpec {
        name: "FreeRTOS".to_string(),
        required_symbols: ["pxCurrentTCB", "pxReadyTasksLists", "xSchedulerRunning", "uxCurrentNumberOfTasks"]
            .map(String::from)
            .to_vec(),
        running: vec![RunningCheck::new("xSchedulerRunning", Expect::NonZero)],
        types: types(),
        tables: vec![tasks(), queues(), timers()],
        context: Some(ContextSpec::new("TCB_t", "pxTopOfStack", "FreeRTOS_Frame")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_lists_cover_every_priority() {
        let spec = freertos();
        let Source::List { heads, .. } = &spec.table("tasks").unwrap().source else {
            panic!("tasks come from lists");
        };
        assert_eq!(heads[0].repeat_over.as_deref(), Some("pxReadyTasksLists"));
        assert_eq!(heads[0].sentinel.as_deref(), Some("&pxReadyTasksLists[{i}].xListEnd"));
    }

    #[test]
    fn test_tcb_offsets() {
        let types = types();
        assert_eq!(types.resolve_path("TCB_t", "uxPriority").unwrap().0, 44);
        assert_eq!(types.resolve_path("TCB_t", "pcTaskName").unwrap().0, 52);
        assert_eq!(types.resolve_path("TCB_t", "xEventListItem.pvContainer").unwrap().0, 40);
        assert_eq!(types.resolve_path("List_t", "xListEnd.pxNext").unwrap().0, 12);
    }
}
