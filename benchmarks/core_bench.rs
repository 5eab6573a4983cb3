use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rtoscope_core::kernel::{ucos3, SpecProvider};
use rtoscope_core::target::StructLayout;
use rtoscope_core::{Address, LayoutTarget, Limits, ListWalk, MemoryImage, OsProvider, SymbolTable, TypeRegistry};

const NODES: u64 = 1000;
const BASE: u64 = 0x2000_0000;

fn linked_nodes() -> LayoutTarget<MemoryImage> {
    let types = TypeRegistry::new()
        .with_struct(StructLayout::new("node", 8).member("next", 0, "node*").member("value", 4, "u32"))
        .with_global("head", "node*");
    let mut symbols = SymbolTable::new();
    symbols.insert("head", Address::new(BASE - 4));

    let mut memory = MemoryImage::new();
    memory.write_u32(Address::new(BASE - 4), BASE as u32);
    for i in 0..NODES {
        let at = BASE + i * 8;
        let next = if i + 1 == NODES { 0 } else { at + 8 };
        memory.write_u32(Address::new(at), next as u32);
        memory.write_u32(Address::new(at + 4), i as u32);
    }
    LayoutTarget::new(symbols, types, memory)
}

/// uC/OS-III with `NODES` tasks on its debug list.
fn busy_kernel() -> LayoutTarget<MemoryImage> {
    let mut symbols = SymbolTable::new();
    let mut memory = MemoryImage::new();
    for (i, name) in ["OSRunning", "OSTCBCurPtr", "OSTaskDbgListPtr", "OSSemDbgListPtr"].iter().enumerate() {
        let address = Address::new(0x1000_0000 + i as u64 * 4);
        symbols.insert(name, address);
        memory.zero(address, 4);
    }
    memory.write_u8(Address::new(0x1000_0000), 1);
    memory.write_u32(Address::new(0x1000_0008), BASE as u32);
    memory.write_str(Address::new(0x1000_1000), "worker", 8);
    for i in 0..NODES {
        let at = BASE + i * 128;
        let next = if i + 1 == NODES { 0 } else { at + 128 };
        memory.zero(Address::new(at), 128);
        memory.write_u32(Address::new(at + 12), 0x1000_1000);
        memory.write_u32(Address::new(at + 120), next as u32);
    }
    LayoutTarget::new(symbols, ucos3().types, memory)
}

fn bench_list_walk(c: &mut Criterion) {
    let mut target = linked_nodes();
    c.bench_function("list_walk_1000", |b| {
        b.iter(|| {
            let walk = ListWalk::new(&mut target, Address::new(BASE), "node", "next");
            black_box(walk.filter_map(Result::ok).count())
        });
    });
}

fn bench_task_table(c: &mut Criterion) {
    let mut target = busy_kernel();
    let provider = SpecProvider::new(ucos3(), Limits::default()).expect("built-in spec is valid");
    let model = provider.data_model();
    c.bench_function("ucos3_tasks_1000", |b| {
        b.iter(|| black_box(model.refresh_table("tasks", &mut target)));
    });
}

criterion_group!(benches, bench_list_walk, bench_task_table);
criterion_main!(benches);
