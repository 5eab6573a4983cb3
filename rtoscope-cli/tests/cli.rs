use rtoscope_core::{Address, MemoryImage, Snapshot};
use std::process::Command;
use tempfile::TempDir;

/// A uC/OS-III snapshot with a single running task, written to
/// `snapshot.json` in a directory removed on drop.
fn snapshot() -> TempDir {
    let mut snapshot = Snapshot::default();
    let mut memory = MemoryImage::new();
    for (i, symbol) in ["OSRunning", "OSTCBCurPtr", "OSTaskDbgListPtr", "OSSemDbgListPtr"].iter().enumerate() {
        let address = Address::new(0x2000_0000 + i as u64 * 4);
        snapshot.symbols.insert((*symbol).to_string(), address);
        memory.zero(address, 4);
    }
    memory.write_u8(Address::new(0x2000_0000), 1);
    memory.write_u32(Address::new(0x2000_0004), 0x2000_1000);
    memory.write_u32(Address::new(0x2000_0008), 0x2000_1000);
    memory.zero(Address::new(0x2000_1000), 128);
    memory.write_u32(Address::new(0x2000_1000), 0x2000_5000);
    memory.zero(Address::new(0x2000_5000), 64);
    memory.write_u32(Address::new(0x2000_5038), 0x0800_0123);
    memory.write_u32(Address::new(0x2000_100c), 0x2000_3000);
    memory.write_str(Address::new(0x2000_3000), "App Task", 16);
    snapshot.memory = memory;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    snapshot.save(&dir.path().join("snapshot.json")).expect("Failed to write snapshot");
    dir
}

fn rtoscope(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_rtoscope")).args(args).output().expect("Failed to run rtoscope")
}

#[test]
fn test_cli_help() {
    let output = rtoscope(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage: rtoscope"));
}

#[test]
fn test_kernels_lists_builtins() {
    let output = rtoscope(&["kernels"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for kernel in ["FreeRTOS", "ThreadX", "uC/OS-III"] {
        assert!(stdout.contains(kernel), "{kernel} missing from {stdout}");
    }
}

#[test]
fn test_detect_and_tables_from_snapshot() {
    let dir = snapshot();
    let path = dir.path().join("snapshot.json");
    let path = path.to_str().expect("utf-8 temp path");

    let output = rtoscope(&["--snapshot", path, "detect"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "uC/OS-III: initialised");

    let output = rtoscope(&["--snapshot", path, "tables", "--table", "tasks", "--json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let views: serde_json::Value = serde_json::from_slice(&output.stdout).expect("JSON output");
    assert_eq!(views[0]["table"], "tasks");
    assert_eq!(views[0]["records"][0]["cells"][1]["value"], "App Task");

    let output = rtoscope(&["--snapshot", path, "tables", "--table", "threads"]);
    assert!(!output.status.success());
}

#[test]
fn test_context_of_task() {
    let dir = snapshot();
    let path = dir.path().join("snapshot.json");
    let path = path.to_str().expect("utf-8 temp path");

    let output = rtoscope(&["--snapshot", path, "context", "0x20001000"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().map(str::trim).collect();
    assert_eq!(lines.len(), 17);
    assert!(lines.contains(&"pc 0x08000123"), "{stdout}");
    assert_eq!(lines.last(), Some(&"sp 0x20005040"));
}

#[test]
fn test_no_target() {
    let output = rtoscope(&["detect"]);
    assert!(!output.status.success());
}
