//! A fatal signal leaves a record and still kills the process.
//!
//! The crash happens in a child copy of this test binary, selected through
//! an environment variable.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Command;

use crashlog::{Config, CrashCapture, CrashKind, CrashStore};

const CHILD_ROOT_ENV: &str = "CRASHLOG_TEST_CHILD_ROOT";

fn crash_here(root: &Path) -> ! {
    let mut config = Config::default();
    config.app.identifier = "com.example.notes".to_string();
    config.app.name = Some("Notes".to_string());
    config.app.short_version = Some("2.4.1".to_string());
    config.app.build = Some("812".to_string());
    config.storage.crash_root = Some(root.to_path_buf());

    let capture = CrashCapture::new(config).unwrap();
    capture.install_interceptors().unwrap();
    std::process::abort();
}

#[test]
fn test_fatal_signal_leaves_record() {
    if let Some(root) = std::env::var_os(CHILD_ROOT_ENV) {
        crash_here(Path::new(&root));
    }

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("crashes");
    let status = Command::new(std::env::current_exe().unwrap())
        .args(["--exact", "test_fatal_signal_leaves_record", "--test-threads=1"])
        .env(CHILD_ROOT_ENV, &root)
        .output()
        .unwrap()
        .status;

    assert_eq!(status.signal(), Some(libc::SIGABRT), "child status {status:?}");

    let store = CrashStore::new(&root);
    assert!(store.list(CrashKind::UncaughtException).is_empty());
    let ids = store.list(CrashKind::Signal);
    assert_eq!(ids.len(), 1);
    assert!(ids[0].timestamp().is_some());

    let body = store.read(CrashKind::Signal, &ids[0]).unwrap();
    assert!(body.starts_with("App: Notes\nVersion: 2.4.1 (812)\nDevice: "));
    assert!(body.contains("\nDateTime: "));
    assert!(body.contains("\nStack:\nslideAddress:0x"));
    assert!(body.lines().count() > 8, "no frames in\n{body}");

    // Nothing half-written is left behind
    let leftovers = std::fs::read_dir(store.partition_dir(CrashKind::Signal))
        .unwrap()
        .count();
    assert_eq!(leftovers, 1);
}
