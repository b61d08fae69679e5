//! Startup sweep behaviour as seen by a host.

use std::sync::mpsc;
use std::time::Duration;

use chrono::Utc;
use crashlog::{Config, CrashCapture, CrashKind};

fn create_test_capture(dir: &tempfile::TempDir) -> CrashCapture {
    let mut config = Config::default();
    config.app.identifier = "com.example.notes".to_string();
    config.storage.crash_root = Some(dir.path().join("crashes"));
    config.capture.signals_enabled = false;
    config.capture.exceptions_enabled = false;
    CrashCapture::new(config).unwrap()
}

fn seed(capture: &CrashCapture, records: &[(CrashKind, i64, &str)]) {
    // One base instant keeps distinct offsets on distinct stamps
    let now = Utc::now();
    for (kind, seconds_ago, body) in records {
        let at = now - chrono::Duration::seconds(*seconds_ago);
        capture.store().save_at(*kind, body, at).unwrap();
    }
}

#[test]
fn test_three_records_notify_host() {
    let dir = tempfile::tempdir().unwrap();
    let capture = create_test_capture(&dir);
    seed(
        &capture,
        &[
            (CrashKind::Signal, 0, "first"),
            (CrashKind::Signal, 1, "second"),
            (CrashKind::UncaughtException, 0, "third"),
        ],
    );

    let (tx, rx) = mpsc::channel();
    let report = capture
        .start(move |records| tx.send(records.to_vec()).unwrap())
        .unwrap()
        .wait()
        .unwrap();

    assert!(report.notified);
    let mut delivered = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    delivered.sort();
    assert_eq!(delivered, vec!["first", "second", "third"]);
}

#[test]
fn test_two_records_stay_quiet() {
    let dir = tempfile::tempdir().unwrap();
    let capture = create_test_capture(&dir);
    seed(
        &capture,
        &[
            (CrashKind::Signal, 0, "first"),
            (CrashKind::UncaughtException, 0, "second"),
        ],
    );

    let report = capture.start(|_| panic!("not expected")).unwrap().wait().unwrap();
    assert!(!report.notified);
    assert_eq!(report.records.len(), 2);
}

#[test]
fn test_stale_record_purges_store() {
    let dir = tempfile::tempdir().unwrap();
    let capture = create_test_capture(&dir);
    seed(
        &capture,
        &[
            (CrashKind::Signal, 20, "old"),
            (CrashKind::Signal, 0, "new"),
            (CrashKind::UncaughtException, 0, "new"),
        ],
    );

    let report = capture.start(|_| {}).unwrap().wait().unwrap();
    assert!(report.purged);
    assert!(report.records.is_empty());
    assert_eq!(capture.store().count(), 0);
}

#[tokio::test]
async fn test_outcome_in_async_host() {
    let dir = tempfile::tempdir().unwrap();
    let capture = create_test_capture(&dir);
    seed(&capture, &[(CrashKind::Signal, 0, "only")]);

    let report = capture.start(|_| {}).unwrap().outcome().await.unwrap();
    assert_eq!(report.records, vec!["only".to_string()]);
    assert!(!report.purged);
}
