//! Uncaught exception interceptor.
//!
//! A panic that ends the process is this process's uncaught exception: one
//! on the main thread, or any panic when the panic strategy is abort. The
//! interceptor sits in the panic hook. It writes an `UncaughtException`
//! record and then calls the hook that was installed before it, so the usual
//! message and unwinding (or abort) still happen.
//!
//! Panics on other threads are survivable (the thread dies, or a joiner or
//! `catch_unwind` recovers) and are skipped unless the target opts in with
//! [`CrashTarget::with_recovered_panics`]. The hook runs before unwinding, so
//! a `catch_unwind` on the main thread cannot be told apart and is recorded.

use std::any::Any;
use std::fmt;
use std::panic;
use std::sync::{Arc, Once, RwLock};
use std::thread;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::CrashTarget;
use crate::record::{CrashKind, RecordId};
use crate::report::exception_body;

/// Name the runtime gives the main thread.
const MAIN_THREAD_NAME: &str = "main";

/// Name used for panics raised with a plain message.
pub const PANIC_NAME: &str = "panic";

static INSTALL: Once = Once::new();

static TARGET: RwLock<Option<Arc<CrashTarget>>> = RwLock::new(None);

/// An exception as it appears in a crash record.
///
/// Raising one with [`std::panic::panic_any`] controls the name, reason and
/// stack that get recorded:
///
/// ```no_run
/// use crashlog::UncaughtException;
///
/// std::panic::panic_any(UncaughtException::new("TestException", "boom"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncaughtException {
    name: String,
    reason: String,
    call_stack: Vec<String>,
}

impl UncaughtException {
    /// An exception without a call stack; one is captured when it is
    /// recorded.
    #[must_use]
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
            call_stack: Vec::new(),
        }
    }

    /// Attach already-symbolicated stack lines, e.g. from a bridged runtime.
    #[must_use]
    pub fn with_call_stack(mut self, call_stack: Vec<String>) -> Self {
        self.call_stack = call_stack;
        self
    }

    /// Exception name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Stack lines, outermost call last.
    #[must_use]
    pub fn call_stack(&self) -> &[String] {
        &self.call_stack
    }

    /// Interpret a panic payload.
    ///
    /// An `UncaughtException` payload is taken as is. String payloads become
    /// a [`PANIC_NAME`] exception with the message as reason; anything else
    /// gets a placeholder reason.
    #[must_use]
    pub fn from_panic_payload(payload: &(dyn Any + Send)) -> Self {
        if let Some(exception) = payload.downcast_ref::<Self>() {
            return exception.clone();
        }
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Box<dyn Any>".to_string());
        Self::new(PANIC_NAME, reason)
    }
}

impl fmt::Display for UncaughtException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.reason)
    }
}

impl std::error::Error for UncaughtException {}

/// Install the panic hook, or retarget it if already installed.
pub fn install(target: &CrashTarget) {
    match TARGET.write() {
        Ok(mut current) => *current = Some(Arc::new(target.clone())),
        Err(poisoned) => *poisoned.into_inner() = Some(Arc::new(target.clone())),
    }

    let mut first = false;
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            on_panic(info.payload());
            previous(info);
        }));
        first = true;
    });

    if first {
        info!("Exception interceptor installed");
    } else {
        debug!("Exception interceptor already installed, target replaced");
    }
}

/// Whether the panic hook is in place.
#[must_use]
pub fn is_installed() -> bool {
    INSTALL.is_completed()
}

/// Record `exception` through the installed target.
///
/// Returns `None` when nothing is installed or the write failed. Hosts can
/// use this to record exceptions bridged from another runtime.
pub fn capture(exception: &UncaughtException) -> Option<RecordId> {
    let target = current_target()?;
    record(&target, exception)
}

/// Whether a panic on a thread named `thread_name` takes the process down.
#[must_use]
pub fn panic_ends_process(thread_name: Option<&str>, aborts: bool) -> bool {
    aborts || thread_name == Some(MAIN_THREAD_NAME)
}

fn on_panic(payload: &(dyn Any + Send)) {
    let Some(target) = current_target() else {
        return;
    };

    let current = thread::current();
    if !target.record_recovered_panics
        && !panic_ends_process(current.name(), cfg!(panic = "abort"))
    {
        debug!(
            "Panic on thread {} is recoverable, not recorded",
            current.name().unwrap_or("<unnamed>")
        );
        return;
    }

    record(&target, &UncaughtException::from_panic_payload(payload));
}

fn current_target() -> Option<Arc<CrashTarget>> {
    TARGET.read().ok().and_then(|current| current.clone())
}

fn record(target: &CrashTarget, exception: &UncaughtException) -> Option<RecordId> {
    let mut exception = exception.clone();
    if exception.call_stack.is_empty() {
        exception.call_stack = current_stack(target.max_frames);
    }

    let body = exception_body(&target.header, Utc::now(), &exception);
    let id = target.store.save(CrashKind::UncaughtException, &body);
    match &id {
        Some(id) => warn!("Recorded uncaught exception {} as {}", exception.name(), id),
        None => warn!("Failed to record uncaught exception {}", exception.name()),
    }
    id
}

/// Symbolicated stack of the calling thread, one line per frame.
fn current_stack(max_frames: usize) -> Vec<String> {
    let trace = backtrace::Backtrace::new();
    trace
        .frames()
        .iter()
        .take(max_frames)
        .enumerate()
        .map(|(index, frame)| {
            let symbol = frame
                .symbols()
                .first()
                .and_then(backtrace::BacktraceSymbol::name)
                .map_or_else(|| "???".to_string(), |name| name.to_string());
            format!("{index:<4}0x{:016x} {symbol}", frame.ip() as usize)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_exception_is_kept() {
        let raised = UncaughtException::new("TestException", "boom")
            .with_call_stack(vec!["0 main".to_string()]);
        let payload: Box<dyn Any + Send> = Box::new(raised.clone());

        assert_eq!(UncaughtException::from_panic_payload(&*payload), raised);
    }

    #[test]
    fn test_payload_str_message() {
        let payload: Box<dyn Any + Send> = Box::new("index out of bounds");
        let exception = UncaughtException::from_panic_payload(&*payload);

        assert_eq!(exception.name(), PANIC_NAME);
        assert_eq!(exception.reason(), "index out of bounds");
    }

    #[test]
    fn test_payload_formatted_message() {
        let payload: Box<dyn Any + Send> = Box::new(format!("bad value {}", 7));
        let exception = UncaughtException::from_panic_payload(&*payload);
        assert_eq!(exception.reason(), "bad value 7");
    }

    #[test]
    fn test_payload_opaque() {
        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        let exception = UncaughtException::from_panic_payload(&*payload);
        assert_eq!(exception.name(), PANIC_NAME);
        assert!(!exception.reason().is_empty());
    }

    #[test]
    fn test_main_thread_panic_ends_process() {
        assert!(panic_ends_process(Some("main"), false));
        assert!(panic_ends_process(Some("main"), true));
    }

    #[test]
    fn test_worker_panic_is_recoverable() {
        assert!(!panic_ends_process(Some("crashlog-sweep"), false));
        assert!(!panic_ends_process(None, false));
    }

    #[test]
    fn test_abort_strategy_makes_every_panic_fatal() {
        assert!(panic_ends_process(Some("worker"), true));
        assert!(panic_ends_process(None, true));
    }

    #[test]
    fn test_display() {
        let exception = UncaughtException::new("TestException", "boom");
        assert_eq!(exception.to_string(), "TestException: boom");
    }

    #[test]
    fn test_current_stack_respects_depth() {
        let stack = current_stack(3);
        assert!(!stack.is_empty());
        assert!(stack.len() <= 3);
        assert!(stack[0].starts_with("0   0x"));
    }
}
