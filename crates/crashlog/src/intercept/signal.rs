//! Fatal signal interceptor.
//!
//! One handler is registered for the signals that mean the process cannot
//! continue. When it fires it writes a `Signal` record and then hands the
//! signal back to whatever disposition was installed before, so the process
//! dies (or the other library reacts) exactly as it would have without us.
//!
//! # Restricted context
//!
//! The handler runs on the faulting thread, possibly while that thread holds
//! the allocator lock. It therefore only touches memory prepared in advance:
//! the rendered header and partition path live in a leaked [`SignalTarget`],
//! the output buffers are statics. Stack walking and `dladdr` are not on the
//! POSIX async-signal-safe list; like the file write itself they are accepted
//! as the price of getting a record at all.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::ffi::{c_void, CStr};
use std::fmt::Write as _;
use std::os::unix::ffi::OsStrExt;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::{Mutex, OnceLock};

use tracing::{debug, info, warn};

use super::fault::{CivilTime, FaultContext, ScratchBuf};
use super::{CrashTarget, MAX_FRAMES};
use crate::error::{Error, Result};
use crate::record::{CrashKind, RECORD_SUFFIX};
use crate::report::{DATE_TIME_LABEL, SLIDE_LABEL, STACK_HEADING};
use crate::storage::{TEMP_PREFIX, TEMP_SUFFIX};

/// Signals that indicate an unrecoverable process state.
pub const FATAL_SIGNALS: [(libc::c_int, &str); 7] = [
    (libc::SIGILL, "SIGILL"),
    (libc::SIGSEGV, "SIGSEGV"),
    (libc::SIGBUS, "SIGBUS"),
    (libc::SIGTRAP, "SIGTRAP"),
    (libc::SIGABRT, "SIGABRT"),
    (libc::SIGFPE, "SIGFPE"),
    (libc::SIGSYS, "SIGSYS"),
];

/// Capacity of the record body buffer.
const BODY_CAPACITY: usize = 64 * 1024;

/// Capacity of each path buffer.
const PATH_CAPACITY: usize = 4096;

/// Room a record path needs beyond its partition directory.
const NAME_RESERVE: usize = 64;

/// Everything the handler needs that depends on configuration.
struct SignalTarget {
    header: Box<[u8]>,
    root: Box<[u8]>,
    partition: Box<[u8]>,
    slide: usize,
    max_frames: usize,
}

/// Output buffers for the handler, reserved in the binary image.
struct Scratch {
    body: UnsafeCell<[u8; BODY_CAPACITY]>,
    pending: UnsafeCell<[u8; PATH_CAPACITY]>,
    target: UnsafeCell<[u8; PATH_CAPACITY]>,
    dir: UnsafeCell<[u8; PATH_CAPACITY]>,
    frames: UnsafeCell<[usize; MAX_FRAMES]>,
}

// SAFETY: the buffers are only touched by the thread that won `HANDLING`.
unsafe impl Sync for Scratch {}

static SCRATCH: Scratch = Scratch {
    body: UnsafeCell::new([0; BODY_CAPACITY]),
    pending: UnsafeCell::new([0; PATH_CAPACITY]),
    target: UnsafeCell::new([0; PATH_CAPACITY]),
    dir: UnsafeCell::new([0; PATH_CAPACITY]),
    frames: UnsafeCell::new([0; MAX_FRAMES]),
};

/// Current target. Replaced targets are leaked, a handler may still be
/// reading them.
static TARGET: AtomicPtr<SignalTarget> = AtomicPtr::new(ptr::null_mut());

/// Set by the first thread to enter the handler; never cleared.
static HANDLING: AtomicBool = AtomicBool::new(false);

/// Dispositions that were in place before ours, one per fatal signal.
static PREVIOUS: OnceLock<Vec<(libc::c_int, libc::sigaction)>> = OnceLock::new();

static INSTALL_LOCK: Mutex<()> = Mutex::new(());

/// Install the signal interceptor, or retarget it if already installed.
///
/// # Errors
///
/// Returns an error if the crash root path is too long for the handler's
/// buffers or a handler cannot be registered. On registration failure every
/// handler registered so far is rolled back.
pub fn install(target: &CrashTarget) -> Result<()> {
    let _guard = INSTALL_LOCK
        .lock()
        .map_err(|_| Error::internal("signal install lock poisoned"))?;

    let next = Box::into_raw(Box::new(prepare_target(target)?));
    let previous = TARGET.swap(next, Ordering::AcqRel);

    if PREVIOUS.get().is_some() {
        debug!("Signal interceptor already installed, target replaced");
        return Ok(());
    }

    if let Err(e) = register_handlers() {
        TARGET.store(previous, Ordering::Release);
        // SAFETY: `next` came from Box::into_raw above and no handler is
        // registered that could have observed it.
        drop(unsafe { Box::from_raw(next) });
        return Err(e);
    }

    info!(
        "Signal interceptor installed for {} signals",
        FATAL_SIGNALS.len()
    );
    Ok(())
}

/// Whether the handlers are registered.
#[must_use]
pub fn is_installed() -> bool {
    PREVIOUS.get().is_some()
}

fn prepare_target(target: &CrashTarget) -> Result<SignalTarget> {
    let root = target.store.root().as_os_str().as_bytes();
    let partition = target.store.partition_dir(CrashKind::Signal);
    let partition = partition.as_os_str().as_bytes();

    if partition.len() + NAME_RESERVE > PATH_CAPACITY || root.contains(&0) {
        return Err(Error::internal(format!(
            "crash root {} cannot be used from the fault handler",
            target.store.root().display()
        )));
    }

    if let Err(e) = target.store.ensure_partition(CrashKind::Signal) {
        // The handler retries the mkdir itself
        warn!("Cannot prepare signal partition: {}", e);
    }

    // Load the unwinder before a fault needs it
    backtrace::trace(|_| false);

    Ok(SignalTarget {
        header: target.header.prefix().as_bytes().into(),
        root: root.into(),
        partition: partition.into(),
        slide: image_slide(),
        max_frames: target.max_frames.min(MAX_FRAMES),
    })
}

fn register_handlers() -> Result<()> {
    let mut previous = Vec::with_capacity(FATAL_SIGNALS.len());

    for (sig, name) in FATAL_SIGNALS {
        // SAFETY: a zeroed sigaction is a valid "query" buffer and a valid
        // starting point for ours; every field we rely on is set below.
        unsafe {
            let mut old: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(sig, ptr::null(), &mut old) != 0 {
                let err = Error::signal_install(name);
                restore(&previous);
                return Err(err);
            }

            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handle_fault as usize;
            action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
            libc::sigemptyset(&mut action.sa_mask);

            if libc::sigaction(sig, &action, ptr::null_mut()) != 0 {
                let err = Error::signal_install(name);
                restore(&previous);
                return Err(err);
            }
            previous.push((sig, old));
        }
    }

    if PREVIOUS.set(previous).is_err() {
        return Err(Error::internal("signal interceptor registered twice"));
    }
    Ok(())
}

/// Put back the dispositions recorded in `previous`.
fn restore(previous: &[(libc::c_int, libc::sigaction)]) {
    for (sig, old) in previous {
        // SAFETY: `old` was filled in by sigaction for this signal.
        unsafe {
            libc::sigaction(*sig, old, ptr::null_mut());
        }
    }
}

extern "C" fn handle_fault(sig: libc::c_int, _info: *mut libc::siginfo_t, _uctx: *mut c_void) {
    if !HANDLING.swap(true, Ordering::SeqCst) {
        let cx = FaultContext::enter();
        let target = TARGET.load(Ordering::Acquire);
        if !target.is_null() {
            // SAFETY: targets are leaked, never freed once published.
            write_record(&cx, unsafe { &*target });
        }
    }

    // Hand the signal back. It stays blocked until we return, then the
    // previous disposition sees it.
    match PREVIOUS.get() {
        Some(previous) => restore(previous),
        None => {
            // SAFETY: resetting to the default action is async-signal-safe.
            unsafe {
                libc::signal(sig, libc::SIG_DFL);
            }
        }
    }
    // SAFETY: raise is async-signal-safe.
    unsafe {
        libc::raise(sig);
    }
}

fn write_record(cx: &FaultContext, target: &SignalTarget) {
    // SAFETY: this thread won HANDLING, no one else touches SCRATCH.
    let (body, pending, final_path, dir, frames) = unsafe {
        (
            &mut *SCRATCH.body.get(),
            &mut *SCRATCH.pending.get(),
            &mut *SCRATCH.target.get(),
            &mut *SCRATCH.dir.get(),
            &mut *SCRATCH.frames.get(),
        )
    };

    let now = CivilTime::from_unix(cx.now_unix());

    let mut out = ScratchBuf::new(cx, body);
    out.push_bytes(&target.header);
    out.push_bytes(DATE_TIME_LABEL.as_bytes());
    let _ = now.write_header_time(&mut out);
    out.push_bytes(b"\n");
    out.push_bytes(STACK_HEADING.as_bytes());
    let _ = writeln!(out, "{}{:x}", SLIDE_LABEL, target.slide);
    out.push_bytes(b"\n");

    let depth = capture_frames(cx, &mut frames[..target.max_frames]);
    for (index, ip) in frames[..depth].iter().enumerate() {
        write_frame(cx, &mut out, index, *ip);
    }

    // The crash root may have been wiped since install
    for level in [&target.root, &target.partition] {
        let mut dir_path = ScratchBuf::new(cx, &mut dir[..]);
        dir_path.push_bytes(level);
        if let Some(path) = dir_path.as_c_str() {
            cx.make_dir(path);
        }
    }

    let mut pending_path = ScratchBuf::new(cx, pending);
    record_path(&mut pending_path, target, &now, (TEMP_PREFIX, TEMP_SUFFIX));
    let mut target_path = ScratchBuf::new(cx, final_path);
    record_path(&mut target_path, target, &now, ("", ""));

    if let (Some(pending), Some(final_path)) = (pending_path.as_c_str(), target_path.as_c_str()) {
        cx.write_file(pending, final_path, out.as_bytes());
    }
}

/// `<partition>/<prefix><stamp>.log<suffix>`. In-flight files get the
/// hidden prefix and temp suffix so listings never pick them up.
fn record_path(
    out: &mut ScratchBuf<'_>,
    target: &SignalTarget,
    now: &CivilTime,
    (prefix, suffix): (&str, &str),
) {
    out.push_bytes(&target.partition);
    out.push_bytes(b"/");
    out.push_bytes(prefix.as_bytes());
    let _ = now.write_stamp(out);
    out.push_bytes(RECORD_SUFFIX.as_bytes());
    out.push_bytes(suffix.as_bytes());
}

/// Walk the faulting thread's stack into `frames`, returning the depth.
fn capture_frames(_cx: &FaultContext, frames: &mut [usize]) -> usize {
    let mut depth = 0;
    // SAFETY: only one thread walks at a time (HANDLING), which is the
    // synchronization trace_unsynchronized leaves to the caller.
    unsafe {
        backtrace::trace_unsynchronized(|frame| {
            if depth >= frames.len() {
                return false;
            }
            frames[depth] = frame.ip() as usize;
            depth += 1;
            true
        });
    }
    depth
}

/// One stack line: `<index> <image> 0x<ip> <symbol> + <offset>`.
fn write_frame(_cx: &FaultContext, out: &mut ScratchBuf<'_>, index: usize, ip: usize) {
    let _ = write!(out, "{index:<4}");

    // SAFETY: Dl_info is plain old data; all-zero is a valid value.
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    // SAFETY: dladdr only reads loader tables and writes `info`.
    let found = unsafe { libc::dladdr(ip as *const c_void, &mut info) } != 0;

    if found && !info.dli_fname.is_null() {
        // SAFETY: non-null dli_fname is a NUL-terminated path owned by the
        // loader, valid while the image stays loaded.
        let path = unsafe { CStr::from_ptr(info.dli_fname) }.to_bytes();
        let image = path.rsplit(|b| *b == b'/').next().unwrap_or(path);
        out.push_bytes(image);
    } else {
        out.push_bytes(b"???");
    }
    let _ = write!(out, " 0x{ip:016x} ");

    if found && !info.dli_sname.is_null() {
        // SAFETY: non-null dli_sname points into the image's string table.
        let symbol = unsafe { CStr::from_ptr(info.dli_sname) }.to_bytes();
        out.push_bytes(symbol);
        let _ = writeln!(out, " + {}", ip.wrapping_sub(info.dli_saddr as usize));
    } else if found {
        let base = info.dli_fbase as usize;
        let _ = writeln!(out, "0x{:x} + {}", base, ip.wrapping_sub(base));
    } else {
        out.push_bytes(b"\n");
    }
}

/// Load slide of the image containing this library, for offline
/// symbolication.
#[cfg(target_vendor = "apple")]
#[allow(clippy::cast_sign_loss)]
fn image_slide() -> usize {
    // SAFETY: image 0 is the main executable and always present.
    unsafe { libc::_dyld_get_image_vmaddr_slide(0) as usize }
}

/// Load base of the image containing this library, for offline
/// symbolication.
#[cfg(not(target_vendor = "apple"))]
fn image_slide() -> usize {
    // SAFETY: dladdr only reads loader tables.
    unsafe {
        let mut info: libc::Dl_info = std::mem::zeroed();
        if libc::dladdr(image_slide as *const c_void, &mut info) == 0 {
            return 0;
        }
        info.dli_fbase as usize
    }
}
