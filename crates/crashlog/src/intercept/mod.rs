//! Crash interceptors.
//!
//! Two independent, process-wide hooks feed the [`CrashStore`]:
//!
//! - [`signal`] catches fatal signals and writes from inside the handler,
//!   using only memory prepared at install time.
//! - [`exception`] catches panics (the uncaught exceptions of a Rust
//!   process) through the panic hook, in normal context.
//!
//! Both are installed from a [`CrashTarget`]. Installing again only swaps the
//! target; neither hook is ever registered twice.

pub mod exception;
pub(crate) mod fault;
pub mod signal;

pub use exception::UncaughtException;

use crate::report::ReportHeader;
use crate::storage::CrashStore;

/// Hard upper bound on captured stack depth.
pub const MAX_FRAMES: usize = 256;

/// Where interceptors write and what every record starts with.
#[derive(Debug, Clone)]
pub struct CrashTarget {
    pub(crate) store: CrashStore,
    pub(crate) header: ReportHeader,
    pub(crate) max_frames: usize,
    pub(crate) record_recovered_panics: bool,
}

impl CrashTarget {
    /// Build a target. `max_frames` is clamped to `1..=MAX_FRAMES`.
    #[must_use]
    pub fn new(store: CrashStore, header: ReportHeader, max_frames: usize) -> Self {
        Self {
            store,
            header,
            max_frames: max_frames.clamp(1, MAX_FRAMES),
            record_recovered_panics: false,
        }
    }

    /// Also record panics the process survives.
    #[must_use]
    pub fn with_recovered_panics(mut self, record: bool) -> Self {
        self.record_recovered_panics = record;
        self
    }

    /// The store records are written to.
    #[must_use]
    pub fn store(&self) -> &CrashStore {
        &self.store
    }
}
