//! `crashlog` - In-process crash capture with on-device crash log storage
//!
//! The library intercepts the two ways a process dies unexpectedly, fatal
//! signals and uncaught exceptions (panics), and writes a plain-text record
//! for each into a small file-backed store. On the next launch the host can
//! inspect, upload or delete those records; a startup sweep purges stale
//! ones and alerts the host when crashes pile up.
//!
//! ```no_run
//! let capture = crashlog::start_crash_capture(|records| {
//!     eprintln!("{} recent crashes", records.len());
//! })?;
//! # let _ = capture;
//! # Ok::<(), crashlog::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod intercept;
pub mod logging;
pub mod record;
pub mod report;
pub mod storage;

pub use config::Config;
pub use coordinator::{CrashCapture, SweepHandle, SweepReport};
pub use device::{DeviceInfo, ModelCatalog, RawMachineId};
pub use error::{Error, Result};
pub use intercept::{CrashTarget, UncaughtException};
pub use logging::{init_logging, LoggingConfig, Verbosity};
pub use record::{CrashKind, RecordId};
pub use report::ReportHeader;
pub use storage::{wipe_app_storage, AppStorage, CrashStore};

/// Load configuration and start crash capture.
///
/// Installs the interceptors and starts the startup sweep; the sweep handle
/// is detached. `on_threshold` receives every record body when more than
/// `capture.alert_threshold` records survive eviction.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded or is invalid, or if
/// capture cannot be started.
pub fn start_crash_capture<F>(on_threshold: F) -> Result<CrashCapture>
where
    F: FnOnce(&[String]) + Send + 'static,
{
    let capture = CrashCapture::new(Config::load()?)?;
    capture.start(on_threshold)?;
    Ok(capture)
}
