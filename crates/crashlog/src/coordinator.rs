//! Startup coordination.
//!
//! [`CrashCapture`] is what a host holds for the life of the process. Its
//! [`start`](CrashCapture::start) installs the interceptors before returning
//! and then sweeps the store in the background: stale records are purged,
//! and if too many remain the host is told about them.

use std::thread;

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::config::Config;
use crate::device::{DeviceInfo, ModelCatalog, RawMachineId};
use crate::error::{Error, Result};
use crate::intercept::{exception, signal, CrashTarget};
use crate::record::{CrashKind, RecordId};
use crate::report::ReportHeader;
use crate::storage::{wipe_app_storage, AppStorage, CrashStore};

/// Name of the background sweep thread.
pub const SWEEP_THREAD_NAME: &str = "crashlog-sweep";

/// What the startup sweep found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Whether stale records caused the whole store to be purged.
    pub purged: bool,
    /// Record bodies present after eviction.
    pub records: Vec<String>,
    /// Whether the threshold callback ran.
    pub notified: bool,
}

/// Handle on the background sweep.
///
/// Dropping it detaches the sweep; it still runs to completion.
#[derive(Debug)]
pub struct SweepHandle {
    rx: oneshot::Receiver<SweepReport>,
}

impl SweepHandle {
    /// Block until the sweep finishes.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`outcome`](Self::outcome) there.
    ///
    /// # Errors
    ///
    /// Returns an error if the sweep thread died before reporting.
    pub fn wait(self) -> Result<SweepReport> {
        self.rx
            .blocking_recv()
            .map_err(|_| Error::internal("sweep ended without a report"))
    }

    /// Wait for the sweep without blocking the executor.
    ///
    /// # Errors
    ///
    /// Returns an error if the sweep thread died before reporting.
    pub async fn outcome(self) -> Result<SweepReport> {
        self.rx
            .await
            .map_err(|_| Error::internal("sweep ended without a report"))
    }
}

/// In-process crash capture for one app.
#[derive(Debug, Clone)]
pub struct CrashCapture {
    config: Config,
    store: CrashStore,
    header: ReportHeader,
}

impl CrashCapture {
    /// Set up capture with the raw machine identifier as device model.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_catalog(config, &RawMachineId)
    }

    /// Set up capture, naming the device through `catalog`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_catalog(config: Config, catalog: &dyn ModelCatalog) -> Result<Self> {
        config.validate()?;

        let device = DeviceInfo::detect(catalog);
        let header = ReportHeader::new(&config.app, &device);
        let store = CrashStore::new(config.crash_root());
        debug!(
            "Crash capture for {} on {} at {}",
            config.app.identifier,
            device.model,
            store.root().display()
        );

        Ok(Self {
            config,
            store,
            header,
        })
    }

    /// The configuration in effect.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The record store.
    #[must_use]
    pub fn store(&self) -> &CrashStore {
        &self.store
    }

    /// The header every record starts with.
    #[must_use]
    pub fn header(&self) -> &ReportHeader {
        &self.header
    }

    /// Install the enabled interceptors, then sweep the store in the
    /// background.
    ///
    /// The sweep purges everything if any record is older than the
    /// configured maximum age. If more than `alert_threshold` records
    /// remain, `on_threshold` receives all their bodies on the sweep thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal interceptor cannot be installed or the
    /// sweep thread cannot be spawned. Interceptors installed before the
    /// failure stay installed.
    pub fn start<F>(&self, on_threshold: F) -> Result<SweepHandle>
    where
        F: FnOnce(&[String]) + Send + 'static,
    {
        self.install_interceptors()?;

        let store = self.store.clone();
        let max_age = self.config.max_age();
        let threshold = self.config.capture.alert_threshold;
        let (tx, rx) = oneshot::channel();

        thread::Builder::new()
            .name(SWEEP_THREAD_NAME.to_string())
            .spawn(move || {
                let report = sweep(&store, max_age, threshold, on_threshold);
                // The host may have dropped the handle
                let _ = tx.send(report);
            })
            .map_err(Error::SweepSpawn)?;

        Ok(SweepHandle { rx })
    }

    /// Install the interceptors enabled in configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal interceptor cannot be installed.
    pub fn install_interceptors(&self) -> Result<()> {
        let target = CrashTarget::new(
            self.store.clone(),
            self.header.clone(),
            self.config.capture.max_frames,
        )
        .with_recovered_panics(self.config.capture.record_recovered_panics);

        if self.config.capture.exceptions_enabled {
            exception::install(&target);
        }
        if self.config.capture.signals_enabled {
            signal::install(&target)?;
        }
        Ok(())
    }

    /// Record identifiers of one kind.
    #[must_use]
    pub fn list_records(&self, kind: CrashKind) -> Vec<RecordId> {
        self.store.list(kind)
    }

    /// One record's body.
    #[must_use]
    pub fn read_record(&self, kind: CrashKind, id: &RecordId) -> Option<String> {
        self.store.read(kind, id)
    }

    /// Remove one record.
    pub fn delete_record(&self, kind: CrashKind, id: &RecordId) {
        self.store.delete(kind, id);
    }

    /// Remove every record.
    pub fn delete_all_records(&self) {
        self.store.delete_all();
    }

    /// Clear the app's documents, library and caches areas, crash records
    /// included. Returns the number of entries removed.
    pub fn wipe_all_app_storage(&self) -> usize {
        wipe_app_storage(&AppStorage::from_config(&self.config))
    }
}

fn sweep<F>(
    store: &CrashStore,
    max_age: std::time::Duration,
    threshold: usize,
    on_threshold: F,
) -> SweepReport
where
    F: FnOnce(&[String]),
{
    let purged = store.evict_if_stale(Utc::now(), max_age);
    let records = store.read_all();

    let notified = records.len() > threshold;
    if notified {
        info!(
            "{} crash records exceed threshold {}, notifying host",
            records.len(),
            threshold
        );
        on_threshold(&records);
    } else {
        debug!("{} crash records at startup", records.len());
    }

    SweepReport {
        purged,
        records,
        notified,
    }
}
