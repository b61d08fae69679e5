//! Logging for crashlog.
//!
//! Events are emitted with `tracing` from normal application context only;
//! the fault handler never logs. The `[logging]` table of the configuration
//! chooses how much of that reaches the subscriber installed by
//! [`init_logging`]. Hosts with their own subscriber skip `init_logging` and
//! filter on the `crashlog` target themselves.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Target prefix of every event this crate emits.
pub const LOG_TARGET: &str = "crashlog";

/// How much the library reports about capture, sweeps and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Installs, purges and threshold alerts.
    #[default]
    Normal,
    /// Every record written, read or dropped.
    Verbose,
    /// Everything.
    Trace,
}

impl Verbosity {
    /// The most detailed level shown.
    #[must_use]
    pub fn level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }
}

/// The `[logging]` configuration table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for the whole crate.
    pub verbosity: Verbosity,
    /// Extra filter directives layered on top, e.g.
    /// `crashlog::intercept=trace`.
    pub directives: Vec<String>,
}

impl LoggingConfig {
    /// Build the subscriber filter.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first directive that does
    /// not parse.
    pub fn filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::new(format!("{LOG_TARGET}={}", self.verbosity.level()));
        for raw in &self.directives {
            let directive: Directive = raw.parse().map_err(|e| {
                Error::config_validation(format!("bad logging directive {raw:?}: {e}"))
            })?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }
}

/// Install a formatting subscriber filtered by `config`.
///
/// Only the first subscriber in a process takes effect; later calls, or
/// calls after the host installed its own, change nothing.
///
/// # Errors
///
/// Returns an error if a filter directive does not parse.
///
/// ```no_run
/// use crashlog::{init_logging, logging::{LoggingConfig, Verbosity}};
///
/// init_logging(&LoggingConfig {
///     verbosity: Verbosity::Verbose,
///     ..LoggingConfig::default()
/// })?;
/// # Ok::<(), crashlog::Error>(())
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let subscriber = tracing_subscriber::registry().with(config.filter()?).with(
        fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_file(false)
            .with_line_number(false),
    );

    // Another subscriber already owns the process
    let _ = subscriber.try_init();
    Ok(())
}

/// Route warnings from code under test to the test output.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(format!("{LOG_TARGET}=warn"))
        .with_test_writer()
        .try_init();
}
