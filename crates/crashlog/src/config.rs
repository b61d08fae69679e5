//! Configuration management for crashlog.
//!
//! Configuration is loaded with figment from built-in defaults merged with an
//! optional TOML file. The library reads no environment variables.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::intercept::MAX_FRAMES;
use crate::logging::LoggingConfig;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Directory name used under the platform config directory.
const CONFIG_DIR_NAME: &str = "crashlog";

/// Directory holding the crash partitions inside the app cache area.
const CRASH_DIR_NAME: &str = "crashlog";

/// Application configuration.
///
/// Loaded from (later sources override earlier):
/// 1. Default values
/// 2. TOML config file (if it exists)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application identity written into every record header.
    pub app: AppConfig,
    /// Storage locations.
    pub storage: StorageConfig,
    /// Interceptor and sweep behaviour.
    pub capture: CaptureConfig,
    /// Log filtering for [`init_logging`](crate::logging::init_logging).
    pub logging: LoggingConfig,
}

/// Application metadata for record headers.
///
/// These values normally come from the host's bundle metadata; the library
/// only renders them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Identifier used to namespace the app's storage areas.
    pub identifier: String,
    /// Human-readable application name.
    pub name: Option<String>,
    /// Short (marketing) version, e.g. `2.4.1`.
    pub short_version: Option<String>,
    /// Build number.
    pub build: Option<String>,
    /// Vendor-scoped device identifier.
    pub device_id: Option<String>,
}

/// Storage locations.
///
/// Every path defaults to an app-namespaced directory under the platform's
/// standard locations when unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root holding the crash partitions.
    /// Defaults to `<caches_dir>/crashlog`.
    pub crash_root: Option<PathBuf>,
    /// Persistent documents area. Defaults to `<data dir>/<identifier>`.
    pub documents_dir: Option<PathBuf>,
    /// Library (settings) area. Defaults to `<config dir>/<identifier>`.
    pub library_dir: Option<PathBuf>,
    /// Caches area. Defaults to `<cache dir>/<identifier>`.
    pub caches_dir: Option<PathBuf>,
}

/// Interceptor and startup sweep configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Install the fatal signal interceptor.
    pub signals_enabled: bool,
    /// Install the uncaught exception (panic) interceptor.
    pub exceptions_enabled: bool,
    /// Also record panics the process survives, such as those on worker
    /// threads or inside `catch_unwind`. By default only panics that end the
    /// process are recorded.
    pub record_recovered_panics: bool,
    /// Records at least this old (milliseconds) trigger a full purge.
    pub max_age_ms: u64,
    /// The host is notified when more records than this exist.
    pub alert_threshold: usize,
    /// Maximum stack frames written into a signal record.
    pub max_frames: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            identifier: "crashlog".to_string(),
            name: None,
            short_version: None,
            build: None,
            device_id: None,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            signals_enabled: true,
            exceptions_enabled: true,
            record_recovered_panics: false,
            max_age_ms: 10_000,
            alert_threshold: 2,
            max_frames: 128,
        }
    }
}

impl Config {
    /// Load configuration from the default config file, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// A missing file is not an error; defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.app.identifier.trim().is_empty() {
            return Err(Error::config_validation("app.identifier must not be empty"));
        }

        if self.app.identifier.contains(|c| c == '/' || c == '\\') {
            return Err(Error::config_validation(format!(
                "app.identifier must not contain path separators: {}",
                self.app.identifier
            )));
        }

        if self.capture.max_age_ms == 0 {
            return Err(Error::config_validation(
                "max_age_ms must be greater than 0",
            ));
        }

        if self.capture.max_frames == 0 || self.capture.max_frames > MAX_FRAMES {
            return Err(Error::config_validation(format!(
                "max_frames must be between 1 and {MAX_FRAMES} (got {})",
                self.capture.max_frames
            )));
        }

        self.logging.filter()?;

        Ok(())
    }

    /// Root directory holding the crash partitions.
    #[must_use]
    pub fn crash_root(&self) -> PathBuf {
        self.storage
            .crash_root
            .clone()
            .unwrap_or_else(|| self.caches_dir().join(CRASH_DIR_NAME))
    }

    /// The app's documents area.
    #[must_use]
    pub fn documents_dir(&self) -> PathBuf {
        self.storage.documents_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from(".local/share"))
                .join(&self.app.identifier)
        })
    }

    /// The app's library area.
    #[must_use]
    pub fn library_dir(&self) -> PathBuf {
        self.storage.library_dir.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from(".config"))
                .join(&self.app.identifier)
        })
    }

    /// The app's caches area.
    #[must_use]
    pub fn caches_dir(&self) -> PathBuf {
        self.storage.caches_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".cache"))
                .join(&self.app.identifier)
        })
    }

    /// Get the staleness threshold as a Duration.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.capture.max_age_ms)
    }
}
