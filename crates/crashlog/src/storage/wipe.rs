//! Factory-reset style wipe of the app's persistent storage.
//!
//! This clears far more than crash records: every entry inside the app's
//! documents, library and caches areas goes. The area directories themselves
//! are kept so the app can keep using them.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::Config;

/// The app's persistent storage areas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStorage {
    /// Documents area.
    pub documents: PathBuf,
    /// Library area.
    pub library: PathBuf,
    /// Caches area.
    pub caches: PathBuf,
}

impl AppStorage {
    /// Resolve the areas from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            documents: config.documents_dir(),
            library: config.library_dir(),
            caches: config.caches_dir(),
        }
    }

    /// The areas, in wipe order.
    #[must_use]
    pub fn areas(&self) -> [&Path; 3] {
        [
            self.documents.as_path(),
            self.library.as_path(),
            self.caches.as_path(),
        ]
    }
}

/// Remove every entry inside each storage area.
///
/// Missing areas are skipped and entries that cannot be removed are left
/// behind. Returns the number of entries removed.
pub fn wipe_app_storage(storage: &AppStorage) -> usize {
    let removed: usize = storage.areas().into_iter().map(wipe_children).sum();
    info!("Wiped app storage, {} entries removed", removed);
    removed
}

fn wipe_children(area: &Path) -> usize {
    let Ok(entries) = fs::read_dir(area) else {
        debug!("Skipping missing storage area {}", area.display());
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
        let result = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => debug!("Cannot remove {}: {}", path.display(), e),
        }
    }
    removed
}
