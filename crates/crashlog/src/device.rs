//! Device metadata for record headers.
//!
//! The machine identifier comes straight from `uname(2)`. Turning it into a
//! marketing name ("iPhone11,8" into "iPhone XR") belongs to the host, which
//! plugs a [`ModelCatalog`] in; without one the raw identifier is used.

use std::ffi::CStr;

/// Maps machine identifiers to human-readable model names.
pub trait ModelCatalog: Send + Sync {
    /// The display name for `machine`, or `None` to keep the identifier.
    fn model_name(&self, machine: &str) -> Option<String>;
}

/// Catalog that never renames: the machine identifier is the model.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawMachineId;

impl ModelCatalog for RawMachineId {
    fn model_name(&self, _machine: &str) -> Option<String> {
        None
    }
}

/// Description of the device the process runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Raw machine identifier, e.g. `iPhone11,8` or `x86_64`.
    pub machine: String,
    /// Display model name.
    pub model: String,
    /// Operating system name and release.
    pub os_version: String,
}

impl DeviceInfo {
    /// Query the running system.
    #[must_use]
    pub fn detect(catalog: &dyn ModelCatalog) -> Self {
        let (machine, os_version) = match uname() {
            Some(uts) => (uts.machine, format!("{} {}", uts.sysname, uts.release)),
            None => (
                std::env::consts::ARCH.to_string(),
                std::env::consts::OS.to_string(),
            ),
        };
        let model = catalog
            .model_name(&machine)
            .unwrap_or_else(|| machine.clone());

        Self {
            machine,
            model,
            os_version,
        }
    }
}

struct Uname {
    sysname: String,
    release: String,
    machine: String,
}

#[allow(unsafe_code)]
fn uname() -> Option<Uname> {
    // SAFETY: utsname is plain old data; uname fills it with NUL-terminated
    // strings on success.
    let uts = unsafe {
        let mut uts: libc::utsname = std::mem::zeroed();
        if libc::uname(&mut uts) != 0 {
            return None;
        }
        uts
    };

    let field = |raw: &[libc::c_char]| {
        // SAFETY: the kernel NUL-terminates every utsname field.
        unsafe { CStr::from_ptr(raw.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    };

    Some(Uname {
        sysname: field(&uts.sysname),
        release: field(&uts.release),
        machine: field(&uts.machine),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl ModelCatalog for Fixed {
        fn model_name(&self, _machine: &str) -> Option<String> {
            Some("Test Device".to_string())
        }
    }

    #[test]
    fn test_detect_uses_raw_machine_id() {
        let info = DeviceInfo::detect(&RawMachineId);
        assert!(!info.machine.is_empty());
        assert_eq!(info.model, info.machine);
        assert!(!info.os_version.is_empty());
    }

    #[test]
    fn test_detect_applies_catalog() {
        let info = DeviceInfo::detect(&Fixed);
        assert_eq!(info.model, "Test Device");
        assert_ne!(info.model, info.machine);
    }
}
