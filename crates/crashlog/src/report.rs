//! Crash record bodies.
//!
//! Both kinds of record start with the same description block:
//!
//! ```text
//! App: <name>
//! Version: <short-version> (<build>)
//! Device: <model> <os-version>
//! UUID: <vendor-scoped device id>
//! DateTime: <YYYY-MM-DD HH:MM:SS>
//! Stack:
//! ```
//!
//! Everything up to `DateTime:` is fixed for the life of the process, so it is
//! rendered once at install time and the fault handler only copies it.

use chrono::{DateTime, Utc};

use crate::config::AppConfig;
use crate::device::DeviceInfo;
use crate::intercept::UncaughtException;
use crate::record::HEADER_TIME_FORMAT;

pub(crate) const DATE_TIME_LABEL: &str = "DateTime: ";
pub(crate) const STACK_HEADING: &str = "Stack:\n";
pub(crate) const SLIDE_LABEL: &str = "slideAddress:0x";

/// The process-constant part of every record header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportHeader {
    prefix: String,
}

impl ReportHeader {
    /// Render the header for this app on this device.
    #[must_use]
    pub fn new(app: &AppConfig, device: &DeviceInfo) -> Self {
        let value = |v: &Option<String>| v.as_deref().map(single_line).unwrap_or_default();

        let prefix = format!(
            "App: {}\nVersion: {} ({})\nDevice: {} {}\nUUID: {}\n",
            value(&app.name),
            value(&app.short_version),
            value(&app.build),
            single_line(&device.model),
            single_line(&device.os_version),
            value(&app.device_id),
        );
        Self { prefix }
    }

    /// The lines before `DateTime:`.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The full description block for a capture at `at`, ending with the
    /// `Stack:` heading.
    #[must_use]
    pub fn render(&self, at: DateTime<Utc>) -> String {
        format!(
            "{}{DATE_TIME_LABEL}{}\n{STACK_HEADING}",
            self.prefix,
            at.format(HEADER_TIME_FORMAT)
        )
    }
}

/// Body of an uncaught exception record.
#[must_use]
pub fn exception_body(
    header: &ReportHeader,
    at: DateTime<Utc>,
    exception: &UncaughtException,
) -> String {
    let mut body = header.render(at);
    body.push('\n');
    body.push_str(&format!(
        "name:{}  reason:{}\n",
        single_line(exception.name()),
        single_line(exception.reason())
    ));
    for frame in exception.call_stack() {
        body.push_str(frame);
        body.push('\n');
    }
    body
}

/// Header fields are line-oriented; embedded newlines would forge lines.
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}
