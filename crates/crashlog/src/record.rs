//! Crash record identity.
//!
//! Records are partitioned by the kind of fatal event that produced them and
//! named after the second they were written, `YYYYMMDDHHMMSS.log`, in UTC.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// File name suffix shared by every record.
pub const RECORD_SUFFIX: &str = ".log";

/// Number of digits in a record stamp.
pub const STAMP_LEN: usize = 14;

/// `chrono` format of a record stamp.
const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// `chrono` format of the `DateTime:` header line.
pub(crate) const HEADER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The source of a fatal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashKind {
    /// A fatal OS signal (segmentation fault, abort, illegal instruction...).
    Signal,
    /// A language-level exception that reached the top of the stack.
    UncaughtException,
}

impl CrashKind {
    /// Every kind, in declaration order.
    pub const ALL: [CrashKind; 2] = [CrashKind::Signal, CrashKind::UncaughtException];

    /// Name of the partition directory holding records of this kind.
    #[must_use]
    pub const fn partition_name(self) -> &'static str {
        match self {
            Self::Signal => "SignalCrash",
            Self::UncaughtException => "UncaughtExceptionCrash",
        }
    }
}

impl fmt::Display for CrashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal => write!(f, "signal"),
            Self::UncaughtException => write!(f, "uncaught_exception"),
        }
    }
}

/// Identifier of a record inside its partition: the record's file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Identifier for a record written at `at`.
    #[must_use]
    pub fn for_time(at: DateTime<Utc>) -> Self {
        Self(format!("{}{RECORD_SUFFIX}", format_stamp(at)))
    }

    /// Wrap an existing file name.
    ///
    /// Returns `None` unless the name is a plain, visible file name carrying
    /// the record suffix. Hidden names (in-flight writes, `.` and `..`) and
    /// names with path components never identify a record.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let plain = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(|c| c == '/' || c == '\\');
        (plain && name.ends_with(RECORD_SUFFIX)).then(|| Self(name.to_string()))
    }

    /// The file name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The stamp embedded in the file name, if it parses.
    ///
    /// Names not following the fixed-width encoding are "ageless".
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.0
            .strip_suffix(RECORD_SUFFIX)
            .and_then(parse_stamp)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Render the 14-digit stamp for `at`.
#[must_use]
pub fn format_stamp(at: DateTime<Utc>) -> String {
    at.format(STAMP_FORMAT).to_string()
}

/// Parse a 14-digit stamp.
#[must_use]
pub fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    if stamp.len() != STAMP_LEN || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_crash_kind_display() {
        assert_eq!(CrashKind::Signal.to_string(), "signal");
        assert_eq!(
            CrashKind::UncaughtException.to_string(),
            "uncaught_exception"
        );
    }

    #[test]
    fn test_partition_names_are_distinct() {
        assert_ne!(
            CrashKind::Signal.partition_name(),
            CrashKind::UncaughtException.partition_name()
        );
    }

    #[test]
    fn test_all_is_declaration_order() {
        assert_eq!(
            CrashKind::ALL,
            [CrashKind::Signal, CrashKind::UncaughtException]
        );
    }

    #[test]
    fn test_record_id_for_time() {
        let id = RecordId::for_time(at(2024, 3, 9, 7, 5, 1));
        assert_eq!(id.as_str(), "20240309070501.log");
        assert_eq!(id.timestamp(), Some(at(2024, 3, 9, 7, 5, 1)));
    }

    #[test]
    fn test_record_id_from_file_name() {
        assert!(RecordId::from_file_name("20240309070501.log").is_some());
        assert!(RecordId::from_file_name("notes.log").is_some());
        assert!(RecordId::from_file_name("20240309070501.txt").is_none());
        assert!(RecordId::from_file_name("../20240309070501.log").is_none());
        assert!(RecordId::from_file_name("a/b.log").is_none());
        assert!(RecordId::from_file_name("").is_none());
        assert!(RecordId::from_file_name("..").is_none());
    }

    #[test]
    fn test_hidden_names_are_not_records() {
        assert!(RecordId::from_file_name(".pending-20240309070501.log").is_none());
        assert!(RecordId::from_file_name(".20240309070501.log").is_none());
    }

    #[test]
    fn test_unparsable_stamp_is_ageless() {
        let id = RecordId::from_file_name("crash-report.log").unwrap();
        assert!(id.timestamp().is_none());

        let id = RecordId::from_file_name("20241399000000.log").unwrap();
        assert!(id.timestamp().is_none());
    }

    #[test]
    fn test_parse_stamp_rejects_wrong_width() {
        assert!(parse_stamp("2024030907050").is_none());
        assert!(parse_stamp("202403090705011").is_none());
        assert!(parse_stamp("2024-3-9 7:5:1").is_none());
    }

    #[test]
    fn test_stamps_order_like_time() {
        let earlier = format_stamp(at(2023, 12, 31, 23, 59, 59));
        let later = format_stamp(at(2024, 1, 1, 0, 0, 0));
        assert!(earlier < later);
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&CrashKind::UncaughtException).unwrap();
        assert_eq!(json, "\"uncaught_exception\"");
    }
}
