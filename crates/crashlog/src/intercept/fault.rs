//! Building blocks for code running inside a live fault handler.
//!
//! Nothing here allocates, locks or logs. Every operation that touches the
//! OS takes a [`FaultContext`], which only the signal handler mints, so
//! restricted code is easy to spot and normal-context helpers cannot sneak
//! in without a token.

#![allow(unsafe_code)]

use std::ffi::CStr;
use std::fmt;

/// Capability token for the restricted (signal handler) context.
#[derive(Debug)]
pub(crate) struct FaultContext {
    _private: (),
}

impl FaultContext {
    /// Mint the token. Only the fault handler calls this.
    pub(crate) const fn enter() -> Self {
        Self { _private: () }
    }

    /// Current wall-clock time in whole seconds since the Unix epoch.
    pub(crate) fn now_unix(&self) -> i64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: clock_gettime is async-signal-safe and only writes `ts`.
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) } != 0 {
            return 0;
        }
        i64::from(ts.tv_sec)
    }

    /// Create one directory level, ignoring failure (it usually exists).
    pub(crate) fn make_dir(&self, path: &CStr) {
        // SAFETY: mkdir is async-signal-safe; `path` is NUL-terminated.
        unsafe {
            libc::mkdir(path.as_ptr(), 0o755);
        }
    }

    /// Write `bytes` to `pending`, then rename it to `target`.
    ///
    /// Returns `false` if any step failed; a leftover pending file is
    /// removed.
    pub(crate) fn write_file(&self, pending: &CStr, target: &CStr, bytes: &[u8]) -> bool {
        // SAFETY: open, write, fsync, close, rename and unlink are all on the
        // POSIX async-signal-safe list; every pointer passed stays valid for
        // the duration of the call.
        unsafe {
            let fd = libc::open(
                pending.as_ptr(),
                libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC | libc::O_CLOEXEC,
                0o644 as libc::c_uint,
            );
            if fd < 0 {
                return false;
            }

            let ok = write_all(bytes, |chunk| libc::write(fd, chunk.as_ptr().cast(), chunk.len()));

            libc::fsync(fd);
            libc::close(fd);

            if ok && libc::rename(pending.as_ptr(), target.as_ptr()) == 0 {
                return true;
            }
            libc::unlink(pending.as_ptr());
            false
        }
    }
}

/// Feed `bytes` to `write` until all are accepted.
///
/// `write` follows `write(2)`: bytes taken, or negative with errno set.
/// Interrupted calls are retried; an error or a call that takes nothing
/// fails the whole write.
fn write_all(bytes: &[u8], mut write: impl FnMut(&[u8]) -> isize) -> bool {
    let mut rest = bytes;
    while !rest.is_empty() {
        let n = write(rest);
        if n == 0 {
            return false;
        }
        if n < 0 {
            // Reading errno this way does not allocate
            if std::io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return false;
        }
        // n is positive and at most rest.len()
        rest = &rest[n.unsigned_abs().min(rest.len())..];
    }
    true
}

/// Fixed-capacity text buffer over pre-allocated memory.
///
/// Output past the capacity is dropped; formatting never fails.
pub(crate) struct ScratchBuf<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> ScratchBuf<'a> {
    pub(crate) fn new(_cx: &FaultContext, buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            len: 0,
        }
    }

    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) {
        let room = self.buf.len() - self.len;
        let take = bytes.len().min(room);
        self.buf[self.len..self.len + take].copy_from_slice(&bytes[..take]);
        self.len += take;
    }

    /// Terminate with NUL and view as a C string.
    ///
    /// `None` if the content has an interior NUL or there is no room left.
    pub(crate) fn as_c_str(&mut self) -> Option<&CStr> {
        if self.len >= self.buf.len() {
            return None;
        }
        self.buf[self.len] = 0;
        CStr::from_bytes_with_nul(&self.buf[..=self.len]).ok()
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl fmt::Write for ScratchBuf<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_bytes(s.as_bytes());
        Ok(())
    }
}

/// Broken-down UTC time computed with integer arithmetic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CivilTime {
    pub year: i64,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl CivilTime {
    /// Convert seconds since the Unix epoch (days-from-civil inverse,
    /// proleptic Gregorian calendar).
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn from_unix(secs: i64) -> Self {
        let days = secs.div_euclid(86_400);
        let rem = secs.rem_euclid(86_400);

        let z = days + 719_468;
        let era = z.div_euclid(146_097);
        let doe = z.rem_euclid(146_097);
        let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
        let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
        let year = yoe + era * 400 + i64::from(month <= 2);

        Self {
            year,
            month,
            day,
            hour: (rem / 3600) as u32,
            minute: (rem % 3600 / 60) as u32,
            second: (rem % 60) as u32,
        }
    }

    /// `YYYYMMDDHHMMSS`, the record file stamp.
    pub(crate) fn write_stamp(&self, out: &mut impl fmt::Write) -> fmt::Result {
        write!(
            out,
            "{:04}{:02}{:02}{:02}{:02}{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }

    /// `YYYY-MM-DD HH:MM:SS`, the header time.
    pub(crate) fn write_header_time(&self, out: &mut impl fmt::Write) -> fmt::Result {
        write!(
            out,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::fmt::Write;

    #[test]
    fn test_civil_time_matches_chrono() {
        let samples = [
            0_i64,
            951_782_400,   // 2000-02-29
            1_709_967_901, // 2024-03-09 07:05:01
            4_102_444_799, // 2099-12-31 23:59:59
            -1,
            1_234_567_890,
        ];
        for secs in samples {
            let civil = CivilTime::from_unix(secs);
            let mut ours = String::new();
            civil.write_stamp(&mut ours).unwrap();

            let expected = crate::record::format_stamp(Utc.timestamp_opt(secs, 0).unwrap());
            assert_eq!(ours, expected, "stamp for {secs}");
        }
    }

    #[test]
    fn test_civil_time_header_format() {
        let civil = CivilTime::from_unix(1_709_967_901);
        let mut out = String::new();
        civil.write_header_time(&mut out).unwrap();
        assert_eq!(out, "2024-03-09 07:05:01");
    }

    #[test]
    fn test_scratch_buf_truncates_silently() {
        let cx = FaultContext::enter();
        let mut storage = [0u8; 8];
        let mut buf = ScratchBuf::new(&cx, &mut storage);

        write!(buf, "0x{:x}", 0xdead_beef_u32).unwrap();
        assert_eq!(buf.as_bytes(), b"0xdeadbe");
        assert!(buf.as_c_str().is_none());
    }

    #[test]
    fn test_scratch_buf_c_str() {
        let cx = FaultContext::enter();
        let mut storage = [0u8; 32];
        let mut buf = ScratchBuf::new(&cx, &mut storage);
        buf.push_bytes(b"/tmp/crash");
        assert_eq!(buf.as_c_str().unwrap().to_bytes(), b"/tmp/crash");
    }

    #[test]
    fn test_write_file_round_trip() {
        let cx = FaultContext::enter();
        let dir = tempfile::tempdir().unwrap();
        let pending = std::ffi::CString::new(
            dir.path().join(".pending-x.log").to_str().unwrap(),
        )
        .unwrap();
        let target =
            std::ffi::CString::new(dir.path().join("x.log").to_str().unwrap()).unwrap();

        assert!(cx.write_file(&pending, &target, b"body"));
        assert_eq!(std::fs::read(dir.path().join("x.log")).unwrap(), b"body");
        assert!(!dir.path().join(".pending-x.log").exists());
    }

    #[test]
    fn test_write_file_into_missing_dir_fails() {
        let cx = FaultContext::enter();
        let pending = std::ffi::CString::new("/nonexistent/dir/.pending-x.log").unwrap();
        let target = std::ffi::CString::new("/nonexistent/dir/x.log").unwrap();
        assert!(!cx.write_file(&pending, &target, b"body"));
    }

    #[test]
    fn test_write_all_gives_up_without_progress() {
        let mut calls = 0;
        let ok = write_all(b"body", |_| {
            calls += 1;
            0
        });
        assert!(!ok);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_write_all_handles_short_writes() {
        let mut seen = Vec::new();
        let ok = write_all(b"abcde", |chunk| {
            seen.push(chunk[0]);
            2.min(chunk.len()) as isize
        });
        assert!(ok);
        assert_eq!(seen, b"ace");
    }

    #[test]
    fn test_now_unix_is_recent() {
        let cx = FaultContext::enter();
        let now = Utc::now().timestamp();
        assert!((cx.now_unix() - now).abs() <= 2);
    }
}
