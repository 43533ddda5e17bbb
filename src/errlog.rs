//! Per-account error log: `[timestamp] [account] message` lines.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::warn;

use crate::model::message::TIMESTAMP_FORMAT;

#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. Failures to write are reported through `tracing` only.
    pub fn record(&self, at: NaiveDateTime, account: &str, message: &str) {
        let line = format!(
            "[{}] [{}] {}\n",
            at.format(TIMESTAMP_FORMAT),
            account,
            message.replace(['\r', '\n'], " ")
        );
        if let Err(e) = self.append(&line) {
            warn!(path = %self.path.display(), error = %e, "Cannot write error log");
        }
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock()?;
        file.write_all(line.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_record_format() {
        let dir = tempfile::tempdir().unwrap();
        let log = ErrorLog::new(dir.path().join("logs").join("error_log.txt"));
        let at = NaiveDate::from_ymd_opt(2024, 1, 4)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        log.record(at, "Work", "Failed to forward to b@example.com: refused");
        log.record(at, "Home", "two\nlines");

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(
            content,
            "[2024-01-04 09:30:00] [Work] Failed to forward to b@example.com: refused\n\
             [2024-01-04 09:30:00] [Home] two lines\n"
        );
    }
}
