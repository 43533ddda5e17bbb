//! Forwarded-mail ledger.
//!
//! One record per line, `|`-separated:
//!
//! ```text
//! 2024-01-04 10:00:00|Work|4711|INBOX|Quarterly report|Alice <alice@example.com>
//! ```
//!
//! Fields: forwarded-at (local time), account, message key, folder, original
//! subject, sender. Appends and rewrites take an advisory lock on the ledger
//! file itself; a whole run additionally holds [`RunLock`] on `<ledger>.lock`.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{RelayError, Result};
use crate::model::message::{MessageKey, TIMESTAMP_FORMAT};

/// Fewer fields than this and a line is corrupt.
const MIN_FIELDS: usize = 4;

/// One successfully forwarded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub forwarded_at: NaiveDateTime,
    pub account: String,
    pub key: MessageKey,
    pub folder: String,
    pub subject: String,
    pub from: String,
}

impl LedgerEntry {
    /// Serialize to a single line (without the trailing newline).
    ///
    /// `|`, CR and LF in any text field are replaced by spaces so the line
    /// parses back to the same entry.
    pub fn encode(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.forwarded_at.format(TIMESTAMP_FORMAT),
            sanitize(&self.account),
            self.key,
            sanitize(&self.folder),
            sanitize(&self.subject),
            sanitize(&self.from),
        )
    }

    /// Parse one line. Returns `None` for corrupt lines.
    ///
    /// Lines written before sanitizing may carry `|` inside the subject; the
    /// last field is then taken as the sender and the middle ones rejoined.
    pub fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() < MIN_FIELDS {
            return None;
        }

        let forwarded_at = NaiveDateTime::parse_from_str(fields[0].trim(), TIMESTAMP_FORMAT).ok()?;
        let key = fields[2].parse().ok()?;

        let (subject, from) = match fields.len() {
            4 => (String::new(), String::new()),
            5 => (fields[4].to_string(), String::new()),
            n => (fields[4..n - 1].join("|"), fields[n - 1].to_string()),
        };

        Some(Self {
            forwarded_at,
            account: fields[1].to_string(),
            key,
            folder: fields[3].to_string(),
            subject,
            from,
        })
    }
}

fn sanitize(field: &str) -> String {
    field.replace(['|', '\r', '\n'], " ")
}

/// Handle to the ledger file.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record under an exclusive lock.
    pub fn append(&self, entry: &LedgerEntry) -> Result<()> {
        ensure_parent(&self.path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RelayError::io(&self.path, e))?;
        file.lock().map_err(|e| RelayError::io(&self.path, e))?;

        let mut line = entry.encode();
        line.push('\n');
        file.write_all(line.as_bytes())
            .map_err(|e| RelayError::io(&self.path, e))?;
        debug!(account = %entry.account, key = %entry.key, "Ledger append");
        Ok(())
    }

    /// Read and parse every record. A missing file is an empty ledger.
    ///
    /// Corrupt lines are skipped with a warning naming the line number.
    pub fn load_all(&self) -> Result<Vec<LedgerEntry>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RelayError::io(&self.path, e)),
        };
        file.lock_shared()
            .map_err(|e| RelayError::io(&self.path, e))?;

        let mut content = Vec::new();
        file.read_to_end(&mut content)
            .map_err(|e| RelayError::io(&self.path, e))?;
        let content = String::from_utf8_lossy(&content);

        let mut entries = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            match LedgerEntry::parse(line) {
                Some(entry) => entries.push(entry),
                None => warn!(
                    path = %self.path.display(),
                    line = idx + 1,
                    "Dropping corrupt ledger line"
                ),
            }
        }
        Ok(entries)
    }

    /// Replace the file contents with exactly `keep`.
    ///
    /// The records are written to `<ledger>.tmp` and renamed over the ledger
    /// while its lock is held, so a failed write leaves the old file intact.
    pub fn rewrite(&self, keep: &[LedgerEntry]) -> Result<()> {
        ensure_parent(&self.path)?;
        let current = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RelayError::io(&self.path, e))?;
        current.lock().map_err(|e| RelayError::io(&self.path, e))?;

        let mut buf = String::new();
        for entry in keep {
            buf.push_str(&entry.encode());
            buf.push('\n');
        }

        let tmp_path = self.sibling(".tmp");
        if let Err(e) = write_synced(&tmp_path, buf.as_bytes()) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(RelayError::io(&tmp_path, e));
        }
        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(RelayError::io(&self.path, e));
        }
        debug!(entries = keep.len(), "Ledger rewritten");
        Ok(())
    }

    /// Take the whole-run lock without blocking.
    pub fn acquire_run_lock(&self) -> Result<RunLock> {
        let lock_path = self.sibling(".lock");

        ensure_parent(&lock_path)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| RelayError::io(&lock_path, e))?;

        match file.try_lock() {
            Ok(()) => Ok(RunLock {
                _file: file,
                path: lock_path,
            }),
            Err(TryLockError::WouldBlock) => Err(RelayError::RunLocked(lock_path)),
            Err(TryLockError::Error(e)) => Err(RelayError::io(&lock_path, e)),
        }
    }

    /// `<ledger><suffix>` next to the ledger file.
    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }
}

/// Held for the duration of a run; released on drop.
#[derive(Debug)]
pub struct RunLock {
    _file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            std::fs::create_dir_all(dir).map_err(|e| RelayError::io(dir, e))
        }
        _ => Ok(()),
    }
}

/// Per-account ledger statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSummary {
    pub account: String,
    pub entries: usize,
    pub oldest: String,
    pub newest: String,
}

/// Group entries by account, sorted by account name.
pub fn summarize(entries: &[LedgerEntry]) -> Vec<AccountSummary> {
    let mut by_account: BTreeMap<&str, (usize, NaiveDateTime, NaiveDateTime)> = BTreeMap::new();
    for e in entries {
        by_account
            .entry(e.account.as_str())
            .and_modify(|(count, oldest, newest)| {
                *count += 1;
                *oldest = (*oldest).min(e.forwarded_at);
                *newest = (*newest).max(e.forwarded_at);
            })
            .or_insert((1, e.forwarded_at, e.forwarded_at));
    }

    by_account
        .into_iter()
        .map(|(account, (entries, oldest, newest))| AccountSummary {
            account: account.to_string(),
            entries,
            oldest: oldest.format(TIMESTAMP_FORMAT).to_string(),
            newest: newest.format(TIMESTAMP_FORMAT).to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 4)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn entry(subject: &str) -> LedgerEntry {
        LedgerEntry {
            forwarded_at: ts(10),
            account: "Work".into(),
            key: MessageKey::new(42),
            folder: "INBOX".into(),
            subject: subject.into(),
            from: "alice@example.com".into(),
        }
    }

    #[test]
    fn test_encode_format() {
        assert_eq!(
            entry("Hi").encode(),
            "2024-01-04 10:00:00|Work|42|INBOX|Hi|alice@example.com"
        );
    }

    #[test]
    fn test_encode_sanitizes_pipes_and_newlines() {
        let line = entry("a|b\r\nc").encode();
        assert_eq!(line.matches('|').count(), 5);
        let parsed = LedgerEntry::parse(&line).unwrap();
        assert_eq!(parsed.subject, "a b  c");
    }

    #[test]
    fn test_parse_legacy_pipe_in_subject() {
        let parsed =
            LedgerEntry::parse("2024-01-04 10:00:00|Work|42|INBOX|a|b|alice@example.com").unwrap();
        assert_eq!(parsed.subject, "a|b");
        assert_eq!(parsed.from, "alice@example.com");
    }

    #[test]
    fn test_parse_four_fields() {
        let parsed = LedgerEntry::parse("2024-01-04 10:00:00|Work|42|INBOX").unwrap();
        assert_eq!(parsed.subject, "");
        assert_eq!(parsed.from, "");
    }

    #[test]
    fn test_parse_rejects_corrupt() {
        assert!(LedgerEntry::parse("2024-01-04 10:00:00|Work").is_none());
        assert!(LedgerEntry::parse("yesterday|Work|42|INBOX|s|f").is_none());
        assert!(LedgerEntry::parse("2024-01-04 10:00:00|Work|abc|INBOX|s|f").is_none());
    }

    #[test]
    fn test_summarize() {
        let mut a = entry("x");
        a.forwarded_at = ts(8);
        let b = entry("y");
        let mut c = entry("z");
        c.account = "Home".into();
        let summary = summarize(&[a, b, c]);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].account, "Home");
        assert_eq!(summary[1].entries, 2);
        assert_eq!(summary[1].oldest, "2024-01-04 08:00:00");
        assert_eq!(summary[1].newest, "2024-01-04 10:00:00");
    }
}
