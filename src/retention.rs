//! Retention sweep: delete originals forwarded longer ago than the cutoff.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ledger::{Ledger, LedgerEntry};
use crate::store::MailStore;

/// Counters for one account's sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Ledger entries belonging to the account.
    pub examined: usize,
    /// Entries older than the cutoff.
    pub due: usize,
    /// Messages deleted and expunged; their entries were dropped.
    pub deleted: usize,
    /// Due entries whose message was no longer in its folder; dropped.
    pub missing: usize,
    /// Due entries kept because select, delete or expunge failed.
    pub retained: usize,
}

/// Messages flagged `\Deleted` in the selected folder but not yet expunged.
struct OpenFolder {
    name: String,
    flagged: Vec<LedgerEntry>,
}

/// Sweep `account`'s ledger entries against `store`.
///
/// Entries of other accounts and entries newer than `now - delete_after_days`
/// are kept untouched. A due entry is dropped once its message has been
/// deleted and the folder expunged, or when the message is already gone from
/// its folder. A failed select, delete or expunge keeps it for the next sweep.
/// A missing or empty ledger is a no-op.
pub fn sweep(
    store: &mut dyn MailStore,
    ledger: &Ledger,
    account: &str,
    delete_after_days: u32,
    now: NaiveDateTime,
) -> Result<SweepReport> {
    let entries = ledger.load_all()?;
    let mut report = SweepReport::default();
    if entries.is_empty() {
        debug!(account, "Ledger empty, nothing to sweep");
        return Ok(report);
    }

    let cutoff = now - Duration::days(i64::from(delete_after_days));
    let mut keep: Vec<LedgerEntry> = Vec::with_capacity(entries.len());
    let mut open: Option<OpenFolder> = None;

    for entry in entries {
        if entry.account != account {
            keep.push(entry);
            continue;
        }
        report.examined += 1;

        if entry.forwarded_at >= cutoff {
            keep.push(entry);
            continue;
        }
        report.due += 1;

        if open.as_ref().map(|f| f.name.as_str()) != Some(entry.folder.as_str()) {
            if let Some(prev) = open.take() {
                finish_folder(store, prev, &mut keep, &mut report);
            }
            if let Err(e) = store.select_folder(&entry.folder) {
                warn!(account, folder = %entry.folder, error = %e, "Cannot select folder for deletion");
                report.retained += 1;
                keep.push(entry);
                continue;
            }
            open = Some(OpenFolder {
                name: entry.folder.clone(),
                flagged: Vec::new(),
            });
        }

        match store.delete(entry.key) {
            Ok(true) => {
                if let Some(folder) = open.as_mut() {
                    folder.flagged.push(entry);
                }
            }
            Ok(false) => {
                info!(account, folder = %entry.folder, key = %entry.key, "Message already gone, dropping ledger entry");
                report.missing += 1;
            }
            Err(e) => {
                warn!(account, folder = %entry.folder, key = %entry.key, error = %e, "Delete failed");
                report.retained += 1;
                keep.push(entry);
            }
        }
    }

    if let Some(last) = open.take() {
        finish_folder(store, last, &mut keep, &mut report);
    }

    ledger.rewrite(&keep)?;
    if report.deleted > 0 {
        info!(account, deleted = report.deleted, "Deleted old forwarded messages");
    }
    Ok(report)
}

/// Expunge the folder if anything was flagged. On failure the flagged
/// entries go back into the kept set.
fn finish_folder(
    store: &mut dyn MailStore,
    folder: OpenFolder,
    keep: &mut Vec<LedgerEntry>,
    report: &mut SweepReport,
) {
    if folder.flagged.is_empty() {
        return;
    }
    match store.expunge() {
        Ok(()) => report.deleted += folder.flagged.len(),
        Err(e) => {
            warn!(folder = %folder.name, error = %e, "Expunge failed, keeping entries");
            report.retained += folder.flagged.len();
            keep.extend(folder.flagged);
        }
    }
}
