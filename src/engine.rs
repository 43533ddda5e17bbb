//! Forwarding engine: drives store, sender, ledger and retention per account.

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::compose::compose;
use crate::config::{AccountConfig, Config};
use crate::errlog::ErrorLog;
use crate::error::{RelayError, Result};
use crate::extract::{extract, ExtractContext};
use crate::ledger::{Ledger, LedgerEntry};
use crate::retention::{self, SweepReport};
use crate::send::MailSender;
use crate::store::{MailBackend, MailStore, MessageKey};

/// Source of "now" for ledger timestamps, error-log lines and the sweep cutoff.
pub type Clock = fn() -> NaiveDateTime;

/// Current local time without offset, matching the ledger format.
pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Result of processing one unseen message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MessageOutcome {
    /// Delivered per the forward policy; `ledgered` is false if the append failed.
    Forwarded {
        delivered: usize,
        failed: usize,
        ledgered: bool,
    },
    /// Delivery did not satisfy the forward policy. Still marked seen.
    NotForwarded { delivered: usize, failed: usize },
    /// The message could not be read; left unseen.
    ExtractFailed { reason: String },
}

/// Counters for one folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderStats {
    pub folder: String,
    /// Junk folder skipped because the account does not process junk.
    pub skipped: bool,
    /// Select or search failure; no messages were processed.
    pub error: Option<String>,
    pub unseen: usize,
    pub forwarded: usize,
    pub not_forwarded: usize,
    pub extract_failed: usize,
    /// Failed sends, counted per recipient.
    pub send_failures: usize,
}

impl FolderStats {
    fn new(folder: &str) -> Self {
        Self {
            folder: folder.to_string(),
            ..Self::default()
        }
    }

    fn record(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Forwarded { failed, .. } => {
                self.forwarded += 1;
                self.send_failures += failed;
            }
            MessageOutcome::NotForwarded { failed, .. } => {
                self.not_forwarded += 1;
                self.send_failures += failed;
            }
            MessageOutcome::ExtractFailed { .. } => self.extract_failed += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Completed,
    Disabled,
    Failed { reason: String },
}

/// Everything that happened for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountReport {
    pub account: String,
    pub status: AccountStatus,
    pub folders: Vec<FolderStats>,
    pub sweep: Option<SweepReport>,
    pub sweep_error: Option<String>,
}

impl AccountReport {
    fn new(account: &str, status: AccountStatus) -> Self {
        Self {
            account: account.to_string(),
            status,
            folders: Vec::new(),
            sweep: None,
            sweep_error: None,
        }
    }

    pub fn forwarded(&self) -> usize {
        self.folders.iter().map(|f| f.forwarded).sum()
    }
}

/// Reports for every selected account, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub accounts: Vec<AccountReport>,
}

impl RunSummary {
    pub fn forwarded(&self) -> usize {
        self.accounts.iter().map(AccountReport::forwarded).sum()
    }

    pub fn deleted(&self) -> usize {
        self.accounts
            .iter()
            .filter_map(|a| a.sweep.as_ref())
            .map(|s| s.deleted)
            .sum()
    }

    pub fn failed_accounts(&self) -> usize {
        self.accounts
            .iter()
            .filter(|a| matches!(a.status, AccountStatus::Failed { .. }))
            .count()
    }
}

/// Runs accounts one after another against a backend.
pub struct Forwarder<'a> {
    config: &'a Config,
    backend: &'a dyn MailBackend,
    ledger: Ledger,
    errlog: ErrorLog,
    clock: Clock,
}

impl<'a> Forwarder<'a> {
    pub fn new(config: &'a Config, backend: &'a dyn MailBackend) -> Self {
        Self {
            config,
            backend,
            ledger: Ledger::new(config.ledger_path()),
            errlog: ErrorLog::new(config.error_log_path()),
            clock: local_now,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Forward unseen mail for the selected accounts (all when `only` is empty),
    /// then sweep each one if retention is enabled.
    pub fn run(&self, only: &[String]) -> RunSummary {
        let multi = self.config.is_multi_account();
        let accounts = self
            .selected(only)
            .map(|account| self.run_account(account, multi, true))
            .collect();
        RunSummary { accounts }
    }

    /// Run only the retention sweep for the selected accounts.
    ///
    /// Fails before connecting anywhere when retention is disabled.
    pub fn sweep_only(&self, only: &[String]) -> Result<RunSummary> {
        if !self.config.retention.enabled {
            return Err(RelayError::Config(
                "retention is disabled; set retention.enabled = true to sweep".into(),
            ));
        }
        let accounts = self
            .selected(only)
            .map(|account| self.run_account(account, false, false))
            .collect();
        Ok(RunSummary { accounts })
    }

    fn selected<'s>(&'s self, only: &'s [String]) -> impl Iterator<Item = &'a AccountConfig> + 's {
        self.config
            .accounts
            .iter()
            .filter(move |a| only.is_empty() || only.iter().any(|n| n == &a.name))
    }

    fn run_account(&self, account: &AccountConfig, multi: bool, forward: bool) -> AccountReport {
        let name = account.name.as_str();
        if !account.enabled {
            info!(account = %name, "Account disabled, skipping");
            return AccountReport::new(name, AccountStatus::Disabled);
        }

        info!(account = %name, "Processing account");
        let mut store = match self.backend.open_store(account) {
            Ok(store) => store,
            Err(e) => return self.account_failed(name, format!("Connection failed: {e}")),
        };

        let mut report = AccountReport::new(name, AccountStatus::Completed);

        if forward {
            let mut sender = match self.backend.open_sender(account) {
                Ok(sender) => sender,
                Err(e) => {
                    store.close();
                    return self.account_failed(name, format!("Sender setup failed: {e}"));
                }
            };
            for folder in &account.folders {
                let stats = self.process_folder(store.as_mut(), sender.as_mut(), account, folder, multi);
                report.folders.push(stats);
            }
        }

        if self.config.retention.enabled {
            let days = self.config.retention.delete_after_days;
            match retention::sweep(store.as_mut(), &self.ledger, name, days, (self.clock)()) {
                Ok(sweep) => report.sweep = Some(sweep),
                Err(e) => {
                    error!(account = %name, error = %e, "Retention sweep failed");
                    self.errlog.record((self.clock)(), name, &format!("Retention sweep failed: {e}"));
                    report.sweep_error = Some(e.to_string());
                }
            }
        }

        store.close();
        report
    }

    fn account_failed(&self, name: &str, reason: String) -> AccountReport {
        error!(account = %name, "{reason}");
        self.errlog.record((self.clock)(), name, &reason);
        AccountReport::new(name, AccountStatus::Failed { reason })
    }

    fn process_folder(
        &self,
        store: &mut dyn MailStore,
        sender: &mut dyn MailSender,
        account: &AccountConfig,
        folder: &str,
        multi: bool,
    ) -> FolderStats {
        let mut stats = FolderStats::new(folder);
        let junk = self.config.is_junk_folder(folder);
        if junk && !account.process_junk {
            info!(account = %account.name, folder, "Skipping junk folder");
            stats.skipped = true;
            return stats;
        }

        let keys = match store.select_folder(folder).and_then(|()| store.search_unseen()) {
            Ok(keys) => keys,
            Err(e) => {
                let reason = format!("Cannot read folder {folder}: {e}");
                warn!(account = %account.name, folder, error = %e, "Folder failed");
                self.errlog.record((self.clock)(), &account.name, &reason);
                stats.error = Some(reason);
                return stats;
            }
        };

        stats.unseen = keys.len();
        if !keys.is_empty() {
            info!(account = %account.name, folder, count = keys.len(), "Unseen messages");
        }
        for key in keys {
            let outcome = self.process_message(store, sender, account, folder, key, multi, junk);
            stats.record(&outcome);
        }
        stats
    }

    #[allow(clippy::too_many_arguments)]
    fn process_message(
        &self,
        store: &mut dyn MailStore,
        sender: &mut dyn MailSender,
        account: &AccountConfig,
        folder: &str,
        key: MessageKey,
        multi: bool,
        junk: bool,
    ) -> MessageOutcome {
        let name = account.name.as_str();
        let ctx = ExtractContext {
            account: name,
            folder,
            multi_account: multi,
            junk,
            now: (self.clock)(),
        };

        let record = match extract(store, key, &ctx) {
            Ok(record) => record,
            Err(e) => {
                warn!(account = %name, folder, %key, error = %e, "Skipping message");
                self.errlog.record((self.clock)(), name, &e.to_string());
                return MessageOutcome::ExtractFailed {
                    reason: e.to_string(),
                };
            }
        };

        let mut delivered = 0;
        let mut failed = 0;
        for recipient in &account.recipients {
            let outgoing = compose(&record, account, multi, recipient);
            match sender.send(&outgoing) {
                Ok(()) => {
                    delivered += 1;
                    info!(account = %name, %key, to = %recipient, "Forwarded");
                }
                Err(e) => {
                    failed += 1;
                    warn!(account = %name, %key, to = %recipient, error = %e, "Send failed");
                    self.errlog.record((self.clock)(), name, &e.to_string());
                }
            }
        }

        if let Err(e) = store.mark_seen(key) {
            warn!(account = %name, folder, %key, error = %e, "Cannot mark message seen");
            self.errlog
                .record((self.clock)(), name, &format!("Cannot mark {key} seen: {e}"));
        }

        if !self.config.general.forward_policy.is_forwarded(delivered, failed) {
            return MessageOutcome::NotForwarded { delivered, failed };
        }

        let entry = LedgerEntry {
            forwarded_at: (self.clock)(),
            account: name.to_string(),
            key,
            folder: folder.to_string(),
            subject: record.original_subject,
            from: record.from,
        };
        let ledgered = match self.ledger.append(&entry) {
            Ok(()) => true,
            Err(e) => {
                error!(account = %name, %key, error = %e, "Ledger append failed");
                self.errlog
                    .record((self.clock)(), name, &format!("Ledger append failed: {e}"));
                false
            }
        };
        MessageOutcome::Forwarded {
            delivered,
            failed,
            ledgered,
        }
    }
}
