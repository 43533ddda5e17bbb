//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. the `--config` command-line argument
//! 2. `$MAILRELAY_CONFIG` (environment variable)
//! 3. `~/.config/mailrelay/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailrelay\config.toml` (Windows)
//!
//! There are no usable built-in defaults for accounts, so a missing or
//! invalid file is a hard error.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Ledger and error-log locations.
    pub ledger: LedgerConfig,
    /// Deletion of forwarded originals.
    pub retention: RetentionConfig,
    /// Mailboxes to relay, processed in order.
    pub accounts: Vec<AccountConfig>,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override directory for the tracing log file.
    pub log_dir: Option<PathBuf>,
    /// Force multi-account decoration on or off. Unset means "more than one
    /// account is configured".
    pub multi_account: Option<bool>,
    /// When a message counts as forwarded (and is written to the ledger).
    pub forward_policy: ForwardPolicy,
    /// Folder names treated as junk/spam (case-insensitive).
    pub junk_folders: Vec<String>,
}

/// Ledger and error-log locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Forwarded-mail ledger file.
    pub path: Option<PathBuf>,
    /// Error log file (`[timestamp] [account] message`).
    pub error_log: Option<PathBuf>,
}

/// Deletion of forwarded originals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Run the retention sweep after each account.
    pub enabled: bool,
    /// Delete originals forwarded more than this many days ago.
    pub delete_after_days: u32,
}

/// Which recipients must accept a message before it is ledgered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardPolicy {
    /// Every configured recipient must succeed.
    #[default]
    All,
    /// At least one recipient must succeed.
    Any,
}

impl ForwardPolicy {
    /// Decide whether a message with the given delivery counts is "forwarded".
    pub fn is_forwarded(self, delivered: usize, failed: usize) -> bool {
        match self {
            Self::All => delivered > 0 && failed == 0,
            Self::Any => delivered > 0,
        }
    }
}

/// One mailbox + transport pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Unique name; used as the ledger partition key and subject prefix.
    pub name: String,
    /// Skip this account entirely when false.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Addresses every message is forwarded to.
    pub recipients: Vec<String>,
    /// Folders scanned for unread mail.
    #[serde(default = "default_folders")]
    pub folders: Vec<String>,
    /// Whether junk/spam folders listed in `folders` are processed.
    #[serde(default)]
    pub process_junk: bool,
    /// Mail-store endpoint.
    pub imap: ImapConfig,
    /// Mail-sender endpoint.
    pub smtp: SmtpConfig,
}

/// IMAP endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Environment variable holding the password (takes precedence).
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub security: ImapSecurity,
}

/// IMAP connection security.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImapSecurity {
    /// Implicit TLS (usually port 993).
    #[default]
    Ssl,
    /// Plain connection upgraded with STARTTLS (usually port 143).
    Starttls,
}

/// SMTP endpoint, credentials, and sender identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Environment variable holding the password (takes precedence).
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub security: SmtpSecurity,
    /// Envelope/header sender address. Defaults to the IMAP username.
    #[serde(default)]
    pub from_address: Option<String>,
    /// Sender display name. Defaults depend on multi-account mode.
    #[serde(default)]
    pub from_name: Option<String>,
}

/// SMTP connection security.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Implicit TLS (usually port 465).
    #[default]
    Ssl,
    /// STARTTLS upgrade (usually port 587).
    Tls,
    /// No encryption. Only for local relays.
    None,
}

// ── Default implementations ─────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_folders() -> Vec<String> {
    vec!["INBOX".to_string()]
}

fn default_imap_port() -> u16 {
    993
}

fn default_smtp_port() -> u16 {
    465
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            multi_account: None,
            forward_policy: ForwardPolicy::All,
            junk_folders: vec!["Junk".to_string(), "Spam".to_string()],
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delete_after_days: 1,
        }
    }
}

// ── Derived settings ────────────────────────────────────────────

impl Config {
    /// Parse a TOML document and validate it.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let cfg: Config =
            toml::from_str(contents).map_err(|e| RelayError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for account in &self.accounts {
            if account.name.trim().is_empty() {
                return Err(RelayError::Config("account name must not be empty".into()));
            }
            if !names.insert(account.name.as_str()) {
                return Err(RelayError::Config(format!(
                    "duplicate account name '{}'",
                    account.name
                )));
            }
            if account.name.contains('|') {
                return Err(RelayError::Config(format!(
                    "account name '{}' must not contain '|'",
                    account.name
                )));
            }
            if account.recipients.is_empty() {
                return Err(RelayError::Config(format!(
                    "account '{}' has no recipients",
                    account.name
                )));
            }
            if account.imap.host.is_empty() || account.imap.username.is_empty() {
                return Err(RelayError::Config(format!(
                    "account '{}' needs imap.host and imap.username",
                    account.name
                )));
            }
            if account.smtp.host.is_empty() {
                return Err(RelayError::Config(format!(
                    "account '{}' needs smtp.host",
                    account.name
                )));
            }
        }
        Ok(())
    }

    /// Whether subjects and payloads carry the account name.
    pub fn is_multi_account(&self) -> bool {
        self.general
            .multi_account
            .unwrap_or(self.accounts.len() > 1)
    }

    /// Whether `folder` is one of the configured junk folders.
    pub fn is_junk_folder(&self, folder: &str) -> bool {
        self.general
            .junk_folders
            .iter()
            .any(|j| j.eq_ignore_ascii_case(folder))
    }

    /// Resolved ledger path.
    pub fn ledger_path(&self) -> PathBuf {
        self.ledger
            .path
            .clone()
            .unwrap_or_else(|| data_dir(self).join("forwarded_emails.log"))
    }

    /// Resolved error-log path.
    pub fn error_log_path(&self) -> PathBuf {
        self.ledger
            .error_log
            .clone()
            .unwrap_or_else(|| data_dir(self).join("error_log.txt"))
    }
}

impl AccountConfig {
    /// Sender address for outgoing mail.
    pub fn from_address(&self) -> &str {
        self.smtp
            .from_address
            .as_deref()
            .unwrap_or(&self.imap.username)
    }

    /// Sender display name for outgoing mail.
    pub fn from_name(&self, multi_account: bool) -> String {
        match &self.smtp.from_name {
            Some(name) => name.clone(),
            None if multi_account => format!("Auto Forwarder - {}", self.name),
            None => "Auto Email Forwarder".to_string(),
        }
    }
}

impl ImapConfig {
    /// Resolve the password from the environment or the inline value.
    pub fn password(&self) -> Result<String> {
        resolve_secret(self.password_env.as_deref(), self.password.as_deref(), "imap")
    }
}

impl SmtpConfig {
    /// Resolve the password from the environment or the inline value.
    pub fn password(&self) -> Result<String> {
        resolve_secret(self.password_env.as_deref(), self.password.as_deref(), "smtp")
    }
}

fn resolve_secret(env: Option<&str>, inline: Option<&str>, what: &str) -> Result<String> {
    if let Some(var) = env {
        return std::env::var(var).map_err(|_| {
            RelayError::Config(format!("{what} password variable '{var}' is not set"))
        });
    }
    inline
        .map(str::to_string)
        .ok_or_else(|| RelayError::Config(format!("no {what} password configured")))
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration from `explicit`, or from the standard locations.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => config_file_path()
            .ok_or_else(|| RelayError::Config("could not determine config file path".into()))?,
    };

    let contents = std::fs::read_to_string(&path).map_err(|e| RelayError::io(&path, e))?;
    let cfg = Config::from_toml(&contents)?;
    tracing::debug!(path = %path.display(), accounts = cfg.accounts.len(), "Loaded config");
    Ok(cfg)
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    // 1. Environment variable override
    if let Ok(env_path) = std::env::var("MAILRELAY_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    // 2. Standard config directory
    dirs::config_dir().map(|d| d.join("mailrelay").join("config.toml"))
}

/// Return the data directory for the ledger, error log and tracing log.
pub fn data_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.log_dir {
        return dir.clone();
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailrelay")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[[accounts]]
name = "Work"
recipients = ["dest@example.com"]

[accounts.imap]
host = "imap.example.com"
username = "me@example.com"
password = "secret"

[accounts.smtp]
host = "smtp.example.com"
username = "me@example.com"
password = "secret"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = Config::from_toml(MINIMAL).expect("parse");
        assert_eq!(cfg.accounts.len(), 1);
        let acct = &cfg.accounts[0];
        assert!(acct.enabled);
        assert!(!acct.process_junk);
        assert_eq!(acct.folders, vec!["INBOX"]);
        assert_eq!(acct.imap.port, 993);
        assert_eq!(acct.imap.security, ImapSecurity::Ssl);
        assert_eq!(acct.smtp.port, 465);
        assert_eq!(cfg.general.forward_policy, ForwardPolicy::All);
        assert!(cfg.retention.enabled);
        assert_eq!(cfg.retention.delete_after_days, 1);
        assert!(!cfg.is_multi_account());
    }

    #[test]
    fn test_partial_general_section() {
        let toml_str = format!(
            "[general]\nforward_policy = \"any\"\nmulti_account = true\n{MINIMAL}"
        );
        let cfg = Config::from_toml(&toml_str).expect("parse");
        assert_eq!(cfg.general.forward_policy, ForwardPolicy::Any);
        assert!(cfg.is_multi_account());
        assert_eq!(cfg.general.junk_folders, vec!["Junk", "Spam"]);
    }

    #[test]
    fn test_duplicate_account_names_rejected() {
        let toml_str = format!("{MINIMAL}{MINIMAL}");
        let err = Config::from_toml(&toml_str).unwrap_err();
        assert!(err.to_string().contains("duplicate account name"));
    }

    #[test]
    fn test_empty_recipients_rejected() {
        let toml_str = MINIMAL.replace("[\"dest@example.com\"]", "[]");
        let err = Config::from_toml(&toml_str).unwrap_err();
        assert!(err.to_string().contains("no recipients"));
    }

    #[test]
    fn test_junk_folder_is_case_insensitive() {
        let cfg = Config::default();
        assert!(cfg.is_junk_folder("junk"));
        assert!(cfg.is_junk_folder("SPAM"));
        assert!(!cfg.is_junk_folder("INBOX"));
    }

    #[test]
    fn test_forward_policy() {
        assert!(ForwardPolicy::All.is_forwarded(2, 0));
        assert!(!ForwardPolicy::All.is_forwarded(1, 1));
        assert!(ForwardPolicy::Any.is_forwarded(1, 1));
        assert!(!ForwardPolicy::Any.is_forwarded(0, 2));
    }

    #[test]
    fn test_from_identity_defaults() {
        let cfg = Config::from_toml(MINIMAL).expect("parse");
        let acct = &cfg.accounts[0];
        assert_eq!(acct.from_address(), "me@example.com");
        assert_eq!(acct.from_name(true), "Auto Forwarder - Work");
        assert_eq!(acct.from_name(false), "Auto Email Forwarder");
    }

    #[test]
    fn test_password_env_missing_is_error() {
        let mut cfg = Config::from_toml(MINIMAL).expect("parse");
        cfg.accounts[0].imap.password_env = Some("MAILRELAY_TEST_UNSET_VAR_8231".into());
        assert!(cfg.accounts[0].imap.password().is_err());
        assert_eq!(cfg.accounts[0].smtp.password().unwrap(), "secret");
    }
}
