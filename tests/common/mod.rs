//! In-memory mail store, recording sender and backend for integration tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::rc::Rc;

use chrono::{NaiveDate, NaiveDateTime};

use mailrelay::config::{AccountConfig, Config};
use mailrelay::error::{RelayError, Result};
use mailrelay::parser::header::parse_overview;
use mailrelay::parser::mime::{BodyStructure, MimeIndex, PartPath};
use mailrelay::send::{MailSender, OutgoingMessage};
use mailrelay::store::{MailBackend, MailStore, MessageKey, Overview};

/// The instant every test run considers "now".
pub fn fixed_now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 10)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

pub struct FakeMessage {
    pub overview: Overview,
    pub structure: BodyStructure,
    pub sections: HashMap<String, Vec<u8>>,
    pub seen: bool,
    pub deleted: bool,
}

impl FakeMessage {
    /// Build from a complete RFC 5322 message using the real MIME parser.
    pub fn from_raw(raw: &[u8]) -> Self {
        let index = MimeIndex::parse(raw).expect("test message must parse");
        let structure = index.structure().clone();
        let sections = structure
            .parts
            .iter()
            .map(|p| {
                let bytes = index.section(raw, &p.path).unwrap_or_default().to_vec();
                (p.path.to_string(), bytes)
            })
            .collect();
        Self {
            overview: parse_overview(raw),
            structure,
            sections,
            seen: false,
            deleted: false,
        }
    }

    pub fn plain(subject: &str, body: &str) -> Self {
        let raw = format!(
            "From: Alice <alice@example.com>\r\nSubject: {subject}\r\nDate: Tue, 09 Jan 2024 08:00:00 +0000\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{body}\r\n"
        );
        Self::from_raw(raw.as_bytes())
    }
}

/// Shared state of one account's mailbox.
#[derive(Default)]
pub struct FakeState {
    pub folders: BTreeMap<String, BTreeMap<u32, FakeMessage>>,
    pub selected: Option<String>,
    /// Every store call, e.g. `select:INBOX`, `search:INBOX`, `delete:INBOX:3`.
    pub calls: Vec<String>,
    pub connects: usize,
    pub fail_select: HashSet<String>,
    pub fail_fetch: HashSet<u32>,
    pub fail_delete: HashSet<u32>,
    pub fail_expunge: bool,
}

impl FakeState {
    pub fn add(&mut self, folder: &str, uid: u32, message: FakeMessage) {
        self.folders
            .entry(folder.to_string())
            .or_default()
            .insert(uid, message);
    }

    pub fn message(&self, folder: &str, uid: u32) -> Option<&FakeMessage> {
        self.folders.get(folder).and_then(|f| f.get(&uid))
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }
}

pub type Shared<T> = Rc<RefCell<T>>;

pub struct FakeStore {
    state: Shared<FakeState>,
}

impl FakeStore {
    pub fn new(state: Shared<FakeState>) -> Self {
        Self { state }
    }

    fn with_message<T>(&self, key: MessageKey, f: impl FnOnce(&FakeMessage) -> T) -> Result<T> {
        let state = self.state.borrow();
        let folder = state
            .selected
            .as_ref()
            .ok_or_else(|| RelayError::Store("no folder selected".into()))?;
        if state.fail_fetch.contains(&key.get()) {
            return Err(RelayError::Store("fetch timed out".into()));
        }
        state
            .message(folder, key.get())
            .map(f)
            .ok_or_else(|| RelayError::fetch(key, "no such message"))
    }
}

impl MailStore for FakeStore {
    fn select_folder(&mut self, folder: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("select:{folder}"));
        if state.fail_select.contains(folder) || !state.folders.contains_key(folder) {
            return Err(RelayError::Store(format!("cannot select {folder}")));
        }
        state.selected = Some(folder.to_string());
        Ok(())
    }

    fn search_unseen(&mut self) -> Result<Vec<MessageKey>> {
        let mut state = self.state.borrow_mut();
        let folder = state.selected.clone().unwrap_or_default();
        state.calls.push(format!("search:{folder}"));
        Ok(state
            .folders
            .get(&folder)
            .map(|msgs| {
                msgs.iter()
                    .filter(|(_, m)| !m.seen && !m.deleted)
                    .map(|(uid, _)| MessageKey::new(*uid))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn fetch_overview(&mut self, key: MessageKey) -> Result<Overview> {
        self.with_message(key, |m| m.overview.clone())
    }

    fn fetch_structure(&mut self, key: MessageKey) -> Result<BodyStructure> {
        self.with_message(key, |m| m.structure.clone())
    }

    fn fetch_body_part(&mut self, key: MessageKey, path: &PartPath) -> Result<Vec<u8>> {
        self.with_message(key, |m| {
            m.sections.get(&path.to_string()).cloned().unwrap_or_default()
        })
    }

    fn mark_seen(&mut self, key: MessageKey) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let folder = state.selected.clone().unwrap_or_default();
        state.calls.push(format!("seen:{folder}:{key}"));
        if let Some(m) = state.folders.get_mut(&folder).and_then(|f| f.get_mut(&key.get())) {
            m.seen = true;
        }
        Ok(())
    }

    fn delete(&mut self, key: MessageKey) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        let folder = state.selected.clone().unwrap_or_default();
        state.calls.push(format!("delete:{folder}:{key}"));
        if state.fail_delete.contains(&key.get()) {
            return Err(RelayError::Delete {
                key: key.to_string(),
                reason: "refused".into(),
            });
        }
        match state.folders.get_mut(&folder).and_then(|f| f.get_mut(&key.get())) {
            Some(m) => {
                m.deleted = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn expunge(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let folder = state.selected.clone().unwrap_or_default();
        state.calls.push(format!("expunge:{folder}"));
        if state.fail_expunge {
            return Err(RelayError::Store("expunge refused".into()));
        }
        if let Some(msgs) = state.folders.get_mut(&folder) {
            msgs.retain(|_, m| !m.deleted);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.state.borrow_mut().calls.push("close".into());
    }
}

/// Records every message; recipients in `failing` are refused.
#[derive(Default)]
pub struct Outbox {
    pub sent: Vec<OutgoingMessage>,
    pub failing: HashSet<String>,
}

pub struct RecordingSender {
    outbox: Shared<Outbox>,
}

impl MailSender for RecordingSender {
    fn send(&mut self, message: &OutgoingMessage) -> Result<()> {
        let mut outbox = self.outbox.borrow_mut();
        if outbox.failing.contains(&message.to) {
            return Err(RelayError::Send {
                recipient: message.to.clone(),
                reason: "550 mailbox unavailable".into(),
            });
        }
        outbox.sent.push(message.clone());
        Ok(())
    }
}

/// Backend handing out fakes keyed by account name.
#[derive(Default)]
pub struct FakeBackend {
    pub mailboxes: HashMap<String, Shared<FakeState>>,
    pub outbox: Shared<Outbox>,
    pub unreachable: HashSet<String>,
}

impl FakeBackend {
    /// Mailbox state for `account`, created on first use.
    pub fn mailbox(&mut self, account: &str) -> Shared<FakeState> {
        self.mailboxes
            .entry(account.to_string())
            .or_default()
            .clone()
    }
}

impl MailBackend for FakeBackend {
    fn open_store(&self, account: &AccountConfig) -> Result<Box<dyn MailStore>> {
        let state = self
            .mailboxes
            .get(&account.name)
            .cloned()
            .unwrap_or_default();
        state.borrow_mut().connects += 1;
        if self.unreachable.contains(&account.name) {
            return Err(RelayError::Connect(format!("{}: connection refused", account.imap.host)));
        }
        Ok(Box::new(FakeStore::new(state)))
    }

    fn open_sender(&self, _account: &AccountConfig) -> Result<Box<dyn MailSender>> {
        Ok(Box::new(RecordingSender {
            outbox: self.outbox.clone(),
        }))
    }
}

/// One `[[accounts]]` block.
pub fn account_toml(name: &str, recipients: &[&str], folders: &[&str], extra: &str) -> String {
    let quote = |items: &[&str]| {
        items
            .iter()
            .map(|s| format!("\"{s}\""))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        r#"
[[accounts]]
name = "{name}"
recipients = [{}]
folders = [{}]
{extra}

[accounts.imap]
host = "imap.{lower}.example"
username = "{lower}@example.com"
password = "secret"

[accounts.smtp]
host = "smtp.{lower}.example"
username = "{lower}@example.com"
password = "secret"
"#,
        quote(recipients),
        quote(folders),
        lower = name.to_lowercase(),
    )
}

/// Full configuration with ledger and error log under `dir`.
pub fn config(dir: &Path, general: &str, accounts: &[String]) -> Config {
    let toml_str = format!(
        "[general]\n{general}\n\n[ledger]\npath = {:?}\nerror_log = {:?}\n\n[retention]\nenabled = false\n{}",
        dir.join("forwarded_emails.log").to_string_lossy(),
        dir.join("error_log.txt").to_string_lossy(),
        accounts.concat(),
    );
    Config::from_toml(&toml_str).expect("test config must parse")
}
