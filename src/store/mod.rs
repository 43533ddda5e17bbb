//! Mail-store and mail-sender collaborators.
//!
//! The engine talks to mailboxes and transports only through [`MailStore`]
//! and [`MailSender`], opened per account by a [`MailBackend`]. The network
//! implementations live in [`imap`] and [`crate::send::smtp`].

pub mod imap;

use crate::config::AccountConfig;
use crate::error::Result;
use crate::parser::mime::{BodyStructure, PartPath};
use crate::send::MailSender;

pub use crate::model::message::{MessageKey, Overview};

/// One open mailbox session.
///
/// All keys are relative to the currently selected folder.
pub trait MailStore {
    /// Switch the session to `folder`.
    fn select_folder(&mut self, folder: &str) -> Result<()>;

    /// Keys of unread messages in the selected folder (possibly empty).
    fn search_unseen(&mut self) -> Result<Vec<MessageKey>>;

    /// Raw `Subject`, `From` and `Date` headers.
    fn fetch_overview(&mut self, key: MessageKey) -> Result<Overview>;

    /// MIME tree with per-part transfer encoding.
    fn fetch_structure(&mut self, key: MessageKey) -> Result<BodyStructure>;

    /// Raw bytes of one body section, still transfer-encoded.
    ///
    /// A section that does not exist yields an empty buffer.
    fn fetch_body_part(&mut self, key: MessageKey, path: &PartPath) -> Result<Vec<u8>>;

    /// Set the `\Seen` flag.
    fn mark_seen(&mut self, key: MessageKey) -> Result<()>;

    /// Flag a message for deletion. Returns `false` if no such message exists.
    fn delete(&mut self, key: MessageKey) -> Result<bool>;

    /// Permanently remove deleted messages from the selected folder.
    fn expunge(&mut self) -> Result<()>;

    /// End the session. Errors are logged, not returned.
    fn close(&mut self);
}

/// Opens store and sender sessions for an account.
pub trait MailBackend {
    fn open_store(&self, account: &AccountConfig) -> Result<Box<dyn MailStore>>;
    fn open_sender(&self, account: &AccountConfig) -> Result<Box<dyn MailSender>>;
}

/// Production backend: IMAP over TLS and SMTP via `lettre`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkBackend;

impl MailBackend for NetworkBackend {
    fn open_store(&self, account: &AccountConfig) -> Result<Box<dyn MailStore>> {
        let store = imap::ImapStore::connect(&account.imap)?;
        Ok(Box::new(store))
    }

    fn open_sender(&self, account: &AccountConfig) -> Result<Box<dyn MailSender>> {
        let sender = crate::send::smtp::SmtpSender::new(&account.smtp)?;
        Ok(Box::new(sender))
    }
}
