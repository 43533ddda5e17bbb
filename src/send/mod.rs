//! Outgoing mail.

pub mod smtp;

use crate::error::Result;

/// A fully composed message addressed to a single recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub from_name: String,
    pub from_address: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Send as `text/html` rather than `text/plain`.
    pub is_html: bool,
}

/// An authenticated transport that delivers one message at a time.
pub trait MailSender {
    fn send(&mut self, message: &OutgoingMessage) -> Result<()>;
}
