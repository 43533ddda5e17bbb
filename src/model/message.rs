//! Message keys, header overviews, and extracted message records.

use std::fmt;
use std::str::FromStr;

/// Local timestamp format shared by the ledger, the error log and missing dates.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Durable identifier of a message inside one folder.
///
/// For IMAP this is the UID, which (unlike a sequence number) survives
/// reconnects as long as the folder's UIDVALIDITY does not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKey(u32);

impl MessageKey {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw numeric value, as used on the wire.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageKey {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Raw header values of a message, as returned by the mail store.
///
/// Values are undecoded: RFC 2047 encoded-words are still present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overview {
    pub subject: Option<String>,
    pub from: Option<String>,
    pub date: Option<String>,
}

/// A message normalized for forwarding.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    /// Key of the source message in `folder`.
    pub key: MessageKey,

    /// Outgoing subject, with account/junk/forward prefixes.
    pub subject: String,

    /// Decoded subject without decoration.
    pub original_subject: String,

    /// Sender as it appears in the `From:` header (encoded words resolved).
    pub from: String,

    /// Date header as provided by the source; not guaranteed to parse.
    pub date: String,

    /// Decoded body text (HTML or plain).
    pub body: String,

    /// Whether `body` came from a `text/html` part.
    pub is_html: bool,

    /// Folder the message was read from.
    pub folder: String,
}
