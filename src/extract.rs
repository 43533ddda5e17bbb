//! Turn a fetched message into a [`MessageRecord`].

use chrono::NaiveDateTime;
use tracing::debug;

use crate::error::{RelayError, Result};
use crate::model::message::{MessageRecord, TIMESTAMP_FORMAT};
use crate::parser::header::{decode_charset, decode_encoded_words};
use crate::parser::mime::BodyStructure;
use crate::store::{MailStore, MessageKey};

pub const NO_SUBJECT: &str = "(No Subject)";
pub const EMPTY_BODY: &str = "Empty message body";
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Per-message context the extractor needs besides the store.
#[derive(Debug, Clone)]
pub struct ExtractContext<'a> {
    pub account: &'a str,
    pub folder: &'a str,
    pub multi_account: bool,
    pub junk: bool,
    /// Substituted for a missing `Date:` header.
    pub now: NaiveDateTime,
}

/// Fetch and normalize one message.
///
/// Every failure is reported as [`RelayError::Fetch`] for `key`.
pub fn extract(
    store: &mut dyn MailStore,
    key: MessageKey,
    ctx: &ExtractContext<'_>,
) -> Result<MessageRecord> {
    let as_fetch = |e: RelayError| match e {
        RelayError::Fetch { .. } => e,
        other => RelayError::fetch(key, other.to_string()),
    };

    let overview = store.fetch_overview(key).map_err(as_fetch)?;
    let structure = store.fetch_structure(key).map_err(as_fetch)?;

    let original_subject = decoded_or(overview.subject.as_deref(), NO_SUBJECT);
    let from = decoded_or(overview.from.as_deref(), UNKNOWN_SENDER);
    let date = overview
        .date
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| ctx.now.format(TIMESTAMP_FORMAT).to_string());

    let (body, is_html) = select_body(store, key, &structure).map_err(as_fetch)?;
    debug!(%key, is_html, bytes = body.len(), "Extracted message");

    Ok(MessageRecord {
        key,
        subject: decorate_subject(&original_subject, ctx.account, ctx.multi_account, ctx.junk),
        original_subject,
        from,
        date,
        body,
        is_html,
        folder: ctx.folder.to_string(),
    })
}

/// Build the outgoing subject: `[account] ` (multi-account only), `[JUNK] `
/// (junk folders only), then `FWD: ` and the original subject.
pub fn decorate_subject(original: &str, account: &str, multi_account: bool, junk: bool) -> String {
    let mut subject = String::with_capacity(original.len() + account.len() + 16);
    if multi_account {
        subject.push_str(&format!("[{account}] "));
    }
    if junk {
        subject.push_str("[JUNK] ");
    }
    subject.push_str("FWD: ");
    subject.push_str(original);
    subject
}

fn decoded_or(raw: Option<&str>, placeholder: &str) -> String {
    let decoded = raw.map(decode_encoded_words).unwrap_or_default();
    let trimmed = decoded.trim();
    if trimmed.is_empty() {
        placeholder.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Prefer the first `text/html` leaf, then the first `text/plain` leaf. Each
/// falls back to the top-level part when missing or empty; a multipart
/// top-level part is read through its text leaves first.
fn select_body(
    store: &mut dyn MailStore,
    key: MessageKey,
    structure: &BodyStructure,
) -> Result<(String, bool)> {
    for content_type in ["text/html", "text/plain"] {
        if let Some(found) = fetch_text(store, key, structure, content_type)? {
            return Ok(found);
        }
    }
    Ok((EMPTY_BODY.to_string(), false))
}

/// Decoded text of the first `content_type` part, or of the first non-empty
/// fallback section. `None` when all are empty.
fn fetch_text(
    store: &mut dyn MailStore,
    key: MessageKey,
    structure: &BodyStructure,
    content_type: &str,
) -> Result<Option<(String, bool)>> {
    let wanted = structure.find(content_type).map(|p| p.path.clone());
    let fallback = structure
        .fallback_sections()
        .into_iter()
        .filter(|path| Some(path) != wanted.as_ref());

    for path in wanted.clone().into_iter().chain(fallback) {
        let raw = store.fetch_body_part(key, &path)?;
        if raw.is_empty() {
            continue;
        }
        let part = structure.get(&path);
        let bytes = match part {
            Some(p) => p.encoding.decode(&raw),
            None => raw,
        };
        let charset = part.and_then(|p| p.charset.as_deref()).unwrap_or("");
        let text = decode_charset(charset, &bytes);
        if text.trim().is_empty() {
            continue;
        }
        let is_html = part.is_some_and(|p| p.content_type == "text/html");
        return Ok(Some((text, is_html)));
    }
    Ok(None)
}
