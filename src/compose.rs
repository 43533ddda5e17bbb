//! Forwarded payload templates.

use crate::config::AccountConfig;
use crate::model::message::MessageRecord;
use crate::send::OutgoingMessage;

/// Build the message sent to `recipient` for `record`.
pub fn compose(
    record: &MessageRecord,
    account: &AccountConfig,
    multi_account: bool,
    recipient: &str,
) -> OutgoingMessage {
    let body = if record.is_html {
        html_payload(record, &account.name, multi_account)
    } else {
        plain_payload(record, &account.name, multi_account)
    };

    OutgoingMessage {
        from_name: account.from_name(multi_account),
        from_address: account.from_address().to_string(),
        to: recipient.to_string(),
        subject: record.subject.clone(),
        body,
        is_html: record.is_html,
    }
}

/// HTML template: one `<p><b>Field:</b> value</p>` per header, a rule, then the body.
pub fn html_payload(record: &MessageRecord, account: &str, multi_account: bool) -> String {
    let mut out = String::with_capacity(record.body.len() + 512);
    if multi_account {
        out.push_str(&format!("<p><b>Account:</b> {}</p>\n", escape_html(account)));
    }
    for (label, value) in header_fields(record) {
        out.push_str(&format!("<p><b>{label}:</b> {}</p>\n", escape_html(value)));
    }
    out.push_str("<hr>\n");
    out.push_str(&record.body);
    out
}

/// Plain-text template.
pub fn plain_payload(record: &MessageRecord, account: &str, multi_account: bool) -> String {
    let mut out = String::with_capacity(record.body.len() + 256);
    out.push_str("=== Forwarded Message ===\n");
    if multi_account {
        out.push_str(&format!("Account: {account}\n"));
    }
    for (label, value) in header_fields(record) {
        out.push_str(&format!("{label}: {value}\n"));
    }
    out.push_str("========================\n\n");
    out.push_str(&record.body);
    out
}

fn header_fields(record: &MessageRecord) -> [(&'static str, &str); 4] {
    [
        ("From", record.from.as_str()),
        ("Date", record.date.as_str()),
        ("Folder", record.folder.as_str()),
        ("Original Subject", record.original_subject.as_str()),
    ]
}

/// Escape the five HTML-significant characters.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::message::MessageKey;

    fn record(is_html: bool) -> MessageRecord {
        MessageRecord {
            key: MessageKey::new(7),
            subject: "FWD: Hi".into(),
            original_subject: "Hi".into(),
            from: "Alice <alice@example.com>".into(),
            date: "Thu, 04 Jan 2024 10:00:00 +0000".into(),
            body: if is_html { "<p>Body</p>".into() } else { "Body".into() },
            is_html,
            folder: "INBOX".into(),
        }
    }

    #[test]
    fn test_html_payload_escapes_headers() {
        let html = html_payload(&record(true), "Work", false);
        assert!(html.starts_with("<p><b>From:</b> Alice &lt;alice@example.com&gt;</p>\n"));
        assert!(html.contains("<p><b>Folder:</b> INBOX</p>"));
        assert!(html.contains("<p><b>Original Subject:</b> Hi</p>"));
        assert!(html.ends_with("<hr>\n<p>Body</p>"));
        assert!(!html.contains("Account:"));
    }

    #[test]
    fn test_html_payload_multi_account_line() {
        let html = html_payload(&record(true), "Work", true);
        assert!(html.starts_with("<p><b>Account:</b> Work</p>\n"));
    }

    #[test]
    fn test_plain_payload_layout() {
        let text = plain_payload(&record(false), "Work", true);
        let expected = "=== Forwarded Message ===\n\
Account: Work\n\
From: Alice <alice@example.com>\n\
Date: Thu, 04 Jan 2024 10:00:00 +0000\n\
Folder: INBOX\n\
Original Subject: Hi\n\
========================\n\
\n\
Body";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html(r#"a & "b" <c> 'd'"#), "a &amp; &quot;b&quot; &lt;c&gt; &#39;d&#39;");
    }
}
