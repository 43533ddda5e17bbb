//! `mailrelay` — forward unread IMAP mail over SMTP, keep a ledger of what
//! was forwarded, and delete originals once they pass a retention window.
//!
//! The library exposes the forwarding engine and its collaborators so the
//! mail store and sender can be replaced (see [`store::MailBackend`]).

pub mod compose;
pub mod config;
pub mod engine;
pub mod errlog;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod model;
pub mod parser;
pub mod retention;
pub mod send;
pub mod store;
