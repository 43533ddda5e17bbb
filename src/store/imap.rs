//! IMAP mail store over TLS (implicit or STARTTLS).
//!
//! Messages are addressed by UID. Each message is fetched once with
//! `BODY.PEEK[]` (which leaves `\Seen` untouched) and the raw bytes are kept
//! until a different key or folder is requested, so overview, structure and
//! section lookups for the same message cost a single round trip.

use std::net::TcpStream;

use native_tls::{TlsConnector, TlsStream};
use tracing::{debug, info, warn};

use crate::config::{ImapConfig, ImapSecurity};
use crate::error::{RelayError, Result};
use crate::parser::header::parse_overview;
use crate::parser::mime::{BodyStructure, MimeIndex, PartPath};
use crate::store::{MailStore, MessageKey, Overview};

type Session = ::imap::Session<TlsStream<TcpStream>>;

/// The most recently fetched message.
struct CachedMessage {
    key: MessageKey,
    raw: Vec<u8>,
    index: Option<MimeIndex>,
}

/// An authenticated IMAP session for one account.
pub struct ImapStore {
    session: Session,
    cached: Option<CachedMessage>,
}

impl ImapStore {
    /// Connect, negotiate TLS and log in.
    pub fn connect(cfg: &ImapConfig) -> Result<Self> {
        let password = cfg.password()?;
        let tls = TlsConnector::builder()
            .build()
            .map_err(|e| RelayError::Connect(format!("TLS setup failed: {e}")))?;

        let addr = (cfg.host.as_str(), cfg.port);
        let client = match cfg.security {
            ImapSecurity::Ssl => ::imap::connect(addr, &cfg.host, &tls),
            ImapSecurity::Starttls => ::imap::connect_starttls(addr, &cfg.host, &tls),
        }
        .map_err(|e| RelayError::Connect(format!("{}:{}: {e}", cfg.host, cfg.port)))?;

        let session = client
            .login(&cfg.username, &password)
            .map_err(|(e, _client)| RelayError::Connect(format!("login as {} failed: {e}", cfg.username)))?;

        info!(host = %cfg.host, user = %cfg.username, "IMAP session established");
        Ok(Self {
            session,
            cached: None,
        })
    }

    /// Fetch the full message for `key` unless it is already cached.
    fn load(&mut self, key: MessageKey) -> Result<&CachedMessage> {
        let hit = self.cached.as_ref().is_some_and(|c| c.key == key);
        if !hit {
            let fetches = self
                .session
                .uid_fetch(key.to_string(), "BODY.PEEK[]")
                .map_err(|e| RelayError::fetch(key, e.to_string()))?;
            let raw = fetches
                .iter()
                .find_map(|f| f.body())
                .map(<[u8]>::to_vec)
                .ok_or_else(|| RelayError::fetch(key, "server returned no body"))?;
            debug!(%key, bytes = raw.len(), "Fetched message");
            let index = MimeIndex::parse(&raw);
            self.cached = Some(CachedMessage { key, raw, index });
        }
        self.cached
            .as_ref()
            .ok_or_else(|| RelayError::fetch(key, "message cache empty"))
    }
}

impl MailStore for ImapStore {
    fn select_folder(&mut self, folder: &str) -> Result<()> {
        self.cached = None;
        let mailbox = self.session.select(folder)?;
        debug!(
            folder,
            exists = mailbox.exists,
            uid_validity = ?mailbox.uid_validity,
            "Selected folder"
        );
        Ok(())
    }

    fn search_unseen(&mut self) -> Result<Vec<MessageKey>> {
        let uids = self.session.uid_search("UNSEEN")?;
        let mut keys: Vec<MessageKey> = uids.into_iter().map(MessageKey::new).collect();
        keys.sort();
        Ok(keys)
    }

    fn fetch_overview(&mut self, key: MessageKey) -> Result<Overview> {
        let cached = self.load(key)?;
        Ok(parse_overview(&cached.raw))
    }

    fn fetch_structure(&mut self, key: MessageKey) -> Result<BodyStructure> {
        let cached = self.load(key)?;
        cached
            .index
            .as_ref()
            .map(|idx| idx.structure().clone())
            .ok_or_else(|| RelayError::fetch(key, "unparseable MIME structure"))
    }

    fn fetch_body_part(&mut self, key: MessageKey, path: &PartPath) -> Result<Vec<u8>> {
        let cached = self.load(key)?;
        let section = cached
            .index
            .as_ref()
            .and_then(|idx| idx.section(&cached.raw, path))
            .map(<[u8]>::to_vec)
            .unwrap_or_default();
        Ok(section)
    }

    fn mark_seen(&mut self, key: MessageKey) -> Result<()> {
        self.session.uid_store(key.to_string(), "+FLAGS (\\Seen)")?;
        Ok(())
    }

    fn delete(&mut self, key: MessageKey) -> Result<bool> {
        let updated = self
            .session
            .uid_store(key.to_string(), "+FLAGS (\\Deleted)")
            .map_err(|e| RelayError::Delete {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        // The server answers with one FETCH per message it actually flagged.
        Ok(!updated.is_empty())
    }

    fn expunge(&mut self) -> Result<()> {
        self.cached = None;
        let removed = self.session.expunge()?;
        debug!(count = removed.len(), "Expunged");
        Ok(())
    }

    fn close(&mut self) {
        self.cached = None;
        if let Err(e) = self.session.logout() {
            warn!(error = %e, "IMAP logout failed");
        }
    }
}
