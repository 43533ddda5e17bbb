//! SMTP sender built on `lettre`.

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use tracing::debug;

use crate::config::{SmtpConfig, SmtpSecurity};
use crate::error::{RelayError, Result};
use crate::send::{MailSender, OutgoingMessage};

/// A configured SMTP transport. Connections are opened per send by `lettre`.
pub struct SmtpSender {
    transport: SmtpTransport,
}

impl SmtpSender {
    pub fn new(cfg: &SmtpConfig) -> Result<Self> {
        let password = cfg.password()?;
        let creds = Credentials::new(cfg.username.clone(), password);

        let builder = match cfg.security {
            SmtpSecurity::Ssl => SmtpTransport::relay(&cfg.host),
            SmtpSecurity::Tls => SmtpTransport::starttls_relay(&cfg.host),
            SmtpSecurity::None => Ok(SmtpTransport::builder_dangerous(&cfg.host)),
        }
        .map_err(|e| RelayError::Connect(format!("SMTP {}: {e}", cfg.host)))?;

        let transport = builder.port(cfg.port).credentials(creds).build();
        debug!(host = %cfg.host, port = cfg.port, security = ?cfg.security, "SMTP transport ready");
        Ok(Self { transport })
    }
}

impl MailSender for SmtpSender {
    fn send(&mut self, message: &OutgoingMessage) -> Result<()> {
        let send_err = |reason: String| RelayError::Send {
            recipient: message.to.clone(),
            reason,
        };

        let from_addr: Address = message
            .from_address
            .parse()
            .map_err(|e| send_err(format!("invalid from address: {e}")))?;
        let from = Mailbox::new(Some(message.from_name.clone()), from_addr);
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| send_err(format!("invalid recipient: {e}")))?;

        let content_type = if message.is_html {
            ContentType::TEXT_HTML
        } else {
            ContentType::TEXT_PLAIN
        };

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.as_str())
            .header(content_type)
            .body(message.body.clone())
            .map_err(|e| send_err(e.to_string()))?;

        self.transport
            .send(&email)
            .map_err(|e| send_err(e.to_string()))?;
        Ok(())
    }
}
