//! SMTP delivery of exported archives.

use async_trait::async_trait;
use ddd_export_core::contract::{Notifier, OutgoingMail};
use ddd_export_core::error::MailError;
use ddd_export_core::notify::split_recipients;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{error, info};

/// Relay settings; the SMTP user doubles as the sender address.
#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

pub struct SmtpNotifier {
    settings: SmtpSettings,
}

impl SmtpNotifier {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }

    /// Assemble the MIME message: plain-text body plus one zip attachment.
    pub fn build_message(&self, mail: &OutgoingMail) -> Result<Message, MailError> {
        let from: Mailbox = self
            .settings
            .user
            .parse()
            .map_err(|e| MailError::Rejected(format!("invalid sender {}: {e}", self.settings.user)))?;

        let recipients = split_recipients(&mail.recipients);
        if recipients.is_empty() {
            return Err(MailError::Recipient("no recipients configured".to_string()));
        }

        let mut builder = Message::builder().from(from).subject(mail.subject.as_str());
        for addr in &recipients {
            let mailbox: Mailbox = addr
                .parse()
                .map_err(|e| MailError::Recipient(format!("{addr}: {e}")))?;
            builder = builder.to(mailbox);
        }

        let zip = ContentType::parse("application/zip")
            .map_err(|e| MailError::Rejected(e.to_string()))?;
        builder
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(mail.body.clone()))
                    .singlepart(Attachment::new(mail.attachment_name.clone()).body(mail.attachment.clone(), zip)),
            )
            .map_err(|e| MailError::Rejected(e.to_string()))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.settings.host)
            .map_err(|e| MailError::Connection(e.to_string()))?
            .port(self.settings.port)
            .credentials(Credentials::new(
                self.settings.user.clone(),
                self.settings.password.clone(),
            ))
            .build();
        Ok(transport)
    }
}

fn classify(e: lettre::transport::smtp::Error) -> MailError {
    let code = e.status().map(|c| c.to_string());
    match code.as_deref() {
        Some("535") | Some("534") | Some("530") => MailError::Auth(e.to_string()),
        Some("550") | Some("553") | Some("501") => MailError::Recipient(e.to_string()),
        _ if e.is_permanent() => MailError::Rejected(e.to_string()),
        _ => MailError::Connection(e.to_string()),
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let message = self.build_message(mail)?;
        // A fresh transport per call: one SMTP session, torn down after sending.
        let transport = self.transport()?;
        match transport.send(message).await {
            Ok(_) => {
                info!(
                    host = %self.settings.host,
                    attachment = %mail.attachment_name,
                    size = mail.attachment.len(),
                    "Mail sent"
                );
                Ok(())
            }
            Err(e) => {
                error!(host = %self.settings.host, error = %e, "Mail delivery failed");
                Err(classify(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier() -> SmtpNotifier {
        SmtpNotifier::new(SmtpSettings {
            host: "smtp.example.com".into(),
            port: 587,
            user: "exports@fleet.example".into(),
            password: "secret".into(),
        })
    }

    fn mail(recipients: &str) -> OutgoingMail {
        OutgoingMail {
            subject: "DDD BG-123 14.05.2025".into(),
            recipients: recipients.into(),
            body: "Automated tachograph (DDD) export.".into(),
            attachment_name: "BG-123_2025-05-14.zip".into(),
            attachment: vec![0x50, 0x4b, 0x05, 0x06],
        }
    }

    #[test]
    fn message_carries_zip_attachment() {
        let message = notifier()
            .build_message(&mail("ops@fleet.example, audit@fleet.example"))
            .expect("message should build");
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("application/zip"));
        assert!(raw.contains("BG-123_2025-05-14.zip"));
        assert!(raw.contains("audit@fleet.example"));
    }

    #[test]
    fn malformed_recipient_is_rejected() {
        let err = notifier().build_message(&mail("not an address")).unwrap_err();
        assert!(matches!(err, MailError::Recipient(_)));
    }

    #[test]
    fn empty_recipient_list_is_rejected() {
        let err = notifier().build_message(&mail(" , ")).unwrap_err();
        assert!(matches!(err, MailError::Recipient(_)));
    }
}
