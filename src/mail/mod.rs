//! SMTP transport (§4.F step 5). Grounded on
//! `src/email/sender.rs`'s trait-plus-mock shape, rewired onto `lettre`
//! instead of the teacher's stubbed sender.

use crate::config::SmtpSettings;
use crate::error::Retryable;
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

/// A fully packaged outbound message (§4.F step 4).
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Recipient address.
    pub to: String,
    /// Sender address (`SMTP_SENDER@SMTP_DOMAIN`).
    pub from: String,
    /// `Reply-To`, if set.
    pub reply_to: Option<String>,
    /// Subject line.
    pub subject: String,
    /// Plain-text body part.
    pub text: String,
    /// HTML body part.
    pub html: String,
}

/// Errors sending mail, classified for the retry handler (§4.G).
#[derive(Debug, Error)]
pub enum MailError {
    /// The envelope itself was malformed (bad address, etc) — terminal.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The SMTP transport rejected or failed to deliver — transient.
    #[error("smtp transport error: {0}")]
    Transport(String),
}

impl Retryable for MailError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Pluggable mail transport (§4.F step 5), mirroring the teacher's
/// `#[cfg_attr(test, mockall::automock)]` convention for sender traits.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Send a fully packaged envelope.
    async fn send(&self, envelope: Envelope) -> Result<(), MailError>;
}

/// `lettre`-backed [`MailClient`].
pub struct SmtpMailClient {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailClient {
    /// Build a client from the configured SMTP settings (§5).
    ///
    /// # Errors
    /// Returns an error if the transport cannot be constructed (invalid
    /// host, TLS setup failure).
    pub fn new(settings: &SmtpSettings) -> Result<Self, MailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
            .port(settings.port);
        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl MailClient for SmtpMailClient {
    async fn send(&self, envelope: Envelope) -> Result<(), MailError> {
        let to: Mailbox = envelope
            .to
            .parse()
            .map_err(|err| MailError::Malformed(format!("invalid recipient: {err}")))?;
        let from: Mailbox = envelope
            .from
            .parse()
            .map_err(|err| MailError::Malformed(format!("invalid sender: {err}")))?;

        let mut builder = Message::builder().to(to).from(from).subject(envelope.subject);
        if let Some(reply_to) = envelope.reply_to {
            let reply_to: Mailbox = reply_to
                .parse()
                .map_err(|err| MailError::Malformed(format!("invalid reply-to: {err}")))?;
            builder = builder.reply_to(reply_to);
        }

        let message = builder
            .multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(envelope.text))
                    .singlepart(SinglePart::html(envelope.html)),
            )
            .map_err(|err| MailError::Malformed(err.to_string()))?;

        self.transport.send(message).await.map_err(|err| {
            // A permanent SMTP rejection (5xx) is terminal; anything else
            // (4xx, network/timeout) is worth retrying.
            if err.is_permanent() {
                MailError::Malformed(err.to_string())
            } else {
                MailError::Transport(err.to_string())
            }
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_client_reports_transport_error_as_retryable() {
        let mut mock = MockMailClient::new();
        mock.expect_send()
            .returning(|_| Box::pin(async { Err(MailError::Transport("timeout".to_string())) }));
        let err = mock
            .send(Envelope {
                to: "a@example.com".to_string(),
                from: "b@example.com".to_string(),
                reply_to: None,
                subject: "hi".to_string(),
                text: "hi".to_string(),
                html: "<p>hi</p>".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_malformed_is_not_retryable() {
        let err = MailError::Malformed("bad address".to_string());
        assert!(!err.is_retryable());
    }
}
