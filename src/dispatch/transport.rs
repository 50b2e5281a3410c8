//! Outbound mail channel
//!
//! [`MailTransport`] opens an authenticated session for one account and
//! [`MailSession`] sends through it. The SMTP implementation rides on lettre;
//! tests substitute their own transport.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, warn};

use super::error::TransportError;
use super::pool::OutboundAccount;
use crate::config::DispatchConfig;
use crate::utils::retry::{with_retry, RetryConfig};

/// A rendered notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Open and authenticate a session for `account`
    async fn connect(
        &self,
        account: &OutboundAccount,
    ) -> Result<Box<dyn MailSession>, TransportError>;
}

#[async_trait]
pub trait MailSession: Send {
    async fn send(&mut self, message: &OutgoingMessage) -> Result<(), TransportError>;

    async fn close(self: Box<Self>);
}

// ============================================================================
// SMTP
// ============================================================================

pub struct SmtpTransport {
    sender_name: String,
    retry: RetryConfig,
    timeout: Duration,
}

impl SmtpTransport {
    pub fn new(sender_name: impl Into<String>, retry: RetryConfig, timeout: Duration) -> Self {
        Self {
            sender_name: sender_name.into(),
            retry,
            timeout,
        }
    }

    /// Attempts, pause and timeout from the dispatch section
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(
            config.sender_name.clone(),
            RetryConfig::fixed(
                config.connect_attempts,
                Duration::from_secs(config.connect_retry_delay_secs),
            ),
            Duration::from_secs(config.smtp_timeout_secs),
        )
    }

    fn build_mailer(
        &self,
        account: &OutboundAccount,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        let builder = if account.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&account.host).map_err(|e| {
                TransportError::Connect {
                    account: account.identity.clone(),
                    attempts: 0,
                    reason: format!("SMTP relay: {e}"),
                }
            })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&account.host)
        };

        let credentials = Credentials::new(account.identity.clone(), account.credential.clone());
        Ok(builder
            .port(account.port)
            .credentials(credentials)
            .timeout(Some(self.timeout))
            .build())
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn connect(
        &self,
        account: &OutboundAccount,
    ) -> Result<Box<dyn MailSession>, TransportError> {
        let from: Mailbox = format!("{} <{}>", self.sender_name, account.identity)
            .parse()
            .map_err(|e| TransportError::InvalidAddress {
                address: account.identity.clone(),
                reason: format!("{e}"),
            })?;

        let mailer = self.build_mailer(account)?;
        let timeout = self.timeout;
        let session = &mailer;

        with_retry(&self.retry, || async move {
            match tokio::time::timeout(timeout, session.test_connection()).await {
                Ok(Ok(true)) => Ok(()),
                Ok(Ok(false)) => Err("server refused the session".to_string()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("no answer within {}s", timeout.as_secs())),
            }
        })
        .await
        .map_err(|reason| {
            warn!(account = %account.identity, %reason, "SMTP connect failed");
            TransportError::Connect {
                account: account.identity.clone(),
                attempts: self.retry.max_attempts,
                reason,
            }
        })?;

        debug!(account = %account.identity, host = %account.host, "SMTP session ready");

        Ok(Box::new(SmtpSession {
            account: account.identity.clone(),
            from,
            mailer,
            timeout,
        }))
    }
}

struct SmtpSession {
    account: String,
    from: Mailbox,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    timeout: Duration,
}

#[async_trait]
impl MailSession for SmtpSession {
    async fn send(&mut self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| TransportError::InvalidAddress {
                address: message.to.clone(),
                reason: format!("{e}"),
            })?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(message.html_body.clone())
            .map_err(|e| TransportError::Build(e.to_string()))?;

        tokio::time::timeout(self.timeout, self.mailer.send(email))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: format!("sending to {}", message.to),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| TransportError::Send {
                account: self.account.clone(),
                reason: e.to_string(),
            })?;

        Ok(())
    }

    async fn close(self: Box<Self>) {
        // lettre closes pooled connections on drop
        debug!(account = %self.account, "SMTP session closed");
    }
}
