pub mod smtp;

use std::path::PathBuf;

use thiserror::Error;

use crate::models::email_log::SendStatus;

pub use smtp::SmtpMailer;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid relay address '{0}': expected host:port")]
    InvalidRelay(String),

    #[error("no sender address configured (set FROM_EMAIL or AUTHUSER)")]
    MissingSender,

    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    #[error("could not read attachment '{name}': {source}")]
    Attachment {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("dispatcher panicked: {0}")]
    Panicked(String),
}

impl MailError {
    /// Errors caused by the relay setup rather than the message or the network.
    pub fn is_configuration(&self) -> bool {
        matches!(self, MailError::InvalidRelay(_) | MailError::MissingSender)
    }
}

/// Where an attachment's bytes come from.
#[derive(Debug, Clone)]
pub enum AttachmentSource {
    /// Opened when the message is built; the handle lives only for that read.
    File(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub source: AttachmentSource,
}

/// A validated send request. `to` is never empty.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl SendRequest {
    /// The unit the daily quota is measured in.
    pub fn recipient_count(&self) -> i64 {
        (self.to.len() + self.cc.len() + self.bcc.len()) as i64
    }
}

#[derive(Debug)]
pub enum DeliveryOutcome {
    Sent,
    Failed(MailError),
}

impl DeliveryOutcome {
    pub fn status(&self) -> SendStatus {
        match self {
            DeliveryOutcome::Sent => SendStatus::Success,
            DeliveryOutcome::Failed(_) => SendStatus::Failed,
        }
    }

    pub fn error(&self) -> Option<&MailError> {
        match self {
            DeliveryOutcome::Sent => None,
            DeliveryOutcome::Failed(e) => Some(e),
        }
    }
}

impl From<Result<(), MailError>> for DeliveryOutcome {
    fn from(result: Result<(), MailError>) -> Self {
        match result {
            Ok(()) => DeliveryOutcome::Sent,
            Err(e) => DeliveryOutcome::Failed(e),
        }
    }
}

/// Transmits one message to the upstream relay. No retries.
pub trait Mailer: Send + Sync {
    fn send(&self, request: &SendRequest) -> DeliveryOutcome;
}

/// Split a comma-separated address list, trimming entries and dropping empty ones.
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recipients_drops_blanks() {
        assert_eq!(
            parse_recipients(" a@x.com , ,b@x.com "),
            vec!["a@x.com".to_string(), "b@x.com".to_string()]
        );
        assert!(parse_recipients(" , ,").is_empty());
        assert!(parse_recipients("").is_empty());
    }

    #[test]
    fn test_recipient_count_sums_all_lists() {
        let req = SendRequest {
            to: vec!["a@x.com".into(), "b@x.com".into()],
            cc: vec!["c@x.com".into()],
            bcc: vec!["d@x.com".into(), "e@x.com".into()],
            ..Default::default()
        };
        assert_eq!(req.recipient_count(), 5);
    }

    #[test]
    fn test_outcome_status() {
        assert_eq!(DeliveryOutcome::Sent.status(), SendStatus::Success);
        let failed = DeliveryOutcome::from(Err(MailError::Smtp("boom".into())));
        assert_eq!(failed.status(), SendStatus::Failed);
        assert!(failed.error().is_some());
    }

    #[test]
    fn test_configuration_errors() {
        assert!(MailError::InvalidRelay("badhost".into()).is_configuration());
        assert!(MailError::MissingSender.is_configuration());
        assert!(!MailError::Smtp("timeout".into()).is_configuration());
    }
}
