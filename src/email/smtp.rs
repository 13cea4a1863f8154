use std::fs::File;
use std::io::{BufReader, Read};

use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};
use log::{info, warn};

use super::{Attachment, AttachmentSource, DeliveryOutcome, MailError, Mailer, SendRequest};
use crate::config::{AttachmentPolicy, Config};

/// Split a relay address of the form `host:port`.
pub fn parse_relay(addr: &str) -> Result<(String, u16), MailError> {
    let invalid = || MailError::InvalidRelay(addr.to_string());
    let mut parts = addr.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(host), Some(port), None) if !host.trim().is_empty() => {
            let port: u16 = port.trim().parse().map_err(|_| invalid())?;
            if port == 0 {
                return Err(invalid());
            }
            Ok((host.trim().to_string(), port))
        }
        _ => Err(invalid()),
    }
}

fn mailbox(addr: &str) -> Result<Mailbox, MailError> {
    addr.parse()
        .map_err(|_| MailError::InvalidAddress(addr.to_string()))
}

fn read_attachment(attachment: &Attachment) -> std::io::Result<Vec<u8>> {
    match &attachment.source {
        AttachmentSource::Bytes(bytes) => Ok(bytes.clone()),
        AttachmentSource::File(path) => {
            let mut reader = BufReader::new(File::open(path)?);
            let mut content = Vec::new();
            reader.read_to_end(&mut content)?;
            Ok(content)
        }
    }
}

/// Relay-backed mailer. One SMTP connection per send.
pub struct SmtpMailer {
    config: Config,
}

impl SmtpMailer {
    pub fn new(config: Config) -> Self {
        if config.skip_tls_verify {
            warn!("SKIP_TLS_VERIFY is set: relay certificates will NOT be verified. Do not use this in production.");
        }
        Self { config }
    }

    pub fn build_message(&self, request: &SendRequest) -> Result<Message, MailError> {
        let from = self.config.sender().ok_or(MailError::MissingSender)?;
        let mut builder = Message::builder()
            .from(mailbox(from)?)
            .subject(request.subject.as_str());

        for to in &request.to {
            builder = builder.to(mailbox(to)?);
        }
        for cc in &request.cc {
            builder = builder.cc(mailbox(cc)?);
        }
        for bcc in &request.bcc {
            builder = builder.bcc(mailbox(bcc)?);
        }

        let html = SinglePart::html(request.body.clone());
        if request.attachments.is_empty() {
            return builder
                .singlepart(html)
                .map_err(|e| MailError::Build(e.to_string()));
        }

        let mut parts = MultiPart::mixed().singlepart(html);
        for attachment in &request.attachments {
            let content = match read_attachment(attachment) {
                Ok(content) => content,
                Err(source) => match self.config.attachment_policy {
                    AttachmentPolicy::Abort => {
                        return Err(MailError::Attachment {
                            name: attachment.filename.clone(),
                            source,
                        })
                    }
                    AttachmentPolicy::Skip => {
                        warn!(
                            "Could not open attachment {}: {}. Skipping file.",
                            attachment.filename, source
                        );
                        continue;
                    }
                },
            };
            let content_type = attachment
                .content_type
                .as_deref()
                .and_then(|ct| ContentType::parse(ct).ok())
                .unwrap_or_else(|| {
                    ContentType::parse("application/octet-stream")
                        .unwrap_or(ContentType::TEXT_PLAIN)
                });
            parts = parts.singlepart(
                lettre::message::Attachment::new(attachment.filename.clone())
                    .body(content, content_type),
            );
        }

        builder
            .multipart(parts)
            .map_err(|e| MailError::Build(e.to_string()))
    }

    fn transport(&self, host: &str, port: u16) -> Result<SmtpTransport, MailError> {
        let params = TlsParameters::builder(host.to_string())
            .dangerous_accept_invalid_certs(self.config.skip_tls_verify)
            .build()
            .map_err(|e| MailError::Smtp(e.to_string()))?;

        if self.config.skip_tls_verify {
            warn!("TLS certificate verification is DISABLED for relay {}", host);
        }

        let tls = if self.config.use_tls || (!self.config.use_starttls && port == 465) {
            Tls::Wrapper(params)
        } else if self.config.use_starttls {
            Tls::Required(params)
        } else {
            Tls::Opportunistic(params)
        };

        let mut builder = SmtpTransport::builder_dangerous(host)
            .port(port)
            .tls(tls)
            .timeout(Some(self.config.smtp_timeout));

        if !self.config.auth_user.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.auth_user.clone(),
                self.config.auth_pass.clone(),
            ));
        }

        Ok(builder.build())
    }

    fn try_send(&self, request: &SendRequest) -> Result<(), MailError> {
        let (host, port) = parse_relay(&self.config.mail_hub)?;
        let message = self.build_message(request)?;
        let mailer = self.transport(&host, port)?;

        mailer
            .send(&message)
            .map_err(|e| MailError::Smtp(e.to_string()))?;

        info!(
            "Email sent to {} via {}:{} ({} recipients, {} attachments)",
            request.to.join(", "),
            host,
            port,
            request.recipient_count(),
            request.attachments.len()
        );
        Ok(())
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, request: &SendRequest) -> DeliveryOutcome {
        self.try_send(request).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn mailer_with(pairs: &[(&str, &str)]) -> SmtpMailer {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SmtpMailer::new(Config::from_lookup(|k| map.get(k).cloned()).unwrap())
    }

    fn request(to: &[&str]) -> SendRequest {
        SendRequest {
            to: to.iter().map(|s| s.to_string()).collect(),
            subject: "Hi".into(),
            body: "<b>hello</b>".into(),
            ..Default::default()
        }
    }

    fn missing_file() -> Attachment {
        Attachment {
            filename: "gone.pdf".into(),
            content_type: Some("application/pdf".into()),
            source: AttachmentSource::File(PathBuf::from("/nonexistent/mailrelay/gone.pdf")),
        }
    }

    #[test]
    fn test_parse_relay() {
        assert_eq!(parse_relay("smtp.x.com:587").unwrap(), ("smtp.x.com".to_string(), 587));
        assert!(matches!(parse_relay("badhost"), Err(MailError::InvalidRelay(_))));
        assert!(parse_relay(":25").is_err());
        assert!(parse_relay("host:port").is_err());
        assert!(parse_relay("host:25:26").is_err());
        assert!(parse_relay("host:0").is_err());
        assert!(parse_relay("").is_err());
    }

    #[test]
    fn test_message_headers_without_cc() {
        let mailer = mailer_with(&[("AUTHUSER", "acct@x.com")]);
        let msg = mailer.build_message(&request(&["a@x.com", "b@x.com"])).unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("From: acct@x.com"));
        assert!(raw.contains("Subject: Hi"));
        assert!(raw.contains("text/html"));
        assert!(!raw.contains("Cc:"));
        assert!(msg.headers().get_raw("Cc").is_none());
        assert_eq!(msg.envelope().to().len(), 2);
    }

    #[test]
    fn test_message_cc_and_bcc() {
        let mailer = mailer_with(&[("AUTHUSER", "acct@x.com"), ("FROM_EMAIL", "noreply@x.com")]);
        let mut req = request(&["a@x.com"]);
        req.cc = vec!["c@x.com".into()];
        req.bcc = vec!["d@x.com".into()];
        let msg = mailer.build_message(&req).unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("From: noreply@x.com"));
        assert!(raw.contains("Cc: c@x.com"));
        // Bcc travels in the envelope only
        assert!(!raw.contains("d@x.com"));
        let envelope: Vec<String> = msg.envelope().to().iter().map(|a| a.to_string()).collect();
        assert!(envelope.contains(&"d@x.com".to_string()));
        assert_eq!(envelope.len(), 3);
    }

    #[test]
    fn test_missing_sender_is_configuration_error() {
        let mailer = mailer_with(&[]);
        let err = mailer.build_message(&request(&["a@x.com"])).unwrap_err();
        assert!(matches!(err, MailError::MissingSender));
    }

    #[test]
    fn test_invalid_recipient_rejected() {
        let mailer = mailer_with(&[("AUTHUSER", "acct@x.com")]);
        let err = mailer.build_message(&request(&["not an address"])).unwrap_err();
        assert!(matches!(err, MailError::InvalidAddress(_)));
    }

    #[test]
    fn test_inline_attachment_makes_multipart() {
        let mailer = mailer_with(&[("AUTHUSER", "acct@x.com")]);
        let mut req = request(&["a@x.com"]);
        req.attachments.push(Attachment {
            filename: "notes.txt".into(),
            content_type: Some("text/plain".into()),
            source: AttachmentSource::Bytes(b"attached words".to_vec()),
        });
        let raw = String::from_utf8(mailer.build_message(&req).unwrap().formatted()).unwrap();
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("notes.txt"));
    }

    #[test]
    fn test_abort_policy_fails_on_unreadable_attachment() {
        let mailer = mailer_with(&[("AUTHUSER", "acct@x.com"), ("ATTACHMENT_POLICY", "abort")]);
        let mut req = request(&["a@x.com"]);
        req.attachments.push(missing_file());
        let err = mailer.build_message(&req).unwrap_err();
        assert!(matches!(err, MailError::Attachment { ref name, .. } if name == "gone.pdf"));
    }

    #[test]
    fn test_skip_policy_sends_without_unreadable_attachment() {
        let mailer = mailer_with(&[("AUTHUSER", "acct@x.com"), ("ATTACHMENT_POLICY", "skip")]);
        let mut req = request(&["a@x.com"]);
        req.attachments.push(missing_file());
        let raw = String::from_utf8(mailer.build_message(&req).unwrap().formatted()).unwrap();
        assert!(!raw.contains("gone.pdf"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn test_malformed_relay_fails_before_connecting() {
        let mailer = mailer_with(&[("AUTHUSER", "acct@x.com"), ("MAILHUB", "badhost")]);
        match mailer.send(&request(&["a@x.com"])) {
            DeliveryOutcome::Failed(e) => assert!(e.is_configuration()),
            DeliveryOutcome::Sent => panic!("send should fail"),
        }
    }
}
