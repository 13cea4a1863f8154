use std::time::Duration;

use chrono_tz::Tz;
use log::warn;
use thiserror::Error;

pub const DEFAULT_DAILY_LIMIT: i64 = 2000;
pub const DEFAULT_DATABASE_PATH: &str = "data/mailrelay.db";
pub const DEFAULT_TIMEZONE: &str = "Asia/Kolkata";
pub const DEFAULT_SMTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_STATIC_DIR: &str = "web";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid BUSINESS_TIMEZONE '{0}': expected an IANA zone name")]
    InvalidTimezone(String),

    #[error("invalid ATTACHMENT_POLICY '{0}': expected 'abort' or 'skip'")]
    InvalidAttachmentPolicy(String),

    #[error("invalid {name} '{value}': expected a positive integer")]
    InvalidNumber { name: &'static str, value: String },
}

/// What the dispatcher does when an attachment cannot be opened or read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentPolicy {
    /// Fail the whole send.
    Abort,
    /// Leave the file out, log a warning, and send the rest.
    Skip,
}

impl AttachmentPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abort" => Some(AttachmentPolicy::Abort),
            "skip" => Some(AttachmentPolicy::Skip),
            _ => None,
        }
    }
}

/// Process-wide configuration. Built once at startup, then shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream relay as `host:port`. Validated when a send is attempted.
    pub mail_hub: String,
    pub auth_user: String,
    pub auth_pass: String,
    /// Overrides the From address; falls back to `auth_user` when empty.
    pub from_email: String,
    pub use_tls: bool,
    pub use_starttls: bool,
    pub skip_tls_verify: bool,
    pub daily_limit: i64,
    pub database_path: String,
    pub timezone: Tz,
    pub smtp_timeout: Duration,
    pub attachment_policy: AttachmentPolicy,
    pub static_dir: String,
    pub port: Option<u16>,
}

impl Config {
    /// Read configuration from the process environment, loading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_err() {
            log::info!("No .env file found, using environment variables directly.");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).unwrap_or_default();
        let flag = |key: &str| get(key).eq_ignore_ascii_case("YES");

        let daily_limit = match get("DAILY_MAIL_LIMIT").parse::<i64>() {
            Ok(n) if n > 0 => n,
            _ => {
                warn!(
                    "DAILY_MAIL_LIMIT not set or invalid, defaulting to {}",
                    DEFAULT_DAILY_LIMIT
                );
                DEFAULT_DAILY_LIMIT
            }
        };

        let tz_name = non_empty_or(get("BUSINESS_TIMEZONE"), DEFAULT_TIMEZONE);
        let timezone = tz_name
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(tz_name.clone()))?;

        let policy_raw = non_empty_or(get("ATTACHMENT_POLICY"), "abort");
        let attachment_policy = AttachmentPolicy::parse(&policy_raw)
            .ok_or(ConfigError::InvalidAttachmentPolicy(policy_raw))?;

        let timeout_raw = get("SMTP_TIMEOUT_SECS");
        let timeout_secs = if timeout_raw.is_empty() {
            DEFAULT_SMTP_TIMEOUT_SECS
        } else {
            match timeout_raw.parse::<u64>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidNumber {
                        name: "SMTP_TIMEOUT_SECS",
                        value: timeout_raw,
                    })
                }
            }
        };

        let port_raw = get("PORT");
        let port = if port_raw.is_empty() {
            None
        } else {
            Some(port_raw.parse::<u16>().map_err(|_| ConfigError::InvalidNumber {
                name: "PORT",
                value: port_raw.clone(),
            })?)
        };

        Ok(Config {
            mail_hub: get("MAILHUB"),
            auth_user: get("AUTHUSER"),
            auth_pass: lookup("AUTHPASS").unwrap_or_default(),
            from_email: get("FROM_EMAIL"),
            use_tls: flag("USETLS"),
            use_starttls: flag("USESTARTTLS"),
            skip_tls_verify: flag("SKIP_TLS_VERIFY"),
            daily_limit,
            database_path: non_empty_or(get("DATABASE_URL"), DEFAULT_DATABASE_PATH),
            timezone,
            smtp_timeout: Duration::from_secs(timeout_secs),
            attachment_policy,
            static_dir: non_empty_or(get("STATIC_DIR"), DEFAULT_STATIC_DIR),
            port,
        })
    }

    /// The address used in the From header, if any is configured.
    pub fn sender(&self) -> Option<&str> {
        [self.from_email.as_str(), self.auth_user.as_str()]
            .into_iter()
            .find(|s| !s.is_empty())
    }
}

fn non_empty_or(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_apply_when_unset() {
        let cfg = config_from(&[]).unwrap();
        assert_eq!(cfg.daily_limit, DEFAULT_DAILY_LIMIT);
        assert_eq!(cfg.database_path, DEFAULT_DATABASE_PATH);
        assert_eq!(cfg.timezone, chrono_tz::Asia::Kolkata);
        assert_eq!(cfg.attachment_policy, AttachmentPolicy::Abort);
        assert_eq!(cfg.smtp_timeout, Duration::from_secs(30));
        assert!(!cfg.skip_tls_verify);
        assert!(cfg.port.is_none());
    }

    #[test]
    fn test_zero_or_garbage_limit_falls_back() {
        assert_eq!(config_from(&[("DAILY_MAIL_LIMIT", "0")]).unwrap().daily_limit, 2000);
        assert_eq!(config_from(&[("DAILY_MAIL_LIMIT", "lots")]).unwrap().daily_limit, 2000);
        assert_eq!(config_from(&[("DAILY_MAIL_LIMIT", "25")]).unwrap().daily_limit, 25);
    }

    #[test]
    fn test_flags_only_accept_yes() {
        let cfg = config_from(&[
            ("USETLS", "YES"),
            ("USESTARTTLS", "true"),
            ("SKIP_TLS_VERIFY", "yes"),
        ])
        .unwrap();
        assert!(cfg.use_tls);
        assert!(!cfg.use_starttls);
        assert!(cfg.skip_tls_verify);
    }

    #[test]
    fn test_invalid_timezone_is_an_error() {
        let err = config_from(&[("BUSINESS_TIMEZONE", "Mars/Olympus")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimezone(_)));
    }

    #[test]
    fn test_attachment_policy_parsing() {
        let cfg = config_from(&[("ATTACHMENT_POLICY", "Skip")]).unwrap();
        assert_eq!(cfg.attachment_policy, AttachmentPolicy::Skip);
        let err = config_from(&[("ATTACHMENT_POLICY", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAttachmentPolicy(_)));
    }

    #[test]
    fn test_sender_prefers_override() {
        let cfg = config_from(&[("AUTHUSER", "acct@x.com"), ("FROM_EMAIL", "noreply@x.com")]).unwrap();
        assert_eq!(cfg.sender(), Some("noreply@x.com"));
        let cfg = config_from(&[("AUTHUSER", "acct@x.com")]).unwrap();
        assert_eq!(cfg.sender(), Some("acct@x.com"));
        assert_eq!(config_from(&[]).unwrap().sender(), None);
    }

    #[test]
    fn test_bad_port_is_rejected() {
        assert!(config_from(&[("PORT", "eighty")]).is_err());
        assert_eq!(config_from(&[("PORT", "8080")]).unwrap().port, Some(8080));
    }
}
