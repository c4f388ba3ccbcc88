//! Configuration types, built once at startup from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Longest accepted poll interval: one week.
const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Longest accepted lookback window: one year.
const MAX_LOOKBACK_HOURS: u64 = 365 * 24;

/// IMAP mailbox the service polls.
#[derive(Debug)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Folder selected after login.
    pub folder: String,
}

/// SMTP relay used for replies.
#[derive(Debug)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// Hotel details rendered into every reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotelProfile {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
}

impl Default for HotelProfile {
    fn default() -> Self {
        Self {
            name: "Grand Hotel".to_string(),
            email: "reservations@grandhotel.com".to_string(),
            phone: "+1-555-0123".to_string(),
            address: "123 Hotel Street, City, State 12345".to_string(),
        }
    }
}

/// Full service configuration.
#[derive(Debug)]
pub struct AppConfig {
    /// Shared with the mailbox, which reconnects with it.
    pub mailbox: Arc<MailboxConfig>,
    pub transport: TransportConfig,
    pub hotel: HotelProfile,
    /// Time between mailbox polls.
    pub poll_interval: Duration,
    /// How far back each poll searches for unseen mail.
    pub lookback: Duration,
    /// Default log filter when `RUST_LOG` is not set.
    pub log_level: String,
    /// Directory for rolling log files. Console only when unset.
    pub log_dir: Option<PathBuf>,
    /// Overrides the built-in classifier keyword list.
    pub reservation_keywords: Option<Vec<String>>,
}

impl AppConfig {
    /// Build config from process environment variables.
    pub fn from_env() -> crate::error::Result<Self> {
        Ok(Self::from_lookup(|key| std::env::var(key).ok())?)
    }

    /// Build config from an arbitrary key lookup. Every key has a default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let mailbox = MailboxConfig {
            host: text("IMAP_HOST", "imap.gmail.com"),
            port: parse_or(&lookup, "IMAP_PORT", 993)?,
            username: text("IMAP_USER", ""),
            password: SecretString::from(text("IMAP_PASSWORD", "")),
            folder: text("IMAP_FOLDER", "INBOX"),
        };

        let transport = TransportConfig {
            host: text("SMTP_HOST", "smtp.gmail.com"),
            port: parse_or(&lookup, "SMTP_PORT", 587)?,
            username: text("SMTP_USER", ""),
            password: SecretString::from(text("SMTP_PASSWORD", "")),
        };

        let defaults = HotelProfile::default();
        let hotel = HotelProfile {
            name: text("HOTEL_NAME", &defaults.name),
            email: text("HOTEL_EMAIL", &defaults.email),
            phone: text("HOTEL_PHONE", &defaults.phone),
            address: text("HOTEL_ADDRESS", &defaults.address),
        };

        let interval_minutes: u64 = parse_or(&lookup, "CHECK_INTERVAL_MINUTES", 5)?;
        if interval_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHECK_INTERVAL_MINUTES".into(),
                message: "must be at least 1".into(),
            });
        }
        let poll_interval =
            bounded_duration("CHECK_INTERVAL_MINUTES", interval_minutes, 60, MAX_INTERVAL_MINUTES)?;

        let lookback_hours: u64 = parse_or(&lookup, "LOOKBACK_HOURS", 24)?;
        let lookback = bounded_duration("LOOKBACK_HOURS", lookback_hours, 3600, MAX_LOOKBACK_HOURS)?;

        let reservation_keywords = lookup("RESERVATION_KEYWORDS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|list| !list.is_empty());

        Ok(Self {
            mailbox: Arc::new(mailbox),
            transport,
            hotel,
            poll_interval,
            lookback,
            log_level: text("LOG_LEVEL", "info"),
            log_dir: lookup("LOG_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            reservation_keywords,
        })
    }

    /// Addresses belonging to this service. Mail from these is never answered.
    pub fn own_addresses(&self) -> Vec<String> {
        [
            &self.transport.username,
            &self.mailbox.username,
            &self.hotel.email,
        ]
        .into_iter()
        .filter(|a| a.contains('@'))
        .map(|a| a.to_lowercase())
        .collect()
    }
}

/// `value` units of `unit_secs` each, rejected above `max`.
fn bounded_duration(key: &str, value: u64, unit_secs: u64, max: u64) -> Result<Duration, ConfigError> {
    if value > max {
        return Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("must be at most {max}"),
        });
    }
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.into(),
            message: "value too large".into(),
        })
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}
