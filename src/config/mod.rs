//! Configuration management for notifyd
//!
//! Configuration is loaded from multiple sources with clear precedence:
//!
//! 1. Environment variables (highest priority, `NOTIFYD_` prefix)
//! 2. `./config.toml` (development)
//! 3. Hardcoded defaults (fallback)
//!
//! # Example Configuration
//!
//! ```toml
//! # config.toml
//! [database]
//! url = "postgres://localhost/notifyd"
//!
//! [worker]
//! count = 5
//! instance_index = 0
//!
//! [smtp]
//! host = "smtp.example.com"
//! port = 587
//! sender = "noreply@example.com"
//! domain = "example.com"
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use notifyd::config::NotifydConfig;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = NotifydConfig::load()?;
//! let count = config.worker.count;
//! # Ok(())
//! # }
//! ```

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Worker pool tuning (§4.B, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Number of workers this process should run.
    pub count: usize,
    /// Logical instance index for multi-process horizontal scale-out.
    pub instance_index: usize,
    /// Upper bound on jittered sleep between empty `Reserve` polls, in ms.
    pub queue_wait_max_duration_ms: u64,
    /// Duration a lease is held before it is reclaimable, in seconds.
    pub lease_duration_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            count: 5,
            instance_index: 0,
            queue_wait_max_duration_ms: 5_000,
            lease_duration_secs: 300,
        }
    }
}

impl WorkerSettings {
    /// The configured reserve-poll backoff ceiling as a [`Duration`].
    #[must_use]
    pub const fn queue_wait_max_duration(&self) -> Duration {
        Duration::from_millis(self.queue_wait_max_duration_ms)
    }

    /// The configured lease duration as a [`Duration`].
    #[must_use]
    pub const fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Postgres connection string.
    pub url: String,
    /// Enable `sqlx` query logging.
    pub logging_enabled: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/notifyd".to_string(),
            logging_enabled: false,
        }
    }
}

/// SMTP transport settings (§4.F, §6 `SMTP_*`/`SENDER`/`DOMAIN`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    /// SMTP relay host.
    pub host: String,
    /// SMTP relay port.
    pub port: u16,
    /// Username for SMTP auth, if required.
    pub username: Option<String>,
    /// Password for SMTP auth, if required.
    pub password: Option<String>,
    /// The `From` address used on every outgoing envelope.
    pub sender: String,
    /// The domain used to build `Message-Id`s and endorsement copy.
    pub domain: String,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 587,
            username: None,
            password: None,
            sender: "noreply@example.com".to_string(),
            domain: "example.com".to_string(),
        }
    }
}

/// External directory settings (§4.D UAA + Cloud Controller equivalents).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    /// Identity service (UAA) host.
    pub uaa_host: String,
    /// Identity service OAuth2 client id.
    pub uaa_client_id: String,
    /// Identity service OAuth2 client secret.
    pub uaa_client_secret: String,
    /// Resource catalog (Cloud Controller) host.
    pub cc_host: String,
    /// Deadline applied to every outbound directory call, in ms (§5).
    pub request_timeout_ms: u64,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            uaa_host: String::new(),
            uaa_client_id: String::new(),
            uaa_client_secret: String::new(),
            cc_host: String::new(),
            request_timeout_ms: 30_000,
        }
    }
}

impl DirectorySettings {
    /// The configured outbound request deadline as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Payload-at-rest encryption settings (§4.E, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionSettings {
    /// 32-byte key, hex-encoded, used to seal job payloads and template
    /// bodies before they are persisted.
    pub key_hex: String,
}

impl Default for EncryptionSettings {
    fn default() -> Self {
        Self {
            key_hex: "0".repeat(64),
        }
    }
}

/// Complete notifyd configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifydConfig {
    /// Worker pool settings.
    #[serde(default)]
    pub worker: WorkerSettings,
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseSettings,
    /// SMTP settings.
    #[serde(default)]
    pub smtp: SmtpSettings,
    /// External directory settings.
    #[serde(default)]
    pub directories: DirectorySettings,
    /// Encryption settings.
    #[serde(default)]
    pub encryption: EncryptionSettings,
}

impl NotifydConfig {
    /// Load configuration, merging defaults, `./config.toml`, and
    /// `NOTIFYD_`-prefixed environment variables (highest priority).
    ///
    /// # Errors
    ///
    /// Returns an error if `config.toml` exists but cannot be parsed, or if
    /// an environment variable cannot be coerced into its target type.
    pub fn load() -> anyhow::Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("NOTIFYD_").split("_"))
            .extract()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NotifydConfig::default();
        assert_eq!(config.worker.count, 5);
        assert_eq!(config.worker.instance_index, 0);
        assert!(!config.database.logging_enabled);
    }

    #[test]
    fn test_worker_durations() {
        let worker = WorkerSettings::default();
        assert_eq!(worker.queue_wait_max_duration(), Duration::from_secs(5));
        assert_eq!(worker.lease_duration(), Duration::from_secs(300));
    }

    #[test]
    fn test_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("NOTIFYD_WORKER_COUNT", "12");
            let config = NotifydConfig::load().unwrap();
            assert_eq!(config.worker.count, 12);
            Ok(())
        });
    }
}
