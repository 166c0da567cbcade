//! TOML configuration, matching the enumerated keys in spec §6 plus the
//! ambient pool/timeout/listener knobs a deployable server needs.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_address_separator() -> String {
    "+".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_message_size() -> usize {
    50 * 1024 * 1024
}

fn default_idle_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageCopyPolicy {
    None,
    All,
    Delivered,
    Errors,
}

impl Default for MessageCopyPolicy {
    fn default() -> Self {
        MessageCopyPolicy::None
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Announced in the greeting and used to build `Message-ID`/`Received`.
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Strip `<separator><detail>` from localparts before permission checks.
    #[serde(default)]
    pub use_subaddressing: bool,

    #[serde(default = "default_address_separator")]
    pub address_separator: String,

    #[serde(default)]
    pub message_copy: MessageCopyPolicy,

    pub message_copy_directory: Option<PathBuf>,

    /// Enforce From/Sender/Return-Path ownership in the Submit dialect.
    #[serde(default = "default_true")]
    pub check_sender_addresses: bool,

    /// Promote 5xx injection failures to 4xx.
    #[serde(default)]
    pub soft_bounce: bool,

    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    #[serde(default)]
    pub listener: ListenerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub sieve: SieveSettings,

    #[serde(default)]
    pub timeouts: Timeouts,
}

impl Default for Config {
    fn default() -> Self {
        // serde(default) on every field means an empty TOML document
        // deserializes to the same thing as this literal.
        toml::from_str("").expect("empty config document always parses")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ListenerConfig {
    pub smtp_bind: String,
    pub lmtp_bind: Option<String>,
    pub submission_bind: Option<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            smtp_bind: "0.0.0.0:25".to_string(),
            lmtp_bind: None,
            submission_bind: Some("0.0.0.0:587".to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "host=localhost user=mailcore dbname=mailcore".to_string(),
            max_connections: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SieveSettings {
    /// If true, a script that fails to parse hard-rejects the message
    /// instead of falling back to implicit keep (spec §4.3, §7).
    pub hard_fail_on_parse_error: bool,
}

impl Default for SieveSettings {
    fn default() -> Self {
        Self {
            hard_fail_on_parse_error: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    #[serde(rename = "command_secs", default = "default_idle_timeout_secs")]
    pub command_secs: u64,
    #[serde(rename = "data_secs", default = "default_idle_timeout_secs")]
    pub data_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command_secs: default_idle_timeout_secs(),
            data_secs: default_idle_timeout_secs(),
        }
    }
}

impl Timeouts {
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }
}

impl Config {
    pub fn parse(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.address_separator, "+");
        assert!(cfg.check_sender_addresses);
        assert!(!cfg.soft_bounce);
        assert_eq!(cfg.message_copy, MessageCopyPolicy::None);
    }

    #[test]
    fn overrides_apply() {
        let cfg = Config::parse(
            r#"
            hostname = "mx.example.org"
            use-subaddressing = true
            soft-bounce = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.hostname, "mx.example.org");
        assert!(cfg.use_subaddressing);
        assert!(cfg.soft_bounce);
    }
}
